//! Firmware image
//!
//! The image is streamed to the PROM as opaque bytes; its integrity check
//! runs on the controller and covers the whole image.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Bytes to program, with their origin
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    path: Option<PathBuf>,
    data: Vec<u8>,
}

impl FirmwareImage {
    /// Load an image file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|source| Error::Image {
            path: path.display().to_string(),
            source,
        })?;
        log::info!("Loaded {} ({} bytes)", path.display(), data.len());
        Ok(Self {
            path: Some(path.to_path_buf()),
            data,
        })
    }

    /// Image held in memory
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        Self {
            path: None,
            data: data.into(),
        }
    }

    /// File the image was loaded from
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Image contents
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the image has no data
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// `(offset, bytes)` pieces of at most `size` bytes, in order
    pub fn chunks(&self, size: u32) -> impl Iterator<Item = (u32, &[u8])> + '_ {
        let size = size.max(1) as usize;
        self.data
            .chunks(size)
            .enumerate()
            .map(move |(i, chunk)| ((i * size) as u32, chunk))
    }

    /// Number of pieces [`FirmwareImage::chunks`] yields
    pub fn chunk_count(&self, size: u32) -> usize {
        self.data.len().div_ceil(size.max(1) as usize)
    }
}
