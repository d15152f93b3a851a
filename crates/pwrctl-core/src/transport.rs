//! Remote memory-access transport contract
//!
//! The board is reached through a packetized remote-procedure transport that
//! multiplexes request/response pairs by sequence number. This module only
//! defines the contract consumed by the register layer; the wire encoding and
//! reliable delivery live behind it.
//!
//! Every call blocks until the matching response arrives or the transport
//! times out. Only one transaction may be in flight per connection, which the
//! `&mut self` receivers enforce. Callers that need to share a connection
//! across threads use [`SharedTransport`], which holds a lock for exactly one
//! request/response pair.

use std::sync::{Arc, Mutex};

use crate::error::{TransportError, TransportErrorKind, TransportOp};

/// Default upper bound for a single `read_range` / `write_range`
pub const DEFAULT_MAX_TRANSACTION_LEN: usize = 4096;

/// Byte-range access to a remote endpoint
pub trait MemoryTransport {
    /// Read `len` bytes starting at `addr`
    fn read_range(&mut self, addr: u64, len: u32) -> Result<Vec<u8>, TransportError>;

    /// Write `data` starting at `addr`
    ///
    /// Returning `Ok` is the endpoint's acknowledgement.
    fn write_range(&mut self, addr: u64, data: &[u8]) -> Result<(), TransportError>;

    /// Largest transaction the transport accepts in one call
    fn max_transaction_len(&self) -> usize {
        DEFAULT_MAX_TRANSACTION_LEN
    }

    /// Whether adjacent registers may be fetched with a single range read
    fn supports_range_reads(&self) -> bool {
        true
    }
}

impl<T: MemoryTransport + ?Sized> MemoryTransport for &mut T {
    fn read_range(&mut self, addr: u64, len: u32) -> Result<Vec<u8>, TransportError> {
        (**self).read_range(addr, len)
    }

    fn write_range(&mut self, addr: u64, data: &[u8]) -> Result<(), TransportError> {
        (**self).write_range(addr, data)
    }

    fn max_transaction_len(&self) -> usize {
        (**self).max_transaction_len()
    }

    fn supports_range_reads(&self) -> bool {
        (**self).supports_range_reads()
    }
}

// Boxed transports are what the registry hands out
impl MemoryTransport for Box<dyn MemoryTransport + Send> {
    fn read_range(&mut self, addr: u64, len: u32) -> Result<Vec<u8>, TransportError> {
        (**self).read_range(addr, len)
    }

    fn write_range(&mut self, addr: u64, data: &[u8]) -> Result<(), TransportError> {
        (**self).write_range(addr, data)
    }

    fn max_transaction_len(&self) -> usize {
        (**self).max_transaction_len()
    }

    fn supports_range_reads(&self) -> bool {
        (**self).supports_range_reads()
    }
}

fn piece_len<T: MemoryTransport + ?Sized>(t: &T) -> usize {
    t.max_transaction_len().clamp(1, u32::MAX as usize)
}

fn overflow(op: TransportOp, addr: u64, len: usize) -> TransportError {
    TransportError {
        op,
        addr,
        len,
        kind: TransportErrorKind::Io("address range overflows 64 bits".into()),
    }
}

/// Read `len` bytes at `addr`, in as many transactions as the transport's
/// length cap requires
pub fn read_split<T: MemoryTransport + ?Sized>(
    t: &mut T,
    addr: u64,
    len: u32,
) -> Result<Vec<u8>, TransportError> {
    let max = piece_len(t) as u32;
    if len <= max {
        return t.read_range(addr, len);
    }
    let mut out = Vec::with_capacity(len as usize);
    let mut done = 0u32;
    while done < len {
        let n = (len - done).min(max);
        let at = addr
            .checked_add(done as u64)
            .ok_or_else(|| overflow(TransportOp::Read, addr, len as usize))?;
        out.extend(t.read_range(at, n)?);
        done += n;
    }
    Ok(out)
}

/// Write `data` at `addr`, in as many transactions as the transport's
/// length cap requires
pub fn write_split<T: MemoryTransport + ?Sized>(
    t: &mut T,
    addr: u64,
    data: &[u8],
) -> Result<(), TransportError> {
    let max = piece_len(t);
    if data.len() <= max {
        return t.write_range(addr, data);
    }
    for (i, piece) in data.chunks(max).enumerate() {
        let at = addr
            .checked_add((i * max) as u64)
            .ok_or_else(|| overflow(TransportOp::Write, addr, data.len()))?;
        t.write_range(at, piece)?;
    }
    Ok(())
}

/// Cloneable handle serializing access to one transport connection
///
/// Each `read_range` / `write_range` takes the lock, issues the request,
/// waits for the matching response and releases the lock, so concurrent
/// callers can never have their responses misattributed.
pub struct SharedTransport<T> {
    inner: Arc<Mutex<T>>,
}

impl<T> SharedTransport<T> {
    /// Wrap a transport for shared use
    pub fn new(transport: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(transport)),
        }
    }

    /// Recover the transport once every other handle has been dropped
    pub fn into_inner(self) -> Option<T> {
        Arc::try_unwrap(self.inner)
            .ok()
            .and_then(|m| m.into_inner().ok())
    }
}

impl<T> Clone for SharedTransport<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn poisoned(op: TransportOp, addr: u64, len: usize) -> TransportError {
    TransportError {
        op,
        addr,
        len,
        kind: TransportErrorKind::Io("transport lock poisoned".into()),
    }
}

impl<T: MemoryTransport> MemoryTransport for SharedTransport<T> {
    fn read_range(&mut self, addr: u64, len: u32) -> Result<Vec<u8>, TransportError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| poisoned(TransportOp::Read, addr, len as usize))?;
        guard.read_range(addr, len)
    }

    fn write_range(&mut self, addr: u64, data: &[u8]) -> Result<(), TransportError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| poisoned(TransportOp::Write, addr, data.len()))?;
        guard.write_range(addr, data)
    }

    fn max_transaction_len(&self) -> usize {
        self.inner
            .lock()
            .map(|t| t.max_transaction_len())
            .unwrap_or(DEFAULT_MAX_TRANSACTION_LEN)
    }

    fn supports_range_reads(&self) -> bool {
        self.inner
            .lock()
            .map(|t| t.supports_range_reads())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemTransport;
    use std::thread;

    #[test]
    fn test_wide_ranges_split_at_cap() {
        let mut t = MemTransport::new().with_max_len(64);
        let data: Vec<u8> = (0..150u8).collect();
        write_split(&mut t, 0x100, &data).unwrap();
        assert_eq!(read_split(&mut t, 0x100, 150).unwrap(), data);

        assert_eq!(
            t.log().to_vec(),
            vec![
                (TransportOp::Write, 0x100, 64),
                (TransportOp::Write, 0x140, 64),
                (TransportOp::Write, 0x180, 22),
                (TransportOp::Read, 0x100, 64),
                (TransportOp::Read, 0x140, 64),
                (TransportOp::Read, 0x180, 22),
            ]
        );
    }

    #[test]
    fn test_short_range_is_one_transaction() {
        let mut t = MemTransport::new().with_max_len(64);
        read_split(&mut t, 0x0, 64).unwrap();
        write_split(&mut t, 0x0, &[0u8; 4]).unwrap();
        assert_eq!(t.reads(), 1);
        assert_eq!(t.writes(), 1);
    }

    #[test]
    fn test_shared_transport_serializes_threads() {
        let shared = SharedTransport::new(MemTransport::new());

        let handles: Vec<_> = (0..4u64)
            .map(|i| {
                let mut t = shared.clone();
                thread::spawn(move || {
                    for j in 0..16u64 {
                        let addr = i * 0x100 + j * 4;
                        t.write_range(addr, &(j as u32).to_le_bytes()).unwrap();
                        let back = t.read_range(addr, 4).unwrap();
                        assert_eq!(back, (j as u32).to_le_bytes());
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        let inner = shared.into_inner().unwrap();
        assert_eq!(inner.writes(), 64);
    }
}
