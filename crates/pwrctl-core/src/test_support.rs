//! In-memory transport used by the unit tests

use std::collections::{BTreeMap, HashSet};

use crate::error::{TransportError, TransportErrorKind, TransportOp};
use crate::transport::MemoryTransport;

/// Sparse byte memory with call accounting and failure injection
#[derive(Debug, Default)]
pub struct MemTransport {
    mem: BTreeMap<u64, u8>,
    log: Vec<(TransportOp, u64, usize)>,
    fail_reads: HashSet<u64>,
    fail_writes: HashSet<u64>,
    range_reads: bool,
    max_len: usize,
}

impl MemTransport {
    pub fn new() -> Self {
        Self {
            range_reads: true,
            max_len: 4096,
            ..Default::default()
        }
    }

    /// Transport that only serves one register per call
    pub fn without_range_reads() -> Self {
        Self {
            range_reads: false,
            ..Self::new()
        }
    }

    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    pub fn poke(&mut self, addr: u64, bytes: &[u8]) {
        for (i, b) in bytes.iter().enumerate() {
            self.mem.insert(addr + i as u64, *b);
        }
    }

    pub fn poke_u32(&mut self, addr: u64, value: u32) {
        self.poke(addr, &value.to_le_bytes());
    }

    pub fn peek(&self, addr: u64, len: usize) -> Vec<u8> {
        (0..len as u64)
            .map(|i| self.mem.get(&(addr + i)).copied().unwrap_or(0))
            .collect()
    }

    pub fn peek_u32(&self, addr: u64) -> u32 {
        let b = self.peek(addr, 4);
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    /// Fail any read whose range contains `addr`
    pub fn fail_read_at(&mut self, addr: u64) {
        self.fail_reads.insert(addr);
    }

    /// Fail any write whose range contains `addr`
    pub fn fail_write_at(&mut self, addr: u64) {
        self.fail_writes.insert(addr);
    }

    pub fn reads(&self) -> usize {
        self.log.iter().filter(|(op, _, _)| *op == TransportOp::Read).count()
    }

    pub fn writes(&self) -> usize {
        self.log.iter().filter(|(op, _, _)| *op == TransportOp::Write).count()
    }

    pub fn log(&self) -> &[(TransportOp, u64, usize)] {
        &self.log
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    fn hits(set: &HashSet<u64>, addr: u64, len: usize) -> bool {
        set.iter().any(|&a| a >= addr && a < addr + len as u64)
    }
}

impl MemoryTransport for MemTransport {
    fn read_range(&mut self, addr: u64, len: u32) -> Result<Vec<u8>, TransportError> {
        self.log.push((TransportOp::Read, addr, len as usize));
        if len as usize > self.max_len {
            return Err(TransportError::read(addr, len as usize, TransportErrorKind::Rejected));
        }
        if Self::hits(&self.fail_reads, addr, len as usize) {
            return Err(TransportError::read(addr, len as usize, TransportErrorKind::Timeout));
        }
        Ok(self.peek(addr, len as usize))
    }

    fn write_range(&mut self, addr: u64, data: &[u8]) -> Result<(), TransportError> {
        self.log.push((TransportOp::Write, addr, data.len()));
        if data.len() > self.max_len {
            return Err(TransportError::write(addr, data.len(), TransportErrorKind::Rejected));
        }
        if Self::hits(&self.fail_writes, addr, data.len()) {
            return Err(TransportError::write(addr, data.len(), TransportErrorKind::Rejected));
        }
        self.poke(addr, data);
        Ok(())
    }

    fn max_transaction_len(&self) -> usize {
        self.max_len
    }

    fn supports_range_reads(&self) -> bool {
        self.range_reads
    }
}
