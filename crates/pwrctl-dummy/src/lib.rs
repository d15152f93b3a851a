//! pwrctl-dummy - Simulated power-control board for testing
//!
//! This crate provides an in-memory board that speaks the memory transport
//! contract. It models the parts of the hardware the update flow and the
//! bulk reads depend on:
//!
//! - the AxiVersion identity block, which swaps to the next firmware
//!   version when a reload completes
//! - the PROM controller lock, erase, chunk staging, commit and finalize
//!   sequence, including `PROG_DONE`
//! - the ADC sampling triggers of the external monitors
//! - the post-reload window during which the board does not answer
//!
//! Time is simulated with [`SimClock`]; hand a clone to the update
//! orchestrator so its settle waits advance the board's clock.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use pwrctl_core::board::{self, PROM_PATH, VERSION_PATH};
use pwrctl_core::devices::axi_version::BUILD_STAMP_LEN;
use pwrctl_core::devices::prom::PromStatus;
use pwrctl_core::update::Clock;
use pwrctl_core::{
    BoardConfig, DeviceTree, MemoryTransport, Node, Result, TransportError, TransportErrorKind,
};

/// Configuration for the simulated board
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// FpgaVersion before any reload
    pub fpga_version: u32,
    /// FpgaVersion after a reload
    pub next_version: u32,
    /// BuildStamp before any reload
    pub build_stamp: String,
    /// BuildStamp after a reload
    pub next_build_stamp: String,
    /// DeviceDna
    pub device_dna: u64,
    /// Token that unlocks the PROM controller
    pub unlock_token: u32,
    /// How long the board stays silent after a reload
    pub downtime: Duration,
    /// Whether finalize reports success
    pub prog_done: bool,
    /// Reject the staging write of this chunk (0-based)
    pub fail_chunk: Option<usize>,
    /// Whether range reads are served
    pub range_reads: bool,
    /// Largest transaction accepted
    pub max_transaction_len: usize,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            fpga_version: 0x0001_0203,
            next_version: 0x0001_0204,
            build_stamp: "LsstPwrCtrl: dummy build 1".into(),
            next_build_stamp: "LsstPwrCtrl: dummy build 2".into(),
            device_dna: 0x0123_4567_89AB_CDEF,
            unlock_token: 0xDEAD_BEEF,
            downtime: Duration::from_secs(8),
            prog_done: true,
            fail_chunk: None,
            range_reads: true,
            max_transaction_len: 4096,
        }
    }
}

/// Shared simulated time
///
/// Clones share the same time base. A manual clock only moves when slept
/// on or advanced; a wall clock follows real time.
#[derive(Debug, Clone)]
pub struct SimClock {
    source: Source,
}

#[derive(Debug, Clone)]
enum Source {
    Manual(Arc<Mutex<Duration>>),
    Wall(Instant),
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SimClock {
    /// Manual clock starting at zero
    pub fn new() -> Self {
        Self {
            source: Source::Manual(Arc::new(Mutex::new(Duration::ZERO))),
        }
    }

    /// Clock following real time, for interactive use
    pub fn wall() -> Self {
        Self {
            source: Source::Wall(Instant::now()),
        }
    }

    /// Time since the clock was created
    pub fn now(&self) -> Duration {
        match &self.source {
            Source::Manual(t) => t.lock().map(|t| *t).unwrap_or_default(),
            Source::Wall(start) => start.elapsed(),
        }
    }

    /// Move time forward
    pub fn advance(&self, by: Duration) {
        match &self.source {
            Source::Manual(t) => {
                if let Ok(mut t) = t.lock() {
                    *t += by;
                }
            }
            Source::Wall(_) => std::thread::sleep(by),
        }
    }
}

impl Clock for SimClock {
    fn sleep(&self, duration: Duration) {
        log::trace!("SimClock: sleep {:?}", duration);
        self.advance(duration);
    }
}

/// Absolute addresses the model reacts to
#[derive(Debug, Clone)]
struct Map {
    fpga_version: u64,
    up_time: u64,
    reload: u64,
    dna: u64,
    build_stamp: u64,
    password: u64,
    status: u64,
    program_address: u64,
    program_length: u64,
    erase: u64,
    commit: u64,
    finalize: u64,
    image_size: u64,
    buffer: u64,
    buffer_len: u64,
    triggers: Vec<u64>,
}

impl Map {
    fn resolve(tree: &DeviceTree) -> Result<Self> {
        let version = |name: &str| {
            tree.resolve(&format!("{}.{}", VERSION_PATH, name))
                .map(|l| l.address)
        };
        let prom = |name: &str| {
            tree.resolve(&format!("{}.{}", PROM_PATH, name))
                .map(|l| l.address)
        };
        let buffer = tree.resolve(&format!("{}.ProgramBuffer", PROM_PATH))?;

        let mut triggers = Vec::new();
        tree.walk(|_, _, node| {
            if let Node::Device(dev) = node {
                if let Some(hook) = dev.pre_read() {
                    triggers.push(hook.register().address());
                }
            }
        });

        Ok(Self {
            fpga_version: version("FpgaVersion")?,
            up_time: version("UpTimeCnt")?,
            reload: version("FpgaReload")?,
            dna: version("DeviceDna")?,
            build_stamp: version("BuildStamp")?,
            password: prom("PasswordLock")?,
            status: prom("Status")?,
            program_address: prom("ProgramAddress")?,
            program_length: prom("ProgramLength")?,
            erase: prom("Erase")?,
            commit: prom("Commit")?,
            finalize: prom("Finalize")?,
            image_size: prom("ImageSize")?,
            buffer: buffer.address,
            buffer_len: buffer.byte_width as u64,
            triggers,
        })
    }
}

/// PROM controller model
#[derive(Debug)]
struct Prom {
    unlocked: bool,
    erased: bool,
    status: PromStatus,
    image: Vec<u8>,
    staged: usize,
    committed: Vec<u32>,
}

impl Default for Prom {
    fn default() -> Self {
        Self {
            unlocked: false,
            erased: false,
            status: PromStatus::LOCKED,
            image: Vec::new(),
            staged: 0,
            committed: Vec::new(),
        }
    }
}

/// Call accounting
#[derive(Debug, Clone, Default)]
pub struct BoardStats {
    /// Range reads served or refused
    pub reads: usize,
    /// Range writes acknowledged or refused
    pub writes: usize,
    /// Reload commands received
    pub reloads: usize,
    /// ADC sampling triggers received
    pub adc_triggers: usize,
    /// Erase commands received
    pub erases: usize,
    /// Transactions refused while the board was rebooting
    pub unreachable: usize,
}

/// The simulated board
pub struct SimulatedBoard {
    config: DummyConfig,
    clock: SimClock,
    map: Map,
    mem: BTreeMap<u64, u8>,
    prom: Prom,
    stats: BoardStats,
    boot_time: Duration,
    reload_at: Option<Duration>,
}

impl SimulatedBoard {
    /// Board answering at the addresses of `tree`
    pub fn new(config: DummyConfig, tree: &DeviceTree, clock: SimClock) -> Result<Self> {
        let map = Map::resolve(tree)?;
        let boot_time = clock.now();
        let mut board = Self {
            config,
            clock,
            map,
            mem: BTreeMap::new(),
            prom: Prom::default(),
            stats: BoardStats::default(),
            boot_time,
            reload_at: None,
        };
        let (version, stamp) = (board.config.fpga_version, board.config.build_stamp.clone());
        board.load_identity(version, &stamp);
        log::debug!("Simulated board up, FpgaVersion 0x{:08X}", version);
        Ok(board)
    }

    /// Board laid out like the stock register map
    pub fn stock(config: DummyConfig) -> Result<Self> {
        let tree = board::build_tree(&BoardConfig::default())?;
        Self::new(config, &tree, SimClock::new())
    }

    /// Handle on the board's clock
    pub fn clock(&self) -> SimClock {
        self.clock.clone()
    }

    /// Call accounting so far
    pub fn stats(&self) -> &BoardStats {
        &self.stats
    }

    /// Bytes committed to the PROM
    pub fn prom_image(&self) -> &[u8] {
        &self.prom.image
    }

    /// PROM addresses of the committed chunks, in order
    pub fn committed_chunks(&self) -> &[u32] {
        &self.prom.committed
    }

    /// Current FpgaVersion as the board would report it
    pub fn fpga_version(&self) -> u32 {
        self.peek_u32(self.map.fpga_version)
    }

    /// Store bytes directly, bypassing the model
    pub fn poke(&mut self, addr: u64, bytes: &[u8]) {
        for (i, b) in bytes.iter().enumerate() {
            self.mem.insert(addr + i as u64, *b);
        }
    }

    /// Load bytes directly, bypassing the model
    pub fn peek(&self, addr: u64, len: usize) -> Vec<u8> {
        (0..len as u64)
            .map(|i| self.mem.get(&(addr + i)).copied().unwrap_or(0))
            .collect()
    }

    fn peek_u32(&self, addr: u64) -> u32 {
        let b = self.peek(addr, 4);
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    fn poke_u32(&mut self, addr: u64, value: u32) {
        self.poke(addr, &value.to_le_bytes());
    }

    fn load_identity(&mut self, version: u32, stamp: &str) {
        self.poke_u32(self.map.fpga_version, version);
        let dna = self.config.device_dna.to_le_bytes();
        self.poke(self.map.dna, &dna);
        let mut bytes = vec![0u8; BUILD_STAMP_LEN as usize];
        let n = stamp.len().min(bytes.len());
        bytes[..n].copy_from_slice(&stamp.as_bytes()[..n]);
        self.poke(self.map.build_stamp, &bytes);
        self.boot_time = self.clock.now();
    }

    /// Refuse the transaction while rebooting; finish the reboot once the
    /// downtime has passed
    fn check_reachable(&mut self) -> bool {
        let Some(at) = self.reload_at else {
            return true;
        };
        if self.clock.now() < at + self.config.downtime {
            self.stats.unreachable += 1;
            return false;
        }

        self.reload_at = None;
        let (version, stamp) = (self.config.next_version, self.config.next_build_stamp.clone());
        self.load_identity(version, &stamp);
        self.prom = Prom {
            image: std::mem::take(&mut self.prom.image),
            committed: std::mem::take(&mut self.prom.committed),
            ..Prom::default()
        };
        log::debug!("Simulated board rebooted into 0x{:08X}", version);
        true
    }

    fn refresh(&mut self) {
        let up = self.clock.now().saturating_sub(self.boot_time).as_secs() as u32;
        self.poke_u32(self.map.up_time, up);
        self.poke_u32(self.map.status, self.prom.status.bits());
    }

    fn in_buffer(&self, addr: u64) -> bool {
        addr >= self.map.buffer && addr < self.map.buffer + self.map.buffer_len
    }

    fn on_write(&mut self, addr: u64, value: u32) {
        let map = &self.map;
        if addr == map.password {
            self.prom.unlocked = value == self.config.unlock_token;
            self.prom.status.set(PromStatus::LOCKED, !self.prom.unlocked);
        } else if addr == map.erase && value & 1 != 0 {
            self.stats.erases += 1;
            if self.prom.unlocked {
                self.prom.erased = true;
                self.prom.image.clear();
                self.prom.committed.clear();
                self.prom.status.remove(PromStatus::PROG_DONE | PromStatus::PROG_ERROR);
            } else {
                self.prom.status.insert(PromStatus::PROG_ERROR);
            }
        } else if addr == map.commit && value & 1 != 0 {
            self.commit();
        } else if addr == map.finalize && value & 1 != 0 {
            let size = self.peek_u32(self.map.image_size) as usize;
            let complete = self.prom.erased && self.prom.image.len() == size;
            if self.config.prog_done && complete && !self.prom.status.contains(PromStatus::PROG_ERROR) {
                self.prom.status.insert(PromStatus::PROG_DONE);
            }
        } else if addr == map.reload && value & 1 != 0 {
            self.stats.reloads += 1;
            self.reload_at = Some(self.clock.now());
            log::debug!("Simulated board reloading");
        } else if map.triggers.contains(&addr) && value & 1 != 0 {
            self.stats.adc_triggers += 1;
        }
    }

    fn commit(&mut self) {
        if !self.prom.unlocked || !self.prom.erased {
            self.prom.status.insert(PromStatus::PROG_ERROR);
            return;
        }
        let offset = self.peek_u32(self.map.program_address);
        let len = (self.peek_u32(self.map.program_length) & 0x1FF) as usize;
        let data = self.peek(self.map.buffer, len);

        let start = offset as usize;
        if self.prom.image.len() < start + len {
            self.prom.image.resize(start + len, 0xFF);
        }
        self.prom.image[start..start + len].copy_from_slice(&data);
        self.prom.committed.push(offset);
    }
}

impl MemoryTransport for SimulatedBoard {
    fn read_range(&mut self, addr: u64, len: u32) -> core::result::Result<Vec<u8>, TransportError> {
        self.stats.reads += 1;
        if !self.check_reachable() {
            return Err(TransportError::read(addr, len as usize, TransportErrorKind::Unreachable));
        }
        if len as usize > self.config.max_transaction_len {
            return Err(TransportError::read(addr, len as usize, TransportErrorKind::Rejected));
        }
        self.refresh();
        Ok(self.peek(addr, len as usize))
    }

    fn write_range(&mut self, addr: u64, data: &[u8]) -> core::result::Result<(), TransportError> {
        self.stats.writes += 1;
        if !self.check_reachable() {
            return Err(TransportError::write(addr, data.len(), TransportErrorKind::Unreachable));
        }
        if data.len() > self.config.max_transaction_len {
            return Err(TransportError::write(addr, data.len(), TransportErrorKind::Rejected));
        }

        // A chunk may arrive in several pieces; it starts at the buffer base
        if addr == self.map.buffer {
            self.prom.staged += 1;
        }
        if self.in_buffer(addr) {
            let chunk = self.prom.staged.saturating_sub(1);
            if self.config.fail_chunk == Some(chunk) {
                log::debug!("Simulated board rejecting chunk {}", chunk);
                return Err(TransportError::write(addr, data.len(), TransportErrorKind::Rejected));
            }
        }

        self.poke(addr, data);
        let mut word = [0u8; 4];
        let n = data.len().min(4);
        word[..n].copy_from_slice(&data[..n]);
        self.on_write(addr, u32::from_le_bytes(word));
        Ok(())
    }

    fn max_transaction_len(&self) -> usize {
        self.config.max_transaction_len
    }

    fn supports_range_reads(&self) -> bool {
        self.config.range_reads
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pwrctl_core::config::{Ltc2945Config, Ltc2945Layout};
    use pwrctl_core::update::{NoProgress, UpdateOptions, UpdateState};
    use pwrctl_core::{Error, FirmwareImage, FirmwareUpdate, Session};

    fn image(len: usize) -> FirmwareImage {
        FirmwareImage::from_bytes((0..len).map(|i| (i * 7 % 251) as u8).collect::<Vec<_>>())
    }

    fn open(config: DummyConfig) -> (Session<SimulatedBoard>, SimClock) {
        let tree = board::build_tree(&BoardConfig::default()).unwrap();
        let clock = SimClock::new();
        let board = SimulatedBoard::new(config, &tree, clock.clone()).unwrap();
        (Session::open("dummy", board, tree), clock)
    }

    #[test]
    fn test_update_end_to_end() {
        let (mut session, clock) = open(DummyConfig::default());
        let mut update = FirmwareUpdate::with_clock(UpdateOptions::default(), clock.clone());
        let image = image(1000);

        let report = update.run(&mut session, &image, &mut NoProgress).unwrap();

        assert_eq!(report.old.fpga_version, 0x0001_0203);
        assert_eq!(report.new.fpga_version, 0x0001_0204);
        assert!(report.version_changed());
        assert_eq!(report.old.build_stamp, "LsstPwrCtrl: dummy build 1");
        assert_eq!(report.new.build_stamp, "LsstPwrCtrl: dummy build 2");
        assert_eq!(report.chunks, 4);
        assert_eq!(update.state(), UpdateState::Done);
        assert_eq!(clock.now(), Duration::from_secs(10));

        let board = session.close();
        assert_eq!(board.stats().reloads, 1);
        assert_eq!(board.stats().unreachable, 0);
        assert_eq!(board.prom_image(), image.as_bytes());
        assert_eq!(board.committed_chunks(), &[0, 256, 512, 768]);
    }

    #[test]
    fn test_missing_prog_done_never_reloads() {
        let (mut session, clock) = open(DummyConfig {
            prog_done: false,
            ..DummyConfig::default()
        });
        let mut update = FirmwareUpdate::with_clock(UpdateOptions::default(), clock);

        let failure = update
            .run(&mut session, &image(512), &mut NoProgress)
            .unwrap_err();
        assert_eq!(failure.state, UpdateState::Programming);
        assert!(matches!(failure.error, Error::ProgramIncomplete));
        assert_eq!(
            failure.old_identity.map(|id| id.fpga_version),
            Some(0x0001_0203)
        );

        let board = session.close();
        assert_eq!(board.stats().reloads, 0);
        assert_eq!(board.fpga_version(), 0x0001_0203);
    }

    #[test]
    fn test_chunk_failure_stops_streaming() {
        let (mut session, clock) = open(DummyConfig {
            fail_chunk: Some(2),
            ..DummyConfig::default()
        });
        let mut update = FirmwareUpdate::with_clock(UpdateOptions::default(), clock);

        let failure = update
            .run(&mut session, &image(1200), &mut NoProgress)
            .unwrap_err();
        assert_eq!(failure.state, UpdateState::Programming);
        assert_eq!(failure.chunk_offset, Some(512));
        assert!(failure.error.transport().is_some());

        let board = session.close();
        assert_eq!(board.committed_chunks(), &[0, 256]);
        assert_eq!(board.stats().reloads, 0);
    }

    #[test]
    fn test_unreachable_during_settle_is_retried() {
        let (mut session, clock) = open(DummyConfig {
            downtime: Duration::from_secs(12),
            ..DummyConfig::default()
        });
        let mut update = FirmwareUpdate::with_clock(UpdateOptions::default(), clock.clone());

        let report = update.run(&mut session, &image(300), &mut NoProgress).unwrap();
        assert_eq!(report.new.fpga_version, 0x0001_0204);
        // 10 s settle plus two 1 s retries
        assert_eq!(clock.now(), Duration::from_secs(12));
        assert_eq!(session.close().stats().unreachable, 2);
    }

    #[test]
    fn test_board_never_returns() {
        let (mut session, clock) = open(DummyConfig {
            downtime: Duration::from_secs(60),
            ..DummyConfig::default()
        });
        let mut update = FirmwareUpdate::with_clock(UpdateOptions::default(), clock);

        let failure = update
            .run(&mut session, &image(300), &mut NoProgress)
            .unwrap_err();
        assert_eq!(failure.state, UpdateState::ReadingNewIdentity);
        assert!(failure.old_identity.is_some());
        assert!(update.reload_acknowledged());
        assert!(failure.error.transport().is_some());
    }

    #[test]
    fn test_wrong_unlock_token() {
        let (mut session, clock) = open(DummyConfig::default());
        let options = UpdateOptions {
            unlock_token: 0x1234_5678,
            ..UpdateOptions::default()
        };
        let mut update = FirmwareUpdate::with_clock(options, clock);

        let failure = update
            .run(&mut session, &image(256), &mut NoProgress)
            .unwrap_err();
        assert!(matches!(failure.error, Error::ProgramIncomplete));
        assert!(session.close().prom_image().is_empty());
    }

    #[test]
    fn test_read_all_triggers_each_monitor_once() {
        let mut config = BoardConfig::default();
        for (i, layout) in [Ltc2945Layout::Word, Ltc2945Layout::Byte].into_iter().enumerate() {
            config.ltc2945.push(Ltc2945Config {
                name: format!("Ltc{}", i),
                offset: 0x30_0000 + i as u64 * 0x1000,
                shunt: 0.01,
                layout,
            });
        }
        let tree = board::build_tree(&config).unwrap();
        let board = SimulatedBoard::new(DummyConfig::default(), &tree, SimClock::new()).unwrap();
        let mut session = Session::open("dummy", board, tree);

        session.read_all().unwrap();
        session.read_all().unwrap();

        // Only the word layout has a trigger
        assert_eq!(session.close().stats().adc_triggers, 2);
    }

    #[test]
    fn test_capped_board_reads_and_updates() {
        let (mut session, clock) = open(DummyConfig {
            max_transaction_len: 128,
            ..DummyConfig::default()
        });
        let snap = session.read_all().unwrap();
        assert_eq!(
            snap.get("Core.AxiVersion.BuildStamp").and_then(|v| v.as_str()),
            Some("LsstPwrCtrl: dummy build 1")
        );

        let mut update = FirmwareUpdate::with_clock(UpdateOptions::default(), clock);
        let image = image(600);
        let report = update.run(&mut session, &image, &mut NoProgress).unwrap();
        assert_eq!(report.new.fpga_version, 0x0001_0204);
        assert_eq!(report.chunks, 3);

        let board = session.close();
        assert_eq!(board.prom_image(), image.as_bytes());
        assert_eq!(board.committed_chunks(), &[0, 256, 512]);
    }

    #[test]
    fn test_capped_board_chunk_failure_offset() {
        let (mut session, clock) = open(DummyConfig {
            max_transaction_len: 128,
            fail_chunk: Some(1),
            ..DummyConfig::default()
        });
        let mut update = FirmwareUpdate::with_clock(UpdateOptions::default(), clock);

        let failure = update
            .run(&mut session, &image(600), &mut NoProgress)
            .unwrap_err();
        assert_eq!(failure.chunk_offset, Some(256));
        assert_eq!(session.close().committed_chunks(), &[0]);
    }

    #[test]
    fn test_stock_identity_reads() {
        let (mut session, _) = open(DummyConfig::default());
        let snap = session.read_all().unwrap();
        assert_eq!(
            snap.get("Core.AxiVersion.FpgaVersion").and_then(|v| v.as_u64()),
            Some(0x0001_0203)
        );
        assert_eq!(
            snap.get("Core.AxiVersion.BuildStamp").and_then(|v| v.as_str()),
            Some("LsstPwrCtrl: dummy build 1")
        );
        assert!(snap.get("Core.AxiMicronN25Q.Status").is_some());
    }
}
