//! Firmware update orchestration
//!
//! ```text
//! Idle -> Unlocking -> ReadingOldIdentity -> Programming
//!      -> AwaitingReload -> ReadingNewIdentity -> Done
//! ```
//!
//! Any step may end in `Failed`. The failure keeps the state it happened in,
//! the identity read so far and, for programming failures, the offset of the
//! chunk that failed. Programming is never resumed part way: a retry starts
//! again from offset 0.
//!
//! After the reload command the board drops off the link for a while. The
//! orchestrator sleeps for the settle time and then retries the identity read
//! on transport errors only; this is the one place an I/O failure is expected.

use core::fmt;
use std::time::Duration;

use crate::address;
use crate::board::{PROM_PATH, VERSION_PATH};
use crate::config::UpdateSection;
use crate::devices::axi_version::Identity;
use crate::devices::prom::PromController;
use crate::error::{Error, Result};
use crate::image::FirmwareImage;
use crate::session::Session;
use crate::transport::MemoryTransport;
use crate::tree::DeviceTree;

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    /// Nothing done yet
    Idle,
    /// Writing the unlock token
    Unlocking,
    /// Capturing the running firmware's identity
    ReadingOldIdentity,
    /// Erasing and streaming the image
    Programming,
    /// Reload issued, waiting for the board to come back
    AwaitingReload,
    /// Capturing the new firmware's identity
    ReadingNewIdentity,
    /// Finished
    Done,
    /// Aborted
    Failed,
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UpdateState::Idle => "Idle",
            UpdateState::Unlocking => "Unlocking",
            UpdateState::ReadingOldIdentity => "ReadingOldIdentity",
            UpdateState::Programming => "Programming",
            UpdateState::AwaitingReload => "AwaitingReload",
            UpdateState::ReadingNewIdentity => "ReadingNewIdentity",
            UpdateState::Done => "Done",
            UpdateState::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Outcome of the programming step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramResult {
    /// Not finished
    Pending,
    /// The controller reported completion
    Success,
    /// Programming failed or was not confirmed
    Failure,
}

/// Tunables of an update run
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOptions {
    /// Value written to the PROM lock register
    pub unlock_token: u32,
    /// Bytes per program chunk
    pub chunk_size: u32,
    /// Wait after the reload command
    pub settle: Duration,
    /// Identity read attempts after the settle wait
    pub reconnect_attempts: u32,
    /// Wait between identity read attempts
    pub reconnect_interval: Duration,
    /// Full programming attempts
    pub program_attempts: u32,
    /// Token posted to ScratchPad before unlocking
    pub link_token: Option<u32>,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self::from(&UpdateSection::default())
    }
}

impl From<&UpdateSection> for UpdateOptions {
    fn from(s: &UpdateSection) -> Self {
        let secs = |v: f64| Duration::try_from_secs_f64(v).unwrap_or_default();
        Self {
            unlock_token: s.unlock_token,
            chunk_size: s.chunk_size,
            settle: secs(s.settle_secs),
            reconnect_attempts: s.reconnect_attempts.max(1),
            reconnect_interval: secs(s.reconnect_interval_secs),
            program_attempts: s.program_attempts.max(1),
            link_token: s.post_link_token.then_some(s.link_token),
        }
    }
}

/// Tree paths of the blocks the update drives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateTargets {
    /// AxiVersion block
    pub version: String,
    /// PROM controller block
    pub prom: String,
}

impl Default for UpdateTargets {
    fn default() -> Self {
        Self {
            version: VERSION_PATH.into(),
            prom: PROM_PATH.into(),
        }
    }
}

/// Time source for the settle and reconnect waits
pub trait Clock {
    /// Block for `duration`
    fn sleep(&self, duration: Duration);
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

/// Progress callbacks; every method defaults to doing nothing
pub trait UpdateProgress {
    /// The orchestrator entered `state`
    fn state_changed(&mut self, _state: UpdateState) {}

    /// Programming of `total` bytes is starting
    fn programming_started(&mut self, _total: u64) {}

    /// `done` bytes have been committed
    fn programmed(&mut self, _done: u64) {}

    /// All chunks were committed
    fn programming_finished(&mut self) {}

    /// The reload was issued and the settle wait begins
    fn reload_wait(&mut self, _settle: Duration) {}

    /// An identity read after the reload failed and will be retried
    fn reconnect_retry(&mut self, _attempt: u32, _error: &Error) {}
}

/// Progress sink that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl UpdateProgress for NoProgress {}

/// Result of a completed update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateReport {
    /// Identity before programming
    pub old: Identity,
    /// Identity after the reload
    pub new: Identity,
    /// Bytes committed to the PROM
    pub bytes_programmed: u64,
    /// Chunks committed
    pub chunks: usize,
}

impl UpdateReport {
    /// Whether the reported firmware version changed
    pub fn version_changed(&self) -> bool {
        self.old.fpga_version != self.new.fpga_version
    }
}

/// A failed update
#[derive(Debug, thiserror::Error)]
#[error("firmware update failed in {state}{}: {error}", chunk_suffix(.chunk_offset))]
pub struct UpdateFailure {
    /// State the failure happened in
    pub state: UpdateState,
    /// Identity captured before the failure, if any
    pub old_identity: Option<Identity>,
    /// Offset of the failing chunk, for programming failures
    pub chunk_offset: Option<u32>,
    /// Underlying error
    #[source]
    pub error: Error,
}

fn chunk_suffix(offset: &Option<u32>) -> String {
    offset
        .map(|o| format!(" (chunk at 0x{:08X})", o))
        .unwrap_or_default()
}

/// Failure inside a step, before the state is attached
struct Abort {
    error: Error,
    chunk_offset: Option<u32>,
}

impl From<Error> for Abort {
    fn from(error: Error) -> Self {
        Self {
            error,
            chunk_offset: None,
        }
    }
}

/// The update state machine
pub struct FirmwareUpdate<C: Clock = SystemClock> {
    options: UpdateOptions,
    targets: UpdateTargets,
    clock: C,
    state: UpdateState,
    unlocked: bool,
    program_result: ProgramResult,
    reload_acknowledged: bool,
    old_identity: Option<Identity>,
}

impl FirmwareUpdate<SystemClock> {
    /// Orchestrator using the wall clock and the stock block paths
    pub fn new(options: UpdateOptions) -> Self {
        Self::with_clock(options, SystemClock)
    }
}

impl<C: Clock> FirmwareUpdate<C> {
    /// Orchestrator using `clock` for its waits
    pub fn with_clock(options: UpdateOptions, clock: C) -> Self {
        Self {
            options,
            targets: UpdateTargets::default(),
            clock,
            state: UpdateState::Idle,
            unlocked: false,
            program_result: ProgramResult::Pending,
            reload_acknowledged: false,
            old_identity: None,
        }
    }

    /// Drive blocks at other paths
    pub fn targets(mut self, targets: UpdateTargets) -> Self {
        self.targets = targets;
        self
    }

    /// Current state
    pub fn state(&self) -> UpdateState {
        self.state
    }

    /// Whether the unlock token was acknowledged
    pub fn unlocked(&self) -> bool {
        self.unlocked
    }

    /// Outcome of the programming step
    pub fn program_result(&self) -> ProgramResult {
        self.program_result
    }

    /// Whether the reload command was acknowledged
    pub fn reload_acknowledged(&self) -> bool {
        self.reload_acknowledged
    }

    fn transition(&mut self, next: UpdateState, progress: &mut dyn UpdateProgress) {
        log::info!("Update: {} -> {}", self.state, next);
        self.state = next;
        progress.state_changed(next);
    }

    /// Program `image`, reload and compare identities
    pub fn run<T: MemoryTransport>(
        &mut self,
        session: &mut Session<T>,
        image: &FirmwareImage,
        progress: &mut dyn UpdateProgress,
    ) -> core::result::Result<UpdateReport, UpdateFailure> {
        self.state = UpdateState::Idle;
        self.unlocked = false;
        self.program_result = ProgramResult::Pending;
        self.reload_acknowledged = false;
        self.old_identity = None;

        let (tree, t) = session.split();
        match self.execute(tree, t, image, progress) {
            Ok(report) => {
                self.transition(UpdateState::Done, progress);
                Ok(report)
            }
            Err(abort) => {
                let state = self.state;
                log::error!("Update failed in {}: {}", state, abort.error);
                if self.state == UpdateState::Programming {
                    self.program_result = ProgramResult::Failure;
                }
                self.transition(UpdateState::Failed, progress);
                Err(UpdateFailure {
                    state,
                    old_identity: self.old_identity.clone(),
                    chunk_offset: abort.chunk_offset,
                    error: abort.error,
                })
            }
        }
    }

    fn execute<T: MemoryTransport>(
        &mut self,
        tree: &DeviceTree,
        t: &mut T,
        image: &FirmwareImage,
        progress: &mut dyn UpdateProgress,
    ) -> core::result::Result<UpdateReport, Abort> {
        let image_len = u32::try_from(image.len()).map_err(|_| Error::Unsupported {
            name: "image".into(),
            reason: "image exceeds the 32-bit PROM address range",
        })?;
        if image_len == 0 {
            return Err(Error::Unsupported {
                name: "image".into(),
                reason: "image is empty",
            }
            .into());
        }
        let prom = PromController::new(tree, self.targets.prom.as_str())?;
        let version = self.targets.version.clone();
        let reload = tree.command(&address::join(&version, "FpgaReload"))?;

        if let Some(token) = self.options.link_token {
            log::debug!("Posting link token 0x{:X}", token);
            tree.register(&address::join(&version, "ScratchPad"))?
                .post_raw(t, token as u64)?;
        }

        self.transition(UpdateState::Unlocking, progress);
        prom.unlock(t, self.options.unlock_token)?;
        self.unlocked = true;

        self.transition(UpdateState::ReadingOldIdentity, progress);
        let old = Identity::read(tree, &version, t)?;
        log::info!("Running firmware:\n{}", old);
        self.old_identity = Some(old.clone());

        self.transition(UpdateState::Programming, progress);
        let mut attempt = 1;
        let (bytes_programmed, chunks) = loop {
            match self.program(&prom, t, image, image_len, progress) {
                Ok(done) => break done,
                Err(abort) if attempt < self.options.program_attempts => {
                    log::warn!(
                        "Programming attempt {} failed: {}; restarting from offset 0",
                        attempt,
                        abort.error
                    );
                    attempt += 1;
                }
                Err(abort) => return Err(abort),
            }
        };
        self.program_result = ProgramResult::Success;

        self.transition(UpdateState::AwaitingReload, progress);
        reload.invoke(t)?;
        self.reload_acknowledged = true;
        log::info!("Reloading FPGA firmware from PROM");
        progress.reload_wait(self.options.settle);
        self.clock.sleep(self.options.settle);

        self.transition(UpdateState::ReadingNewIdentity, progress);
        let new = self.read_new_identity(tree, t, &version, progress)?;
        log::info!("New firmware:\n{}", new);

        let report = UpdateReport {
            old,
            new,
            bytes_programmed,
            chunks,
        };
        if !report.version_changed() {
            log::warn!(
                "Firmware version unchanged (0x{:08X})",
                report.new.fpga_version
            );
        }
        Ok(report)
    }

    fn program<T: MemoryTransport>(
        &mut self,
        prom: &PromController<'_>,
        t: &mut T,
        image: &FirmwareImage,
        image_len: u32,
        progress: &mut dyn UpdateProgress,
    ) -> core::result::Result<(u64, usize), Abort> {
        self.program_result = ProgramResult::Pending;
        prom.erase(t, image_len)?;

        progress.programming_started(image_len as u64);
        let mut done = 0u64;
        let mut chunks = 0usize;
        for (offset, chunk) in image.chunks(self.options.chunk_size) {
            prom.program_chunk(t, offset, chunk).map_err(|error| Abort {
                error,
                chunk_offset: Some(offset),
            })?;
            done += chunk.len() as u64;
            chunks += 1;
            progress.programmed(done);
        }
        progress.programming_finished();
        log::debug!("Committed {} chunks ({} bytes)", chunks, done);

        prom.finalize(t, image_len)?;
        if !prom.prog_done(t)? {
            self.program_result = ProgramResult::Failure;
            return Err(Error::ProgramIncomplete.into());
        }
        Ok((done, chunks))
    }

    fn read_new_identity<T: MemoryTransport>(
        &self,
        tree: &DeviceTree,
        t: &mut T,
        version: &str,
        progress: &mut dyn UpdateProgress,
    ) -> Result<Identity> {
        let attempts = self.options.reconnect_attempts.max(1);
        let mut attempt = 1;
        loop {
            match Identity::read(tree, version, t) {
                Ok(id) => return Ok(id),
                Err(e) if e.transport().is_some() && attempt < attempts => {
                    log::warn!("Board not back yet (attempt {}/{}): {}", attempt, attempts, e);
                    progress.reconnect_retry(attempt, &e);
                    self.clock.sleep(self.options.reconnect_interval);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
