//! Firmware update command

use std::path::Path;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use pwrctl_core::update::{SystemClock, UpdateProgress};
use pwrctl_core::{board, BoardConfig, Error, FirmwareImage, FirmwareUpdate, UpdateOptions, UpdateState};
use pwrctl_link::{open_session, wait_until_reachable, PingProbe};

fn create_progress_bar_style() -> Result<ProgressStyle, Box<dyn std::error::Error>> {
    Ok(ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")?
        .progress_chars("#>-"))
}

fn create_spinner_style() -> Result<ProgressStyle, Box<dyn std::error::Error>> {
    Ok(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?)
}

/// Progress reporter using indicatif progress bars
pub struct IndicatifProgress {
    current_bar: Option<ProgressBar>,
}

impl IndicatifProgress {
    pub fn new() -> Self {
        Self { current_bar: None }
    }

    fn create_bar(&mut self, total: u64) {
        let pb = ProgressBar::new(total);
        pb.set_style(create_progress_bar_style().unwrap_or_else(|_| ProgressStyle::default_bar()));
        self.current_bar = Some(pb);
    }

    fn create_spinner(&mut self, message: String) {
        let pb = ProgressBar::new_spinner();
        pb.set_style(create_spinner_style().unwrap_or_else(|_| ProgressStyle::default_spinner()));
        pb.set_message(message);
        pb.enable_steady_tick(Duration::from_millis(100));
        self.current_bar = Some(pb);
    }

    fn finish(&mut self, message: &str) {
        if let Some(pb) = self.current_bar.take() {
            pb.finish_with_message(message.to_string());
        }
    }
}

impl Default for IndicatifProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateProgress for IndicatifProgress {
    fn state_changed(&mut self, state: UpdateState) {
        match state {
            UpdateState::ReadingNewIdentity => self.finish("Reload wait complete"),
            UpdateState::Done | UpdateState::Failed => self.finish(""),
            _ => {}
        }
    }

    fn programming_started(&mut self, total: u64) {
        self.create_bar(total);
    }

    fn programmed(&mut self, done: u64) {
        if let Some(pb) = &self.current_bar {
            pb.set_position(done);
        }
    }

    fn programming_finished(&mut self) {
        self.finish("Programming complete");
    }

    fn reload_wait(&mut self, settle: Duration) {
        self.create_spinner(format!(
            "Waiting {:.0} s for the FPGA to reload...",
            settle.as_secs_f64()
        ));
    }

    fn reconnect_retry(&mut self, attempt: u32, _error: &Error) {
        match &self.current_bar {
            Some(pb) => pb.set_message(format!("Board not back yet (attempt {})...", attempt)),
            None => self.create_spinner(format!("Board not back yet (attempt {})...", attempt)),
        }
    }
}

/// Program `mcs` into the board at `ip` and reload it
pub fn run_update(
    config: &BoardConfig,
    ip: &str,
    mcs: &Path,
    transport: &str,
    skip_ping: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let image = FirmwareImage::open(mcs)?;

    if skip_ping {
        log::warn!("Skipping reachability check for {}", ip);
    } else {
        let mut probe = PingProbe::new(ip)?;
        let interval = Duration::try_from_secs_f64(config.link.ping_interval_secs)?;
        wait_until_reachable(&mut probe, interval, config.link.ping_attempts, &SystemClock)?;
    }

    let tree = board::build_tree(config)?;
    let mut session = open_session(transport, tree, config.link.max_transaction_len)?;
    let mut update = FirmwareUpdate::new(UpdateOptions::from(&config.update));
    let mut progress = IndicatifProgress::new();

    println!("Updating {} with {} ({} bytes)", ip, mcs.display(), image.len());
    let result = update.run(&mut session, &image, &mut progress);
    session.close();

    match result {
        Ok(report) => {
            println!("Old firmware:\n{}\n", report.old);
            println!("New firmware:\n{}", report.new);
            if !report.version_changed() {
                println!("Warning: FPGA version did not change");
            }
            Ok(())
        }
        Err(failure) => {
            if let Some(old) = &failure.old_identity {
                println!("Firmware before the failure:\n{}", old);
            }
            Err(failure.into())
        }
    }
}
