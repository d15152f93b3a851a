//! Pre-flight reachability check
//!
//! The board is probed at a fixed interval until it answers, before a
//! session is opened against it.

use std::process::{Command, Stdio};
use std::time::Duration;

use pwrctl_core::update::Clock;

use crate::error::{LinkError, Result};

/// Something that can tell whether an endpoint answers
pub trait Probe {
    /// Endpoint being probed, for messages
    fn target(&self) -> &str;

    /// One probe; `Ok(false)` means no answer
    fn probe(&mut self) -> Result<bool>;
}

/// Probe with a single ICMP echo via the system `ping`
#[derive(Debug, Clone)]
pub struct PingProbe {
    host: String,
}

impl PingProbe {
    /// Probe for `host`
    ///
    /// The address is passed to `ping` as an argument, so anything that
    /// could be taken for an option is refused.
    pub fn new(host: impl Into<String>) -> Result<Self> {
        let host = host.into();
        let valid = !host.is_empty()
            && !host.starts_with('-')
            && host
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | ':' | '-' | '_'));
        if !valid {
            return Err(LinkError::InvalidHost(host));
        }
        Ok(Self { host })
    }
}

impl Probe for PingProbe {
    fn target(&self) -> &str {
        &self.host
    }

    fn probe(&mut self) -> Result<bool> {
        let status = Command::new("ping")
            .args(["-c", "1", &self.host])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;
        Ok(status.success())
    }
}

/// Probe until the endpoint answers
///
/// `attempts == 0` retries forever. Returns the number of probes sent.
pub fn wait_until_reachable(
    probe: &mut dyn Probe,
    interval: Duration,
    attempts: u32,
    clock: &dyn Clock,
) -> Result<u32> {
    let mut sent = 0u32;
    loop {
        sent += 1;
        if probe.probe()? {
            log::info!("{} is reachable", probe.target());
            return Ok(sent);
        }
        if attempts != 0 && sent >= attempts {
            return Err(LinkError::Unreachable {
                host: probe.target().to_string(),
                attempts: sent,
            });
        }
        log::warn!(
            "{} not reachable, retrying in {:.1} s",
            probe.target(),
            interval.as_secs_f64()
        );
        clock.sleep(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingClock(RefCell<Vec<Duration>>);

    impl Clock for RecordingClock {
        fn sleep(&self, duration: Duration) {
            self.0.borrow_mut().push(duration);
        }
    }

    struct Scripted {
        answers: Vec<bool>,
        sent: usize,
    }

    impl Probe for Scripted {
        fn target(&self) -> &str {
            "10.0.0.5"
        }

        fn probe(&mut self) -> Result<bool> {
            let answer = self.answers.get(self.sent).copied().unwrap_or(false);
            self.sent += 1;
            Ok(answer)
        }
    }

    #[test]
    fn test_retries_until_answer() {
        let mut probe = Scripted {
            answers: vec![false, false, true],
            sent: 0,
        };
        let clock = RecordingClock::default();
        let sent = wait_until_reachable(&mut probe, Duration::from_secs(5), 0, &clock).unwrap();
        assert_eq!(sent, 3);
        assert_eq!(*clock.0.borrow(), vec![Duration::from_secs(5); 2]);
    }

    #[test]
    fn test_gives_up_after_attempts() {
        let mut probe = Scripted {
            answers: vec![],
            sent: 0,
        };
        let clock = RecordingClock::default();
        let err = wait_until_reachable(&mut probe, Duration::from_secs(1), 3, &clock).unwrap_err();
        assert!(matches!(err, LinkError::Unreachable { attempts: 3, .. }));
        assert_eq!(probe.sent, 3);
        assert_eq!(clock.0.borrow().len(), 2);
    }

    #[test]
    fn test_ping_rejects_option_like_host() {
        assert!(PingProbe::new("10.0.1.101").is_ok());
        assert!(PingProbe::new("board-1.lab").is_ok());
        assert!(matches!(
            PingProbe::new("-f"),
            Err(LinkError::InvalidHost(_))
        ));
        assert!(PingProbe::new("").is_err());
        assert!(PingProbe::new("a b").is_err());
    }
}
