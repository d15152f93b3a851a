//! Transport registry and initialization
//!
//! Transports are selected with a specification string of the form
//! `name` or `name:key1=value1,key2=value2`. Each transport is gated behind
//! a cargo feature of the same name.

use std::collections::HashMap;

#[allow(unused_imports)] // Used in feature-gated code
use pwrctl_core::config::parse_number;
use pwrctl_core::{DeviceTree, MemoryTransport, Session, TransportError};

use crate::error::{LinkError, Result};

/// Boxed transport as returned by [`open_transport`]
pub type BoxedTransport = Box<dyn MemoryTransport + Send>;

/// Information about a transport
pub struct TransportInfo {
    /// Primary name (used for matching)
    pub name: &'static str,
    /// Alternative names/aliases
    pub aliases: &'static [&'static str],
    /// Short description
    pub description: &'static str,
    /// Whether this transport is currently implemented
    pub implemented: bool,
}

/// Get information about all available transports (enabled at compile time)
#[allow(unused_mut, clippy::vec_init_then_push)]
pub fn available_transports() -> Vec<TransportInfo> {
    let mut transports = Vec::new();

    #[cfg(feature = "dummy")]
    transports.push(TransportInfo {
        name: "dummy",
        aliases: &["sim"],
        description: "Simulated board (version=<hex>,next=<hex>,downtime=<s>,fail_chunk=<n>,prog_done=<bool>)",
        implemented: true,
    });

    transports
}

/// Canonical name for `name`, if it is a known transport or alias
pub fn find_transport(name: &str) -> Option<&'static str> {
    available_transports()
        .into_iter()
        .find(|t| t.name == name || t.aliases.contains(&name))
        .map(|t| t.name)
}

/// Parsed transport parameters
#[derive(Debug, Clone)]
pub struct TransportParams {
    /// Transport name as given
    pub name: String,
    /// Key-value parameters
    pub params: HashMap<String, String>,
}

/// Parse a transport string into name and parameters
///
/// # Example
/// ```ignore
/// let params = parse_transport_params("dummy:downtime=3")?;
/// assert_eq!(params.name, "dummy");
/// assert_eq!(params.params.get("downtime"), Some(&"3".to_string()));
/// ```
pub fn parse_transport_params(s: &str) -> Result<TransportParams> {
    let (name, opts_str) = s.split_once(':').unwrap_or((s, ""));

    let mut params = HashMap::new();
    if !opts_str.is_empty() {
        for opt in opts_str.split(',') {
            match opt.split_once('=') {
                Some((key, value)) if !key.is_empty() => {
                    params.insert(key.to_string(), value.to_string());
                }
                _ => return Err(LinkError::BadFormat(opt.to_string())),
            }
        }
    }

    Ok(TransportParams {
        name: name.to_string(),
        params,
    })
}

/// Transport with a lower cap on transaction length
pub struct Limited<T> {
    inner: T,
    max_len: usize,
}

impl<T: MemoryTransport> Limited<T> {
    /// Cap `inner` at `max_len` bytes per transaction
    pub fn new(inner: T, max_len: usize) -> Self {
        Self { inner, max_len }
    }
}

impl<T: MemoryTransport> MemoryTransport for Limited<T> {
    fn read_range(&mut self, addr: u64, len: u32) -> core::result::Result<Vec<u8>, TransportError> {
        self.inner.read_range(addr, len)
    }

    fn write_range(&mut self, addr: u64, data: &[u8]) -> core::result::Result<(), TransportError> {
        self.inner.write_range(addr, data)
    }

    fn max_transaction_len(&self) -> usize {
        self.max_len.min(self.inner.max_transaction_len())
    }

    fn supports_range_reads(&self) -> bool {
        self.inner.supports_range_reads()
    }
}

/// Open a transport for the board described by `tree`
///
/// # Arguments
/// * `spec` - Transport specification (e.g. "dummy" or "dummy:downtime=3")
/// * `tree` - Register map the transport will serve
/// * `max_len` - Optional cap on a single transaction
pub fn open_transport(
    spec: &str,
    tree: &DeviceTree,
    max_len: Option<usize>,
) -> Result<BoxedTransport> {
    let params = parse_transport_params(spec)?;

    let transport: BoxedTransport = match find_transport(&params.name) {
        #[cfg(feature = "dummy")]
        Some("dummy") => Box::new(open_dummy(&params, tree)?),

        _ => {
            let _ = tree;
            return Err(LinkError::UnknownTransport(params.name));
        }
    };

    match max_len {
        Some(cap) => {
            log::debug!("Capping transactions at {} bytes", cap);
            Ok(Box::new(Limited::new(transport, cap)))
        }
        None => Ok(transport),
    }
}

/// Open a transport and wrap it in a session together with `tree`
pub fn open_session(
    spec: &str,
    tree: DeviceTree,
    max_len: Option<usize>,
) -> Result<Session<BoxedTransport>> {
    let transport = open_transport(spec, &tree, max_len)?;
    Ok(Session::open(spec, transport, tree))
}

#[cfg(feature = "dummy")]
fn invalid(params: &TransportParams, key: &str, value: &str, reason: impl Into<String>) -> LinkError {
    LinkError::InvalidParam {
        transport: params.name.clone(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

#[cfg(feature = "dummy")]
fn open_dummy(params: &TransportParams, tree: &DeviceTree) -> Result<pwrctl_dummy::SimulatedBoard> {
    use pwrctl_dummy::{DummyConfig, SimClock, SimulatedBoard};
    use std::time::Duration;

    let mut config = DummyConfig::default();
    for (key, value) in &params.params {
        let number = || parse_number(value).map_err(|e| invalid(params, key, value, e));
        let version = || {
            number().and_then(|v| {
                u32::try_from(v).map_err(|_| invalid(params, key, value, "does not fit 32 bits"))
            })
        };
        let flag = || match value.as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => Err(invalid(params, key, value, "expected true or false")),
        };

        match key.as_str() {
            "version" => config.fpga_version = version()?,
            "next" => config.next_version = version()?,
            "downtime" => {
                let secs: f64 = value
                    .parse()
                    .map_err(|_| invalid(params, key, value, "expected seconds"))?;
                config.downtime = Duration::try_from_secs_f64(secs)
                    .map_err(|e| invalid(params, key, value, e.to_string()))?;
            }
            "fail_chunk" => config.fail_chunk = Some(number()? as usize),
            "prog_done" => config.prog_done = flag()?,
            "range_reads" => config.range_reads = flag()?,
            _ => {
                return Err(LinkError::UnknownParam {
                    transport: params.name.clone(),
                    key: key.clone(),
                })
            }
        }
    }

    log::info!(
        "Opening simulated board (FpgaVersion 0x{:08X}, next 0x{:08X})",
        config.fpga_version,
        config.next_version
    );
    Ok(SimulatedBoard::new(config, tree, SimClock::wall())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_name() {
        let p = parse_transport_params("dummy").unwrap();
        assert_eq!(p.name, "dummy");
        assert!(p.params.is_empty());
    }

    #[test]
    fn test_parse_params() {
        let p = parse_transport_params("dummy:version=0x10203,downtime=2.5").unwrap();
        assert_eq!(p.params.get("version").map(String::as_str), Some("0x10203"));
        assert_eq!(p.params.get("downtime").map(String::as_str), Some("2.5"));
    }

    #[test]
    fn test_parse_rejects_bare_option() {
        assert!(matches!(
            parse_transport_params("dummy:fast"),
            Err(LinkError::BadFormat(opt)) if opt == "fast"
        ));
        assert!(parse_transport_params("dummy:=1").is_err());
    }

    #[test]
    fn test_unknown_transport() {
        let tree = pwrctl_core::board::build_tree(&Default::default()).unwrap();
        assert!(matches!(
            open_transport("udp:port=8192", &tree, None),
            Err(LinkError::UnknownTransport(name)) if name == "udp"
        ));
    }

    #[cfg(feature = "dummy")]
    #[test]
    fn test_open_dummy_session() {
        let tree = pwrctl_core::board::build_tree(&Default::default()).unwrap();
        let mut session = open_session("sim:version=0x00010205", tree, Some(64)).unwrap();
        assert_eq!(session.transport_mut().max_transaction_len(), 64);
        let version = session.read("Core.AxiVersion.FpgaVersion").unwrap();
        assert_eq!(version.as_u64(), Some(0x0001_0205));
    }

    #[cfg(feature = "dummy")]
    #[test]
    fn test_dummy_param_errors() {
        let tree = pwrctl_core::board::build_tree(&Default::default()).unwrap();
        assert!(matches!(
            open_transport("dummy:version=0x1_0000_0000", &tree, None),
            Err(LinkError::InvalidParam { .. })
        ));
        assert!(matches!(
            open_transport("dummy:speed=9", &tree, None),
            Err(LinkError::UnknownParam { key, .. }) if key == "speed"
        ));
    }
}
