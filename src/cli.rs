//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Generate dynamic help text for the transport argument
fn transport_help() -> String {
    let names: Vec<&str> = pwrctl_link::available_transports()
        .iter()
        .map(|t| t.name)
        .collect();
    if names.is_empty() {
        "Transport to use [none compiled in]".to_string()
    } else {
        format!("Transport to use [available: {}]", names.join(", "))
    }
}

#[derive(Parser)]
#[command(name = "pwrctl")]
#[command(author, version, about = "Power-control board register access and firmware update", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Board configuration file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Transport selection shared across commands
#[derive(clap::Args, Debug, Clone)]
pub struct TransportArgs {
    /// Transport specification (name or name:key=value,...)
    #[arg(short, long, default_value = "dummy", help = transport_help())]
    pub transport: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Program a new firmware image into the PROM and reload the FPGA
    Update {
        /// Board IP address
        #[arg(long)]
        ip: String,

        /// Firmware image to program
        #[arg(long)]
        mcs: PathBuf,

        #[command(flatten)]
        transport: TransportArgs,

        /// Skip the pre-flight ping
        #[arg(long)]
        skip_ping: bool,
    },

    /// Read every register and derived value on the board
    ReadAll {
        #[command(flatten)]
        transport: TransportArgs,
    },

    /// Read one node (e.g. Core.AxiVersion.FpgaVersion)
    Get {
        /// Dot-separated node path
        path: String,

        #[command(flatten)]
        transport: TransportArgs,
    },

    /// Write one node (hex/decimal, true/false, enum label, string or physical value)
    Set {
        /// Dot-separated node path
        path: String,

        /// Value to write
        value: String,

        #[command(flatten)]
        transport: TransportArgs,
    },

    /// Invoke a command node (e.g. Core.AxiVersion.FpgaReload)
    Exec {
        /// Dot-separated command path
        path: String,

        #[command(flatten)]
        transport: TransportArgs,
    },

    /// Print the register map without touching the board
    Tree,

    /// List available transports
    ListTransports,
}
