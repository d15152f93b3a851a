//! pwrctl - Register access and firmware update for the power-control board
//!
//! The board's FPGA exposes a register map over a memory transport. pwrctl
//! reads and writes that map by path, and updates the FPGA firmware by
//! streaming an image through the PROM controller and reloading.
//!
//! # Architecture
//!
//! - `pwrctl-core` holds the register map, the session and the update state
//!   machine
//! - `pwrctl-link` turns a transport specification into a session
//! - this binary parses arguments, sets up logging and shows progress

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use pwrctl_core::{board, BoardConfig};
use pwrctl_link::open_session;
use std::path::Path;

fn load_config(path: Option<&Path>) -> Result<BoardConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            let config = BoardConfig::from_toml_file(path)?;
            log::info!("Loaded board configuration from {}", path.display());
            Ok(config)
        }
        None => Ok(BoardConfig::default()),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let config = load_config(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Update {
            ip,
            mcs,
            transport,
            skip_ping,
        } => commands::update::run_update(&config, &ip, &mcs, &transport.transport, skip_ping),
        Commands::ReadAll { transport } => {
            let mut session = open(&config, &transport.transport)?;
            let r = commands::access::run_read_all(&mut session);
            session.close();
            r
        }
        Commands::Get { path, transport } => {
            let mut session = open(&config, &transport.transport)?;
            let r = commands::access::run_get(&mut session, &path);
            session.close();
            r
        }
        Commands::Set {
            path,
            value,
            transport,
        } => {
            let mut session = open(&config, &transport.transport)?;
            let r = commands::access::run_set(&mut session, &path, &value);
            session.close();
            r
        }
        Commands::Exec { path, transport } => {
            let mut session = open(&config, &transport.transport)?;
            let r = commands::access::run_exec(&mut session, &path);
            session.close();
            r
        }
        Commands::Tree => {
            commands::tree::print_tree(&board::build_tree(&config)?);
            Ok(())
        }
        Commands::ListTransports => {
            commands::list_transports();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

fn open(
    config: &BoardConfig,
    transport: &str,
) -> Result<pwrctl_core::Session<pwrctl_link::BoxedTransport>, Box<dyn std::error::Error>> {
    let tree = board::build_tree(config)?;
    Ok(open_session(transport, tree, config.link.max_transaction_len)?)
}
