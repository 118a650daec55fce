//! Command-line interface definition.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use c2w_core::{MIN_PORT, TransportKind};

/// c2w - chat rooms next to a movie catalog
#[derive(Debug, Parser)]
#[command(name = "c2w")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "C2W_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v', global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the chat server in the foreground
    Server {
        /// Port to listen on
        #[arg(long, short, value_parser = clap::value_parser!(u16).range(i64::from(MIN_PORT)..))]
        port: Option<u16>,

        /// Transport: tcp or udp
        #[arg(long, short)]
        transport: Option<TransportKind>,

        /// Address to listen on
        #[arg(long)]
        bind: Option<IpAddr>,

        /// Probability of dropping an outgoing datagram (0.0 to 1.0)
        #[arg(long)]
        loss: Option<f64>,

        /// Seed for the loss simulator
        #[arg(long)]
        seed: Option<u64>,

        /// Retransmission interval in milliseconds
        #[arg(long)]
        retransmit_ms: Option<u64>,

        /// Give up on a message after this many retransmissions
        #[arg(long)]
        max_retransmits: Option<u32>,

        /// Write logs as JSON lines
        #[arg(long)]
        json_logs: bool,
    },

    /// Connect to a server and chat
    Connect {
        /// Server host name or address
        host: Option<String>,

        /// Server port
        #[arg(long, short, value_parser = clap::value_parser!(u16).range(i64::from(MIN_PORT)..))]
        port: Option<u16>,

        /// Transport: tcp or udp
        #[arg(long, short)]
        transport: Option<TransportKind>,

        /// User name to log in with
        #[arg(long, short)]
        user: Option<String>,

        /// Probability of dropping an outgoing datagram (0.0 to 1.0)
        #[arg(long)]
        loss: Option<f64>,

        /// Retransmission interval in milliseconds
        #[arg(long)]
        retransmit_ms: Option<u64>,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Dump,
    /// Show the configuration file path
    Path,
}
