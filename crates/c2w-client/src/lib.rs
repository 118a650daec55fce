//! Chat client session, terminal front end and the `c2w` CLI
//!
//! [`ClientSession`] is the client half of the protocol as a plain state
//! machine; [`ChatClient`] drives it over a TCP or UDP socket.

pub mod cli;
pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod session;

pub use cli::Cli;
pub use config::ClientConfig;
pub use connection::{ChatClient, ConnectOptions};
pub use error::{ClientError, ClientResult};
pub use session::{ClientEvent, ClientSession, ClientState};
