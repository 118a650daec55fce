//! Chat server: user directory, room membership, roster and catalog push.
//!
//! The protocol logic lives in [`ChatServer`], a transport-agnostic state
//! machine. [`TcpChatServer`] and [`UdpChatServer`] drive it from a single
//! tokio task each; [`ChatListener`] picks one from the configuration.
//!
//! # Example
//!
//! ```rust,no_run
//! use c2w_server::{ChatListener, ServerConfig, SignalHandler};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     let signals = SignalHandler::new();
//!     signals.spawn_listener();
//!
//!     let listener = ChatListener::bind(&config).await?;
//!     listener.run_until_shutdown(signals.shutdown().wait()).await?;
//!     Ok(())
//! }
//! ```

mod config;
mod directory;
mod error;
mod handler;
mod listener;
mod signals;
mod streaming;
mod tcp;
mod udp;

pub use config::{MovieConfig, ServerConfig, default_movies};
pub use directory::{Directory, Movie, UserRecord};
pub use error::{ServerError, ServerResult};
pub use handler::{ChatServer, Outgoing, PeerId, Phase};
pub use listener::ChatListener;
pub use signals::{ShutdownSignal, SignalHandler};
pub use streaming::{LoggingStreamer, MovieStreamer};
pub use tcp::{ConnectionId, TcpChatServer};
pub use udp::UdpChatServer;
