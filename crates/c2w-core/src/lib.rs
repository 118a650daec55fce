//! Core types: rooms, movies, transport kinds, tracing setup

pub mod room;
pub mod tracing;
pub mod transport;

pub use room::{MovieId, Room};
pub use tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
pub use transport::{DEFAULT_PORT, MIN_PORT, ParseTransportError, TransportKind, is_valid_port};
