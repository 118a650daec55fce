//! Hook into the media pipeline that streams a movie to its room.

use tracing::info;

use crate::directory::Movie;

/// Starts and stops movie streams as rooms fill up and empty.
pub trait MovieStreamer: Send {
    /// Called when the first user enters the movie's room.
    fn start(&mut self, movie: &Movie);

    /// Called when the last user leaves the movie's room.
    fn stop(&mut self, movie: &Movie);
}

/// Streamer that only logs, for servers without a media pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingStreamer;

impl MovieStreamer for LoggingStreamer {
    fn start(&mut self, movie: &Movie) {
        info!(
            movie = %movie.title,
            id = %movie.id,
            destination = %format!("{}:{}", movie.address, movie.port),
            "Starting movie stream"
        );
    }

    fn stop(&mut self, movie: &Movie) {
        info!(movie = %movie.title, id = %movie.id, "Stopping movie stream");
    }
}
