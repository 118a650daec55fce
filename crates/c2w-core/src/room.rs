//! Room identifiers shared by the client and the server.
//!
//! On the wire a room is a single byte: `0` is the main room and any other
//! value is the id of the movie whose room the user is in. The special
//! "out of the system" room never appears on the wire; it only marks users
//! that have left.

use std::fmt;

/// Identifier of a movie, and therefore of its movie room.
///
/// Zero is reserved for the main room, so a `MovieId` is never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MovieId(u8);

impl MovieId {
    /// First id handed out by the server's movie catalog.
    pub const FIRST: MovieId = MovieId(2);

    /// Creates a movie id, returning `None` for the reserved value `0`.
    pub const fn new(id: u8) -> Option<Self> {
        if id == Room::MAIN_ROOM_ID {
            None
        } else {
            Some(Self(id))
        }
    }

    /// Returns the raw wire value.
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Returns the id following this one, or `None` once the id space is exhausted.
    pub const fn next(self) -> Option<Self> {
        match self.0.checked_add(1) {
            Some(id) => Some(Self(id)),
            None => None,
        }
    }
}

impl fmt::Display for MovieId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The room a user is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Room {
    /// The main room every user enters after login.
    #[default]
    Main,
    /// The room attached to a movie.
    Movie(MovieId),
    /// The user has left the system.
    OutOfSystem,
}

impl Room {
    /// Wire value of the main room.
    pub const MAIN_ROOM_ID: u8 = 0;

    /// Maps a wire room id back to a room.
    pub const fn from_wire_id(id: u8) -> Self {
        match MovieId::new(id) {
            Some(movie) => Room::Movie(movie),
            None => Room::Main,
        }
    }

    /// Returns the wire room id, or `None` for [`Room::OutOfSystem`].
    pub const fn wire_id(self) -> Option<u8> {
        match self {
            Room::Main => Some(Self::MAIN_ROOM_ID),
            Room::Movie(movie) => Some(movie.get()),
            Room::OutOfSystem => None,
        }
    }

    /// Returns the movie id when this is a movie room.
    pub const fn movie(self) -> Option<MovieId> {
        match self {
            Room::Movie(movie) => Some(movie),
            _ => None,
        }
    }

    pub const fn is_main(self) -> bool {
        matches!(self, Room::Main)
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::Main => write!(f, "main room"),
            Room::Movie(movie) => write!(f, "movie room {movie}"),
            Room::OutOfSystem => write!(f, "out of the system"),
        }
    }
}
