//! Registry of logged-in users and offered movies.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use c2w_core::{MovieId, Room};
use c2w_protocol::{MovieEntry, RosterEntry};

use crate::config::MovieConfig;
use crate::error::{ServerError, ServerResult};

/// A logged-in user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord<P> {
    pub name: String,
    pub room: Room,
    /// Peer the user is reachable through.
    pub peer: P,
}

/// A movie in the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Movie {
    pub id: MovieId,
    pub title: String,
    pub address: Ipv4Addr,
    pub port: u16,
    pub path: Option<PathBuf>,
}

impl Movie {
    pub fn entry(&self) -> MovieEntry {
        MovieEntry {
            id: self.id,
            title: self.title.clone(),
            address: self.address,
            port: self.port,
        }
    }
}

/// Users and movies known to the server.
///
/// Users keep their login order, which is also the roster order.
#[derive(Debug, Clone)]
pub struct Directory<P> {
    users: Vec<UserRecord<P>>,
    movies: Vec<Movie>,
}

impl<P: Copy + PartialEq> Directory<P> {
    /// Builds the catalog, numbering movies from [`MovieId::FIRST`].
    pub fn new(movies: &[MovieConfig]) -> ServerResult<Self> {
        let mut catalog = Vec::with_capacity(movies.len());
        let mut next_id = Some(MovieId::FIRST);
        for movie in movies {
            let id = next_id
                .ok_or_else(|| ServerError::config(format!("too many movies: {}", movies.len())))?;
            if catalog.iter().any(|known: &Movie| known.title == movie.title) {
                return Err(ServerError::config(format!(
                    "duplicate movie title {:?}",
                    movie.title
                )));
            }
            catalog.push(Movie {
                id,
                title: movie.title.clone(),
                address: movie.address,
                port: movie.port,
                path: movie.path.clone(),
            });
            next_id = id.next();
        }
        Ok(Self {
            users: Vec::new(),
            movies: catalog,
        })
    }

    pub fn movies(&self) -> &[Movie] {
        &self.movies
    }

    pub fn movie(&self, id: MovieId) -> Option<&Movie> {
        self.movies.iter().find(|movie| movie.id == id)
    }

    pub fn movie_by_title(&self, title: &str) -> Option<&Movie> {
        self.movies.iter().find(|movie| movie.title == title)
    }

    /// Catalog as sent to clients.
    pub fn catalog(&self) -> Vec<MovieEntry> {
        self.movies.iter().map(Movie::entry).collect()
    }

    pub fn users(&self) -> &[UserRecord<P>] {
        &self.users
    }

    pub fn user(&self, name: &str) -> Option<&UserRecord<P>> {
        self.users.iter().find(|user| user.name == name)
    }

    pub fn user_exists(&self, name: &str) -> bool {
        self.user(name).is_some()
    }

    /// Adds a user in the main room. Returns `false` if the name is taken.
    pub fn add_user(&mut self, name: &str, peer: P) -> bool {
        if self.user_exists(name) {
            return false;
        }
        self.users.push(UserRecord {
            name: name.to_string(),
            room: Room::Main,
            peer,
        });
        true
    }

    pub fn remove_user(&mut self, name: &str) -> Option<UserRecord<P>> {
        let index = self.users.iter().position(|user| user.name == name)?;
        Some(self.users.remove(index))
    }

    /// Moves a user and returns the room they were in.
    pub fn set_room(&mut self, name: &str, room: Room) -> Option<Room> {
        let user = self.users.iter_mut().find(|user| user.name == name)?;
        Some(std::mem::replace(&mut user.room, room))
    }

    pub fn users_in(&self, room: Room) -> impl Iterator<Item = &UserRecord<P>> {
        self.users.iter().filter(move |user| user.room == room)
    }

    pub fn occupancy(&self, room: Room) -> usize {
        self.users_in(room).count()
    }

    /// Roster as sent to clients.
    pub fn roster(&self) -> Vec<RosterEntry> {
        self.users
            .iter()
            .map(|user| RosterEntry {
                name: user.name.clone(),
                room: user.room,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_movies;

    fn directory() -> Directory<u32> {
        Directory::new(&default_movies()).unwrap()
    }

    #[test]
    fn movies_are_numbered_from_two() {
        let directory = directory();
        let ids: Vec<u8> = directory.movies().iter().map(|m| m.id.get()).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(
            directory.movie_by_title("Sintel - Trailer").unwrap().id,
            MovieId::new(3).unwrap()
        );
        assert!(directory.movie_by_title("Missing").is_none());
    }

    #[test]
    fn rejects_duplicate_titles() {
        let movies = vec![
            MovieConfig::new("Same", Ipv4Addr::LOCALHOST, 1),
            MovieConfig::new("Same", Ipv4Addr::LOCALHOST, 2),
        ];
        assert!(Directory::<u32>::new(&movies).is_err());
    }

    #[test]
    fn rejects_catalog_overflow() {
        let movies: Vec<_> = (0..255)
            .map(|i| MovieConfig::new(format!("movie {i}"), Ipv4Addr::LOCALHOST, 1))
            .collect();
        assert!(Directory::<u32>::new(&movies).is_err());
        assert!(Directory::<u32>::new(&movies[..254]).is_ok());
    }

    #[test]
    fn user_names_are_unique() {
        let mut directory = directory();
        assert!(directory.add_user("alice", 1));
        assert!(!directory.add_user("alice", 2));
        assert_eq!(directory.user("alice").unwrap().peer, 1);
    }

    #[test]
    fn rooms_and_roster() {
        let mut directory = directory();
        directory.add_user("alice", 1);
        directory.add_user("bob", 2);
        let movie = Room::Movie(MovieId::FIRST);

        assert_eq!(directory.set_room("bob", movie), Some(Room::Main));
        assert_eq!(directory.occupancy(movie), 1);
        assert_eq!(directory.occupancy(Room::Main), 1);
        assert_eq!(directory.set_room("carol", movie), None);

        let roster = directory.roster();
        assert_eq!(roster.len(), 2);
        assert_eq!(roster[0].name, "alice");
        assert_eq!(roster[1].room, movie);

        assert!(directory.remove_user("alice").is_some());
        assert!(directory.remove_user("alice").is_none());
        assert_eq!(directory.roster().len(), 1);
    }
}
