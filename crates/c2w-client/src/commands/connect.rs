//! Connect command: a line-oriented chat front end.
//!
//! Plain lines are chat messages. Lines starting with `/` are commands:
//! `/join <title>`, `/main`, `/users`, `/movies`, `/quit`.

use std::fmt::Write as _;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use c2w_core::Room;
use c2w_protocol::{MovieEntry, RosterEntry};

use crate::connection::{ChatClient, ConnectOptions};
use crate::error::{ClientError, ClientResult};
use crate::session::ClientEvent;

/// One line typed by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Chat(String),
    Join(String),
    Main,
    Users,
    Movies,
    Quit,
    Help,
    Empty,
}

impl Input {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Input::Empty;
        }
        let Some(command) = line.strip_prefix('/') else {
            return Input::Chat(line.to_string());
        };
        let (name, argument) = match command.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (command, ""),
        };
        match name {
            "join" if !argument.is_empty() => Input::Join(argument.to_string()),
            "main" => Input::Main,
            "users" | "who" => Input::Users,
            "movies" => Input::Movies,
            "quit" | "exit" => Input::Quit,
            _ => Input::Help,
        }
    }
}

const HELP: &str = "commands: /join <title>, /main, /users, /movies, /quit";

/// Names a room using the catalog titles.
pub fn room_name(room: Room, movies: &[MovieEntry]) -> String {
    match room {
        Room::Movie(id) => movies
            .iter()
            .find(|movie| movie.id == id)
            .map(|movie| movie.title.clone())
            .unwrap_or_else(|| room.to_string()),
        other => other.to_string(),
    }
}

/// Renders the user list, one user per line.
pub fn format_users(users: &[RosterEntry], movies: &[MovieEntry]) -> String {
    let mut out = String::new();
    for user in users {
        let _ = writeln!(out, "  {} ({})", user.name, room_name(user.room, movies));
    }
    out
}

/// Renders the movie catalog, one movie per line.
pub fn format_movies(movies: &[MovieEntry]) -> String {
    let mut out = String::new();
    for movie in movies {
        let _ = writeln!(out, "  {} [{}:{}]", movie.title, movie.address, movie.port);
    }
    out
}

/// What the front end knows about the session.
#[derive(Debug, Default)]
struct View {
    logged_in: bool,
    room: Room,
    users: Vec<RosterEntry>,
    movies: Vec<MovieEntry>,
    quitting: bool,
}

/// Connects, logs in and runs the chat loop until the user leaves.
pub async fn run(options: ConnectOptions, user_name: Option<String>) -> ClientResult<()> {
    let mut client = ChatClient::connect(options).await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut view = View::default();

    match user_name {
        Some(name) => client.login(name).await?,
        None => println!("user name:"),
    }

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    if !view.logged_in {
                        return Ok(());
                    }
                    debug!("stdin closed, leaving");
                    quit(&client, &mut view).await?;
                    continue;
                };
                if !view.logged_in {
                    let name = line.trim();
                    if !name.is_empty() {
                        report(client.login(name).await);
                    }
                    continue;
                }
                handle_input(&client, &mut view, Input::parse(&line)).await?;
            }
            event = client.next_event() => {
                let Some(event) = event else {
                    return Err(ClientError::Closed);
                };
                if handle_event(&client, &mut view, event).await? {
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_input(client: &ChatClient, view: &mut View, input: Input) -> ClientResult<()> {
    match input {
        Input::Chat(text) => report(client.send_chat(text).await),
        Input::Join(title) => report(client.join_movie(title).await),
        Input::Main => report(client.return_to_main_room().await),
        Input::Users => print!("{}", format_users(&view.users, &view.movies)),
        Input::Movies => print!("{}", format_movies(&view.movies)),
        Input::Quit => quit(client, view).await?,
        Input::Help => println!("{HELP}"),
        Input::Empty => {}
    }
    Ok(())
}

async fn quit(client: &ChatClient, view: &mut View) -> ClientResult<()> {
    view.quitting = true;
    if view.room.is_main() {
        report(client.leave().await);
    } else {
        report(client.return_to_main_room().await);
    }
    Ok(())
}

/// Applies one event to the view. Returns true once the session is over.
async fn handle_event(client: &ChatClient, view: &mut View, event: ClientEvent) -> ClientResult<bool> {
    match event {
        ClientEvent::LoginRejected { user_name } => {
            println!("the name {user_name:?} was refused, pick another one:");
        }
        ClientEvent::InitComplete { users, movies } => {
            view.logged_in = true;
            view.room = Room::Main;
            view.users = users;
            view.movies = movies;
            println!("welcome! {} user(s) online. movies:", view.users.len());
            print!("{}", format_movies(&view.movies));
            println!("{HELP}");
        }
        ClientEvent::UserListUpdated(users) => view.users = users,
        ClientEvent::JoinedRoom(room) => {
            view.room = room;
            println!("you are now in {}", room_name(room, &view.movies));
            if view.quitting && room.is_main() {
                report(client.leave().await);
            }
        }
        ClientEvent::LeftSystem => {
            println!("bye");
            return Ok(true);
        }
        ClientEvent::ChatReceived(message) => println!("<{}> {}", message.author, message.text),
        ClientEvent::ConnectionLost => {
            return Err(ClientError::Connection("connection to the server was lost".into()));
        }
    }
    Ok(false)
}

/// Prints a refused operation and keeps the session going.
fn report(result: ClientResult<()>) {
    if let Err(e) = result {
        println!("! {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use c2w_core::MovieId;
    use std::net::Ipv4Addr;

    fn catalog() -> Vec<MovieEntry> {
        vec![MovieEntry {
            id: MovieId::FIRST,
            title: "Big Buck Bunny".into(),
            address: Ipv4Addr::LOCALHOST,
            port: 1234,
        }]
    }

    #[test]
    fn parses_input_lines() {
        assert_eq!(Input::parse("hello there"), Input::Chat("hello there".into()));
        assert_eq!(
            Input::parse("/join  Big Buck Bunny "),
            Input::Join("Big Buck Bunny".into())
        );
        assert_eq!(Input::parse("/join"), Input::Help);
        assert_eq!(Input::parse("/main"), Input::Main);
        assert_eq!(Input::parse("/who"), Input::Users);
        assert_eq!(Input::parse("/movies"), Input::Movies);
        assert_eq!(Input::parse("/quit"), Input::Quit);
        assert_eq!(Input::parse("/dance"), Input::Help);
        assert_eq!(Input::parse("   "), Input::Empty);
    }

    #[test]
    fn rooms_are_named_after_movies() {
        let movies = catalog();
        assert_eq!(room_name(Room::Main, &movies), "main room");
        assert_eq!(room_name(Room::Movie(MovieId::FIRST), &movies), "Big Buck Bunny");
        let unknown = Room::Movie(MovieId::new(9).unwrap());
        assert_eq!(room_name(unknown, &movies), "movie room #9");
    }

    #[test]
    fn formats_lists() {
        let movies = catalog();
        let users = vec![
            RosterEntry {
                name: "alice".into(),
                room: Room::Main,
            },
            RosterEntry {
                name: "bob".into(),
                room: Room::Movie(MovieId::FIRST),
            },
        ];
        assert_eq!(
            format_users(&users, &movies),
            "  alice (main room)\n  bob (Big Buck Bunny)\n"
        );
        assert_eq!(format_movies(&movies), "  Big Buck Bunny [127.0.0.1:1234]\n");
    }
}
