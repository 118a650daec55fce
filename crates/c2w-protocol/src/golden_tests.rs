//! Golden wire images for every message shape, pinned with inline snapshots.

use std::net::Ipv4Addr;

use c2w_core::{MovieId, Room};

use crate::framing::encode_frame;
use crate::message::{ChatMessage, Message, MovieEntry, RosterEntry};
use crate::types::Seq;

fn wire(message: &Message, seq: u16) -> String {
    let payload = message.encode_payload().unwrap();
    let bytes = encode_frame(message.kind(), Seq::new(seq).unwrap(), &payload).unwrap();
    format!("{:02x?}", &bytes[..])
}

fn movie(id: u8, title: &str, port: u16) -> MovieEntry {
    MovieEntry {
        id: MovieId::new(id).unwrap(),
        title: title.into(),
        address: Ipv4Addr::LOCALHOST,
        port,
    }
}

#[test]
fn login() {
    let message = Message::Login {
        user_name: "alice".into(),
    };
    insta::assert_snapshot!(wire(&message, 0), @"[00, 09, 00, 01, 61, 6c, 69, 63, 65]");
}

#[test]
fn ack() {
    insta::assert_snapshot!(wire(&Message::Ack, 7), @"[00, 04, 00, 70]");
}

#[test]
fn default_catalog() {
    let message = Message::Catalog(vec![
        movie(2, "Big Buck Bunny", 1234),
        movie(3, "Sintel - Trailer", 1285),
    ]);
    insta::assert_snapshot!(wire(&message, 1), @"[00, 34, 00, 15, 7f, 00, 00, 01, 04, d2, 00, 17, 02, 42, 69, 67, 20, 42, 75, 63, 6b, 20, 42, 75, 6e, 6e, 79, 7f, 00, 00, 01, 05, 05, 00, 19, 03, 53, 69, 6e, 74, 65, 6c, 20, 2d, 20, 54, 72, 61, 69, 6c, 65, 72]");
}

#[test]
fn roster() {
    let message = Message::Roster(vec![
        RosterEntry {
            name: "alice".into(),
            room: Room::Main,
        },
        RosterEntry {
            name: "bob".into(),
            room: Room::Movie(MovieId::FIRST),
        },
    ]);
    insta::assert_snapshot!(wire(&message, 2), @"[00, 10, 00, 26, 05, 00, 61, 6c, 69, 63, 65, 03, 02, 62, 6f, 62]");
}

#[test]
fn chat() {
    let message = Message::Chat(ChatMessage {
        author: "bob".into(),
        text: "hi all".into(),
    });
    insta::assert_snapshot!(wire(&message, 0xABC), @"[00, 0e, ab, c9, 03, 62, 6f, 62, 68, 69, 20, 61, 6c, 6c]");
}

#[test]
fn room_changes() {
    insta::assert_snapshot!(wire(&Message::ReturnToMainRoom, Seq::MAX), @"[00, 05, ff, f4, 30]");
    let join = Message::JoinMovieRoom {
        title: "Sintel - Trailer".into(),
    };
    insta::assert_snapshot!(wire(&join, 12), @"[00, 14, 00, c3, 53, 69, 6e, 74, 65, 6c, 20, 2d, 20, 54, 72, 61, 69, 6c, 65, 72]");
}
