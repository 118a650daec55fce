//! Client and server state machines wired together without sockets, so
//! individual frames can be lost, held back or delivered late.

use std::time::Duration;

use bytes::Bytes;
use c2w_client::{ClientEvent, ClientSession, ClientState};
use c2w_protocol::{MessageType, decode_frame};
use c2w_server::{ChatServer, Outgoing, ServerConfig};
use tokio::time::Instant;

fn chat_server() -> ChatServer<u32> {
    ChatServer::new(&ServerConfig::default()).unwrap()
}

fn kind(bytes: &Bytes) -> MessageType {
    decode_frame(bytes).unwrap().kind
}

/// Delivers `out` to `client` and the client's answers back to the server
/// until neither side has anything left to say.
fn settle(
    server: &mut ChatServer<u32>,
    peer: u32,
    client: &mut ClientSession,
    mut out: Vec<Outgoing<u32>>,
    now: Instant,
) {
    while !out.is_empty() {
        let replies: Vec<Bytes> = out
            .into_iter()
            .filter(|o| o.peer == peer)
            .flat_map(|o| client.handle_datagram(&o.bytes))
            .collect();
        out = replies
            .iter()
            .flat_map(|bytes| server.handle_datagram(peer, bytes, now))
            .collect();
    }
}

fn log_in(server: &mut ChatServer<u32>, peer: u32, name: &str, now: Instant) -> ClientSession {
    let mut client = ClientSession::default();
    let login = client.login(name, now).unwrap();
    let out = server.handle_datagram(peer, &login, now);
    settle(server, peer, &mut client, out, now);
    assert_eq!(client.state(), ClientState::MainRoom);
    client
}

#[test]
fn late_refusal_does_not_cancel_the_retry() {
    let mut server = chat_server();
    let start = Instant::now();
    let _alice = log_in(&mut server, 1, "alice", start);

    let mut client = ClientSession::default();
    let login = client.login("alice", start).unwrap();
    let out = server.handle_datagram(2, &login, start);
    let kinds: Vec<_> = out.iter().map(|o| kind(&o.bytes)).collect();
    assert_eq!(kinds, vec![MessageType::Ack, MessageType::LoginRejected]);
    // The ACK is lost and the refusal is held up in the network.
    let refusal = out[1].bytes.clone();

    let later = start + Duration::from_secs(1);
    let resent = client.poll_retransmits(later);
    assert_eq!(resent, vec![login]);
    let out = server.handle_datagram(2, &resent[0], later);
    assert_eq!(out.len(), 1, "a repeated login must not be refused twice");
    assert_eq!(kind(&out[0].bytes), MessageType::Ack);
    client.handle_datagram(&out[0].bytes);

    let ack = client.handle_datagram(&refusal);
    assert_eq!(
        client.drain_events().collect::<Vec<_>>(),
        vec![ClientEvent::LoginRejected {
            user_name: "alice".into()
        }]
    );
    assert_eq!(client.next_deadline(), None);
    for bytes in &ack {
        server.handle_datagram(2, bytes, later);
    }
    assert_eq!(server.session_count(), 1);

    // Retry under another name. The old refusal shows up once more while
    // the new login is on its way and must not end it.
    let retry = client.login("alice2", later).unwrap();
    let out = server.handle_datagram(2, &retry, later);
    assert_eq!(client.handle_datagram(&refusal).len(), 1);
    assert_eq!(client.state(), ClientState::Connecting { accepted: false });
    assert_eq!(client.drain_events().count(), 0);

    settle(&mut server, 2, &mut client, out, later);
    assert_eq!(client.state(), ClientState::MainRoom);
    assert_eq!(client.user_name(), Some("alice2"));
    let events: Vec<_> = client.drain_events().collect();
    assert!(matches!(
        &events[..],
        [ClientEvent::InitComplete { users, movies }] if users.len() == 2 && movies.len() == 2
    ));
    assert!(server.directory().user_exists("alice2"));
}

#[test]
fn server_frames_continue_after_an_earlier_refusal() {
    let mut server = chat_server();
    let now = Instant::now();
    let _bob = log_in(&mut server, 1, "bob", now);

    let mut client = ClientSession::default();
    let login = client.login("bob", now).unwrap();
    let out = server.handle_datagram(2, &login, now);
    settle(&mut server, 2, &mut client, out, now);
    assert_eq!(client.state(), ClientState::Disconnected);
    assert_eq!(server.session_count(), 1);

    // The refused session is gone, yet the next one must not reuse the
    // number of the refusal the client still remembers.
    let login = client.login("carol", now).unwrap();
    let out = server.handle_datagram(2, &login, now);
    settle(&mut server, 2, &mut client, out, now);
    assert_eq!(client.state(), ClientState::MainRoom);
    assert_eq!(server.session_count(), 2);
}
