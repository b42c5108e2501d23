// Integration tests for the relay server and client.
//
// Starts a relay on localhost with a short poll interval and drives it with
// real `RelayClient`s whose handlers forward every broadcast into an `mpsc`
// channel. Covers membership tracking, fan-out including the sender, late
// joiners, disconnects, and server shutdown.
//
// A separate test talks to the relay with a plain blocking socket and the
// protocol crate's framing to pin down the wire format.

use std::collections::BTreeSet;
use std::io::{BufReader, BufWriter};
use std::net::TcpStream;
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use chorus_protocol::{read_message, write_message};
use chorus_relay::{
    Address, ClientConfig, LoopState, RelayClient, RelayError, RelayServer, ServerConfig,
};
use serde::{Deserialize, Serialize};

const POLL: Duration = Duration::from_millis(10);
const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct ActorSnapshot {
    name: String,
    tick: u64,
    position: [i32; 3],
}

#[test]
fn hello_reaches_existing_clients_but_not_late_joiners() {
    let server = start_server();
    assert_eq!(server.address().host, "127.0.0.1");
    assert_ne!(server.address().port, 0);

    let (a, rx_a) = connect::<String>(&server);
    let (b, rx_b) = connect::<String>(&server);
    wait_for_clients(&server, &[&a, &b]);

    a.send("hello").unwrap();
    assert_eq!(recv(&rx_b), (a.address().clone(), "hello".to_string()));
    assert_eq!(recv(&rx_a), (a.address().clone(), "hello".to_string()));

    let (c, rx_c) = connect::<String>(&server);
    wait_for_clients(&server, &[&a, &b, &c]);

    b.send("after c joined").unwrap();
    let expected = (b.address().clone(), "after c joined".to_string());
    // The first thing C ever sees is the message sent after it joined.
    assert_eq!(recv(&rx_c), expected);
    assert_eq!(recv(&rx_a), expected);
    assert_eq!(recv(&rx_b), expected);

    assert_quiet(&[&rx_a, &rx_b, &rx_c]);
}

#[test]
fn simultaneous_senders_both_delivered_exactly_once() {
    // A long interval makes it likely both sends land in the same tick.
    let server = RelayServer::start_with(ServerConfig {
        bind: Address::localhost(0),
        poll_interval: Duration::from_millis(200),
        ..ServerConfig::default()
    })
    .unwrap();
    let (a, rx_a) = connect::<String>(&server);
    let (b, rx_b) = connect::<String>(&server);
    wait_for_clients(&server, &[&a, &b]);

    a.send("from a").unwrap();
    b.send("from b").unwrap();

    let expected: BTreeSet<(Address, String)> = [
        (a.address().clone(), "from a".to_string()),
        (b.address().clone(), "from b".to_string()),
    ]
    .into();
    for rx in [&rx_a, &rx_b] {
        let got: BTreeSet<_> = [recv(rx), recv(rx)].into();
        assert_eq!(got, expected);
    }
    assert_quiet(&[&rx_a, &rx_b]);
}

#[test]
fn messages_from_one_sender_arrive_in_order() {
    let server = start_server();
    let (a, _rx_a) = connect::<u32>(&server);
    let (b, rx_b) = connect::<u32>(&server);
    wait_for_clients(&server, &[&a, &b]);

    for n in 0..20 {
        a.send(&n).unwrap();
    }
    let received: Vec<u32> = (0..20).map(|_| recv(&rx_b).1).collect();
    assert_eq!(received, (0..20).collect::<Vec<_>>());
}

#[test]
fn structured_records_are_relayed_intact() {
    let server = start_server();
    let (a, _rx_a) = connect::<ActorSnapshot>(&server);
    let (b, rx_b) = connect::<ActorSnapshot>(&server);
    wait_for_clients(&server, &[&a, &b]);

    let snapshot = ActorSnapshot {
        name: "elf-3".into(),
        tick: 1200,
        position: [4, -2, 17],
    };
    a.send(&snapshot).unwrap();
    assert_eq!(recv(&rx_b), (a.address().clone(), snapshot));
}

#[test]
fn roster_tracks_connects_and_disconnects() {
    let server = start_server();
    assert!(server.clients().is_empty());

    let (a, _rx_a) = connect::<String>(&server);
    let (mut b, _rx_b) = connect::<String>(&server);
    let (c, rx_c) = connect::<String>(&server);
    wait_for_clients(&server, &[&a, &b, &c]);

    let b_address = b.address().clone();
    b.close();
    assert_eq!(b.state(), LoopState::Stopped);
    assert!(matches!(b.send("gone"), Err(RelayError::Closed)));
    wait_for_clients(&server, &[&a, &c]);
    assert!(!server.clients().contains(&b_address));

    // Remaining clients are unaffected.
    a.send("still here").unwrap();
    assert_eq!(recv(&rx_c), (a.address().clone(), "still here".to_string()));

    drop(a);
    wait_for_clients(&server, &[&c]);
}

#[test]
fn closing_server_stops_every_client() {
    let mut server = start_server();
    let (mut a, rx_a) = connect::<String>(&server);
    let (b, _rx_b) = connect::<String>(&server);
    wait_for_clients(&server, &[&a, &b]);

    server.close();
    assert_eq!(server.state(), LoopState::Stopped);
    assert!(server.clients().is_empty());

    wait_until(|| !a.is_running() && !b.is_running());
    assert_eq!(a.state(), LoopState::Stopped);
    assert_eq!(b.state(), LoopState::Stopped);
    assert!(matches!(a.send("anyone?"), Err(RelayError::Closed)));
    assert!(rx_a.try_recv().is_err());

    // Closing after the loop stopped on its own just releases the socket.
    a.close();
}

#[test]
fn raw_socket_sees_tagged_two_tuple() {
    let server = start_server();
    let (a, _rx_a) = connect::<serde_json::Value>(&server);

    let raw = TcpStream::connect(server.address()).unwrap();
    raw.set_read_timeout(Some(TIMEOUT)).unwrap();
    let raw_address = Address::from(raw.local_addr().unwrap());
    wait_until(|| server.clients().len() == 2);
    assert!(server.clients().contains(&raw_address));

    a.send(&serde_json::json!({"hp": 10})).unwrap();
    let mut reader = BufReader::new(&raw);
    let frame: serde_json::Value =
        serde_json::from_slice(&read_message(&mut reader).unwrap()).unwrap();
    assert_eq!(
        frame,
        serde_json::json!([
            {"host": a.address().host, "port": a.address().port},
            {"hp": 10}
        ])
    );

    // And a raw client can publish too.
    let mut writer = BufWriter::new(&raw);
    write_message(&mut writer, b"[1,2,3]").unwrap();
    let frame: (Address, Vec<u8>) =
        serde_json::from_slice(&read_message(&mut reader).unwrap()).unwrap();
    assert_eq!(frame, (raw_address, vec![1, 2, 3]));
}

#[test]
fn connect_timeout_config_is_honored() {
    let server = start_server();
    let (tx, _rx) = mpsc::channel();
    let client = RelayClient::connect_with(
        ClientConfig {
            poll_interval: POLL,
            connect_timeout: Some(Duration::from_secs(2)),
        },
        server.address(),
        move |from: Address, obj: String| {
            let _ = tx.send((from, obj));
        },
    )
    .unwrap();
    assert_eq!(client.server_address(), server.address());
    wait_for_clients(&server, &[&client]);
}

// --- Helpers ---

fn start_server() -> RelayServer {
    RelayServer::start_with(ServerConfig {
        bind: Address::localhost(0),
        poll_interval: POLL,
        ..ServerConfig::default()
    })
    .unwrap()
}

fn connect<T>(server: &RelayServer) -> (RelayClient, Receiver<(Address, T)>)
where
    T: serde::de::DeserializeOwned + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let client = RelayClient::connect_with(
        ClientConfig {
            poll_interval: POLL,
            connect_timeout: None,
        },
        server.address(),
        move |from, obj| {
            let _ = tx.send((from, obj));
        },
    )
    .unwrap();
    (client, rx)
}

fn recv<T>(rx: &Receiver<(Address, T)>) -> (Address, T) {
    rx.recv_timeout(TIMEOUT).expect("no broadcast within timeout")
}

/// Nothing further arrives on any channel for a few poll intervals.
fn assert_quiet<T: std::fmt::Debug>(receivers: &[&Receiver<(Address, T)>]) {
    thread::sleep(POLL * 10);
    for rx in receivers {
        if let Ok(extra) = rx.try_recv() {
            panic!("unexpected extra broadcast: {extra:?}");
        }
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let start = Instant::now();
    while !condition() {
        assert!(start.elapsed() < TIMEOUT, "condition not met within timeout");
        thread::sleep(Duration::from_millis(5));
    }
}

/// Wait until the server's roster is exactly the given clients.
fn wait_for_clients(server: &RelayServer, clients: &[&RelayClient]) {
    let expected: BTreeSet<Address> = clients.iter().map(|c| c.address().clone()).collect();
    wait_until(|| server.clients() == expected);
}
