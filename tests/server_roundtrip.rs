//! Acceptor plus connection watchers over loopback TCP.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use edgeio::network::{bind_and_listen, Acceptor, ConnectionSettings};
use edgeio::{Mode, Reactor};

fn settings(mode: Mode) -> ConnectionSettings {
    ConnectionSettings {
        mode,
        buffer_size: 1024,
        idle_timeout_ms: 2000,
    }
}

fn start(settings: ConnectionSettings) -> (Reactor, SocketAddr) {
    let listener = bind_and_listen("127.0.0.1:0".parse().unwrap(), 16).unwrap();
    let acceptor = Acceptor::new(listener, settings);
    let addr = acceptor.local_addr().unwrap();

    let mut reactor = Reactor::new().unwrap();
    reactor.add_watcher(Box::new(acceptor)).unwrap();
    (reactor, addr)
}

/// Drives the reactor until the server closes the client's connection.
fn read_until_eof(reactor: &mut Reactor, client: &mut TcpStream) -> String {
    client.set_nonblocking(true).unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut received = Vec::new();
    let mut buf = [0u8; 1024];

    loop {
        loop {
            match client.read(&mut buf) {
                Ok(0) => return String::from_utf8(received).unwrap(),
                Ok(n) => received.extend_from_slice(&buf[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => panic!("client read failed: {e}"),
            }
        }

        assert!(Instant::now() < deadline, "server never closed the connection");
        reactor.run_once().unwrap();
    }
}

#[test]
fn test_http_ok() {
    let (mut reactor, addr) = start(settings(Mode::Http));

    let mut client = TcpStream::connect(addr).unwrap();
    client
        .write_all(b"GET /hello HTTP/1.1\r\nHost: localhost\r\nUser-Agent: test\r\n\r\n")
        .unwrap();

    let response = read_until_eof(&mut reactor, &mut client);
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
    assert!(response.contains("\r\nContent-Length: 18\r\n"));
    assert!(response.contains("\r\nConnection: close\r\n"));
    assert!(response.ends_with("\r\n\r\nHello from edgeio\n"));
}

#[test]
fn test_http_request_split_across_writes() {
    let (mut reactor, addr) = start(settings(Mode::Http));

    let mut client = TcpStream::connect(addr).unwrap();
    client.write_all(b"GET / HTTP/1.0\r\nHo").unwrap();
    // accept, then read the partial head
    reactor.run_once().unwrap();
    reactor.run_once().unwrap();
    client.write_all(b"st: x\r\n\r\n").unwrap();

    let response = read_until_eof(&mut reactor, &mut client);
    assert!(response.starts_with("HTTP/1.0 200 OK\r\n"), "{response}");
}

#[test]
fn test_http_bad_request() {
    let (mut reactor, addr) = start(settings(Mode::Http));

    let mut client = TcpStream::connect(addr).unwrap();
    client.write_all(b"GET /x HTTP/1.1\r\nHost : a\r\n\r\n").unwrap();

    let response = read_until_eof(&mut reactor, &mut client);
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{response}");
    assert!(response.ends_with("Bad Request\n"));
}

#[test]
fn test_http_head_too_large() {
    let mut settings = settings(Mode::Http);
    settings.buffer_size = 64;
    let (mut reactor, addr) = start(settings);

    // exactly one buffer's worth, never terminated
    let mut head = b"GET / HTTP/1.1\r\nX-Long: ".to_vec();
    head.resize(64, b'a');

    let mut client = TcpStream::connect(addr).unwrap();
    client.write_all(&head).unwrap();

    let response = read_until_eof(&mut reactor, &mut client);
    assert!(
        response.starts_with("HTTP/1.1 431 Request Header Fields Too Large\r\n"),
        "{response}"
    );
}

#[test]
fn test_http_idle_timeout() {
    let mut settings = settings(Mode::Http);
    settings.idle_timeout_ms = 50;
    let (mut reactor, addr) = start(settings);

    let started = Instant::now();
    let mut client = TcpStream::connect(addr).unwrap();

    let response = read_until_eof(&mut reactor, &mut client);
    assert!(started.elapsed() >= Duration::from_millis(40));
    assert!(response.starts_with("HTTP/1.1 408 Request Timeout\r\n"), "{response}");
}

#[test]
fn test_echo_until_peer_closes() {
    let (mut reactor, addr) = start(settings(Mode::Echo));

    let mut client = TcpStream::connect(addr).unwrap();
    client.write_all(b"ping pong").unwrap();
    client.shutdown(Shutdown::Write).unwrap();

    assert_eq!(read_until_eof(&mut reactor, &mut client), "ping pong");
}

#[test]
fn test_echo_traffic_keeps_idle_timer_away() {
    let mut settings = settings(Mode::Echo);
    settings.idle_timeout_ms = 100;
    let (mut reactor, addr) = start(settings);

    let started = Instant::now();
    let mut client = TcpStream::connect(addr).unwrap();
    client.set_nonblocking(true).unwrap();

    // one byte every 30 ms, well past the 100 ms timeout
    for round in 0..10u8 {
        if round > 0 {
            std::thread::sleep(Duration::from_millis(30));
        }
        client.write_all(&[b'a' + round]).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut byte = [0u8; 1];
        loop {
            match client.read(&mut byte) {
                Ok(1) => break,
                Ok(_) => panic!("server closed an active session in round {round}"),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => panic!("client read failed: {e}"),
            }
            assert!(Instant::now() < deadline, "echo never arrived");
            reactor.run_once().unwrap();
        }
        assert_eq!(byte[0], b'a' + round);
    }
    assert!(started.elapsed() >= Duration::from_millis(270));

    // silence now ends the session
    let quiet = Instant::now();
    assert_eq!(read_until_eof(&mut reactor, &mut client), "");
    assert!(quiet.elapsed() >= Duration::from_millis(60));
}

#[test]
fn test_many_clients_in_one_batch() {
    let (mut reactor, addr) = start(settings(Mode::Http));

    let mut clients: Vec<TcpStream> = (0..20)
        .map(|i| {
            let mut client = TcpStream::connect(addr).unwrap();
            write!(client, "GET /{i} HTTP/1.1\r\nHost: h\r\n\r\n").unwrap();
            client
        })
        .collect();

    for client in &mut clients {
        let response = read_until_eof(&mut reactor, client);
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    }
}
