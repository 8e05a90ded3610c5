//! End-to-end protocol tests: a real server task, a real echo target, and a
//! client driving the full encrypt-relay-decrypt path over loopback.

use shadowgate::client;
use shadowgate::common::socks;
use shadowgate::common::Address;
use shadowgate::crypto::Cipher;
use shadowgate::inbound::TcpInbound;
use shadowgate::outbound::PriorityDialer;
use shadowgate::relay::Datagram;
use shadowgate::server;
use shadowgate::shadow::{ShadowStream, ShadowUdp};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};

fn cipher(password: &str) -> Arc<Cipher> {
    Arc::new(Cipher::pick("chacha20-ietf-poly1305", &[], password).unwrap())
}

/// Plain TCP echo server; returns its address.
async fn spawn_tcp_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(v) => v,
                Err(_) => return,
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
    addr
}

/// Plain UDP echo server; returns its address.
async fn spawn_udp_echo() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = [0u8; 1500];
        loop {
            let Ok((n, from)) = socket.recv_from(&mut buf).await else {
                return;
            };
            let _ = socket.send_to(&buf[..n], from).await;
        }
    });
    addr
}

/// Shadowsocks TCP server over loopback; returns its address.
async fn spawn_ss_server(password: &str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let c = Arc::new(
        Cipher::pick("chacha20-ietf-poly1305", &[], password)
            .unwrap()
            .with_replay_filter(),
    );
    tokio::spawn(async move {
        let _ = server::tcp_remote_with(listener, c).await;
    });
    addr
}

/// Shadowsocks UDP server over loopback; returns its address.
async fn spawn_ss_udp_server(password: &str) -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let c = cipher(password);
    tokio::spawn(async move {
        let _ = server::udp_remote_with(socket, c, Duration::from_secs(30)).await;
    });
    addr
}

#[tokio::test]
async fn aead_tcp_echo_through_server() {
    let echo = spawn_tcp_echo().await;
    let ss = spawn_ss_server("foo").await;

    let dialer = PriorityDialer::new(vec![(ss.to_string(), cipher("foo"))]);
    let mut conn = dialer
        .dial(&Address::from(echo.ip()), echo.port())
        .await
        .unwrap();

    conn.write_all(b"ping").await.unwrap();
    let mut reply = [0u8; 4];
    conn.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply, b"ping");
}

#[tokio::test]
async fn aead_tcp_large_transfer() {
    let echo = spawn_tcp_echo().await;
    let ss = spawn_ss_server("large").await;

    let dialer = PriorityDialer::new(vec![(ss.to_string(), cipher("large"))]);
    let conn = dialer
        .dial(&Address::from(echo.ip()), echo.port())
        .await
        .unwrap();

    // Spans many records; exercises segmentation both ways. Write and read
    // concurrently so the echo window never stalls.
    let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    let expected = payload.clone();

    let (mut rd, mut wr) = tokio::io::split(conn);
    let write = tokio::spawn(async move {
        wr.write_all(&payload).await.unwrap();
        wr.flush().await.unwrap();
    });
    let mut got = vec![0u8; expected.len()];
    rd.read_exact(&mut got).await.unwrap();

    assert_eq!(got, expected);
    write.await.unwrap();
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let echo = spawn_tcp_echo().await;
    let ss = spawn_ss_server("right-password").await;

    let dialer = PriorityDialer::new(vec![(ss.to_string(), cipher("wrong-password"))]);
    let mut conn = dialer
        .dial(&Address::from(echo.ip()), echo.port())
        .await
        .unwrap();

    // The server cannot authenticate the header record and closes; the
    // write may race the close, and the read must never see an echo.
    let _ = conn.write_all(b"ping").await;
    let mut reply = [0u8; 4];
    assert!(conn.read_exact(&mut reply).await.is_err());
}

#[tokio::test]
async fn socks5_connect_end_to_end() {
    let echo = spawn_tcp_echo().await;
    let ss = spawn_ss_server("socks-e2e").await;

    let dialer = PriorityDialer::new(vec![(ss.to_string(), cipher("socks-e2e"))]);
    let inbound = TcpInbound::socks("127.0.0.1:0", None).await.unwrap();
    let socks_addr = inbound.local_addr().unwrap();
    tokio::spawn(inbound.run(dialer));

    let mut stream = TcpStream::connect(socks_addr).await.unwrap();

    // Method negotiation
    stream.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, [0x05, 0x00]);

    // CONNECT to the echo server
    let mut request = vec![0x05, socks::CMD_CONNECT, 0x00];
    Address::from(echo.ip()).write_bytes(echo.port(), &mut request);
    stream.write_all(&request).await.unwrap();
    let mut reply = [0u8; 10];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply[..4], &[0x05, 0x00, 0x00, 0x01]);

    stream.write_all(b"hello through socks").await.unwrap();
    let mut echoed = [0u8; 19];
    stream.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"hello through socks");
}

#[tokio::test]
async fn fixed_tunnel_end_to_end() {
    let echo = spawn_tcp_echo().await;
    let ss = spawn_ss_server("tun-e2e").await;

    let dialer = PriorityDialer::new(vec![(ss.to_string(), cipher("tun-e2e"))]);
    let inbound = TcpInbound::tunnel("127.0.0.1:0", &echo.to_string())
        .await
        .unwrap();
    let tun_addr = inbound.local_addr().unwrap();
    tokio::spawn(inbound.run(dialer));

    let mut stream = TcpStream::connect(tun_addr).await.unwrap();
    stream.write_all(b"no handshake needed").await.unwrap();
    let mut echoed = [0u8; 19];
    stream.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"no handshake needed");
}

#[tokio::test]
async fn aead_udp_echo_through_server() {
    let target = spawn_udp_echo().await;
    let server_addr = spawn_ss_udp_server("udp-e2e").await;

    // Client speaks the AEAD packet protocol directly.
    let client = ShadowUdp::new(
        UdpSocket::bind("127.0.0.1:0").await.unwrap(),
        cipher("udp-e2e"),
    );

    let mut request = Address::from(target.ip()).to_bytes(target.port());
    request.extend_from_slice(b"hi");
    client.send_to(&request, server_addr).await.unwrap();

    let mut buf = [0u8; 1500];
    let (n, _) = tokio::time::timeout(Duration::from_secs(5), client.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();

    // Reply carries the original source as a SOCKS5 header.
    let (source, source_port, header_len) = Address::split(&buf[..n]).unwrap();
    assert_eq!(source, Address::from(target.ip()));
    assert_eq!(source_port, target.port());
    assert_eq!(&buf[header_len..n], b"hi");
}

#[tokio::test]
async fn udp_tunnel_strips_reply_header() {
    let target = spawn_udp_echo().await;
    let server_addr = spawn_ss_udp_server("udptun-e2e").await;

    // Fixed-target tunnel on a kernel-assigned port: bind a probe socket to
    // learn a free address, then hand it to the tunnel.
    let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let tun_addr = probe.local_addr().unwrap();
    drop(probe);

    let tun_cipher = cipher("udptun-e2e");
    let tun_addr_str = tun_addr.to_string();
    let server_addr_str = server_addr.to_string();
    let target_str = target.to_string();
    tokio::spawn(async move {
        let _ = client::udp_tunnel(
            &tun_addr_str,
            &server_addr_str,
            &target_str,
            tun_cipher,
            Duration::from_secs(30),
        )
        .await;
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    // A plain local client: payload in, payload out, no headers visible.
    let user = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    user.send_to(b"tunnel me", tun_addr).await.unwrap();

    let mut buf = [0u8; 1500];
    let (n, _) = tokio::time::timeout(Duration::from_secs(5), user.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..n], b"tunnel me");
}

#[tokio::test]
async fn replayed_session_is_dropped() {
    let echo = spawn_tcp_echo().await;
    let ss = spawn_ss_server("replay-e2e").await;

    let c = cipher("replay-e2e");
    let mut header = Address::from(echo.ip()).to_bytes(echo.port());
    header.extend_from_slice(b"ping");

    // Record the exact wire bytes of one session (salt included).
    let wire = {
        let (a, mut b) = tokio::io::duplex(64 * 1024);
        let mut tx = ShadowStream::new(a, c.clone());
        tx.write_all(&header).await.unwrap();
        tx.shutdown().await.unwrap();
        drop(tx);
        let mut bytes = Vec::new();
        b.read_to_end(&mut bytes).await.unwrap();
        bytes
    };

    // First delivery: the salt is fresh, the session is served.
    let mut first = TcpStream::connect(ss).await.unwrap();
    first.write_all(&wire).await.unwrap();
    first.shutdown().await.unwrap();
    let mut reply = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(5), first.read_to_end(&mut reply)).await;
    assert!(!reply.is_empty(), "fresh salt should be served");

    // Byte-for-byte replay: dropped before any payload is forwarded.
    let mut second = TcpStream::connect(ss).await.unwrap();
    second.write_all(&wire).await.unwrap();
    second.shutdown().await.unwrap();
    let mut reply = Vec::new();
    let res = tokio::time::timeout(Duration::from_secs(5), second.read_to_end(&mut reply)).await;
    assert!(matches!(res, Ok(Ok(_))), "server should close the replay");
    assert!(reply.is_empty(), "replayed salt must not be served");
}
