//! End-to-end tests for the accept loop and session dispatch

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tcpfwd::{Config, ConnectionManager};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Backend that echoes every connection, except ones opening with `RESET`
/// which it aborts with an RST
async fn start_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut head = [0u8; 5];
                if stream.read_exact(&mut head).await.is_err() {
                    return;
                }
                if &head == b"RESET" {
                    let _ = socket2::SockRef::from(&stream).set_linger(Some(Duration::ZERO));
                    return;
                }
                if stream.write_all(&head).await.is_err() {
                    return;
                }
                let (mut rd, mut wr) = stream.into_split();
                let _ = tokio::io::copy(&mut rd, &mut wr).await;
            });
        }
    });

    addr
}

/// An address nothing listens on
fn refused_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

fn test_config() -> Arc<Config> {
    let mut config = Config::default();
    config.server.listen_backlog = 16;
    config.server.shutdown_timeout = Duration::from_secs(2);
    Arc::new(config)
}

fn start_forwarder(
    bind: &[SocketAddr],
    connect: Vec<SocketAddr>,
) -> (Arc<ConnectionManager>, JoinHandle<tcpfwd::Result<()>>) {
    let manager =
        Arc::new(ConnectionManager::bind(test_config(), bind, connect.into()).unwrap());
    let runner = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.run().await })
    };
    (manager, runner)
}

async fn echo_roundtrip(forwarder: SocketAddr, message: &[u8]) -> Vec<u8> {
    let mut client = TcpStream::connect(forwarder).await.unwrap();
    client.write_all(message).await.unwrap();

    let mut reply = vec![0u8; message.len()];
    timeout(Duration::from_secs(5), client.read_exact(&mut reply))
        .await
        .expect("reply should arrive")
        .unwrap();
    reply
}

async fn wait_for_idle(manager: &ConnectionManager) {
    for _ in 0..50 {
        if manager.get_active_sessions() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("sessions still active: {}", manager.get_active_sessions());
}

#[tokio::test]
async fn test_forwards_to_backend() {
    let backend = start_backend().await;
    let bind: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let (manager, runner) = start_forwarder(&[bind], vec![backend]);

    let addrs = manager.local_addrs();
    assert_eq!(addrs.len(), 1);
    assert_ne!(addrs[0].port(), 0);

    let reply = echo_roundtrip(addrs[0], b"HELLO, forwarder").await;
    assert_eq!(reply, b"HELLO, forwarder");

    wait_for_idle(&manager).await;
    assert_eq!(manager.get_connection_stats().total_sessions_started, 1);

    manager.initiate_shutdown();
    timeout(Duration::from_secs(5), runner)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_falls_back_to_next_candidate() {
    let backend = start_backend().await;
    let bind: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let (manager, _runner) =
        start_forwarder(&[bind], vec![refused_addr(), refused_addr(), backend]);

    let reply = echo_roundtrip(manager.local_addrs()[0], b"HELLO again").await;
    assert_eq!(reply, b"HELLO again");

    manager.initiate_shutdown();
}

#[tokio::test]
async fn test_unreachable_target_closes_client() {
    let bind: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let (manager, _runner) = start_forwarder(&[bind], vec![refused_addr()]);

    let mut client = TcpStream::connect(manager.local_addrs()[0]).await.unwrap();
    let mut buf = [0u8; 16];
    let read = timeout(Duration::from_secs(5), client.read(&mut buf))
        .await
        .expect("client should be disconnected");
    assert!(matches!(read, Ok(0) | Err(_)));

    wait_for_idle(&manager).await;

    // The accept loop keeps serving after a failed session
    assert!(!manager.is_shutting_down());
    let mut second = TcpStream::connect(manager.local_addrs()[0]).await.unwrap();
    let read = timeout(Duration::from_secs(5), second.read(&mut buf))
        .await
        .expect("second client should be disconnected");
    assert!(matches!(read, Ok(0) | Err(_)));

    manager.initiate_shutdown();
}

#[tokio::test]
async fn test_reset_session_does_not_affect_others() {
    let backend = start_backend().await;
    let bind: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let (manager, _runner) = start_forwarder(&[bind], vec![backend]);
    let forwarder = manager.local_addrs()[0];

    let mut healthy = TcpStream::connect(forwarder).await.unwrap();
    healthy.write_all(b"HELLO").await.unwrap();
    let mut head = [0u8; 5];
    timeout(Duration::from_secs(5), healthy.read_exact(&mut head))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&head, b"HELLO");

    let mut doomed = TcpStream::connect(forwarder).await.unwrap();
    doomed.write_all(b"RESET").await.unwrap();
    let mut buf = [0u8; 16];
    let read = timeout(Duration::from_secs(5), doomed.read(&mut buf))
        .await
        .expect("reset session should be torn down");
    assert!(matches!(read, Ok(0) | Err(_)));

    // The first session is still relaying
    healthy.write_all(b"still here").await.unwrap();
    let mut reply = [0u8; 10];
    timeout(Duration::from_secs(5), healthy.read_exact(&mut reply))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&reply, b"still here");

    drop(healthy);
    wait_for_idle(&manager).await;
    manager.initiate_shutdown();
}

#[tokio::test]
async fn test_concurrent_sessions() {
    let backend = start_backend().await;
    let bind: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let (manager, _runner) = start_forwarder(&[bind], vec![backend]);
    let forwarder = manager.local_addrs()[0];

    let clients: Vec<_> = (0..8)
        .map(|i| {
            tokio::spawn(async move {
                let message = format!("HELLO from client {i}").into_bytes();
                let reply = echo_roundtrip(forwarder, &message).await;
                assert_eq!(reply, message);
            })
        })
        .collect();

    for client in clients {
        client.await.unwrap();
    }

    wait_for_idle(&manager).await;
    assert_eq!(manager.get_connection_stats().total_sessions_started, 8);
    manager.initiate_shutdown();
}

#[tokio::test]
async fn test_dual_stack_listeners() {
    if std::net::TcpListener::bind("[::1]:0").is_err() {
        eprintln!("IPv6 loopback unavailable, skipping");
        return;
    }

    let backend = start_backend().await;
    let bind: Vec<SocketAddr> = vec![
        "127.0.0.1:0".parse().unwrap(),
        "[::1]:0".parse().unwrap(),
    ];
    let (manager, _runner) = start_forwarder(&bind, vec![backend]);

    let addrs = manager.local_addrs();
    assert_eq!(addrs.len(), 2);
    assert!(addrs.iter().any(|a| a.is_ipv4()));
    assert!(addrs.iter().any(|a| a.is_ipv6()));

    for addr in addrs {
        let reply = echo_roundtrip(addr, b"HELLO dual stack").await;
        assert_eq!(reply, b"HELLO dual stack");
    }

    manager.initiate_shutdown();
}

#[tokio::test]
async fn test_shutdown_waits_for_open_sessions() {
    let backend = start_backend().await;
    let bind: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let (manager, runner) = start_forwarder(&[bind], vec![backend]);

    let mut client = TcpStream::connect(manager.local_addrs()[0]).await.unwrap();
    client.write_all(b"HELLO").await.unwrap();
    let mut head = [0u8; 5];
    client.read_exact(&mut head).await.unwrap();
    assert_eq!(manager.get_active_sessions(), 1);

    manager.initiate_shutdown();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!runner.is_finished(), "run returned with a session open");

    drop(client);
    timeout(Duration::from_secs(5), runner)
        .await
        .expect("run should return once the session closes")
        .unwrap()
        .unwrap();
    assert_eq!(manager.get_active_sessions(), 0);
}
