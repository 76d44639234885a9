//! Backend connection accounting across concurrent clients
//!
//! Five clients fire one command each at the same moment. A cold pool has to
//! open five sockets, a warm one opens none, and a backend that drops every
//! connection forces exactly one fresh socket per request (the retry).

use std::sync::Arc;
use std::time::Duration;

use bson::doc;
use mongo_wire_proxy::Proxy;
use tokio::sync::Barrier;

use test_helpers::{MockBackend, TestClient, config_for, is_ok, op_msg, reply_document, start_proxy};

const CLIENTS: usize = 5;

/// Send one `ping` from each of `CLIENTS` connected clients at once and
/// return the reply documents
async fn ping_concurrently(clients: &mut Vec<TestClient>) -> Vec<bson::Document> {
    let barrier = Arc::new(Barrier::new(clients.len()));
    let handles: Vec<_> = clients
        .drain(..)
        .map(|mut client| {
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                let reply = client.request(op_msg(doc! { "ping": 1 })).await;
                (client, reply_document(&reply))
            })
        })
        .collect();

    let mut docs = Vec::new();
    for handle in handles {
        let (client, doc) = handle.await.unwrap();
        clients.push(client);
        docs.push(doc);
    }
    docs
}

async fn connect_all(addr: std::net::SocketAddr) -> Vec<TestClient> {
    let mut clients = Vec::new();
    for _ in 0..CLIENTS {
        clients.push(TestClient::connect(addr).await);
    }
    clients
}

async fn setup() -> (MockBackend, Proxy, Vec<TestClient>) {
    let backend = MockBackend::spawn().await;
    backend.set_reply_delay(Duration::from_millis(200));
    let (proxy, addr) = start_proxy(config_for(backend.addr), None).await;
    let clients = connect_all(addr).await;
    (backend, proxy, clients)
}

#[tokio::test]
async fn test_cold_pool_then_reuse() {
    let (_backend, proxy, mut clients) = setup().await;
    assert_eq!(proxy.connections_created(), 0);

    let docs = ping_concurrently(&mut clients).await;
    assert!(docs.iter().all(is_ok));
    assert_eq!(proxy.connections_created(), CLIENTS as u64);

    let docs = ping_concurrently(&mut clients).await;
    assert!(docs.iter().all(is_ok));
    assert_eq!(
        proxy.connections_created(),
        CLIENTS as u64,
        "warm connections must be reused"
    );
}

#[tokio::test]
async fn test_backend_fault_then_recovery() {
    let (backend, proxy, mut clients) = setup().await;

    ping_concurrently(&mut clients).await;
    assert_eq!(proxy.connections_created(), 5);

    // Every attempt is cut off: the warm connection fails, the retry opens
    // one fresh socket which fails too, and the client gets an error reply.
    backend.fail_on_command("ping");
    let docs = ping_concurrently(&mut clients).await;
    for doc in &docs {
        assert!(!is_ok(doc));
        assert_eq!(doc.get_i32("code").unwrap(), 6);
        assert_eq!(doc.get_str("codeName").unwrap(), "HostUnreachable");
    }
    assert_eq!(proxy.connections_created(), 10);

    // Clients stayed connected; the pool is empty so every request opens a
    // new socket.
    backend.clear_fault();
    let docs = ping_concurrently(&mut clients).await;
    assert!(docs.iter().all(is_ok));
    assert_eq!(proxy.connections_created(), 15);
}

#[tokio::test]
async fn test_counter_is_monotonic_across_shutdown() {
    let (_backend, proxy, mut clients) = setup().await;
    ping_concurrently(&mut clients).await;
    let before = proxy.connections_created();

    drop(clients);
    proxy.graceful_shutdown().await;

    assert_eq!(proxy.connections_created(), before);
    assert_eq!(proxy.active_sessions(), 0);
}
