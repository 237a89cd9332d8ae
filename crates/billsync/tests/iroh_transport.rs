//! Integration tests for the iroh transport
//!
//! These tests verify that terminals can:
//! 1. Dial each other by terminal id and exchange frames
//! 2. Reject a peer whose key does not match the id it claims
//! 3. Run a full hub/device session over QUIC
//!
//! Note: These tests use RelayMode::Disabled and no discovery; endpoints
//! learn each other's addresses directly.
//!
//! Run: `cargo test -p billsync --test iroh_transport`

use std::time::Duration;

use billsync::seed::default_users;
use billsync::transport::{IrohTransport, TransportEvent, TransportEvents};
use billsync::{Config, Network, Store, StoreKey, Terminal, User, UserRole, ALPN};
use bytes::Bytes;
use iroh::{Endpoint, RelayMode, SecretKey, Watcher};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::timeout;

const HUB_ID: &str = "bb-hub-IrohTest";
const DEVICE_ID: &str = "bb-dev-iroh01";

fn local_config(dir: &std::path::Path) -> Config {
    Config::new(dir)
        .with_local_only(true)
        .with_discovery(false)
        .with_heartbeat_interval(None)
}

async fn open_transport(id: &str) -> (IrohTransport, TransportEvents) {
    let (tx, rx) = mpsc::unbounded_channel();
    let transport = IrohTransport::open(id, &local_config("unused".as_ref()), tx)
        .await
        .expect("failed to open transport");
    (transport, rx)
}

/// Teach each endpoint the other's direct addresses
async fn introduce(a: &Endpoint, b: &Endpoint) {
    let a_addr = a
        .node_addr()
        .initialized()
        .await
        .expect("endpoint has no address");
    let b_addr = b
        .node_addr()
        .initialized()
        .await
        .expect("endpoint has no address");
    a.add_node_addr(b_addr).expect("failed to add addr");
    b.add_node_addr(a_addr).expect("failed to add addr");
}

async fn next_event(events: &mut TransportEvents) -> TransportEvent {
    timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("timed out waiting for transport event")
        .expect("event channel closed")
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let result = timeout(Duration::from_secs(15), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {what}");
}

#[tokio::test]
async fn test_dial_by_terminal_id() {
    let (hub, mut hub_events) = open_transport(HUB_ID).await;
    let (device, mut device_events) = open_transport(DEVICE_ID).await;
    introduce(hub.endpoint(), device.endpoint()).await;

    device.connect(HUB_ID);

    let device_link = match next_event(&mut device_events).await {
        TransportEvent::Opened { peer, link } => {
            assert_eq!(peer, HUB_ID);
            link
        }
        other => panic!("expected Opened, got {other:?}"),
    };
    match next_event(&mut hub_events).await {
        TransportEvent::Connecting { peer } => assert_eq!(peer, DEVICE_ID),
        other => panic!("expected Connecting, got {other:?}"),
    }
    let hub_link = match next_event(&mut hub_events).await {
        TransportEvent::Opened { peer, link } => {
            assert_eq!(peer, DEVICE_ID);
            link
        }
        other => panic!("expected Opened, got {other:?}"),
    };

    assert!(device_link.send(Bytes::from_static(b"{\"ping\":1}")));
    match next_event(&mut hub_events).await {
        TransportEvent::Data { peer, bytes } => {
            assert_eq!(peer, DEVICE_ID);
            assert_eq!(&bytes[..], b"{\"ping\":1}");
        }
        other => panic!("expected Data, got {other:?}"),
    }

    assert!(hub_link.send(Bytes::from_static(b"{\"pong\":1}")));
    match next_event(&mut device_events).await {
        TransportEvent::Data { peer, bytes } => {
            assert_eq!(peer, HUB_ID);
            assert_eq!(&bytes[..], b"{\"pong\":1}");
        }
        other => panic!("expected Data, got {other:?}"),
    }

    device.close().await;
    match next_event(&mut hub_events).await {
        TransportEvent::Closed { peer } => assert_eq!(peer, DEVICE_ID),
        other => panic!("expected Closed, got {other:?}"),
    }

    hub.close().await;
}

#[tokio::test]
async fn test_unreachable_peer_reports_closed() {
    let (device, mut events) = open_transport(DEVICE_ID).await;

    device.connect("bb-hub-NobodyHome");

    match next_event(&mut events).await {
        TransportEvent::Closed { peer } => assert_eq!(peer, "bb-hub-NobodyHome"),
        other => panic!("expected Closed, got {other:?}"),
    }
    device.close().await;
}

#[tokio::test]
async fn test_mismatched_identity_is_rejected() {
    let (hub, mut hub_events) = open_transport(HUB_ID).await;

    // A node with an unrelated key claiming to be a known device
    let impostor = Endpoint::builder()
        .secret_key(SecretKey::generate(rand::thread_rng()))
        .alpns(vec![ALPN.to_vec()])
        .relay_mode(RelayMode::Disabled)
        .bind()
        .await
        .expect("failed to bind endpoint");
    introduce(hub.endpoint(), &impostor).await;

    let conn = impostor
        .connect(hub.endpoint().node_id(), ALPN)
        .await
        .expect("failed to connect");
    let (mut send, _recv) = conn.open_bi().await.expect("failed to open stream");
    let hello = DEVICE_ID.as_bytes();
    send.write_all(&(hello.len() as u32).to_be_bytes())
        .await
        .unwrap();
    send.write_all(hello).await.unwrap();

    timeout(Duration::from_secs(10), conn.closed())
        .await
        .expect("hub did not close the connection");
    assert!(hub_events.try_recv().is_err());

    impostor.close().await;
    hub.close().await;
}

fn cashier() -> User {
    User {
        id: "dev-iroh".into(),
        username: "counter-iroh".into(),
        password: "pw".into(),
        role: UserRole::Device,
        device_name: None,
        last_active: None,
        is_online: None,
        printer_settings: None,
    }
}

#[tokio::test]
async fn test_terminals_sync_over_iroh() {
    let hub_dir = TempDir::new().unwrap();
    let dev_dir = TempDir::new().unwrap();
    {
        let store = Store::open(dev_dir.path()).unwrap();
        let mut users = default_users();
        users.push(cashier());
        store.write(StoreKey::Users, &users).unwrap();
    }

    let hub = Terminal::boot(
        local_config(hub_dir.path()).with_channel_name("iroh-e2e-hub"),
        Network::iroh(),
    )
    .await
    .unwrap();
    hub.login("MMC", "mmn123").await.unwrap();

    let device = Terminal::boot(
        local_config(dev_dir.path()).with_channel_name("iroh-e2e-dev"),
        Network::iroh(),
    )
    .await
    .unwrap();
    device.login("counter-iroh", "pw").await.unwrap();

    introduce(&hub.endpoint().unwrap(), &device.endpoint().unwrap()).await;
    device.connect_hub("bb-hub-MMC").unwrap();

    wait_until("device to reach hub", || {
        device.status().connected_peers == vec!["bb-hub-MMC".to_string()]
    })
    .await;

    hub.delete_product("p15").unwrap();
    wait_until("catalog update on device", || {
        device.products().unwrap().len() == 29
    })
    .await;

    device.add_to_cart("p1").unwrap();
    let invoice = device
        .complete_sale(billsync::SaleDetails::default())
        .unwrap();
    wait_until("invoice on hub", || {
        hub.invoices().unwrap().iter().any(|i| i.id == invoice.id)
    })
    .await;
    assert_eq!(invoice.device_name, "counter-iroh");

    device.logout().await.unwrap();
    wait_until("hub to drop the device", || {
        hub.status().connected_peers.is_empty()
    })
    .await;
    hub.shutdown().await.unwrap();
}
