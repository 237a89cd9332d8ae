//! Integration tests for `Terminal` sessions
//!
//! Terminals here talk over an in-process `MemoryNetwork`, so the whole
//! login, connect, sell and converge path runs without sockets. Each terminal
//! gets its own channel name unless a test wants two sessions on one device.
//!
//! Run: `cargo test -p billsync --test terminal_integration`

use std::path::Path;
use std::time::Duration;

use billsync::seed::default_users;
use billsync::{
    Config, Error, MemoryNetwork, Network, Product, SaleDetails, Store, StoreKey, Terminal, User,
    UserRole,
};
use tempfile::TempDir;

const ADMIN: (&str, &str) = ("MMC", "mmn123");
const HUB_ID: &str = "bb-hub-MMC";

fn cashier() -> User {
    User {
        id: "dev-1".into(),
        username: "counter1".into(),
        password: "pw1".into(),
        role: UserRole::Device,
        device_name: Some("Front Counter".into()),
        last_active: None,
        is_online: None,
        printer_settings: None,
    }
}

/// Write the user list a provisioned cashier terminal ships with
fn provision(dir: &Path) {
    let store = Store::open(dir).unwrap();
    let mut users = default_users();
    users.push(cashier());
    store.write(StoreKey::Users, &users).unwrap();
}

async fn boot(network: &MemoryNetwork, dir: &Path, channel: &str) -> Terminal {
    let config = Config::new(dir)
        .with_channel_name(channel)
        .with_heartbeat_interval(None);
    Terminal::boot(config, Network::Memory(network.clone()))
        .await
        .unwrap()
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {what}");
}

fn stock(terminal: &Terminal, product_id: &str) -> f64 {
    terminal
        .products()
        .unwrap()
        .into_iter()
        .find(|p| p.id == product_id)
        .unwrap()
        .stock_quantity
}

#[tokio::test]
async fn test_login_resolves_role() {
    let network = MemoryNetwork::new();
    let dir = TempDir::new().unwrap();
    let terminal = boot(&network, dir.path(), "term-login").await;

    assert!(terminal.current_user().is_none());
    assert!(matches!(
        terminal.login("MMC", "wrong").await,
        Err(Error::Auth(_))
    ));

    let user = terminal.login(ADMIN.0, ADMIN.1).await.unwrap();
    assert_eq!(user.role, UserRole::Admin);
    assert_eq!(terminal.identity().unwrap().id, HUB_ID);
    assert_eq!(terminal.status().hub_id.as_deref(), Some(HUB_ID));
    assert!(network.is_registered(HUB_ID));

    // A second login while online is refused
    assert!(matches!(
        terminal.login(ADMIN.0, ADMIN.1).await,
        Err(Error::Validation(_))
    ));

    terminal.logout().await.unwrap();
    assert!(terminal.current_user().is_none());
    assert!(!network.is_registered(HUB_ID));
    assert_eq!(terminal.status(), billsync::SyncStatus::default());
}

#[tokio::test]
async fn test_idle_terminal_reads_but_does_not_write() {
    let network = MemoryNetwork::new();
    let dir = TempDir::new().unwrap();
    let terminal = boot(&network, dir.path(), "term-idle").await;

    assert_eq!(terminal.products().unwrap().len(), 30);
    assert!(terminal.invoices().unwrap().is_empty());
    assert_eq!(terminal.settings().unwrap().active_company_id, "comp-mahavir");

    assert!(matches!(
        terminal.update_products(Vec::new()),
        Err(Error::NotLoggedIn)
    ));
    assert!(matches!(
        terminal.connect_hub(HUB_ID),
        Err(Error::NotLoggedIn)
    ));
}

#[tokio::test]
async fn test_device_bootstraps_and_sales_converge() {
    let network = MemoryNetwork::new();
    let hub_dir = TempDir::new().unwrap();
    let dev_dir = TempDir::new().unwrap();
    provision(dev_dir.path());

    let hub = boot(&network, hub_dir.path(), "term-e2e-hub").await;
    hub.login(ADMIN.0, ADMIN.1).await.unwrap();
    let mut products = hub.products().unwrap();
    products.iter_mut().find(|p| p.id == "p1").unwrap().stock_quantity = 5.0;
    hub.update_products(products).unwrap();

    let device = boot(&network, dev_dir.path(), "term-e2e-dev").await;
    device.login("counter1", "pw1").await.unwrap();
    assert!(device.status().hub_id.is_none());
    device.connect_hub(HUB_ID).unwrap();

    wait_until("device to reach hub", || {
        device.status().connected_peers == vec![HUB_ID.to_string()]
    })
    .await;
    wait_until("handshake", || stock(&device, "p1") == 5.0).await;

    // Sell two on the device
    let cart = device.add_to_cart("p1").unwrap();
    let line = cart.lines()[0].line_id.clone();
    device.change_cart_quantity(&line, 1.0).unwrap();
    let invoice = device
        .complete_sale(SaleDetails {
            customer_name: Some("Asha".into()),
            ..SaleDetails::default()
        })
        .unwrap();

    assert!(device.cart().is_empty());
    assert_eq!(invoice.device_name, "Front Counter");
    assert_eq!(invoice.total_amount, 240.0);
    assert_eq!(stock(&device, "p1"), 3.0);

    wait_until("hub to record the sale", || {
        hub.invoices().unwrap().iter().any(|i| i.id == invoice.id)
    })
    .await;
    assert_eq!(stock(&hub, "p1"), 3.0);
    assert_eq!(hub.sales_total(None).unwrap(), 240.0);
    assert_eq!(hub.invoices_for_company("comp-mahavir").unwrap().len(), 1);
    assert!(hub.invoices_for_company("comp-raunak").unwrap().is_empty());

    // Hub-side edits reach the device
    hub.set_active_company("comp-raunak").unwrap();
    wait_until("settings to reach device", || {
        device.settings().unwrap().active_company_id == "comp-raunak"
    })
    .await;
}

#[tokio::test]
async fn test_restored_device_reconnects_to_last_hub() {
    let network = MemoryNetwork::new();
    let hub_dir = TempDir::new().unwrap();
    let dev_dir = TempDir::new().unwrap();
    provision(dev_dir.path());

    let hub = boot(&network, hub_dir.path(), "term-restore-hub").await;
    hub.login(ADMIN.0, ADMIN.1).await.unwrap();

    let device = boot(&network, dev_dir.path(), "term-restore-dev").await;
    device.login("counter1", "pw1").await.unwrap();
    let first_id = device.identity().unwrap().id;
    device.connect_hub(HUB_ID).unwrap();
    wait_until("first connection", || !device.status().connected_peers.is_empty()).await;

    device.shutdown().await.unwrap();
    assert!(matches!(device.products(), Err(Error::Shutdown)));
    drop(device);
    wait_until("hub to notice", || hub.status().connected_peers.is_empty()).await;

    // Same store, new process
    let device = boot(&network, dev_dir.path(), "term-restore-dev").await;
    assert_eq!(device.current_user().unwrap().username, "counter1");
    assert_ne!(device.identity().unwrap().id, first_id);
    wait_until("automatic reconnection", || {
        device.status().connected_peers == vec![HUB_ID.to_string()]
    })
    .await;
}

#[tokio::test]
async fn test_sessions_on_one_device_share_updates() {
    let network = MemoryNetwork::new();
    let admin_dir = TempDir::new().unwrap();
    let cashier_dir = TempDir::new().unwrap();
    provision(cashier_dir.path());
    let channel = "term-same-device";

    let admin = boot(&network, admin_dir.path(), channel).await;
    admin.login(ADMIN.0, ADMIN.1).await.unwrap();
    let cashier = boot(&network, cashier_dir.path(), channel).await;
    cashier.login("counter1", "pw1").await.unwrap();

    admin
        .upsert_product(Product {
            id: "p-new".into(),
            company_id: "comp-mahavir".into(),
            item_code: "TX-900".into(),
            name: "Khadi".into(),
            price: 300.0,
            category: "Fabrics".into(),
            stock_quantity: 12.0,
            unit: "mtr".into(),
            gst_rate: 5.0,
        })
        .unwrap();

    wait_until("product on the other session", || {
        cashier.products().unwrap().iter().any(|p| p.id == "p-new")
    })
    .await;
    assert!(cashier.status().connected_peers.is_empty());
}

#[tokio::test]
async fn test_admin_helpers() {
    let network = MemoryNetwork::new();
    let dir = TempDir::new().unwrap();
    provision(dir.path());
    let terminal = boot(&network, dir.path(), "term-admin").await;
    let admin = terminal.login(ADMIN.0, ADMIN.1).await.unwrap();

    // Companies
    terminal.delete_company("comp-mahavir").unwrap();
    let settings = terminal.settings().unwrap();
    assert_eq!(settings.companies.len(), 1);
    assert_eq!(settings.active_company_id, "comp-raunak");
    assert!(terminal
        .products()
        .unwrap()
        .iter()
        .all(|p| p.company_id == "comp-raunak"));
    assert!(matches!(
        terminal.delete_company("comp-raunak"),
        Err(Error::Validation(_))
    ));

    // Products
    terminal.delete_product("r1").unwrap();
    assert!(matches!(
        terminal.delete_product("r1"),
        Err(Error::Validation(_))
    ));

    // Users
    let mut duplicate = cashier();
    duplicate.id = "dev-2".into();
    assert!(matches!(
        terminal.upsert_user(duplicate),
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        terminal.remove_user(&admin.id),
        Err(Error::Validation(_))
    ));
    terminal.remove_user("dev-1").unwrap();
    assert_eq!(terminal.users().unwrap().len(), 1);
}

#[tokio::test]
async fn test_cashier_cannot_use_admin_helpers() {
    let network = MemoryNetwork::new();
    let dir = TempDir::new().unwrap();
    provision(dir.path());
    let terminal = boot(&network, dir.path(), "term-cashier").await;
    terminal.login("counter1", "pw1").await.unwrap();

    assert!(matches!(
        terminal.delete_product("p1"),
        Err(Error::Auth(_))
    ));
    assert!(matches!(terminal.export_backup(), Err(Error::Auth(_))));
    assert!(matches!(terminal.remove_user("admin-1"), Err(Error::Auth(_))));

    // Switching the billing company is allowed
    terminal.set_active_company("comp-raunak").unwrap();
    assert_eq!(terminal.settings().unwrap().active_company_id, "comp-raunak");
}

#[tokio::test]
async fn test_backup_round_trip() {
    let network = MemoryNetwork::new();
    let dir = TempDir::new().unwrap();
    let terminal = boot(&network, dir.path(), "term-backup").await;
    terminal.login(ADMIN.0, ADMIN.1).await.unwrap();

    let backup = terminal.export_backup().unwrap();
    let value: serde_json::Value = serde_json::from_str(&backup).unwrap();
    assert_eq!(value["version"], "3.0");
    assert_eq!(value["products"].as_array().unwrap().len(), 30);

    terminal.delete_product("p1").unwrap();
    terminal.set_active_company("comp-raunak").unwrap();

    terminal.import_backup(&backup).unwrap();
    assert_eq!(terminal.products().unwrap().len(), 30);
    assert_eq!(terminal.settings().unwrap().active_company_id, "comp-mahavir");

    assert!(matches!(
        terminal.import_backup(r#"{"products": []}"#),
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        terminal.import_backup("not json"),
        Err(Error::Validation(_))
    ));
    assert_eq!(terminal.products().unwrap().len(), 30);
}

#[tokio::test]
async fn test_cart_survives_restart() {
    let network = MemoryNetwork::new();
    let dir = TempDir::new().unwrap();

    let terminal = boot(&network, dir.path(), "term-cart").await;
    terminal.login(ADMIN.0, ADMIN.1).await.unwrap();
    terminal.add_to_cart("p2").unwrap();
    terminal.add_to_cart("p2").unwrap();
    let cart = terminal.add_to_cart("p3").unwrap();
    assert_eq!(cart.lines().len(), 2);
    assert_eq!(cart.lines()[0].quantity, 2.0);
    assert!(matches!(
        terminal.add_to_cart("nope"),
        Err(Error::Validation(_))
    ));
    terminal.shutdown().await.unwrap();
    drop(terminal);

    let terminal = boot(&network, dir.path(), "term-cart").await;
    assert_eq!(terminal.cart(), cart);
    assert_eq!(terminal.cart().total(), 260.0);
}

#[tokio::test]
async fn test_empty_cart_cannot_be_sold() {
    let network = MemoryNetwork::new();
    let dir = TempDir::new().unwrap();
    let terminal = boot(&network, dir.path(), "term-empty-cart").await;
    terminal.login(ADMIN.0, ADMIN.1).await.unwrap();

    assert!(matches!(
        terminal.complete_sale(SaleDetails::default()),
        Err(Error::Validation(_))
    ));
    assert!(terminal.invoices().unwrap().is_empty());
}

#[tokio::test]
async fn test_reset_restores_defaults() {
    let network = MemoryNetwork::new();
    let dir = TempDir::new().unwrap();
    let terminal = boot(&network, dir.path(), "term-reset").await;
    terminal.login(ADMIN.0, ADMIN.1).await.unwrap();

    terminal.delete_product("p1").unwrap();
    terminal.add_to_cart("p2").unwrap();
    terminal.complete_sale(SaleDetails::default()).unwrap();
    terminal.add_to_cart("p2").unwrap();

    terminal.reset().await.unwrap();

    assert!(terminal.current_user().is_none());
    assert!(terminal.cart().is_empty());
    assert!(terminal.invoices().unwrap().is_empty());
    assert_eq!(terminal.products().unwrap().len(), 30);
    assert!(!network.is_registered(HUB_ID));
}

#[tokio::test]
async fn test_hub_id_cannot_be_claimed_twice() {
    let network = MemoryNetwork::new();
    let first_dir = TempDir::new().unwrap();
    let second_dir = TempDir::new().unwrap();

    let first = boot(&network, first_dir.path(), "term-claim-1").await;
    first.login(ADMIN.0, ADMIN.1).await.unwrap();
    let second = boot(&network, second_dir.path(), "term-claim-2").await;

    assert!(matches!(
        second.login(ADMIN.0, ADMIN.1).await,
        Err(Error::Identity(_))
    ));
    assert!(second.current_user().is_none());

    // The failed login is not remembered
    drop(second);
    let second = boot(&network, second_dir.path(), "term-claim-2").await;
    assert!(second.current_user().is_none());
}

#[tokio::test]
async fn test_logged_out_session_picks_up_new_cashier() {
    let network = MemoryNetwork::new();
    let admin_dir = TempDir::new().unwrap();
    let idle_dir = TempDir::new().unwrap();
    let channel = "term-idle-follow";

    let admin = boot(&network, admin_dir.path(), channel).await;
    admin.login(ADMIN.0, ADMIN.1).await.unwrap();
    let idle = boot(&network, idle_dir.path(), channel).await;
    assert!(idle.current_user().is_none());

    admin.upsert_user(cashier()).unwrap();

    wait_until("cashier on the logged-out session", || {
        idle.users().unwrap().iter().any(|u| u.username == "counter1")
    })
    .await;
    let user = idle.login("counter1", "pw1").await.unwrap();
    assert_eq!(user.id, "dev-1");

    // Persisted, so a restart still knows the cashier
    idle.logout().await.unwrap();
    drop(idle);
    let restarted = boot(&network, idle_dir.path(), "term-idle-follow-2").await;
    assert!(restarted
        .users()
        .unwrap()
        .iter()
        .any(|u| u.username == "counter1"));
}

#[tokio::test]
async fn test_boot_rejects_invalid_config() {
    let dir = TempDir::new().unwrap();
    let config = Config::new(dir.path()).with_channel_name("  ");
    assert!(matches!(
        Terminal::boot(config, Network::Memory(MemoryNetwork::new())).await,
        Err(Error::Config(_))
    ));

    let config = Config::new(dir.path())
        .with_channel_name("term-bad-heartbeat")
        .with_heartbeat_interval(Some(Duration::ZERO));
    assert!(matches!(
        Terminal::boot(config, Network::Memory(MemoryNetwork::new())).await,
        Err(Error::Config(_))
    ));
}
