//! Basic usage example for billsync.
//!
//! This example runs a hub and a cashier terminal in one process over the
//! in-memory network:
//! - Booting terminals and logging in
//! - Connecting a device to the hub
//! - Ringing up a sale from the cart
//! - Watching the sale and stock change reach the hub
//! - Graceful shutdown
//!
//! Run with: cargo run --example basic_usage

use std::time::Duration;

use billsync::seed::default_users;
use billsync::{
    Config, MemoryNetwork, Network, PaymentMethod, SaleDetails, Store, StoreKey, Terminal, User,
    UserRole,
};

#[tokio::main]
async fn main() -> billsync::Result<()> {
    // Initialize logging for visibility
    tracing_subscriber::fmt::init();

    println!("=== billsync Basic Usage Example ===\n");

    let root = std::env::temp_dir().join("billsync-example");
    let hub_path = root.join("hub");
    let counter_path = root.join("counter");
    let network = MemoryNetwork::new();

    // -------------------------------------------------------------------------
    // Step 1: Start the hub
    // -------------------------------------------------------------------------
    println!("1. Starting the hub terminal...");

    let hub = Terminal::boot(
        Config::new(&hub_path).with_channel_name("example-hub"),
        Network::Memory(network.clone()),
    )
    .await?;
    if hub.current_user().is_none() {
        hub.login("MMC", "mmn123").await?;
    }
    let hub_id = hub.status().hub_id.unwrap_or_default();
    println!("   Hub id: {hub_id}\n");

    // -------------------------------------------------------------------------
    // Step 2: Provision and start a cashier terminal
    // -------------------------------------------------------------------------
    println!("2. Starting a cashier terminal...");

    let mut users = default_users();
    users.push(User {
        id: "dev-counter".to_string(),
        username: "counter1".to_string(),
        password: "secret".to_string(),
        role: UserRole::Device,
        device_name: Some("Front Counter".to_string()),
        last_active: None,
        is_online: None,
        printer_settings: None,
    });
    Store::open(&counter_path)?.write(StoreKey::Users, &users)?;

    let counter = Terminal::boot(
        Config::new(&counter_path).with_channel_name("example-counter"),
        Network::Memory(network),
    )
    .await?;
    if counter.current_user().is_none() {
        counter.login("counter1", "secret").await?;
    }
    counter.connect_hub(&hub_id)?;

    while counter.status().connected_peers.is_empty() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    println!("   Connected peers: {:?}\n", counter.status().connected_peers);

    // -------------------------------------------------------------------------
    // Step 3: Ring up a sale
    // -------------------------------------------------------------------------
    println!("3. Ringing up a sale...");

    let cart = counter.add_to_cart("p1")?;
    counter.change_cart_quantity(&cart.lines()[0].line_id, 2.0)?;
    counter.add_to_cart("p3")?;
    println!("   Cart total: {}", counter.cart().total());

    let invoice = counter.complete_sale(SaleDetails {
        payment_method: PaymentMethod::Upi,
        customer_name: Some("Walk-in".to_string()),
        ..SaleDetails::default()
    })?;
    println!(
        "   Billed {} for {} (GST {})\n",
        invoice.invoice_number, invoice.total_amount, invoice.gst_amount
    );

    // -------------------------------------------------------------------------
    // Step 4: Check the hub
    // -------------------------------------------------------------------------
    println!("4. Checking the hub...");

    while !hub.invoices()?.iter().any(|i| i.id == invoice.id) {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let stock = hub
        .products()?
        .into_iter()
        .find(|p| p.id == "p1")
        .map(|p| p.stock_quantity);
    println!("   Hub sales total: {}", hub.sales_total(None)?);
    println!("   Hub stock of p1: {stock:?}\n");

    // -------------------------------------------------------------------------
    // Step 5: Graceful shutdown
    // -------------------------------------------------------------------------
    println!("5. Shutting down...");

    counter.shutdown().await?;
    hub.shutdown().await?;
    println!("   Both terminals stopped. Run again to resume the same logins.\n");

    println!("=== Example Complete ===");
    Ok(())
}
