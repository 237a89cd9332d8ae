//! Terminal session management
//!
//! This module contains the [`Terminal`] struct, the main entry point for
//! applications using billsync. It ties together:
//!
//! - **Local store**: Collections, session and cart persisted as JSON
//! - **Authentication**: Username/password login against the user list
//! - **Identity**: Hub or device id resolved from the logged-in user
//! - **Sync engine**: Driven by a background task over the transport and local bus
//! - **Collaborator API**: The calls a POS front end makes

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use iroh::Endpoint;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::bus::{LocalBus, LocalSubscription};
use crate::cart::{Cart, SaleDetails};
use crate::config::Config;
use crate::engine::{Collections, SyncEngine, SyncStatus};
use crate::error::{Error, Result};
use crate::identity::{last_hub, TerminalIdentity};
use crate::model::{AppSettings, Backup, Company, Invoice, Product, User, UserRole, BACKUP_VERSION};
use crate::protocol::SyncMessage;
use crate::store::{Store, StoreKey};
use crate::transport::{Network, PeerTransport, TransportEvents};

/// A logged-in session
struct Online {
    user: User,
    engine: Arc<Mutex<SyncEngine>>,
    transport: Arc<PeerTransport>,
    /// Sender to signal shutdown to the driver
    shutdown_tx: watch::Sender<bool>,
    /// Handle to the driver task
    driver: JoinHandle<()>,
}

/// Internal state of the terminal
enum Session {
    /// Nobody is logged in; collections live here
    Idle(Collections),
    /// A user is logged in; the engine owns the collections
    Online(Online),
    /// The terminal has been shut down
    Closed,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle(_) => write!(f, "Idle"),
            Self::Online(online) => f
                .debug_struct("Online")
                .field("user", &online.user.username)
                .field("transport", &online.transport)
                .finish(),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// One point-of-sale terminal.
///
/// # Lifecycle
///
/// 1. [`Terminal::boot()`] opens the store and restores a saved login
/// 2. [`Terminal::login()`] authenticates, opens the network and starts syncing
/// 3. The collaborator API ([`save_invoice`](Terminal::save_invoice),
///    [`update_products`](Terminal::update_products), ...) edits and broadcasts
/// 4. [`Terminal::logout()`] stops syncing and forgets the login;
///    [`Terminal::shutdown()`] stops syncing but keeps it for the next boot
///
/// While nobody is logged in the terminal still follows updates posted by
/// other sessions on the same device, so a user created elsewhere can log in.
///
/// Methods that touch the network must be called inside a tokio runtime.
#[derive(Debug)]
pub struct Terminal {
    config: Config,
    network: Network,
    store: Store,
    bus: LocalBus,
    session: Arc<Mutex<Session>>,
    cart: Mutex<Cart>,
    /// Stops the logged-out bus follower
    idle_shutdown: watch::Sender<bool>,
}

impl Terminal {
    /// Boot a terminal.
    ///
    /// This will:
    /// 1. Validate the configuration
    /// 2. Open the local store, seeding defaults on first run
    /// 3. Join the same-device broadcast channel
    /// 4. Restore the saved login, if the user still exists
    pub async fn boot(config: Config, network: Network) -> Result<Self> {
        config.validate()?;
        info!(path = %config.storage_path.display(), "Booting terminal");

        let store = Store::open(&config.storage_path)
            .map_err(|e| Error::init(format!("failed to open store: {e}")))?;
        let collections = Collections::load(&store);
        let cart = store.read(StoreKey::PosCart).unwrap_or_default();
        let bus = LocalBus::named(&config.channel_name);
        let session = Arc::new(Mutex::new(Session::Idle(collections)));

        let (idle_shutdown, idle_shutdown_rx) = watch::channel(false);
        let (_, subscription) = bus.port();
        tokio::spawn(follow_bus_while_idle(
            session.clone(),
            store.clone(),
            subscription,
            idle_shutdown_rx,
        ));

        let terminal = Self {
            config,
            network,
            store,
            bus,
            session,
            cart: Mutex::new(cart),
            idle_shutdown,
        };

        if let Some(saved) = terminal.store.read::<User>(StoreKey::CurrentUser) {
            let user = terminal.read(|c| c.users.iter().find(|u| u.id == saved.id).cloned())?;
            match user {
                Some(user) => {
                    info!(user = %user.username, "Restoring saved login");
                    if let Err(e) = terminal.start_session(user).await {
                        warn!(error = %e, "Failed to restore session, staying logged out");
                    }
                }
                None => {
                    warn!(user = %saved.username, "Saved login no longer exists");
                    terminal.store.remove(StoreKey::CurrentUser)?;
                }
            }
        }

        info!("Terminal ready");
        Ok(terminal)
    }

    /// Log in and start syncing.
    pub async fn login(&self, username: &str, password: &str) -> Result<User> {
        let user = match &*self.session.lock() {
            Session::Idle(collections) => collections
                .users
                .iter()
                .find(|u| u.username == username && u.password == password)
                .cloned()
                .ok_or_else(|| Error::auth("invalid username or password"))?,
            Session::Online(online) => {
                return Err(Error::validation(format!(
                    "{} is already logged in",
                    online.user.username
                )))
            }
            Session::Closed => return Err(Error::Shutdown),
        };

        self.store.write(StoreKey::CurrentUser, &user)?;
        if let Err(e) = self.start_session(user.clone()).await {
            let _ = self.store.remove(StoreKey::CurrentUser);
            return Err(e);
        }

        info!(user = %user.username, role = ?user.role, "Logged in");
        Ok(user)
    }

    /// Stop syncing and forget the login.
    pub async fn logout(&self) -> Result<()> {
        self.stop_session().await?;
        self.store.remove(StoreKey::CurrentUser)?;
        info!("Logged out");
        Ok(())
    }

    /// Stop syncing and close the terminal. The login is kept for the next boot.
    pub async fn shutdown(&self) -> Result<()> {
        self.stop_session().await?;
        let _ = self.idle_shutdown.send(true);
        *self.session.lock() = Session::Closed;
        info!("Terminal shut down");
        Ok(())
    }

    /// Wipe the store and return to first-run defaults. Logs out first.
    pub async fn reset(&self) -> Result<()> {
        self.stop_session().await?;
        self.store.clear()?;
        *self.cart.lock() = Cart::default();
        *self.session.lock() = Session::Idle(Collections::load(&self.store));
        warn!("Terminal reset to defaults");
        Ok(())
    }

    async fn start_session(&self, user: User) -> Result<()> {
        let identity = TerminalIdentity::resolve(&user);
        let (transport, events) = self.network.open(&identity.id, &self.config).await?;
        let transport = Arc::new(transport);

        let taken = {
            let mut session = self.session.lock();
            match std::mem::replace(&mut *session, Session::Closed) {
                Session::Idle(collections) => Ok(collections),
                Session::Online(online) => {
                    *session = Session::Online(online);
                    Err(Error::validation("a session is already running"))
                }
                Session::Closed => Err(Error::Shutdown),
            }
        };
        let collections = match taken {
            Ok(collections) => collections,
            Err(e) => {
                transport.close().await;
                return Err(e);
            }
        };

        let (port, subscription) = self.bus.port();
        let engine = Arc::new(Mutex::new(SyncEngine::new(
            identity.clone(),
            self.store.clone(),
            collections,
            port,
            transport.clone(),
            &self.config,
        )));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let driver = tokio::spawn(drive(
            engine.clone(),
            events,
            subscription,
            self.config.heartbeat_interval,
            shutdown_rx,
        ));

        *self.session.lock() = Session::Online(Online {
            user,
            engine: engine.clone(),
            transport,
            shutdown_tx,
            driver,
        });

        if !identity.is_hub() {
            if let Some(hub) = last_hub(&self.store) {
                info!(hub = %hub, "Reconnecting to last hub");
                engine.lock().connect_hub(&hub);
            }
        }
        Ok(())
    }

    /// Stop the driver and close the transport. Leaves the session idle.
    async fn stop_session(&self) -> Result<()> {
        let online = {
            let mut session = self.session.lock();
            match std::mem::replace(&mut *session, Session::Closed) {
                Session::Online(online) => online,
                Session::Idle(collections) => {
                    *session = Session::Idle(collections);
                    return Ok(());
                }
                Session::Closed => return Err(Error::Shutdown),
            }
        };

        let _ = online.shutdown_tx.send(true);
        if let Err(e) = online.driver.await {
            warn!(error = %e, "Sync driver ended abnormally");
        }
        let collections = online.engine.lock().shutdown();
        online.transport.close().await;

        *self.session.lock() = Session::Idle(collections);
        Ok(())
    }

    fn read<R>(&self, f: impl FnOnce(&Collections) -> R) -> Result<R> {
        match &*self.session.lock() {
            Session::Idle(collections) => Ok(f(collections)),
            Session::Online(online) => Ok(f(online.engine.lock().collections())),
            Session::Closed => Err(Error::Shutdown),
        }
    }

    fn with_engine<R>(&self, f: impl FnOnce(&mut SyncEngine, &User) -> R) -> Result<R> {
        match &*self.session.lock() {
            Session::Online(online) => Ok(f(&mut online.engine.lock(), &online.user)),
            Session::Idle(_) => Err(Error::NotLoggedIn),
            Session::Closed => Err(Error::Shutdown),
        }
    }

    fn with_admin<R>(&self, f: impl FnOnce(&mut SyncEngine) -> Result<R>) -> Result<R> {
        self.with_engine(|engine, user| {
            if user.role != UserRole::Admin {
                return Err(Error::auth("admin access required"));
            }
            f(engine)
        })?
    }

    // =========================================================================
    // Read-only state
    // =========================================================================

    /// The logged-in user
    #[must_use]
    pub fn current_user(&self) -> Option<User> {
        match &*self.session.lock() {
            Session::Online(online) => Some(online.user.clone()),
            _ => None,
        }
    }

    /// Network identity of the running session
    #[must_use]
    pub fn identity(&self) -> Option<TerminalIdentity> {
        match &*self.session.lock() {
            Session::Online(online) => Some(online.engine.lock().identity().clone()),
            _ => None,
        }
    }

    /// Sync status for UI indicators. Empty while logged out.
    #[must_use]
    pub fn status(&self) -> SyncStatus {
        match &*self.session.lock() {
            Session::Online(online) => online.engine.lock().status(),
            _ => SyncStatus::default(),
        }
    }

    /// The iroh endpoint of the running session, if it uses iroh
    #[must_use]
    pub fn endpoint(&self) -> Option<Endpoint> {
        match &*self.session.lock() {
            Session::Online(online) => match online.transport.as_ref() {
                PeerTransport::Iroh(transport) => Some(transport.endpoint().clone()),
                PeerTransport::Memory(_) => None,
            },
            _ => None,
        }
    }

    pub fn users(&self) -> Result<Vec<User>> {
        self.read(|c| c.users.clone())
    }

    pub fn products(&self) -> Result<Vec<Product>> {
        self.read(|c| c.products.clone())
    }

    /// Invoice log, newest first
    pub fn invoices(&self) -> Result<Vec<Invoice>> {
        self.read(|c| c.invoices.clone())
    }

    pub fn settings(&self) -> Result<AppSettings> {
        self.read(|c| c.settings.clone())
    }

    /// Invoices billed under one company, newest first
    pub fn invoices_for_company(&self, company_id: &str) -> Result<Vec<Invoice>> {
        self.read(|c| {
            c.invoices
                .iter()
                .filter(|i| i.company_id == company_id)
                .cloned()
                .collect()
        })
    }

    /// Sum of invoice totals, for one company or all of them
    pub fn sales_total(&self, company_id: Option<&str>) -> Result<f64> {
        self.read(|c| {
            c.invoices
                .iter()
                .filter(|i| company_id.map_or(true, |id| i.company_id == id))
                .map(|i| i.total_amount)
                .sum()
        })
    }

    // =========================================================================
    // Collaborator API
    // =========================================================================

    /// Record a completed sale and broadcast the stock change and the invoice.
    pub fn save_invoice(&self, invoice: Invoice) -> Result<()> {
        self.with_engine(|engine, _| engine.save_invoice(invoice))?
    }

    pub fn update_products(&self, products: Vec<Product>) -> Result<()> {
        self.with_engine(|engine, _| engine.update_products(products))?
    }

    pub fn update_settings(&self, settings: AppSettings) -> Result<()> {
        self.with_engine(|engine, _| engine.update_settings(settings))?
    }

    pub fn update_users(&self, users: Vec<User>) -> Result<()> {
        self.with_engine(|engine, _| engine.update_users(users))?
    }

    /// Replace the invoice log on this terminal without broadcasting.
    pub fn replace_invoices(&self, invoices: Vec<Invoice>) -> Result<()> {
        self.with_engine(|engine, _| engine.replace_invoices(invoices))?
    }

    /// Start connecting to a hub. Returns immediately; watch [`status`](Self::status).
    pub fn connect_hub(&self, hub_id: &str) -> Result<()> {
        self.with_engine(|engine, _| engine.connect_hub(hub_id))
    }

    // =========================================================================
    // Cart
    // =========================================================================

    /// The in-progress cart
    #[must_use]
    pub fn cart(&self) -> Cart {
        self.cart.lock().clone()
    }

    fn edit_cart(&self, f: impl FnOnce(&mut Cart) -> Result<()>) -> Result<Cart> {
        let mut cart = self.cart.lock();
        f(&mut cart)?;
        self.store.write(StoreKey::PosCart, &*cart)?;
        Ok(cart.clone())
    }

    /// Add one unit of a product to the cart
    pub fn add_to_cart(&self, product_id: &str) -> Result<Cart> {
        let product = self
            .read(|c| c.products.iter().find(|p| p.id == product_id).cloned())?
            .ok_or_else(|| Error::validation(format!("unknown product {product_id}")))?;
        self.edit_cart(|cart| {
            cart.add(&product);
            Ok(())
        })
    }

    /// Change a cart line's quantity by `delta` (never below 1)
    pub fn change_cart_quantity(&self, line_id: &str, delta: f64) -> Result<Cart> {
        self.edit_cart(|cart| {
            if cart.change_quantity(line_id, delta) {
                Ok(())
            } else {
                Err(Error::validation(format!("unknown cart line {line_id}")))
            }
        })
    }

    pub fn remove_from_cart(&self, line_id: &str) -> Result<Cart> {
        self.edit_cart(|cart| {
            if cart.remove(line_id) {
                Ok(())
            } else {
                Err(Error::validation(format!("unknown cart line {line_id}")))
            }
        })
    }

    pub fn clear_cart(&self) -> Result<()> {
        self.edit_cart(|cart| {
            cart.clear();
            Ok(())
        })
        .map(|_| ())
    }

    /// Bill the cart under the active company, record the sale, and empty the cart.
    pub fn complete_sale(&self, details: SaleDetails) -> Result<Invoice> {
        let cart = self.cart();
        let invoice = self.with_engine(|engine, user| -> Result<Invoice> {
            let invoice = cart.to_invoice(&engine.collections().settings, user, details)?;
            if let Err(e) = engine.save_invoice(invoice.clone()) {
                warn!(invoice = %invoice.id, error = %e, "Sale recorded but not fully persisted");
            }
            Ok(invoice)
        })??;

        self.clear_cart()?;
        Ok(invoice)
    }

    // =========================================================================
    // Admin helpers
    // =========================================================================

    /// Add a product, or replace the one with the same id.
    pub fn upsert_product(&self, product: Product) -> Result<()> {
        self.with_admin(|engine| {
            let mut products = engine.collections().products.clone();
            match products.iter_mut().find(|p| p.id == product.id) {
                Some(existing) => *existing = product,
                None => products.push(product),
            }
            engine.update_products(products)
        })
    }

    pub fn delete_product(&self, product_id: &str) -> Result<()> {
        self.with_admin(|engine| {
            let mut products = engine.collections().products.clone();
            let before = products.len();
            products.retain(|p| p.id != product_id);
            if products.len() == before {
                return Err(Error::validation(format!("unknown product {product_id}")));
            }
            engine.update_products(products)
        })
    }

    /// Add a company, or replace the one with the same id.
    pub fn upsert_company(&self, company: Company) -> Result<()> {
        self.with_admin(|engine| {
            let mut settings = engine.collections().settings.clone();
            match settings.companies.iter_mut().find(|c| c.id == company.id) {
                Some(existing) => *existing = company,
                None => settings.companies.push(company),
            }
            engine.update_settings(settings)
        })
    }

    /// Delete a company and its products.
    ///
    /// The last company cannot be deleted. Deleting the active company
    /// activates the first remaining one.
    pub fn delete_company(&self, company_id: &str) -> Result<()> {
        self.with_admin(|engine| {
            let mut settings = engine.collections().settings.clone();
            if settings.companies.len() <= 1 {
                return Err(Error::validation("at least one company must exist"));
            }
            if !settings.companies.iter().any(|c| c.id == company_id) {
                return Err(Error::validation(format!("unknown company {company_id}")));
            }

            settings.companies.retain(|c| c.id != company_id);
            if settings.active_company_id == company_id {
                if let Some(first) = settings.companies.first() {
                    settings.active_company_id = first.id.clone();
                }
            }
            let products: Vec<Product> = engine
                .collections()
                .products
                .iter()
                .filter(|p| p.company_id != company_id)
                .cloned()
                .collect();

            let settings_saved = engine.update_settings(settings);
            let products_saved = engine.update_products(products);
            settings_saved.and(products_saved)
        })
    }

    /// Switch the company new sales are billed under. Any logged-in user may do this.
    pub fn set_active_company(&self, company_id: &str) -> Result<()> {
        self.with_engine(|engine, _| {
            let mut settings = engine.collections().settings.clone();
            if !settings.companies.iter().any(|c| c.id == company_id) {
                return Err(Error::validation(format!("unknown company {company_id}")));
            }
            settings.active_company_id = company_id.to_string();
            engine.update_settings(settings)
        })?
    }

    /// Add a user, or replace the one with the same id.
    pub fn upsert_user(&self, user: User) -> Result<()> {
        self.with_admin(|engine| {
            let mut users = engine.collections().users.clone();
            if users
                .iter()
                .any(|u| u.username == user.username && u.id != user.id)
            {
                return Err(Error::validation(format!(
                    "username {} is taken",
                    user.username
                )));
            }
            match users.iter_mut().find(|u| u.id == user.id) {
                Some(existing) => *existing = user,
                None => users.push(user),
            }
            engine.update_users(users)
        })
    }

    /// Remove a user. The logged-in user cannot remove themselves.
    pub fn remove_user(&self, user_id: &str) -> Result<()> {
        self.with_engine(|engine, current| {
            if current.role != UserRole::Admin {
                return Err(Error::auth("admin access required"));
            }
            if current.id == user_id {
                return Err(Error::validation("cannot remove the logged-in user"));
            }
            let mut users = engine.collections().users.clone();
            let before = users.len();
            users.retain(|u| u.id != user_id);
            if users.len() == before {
                return Err(Error::validation(format!("unknown user {user_id}")));
            }
            engine.update_users(users)
        })?
    }

    // =========================================================================
    // Backup
    // =========================================================================

    /// Export the catalog and settings as a JSON backup.
    pub fn export_backup(&self) -> Result<String> {
        let backup = self.with_admin(|engine| {
            let state = engine.collections();
            Ok(Backup {
                products: state.products.clone(),
                settings: state.settings.clone(),
                timestamp: Utc::now().to_rfc3339(),
                version: BACKUP_VERSION.to_string(),
            })
        })?;
        serde_json::to_string_pretty(&backup)
            .map_err(|e| Error::storage(format!("failed to serialize backup: {e}")))
    }

    /// Restore the catalog and settings from a backup, broadcasting both.
    ///
    /// The backup must contain `products` and `settings`; other fields are ignored.
    pub fn import_backup(&self, json: &str) -> Result<()> {
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| Error::validation(format!("failed to parse backup: {e}")))?;

        let (Some(products), Some(settings)) = (value.get("products"), value.get("settings")) else {
            return Err(Error::validation("backup must contain products and settings"));
        };
        let products: Vec<Product> = serde_json::from_value(products.clone())
            .map_err(|e| Error::validation(format!("invalid products in backup: {e}")))?;
        let settings: AppSettings = serde_json::from_value(settings.clone())
            .map_err(|e| Error::validation(format!("invalid settings in backup: {e}")))?;

        if let Some(version) = value.get("version").and_then(|v| v.as_str()) {
            debug!(version, "Importing backup");
        }

        self.with_admin(|engine| {
            let products_saved = engine.update_products(products);
            let settings_saved = engine.update_settings(settings);
            products_saved.and(settings_saved)
        })
    }
}

impl Drop for Terminal {
    fn drop(&mut self) {
        let _ = self.idle_shutdown.send(true);
        if let Session::Online(online) = &*self.session.lock() {
            let _ = online.shutdown_tx.send(true);
        }
    }
}

/// Apply same-device frames to the collections while nobody is logged in.
///
/// Online sessions get the same frames through their engine, so this only
/// acts on an idle session.
async fn follow_bus_while_idle(
    session: Arc<Mutex<Session>>,
    store: Store,
    mut bus: LocalSubscription,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            frame = bus.recv() => {
                let Some(frame) = frame else {
                    break;
                };
                apply_idle_frame(&session, &store, &frame);
            }
        }
    }
    debug!("Idle bus follower stopped");
}

fn apply_idle_frame(session: &Mutex<Session>, store: &Store, frame: &[u8]) {
    let mut session = session.lock();
    let Session::Idle(collections) = &mut *session else {
        return;
    };
    match SyncMessage::decode(frame) {
        Ok(message) => {
            if collections.apply(&message.payload, store) {
                debug!(kind = ?message.kind(), sender = %message.sender_id, "Applied update while logged out");
            }
        }
        Err(e) => warn!(error = %e, "Dropping malformed local message"),
    }
}

/// Wait for the next heartbeat tick, or forever when heartbeats are off.
async fn next_heartbeat(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// The session driver: feeds transport events and bus frames to the engine one at a time.
async fn drive(
    engine: Arc<Mutex<SyncEngine>>,
    mut events: TransportEvents,
    mut bus: LocalSubscription,
    heartbeat: Option<Duration>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut heartbeat = heartbeat.map(|period| {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval
    });

    info!("Sync driver started");
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Sync driver received shutdown signal");
                    break;
                }
            }
            event = events.recv() => {
                let Some(event) = event else {
                    debug!("Transport event channel closed");
                    break;
                };
                engine.lock().handle_transport_event(event);
            }
            frame = bus.recv() => {
                let Some(frame) = frame else {
                    debug!("Local bus closed");
                    break;
                };
                engine.lock().handle_local_frame(&frame);
            }
            () = next_heartbeat(&mut heartbeat) => {
                engine.lock().send_heartbeat();
            }
        }
    }
    info!("Sync driver stopped");
}
