//! Replicated records.
//!
//! These are the shapes that travel inside sync messages and sit in the local
//! store. Field names serialize in camelCase so stored JSON and wire payloads
//! share one schema.

use serde::{Deserialize, Serialize};

/// A catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    /// Stable product id
    pub id: String,
    /// Company that sells this product
    pub company_id: String,
    /// Short item code printed on receipts
    pub item_code: String,
    /// Display name
    pub name: String,
    /// Unit price, GST inclusive
    pub price: f64,
    /// Free-form grouping
    #[serde(default)]
    pub category: String,
    /// Units on hand; fractional for metered goods
    pub stock_quantity: f64,
    /// Unit label (`pcs`, `mtr`, `kg`, ...)
    pub unit: String,
    /// GST rate in percent
    pub gst_rate: f64,
}

/// Receipt branding shared by [`Company`] and the snapshot stored on each [`Invoice`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_top_line: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_line1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_line2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terms_line1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terms_line2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thank_you_emoji_start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thank_you_emoji_end: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_name_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_name_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_number_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_name_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_bold_item_names: Option<bool>,
}

/// A business the shop bills under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Company {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_secondary: Option<String>,
    pub gstin: String,
    pub upi_id: String,
    /// Prefix of generated invoice numbers
    pub invoice_prefix: String,
    #[serde(flatten)]
    pub branding: Branding,
}

/// The company directory plus the active company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    pub companies: Vec<Company>,
    pub active_company_id: String,
    /// Default GST rate as a fraction (0.05 = 5%)
    #[serde(default)]
    pub gst_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<String>,
}

impl AppSettings {
    /// The active company, falling back to the first one when the id is stale.
    #[must_use]
    pub fn active_company(&self) -> Option<&Company> {
        self.companies
            .iter()
            .find(|c| c.id == self.active_company_id)
            .or_else(|| self.companies.first())
    }
}

/// Role tag on a user record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// Shop administrator; runs the hub
    Admin,
    /// Cashier terminal
    Device,
}

/// How a terminal prints receipts. Replicated but not interpreted here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterConfig {
    pub paper_width: String,
    pub auto_print: bool,
    pub show_qr: bool,
    pub top_margin: f64,
    pub connection_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bluetooth_device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_time: Option<String>,
}

/// A login credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub password: String,
    pub role: UserRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_active: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_online: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub printer_settings: Option<PrinterConfig>,
}

impl User {
    /// Name shown on receipts for sales made by this user.
    #[must_use]
    pub fn terminal_name(&self) -> &str {
        self.device_name.as_deref().unwrap_or(&self.username)
    }
}

/// One line of a completed sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceItem {
    pub product_id: String,
    pub item_code: String,
    pub name: String,
    pub price: f64,
    pub quantity: f64,
    pub total: f64,
    pub unit: String,
    pub gst_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentMethod {
    #[default]
    Cash,
    Upi,
}

/// A completed sale with a snapshot of the seller's branding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: String,
    pub invoice_number: String,
    /// RFC 3339 timestamp
    pub date: String,
    pub items: Vec<InvoiceItem>,
    pub total_amount: f64,
    pub gst_amount: f64,
    pub base_amount: f64,
    pub device_id: String,
    pub device_name: String,
    pub company_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_name_secondary: Option<String>,
    pub gstin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upi_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub payment_method: PaymentMethod,
    #[serde(flatten)]
    pub branding: Branding,
}

/// Master data backup: catalog and settings only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    pub products: Vec<Product>,
    pub settings: AppSettings,
    pub timestamp: String,
    pub version: String,
}

/// Format version written into new backups.
pub const BACKUP_VERSION: &str = "3.0";

/// Round to three decimals, the precision stock quantities are kept at.
#[must_use]
pub fn round_stock(quantity: f64) -> f64 {
    (quantity * 1000.0).round() / 1000.0
}

/// Round to paise.
#[must_use]
pub fn round_money(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}
