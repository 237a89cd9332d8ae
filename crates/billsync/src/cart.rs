//! Point-of-sale cart.
//!
//! The cart is local to one terminal and never replicated; it is persisted
//! under `pos_cart` so a restart does not lose a half-rung sale. Completing
//! a sale turns the cart into an [`Invoice`] for the active company.

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{round_money, AppSettings, Invoice, InvoiceItem, PaymentMethod, Product, User};

/// One product line in the cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub line_id: String,
    pub product_id: String,
    #[serde(default)]
    pub item_code: String,
    pub quantity: f64,
    pub price: f64,
    pub name: String,
    pub unit: String,
    pub gst_rate: f64,
}

impl CartLine {
    /// Price times quantity
    #[must_use]
    pub fn total(&self) -> f64 {
        self.price * self.quantity
    }
}

/// Customer and payment details captured at checkout.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaleDetails {
    pub payment_method: PaymentMethod,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub notes: Option<String>,
}

/// The in-progress sale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cart {
    lines: Vec<CartLine>,
}

impl Cart {
    /// Lines in the order they were added
    #[must_use]
    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Add one unit of a product, or bump its existing line.
    pub fn add(&mut self, product: &Product) {
        if let Some(line) = self.lines.iter_mut().find(|l| l.product_id == product.id) {
            line.quantity += 1.0;
            return;
        }
        self.lines.push(CartLine {
            line_id: format!(
                "li-{}-{:04}",
                Utc::now().timestamp_millis(),
                rand::thread_rng().gen_range(0..10_000)
            ),
            product_id: product.id.clone(),
            item_code: product.item_code.clone(),
            quantity: 1.0,
            price: product.price,
            name: product.name.clone(),
            unit: product.unit.clone(),
            gst_rate: product.gst_rate,
        });
    }

    /// Change a line's quantity by `delta`. Quantities never drop below 1.
    ///
    /// Returns `false` if no line has this id.
    pub fn change_quantity(&mut self, line_id: &str, delta: f64) -> bool {
        match self.lines.iter_mut().find(|l| l.line_id == line_id) {
            Some(line) => {
                line.quantity = (line.quantity + delta).max(1.0);
                true
            }
            None => false,
        }
    }

    /// Remove a line. Returns `false` if no line has this id.
    pub fn remove(&mut self, line_id: &str) -> bool {
        let before = self.lines.len();
        self.lines.retain(|l| l.line_id != line_id);
        self.lines.len() != before
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Sum of line totals, GST inclusive.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.lines.iter().map(CartLine::total).sum()
    }

    /// Build the invoice for this cart, billed by `user` under the active company.
    ///
    /// Prices are GST inclusive, so each line's tax is `total * rate / (100 + rate)`.
    pub fn to_invoice(&self, settings: &AppSettings, user: &User, details: SaleDetails) -> Result<Invoice> {
        if self.lines.is_empty() {
            return Err(Error::validation("cart is empty"));
        }
        let company = settings
            .active_company()
            .ok_or_else(|| Error::validation("no company configured"))?;

        let items: Vec<InvoiceItem> = self
            .lines
            .iter()
            .map(|line| InvoiceItem {
                product_id: line.product_id.clone(),
                item_code: line.item_code.clone(),
                name: line.name.clone(),
                price: line.price,
                quantity: line.quantity,
                total: round_money(line.total()),
                unit: line.unit.clone(),
                gst_rate: line.gst_rate,
            })
            .collect();

        let total = self.total();
        let gst: f64 = self
            .lines
            .iter()
            .map(|l| l.total() * l.gst_rate / (100.0 + l.gst_rate))
            .sum();

        let now = Utc::now();
        Ok(Invoice {
            id: format!("inv-{}", now.timestamp_millis()),
            invoice_number: format!(
                "{}-{}",
                company.invoice_prefix,
                rand::thread_rng().gen_range(1000..9999)
            ),
            date: now.to_rfc3339(),
            items,
            total_amount: round_money(total),
            gst_amount: round_money(gst),
            base_amount: round_money(total - gst),
            device_id: user.id.clone(),
            device_name: user.terminal_name().to_string(),
            company_id: company.id.clone(),
            company_name: company.name.clone(),
            company_name_secondary: company.name_secondary.clone(),
            gstin: company.gstin.clone(),
            upi_id: Some(company.upi_id.clone()),
            customer_name: details.customer_name,
            customer_phone: details.customer_phone,
            notes: details.notes,
            payment_method: details.payment_method,
            branding: company.branding.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed;

    fn product(id: &str) -> Product {
        seed::default_products()
            .into_iter()
            .find(|p| p.id == id)
            .unwrap()
    }

    #[test]
    fn test_add_merges_same_product() {
        let mut cart = Cart::default();
        cart.add(&product("p1"));
        cart.add(&product("p1"));
        cart.add(&product("p2"));

        assert_eq!(cart.lines().len(), 2);
        assert_eq!(cart.lines()[0].quantity, 2.0);
        assert_eq!(cart.total(), 120.0 * 2.0 + 50.0);
    }

    #[test]
    fn test_quantity_floor_is_one() {
        let mut cart = Cart::default();
        cart.add(&product("p1"));
        let line_id = cart.lines()[0].line_id.clone();

        assert!(cart.change_quantity(&line_id, 4.0));
        assert_eq!(cart.lines()[0].quantity, 5.0);
        assert!(cart.change_quantity(&line_id, -10.0));
        assert_eq!(cart.lines()[0].quantity, 1.0);
        assert!(!cart.change_quantity("li-missing", 1.0));
    }

    #[test]
    fn test_remove_and_clear() {
        let mut cart = Cart::default();
        cart.add(&product("p1"));
        cart.add(&product("p2"));
        let first = cart.lines()[0].line_id.clone();

        assert!(cart.remove(&first));
        assert!(!cart.remove(&first));
        assert_eq!(cart.lines().len(), 1);

        cart.clear();
        assert!(cart.is_empty());
    }

    #[test]
    fn test_empty_cart_is_rejected() {
        let settings = seed::default_settings();
        let users = seed::default_users();
        let user = &users[0];
        let err = Cart::default()
            .to_invoice(&settings, user, SaleDetails::default())
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_invoice_for_active_company() {
        let mut settings = seed::default_settings();
        settings.active_company_id = "comp-raunak".into();
        let users = seed::default_users();
        let user = &users[0];

        let mut cart = Cart::default();
        cart.add(&product("r2")); // 1000 @ 18%
        cart.add(&product("r1")); // 100 @ 5%

        let invoice = cart
            .to_invoice(
                &settings,
                user,
                SaleDetails {
                    payment_method: PaymentMethod::Upi,
                    customer_name: Some("Sharma".into()),
                    ..SaleDetails::default()
                },
            )
            .unwrap();

        assert!(invoice.id.starts_with("inv-"));
        assert!(invoice.invoice_number.starts_with("RE-"));
        let number: u32 = invoice.invoice_number[3..].parse().unwrap();
        assert!((1000..=9998).contains(&number));
        assert_eq!(invoice.company_id, "comp-raunak");
        assert_eq!(invoice.device_id, "admin-1");
        assert_eq!(invoice.items.len(), 2);
        assert_eq!(invoice.items[0].item_code, "RE-02");
        assert_eq!(invoice.total_amount, 1100.0);
        // 1000*18/118 + 100*5/105
        assert_eq!(invoice.gst_amount, 157.3);
        assert_eq!(invoice.base_amount, 942.7);
        assert_eq!(invoice.payment_method, PaymentMethod::Upi);
        assert_eq!(invoice.customer_name.as_deref(), Some("Sharma"));
        assert_eq!(
            invoice.branding.contact_number.as_deref(),
            Some("+91 9823380818")
        );
    }

    #[test]
    fn test_cart_persists_as_plain_list() {
        let mut cart = Cart::default();
        cart.add(&product("p8"));
        let value = serde_json::to_value(&cart).unwrap();
        assert!(value.is_array());
        assert_eq!(value[0]["productId"], "p8");
        assert_eq!(value[0]["gstRate"], 5.0);
    }
}
