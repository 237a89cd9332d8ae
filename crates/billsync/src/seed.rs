//! First-run defaults.
//!
//! A fresh terminal starts with one admin login, the two shop companies, and
//! their starter catalog. These are written back to the store the first time
//! they are used so every later boot reads the same data.

use chrono::Utc;

use crate::model::{AppSettings, Branding, Company, Product, User, UserRole};

/// Username of the seed admin account.
pub const SEED_ADMIN_USERNAME: &str = "MMC";

/// The seed admin account.
#[must_use]
pub fn default_users() -> Vec<User> {
    vec![User {
        id: "admin-1".to_string(),
        username: SEED_ADMIN_USERNAME.to_string(),
        password: "mmn123".to_string(),
        role: UserRole::Admin,
        device_name: None,
        last_active: None,
        is_online: None,
        printer_settings: None,
    }]
}

fn company(
    id: &str,
    name: &str,
    name_secondary: &str,
    gstin: &str,
    prefix: &str,
    contact: &str,
    emoji: &str,
) -> Company {
    Company {
        id: id.to_string(),
        name: Some(name.to_string()),
        name_secondary: Some(name_secondary.to_string()),
        gstin: gstin.to_string(),
        upi_id: "gpay-12191012857@okbizaxis".to_string(),
        invoice_prefix: prefix.to_string(),
        branding: Branding {
            address_line1: Some("Main Road, Tanga Chowk".to_string()),
            address_line2: Some("Yavatmal, Maharashtra - 445001".to_string()),
            contact_number: Some(contact.to_string()),
            terms_line1: Some("Goods once sold will not be taken back.".to_string()),
            terms_line2: Some("Subject to Local Jurisdiction.".to_string()),
            thank_you_emoji_start: Some(emoji.to_string()),
            thank_you_emoji_end: Some(emoji.to_string()),
            logo_scale: Some(100.0),
            ..Branding::default()
        },
    }
}

/// The two seed companies, Mahavir first (it is the initial active company).
#[must_use]
pub fn default_companies() -> Vec<Company> {
    vec![
        company(
            "comp-mahavir",
            "Mahavir Matching Centre",
            "महावीर मॅचिंग सेंटर",
            "27ASRPP7652G1Z2",
            "MMC",
            "+91 9421486134",
            "🙏",
        ),
        company(
            "comp-raunak",
            "Raunak Enterprise",
            "रौनक एंटरप्राइजेस",
            "27ANXPP6071G1ZB",
            "RE",
            "+91 9823380818",
            "✨",
        ),
    ]
}

/// Default settings: seed companies with Mahavir active.
#[must_use]
pub fn default_settings() -> AppSettings {
    let companies = default_companies();
    let active_company_id = companies[0].id.clone();
    AppSettings {
        companies,
        active_company_id,
        gst_rate: 0.05,
        last_sync: Some(Utc::now().to_rfc3339()),
    }
}

// (id, company, code, name, price, category, stock, unit, gst)
type Row = (&'static str, &'static str, &'static str, &'static str, f64, &'static str, f64, &'static str, f64);

const CATALOG: &[Row] = &[
    ("p1", "comp-mahavir", "TX-101", "Terry Rubia", 120.0, "Fabrics", 1000.0, "pcs", 5.0),
    ("p2", "comp-mahavir", "TX-102", "Astar (Cotton)", 50.0, "Fabrics", 1000.0, "pcs", 5.0),
    ("p3", "comp-mahavir", "TX-103", "Poplin 2.25", 160.0, "Fabrics", 1000.0, "pcs", 5.0),
    ("p4", "comp-mahavir", "TX-104", "Fall (Cotton)", 25.0, "Fabrics", 10000.0, "pcs", 5.0),
    ("p5", "comp-mahavir", "TX-105", "Poplin 2.5", 180.0, "Fabrics", 1000.0, "pcs", 5.0),
    ("p6", "comp-mahavir", "TX-106", "Pure Rubia", 200.0, "Fabrics", 1000.0, "pcs", 5.0),
    ("p7", "comp-mahavir", "TX-107", "Pec", 45.0, "Fabrics", 1000.0, "pcs", 5.0),
    ("p8", "comp-mahavir", "TX-108", "Poplin (Meters)", 120.0, "Fabrics", 500.0, "mtr", 5.0),
    ("p9", "comp-mahavir", "TX-109", "Printed Pec", 140.0, "Fabrics", 1009.0, "pcs", 5.0),
    ("p10", "comp-mahavir", "TX-110", "Devi Silk", 120.0, "Fabrics", 1000.0, "mtr", 5.0),
    ("p11", "comp-mahavir", "TX-111", "B Silk", 200.0, "Fabrics", 1000.0, "mtr", 5.0),
    ("p12", "comp-mahavir", "TX-112", "Terry Rubia (Meters)", 150.0, "Fabrics", 10000.0, "mtr", 5.0),
    ("p13", "comp-mahavir", "TX-113", "Astar (Meters)", 60.0, "Fabrics", 10000.0, "mtr", 5.0),
    ("p14", "comp-mahavir", "TX-114", "Rubai (Heavy)", 250.0, "Fabrics", 100.0, "mtr", 5.0),
    ("p15", "comp-mahavir", "TX-115", "Nada (Drawstring)", 20.0, "Accessories", 10000.0, "pcs", 5.0),
    ("r1", "comp-raunak", "RE-01", "GREEN NET", 100.0, "Agri", 9993.0, "mtr", 5.0),
    ("r2", "comp-raunak", "RE-02", "TARPAULIN", 1000.0, "Agri", 10000.0, "pcs", 18.0),
    ("r3", "comp-raunak", "RE-03", "PLASTIC SHEET", 60.0, "Fabrics", 9960.0, "mtr", 18.0),
    ("r4", "comp-raunak", "RE-04", "READY GREEN NET SIZES", 550.0, "Agri", 10000.0, "pcs", 5.0),
    ("r5", "comp-raunak", "RE-05", "PLASTI PEC", 50.0, "Fabrics", 10000.0, "pcs", 18.0),
    ("r6", "comp-raunak", "RE-06", "NEWAR", 5.0, "Accessories", 1000.0, "mtr", 5.0),
    ("r7", "comp-raunak", "RE-07", "TARPAULIN KG", 150.0, "Agri", 5000.0, "kg", 18.0),
    ("r8", "comp-raunak", "RE-08", "ILET", 20.0, "Accessories", 10000.0, "pcs", 18.0),
    ("r9", "comp-raunak", "RE-09", "NYLON ROPE (HEAVY)", 85.0, "Accessories", 2000.0, "kg", 12.0),
    ("r10", "comp-raunak", "RE-10", "PVC COATED WIRE", 12.0, "Agri", 5000.0, "mtr", 18.0),
    ("r11", "comp-raunak", "RE-11", "MULCHING FILM 30MIC", 1800.0, "Agri", 100.0, "pcs", 12.0),
    ("r12", "comp-raunak", "RE-12", "SHADE NET (90%)", 75.0, "Agri", 1200.0, "mtr", 5.0),
    ("r13", "comp-raunak", "RE-13", "BUCKET PLASTIC", 120.0, "Utility", 500.0, "pcs", 18.0),
    ("r14", "comp-raunak", "RE-14", "AGRI PIPE (2 INCH)", 450.0, "Agri", 200.0, "pcs", 12.0),
    ("r15", "comp-raunak", "RE-15", "GARDEN HOSE 50M", 1100.0, "Utility", 50.0, "pcs", 18.0),
];

/// The starter catalog for both seed companies.
#[must_use]
pub fn default_products() -> Vec<Product> {
    CATALOG
        .iter()
        .map(|&(id, company_id, code, name, price, category, stock, unit, gst)| Product {
            id: id.to_string(),
            company_id: company_id.to_string(),
            item_code: code.to_string(),
            name: name.to_string(),
            price,
            category: category.to_string(),
            stock_quantity: stock,
            unit: unit.to_string(),
            gst_rate: gst,
        })
        .collect()
}
