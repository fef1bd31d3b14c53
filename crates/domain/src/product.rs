//! Products and their inventory counter.

use common::ProductId;
use serde::{Deserialize, Serialize};

/// A price in cents. Serialized as the bare integer, the column type in
/// the shop tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub fn cents(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}${}.{:02}", abs / 100, abs % 100)
    }
}

/// A product with a non-negative inventory counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub product_id: ProductId,
    pub product: String,
    pub description: String,
    pub inventory: u32,
    pub price: Money,
}

impl Product {
    /// Creates a product.
    pub fn new(
        product_id: ProductId,
        product: impl Into<String>,
        description: impl Into<String>,
        inventory: u32,
        price: Money,
    ) -> Self {
        Self {
            product_id,
            product: product.into(),
            description: description.into(),
            inventory,
            price,
        }
    }

    /// The single product sold by the demo shop.
    pub fn widget(inventory: u32) -> Self {
        Self::new(
            ProductId::new(1),
            "Premium Quality Widget",
            "Enhance your productivity with our top-rated widgets!",
            inventory,
            Money::from_cents(9999),
        )
    }

    /// Returns true if at least one unit is available.
    pub fn in_stock(&self) -> bool {
        self.inventory > 0
    }
}
