//! Startup data: customers, products and opening stock.

use std::path::Path;

use common::{CustomerId, Money, Sku};
use inventory::{InventoryError, StockLedger};
use saga::{Customer, CustomerStatus, InMemoryCatalog, InMemoryCustomerDirectory, Product};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("Failed to read seed file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid seed data: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Failed to stock seed product: {0}")]
    Inventory(#[from] InventoryError),

    #[error("Negative price for {sku}: {price_cents}")]
    NegativePrice { sku: Sku, price_cents: i64 },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub customers: Vec<SeedCustomer>,
    #[serde(default)]
    pub products: Vec<SeedProduct>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedCustomer {
    /// Generated when absent.
    pub id: Option<CustomerId>,
    pub name: String,
    #[serde(default = "active_status")]
    pub status: CustomerStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedProduct {
    pub sku: Sku,
    pub name: String,
    pub price_cents: i64,
    #[serde(default = "yes")]
    pub active: bool,
    #[serde(default)]
    pub stock: u32,
}

fn active_status() -> CustomerStatus {
    CustomerStatus::Active
}

fn yes() -> bool {
    true
}

impl Seed {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SeedError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// A small catalog used when no seed file is configured.
    pub fn demo() -> Self {
        Self {
            customers: vec![SeedCustomer {
                id: None,
                name: "Demo Customer".to_string(),
                status: CustomerStatus::Active,
            }],
            products: vec![
                SeedProduct {
                    sku: Sku::new("SKU-001"),
                    name: "Widget".to_string(),
                    price_cents: 1000,
                    active: true,
                    stock: 100,
                },
                SeedProduct {
                    sku: Sku::new("SKU-002"),
                    name: "Gadget".to_string(),
                    price_cents: 2500,
                    active: true,
                    stock: 25,
                },
            ],
        }
    }

    /// Loads the seed into the directories and ledger. Returns the IDs of the
    /// customers created.
    pub async fn apply(
        &self,
        customers: &InMemoryCustomerDirectory,
        catalog: &InMemoryCatalog,
        ledger: &StockLedger,
    ) -> Result<Vec<CustomerId>, SeedError> {
        if let Some(product) = self.products.iter().find(|p| p.price_cents < 0) {
            return Err(SeedError::NegativePrice {
                sku: product.sku.clone(),
                price_cents: product.price_cents,
            });
        }

        let mut customer_ids = Vec::with_capacity(self.customers.len());
        for customer in &self.customers {
            let id = customer.id.unwrap_or_default();
            customers.insert(Customer {
                id,
                name: customer.name.clone(),
                status: customer.status,
            });
            customer_ids.push(id);
        }

        for product in &self.products {
            catalog.insert(Product {
                sku: product.sku.clone(),
                name: product.name.clone(),
                price: Money::from_cents(product.price_cents),
                active: product.active,
            });
            if product.stock > 0 {
                ledger.restock(&product.sku, product.stock).await?;
            }
        }

        tracing::info!(
            customers = self.customers.len(),
            products = self.products.len(),
            "seed data loaded"
        );
        Ok(customer_ids)
    }
}

#[cfg(test)]
mod tests {
    use saga::CatalogDirectory;

    use super::*;

    #[tokio::test]
    async fn test_apply_loads_catalog_and_stock() {
        let seed: Seed = serde_json::from_value(serde_json::json!({
            "customers": [{ "name": "Ada" }],
            "products": [
                { "sku": "SKU-9", "name": "Sprocket", "price_cents": 350, "stock": 12 },
                { "sku": "SKU-10", "name": "Retired", "price_cents": 100, "active": false }
            ]
        }))
        .unwrap();

        let customers = InMemoryCustomerDirectory::new();
        let catalog = InMemoryCatalog::new();
        let ledger = StockLedger::new();
        let ids = seed.apply(&customers, &catalog, &ledger).await.unwrap();

        assert_eq!(ids.len(), 1);
        let level = ledger.stock_level(&Sku::new("SKU-9")).await.unwrap();
        assert_eq!(level.available, 12);
        assert!(ledger.stock_level(&Sku::new("SKU-10")).await.is_none());

        let retired = catalog.get_by_sku(&Sku::new("SKU-10")).await.unwrap().unwrap();
        assert!(!retired.active);
    }

    #[tokio::test]
    async fn test_negative_price_rejected_before_loading() {
        let seed: Seed = serde_json::from_value(serde_json::json!({
            "customers": [{ "name": "Ada" }],
            "products": [
                { "sku": "SKU-9", "name": "Sprocket", "price_cents": 350, "stock": 12 },
                { "sku": "SKU-11", "name": "Misprice", "price_cents": -500, "stock": 1 }
            ]
        }))
        .unwrap();

        let customers = InMemoryCustomerDirectory::new();
        let catalog = InMemoryCatalog::new();
        let ledger = StockLedger::new();
        let err = seed.apply(&customers, &catalog, &ledger).await.unwrap_err();

        assert!(matches!(err, SeedError::NegativePrice { price_cents: -500, .. }));
        assert!(ledger.stock_level(&Sku::new("SKU-9")).await.is_none());
        assert!(catalog.get_by_sku(&Sku::new("SKU-9")).await.unwrap().is_none());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = Seed::from_path("/nonexistent/seed.json").unwrap_err();
        assert!(matches!(err, SeedError::Io(_)));
    }
}
