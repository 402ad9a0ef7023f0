//! Customer and catalog lookups.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::{CustomerId, Money, Sku};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{read, write};

/// A directory lookup failed for reasons other than the record not existing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    #[error("Directory unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CustomerStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub name: String,
    pub status: CustomerStatus,
}

impl Customer {
    pub fn is_active(&self) -> bool {
        self.status == CustomerStatus::Active
    }
}

/// A catalog entry. `price` is the current unit price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub sku: Sku,
    pub name: String,
    pub price: Money,
    pub active: bool,
}

/// Read-only customer lookup.
#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    /// Returns `Ok(None)` if no customer has this ID.
    async fn get_by_id(&self, id: CustomerId) -> Result<Option<Customer>, DirectoryError>;
}

/// Read-only product lookup.
#[async_trait]
pub trait CatalogDirectory: Send + Sync {
    /// Returns `Ok(None)` if no product has this SKU.
    async fn get_by_sku(&self, sku: &Sku) -> Result<Option<Product>, DirectoryError>;
}

/// In-memory customer directory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCustomerDirectory {
    customers: Arc<RwLock<HashMap<CustomerId, Customer>>>,
}

impl InMemoryCustomerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, customer: Customer) {
        write(&self.customers).insert(customer.id, customer);
    }

    /// Adds an active customer with a fresh ID and returns the ID.
    pub fn add_active(&self, name: impl Into<String>) -> CustomerId {
        let id = CustomerId::new();
        self.insert(Customer {
            id,
            name: name.into(),
            status: CustomerStatus::Active,
        });
        id
    }

    pub fn set_status(&self, id: CustomerId, status: CustomerStatus) {
        if let Some(customer) = write(&self.customers).get_mut(&id) {
            customer.status = status;
        }
    }
}

#[async_trait]
impl CustomerDirectory for InMemoryCustomerDirectory {
    async fn get_by_id(&self, id: CustomerId) -> Result<Option<Customer>, DirectoryError> {
        Ok(read(&self.customers).get(&id).cloned())
    }
}

/// In-memory product catalog.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    products: Arc<RwLock<HashMap<Sku, Product>>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, product: Product) {
        write(&self.products).insert(product.sku.clone(), product);
    }

    /// Adds an active product.
    pub fn add(&self, sku: impl Into<Sku>, name: impl Into<String>, price: Money) {
        self.insert(Product {
            sku: sku.into(),
            name: name.into(),
            price,
            active: true,
        });
    }

    pub fn set_active(&self, sku: &Sku, active: bool) {
        if let Some(product) = write(&self.products).get_mut(sku) {
            product.active = active;
        }
    }

    pub fn set_price(&self, sku: &Sku, price: Money) {
        if let Some(product) = write(&self.products).get_mut(sku) {
            product.price = price;
        }
    }
}

#[async_trait]
impl CatalogDirectory for InMemoryCatalog {
    async fn get_by_sku(&self, sku: &Sku) -> Result<Option<Product>, DirectoryError> {
        Ok(read(&self.products).get(sku).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_customer_lookup_and_status() {
        let directory = InMemoryCustomerDirectory::new();
        let id = directory.add_active("Ada");

        let customer = directory.get_by_id(id).await.unwrap().unwrap();
        assert!(customer.is_active());

        directory.set_status(id, CustomerStatus::Inactive);
        let customer = directory.get_by_id(id).await.unwrap().unwrap();
        assert!(!customer.is_active());

        assert!(directory.get_by_id(CustomerId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_catalog_lookup() {
        let catalog = InMemoryCatalog::new();
        let sku = Sku::new("SKU-001");
        catalog.add(sku.clone(), "Widget", Money::from_cents(1000));

        let product = catalog.get_by_sku(&sku).await.unwrap().unwrap();
        assert_eq!(product.price, Money::from_cents(1000));
        assert!(product.active);

        catalog.set_active(&sku, false);
        catalog.set_price(&sku, Money::from_cents(1200));
        let product = catalog.get_by_sku(&sku).await.unwrap().unwrap();
        assert!(!product.active);
        assert_eq!(product.price, Money::from_cents(1200));

        assert!(catalog.get_by_sku(&Sku::new("NOPE")).await.unwrap().is_none());
    }
}
