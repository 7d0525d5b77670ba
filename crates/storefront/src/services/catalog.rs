//! Catalog reads, cached with `moka`.
//!
//! The catalog is public: requests carry a token when one exists but do not
//! require a session.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tracing::{debug, instrument};

use electrokart_core::ProductId;

use crate::error::{Error, Result};
use crate::gateway::{Gateway, GatewayError};
use crate::models::{ListPayload, Product};

use super::aggregate::ensure_success;

/// Default time-to-live for cached catalog responses.
pub const DEFAULT_CATALOG_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
enum CacheValue {
    Product(Box<Product>),
    Products(Vec<Product>),
}

/// Catalog client.
#[derive(Clone)]
pub struct CatalogService {
    inner: Arc<CatalogInner>,
}

struct CatalogInner {
    gateway: Gateway,
    cache: Cache<String, CacheValue>,
}

impl CatalogService {
    #[must_use]
    pub fn new(gateway: Gateway, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(1000)
            .time_to_live(ttl)
            .build();
        Self {
            inner: Arc::new(CatalogInner { gateway, cache }),
        }
    }

    /// All products.
    ///
    /// # Errors
    ///
    /// Returns the gateway error, or `Error::Rejected` for `success: false`.
    #[instrument(skip(self))]
    pub async fn products(&self) -> Result<Vec<Product>> {
        self.list("products".to_string(), "/Products".to_string())
            .await
    }

    /// Products in a category.
    ///
    /// # Errors
    ///
    /// Returns the gateway error, or `Error::Rejected` for `success: false`.
    #[instrument(skip(self))]
    pub async fn by_category(&self, category: &str) -> Result<Vec<Product>> {
        let category = category.trim();
        if category.is_empty() {
            return Err(Error::Validation("Category is required".to_string()));
        }
        self.list(
            format!("category:{}", category.to_lowercase()),
            format!("/Products/category/{}", urlencoding::encode(category)),
        )
        .await
    }

    /// One product.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidProduct` for an unresolvable id (no request is made)
    /// - `Error::NotFound` when the server has no such product
    #[instrument(skip(self), fields(product_id = %id))]
    pub async fn product(&self, id: ProductId) -> Result<Product> {
        if !id.is_resolvable() {
            return Err(Error::InvalidProduct(id.to_string()));
        }

        let cache_key = format!("product:{id}");
        if let Some(CacheValue::Product(product)) = self.inner.cache.get(&cache_key).await {
            debug!("Cache hit for product");
            return Ok(*product);
        }

        let envelope = match self
            .inner
            .gateway
            .get::<Product>(&format!("/Products/{id}"))
            .await
        {
            Ok(envelope) => envelope,
            Err(GatewayError::Client { status: 404, .. }) => {
                return Err(Error::NotFound(format!("Product {id}")));
            }
            Err(e) => return Err(e.into()),
        };
        let product = ensure_success(envelope, "Could not load the product")?
            .ok_or_else(|| Error::NotFound(format!("Product {id}")))?;

        self.inner
            .cache
            .insert(cache_key, CacheValue::Product(Box::new(product.clone())))
            .await;
        Ok(product)
    }

    /// Drop every cached response.
    pub async fn invalidate(&self) {
        self.inner.cache.invalidate_all();
        self.inner.cache.run_pending_tasks().await;
    }

    async fn list(&self, cache_key: String, path: String) -> Result<Vec<Product>> {
        if let Some(CacheValue::Products(products)) = self.inner.cache.get(&cache_key).await {
            debug!(%cache_key, "Cache hit");
            return Ok(products);
        }

        let envelope = self
            .inner
            .gateway
            .get::<ListPayload<Product>>(&path)
            .await?;
        let products = ensure_success(envelope, "Could not load products")?
            .map(ListPayload::into_vec)
            .unwrap_or_default();

        self.inner
            .cache
            .insert(cache_key, CacheValue::Products(products.clone()))
            .await;
        Ok(products)
    }
}
