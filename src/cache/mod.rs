//! Cache layer
//!
//! In-process caching for read-heavy catalog data (published course
//! outlines and catalog pages). Values are stored as JSON so any
//! serializable type can be cached behind one key space.
//!
//! # Usage
//!
//! ```rust,ignore
//! use coursely::cache::{create_cache, CacheLayer};
//! use coursely::config::CacheConfig;
//!
//! let cache = create_cache(&CacheConfig::default());
//! cache.set("course:outline:rust", &outline, cache.default_ttl()).await?;
//! ```

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::CacheConfig;

/// Cache layer trait
///
/// The methods are generic, so the trait is used through concrete types
/// rather than as `dyn CacheLayer`.
#[async_trait]
pub trait CacheLayer: Send + Sync {
    /// Get a value from cache
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>>;

    /// Set a value in cache with its own TTL
    async fn set<T: Serialize + Send + Sync>(&self, key: &str, value: &T, ttl: Duration) -> Result<()>;

    /// Delete a value from cache
    async fn delete(&self, key: &str) -> Result<()>;

    /// Delete all values whose key matches a glob pattern (`*`, `?`)
    async fn delete_pattern(&self, pattern: &str) -> Result<()>;

    /// Clear all cache entries
    async fn clear(&self) -> Result<()>;
}

pub use memory::MemoryCache;

/// The cache used by the application
pub type Cache = MemoryCache;

/// Build the application cache from configuration
pub fn create_cache(config: &CacheConfig) -> Arc<Cache> {
    let ttl = Duration::from_secs(config.ttl_seconds.max(1));
    Arc::new(MemoryCache::with_capacity_and_ttl(config.max_capacity, ttl))
}

/// Cache keys shared by the services that read and invalidate them
pub mod keys {
    /// Outline of one published course
    pub fn course_outline(slug: &str) -> String {
        format!("course:outline:{}", slug)
    }

    /// One catalog page for a given filter fingerprint
    pub fn catalog_page(fingerprint: &str) -> String {
        format!("catalog:{}", fingerprint)
    }

    /// Pattern matching every catalog page
    pub const CATALOG_PATTERN: &str = "catalog:*";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_cache_uses_config_ttl() {
        let config = CacheConfig {
            ttl_seconds: 42,
            max_capacity: 100,
        };
        let cache = create_cache(&config);
        assert_eq!(cache.default_ttl(), Duration::from_secs(42));

        cache.set("k", &1u32, cache.default_ttl()).await.unwrap();
        assert_eq!(cache.get::<u32>("k").await.unwrap(), Some(1));
    }

    #[test]
    fn test_keys() {
        assert_eq!(keys::course_outline("rust"), "course:outline:rust");
        assert_eq!(keys::catalog_page("p1"), "catalog:p1");
    }
}
