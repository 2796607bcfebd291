//! Tenant registry
//!
//! Resolves inbound company ids to tenants. Resolution is cached for at most
//! `ttl`; activity (`is_active`) always goes to the database so a
//! deactivation takes effect on the next admission.

use async_trait::async_trait;
use callgate_common::Result;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::db;
use crate::models::Tenant;

/// Read-only tenant lookup used by the gatekeeper and orchestrator
#[async_trait]
pub trait TenantRegistry: Send + Sync {
    /// Tenant owning `external_company_id`, if any
    async fn resolve(&self, external_company_id: &str) -> Result<Option<Tenant>>;

    /// Tenant by internal id
    async fn get(&self, tenant_id: &str) -> Result<Option<Tenant>>;

    /// Authoritative activity check; unknown tenants are inactive
    async fn is_active(&self, tenant_id: &str) -> Result<bool>;
}

struct CachedTenant {
    tenant: Tenant,
    loaded_at: Instant,
}

/// SQLite-backed registry with a bounded-staleness resolve cache
pub struct SqliteTenantRegistry {
    db: SqlitePool,
    ttl: Duration,
    cache: RwLock<HashMap<String, CachedTenant>>,
}

impl SqliteTenantRegistry {
    pub fn new(db: SqlitePool, ttl: Duration) -> Self {
        Self {
            db,
            ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Drop a cached resolution (e.g. after the secret was rotated)
    pub fn invalidate(&self, external_company_id: &str) {
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        cache.remove(external_company_id);
    }

    fn cached(&self, external_company_id: &str) -> Option<Tenant> {
        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        cache
            .get(external_company_id)
            .filter(|entry| entry.loaded_at.elapsed() < self.ttl)
            .map(|entry| entry.tenant.clone())
    }
}

#[async_trait]
impl TenantRegistry for SqliteTenantRegistry {
    async fn resolve(&self, external_company_id: &str) -> Result<Option<Tenant>> {
        if let Some(tenant) = self.cached(external_company_id) {
            return Ok(Some(tenant));
        }

        let tenant = db::tenants::find_by_company_id(&self.db, external_company_id).await?;

        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        match &tenant {
            // Only positive results are cached: a newly created tenant is visible at once
            Some(t) => {
                cache.insert(
                    external_company_id.to_string(),
                    CachedTenant {
                        tenant: t.clone(),
                        loaded_at: Instant::now(),
                    },
                );
            }
            None => {
                cache.remove(external_company_id);
            }
        }

        Ok(tenant)
    }

    async fn get(&self, tenant_id: &str) -> Result<Option<Tenant>> {
        db::tenants::load_tenant(&self.db, tenant_id).await
    }

    async fn is_active(&self, tenant_id: &str) -> Result<bool> {
        db::tenants::is_active(&self.db, tenant_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SecurityLevel, WebhookSecret};
    use serde_json::Value;

    fn tenant() -> Tenant {
        Tenant {
            tenant_id: "t-1".to_string(),
            external_company_id: "acme".to_string(),
            is_active: true,
            webhook_secret: WebhookSecret::new("s1"),
            rate_limit_per_minute: 10,
            crm_config: Value::Null,
            processing_rules: Value::Null,
            min_confidence_for_crm: 0.8,
            security_level: SecurityLevel::Standard,
        }
    }

    #[tokio::test]
    async fn test_resolution_cached_within_ttl() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        db::tenants::upsert_tenant(&pool, &tenant()).await.unwrap();
        let registry = SqliteTenantRegistry::new(pool.clone(), Duration::from_secs(300));

        let first = registry.resolve("acme").await.unwrap().unwrap();
        assert_eq!(first.webhook_secret, WebhookSecret::new("s1"));

        // Rotate the secret behind the cache's back
        let mut rotated = tenant();
        rotated.webhook_secret = WebhookSecret::new("s2");
        db::tenants::upsert_tenant(&pool, &rotated).await.unwrap();

        let cached = registry.resolve("acme").await.unwrap().unwrap();
        assert_eq!(cached.webhook_secret, WebhookSecret::new("s1"));

        registry.invalidate("acme");
        let fresh = registry.resolve("acme").await.unwrap().unwrap();
        assert_eq!(fresh.webhook_secret, WebhookSecret::new("s2"));
    }

    #[tokio::test]
    async fn test_zero_ttl_always_reads_database() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        db::tenants::upsert_tenant(&pool, &tenant()).await.unwrap();
        let registry = SqliteTenantRegistry::new(pool.clone(), Duration::ZERO);

        registry.resolve("acme").await.unwrap();
        let mut rotated = tenant();
        rotated.webhook_secret = WebhookSecret::new("s2");
        db::tenants::upsert_tenant(&pool, &rotated).await.unwrap();

        let fresh = registry.resolve("acme").await.unwrap().unwrap();
        assert_eq!(fresh.webhook_secret, WebhookSecret::new("s2"));
    }

    #[tokio::test]
    async fn test_is_active_bypasses_cache() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        db::tenants::upsert_tenant(&pool, &tenant()).await.unwrap();
        let registry = SqliteTenantRegistry::new(pool.clone(), Duration::from_secs(300));

        assert!(registry.resolve("acme").await.unwrap().unwrap().is_active);
        db::tenants::set_tenant_active(&pool, "t-1", false).await.unwrap();

        assert!(!registry.is_active("t-1").await.unwrap());
    }
}
