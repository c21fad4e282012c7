//! Tenant configuration backed by application config
//!
//! Resolves billing profiles from the `billing` section and per-org
//! `tenants` overrides. Overrides can be replaced at runtime; the next event
//! for the organization picks them up.

use async_trait::async_trait;
use callmeter_core::{
    config::{AppConfig, BillingConfig, TenantOverride},
    models::BillingProfile,
    traits::TenantConfigProvider,
    AppResult,
};
use parking_lot::RwLock;
use std::collections::HashMap;

pub struct StaticTenantConfig {
    billing: BillingConfig,
    overrides: RwLock<HashMap<String, TenantOverride>>,
}

impl StaticTenantConfig {
    pub fn new(billing: BillingConfig) -> Self {
        Self {
            billing,
            overrides: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            billing: config.billing.clone(),
            overrides: RwLock::new(config.tenants.clone()),
        }
    }

    pub fn set_override(&self, org_id: &str, tenant: TenantOverride) {
        self.overrides.write().insert(org_id.to_string(), tenant);
    }

    pub fn resolve(&self, org_id: &str) -> BillingProfile {
        let overrides = self.overrides.read();
        self.billing.profile_for(overrides.get(org_id))
    }
}

#[async_trait]
impl TenantConfigProvider for StaticTenantConfig {
    async fn profile(&self, org_id: &str) -> AppResult<BillingProfile> {
        Ok(self.resolve(org_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_override_takes_effect_immediately() {
        let config = StaticTenantConfig::new(BillingConfig::default());
        assert_eq!(config.profile("org-1").await.unwrap().rate_per_minute, dec!(56));

        config.set_override(
            "org-1",
            TenantOverride {
                rate_per_minute: Some(dec!(30)),
                ..Default::default()
            },
        );

        assert_eq!(config.profile("org-1").await.unwrap().rate_per_minute, dec!(30));
        assert_eq!(config.profile("org-2").await.unwrap().rate_per_minute, dec!(56));
    }
}
