use std::sync::Arc;

use shared_config::AppConfig;
use shared_database::{DocumentStore, InMemoryTenantResolver, StoreError, TenantResolver};

pub const TEST_INSTITUTION: &str = "test-clinic";

pub struct TestConfig {
    pub whole_day_cascade_policy: String,
    pub shift_cascade_policy: String,
    pub max_conflict_retries: u32,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            whole_day_cascade_policy: "MANUAL_ALLOCATION".to_string(),
            shift_cascade_policy: "MANUAL_ALLOCATION".to_string(),
            max_conflict_retries: 3,
        }
    }
}

impl TestConfig {
    pub fn with_policies(whole_day: &str, shift: &str) -> Self {
        Self {
            whole_day_cascade_policy: whole_day.to_string(),
            shift_cascade_policy: shift.to_string(),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            whole_day_cascade_policy: self.whole_day_cascade_policy.clone(),
            shift_cascade_policy: self.shift_cascade_policy.clone(),
            max_conflict_retries: self.max_conflict_retries,
            cascade_institutions: vec![TEST_INSTITUTION.to_string()],
            ..AppConfig::default()
        }
    }
}

/// In-memory tenants for service tests.
pub struct TestTenants {
    pub resolver: Arc<InMemoryTenantResolver>,
}

impl Default for TestTenants {
    fn default() -> Self {
        Self::new()
    }
}

impl TestTenants {
    pub fn new() -> Self {
        Self {
            resolver: Arc::new(InMemoryTenantResolver::new()),
        }
    }

    pub fn resolver(&self) -> Arc<dyn TenantResolver> {
        self.resolver.clone()
    }

    pub async fn store(&self, institution_id: &str) -> Result<Arc<dyn DocumentStore>, StoreError> {
        self.resolver.resolve(institution_id).await
    }
}
