use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use shared_config::AppConfig;
use shared_database::{Collection, TenantResolver};

use crate::error::BookingQueueError;
use crate::models::{CascadePolicy, InstitutionSettings};

pub const SETTINGS: &str = "institution_settings";
const SETTINGS_ID: &str = "scheduling";

/// Per-institution scheduling settings, falling back to the process-wide
/// defaults from `AppConfig` until an institution stores its own.
pub struct SettingsService {
    tenants: Arc<dyn TenantResolver>,
    defaults: InstitutionSettings,
}

impl SettingsService {
    pub fn new(tenants: Arc<dyn TenantResolver>, config: &AppConfig) -> Self {
        Self {
            tenants,
            defaults: InstitutionSettings {
                whole_day_policy: parse_policy(&config.whole_day_cascade_policy),
                shift_policy: parse_policy(&config.shift_cascade_policy),
                department_prefixes: HashMap::new(),
            },
        }
    }

    pub fn defaults(&self) -> &InstitutionSettings {
        &self.defaults
    }

    pub async fn get_settings(&self, institution_id: &str) -> Result<InstitutionSettings, BookingQueueError> {
        let stored = self.collection(institution_id).await?.get(SETTINGS_ID).await?;
        Ok(stored
            .map(|versioned| versioned.value)
            .unwrap_or_else(|| self.defaults.clone()))
    }

    pub async fn put_settings(
        &self,
        institution_id: &str,
        settings: InstitutionSettings,
    ) -> Result<InstitutionSettings, BookingQueueError> {
        if settings.department_prefixes.values().any(|p| p.trim().is_empty()) {
            return Err(BookingQueueError::ValidationError(
                "Department prefixes must not be blank".to_string(),
            ));
        }

        let stored = self
            .collection(institution_id)
            .await?
            .put(SETTINGS_ID, &settings)
            .await?;
        info!("Scheduling settings updated for institution {}", institution_id);
        Ok(stored.value)
    }

    async fn collection(
        &self,
        institution_id: &str,
    ) -> Result<Collection<InstitutionSettings>, BookingQueueError> {
        let store = self.tenants.resolve(institution_id).await?;
        Ok(Collection::new(store, SETTINGS))
    }
}

fn parse_policy(raw: &str) -> CascadePolicy {
    raw.parse().unwrap_or_else(|_| {
        warn!("Unknown cascade policy '{}', using MANUAL_ALLOCATION", raw);
        CascadePolicy::ManualAllocation
    })
}
