use std::sync::Arc;

use chrono::NaiveDate;
use tracing::debug;

use shared_database::TenantResolver;

use crate::error::BookingQueueError;
use crate::models::SequenceScope;

/// Issues gapless per-day sequence numbers for a scope.
///
/// The counter lives in the tenant store and is bumped with the store's
/// atomic increment-with-upsert. A failed increment surfaces as an error and
/// is never retried here: a retry could hand out a second number.
pub struct TokenSequencer {
    tenants: Arc<dyn TenantResolver>,
}

impl TokenSequencer {
    pub fn new(tenants: Arc<dyn TenantResolver>) -> Self {
        Self { tenants }
    }

    pub fn counter_key(date: NaiveDate, scope: &SequenceScope) -> String {
        format!("daily_counter:{}:{}", date, scope.key())
    }

    pub async fn next_sequence(
        &self,
        institution_id: &str,
        date: NaiveDate,
        scope: &SequenceScope,
    ) -> Result<u64, BookingQueueError> {
        let store = self.tenants.resolve(institution_id).await?;
        let key = Self::counter_key(date, scope);

        let value = store.increment(&key).await?;
        debug!("Issued sequence {} for {} in {}", value, key, institution_id);
        Ok(value)
    }

    /// Last number handed out for the scope, 0 when none has been.
    pub async fn current_sequence(
        &self,
        institution_id: &str,
        date: NaiveDate,
        scope: &SequenceScope,
    ) -> Result<u64, BookingQueueError> {
        let store = self.tenants.resolve(institution_id).await?;
        Ok(store.counter(&Self::counter_key(date, scope)).await?)
    }
}

/// Human readable token code: prefix followed by the zero-padded sequence.
pub fn format_token_code(prefix: &str, sequence: u64, width: usize) -> String {
    format!("{}{:0width$}", prefix, sequence, width = width)
}
