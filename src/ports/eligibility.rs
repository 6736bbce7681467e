use async_trait::async_trait;

use crate::domain::instrument::Instrument;

/// Eligibility filter consulted before an instrument enters a cycle.
/// The implementation's own bookkeeping (volume thresholds, daily
/// rechecks) is entirely its concern.
#[async_trait]
pub trait EligibilityPort: Send + Sync {
    async fn is_eligible(&self, instrument: &Instrument) -> bool;
}
