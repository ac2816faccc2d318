use async_trait::async_trait;

use crate::{activity::Activity, Result};

/// Outbound channel back to the messaging platform.
///
/// The Bot Framework connector is the production implementation.
#[async_trait]
pub trait ConnectorPort: Send + Sync {
    /// Post `activity` to its conversation. Returns the platform's id for it, if any.
    async fn send_activity(&self, activity: &Activity) -> Result<Option<String>>;
}
