//! Health status reported by the webhook server.

use serde::{Deserialize, Serialize};

use crate::allocation::AllocationStore;
use crate::version::VersionInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Health {
    /// Free slots available
    Ready,
    /// Every slot is taken
    Busy,
    /// Storage unreachable
    Defunct,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: Health,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolUsage>,
    pub version: VersionInfo,
    /// Process start (ISO 8601 format).
    pub started_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolUsage {
    pub total: usize,
    pub taken: usize,
    pub free: usize,
}

impl HealthResponse {
    pub async fn probe(
        store: &dyn AllocationStore,
        version: VersionInfo,
        started_at: &str,
    ) -> Self {
        let (status, pool) = match store.snapshot().await {
            Ok(snapshot) => {
                let status = if snapshot.is_full() {
                    Health::Busy
                } else {
                    Health::Ready
                };
                let usage = PoolUsage {
                    total: snapshot.total(),
                    taken: snapshot.taken(),
                    free: snapshot.free(),
                };
                (status, Some(usage))
            }
            Err(e) => {
                tracing::error!(error = %e, "Health probe could not read the pool");
                (Health::Defunct, None)
            }
        };

        Self {
            status,
            pool,
            version,
            started_at: started_at.to_string(),
        }
    }
}

/// Current time in the format `started_at` uses.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
