//! tsop ops: imperative operations that sit outside the ordered apply chain.

#![forbid(unsafe_code)]

use metrics::counter;
use thiserror::Error;
use tracing::{error, info};
use tsop_kubehub::{ClientError, ClusterClient};

#[derive(Debug, Error)]
#[error("cleanup of namespace {namespace} failed: {source}")]
pub struct CleanupError {
    pub namespace: String,
    pub source: ClientError,
}

/// Tear down a deployment by deleting its namespace; the platform cascades to
/// everything inside. A namespace that is already gone counts as clean.
pub async fn cleanup(client: &dyn ClusterClient, namespace: &str) -> Result<(), CleanupError> {
    match client.delete_namespace(namespace).await {
        Ok(()) => {
            counter!("cleanup_ok", 1u64);
            info!(namespace, "namespace deleted");
            Ok(())
        }
        Err(ClientError::NotFound { .. }) => {
            counter!("cleanup_ok", 1u64);
            info!(namespace, "namespace already absent");
            Ok(())
        }
        Err(source) => {
            counter!("cleanup_err", 1u64);
            error!(namespace, error = %source, "cleanup failed");
            Err(CleanupError { namespace: namespace.to_string(), source })
        }
    }
}

/// Value for the `kubectl.kubernetes.io/restartedAt` pod annotation, same format `kubectl rollout restart` writes.
pub fn restart_stamp() -> String { chrono::Utc::now().to_rfc3339() }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_stamp_is_rfc3339() {
        let stamp = restart_stamp();
        assert!(chrono::DateTime::parse_from_rfc3339(&stamp).is_ok(), "stamp={}", stamp);
    }
}
