use ignis_types::Future;
use serde_json::json;
use sha2::{Digest, Sha256};

/// SHA-256 hex digest of a future's action and explicit dependencies.
///
/// Stored in the journal when a future first starts; a different digest on a
/// later run means the module description changed under an existing deployment.
pub fn fingerprint(future: &Future) -> String {
    let canonical = json!({
        "action": future.action,
        "after": future.after,
    });
    format!("{:x}", Sha256::digest(canonical.to_string().as_bytes()))
}
