//! Serialized nonce assignment for the signing account.

use ignis_chain::{AdapterResult, ChainAdapter};
use tokio::sync::{Mutex, MutexGuard};

/// Hands out nonces one submitter at a time.
///
/// The guard returned by [`NonceManager::lock`] must stay alive across the
/// journal write and the submission; the nonce only advances once a
/// transaction has landed.
#[derive(Debug, Default)]
pub struct NonceManager {
    next: Mutex<Option<u64>>,
}

impl NonceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive use of the nonce, seeding it from the chain on first use.
    pub async fn lock(&self, chain: &dyn ChainAdapter) -> AdapterResult<NonceGuard<'_>> {
        let mut guard = self.next.lock().await;
        if guard.is_none() {
            *guard = Some(chain.pending_nonce().await?);
        }
        Ok(NonceGuard { guard })
    }
}

/// Exclusive access to the next nonce.
#[derive(Debug)]
pub struct NonceGuard<'a> {
    guard: MutexGuard<'a, Option<u64>>,
}

impl NonceGuard<'_> {
    pub fn nonce(&self) -> u64 {
        (*self.guard).unwrap_or_default()
    }

    /// Marks the current nonce as consumed by a landed transaction.
    pub fn advance(&mut self) {
        *self.guard = Some(self.nonce() + 1);
    }

    /// Re-reads the chain after a contention error.
    pub async fn resync(&mut self, chain: &dyn ChainAdapter) -> AdapterResult<u64> {
        let nonce = chain.pending_nonce().await?;
        *self.guard = Some(nonce);
        Ok(nonce)
    }
}
