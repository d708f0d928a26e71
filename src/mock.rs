//! Deterministic in-memory connection for tests and offline smoke paths.
//!
//! Each submission pops the next scripted response. With nothing scripted the
//! call is included and finalized in a block derived from its hash.

use crate::classify::{ErrorMetadata, ErrorRegistry, ModuleError, StaticErrorRegistry};
use crate::ledger::{Call, Connection, Hash32, NoncePolicy, StatusUpdate, Submitted, TxStatus};
use crate::signer::Signer;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Scripted reaction to the next submission
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Fail the dispatch itself
    Reject(Error),

    /// Accept and replay these updates, then close the stream
    Updates(Vec<StatusUpdate>),

    /// Accept and replay these updates, then never emit again
    Hang(Vec<StatusUpdate>),
}

/// A call the mock accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedCall {
    /// The call as submitted
    pub call: Call,

    /// Public key of the signer
    pub signer: Vec<u8>,

    /// Nonce the call was signed with
    pub nonce: u64,

    /// Hash handed back to the submitter
    pub tx_hash: Hash32,
}

#[derive(Debug, Default)]
pub struct MockConnection {
    registry: StaticErrorRegistry,
    responses: Mutex<VecDeque<MockResponse>>,
    nonces: Mutex<HashMap<Vec<u8>, u64>>,
    submitted: Mutex<Vec<SubmittedCall>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockConnection {
    pub fn new(registry: StaticErrorRegistry) -> Self {
        Self {
            registry,
            ..Self::default()
        }
    }

    /// Script the next submission
    pub fn push_response(&self, response: MockResponse) {
        lock(&self.responses).push_back(response);
    }

    pub fn push_updates(&self, updates: Vec<StatusUpdate>) {
        self.push_response(MockResponse::Updates(updates));
    }

    pub fn push_hanging(&self, updates: Vec<StatusUpdate>) {
        self.push_response(MockResponse::Hang(updates));
    }

    pub fn push_reject(&self, error: Error) {
        self.push_response(MockResponse::Reject(error));
    }

    /// Calls accepted so far, in submission order
    pub fn submitted_calls(&self) -> Vec<SubmittedCall> {
        lock(&self.submitted).clone()
    }

    fn resolve_nonce(&self, signer: &[u8], policy: NoncePolicy) -> u64 {
        let mut nonces = lock(&self.nonces);
        let next = nonces.entry(signer.to_vec()).or_insert(0);
        let nonce = match policy {
            NoncePolicy::Auto => *next,
            NoncePolicy::Explicit(nonce) => nonce,
        };
        *next = (*next).max(nonce.saturating_add(1));
        nonce
    }

    fn default_updates(tx_hash: &Hash32) -> Vec<StatusUpdate> {
        let mut seed = tx_hash.as_bytes().to_vec();
        seed.extend_from_slice(b"block");
        let block = Hash32::keccak256(&seed);
        vec![
            StatusUpdate::new(TxStatus::Ready),
            StatusUpdate::new(TxStatus::InBlock(block)),
            StatusUpdate::new(TxStatus::Finalized(block)),
        ]
    }
}

impl ErrorRegistry for MockConnection {
    fn find_meta_error(&self, error: &ModuleError) -> Option<ErrorMetadata> {
        self.registry.find_meta_error(error)
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn submit_and_watch(
        &self,
        call: &Call,
        signer: &dyn Signer,
        nonce: NoncePolicy,
    ) -> Result<Submitted> {
        let response = lock(&self.responses).pop_front();
        if let Some(MockResponse::Reject(error)) = response {
            return Err(error);
        }

        let public_key = signer.public_key();
        let nonce = self.resolve_nonce(&public_key, nonce);

        let mut payload = call.encode()?;
        payload.extend_from_slice(&nonce.to_le_bytes());
        let signature = signer.sign(&payload)?;
        payload.extend_from_slice(&signature.bytes);
        let tx_hash = Hash32::keccak256(&payload);

        debug!("Mock accepted {} as {} (nonce {})", call, tx_hash, nonce);
        lock(&self.submitted).push(SubmittedCall {
            call: call.clone(),
            signer: public_key,
            nonce,
            tx_hash,
        });

        let updates = match response {
            Some(MockResponse::Updates(updates)) => stream::iter(updates).boxed(),
            Some(MockResponse::Hang(updates)) => {
                stream::iter(updates).chain(stream::pending()).boxed()
            }
            _ => stream::iter(Self::default_updates(&tx_hash)).boxed(),
        };

        Ok(Submitted { tx_hash, updates })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::Ed25519Signer;

    #[tokio::test]
    async fn test_auto_nonce_advances_per_signer() {
        let connection = MockConnection::default();
        let alice = Ed25519Signer::from_bytes(&[1u8; 32]);
        let bob = Ed25519Signer::from_bytes(&[2u8; 32]);
        let call = Call::new("did", "register", vec![]);

        for signer in [&alice, &alice, &bob] {
            connection
                .submit_and_watch(&call, signer, NoncePolicy::Auto)
                .await
                .unwrap();
        }
        connection
            .submit_and_watch(&call, &alice, NoncePolicy::Explicit(10))
            .await
            .unwrap();
        connection
            .submit_and_watch(&call, &alice, NoncePolicy::Auto)
            .await
            .unwrap();

        let nonces: Vec<u64> = connection
            .submitted_calls()
            .iter()
            .map(|c| c.nonce)
            .collect();
        assert_eq!(nonces, vec![0, 1, 0, 10, 11]);
    }

    #[tokio::test]
    async fn test_identical_calls_get_distinct_hashes() {
        let connection = MockConnection::default();
        let signer = Ed25519Signer::from_bytes(&[1u8; 32]);
        let call = Call::new("did", "register", vec![]);

        let first = connection
            .submit_and_watch(&call, &signer, NoncePolicy::Auto)
            .await
            .unwrap();
        let second = connection
            .submit_and_watch(&call, &signer, NoncePolicy::Auto)
            .await
            .unwrap();
        assert_ne!(first.tx_hash, second.tx_hash);
    }

    #[tokio::test]
    async fn test_default_script_includes_and_finalizes() {
        let connection = MockConnection::default();
        let signer = Ed25519Signer::from_bytes(&[1u8; 32]);
        let call = Call::new("did", "register", vec![]);

        let submitted = connection
            .submit_and_watch(&call, &signer, NoncePolicy::Auto)
            .await
            .unwrap();
        let statuses: Vec<TxStatus> = submitted.updates.map(|u| u.status).collect().await;

        assert_eq!(statuses.len(), 3);
        assert!(matches!(statuses[1], TxStatus::InBlock(_)));
        assert!(matches!(statuses[2], TxStatus::Finalized(_)));
    }
}
