//! Content fingerprinting and fingerprint-gated writes.
//!
//! A fingerprint is the first 16 hex characters of the SHA-256 digest of the
//! pipe-joined UTF-8 field tuple. Field order matters. There is no fuzzy
//! matching here: near-duplicates are left to the model, which sees the
//! stored events in its prompt.

use blv_core::error::StoreError;
use blv_core::knowledge::{NewFinding, NewHttpRequest};
use blv_core::store::{Collection, KnowledgeStore, NewRecord};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info};

use crate::cleaning::clean_request;

const FINGERPRINT_LEN: usize = 16;

/// Order-sensitive digest of `fields`.
pub fn fingerprint(fields: &[&str]) -> String {
    let joined = fields.join("|");
    let digest = Sha256::digest(joined.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(FINGERPRINT_LEN);
    hex
}

/// Result of a fingerprint-gated write. A duplicate is not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted { fingerprint: String },
    Duplicate { fingerprint: String },
}

impl WriteOutcome {
    pub fn fingerprint(&self) -> &str {
        match self {
            WriteOutcome::Inserted { fingerprint } | WriteOutcome::Duplicate { fingerprint } => {
                fingerprint
            }
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, WriteOutcome::Duplicate { .. })
    }
}

/// Decides new-versus-duplicate and performs the write.
#[derive(Clone)]
pub struct Deduplicator {
    store: Arc<dyn KnowledgeStore>,
}

impl Deduplicator {
    pub fn new(store: Arc<dyn KnowledgeStore>) -> Self {
        Self { store }
    }

    pub async fn is_duplicate(
        &self,
        collection: Collection,
        fingerprint: &str,
    ) -> Result<bool, StoreError> {
        self.store.contains_fingerprint(collection, fingerprint).await
    }

    /// Fingerprint over pattern, target, technique and impact.
    pub async fn record_finding(&self, finding: NewFinding) -> Result<WriteOutcome, StoreError> {
        let fp = fingerprint(&finding.fingerprint_fields());
        self.write(fp, NewRecord::Finding(finding)).await
    }

    /// Cleans the exchange, then fingerprints url, method and cleaned body.
    pub async fn record_request(&self, request: NewHttpRequest) -> Result<WriteOutcome, StoreError> {
        let request = clean_request(request);
        let fp = fingerprint(&request.fingerprint_fields());
        self.write(fp, NewRecord::Request(request)).await
    }

    async fn write(&self, fingerprint: String, record: NewRecord) -> Result<WriteOutcome, StoreError> {
        let collection = record.collection();
        let inserted = self.store.insert_if_new(&fingerprint, record).await?;

        if inserted {
            debug!(collection = collection.as_str(), fingerprint = %fingerprint, "Record inserted");
            Ok(WriteOutcome::Inserted { fingerprint })
        } else {
            info!(collection = collection.as_str(), fingerprint = %fingerprint, "Duplicate skipped");
            Ok(WriteOutcome::Duplicate { fingerprint })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryStore;

    fn finding(pattern: &str, target: &str) -> NewFinding {
        NewFinding {
            pattern: pattern.into(),
            worked: true,
            target: target.into(),
            technique: "replay".into(),
            impact: "account takeover".into(),
            ..Default::default()
        }
    }

    #[test]
    fn fingerprint_is_sha256_prefix_of_pipe_join() {
        let fp = fingerprint(&["a", "b"]);
        assert_eq!(fp.len(), 16);
        let expected = hex::encode(Sha256::digest(b"a|b"));
        assert_eq!(fp, expected[..16]);
    }

    #[test]
    fn fingerprint_is_order_sensitive() {
        assert_ne!(fingerprint(&["a", "b"]), fingerprint(&["b", "a"]));
        assert_eq!(fingerprint(&["x", "y", "z"]), fingerprint(&["x", "y", "z"]));
    }

    #[tokio::test]
    async fn same_tuple_twice_persists_once() {
        let store = Arc::new(InMemoryStore::new());
        let dedup = Deduplicator::new(store.clone());

        let first = dedup.record_finding(finding("IDOR", "/api/orders")).await.unwrap();
        let second = dedup.record_finding(finding("IDOR", "/api/orders")).await.unwrap();

        assert!(matches!(first, WriteOutcome::Inserted { .. }));
        assert!(second.is_duplicate());
        assert_eq!(first.fingerprint(), second.fingerprint());
        assert_eq!(store.get_recent_events(10, false).await.unwrap().len(), 1);
        assert!(dedup.is_duplicate(Collection::Events, first.fingerprint()).await.unwrap());
    }

    #[tokio::test]
    async fn notes_and_payload_do_not_affect_identity() {
        let store = Arc::new(InMemoryStore::new());
        let dedup = Deduplicator::new(store);

        let mut a = finding("IDOR", "/api/orders");
        a.notes = Some("first".into());
        let mut b = finding("IDOR", "/api/orders");
        b.payload = Some("order_id=2".into());
        b.worked = false;

        dedup.record_finding(a).await.unwrap();
        assert!(dedup.record_finding(b).await.unwrap().is_duplicate());
    }

    #[tokio::test]
    async fn requests_dedup_on_cleaned_body() {
        let store = Arc::new(InMemoryStore::new());
        let dedup = Deduplicator::new(store.clone());
        let request = |ua: &str| NewHttpRequest {
            url: "https://shop.example/api/cart".into(),
            method: "POST".into(),
            headers: format!("Host: shop.example\nUser-Agent: {ua}"),
            body: r#"{"item_id":4,"price":10}"#.into(),
            response: "HTTP/1.1 200 OK\nServer: x\n\n{}".into(),
        };

        assert!(!dedup.record_request(request("curl")).await.unwrap().is_duplicate());
        assert!(dedup.record_request(request("firefox")).await.unwrap().is_duplicate());

        let stored = store.get_requests(10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert!(!stored[0].headers.to_lowercase().contains("user-agent"));
    }

    #[tokio::test]
    async fn collections_are_independent() {
        let store = Arc::new(InMemoryStore::new());
        let dedup = Deduplicator::new(store);
        let outcome = dedup.record_finding(finding("x", "y")).await.unwrap();
        assert!(!dedup.is_duplicate(Collection::Requests, outcome.fingerprint()).await.unwrap());
    }
}
