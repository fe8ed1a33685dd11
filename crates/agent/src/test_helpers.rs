//! Store seeding shared by unit tests.

use blv_core::knowledge::{KnowledgeBody, NewFinding, NewHttpRequest};
use blv_core::store::{KnowledgeStore, NewRecord};
use blv_store::{InMemoryStore, fingerprint};

pub fn trigger(pattern: &str, response: &str) -> KnowledgeBody {
    KnowledgeBody::Trigger {
        pattern: pattern.into(),
        response: response.into(),
        category: None,
    }
}

pub async fn seed_event(store: &InMemoryStore, pattern: &str, worked: bool) {
    let finding = NewFinding {
        pattern: pattern.into(),
        worked,
        target: "shop".into(),
        technique: "replay".into(),
        impact: "bypass".into(),
        ..Default::default()
    };
    let fp = fingerprint(&finding.fingerprint_fields());
    store
        .insert_if_new(&fp, NewRecord::Finding(finding))
        .await
        .unwrap();
}

pub async fn seed_request(store: &InMemoryStore, url: &str, body: &str) {
    let request = NewHttpRequest {
        url: url.into(),
        method: "POST".into(),
        body: body.into(),
        ..Default::default()
    };
    let fp = fingerprint(&request.fingerprint_fields());
    store
        .insert_if_new(&fp, NewRecord::Request(request))
        .await
        .unwrap();
}
