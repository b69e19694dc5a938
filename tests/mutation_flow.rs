//! Mutation settlement protocol against a scripted transport.

use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use resilient_fetch::config::ClientConfig;
use resilient_fetch::http::{FetchError, RequestDescriptor};
use resilient_fetch::resilience::CircuitBreaker;
use resilient_fetch::resource::{MutationHooks, NoHooks};
use resilient_fetch::{FetchClient, ResourceStatus};

mod common;
use common::{response, server_error, MockTransport};

/// Records every hook invocation in order.
#[derive(Clone, Default)]
struct Recorder {
    events: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl MutationHooks<Value, Value> for Recorder {
    type Context = String;

    fn on_mutate(&self, body: &Value) -> String {
        self.push("mutate".into());
        body["name"].as_str().unwrap_or_default().to_string()
    }

    fn on_success(&self, _value: &Value, context: &String) {
        self.push(format!("success:{context}"));
    }

    fn on_error(&self, _error: &FetchError, context: &String) {
        self.push(format!("error:{context}"));
    }

    fn on_settled(&self, context: String) {
        self.push(format!("settled:{context}"));
    }
}

fn client_with(transport: &Arc<MockTransport>) -> FetchClient {
    FetchClient::with_transport(ClientConfig::default(), transport.clone()).unwrap()
}

fn create() -> RequestDescriptor {
    RequestDescriptor::post("http://api.test/items")
}

#[tokio::test]
async fn test_success_runs_hooks_in_order() {
    let transport = MockTransport::new();
    transport.push_json(r#"{"id":7}"#);
    let client = client_with(&transport);
    let recorder = Recorder::default();
    let mutation = client.mutation::<Value, Value, _>(recorder.clone());

    let created = mutation.mutate(create(), json!({"name": "x"})).await.unwrap();

    assert_eq!(created, json!({"id": 7}));
    assert_eq!(recorder.events(), vec!["mutate", "success:x", "settled:x"]);

    let snapshot = mutation.snapshot();
    assert_eq!(snapshot.status, ResourceStatus::Resolved);
    assert!(!snapshot.is_loading);
    assert_eq!(snapshot.value, Some(json!({"id": 7})));

    let sent = &transport.requests()[0];
    assert_eq!(sent.body, Some(json!({"name": "x"})));
    assert!(sent.no_dedupe);
}

#[tokio::test]
async fn test_failure_runs_error_then_settled() {
    let transport = MockTransport::new();
    transport.push(server_error());
    let client = client_with(&transport);
    let recorder = Recorder::default();
    let mutation = client.mutation::<Value, Value, _>(recorder.clone());

    let error = mutation
        .mutate(create(), json!({"name": "y"}))
        .await
        .unwrap_err();

    assert_eq!(error.status_code(), Some(500));
    assert_eq!(recorder.events(), vec!["mutate", "error:y", "settled:y"]);
    let snapshot = mutation.snapshot();
    assert!(snapshot.error.is_some());
    assert_eq!(snapshot.status_code, Some(500));
    assert_eq!(mutation.breaker().failure_count(), 1);
}

#[tokio::test]
async fn test_open_breaker_blocks_but_still_settles() {
    let transport = MockTransport::new();
    let client = client_with(&transport);
    let breaker = CircuitBreaker::new(1, Duration::from_secs(30));
    breaker.fail();

    let recorder = Recorder::default();
    let mutation = client
        .mutation::<Value, Value, _>(recorder.clone())
        .circuit_breaker(breaker);

    let error = mutation
        .mutate(create(), json!({"name": "z"}))
        .await
        .unwrap_err();

    assert_eq!(error, FetchError::CircuitOpen);
    assert_eq!(transport.calls(), 0);
    assert_eq!(recorder.events(), vec!["mutate", "error:z", "settled:z"]);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_caller_still_settles() {
    let transport = MockTransport::with_delay(Duration::from_millis(100));
    transport.push_json(r#"{"id":1}"#);
    let client = client_with(&transport);
    let recorder = Recorder::default();
    let mutation = client.mutation::<Value, Value, _>(recorder.clone());

    let abandoned = tokio::time::timeout(
        Duration::from_millis(10),
        mutation.mutate(create(), json!({"name": "a"})),
    )
    .await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(recorder.events(), vec!["mutate", "success:a", "settled:a"]);
}

#[tokio::test(start_paused = true)]
async fn test_reset_mutation_settles_without_publishing() {
    let transport = MockTransport::with_delay(Duration::from_millis(100));
    transport.push_json(r#"{"id":1}"#);
    let client = client_with(&transport);
    let recorder = Recorder::default();
    let mutation = client.mutation::<Value, Value, _>(recorder.clone());

    let pending = mutation.mutate(create(), json!({"name": "r"}));
    tokio::pin!(pending);
    assert!(tokio::time::timeout(Duration::from_millis(10), &mut pending)
        .await
        .is_err());
    assert!(mutation.snapshot().is_loading);

    mutation.reset();
    assert!(pending.await.is_ok());

    assert_eq!(recorder.events(), vec!["mutate", "success:r", "settled:r"]);
    assert_eq!(mutation.snapshot().status, ResourceStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_superseded_mutation_settles_once_without_publishing() {
    let transport = MockTransport::with_delay(Duration::from_millis(100));
    transport.push_json(r#"{"id":1}"#);
    transport.push_json(r#"{"id":2}"#);
    let client = client_with(&transport);
    let recorder = Recorder::default();
    let mutation = client.mutation::<Value, Value, _>(recorder.clone());

    let first = mutation.mutate(create(), json!({"name": "a"}));
    tokio::pin!(first);
    assert!(tokio::time::timeout(Duration::from_millis(10), &mut first)
        .await
        .is_err());

    let second = mutation.mutate(create(), json!({"name": "b"}));
    tokio::pin!(second);
    assert!(tokio::time::timeout(Duration::from_millis(95), &mut second)
        .await
        .is_err());

    // The first write has settled; only the second may publish.
    let between = mutation.snapshot();
    assert!(between.is_loading);
    assert_eq!(between.value, None);

    assert_eq!(first.await.unwrap(), json!({"id": 1}));
    assert_eq!(second.await.unwrap(), json!({"id": 2}));
    assert_eq!(
        recorder.events(),
        vec!["mutate", "mutate", "success:a", "settled:a", "success:b", "settled:b"]
    );

    let snapshot = mutation.snapshot();
    assert_eq!(snapshot.status, ResourceStatus::Resolved);
    assert!(!snapshot.is_loading);
    assert_eq!(snapshot.value, Some(json!({"id": 2})));
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_success_invalidates_dependent_cache_entries() {
    let transport = MockTransport::new();
    transport.push(Ok(response(
        200,
        "[]",
        &[("cache-control", "max-age=60, stale-while-revalidate=30")],
    )));
    transport.push_json(r#"{"id":2}"#);
    let client = client_with(&transport);
    let list = RequestDescriptor::get("http://api.test/items");

    let resource = client.resource::<Value>().build();
    resource.load(Some(list.clone())).await;
    assert!(client.cache().contains_key(&list.cache_key()));

    let mutation = client
        .mutation::<Value, Value, _>(NoHooks)
        .invalidates(list.clone());
    mutation.mutate(create(), json!({"name": "n"})).await.unwrap();

    assert!(!client.cache().contains_key(&list.cache_key()));
}

#[tokio::test]
async fn test_empty_success_body_parses_as_unit() {
    let transport = MockTransport::new();
    transport.push(Ok(response(204, "", &[])));
    let client = client_with(&transport);
    let mutation = client.mutation::<Value, (), _>(NoHooks);

    let outcome = mutation
        .mutate(RequestDescriptor::delete("http://api.test/items/1"), json!({}))
        .await;
    assert!(outcome.is_ok());
}
