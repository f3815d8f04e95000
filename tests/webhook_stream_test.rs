mod common;

use common::*;
use integration_stream::constants::{locations, system};
use integration_stream::models::StreamScope;
use integration_stream::orchestration::{AbortKind, FailureOutcome, InvocationOutcome};
use integration_stream::state_machine::{DataUnitState, RunState, StreamState, WebhookState};
use serde_json::json;

#[tokio::test]
async fn test_webhook_creates_and_processes_its_stream() {
    let world = TestWorld::new();
    let processor = ScriptedProcessor::new()
        .on_stream(vec![Step::PublishData(json!({"id": "msg-9"}))])
        .shared();
    world.register(processor.clone());
    let webhook = world.seed_webhook();

    let outcome = world
        .orchestrator()
        .process_webhook_stream(webhook.id, None)
        .await
        .unwrap();

    assert_eq!(outcome, InvocationOutcome::Processed);
    assert_eq!(processor.stream_calls(), 1);

    let streams = world.store.streams();
    assert_eq!(streams.len(), 1);
    let stream = &streams[0];
    assert_eq!(stream.scope, StreamScope::Webhook { webhook_id: webhook.id });
    assert_eq!(stream.identifier, webhook.id.to_string());
    assert_eq!(stream.data, Some(webhook.payload.clone()));
    assert_eq!(stream.state, StreamState::Processed);

    assert_eq!(world.store.webhook(webhook.id).unwrap().state, WebhookState::Processed);

    let units = world.store.data_units();
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].scope, stream.scope);
    assert_eq!(world.emitter.data_ready(), vec![units[0].id]);

    assert!(world.emitter.run_stream_finished().is_empty());
    assert_eq!(world.current_run().updated_at, world.run.updated_at);
}

#[tokio::test]
async fn test_redelivered_webhook_reuses_its_stream() {
    let world = TestWorld::new();
    let processor = ScriptedProcessor::new().shared();
    world.register(processor.clone());
    let webhook = world.seed_webhook();
    let orchestrator = world.orchestrator();

    orchestrator.process_webhook_stream(webhook.id, None).await.unwrap();
    let second = orchestrator
        .process_webhook_stream(webhook.id, None)
        .await
        .unwrap();

    assert!(matches!(second, InvocationOutcome::Skipped(_)));
    assert_eq!(world.store.streams().len(), 1);
    assert_eq!(processor.stream_calls(), 1);
}

#[tokio::test]
async fn test_unknown_webhook_is_not_found() {
    let world = TestWorld::new();

    let outcome = world
        .orchestrator()
        .process_webhook_stream(uuid::Uuid::new_v4(), None)
        .await
        .unwrap();

    assert_eq!(outcome, InvocationOutcome::NotFound);
    assert!(world.store.streams().is_empty());
}

#[tokio::test]
async fn test_child_stream_of_webhook_gets_generated_webhook() {
    let world = TestWorld::new();
    world.register(
        ScriptedProcessor::new()
            .on_stream(vec![Step::PublishStream(
                "thread-5".to_string(),
                Some(json!({"threadId": 5})),
            )])
            .shared(),
    );
    let webhook = world.seed_webhook();

    world
        .orchestrator()
        .process_webhook_stream(webhook.id, None)
        .await
        .unwrap();

    let generated = world
        .store
        .webhooks()
        .into_iter()
        .find(|w| w.id != webhook.id)
        .expect("generated webhook");
    assert_eq!(generated.webhook_type, system::GENERATED_WEBHOOK_TYPE);
    assert_eq!(generated.state, WebhookState::Pending);
    assert_eq!(generated.payload, json!({"threadId": 5}));

    let child = world
        .store
        .streams()
        .into_iter()
        .find(|s| s.identifier == "thread-5")
        .unwrap();
    assert_eq!(child.scope, StreamScope::Webhook { webhook_id: generated.id });
    assert_eq!(world.emitter.webhook_ready(), vec![generated.id]);
    assert!(world.emitter.stream_ready().is_empty());
}

#[tokio::test]
async fn test_exhausted_webhook_stream_marks_webhook() {
    let world = TestWorld::new();
    world.register(
        ScriptedProcessor::new()
            .on_stream(vec![Step::Fail("payload rejected".to_string())])
            .shared(),
    );
    let webhook = world.seed_webhook();
    let mut stream = world.stream_in(StreamScope::Webhook { webhook_id: webhook.id }, "root");
    stream.retries = 5;
    world.store.insert_stream(stream.clone());

    let outcome = world.orchestrator().process_stream(stream.id, None).await.unwrap();

    assert_eq!(
        outcome,
        InvocationOutcome::Failed(FailureOutcome::RetriesExhausted {
            retries: 6,
            run_stopped: false
        })
    );
    let stream = world.current_stream(stream.id);
    assert_eq!(stream.state, StreamState::Error);
    assert_eq!(stream.error.unwrap()["location"], locations::WEBHOOK_STREAM_PROCESS);

    let webhook = world.store.webhook(webhook.id).unwrap();
    assert_eq!(webhook.state, WebhookState::Error);
    assert_eq!(webhook.error.unwrap()["metadata"]["retries"], 6);
    assert_eq!(world.current_run().state, RunState::Processing);
}

#[tokio::test]
async fn test_rate_limited_webhook_stream_delays_itself() {
    let world = TestWorld::new();
    world.register(
        ScriptedProcessor::new()
            .on_stream(vec![Step::RateLimit(300)])
            .shared(),
    );
    let webhook = world.seed_webhook();

    let outcome = world
        .orchestrator()
        .process_webhook_stream(webhook.id, None)
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        InvocationOutcome::Failed(FailureOutcome::RateLimited { .. })
    ));
    let stream = world.store.streams().remove(0);
    assert_eq!(stream.state, StreamState::Delayed);
    assert_eq!(stream.retries, 0);
    assert_about_from_now(stream.delayed_until, 300, 5);
    assert_eq!(world.current_run().state, RunState::Processing);
    assert_eq!(world.store.webhook(webhook.id).unwrap().state, WebhookState::Pending);
}

#[tokio::test]
async fn test_abort_run_on_webhook_stream_marks_webhook_and_stream() {
    let world = TestWorld::new();
    world.register(
        ScriptedProcessor::new()
            .on_stream(vec![Step::AbortRun("webhook signature invalid".to_string())])
            .shared(),
    );
    let webhook = world.seed_webhook();

    let outcome = world
        .orchestrator()
        .process_webhook_stream(webhook.id, None)
        .await
        .unwrap();

    assert_eq!(outcome, InvocationOutcome::Aborted(AbortKind::Run));
    let webhook = world.store.webhook(webhook.id).unwrap();
    assert_eq!(webhook.state, WebhookState::Error);
    assert_eq!(webhook.error.unwrap()["location"], locations::WEBHOOK_STREAM_ABORT);
    assert_eq!(world.store.streams()[0].state, StreamState::Error);
    assert_eq!(world.current_run().state, RunState::Processing);
}

#[tokio::test]
async fn test_needs_reconnect_deletes_webhook_and_stream() {
    let world = TestWorld::new();
    let processor = ScriptedProcessor::new().shared();
    world.register(processor.clone());
    world.set_integration_status(system::INTEGRATION_NEEDS_RECONNECT);
    let webhook = world.seed_webhook();

    world
        .orchestrator()
        .process_webhook_stream(webhook.id, None)
        .await
        .unwrap();

    assert!(world.store.webhook(webhook.id).is_none());
    assert!(world.store.streams().is_empty());
    assert_eq!(processor.stream_calls(), 0);
}

#[tokio::test]
async fn test_webhook_data_rate_limit_delays_the_unit() {
    let world = TestWorld::new();
    world.register(
        ScriptedProcessor::new()
            .on_data(vec![Step::RateLimit(90)])
            .shared(),
    );
    let webhook = world.seed_webhook();
    let stream = world.stream_in(StreamScope::Webhook { webhook_id: webhook.id }, "root");
    world.store.insert_stream(stream.clone());
    let unit = world.seed_data_unit(&stream, 0);

    world.transformer().process_data(unit.id).await.unwrap();

    let unit = world.current_data(unit.id);
    assert_eq!(unit.state, DataUnitState::Delayed);
    assert_about_from_now(unit.delayed_until, 90, 5);
    assert_eq!(world.current_run().state, RunState::Processing);
}
