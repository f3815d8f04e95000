mod common;

use chrono::{Duration, Utc};
use common::*;
use integration_stream::config::WorkerConfig;
use integration_stream::models::StreamScope;
use integration_stream::orchestration::MaintenanceReport;
use integration_stream::state_machine::{DataUnitState, RunState, StreamState};

#[tokio::test]
async fn test_check_streams_resets_due_units() {
    let world = TestWorld::new();
    let past = Utc::now() - Duration::minutes(1);
    let due = world.seed_stream_in_state("due", StreamState::Delayed, Some(past), past);
    let later = world.seed_stream_in_state(
        "later",
        StreamState::Delayed,
        Some(Utc::now() + Duration::minutes(10)),
        past,
    );

    let mut unit = world.seed_data_unit(&due, 1);
    unit.state = DataUnitState::Delayed;
    unit.delayed_until = Some(past);
    world.store.insert_data_unit(unit.clone());

    let report = world.maintenance().check_streams().await.unwrap();

    assert_eq!(
        report,
        MaintenanceReport {
            streams_reset: 1,
            data_reset: 1,
            stale_streams_reset: 0,
            stale_data_reset: 0,
        }
    );
    let due = world.current_stream(due.id);
    assert_eq!(due.state, StreamState::Pending);
    assert!(due.delayed_until.is_none());
    assert_eq!(world.current_stream(later.id).state, StreamState::Delayed);

    let unit = world.current_data(unit.id);
    assert_eq!(unit.state, DataUnitState::Pending);
    assert_eq!(unit.retries, 1);

    assert_eq!(world.emitter.stream_ready(), vec![due.id]);
    assert_eq!(world.emitter.data_ready(), vec![unit.id]);
}

#[tokio::test]
async fn test_check_streams_pages_through_backlog() {
    let config = WorkerConfig {
        delayed_stream_batch_size: 3,
        ..WorkerConfig::default()
    };
    let world = TestWorld::with_config(config);
    let past = Utc::now() - Duration::minutes(5);
    for i in 0..8 {
        world.seed_stream_in_state(&format!("s-{i}"), StreamState::Delayed, Some(past), past);
    }

    let report = world.maintenance().check_streams().await.unwrap();

    assert_eq!(report.streams_reset, 8);
    assert!(world
        .store
        .streams()
        .iter()
        .all(|s| s.state == StreamState::Pending));
    assert_eq!(world.emitter.stream_ready().len(), 8);
}

#[tokio::test]
async fn test_delayed_webhook_stream_is_re_emitted_as_webhook() {
    let world = TestWorld::new();
    let webhook = world.seed_webhook();
    let past = Utc::now() - Duration::minutes(1);
    let mut stream = world.stream_in(StreamScope::Webhook { webhook_id: webhook.id }, "root");
    stream.state = StreamState::Delayed;
    stream.delayed_until = Some(past);
    world.store.insert_stream(stream.clone());

    world.maintenance().check_streams().await.unwrap();

    assert_eq!(world.current_stream(stream.id).state, StreamState::Pending);
    assert_eq!(world.emitter.webhook_ready(), vec![webhook.id]);
    assert!(world.emitter.stream_ready().is_empty());
}

#[tokio::test]
async fn test_stopped_run_units_stay_delayed() {
    let world = TestWorld::new();
    world.set_run_state(RunState::Error);
    let past = Utc::now() - Duration::minutes(1);
    let stream = world.seed_stream_in_state("due", StreamState::Delayed, Some(past), past);

    let report = world.maintenance().check_streams().await.unwrap();

    assert_eq!(report, MaintenanceReport::default());
    assert_eq!(world.current_stream(stream.id).state, StreamState::Delayed);
    assert!(world.emitter.notifications().is_empty());
}

#[tokio::test]
async fn test_continue_processing_run_streams_emits_every_pending_stream() {
    let world = TestWorld::new();
    for i in 0..45 {
        world.seed_stream(&format!("channel-{i}"), 0);
    }
    let now = Utc::now();
    world.seed_stream_in_state("done", StreamState::Processed, None, now);
    world.seed_stream_in_state("failed", StreamState::Error, None, now);

    let emitted = world
        .maintenance()
        .continue_processing_run_streams(world.run.id)
        .await
        .unwrap();

    assert_eq!(emitted, 45);
    let mut ready = world.emitter.stream_ready();
    ready.sort();
    ready.dedup();
    assert_eq!(ready.len(), 45);
}

#[tokio::test]
async fn test_continue_processing_re_emits_pending_data_units() {
    let world = TestWorld::new();
    let stream = world.seed_stream_in_state("root", StreamState::Processed, None, Utc::now());
    let first = world.seed_data_unit(&stream, 0);
    let second = world.seed_data_unit(&stream, 1);
    let mut done = world.seed_data_unit(&stream, 0);
    done.state = DataUnitState::Processed;
    world.store.insert_data_unit(done);

    let emitted = world
        .maintenance()
        .continue_processing_run_streams(world.run.id)
        .await
        .unwrap();

    assert_eq!(emitted, 2);
    let mut ready = world.emitter.data_ready();
    ready.sort();
    let mut expected = vec![first.id, second.id];
    expected.sort();
    assert_eq!(ready, expected);
    assert!(world.emitter.stream_ready().is_empty());
}

#[tokio::test]
async fn test_stale_processing_data_units_are_reset() {
    let world = TestWorld::new();
    let stream = world.seed_stream_in_state("root", StreamState::Processed, None, Utc::now());
    let mut stale = world.seed_data_unit(&stream, 0);
    stale.state = DataUnitState::Processing;
    stale.updated_at = Utc::now() - Duration::hours(2);
    world.store.insert_data_unit(stale.clone());
    let mut active = world.seed_data_unit(&stream, 0);
    active.state = DataUnitState::Processing;
    world.store.insert_data_unit(active.clone());

    let reset = world.maintenance().reconcile_stale_data().await.unwrap();

    assert_eq!(reset, 1);
    assert_eq!(world.current_data(stale.id).state, DataUnitState::Pending);
    assert_eq!(world.current_data(active.id).state, DataUnitState::Processing);
    assert_eq!(world.emitter.data_ready(), vec![stale.id]);
}

#[tokio::test]
async fn test_stale_processing_streams_are_reset() {
    let world = TestWorld::new();
    let long_ago = Utc::now() - Duration::hours(2);
    let stale = world.seed_stream_in_state("stale", StreamState::Processing, None, long_ago);
    let active = world.seed_stream_in_state("active", StreamState::Processing, None, Utc::now());

    let reset = world.maintenance().reconcile_stale_streams().await.unwrap();

    assert_eq!(reset, 1);
    assert_eq!(world.current_stream(stale.id).state, StreamState::Pending);
    assert_eq!(world.current_stream(active.id).state, StreamState::Processing);
    assert_eq!(world.emitter.stream_ready(), vec![stale.id]);
}

#[tokio::test]
async fn test_stale_streams_of_stopped_run_are_left_alone() {
    let world = TestWorld::new();
    world.set_run_state(RunState::Error);
    let long_ago = Utc::now() - Duration::hours(2);
    let stream = world.seed_stream_in_state("stale", StreamState::Processing, None, long_ago);

    let reset = world.maintenance().reconcile_stale_streams().await.unwrap();

    assert_eq!(reset, 0);
    assert_eq!(world.current_stream(stream.id).state, StreamState::Processing);
}

#[tokio::test]
async fn test_failed_reset_is_skipped() {
    let world = TestWorld::new();
    let past = Utc::now() - Duration::minutes(1);
    world.seed_stream_in_state("due", StreamState::Delayed, Some(past), past);
    world.store.fail_operation("reset_stream");

    let report = world.maintenance().check_streams().await.unwrap();

    assert_eq!(report.streams_reset, 0);
    assert!(world.emitter.stream_ready().is_empty());
}
