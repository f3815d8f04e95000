mod common;

use common::*;
use integration_stream::constants::{error_codes, locations};
use integration_stream::models::ResultType;
use integration_stream::orchestration::{
    AbortKind, FailureOutcome, InvocationOutcome, SkipReason,
};
use integration_stream::state_machine::{DataUnitState, RunState, StreamState};
use serde_json::json;

#[tokio::test]
async fn test_results_are_published_to_the_sink() {
    let world = TestWorld::new();
    world.register(
        ScriptedProcessor::new()
            .on_data(vec![
                Step::PublishActivity(activity("msg-1")),
                Step::PublishCustom(
                    json!({"handle": "ada", "followers": 12}),
                    ResultType::Custom("profile".to_string()),
                ),
            ])
            .shared(),
    );
    let stream = world.seed_stream("root", 0);
    let unit = world.seed_data_unit(&stream, 0);

    let outcome = world.transformer().process_data(unit.id).await.unwrap();

    assert_eq!(outcome, InvocationOutcome::Processed);
    assert_eq!(world.current_data(unit.id).state, DataUnitState::Processed);

    let results = world.store.results();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].result_type, ResultType::Activity);
    assert_eq!(results[0].data["sourceId"], "msg-1");
    assert!(results.iter().all(|r| r.onboarding && r.data_id == unit.id));

    let ready = world.emitter.results_ready();
    assert_eq!(ready.len(), 2);
    assert_eq!(ready[0].1, "msg-1");
    assert_eq!(ready[1].1, results[1].id.to_string());

    assert!(world.emitter.run_stream_finished().is_empty());
}

#[tokio::test]
async fn test_abort_run_leaves_unit_pending() {
    let world = TestWorld::new();
    world.register(
        ScriptedProcessor::new()
            .on_data(vec![Step::AbortRun("bad credentials".to_string())])
            .shared(),
    );
    let stream = world.seed_stream("root", 0);
    let unit = world.seed_data_unit(&stream, 0);

    let outcome = world.transformer().process_data(unit.id).await.unwrap();

    assert_eq!(outcome, InvocationOutcome::Aborted(AbortKind::Run));
    let run = world.current_run();
    assert_eq!(run.state, RunState::Error);
    assert_eq!(run.error.unwrap()["location"], locations::DATA_RUN_ABORT);

    let unit = world.current_data(unit.id);
    assert_eq!(unit.state, DataUnitState::Pending);
    assert!(unit.error.is_none());
}

#[tokio::test]
async fn test_abort_marks_only_the_unit() {
    let world = TestWorld::new();
    world.register(
        ScriptedProcessor::new()
            .on_data(vec![Step::Abort("Unparseable payload".to_string())])
            .shared(),
    );
    let stream = world.seed_stream("root", 0);
    let unit = world.seed_data_unit(&stream, 0);

    let outcome = world.transformer().process_data(unit.id).await.unwrap();

    assert_eq!(outcome, InvocationOutcome::Aborted(AbortKind::Unit));
    let unit = world.current_data(unit.id);
    assert_eq!(unit.state, DataUnitState::Error);
    assert_eq!(unit.error.unwrap()["location"], locations::DATA_ABORT);
    assert_eq!(world.current_run().state, RunState::Processing);
}

#[tokio::test]
async fn test_failed_unit_is_retried_with_backoff() {
    let world = TestWorld::new();
    world.register(
        ScriptedProcessor::new()
            .on_data(vec![Step::Fail("unexpected payload shape".to_string())])
            .shared(),
    );
    let stream = world.seed_stream("root", 0);
    let unit = world.seed_data_unit(&stream, 0);

    let outcome = world.transformer().process_data(unit.id).await.unwrap();

    assert!(matches!(
        outcome,
        InvocationOutcome::Failed(FailureOutcome::RetryScheduled { retries: 1, .. })
    ));
    let unit = world.current_data(unit.id);
    assert_eq!(unit.state, DataUnitState::Delayed);
    assert_eq!(unit.retries, 1);
    assert_about_from_now(unit.delayed_until, 900, 10);
    assert_eq!(unit.error.unwrap()["location"], locations::DATA_PROCESS);
    assert_eq!(world.current_run().state, RunState::Processing);
}

#[tokio::test]
async fn test_exhausted_unit_does_not_stop_run() {
    let world = TestWorld::new();
    world.register(
        ScriptedProcessor::new()
            .on_data(vec![Step::Fail("still broken".to_string())])
            .shared(),
    );
    let stream = world.seed_stream("root", 0);
    let unit = world.seed_data_unit(&stream, 5);

    let outcome = world.transformer().process_data(unit.id).await.unwrap();

    assert_eq!(
        outcome,
        InvocationOutcome::Failed(FailureOutcome::RetriesExhausted {
            retries: 6,
            run_stopped: false
        })
    );
    assert_eq!(world.current_data(unit.id).state, DataUnitState::Error);
    assert_eq!(world.current_run().state, RunState::Processing);
}

#[tokio::test]
async fn test_rate_limited_unit_pauses_run() {
    let world = TestWorld::new();
    world.register(
        ScriptedProcessor::new()
            .on_data(vec![Step::RateLimit(60)])
            .shared(),
    );
    let stream = world.seed_stream("root", 0);
    let unit = world.seed_data_unit(&stream, 2);

    world.transformer().process_data(unit.id).await.unwrap();

    let unit = world.current_data(unit.id);
    assert_eq!(unit.state, DataUnitState::Pending);
    assert_eq!(unit.retries, 2);
    let run = world.current_run();
    assert_eq!(run.state, RunState::Delayed);
    assert_about_from_now(run.delayed_until, 60, 5);
}

#[tokio::test]
async fn test_data_stage_can_request_streams() {
    let world = TestWorld::new();
    world.register(
        ScriptedProcessor::new()
            .on_data(vec![Step::PublishStream(
                "thread-77".to_string(),
                Some(json!({"threadId": 77})),
            )])
            .shared(),
    );
    let stream = world.seed_stream("root", 0);
    let unit = world.seed_data_unit(&stream, 0);

    world.transformer().process_data(unit.id).await.unwrap();

    let child = world
        .store
        .streams()
        .into_iter()
        .find(|s| s.identifier == "thread-77")
        .unwrap();
    assert_eq!(child.parent_id, Some(stream.id));
    assert_eq!(child.scope, world.run_scope());
    assert_eq!(child.state, StreamState::Pending);
    assert_eq!(world.emitter.stream_ready(), vec![child.id]);
}

#[tokio::test]
async fn test_stopped_run_skips_data() {
    let world = TestWorld::new();
    let processor = ScriptedProcessor::new().shared();
    world.register(processor.clone());
    world.set_run_state(RunState::Error);
    let stream = world.seed_stream("root", 0);
    let unit = world.seed_data_unit(&stream, 0);

    let outcome = world.transformer().process_data(unit.id).await.unwrap();

    assert_eq!(outcome, InvocationOutcome::Skipped(SkipReason::RunStopped));
    assert_eq!(processor.data_calls(), 0);
}

#[tokio::test]
async fn test_processed_unit_is_consumed_once() {
    let world = TestWorld::new();
    let processor = ScriptedProcessor::new()
        .on_data(vec![Step::PublishActivity(activity("msg-1"))])
        .shared();
    world.register(processor.clone());
    let stream = world.seed_stream("root", 0);
    let unit = world.seed_data_unit(&stream, 0);
    let transformer = world.transformer();

    transformer.process_data(unit.id).await.unwrap();
    let second = transformer.process_data(unit.id).await.unwrap();

    assert_eq!(
        second,
        InvocationOutcome::Skipped(SkipReason::NotPending("processed".to_string()))
    );
    assert_eq!(processor.data_calls(), 1);
    assert_eq!(world.store.results().len(), 1);
}

#[tokio::test]
async fn test_missing_processor_fails_the_unit() {
    let world = TestWorld::new();
    let stream = world.seed_stream("root", 0);
    let unit = world.seed_data_unit(&stream, 0);

    let outcome = world.transformer().process_data(unit.id).await.unwrap();

    assert_eq!(outcome, InvocationOutcome::Failed(FailureOutcome::UnitFailed));
    let unit = world.current_data(unit.id);
    assert_eq!(unit.state, DataUnitState::Error);
    let error = unit.error.unwrap();
    assert_eq!(error["location"], locations::CHECK_DATA_PROCESSOR);
    assert_eq!(error["errorCode"], error_codes::NO_PROCESSOR);
}

#[tokio::test]
async fn test_sink_failure_is_a_run_level_error() {
    let world = TestWorld::new();
    world.register(
        ScriptedProcessor::new()
            .on_data(vec![Step::PublishActivity(activity("msg-1"))])
            .shared(),
    );
    world.emitter.set_failing(true);
    let stream = world.seed_stream("root", 0);
    let unit = world.seed_data_unit(&stream, 0);

    let outcome = world.transformer().process_data(unit.id).await.unwrap();

    assert_eq!(outcome, InvocationOutcome::Failed(FailureOutcome::UnitFailed));
    let run = world.current_run();
    assert_eq!(run.state, RunState::Error);
    assert_eq!(run.error.unwrap()["location"], locations::PUBLISH_RESULT);
    assert_eq!(world.current_data(unit.id).state, DataUnitState::Error);
}

#[tokio::test]
async fn test_rate_limited_unit_is_re_emitted_when_run_continues() {
    let world = TestWorld::new();
    let processor = ScriptedProcessor::new()
        .on_data(vec![Step::RateLimit(1)])
        .shared();
    world.register(processor.clone());
    let stream = world.seed_stream_in_state("root", StreamState::Processed, None, chrono::Utc::now());
    let unit = world.seed_data_unit(&stream, 0);

    world.transformer().process_data(unit.id).await.unwrap();
    assert_eq!(world.current_data(unit.id).state, DataUnitState::Pending);
    assert_eq!(world.current_run().state, RunState::Delayed);

    // The run owner resumes the run once the pause is over
    world.set_run_state(RunState::Processing);
    world.emitter.clear();
    let emitted = world
        .maintenance()
        .continue_processing_run_streams(world.run.id)
        .await
        .unwrap();

    assert_eq!(emitted, 1);
    assert_eq!(world.emitter.data_ready(), vec![unit.id]);
}

#[tokio::test]
async fn test_unit_skipped_while_run_delayed_is_re_emitted() {
    let world = TestWorld::new();
    let processor = ScriptedProcessor::new()
        .on_data(vec![Step::PublishActivity(activity("msg-1"))])
        .shared();
    world.register(processor.clone());
    let stream = world.seed_stream_in_state("root", StreamState::Processed, None, chrono::Utc::now());
    let unit = world.seed_data_unit(&stream, 0);
    world.set_run_state(RunState::Delayed);

    let outcome = world.transformer().process_data(unit.id).await.unwrap();
    assert_eq!(outcome, InvocationOutcome::Skipped(SkipReason::RunDelayed));

    world.set_run_state(RunState::Processing);
    world
        .maintenance()
        .continue_processing_run_streams(world.run.id)
        .await
        .unwrap();
    assert_eq!(world.emitter.data_ready(), vec![unit.id]);

    let outcome = world.transformer().process_data(unit.id).await.unwrap();
    assert_eq!(outcome, InvocationOutcome::Processed);
    assert_eq!(processor.data_calls(), 1);
    assert_eq!(world.store.results().len(), 1);
}

#[tokio::test]
async fn test_concurrent_deliveries_process_unit_once() {
    let world = TestWorld::new();
    let processor = ScriptedProcessor::new()
        .on_data(vec![
            Step::WaitForRelease,
            Step::PublishActivity(activity("msg-1")),
        ])
        .shared();
    world.register(processor.clone());
    let stream = world.seed_stream("root", 0);
    let unit = world.seed_data_unit(&stream, 0);
    let first = world.transformer();
    let second = world.transformer();

    // The redelivery arrives while the first delivery is inside the processor
    let redelivery = async {
        processor.wait_until_invoked().await;
        let outcome = second.process_data(unit.id).await;
        processor.release();
        outcome
    };
    let (a, b) = tokio::join!(first.process_data(unit.id), redelivery);

    assert_eq!(a.unwrap(), InvocationOutcome::Processed);
    assert_eq!(
        b.unwrap(),
        InvocationOutcome::Skipped(SkipReason::NotPending("processing".to_string()))
    );
    assert_eq!(processor.data_calls(), 1);
    assert_eq!(world.store.results().len(), 1);
    assert_eq!(world.current_data(unit.id).state, DataUnitState::Processed);
}

#[tokio::test]
async fn test_claim_failure_leaves_unit_pending() {
    let world = TestWorld::new();
    let processor = ScriptedProcessor::new().shared();
    world.register(processor.clone());
    let stream = world.seed_stream("root", 0);
    let unit = world.seed_data_unit(&stream, 0);
    world.store.fail_operation("claim_data");

    let result = world.transformer().process_data(unit.id).await;

    assert!(result.is_err());
    assert_eq!(processor.data_calls(), 0);
    assert_eq!(world.current_data(unit.id).state, DataUnitState::Pending);
}
