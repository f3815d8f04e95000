//! # System Constants
//!
//! Error locations, default queue names and other fixed values shared by the
//! stream and data stages.

/// Locations recorded in the `location` field of persisted structured errors.
pub mod locations {
    pub const CHECK_STREAM_PROCESSOR: &str = "check-stream-int-service";
    pub const CHECK_WEBHOOK_STREAM_PROCESSOR: &str = "check-webhook-stream-int-service";
    pub const CHECK_DATA_PROCESSOR: &str = "check-data-int-service";
    pub const STREAM_PROCESS: &str = "stream-process";
    pub const WEBHOOK_STREAM_PROCESS: &str = "webhook-stream-process";
    pub const DATA_PROCESS: &str = "integration-data-processing";
    pub const STREAM_ABORT: &str = "stream-abort";
    pub const WEBHOOK_STREAM_ABORT: &str = "webhook-stream-abort";
    pub const DATA_ABORT: &str = "data-abort";
    pub const STREAM_RUN_ABORT: &str = "stream-run-abort";
    pub const DATA_RUN_ABORT: &str = "data-run-abort";
    pub const STREAM_RUN_STOP: &str = "stream-run-stop";
    pub const PUBLISH_CHILD_STREAM: &str = "run-publish-child-stream";
    pub const PUBLISH_STREAM_DATA: &str = "run-publish-stream-data";
    pub const PUBLISH_RESULT: &str = "data-publish-result";
    pub const UPDATE_SETTINGS: &str = "run-stream-update-settings";
    pub const UPDATE_TOKEN: &str = "run-stream-update-token";
    pub const UPDATE_REFRESH_TOKEN: &str = "run-stream-update-refresh-token";
    pub const SET_VISIBILITY_TIMEOUT: &str = "stream-set-visibility-timeout";
}

/// Distinguishing codes for contract violations and other unit-fatal errors.
pub mod error_codes {
    pub const NO_PROCESSOR: &str = "no_processor";
    pub const INVALID_SCOPE: &str = "invalid_scope";
    pub const FAN_OUT_LIMIT: &str = "fan_out_limit";
    pub const RATE_LIMIT: &str = "rate_limit";
    pub const PROCESSOR_FAILURE: &str = "processor_failure";
    pub const CALLBACK_FAILURE: &str = "callback_failure";
}

/// Default queue names
pub mod queues {
    pub const STREAM_QUEUE: &str = "integration_stream_worker";
    pub const DATA_QUEUE: &str = "integration_data_worker";
    pub const RUN_QUEUE: &str = "integration_run_worker";
    pub const DATA_SINK_QUEUE: &str = "data_sink_worker";
}

pub mod system {
    /// Linear backoff step between stream retries
    pub const RETRY_BACKOFF_STEP_SECONDS: i64 = 15 * 60;

    pub const DEFAULT_MAX_STREAM_RETRIES: i32 = 5;

    /// Upper bound on how long a processor-reported rate limit may pause work
    pub const MAX_RATE_LIMIT_PAUSE_SECONDS: i64 = 7 * 24 * 60 * 60;

    /// Page size when re-emitting pending data units of a run
    pub const CONTINUE_RUN_DATA_PAGE_SIZE: i64 = 100;

    /// Lifetime of a concurrent-request counter, so slots leaked by a crashed
    /// worker are eventually returned
    pub const CONCURRENT_REQUEST_SLOT_TTL_SECONDS: u64 = 60 * 60;

    pub const CONCURRENT_REQUEST_POLL_INTERVAL_MS: u64 = 100;

    /// How long a request waits for a free concurrent slot before failing
    pub const CONCURRENT_REQUEST_MAX_WAIT_SECONDS: u64 = 60;

    /// Page size when re-emitting pending streams of a run
    pub const CONTINUE_RUN_STREAMS_PAGE_SIZE: i64 = 20;

    /// Webhook type recorded for webhooks synthesized by `publish_stream` on a
    /// webhook-scoped stream
    pub const GENERATED_WEBHOOK_TYPE: &str = "CROWD_GENERATED";

    /// Integration status that makes the core skip and delete pending work
    pub const INTEGRATION_NEEDS_RECONNECT: &str = "needs-reconnect";
}
