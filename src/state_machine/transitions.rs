//! Pure transition tables for streams and data units.
//!
//! Stores consult these before mutating a row so that an invalid transition
//! surfaces as an error instead of silently corrupting unit state.

use super::errors::{StateMachineError, StateMachineResult};
use super::events::UnitEvent;
use super::states::{DataUnitState, StreamState};

pub struct StreamStateMachine;

impl StreamStateMachine {
    pub fn determine_target_state(
        current: StreamState,
        event: UnitEvent,
    ) -> StateMachineResult<StreamState> {
        let target = match (current, event) {
            (StreamState::Pending, UnitEvent::Start) => StreamState::Processing,

            (StreamState::Processing, UnitEvent::Complete) => StreamState::Processed,

            // Pending covers "no processor registered", found before claiming
            (StreamState::Pending | StreamState::Processing, UnitEvent::Fail) => {
                StreamState::Error
            }

            // Processing covers rate-limited webhook streams, which are delayed
            // without being marked failed
            (StreamState::Error | StreamState::Processing, UnitEvent::Delay) => {
                StreamState::Delayed
            }

            (
                StreamState::Pending
                | StreamState::Processing
                | StreamState::Error
                | StreamState::Delayed,
                UnitEvent::Reset,
            ) => StreamState::Pending,

            (from_state, event) => {
                return Err(StateMachineError::InvalidTransition {
                    from: Some(from_state.to_string()),
                    to: event.event_type().to_string(),
                })
            }
        };

        Ok(target)
    }

    /// States from which `event` is a valid transition; used by the Postgres
    /// store to guard conditional updates.
    pub fn source_states(event: UnitEvent) -> Vec<StreamState> {
        StreamState::ALL
            .into_iter()
            .filter(|state| Self::determine_target_state(*state, event).is_ok())
            .collect()
    }
}

pub struct DataUnitStateMachine;

impl DataUnitStateMachine {
    pub fn determine_target_state(
        current: DataUnitState,
        event: UnitEvent,
    ) -> StateMachineResult<DataUnitState> {
        let target = match (current, event) {
            (DataUnitState::Pending, UnitEvent::Start) => DataUnitState::Processing,
            (DataUnitState::Processing, UnitEvent::Complete) => DataUnitState::Processed,
            // Pending covers failures found before the claim (no processor,
            // contract violations)
            (DataUnitState::Pending | DataUnitState::Processing, UnitEvent::Fail) => {
                DataUnitState::Error
            }
            (DataUnitState::Processing | DataUnitState::Error, UnitEvent::Delay) => {
                DataUnitState::Delayed
            }
            (
                DataUnitState::Pending
                | DataUnitState::Processing
                | DataUnitState::Error
                | DataUnitState::Delayed,
                UnitEvent::Reset,
            ) => DataUnitState::Pending,
            (from_state, event) => {
                return Err(StateMachineError::InvalidTransition {
                    from: Some(from_state.to_string()),
                    to: event.event_type().to_string(),
                })
            }
        };

        Ok(target)
    }

    pub fn source_states(event: UnitEvent) -> Vec<DataUnitState> {
        DataUnitState::ALL
            .into_iter()
            .filter(|state| Self::determine_target_state(*state, event).is_ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_happy_path() {
        let processing =
            StreamStateMachine::determine_target_state(StreamState::Pending, UnitEvent::Start)
                .unwrap();
        assert_eq!(processing, StreamState::Processing);
        let processed =
            StreamStateMachine::determine_target_state(processing, UnitEvent::Complete).unwrap();
        assert_eq!(processed, StreamState::Processed);
    }

    #[test]
    fn test_stream_retry_path() {
        let error =
            StreamStateMachine::determine_target_state(StreamState::Processing, UnitEvent::Fail)
                .unwrap();
        let delayed = StreamStateMachine::determine_target_state(error, UnitEvent::Delay).unwrap();
        assert_eq!(delayed, StreamState::Delayed);
        let pending = StreamStateMachine::determine_target_state(delayed, UnitEvent::Reset).unwrap();
        assert_eq!(pending, StreamState::Pending);
    }

    #[test]
    fn test_processed_stream_cannot_move() {
        for event in [
            UnitEvent::Start,
            UnitEvent::Complete,
            UnitEvent::Fail,
            UnitEvent::Delay,
            UnitEvent::Reset,
        ] {
            assert!(
                StreamStateMachine::determine_target_state(StreamState::Processed, event).is_err()
            );
        }
    }

    #[test]
    fn test_stream_cannot_start_twice() {
        let err =
            StreamStateMachine::determine_target_state(StreamState::Processing, UnitEvent::Start)
                .unwrap_err();
        assert!(matches!(err, StateMachineError::InvalidTransition { .. }));
    }

    #[test]
    fn test_source_states_follow_transition_table() {
        assert_eq!(
            StreamStateMachine::source_states(UnitEvent::Start),
            vec![StreamState::Pending]
        );
        assert_eq!(
            StreamStateMachine::source_states(UnitEvent::Delay),
            vec![StreamState::Processing, StreamState::Error]
        );
        assert_eq!(
            DataUnitStateMachine::source_states(UnitEvent::Reset),
            vec![
                DataUnitState::Pending,
                DataUnitState::Processing,
                DataUnitState::Error,
                DataUnitState::Delayed
            ]
        );
    }

    #[test]
    fn test_data_unit_is_claimed_once() {
        let claimed =
            DataUnitStateMachine::determine_target_state(DataUnitState::Pending, UnitEvent::Start)
                .unwrap();
        assert_eq!(claimed, DataUnitState::Processing);
        assert!(DataUnitStateMachine::determine_target_state(claimed, UnitEvent::Start).is_err());
        assert_eq!(
            DataUnitStateMachine::determine_target_state(claimed, UnitEvent::Complete).unwrap(),
            DataUnitState::Processed
        );
        assert!(
            DataUnitStateMachine::determine_target_state(DataUnitState::Pending, UnitEvent::Complete)
                .is_err()
        );
    }
}
