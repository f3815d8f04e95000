// Unit and run state machines shared by the stream and data stages.

pub mod errors;
pub mod events;
pub mod states;
pub mod transitions;

pub use errors::{StateMachineError, StateMachineResult};
pub use events::UnitEvent;
pub use states::{DataUnitState, RunState, StreamState, WebhookState};
pub use transitions::{DataUnitStateMachine, StreamStateMachine};
