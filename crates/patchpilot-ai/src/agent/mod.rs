//! Agent module - per-task conversation state, deferred calls and the turn loop

pub mod context;
pub mod deferred;
pub mod events;
pub mod prompt;
pub mod turn;

pub use context::TaskContext;
pub use deferred::{
    DeferredCallState, DeferredCoordinator, DeferredError, DeferredOutcome, DeferredResolution,
    DeferredToolCall,
};
pub use events::{AgentEvent, AgentEventSink, NullSink};
pub use prompt::{IDE_INSTRUCTIONS, initial_user_message};
pub use turn::{TurnConfig, TurnOutcome, TurnStateMachine};
