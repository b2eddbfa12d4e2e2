//! Emergency escalation: session record, transition table, sequential
//! action lane and the orchestrator that drives them.

pub mod actions;
mod orchestrator;
mod session;
mod state;

pub use orchestrator::{
    Orchestrator, STATUS_CANCELLED, STATUS_COMPLETED, STATUS_GUARDIAN_MISSING, SessionEnd,
    TriggerOutcome,
};
pub use session::{EscalationSession, SessionId, artifact_file_name};
pub use state::{EscalationInput, EscalationState, FailureReason, TimerStep};
