//! Helpwatch: trigger-phrase listener with a cancellable emergency escalation
//! sequencer.
//!
//! # Architecture
//!
//! A single control task ([`service::HelpService`]) owns all state and reacts
//! to messages:
//! - **Listener**: keeps speech recognition running, restarts it after
//!   benign ends, backs off after errors, and reports trigger-phrase matches
//! - **Orchestrator**: runs one escalation session at a time through
//!   notify -> record -> upload + call -> complete, cancellable until the end
//! - **Action lane**: per-session worker sending SMS and placing the call in
//!   order, each action bounded by a timeout
//! - **Capabilities**: traits for every side effect (recognizer, SMS, call,
//!   location, storage, alert UI, keep-alive, recorder), with host-delegated
//!   and test implementations
//!
//! The [`host`] module exposes the runtime to a native shell over a
//! versioned newline-delimited JSON contract.

pub mod capabilities;
pub mod config;
mod control;
pub mod error;
pub mod escalation;
pub mod guards;
pub mod help_dirs;
pub mod host;
pub mod listener;
pub mod runtime;
pub mod service;
pub mod settings;
pub mod sms;
pub mod testing;
pub mod upload;

pub use config::HelpConfig;
pub use error::{CapabilityError, HelpError, Result};
pub use escalation::{EscalationState, SessionId, TriggerOutcome};
pub use runtime::RuntimeEvent;
pub use service::{HelpService, HelpServiceHandle};
