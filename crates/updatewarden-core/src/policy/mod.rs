//! Policy configuration and the escalation state machine.
//!
//! This module provides:
//! - [`PolicyConfig`], the validated configuration built once per run
//! - Milestone date parsing
//! - [`EscalationPolicy`], the pure tier/decision/response rules

mod config;
pub mod dates;
mod escalation;

pub use config::{DialogMessages, PolicyConfig};
pub use escalation::{
    Decision, EscalationPolicy, Evaluation, QuietReason, ResponseAction, ResponseOutcome, Tier,
    FINAL_POSTPONE_SECS, PROCEED_BUTTON, SECONDARY_BUTTON,
};
