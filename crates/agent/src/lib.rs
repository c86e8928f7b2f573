//! Conversation runtime for missed-call recovery.
//!
//! This crate turns inbound telephony, SMS and voice-AI events into lead and
//! conversation state changes, then performs the outbound side effects those
//! changes call for:
//! - **Event handling** (`runtime`) - find-or-create the lead and its single
//!   open conversation, apply the flow table, commit state.
//! - **Extraction** (`extraction`) - pull name/service/address/urgency out of
//!   free text and merge it without overwriting known fields.
//! - **Replies** (`llm`) - ask a language model for the next SMS and read its
//!   signal tags.
//! - **Scheduling** (`scheduler`) - durable delayed actions and the worker
//!   that fires them.
//! - **Owner alerts** (`notify`) - quiet-hours aware SMS and email delivery.
//!
//! # Failure model
//!
//! State is committed before any outbound call is made. SMS, email, voice and
//! calendar failures are logged and swallowed; they never roll back a
//! conversation transition.

pub mod audit;
pub mod error;
pub mod events;
pub mod extraction;
pub mod guardrails;
pub mod llm;
pub mod locks;
pub mod notify;
pub mod runtime;
pub mod scheduler;
pub mod tools;

pub use error::RuntimeError;
pub use events::{
    DeliveryStatusUpdate, IncomingCall, InboundCall, InboundSms, TranscriptLine, VoiceEndOfCall,
    VoiceFunctionCall,
};
pub use runtime::{
    ConversationRuntime, IncomingCallOutcome, MissedCallDisposition, MissedCallOutcome,
    RuntimePorts, RuntimeSettings, SmsDisposition, SmsOutcome, VoiceReportDisposition,
    VoiceReportOutcome,
};
pub use scheduler::{
    ActionHandler, ActionOutcome, DelayedActionScheduler, SchedulerWorker, WorkerReport,
};
