//! Call session orchestration.
//!
//! One [`SessionController`] runs one call from transport bind to close:
//! synthesis pre-warm concurrent with transcription stream setup, then the
//! streaming pipeline, then drain. The controller never lets an error escape
//! its boundary; every outcome becomes a [`CloseReason`] on the transport.
//!
//! The [`CallSupervisor`] owns the session table, enforces the concurrency
//! cap, and drains every session within a grace period on process shutdown.
//!
//! [`CloseReason`]: parlance_types::CloseReason

pub mod config;
pub mod controller;
pub mod error;
pub mod prompts;
pub mod supervisor;

pub use config::SessionConfig;
pub use controller::SessionController;
pub use error::SessionError;
pub use prompts::{CallContext, Language};
pub use supervisor::CallSupervisor;
