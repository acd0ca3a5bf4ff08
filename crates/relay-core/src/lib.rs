//! # relay-core
//!
//! Core types, errors, and utilities for the Relay completion router.
//!
//! This crate provides:
//! - [`RelayError`] - The provider failure taxonomy plus config/I/O errors
//! - [`recovery`] - Shared retry policy with jittered exponential backoff
//! - [`logging`] - Tracing setup and structured event macros
//! - [`types`] - Messages, model tiers and other shared types
//!
//! ## Example
//!
//! ```no_run
//! use relay_core::{logging, Message};
//!
//! fn main() -> relay_core::Result<()> {
//!     let _guard = logging::init_logging(None, false)?;
//!     let messages = vec![Message::system("Be terse."), Message::user("Say OK")];
//!     tracing::info!(count = messages.len(), "prepared request");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod recovery;
pub mod types;

pub use error::{RelayError, Result};
pub use logging::{LogGuard, init_logging};
pub use recovery::{CallBudget, RetryDecision, RetryPolicy, RetryResult, retry_with_policy};
pub use types::{ComplexityLevel, Message, ModelTier, ProviderSlot, Role};
