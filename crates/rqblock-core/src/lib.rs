//! # RQBLOCK Core
//!
//! Session and planning layer of the RQBLOCK engine.
//!
//! This crate provides:
//! - Session lifecycle through an explicitly owned [`SessionRegistry`]
//! - Validated session configuration with TOML loading
//! - Block planning and memory-aware block size recommendation
//! - Concurrency and memory admission for block operations
//! - The engine-wide error taxonomy
//!
//! File I/O, the symbol store and the layout document live in
//! `rqblock-files`; the FEC primitive lives in `rqblock-codec`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod admission;
pub mod config;
pub mod error;
pub mod planner;
pub mod session;

pub use admission::{BlockAdmission, BlockPermit, MemoryBudget, MemoryReservation};
pub use config::SessionConfig;
pub use error::{EngineError, ErrorKind, Result};
pub use planner::{BlockPlan, BlockSpan};
pub use session::{BlockGuard, Session, SessionId, SessionRegistry, SessionResources, SessionState};
