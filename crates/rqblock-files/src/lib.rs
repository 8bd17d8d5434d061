//! # RQBLOCK Files
//!
//! File engine for RQBLOCK.
//!
//! This crate provides:
//! - Block reads at planned offsets and out-of-order block assembly
//! - A content-addressed symbol directory
//! - The layout document and its atomic persistence
//! - Per-block encoding and file-level encode, metadata and decode
//!   orchestration bounded by a session's resources
//!
//! The [`Engine`] facade ties these to a session registry and a codec.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunker;
pub mod decode;
pub mod encode;
pub mod engine;
pub mod layout;
pub mod processor;
pub mod symbol_store;

pub use decode::{DecodeReport, FileDecoder};
pub use encode::{BlockSummary, FileEncoder, LAYOUT_FILE_NAME, ProcessResult};
pub use engine::Engine;
pub use layout::{BlockRecord, Layout, LayoutStore};
pub use processor::{BlockProcessor, ProcessedBlock};
pub use symbol_store::SymbolStore;
