//! # kiln-core
//!
//! Core chain types for kiln.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

/// Block, receipt and log types
pub mod block;

/// Binary heap with a custom ordering
pub mod heap;

/// JSON-RPC request types
pub mod request;

/// Custom serde helpers for request params
pub mod serde_helpers;

/// Transaction types
pub mod transaction;

/// Additional useful types
pub mod types;
