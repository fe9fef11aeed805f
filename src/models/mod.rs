//! Data models module
//!
//! Defines the batch envelope structures and the demonstration ledger entities

pub mod batch;
pub mod ledger;

pub use batch::{BatchRequest, BatchResponse, Headers, HttpMethod};
