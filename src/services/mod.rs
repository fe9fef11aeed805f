//! Business logic services module
//!
//! Contains the batch execution core: decoding, reference resolution,
//! dispatch and coordination

pub mod coordinator;
pub mod decoder;
pub mod dispatcher;
pub mod resolver;

pub use coordinator::{BatchCoordinator, BatchOutcome, BatchState, ExecutionMode};
pub use decoder::decode_batch;
pub use dispatcher::Dispatcher;
pub use resolver::ReferenceResolver;
