//! conveyor-core
//!
//! Core building blocks for the Conveyor execution coordinator.
//!
//! - **domain**: envelopes, records, flows, and the execution state machine
//! - **broker**: enqueue/dequeue/ack port with in-memory and sqlite backends
//! - **store**: persistent source of truth with an atomic transition CAS
//! - **coordinator**: submit / status / cancel, flow registry
//! - **worker**: the executor pool consuming the broker
//! - **runtime**: the pluggable workflow-logic seam and the default
//!   step-based runner

pub mod broker;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod runtime;
pub mod store;
pub mod worker;

pub use coordinator::Coordinator;
pub use error::ConveyorError;
