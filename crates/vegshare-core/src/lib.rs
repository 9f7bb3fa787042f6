//! Plot-operation orchestration for vegshare.
//!
//! An [`entities::OperationLog`] records a requested action on a unit. Manual
//! actions get a [`entities::TaskRecord`] that people move through
//! [`services::TaskOrchestrator`]; automatic ones are published to the action
//! queue and driven by [`worker::QueueConsumer`].

pub mod action;
pub mod entities;
pub mod error;
pub mod queue;
pub mod services;
pub mod worker;

pub use error::CoreError;
