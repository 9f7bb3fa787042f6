//! Services that coordinate several stores.

pub mod action;
pub mod task;

pub use action::{ActionRequest, ActionService, Submission};
pub use task::TaskOrchestrator;
