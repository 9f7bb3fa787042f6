pub mod operation;
pub mod task;
pub mod unit;
