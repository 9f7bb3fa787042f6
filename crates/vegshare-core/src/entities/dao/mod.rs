pub mod catalog;
pub mod lease;
pub mod operation;
pub mod task;
pub mod unit_content;

pub use catalog::CatalogItem;
pub use lease::LeaseRecord;
pub use operation::{ExecutionMode, OperationLog, OperationStatus, UnitRef};
pub use task::{TaskRecord, TaskStatus};
pub use unit_content::UnitContent;
