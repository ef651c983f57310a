//! Import job records as returned by the CM Import NBI.

pub(crate) mod de;
mod model;
mod operations;

pub use model::*;
pub(crate) use model::append_segment;
pub use operations::{
    ImportOperation, ImportOperations, OperationAttribute, OperationFailure,
    format_attribute_value,
};
