//! Query construction: the fluent builder, request documents, and the
//! filter compiler.

mod builder;
mod document;
mod filter;

pub use builder::Query;
pub use document::{Direction, Operation, RequestDocument};
pub use filter::{compile, or, FilterNode, FilterOp, PredicateFn};
