//! Static evaluation of widget selectors against a captured UI hierarchy.

pub mod bounds;
pub mod checker;
pub mod coverage;
pub mod eval;
pub mod hierarchy;
pub mod query;
pub mod selector;

pub use checker::{CheckError, StaticChecker};
pub use selector::Selector;
