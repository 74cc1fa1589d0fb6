//! Access control for assets.
//!
//! [`evaluate`] decides a single request against one asset. [`AccessPredicate`]
//! filters bulk queries down to exactly the assets a read evaluation would
//! grant. Both are derived from the clause table in [`clause`].

pub mod clause;
mod evaluator;
mod predicate;

pub use clause::{Clause, GRANT_CLAUSES};
pub use evaluator::{Decision, evaluate};
pub use predicate::{AccessPredicate, SqlFilter};
