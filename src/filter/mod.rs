//! Response filtering: per-type, per-field visibility rules applied to a
//! resource graph at serialization time.

pub mod engine;
pub mod error;
pub mod expand;
pub mod types;

pub use engine::{FilterEngine, EXPANDABLE_KEY};
pub use error::FilterError;
pub use expand::ExpandTree;
pub use types::{Expandable, FieldPolicy, FilterRegistry, ResponseFilter, TypeRule};
