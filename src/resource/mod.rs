//! Object graph returned by resource computations and the persistence seam
//! behind them.

pub mod error;
pub mod object;
pub mod store;

pub use error::ResourceError;
pub use object::{is_truthy, ApiObject, AsAny, Resource};
pub use store::{MemoryStore, ResourceStore};
