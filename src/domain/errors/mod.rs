//! Domain error types.

mod load_error;
mod store_error;

pub use load_error::{LoadError, LoadResult};
pub use store_error::{StoreError, StoreResult};
