pub mod errors;

pub use errors::{PlaybinError, Result};
