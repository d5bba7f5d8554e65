pub mod constants;
pub mod error;
pub mod types;
pub mod account;
pub mod params;

pub use constants::*;
pub use error::{AccrueError, ErrorKind};
pub use types::*;
pub use account::*;
pub use params::AccrualParams;
