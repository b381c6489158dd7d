pub mod env;
pub mod error;
pub mod group;
pub mod helpers;
pub mod logs;
pub mod monitor;
pub mod port;
pub mod process;
pub mod registry;
pub mod store;

pub use error::{Error, Result};
pub use registry::Registry;
