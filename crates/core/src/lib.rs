pub mod config;
pub mod error;
pub mod paths;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use paths::Paths;
pub use types::Page;
