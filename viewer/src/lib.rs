pub mod buffer;
pub mod config;
pub mod error;
pub mod health;
pub mod overlay;
pub mod polling;
pub mod registry;
pub mod session;
pub mod stream;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{load_config, LiveViewConfig};
pub use error::{LiveViewError, Result};
pub use session::{LiveContext, SessionController, ViewModel};
