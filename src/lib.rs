//! Snapshot a Kospel heating controller's registers into a flat log,
//! appending only when the reading changed.

pub mod cache;
pub mod error;
pub mod kospel;
pub mod store;

pub use cache::SessionCache;
pub use error::Error;
pub use kospel::{Credentials, Device, Outcome, Snapshot};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
