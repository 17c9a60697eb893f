//! Windowed Fact Store
//!
//! Principles:
//! - Bounded: a window never holds more client facts than configured
//! - All-or-nothing admission
//! - Immutable once built; sessions swap whole windows

mod errors;
mod sessions;
mod window;

pub use errors::{StoreResult, WindowError};
pub use sessions::{Replaced, Session, SessionRegistry, DEFAULT_SESSION};
pub use window::{AcceptAll, FactInput, FactPolicy, FactWindow};
