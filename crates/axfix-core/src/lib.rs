//! Core domain model and the convergence loop for axfix.

pub mod applier;
pub mod convergence;
pub mod deadlock;
pub mod error;
pub mod executor;
pub mod grouping;
pub mod issue;
pub mod jsx;
pub mod mapper;
pub mod protocol;
pub mod revision;
pub mod round;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use protocol::*;
