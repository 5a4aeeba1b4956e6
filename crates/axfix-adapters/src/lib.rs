//! External collaborators for axfix: analyzers, the render harness, the
//! formatter, configuration, and everything that touches the filesystem.

pub mod config;
pub mod eslint;
pub mod lighthouse;
pub mod prettier;
pub mod report;
pub mod util;
pub mod workspace;
