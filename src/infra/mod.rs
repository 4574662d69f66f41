//! Infrastructure layer
//!
//! Handles I/O with the outside world: filesystem, external processes and
//! cache storages.

pub mod compiler;
pub mod dirs;
pub mod filesystem;
pub mod merger;
pub mod storage;
