//! xcpack - Multi-platform binary bundle builder
//!
//! This library builds each product of a resolved package graph once per
//! target platform, merges the per-platform frameworks into a single bundle
//! and skips products whose existing bundle is still valid.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`cli`] - Command-line interface parsing and output formatting
//! - [`core`] - Build planning, caching and orchestration
//! - [`infra`] - Infrastructure layer (filesystem, processes, storages)
//! - [`config`] - Configuration and constants
//! - [`error`] - Error types and handling

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod infra;
