//! Core build logic
//!
//! Planning, fingerprinting and orchestration. Process execution and
//! storage access go through the traits in [`crate::infra`].
//!
//! # Submodules
//!
//! - [`product`] - Products and the resolved graph
//! - [`platform`] - Platforms and their capability table
//! - [`options`] - Build options and per-product overrides
//! - [`matrix`] - Expansion of products into platform tasks
//! - [`fingerprint`] - Content fingerprints of products
//! - [`version_record`] - Record stored next to each bundle
//! - [`cache`] - Cache validity decisions and storage fan-out
//! - [`executor`] - Compiler invocation per platform task
//! - [`modulemap`] - Module map rewriting for C-family products
//! - [`assembler`] - Bundle staging and publishing
//! - [`runner`] - Concurrent pipeline over the product graph
//! - [`manifest`] - Project file (xcpack.toml) parsing

pub mod assembler;
pub mod cache;
pub mod executor;
pub mod fingerprint;
pub mod manifest;
pub mod matrix;
pub mod modulemap;
pub mod options;
pub mod platform;
pub mod product;
pub mod runner;
pub mod version_record;
