//! # CRUD Sample
//!
//! One concrete aggregate, [`Sample`](model::Sample), served through every transport of
//! `crud_framework`. The library exposes the modules the binary and the integration
//! suites share.

pub mod config;
pub mod data_provider;
pub mod lifecycle;
pub mod model;
