//! Test utilities for mediasweep.
//!
//! Reusable helpers for building test configurations, opening in-memory
//! stores and seeding content.
//!
//! # Feature Flag
//!
//! This module is only available when the `testing` feature is enabled or during tests:
//!
//! ```toml
//! [dev-dependencies]
//! common = { path = "../common", features = ["testing"] }
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use common::testing::{Seeder, memory_store};
//!
//! let store = memory_store().await;
//! let seed = Seeder::new(&store);
//! seed.post(1, "post", "").await;
//! seed.media(10, Some(1), "2024/05/cat.jpg").await;
//! ```

mod config_builder;
mod fixtures;

pub use config_builder::TestConfigBuilder;
pub use fixtures::{Seeder, media_url, memory_store, memory_store_with_uploads};
