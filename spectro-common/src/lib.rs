//! # Spectro Dashboard Common Library
//!
//! Shared code for the dashboard service and its tooling:
//! - Sample record data model (`SampleRecord`, `ElementResult`)
//! - Element slot layouts for display and reporting
//! - Configuration loading and validation
//! - Wall-clock timestamp helpers

pub mod config;
pub mod elements;
pub mod error;
pub mod sample;
pub mod time;

pub use elements::ElementOrder;
pub use error::{Error, Result};
pub use sample::{ElementResult, FurnaceQuery, SampleRecord};
