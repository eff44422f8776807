//! Configuration for the Coco CLI and server.
//!
//! The configuration is loaded once at startup from a single YAML file. All sections except
//! `tiers` are optional and fall back to defaults matching a stock collectd deployment.
#![warn(missing_docs)]

mod config;

pub use crate::config::*;
