//! Common utilities and types shared across the fixture framework crates.

#![warn(clippy::pedantic)]

/// Module for aggregating multiple failures into one error
pub mod error;

/// Module for common configuration
pub mod config;

/// Module for tracing subscriber initialisation
pub mod observability;
