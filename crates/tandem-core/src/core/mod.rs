//! Core utilities shared by every module

/// Cross-platform logging macros
pub mod logging;
