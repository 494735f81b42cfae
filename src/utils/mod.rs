//! Utility modules for common functionality.
//!
//! Logging setup and the drop guard used for in-flight request accounting.

pub mod context;
pub mod logger;
