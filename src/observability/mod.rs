//! Observability for the logger service
//!
//! Structured logging to stdout and to a size-rotating file.

pub mod logging;
pub mod rotating_file;

// Re-export for convenience
pub use logging::{build_filter, init_logging, level_name, LineFormat};
pub use rotating_file::RotatingFileWriter;
