//! Output sinks
//!
//! - [`PartitionWriter`]: drain-thread sink for one monthly file
//! - [`WriterRegistry`]: one writer per month, created on first use, header written once
//! - [`ErrorSink`]: mutex-guarded error log, truncated or appended like the monthly files

mod error_log;
mod partition;
mod registry;

pub use error_log::{ERROR_LOG_HEADER, ErrorSink};
pub use partition::PartitionWriter;
pub use registry::WriterRegistry;
