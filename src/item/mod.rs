/// In-memory item reader and writer, restartable from the execution context.
pub mod memory;

#[cfg(feature = "logger")]
#[cfg_attr(docsrs, doc(cfg(feature = "logger")))]
/// This module provides a logger item writer.
pub mod logger;
