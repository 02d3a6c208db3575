//! # Tasklet Module
//!
//! Ready-made tasklets. Tasklets are single-task operations that don't follow
//! the chunk-oriented processing pattern.

pub mod logging;
