use std::fmt::Debug;

use log::info;

use crate::{
    BatchError,
    core::item::{ItemWriter, ItemWriterResult},
};

/// Writes every item of a chunk to the log, useful while developing a job.
#[derive(Default)]
pub struct LoggerWriter {
    prefix: Option<String>,
}

impl LoggerWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            prefix: Some(prefix.to_string()),
        }
    }
}

impl<T> ItemWriter<T> for LoggerWriter
where
    T: Debug,
{
    fn write(&self, items: &[T]) -> ItemWriterResult {
        let prefix = self.prefix.as_deref().unwrap_or("Record");
        items.iter().for_each(|item| info!("{}:{:?}", prefix, item));
        Ok(())
    }

    fn flush(&self) -> Result<(), BatchError> {
        log::logger().flush();
        Ok(())
    }
}
