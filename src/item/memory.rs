use std::sync::{
    Mutex,
    atomic::{AtomicUsize, Ordering},
};

use crate::{
    BatchError,
    core::{
        execution::ExecutionContext,
        item::{ItemReader, ItemReaderResult, ItemWriter, ItemWriterResult},
    },
};

/// Reads items from a vector.
///
/// The reader is restartable: its position is saved in the execution context
/// under `<name>.read.count` at every commit and restored when the step opens it.
pub struct InMemoryItemReader<T> {
    name: String,
    items: Vec<T>,
    position: AtomicUsize,
}

impl<T> InMemoryItemReader<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self::with_name("InMemoryItemReader", items)
    }

    /// Uses a custom context key prefix, needed when one step reads from two readers.
    pub fn with_name(name: &str, items: Vec<T>) -> Self {
        Self {
            name: name.to_string(),
            items,
            position: AtomicUsize::new(0),
        }
    }

    fn position_key(&self) -> String {
        format!("{}.read.count", self.name)
    }
}

impl<T: Clone + Send + Sync> ItemReader<T> for InMemoryItemReader<T> {
    fn read(&self) -> ItemReaderResult<T> {
        let index = self.position.fetch_add(1, Ordering::SeqCst);
        match self.items.get(index) {
            Some(item) => Ok(Some(item.clone())),
            None => {
                self.position.store(self.items.len(), Ordering::SeqCst);
                Ok(None)
            }
        }
    }

    fn open(&self, context: &ExecutionContext) -> Result<(), BatchError> {
        let position = context.get_usize(&self.position_key()).unwrap_or(0);
        self.position.store(position, Ordering::SeqCst);
        Ok(())
    }

    fn update(&self, context: &mut ExecutionContext) -> Result<(), BatchError> {
        context.put_usize(&self.position_key(), self.position.load(Ordering::SeqCst));
        Ok(())
    }
}

/// Collects written items in memory.
#[derive(Default)]
pub struct InMemoryItemWriter<T> {
    items: Mutex<Vec<T>>,
    write_calls: AtomicUsize,
}

impl<T: Clone> InMemoryItemWriter<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            write_calls: AtomicUsize::new(0),
        }
    }

    /// Items written so far, in write order.
    pub fn items(&self) -> Vec<T> {
        self.items
            .lock()
            .map(|items| items.clone())
            .unwrap_or_default()
    }

    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }
}

impl<T: Clone + Send + Sync> ItemWriter<T> for InMemoryItemWriter<T> {
    fn write(&self, items: &[T]) -> ItemWriterResult {
        let mut written = self
            .items
            .lock()
            .map_err(|error| BatchError::ItemWriter(error.to_string()))?;
        written.extend_from_slice(items);
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_returns_items_then_none() -> Result<(), BatchError> {
        let reader = InMemoryItemReader::new(vec!["a", "b"]);

        assert_eq!(reader.read()?, Some("a"));
        assert_eq!(reader.read()?, Some("b"));
        assert_eq!(reader.read()?, None);
        assert_eq!(reader.read()?, None);
        Ok(())
    }

    #[test]
    fn reader_position_round_trips_through_context() -> Result<(), BatchError> {
        let reader = InMemoryItemReader::new(vec![1, 2, 3, 4]);
        reader.read()?;
        reader.read()?;

        let mut context = ExecutionContext::new();
        reader.update(&mut context)?;
        assert_eq!(context.get_usize("InMemoryItemReader.read.count"), Some(2));

        let restarted = InMemoryItemReader::new(vec![1, 2, 3, 4]);
        restarted.open(&context)?;
        assert_eq!(restarted.read()?, Some(3));
        Ok(())
    }

    #[test]
    fn open_without_saved_position_rewinds() -> Result<(), BatchError> {
        let reader = InMemoryItemReader::new(vec![1, 2]);
        reader.read()?;

        reader.open(&ExecutionContext::new())?;
        assert_eq!(reader.read()?, Some(1));
        Ok(())
    }

    #[test]
    fn writer_collects_items() -> Result<(), BatchError> {
        let writer = InMemoryItemWriter::new();
        writer.write(&[1, 2])?;
        writer.write(&[3])?;

        assert_eq!(writer.items(), vec![1, 2, 3]);
        assert_eq!(writer.write_calls(), 2);
        Ok(())
    }
}
