use crate::BatchError;

use super::execution::ExecutionContext;

/// Represents the result of reading an item from the reader.
///
/// `Ok(None)` signals the end of the input.
pub type ItemReaderResult<I> = Result<Option<I>, BatchError>;

/// Represents the result of processing an item.
///
/// `Ok(None)` filters the item out of the chunk.
pub type ItemProcessorResult<O> = Result<Option<O>, BatchError>;

/// Represents the result of writing a chunk of items.
pub type ItemWriterResult = Result<(), BatchError>;

/// Reads input items one at a time.
///
/// A reader that wants to be restartable records its position in the step's
/// [`ExecutionContext`] in `update`, which is called after every committed chunk,
/// and repositions itself in `open` when a restarted step hands that context back.
pub trait ItemReader<I>: Send + Sync {
    fn read(&self) -> ItemReaderResult<I>;

    fn open(&self, _context: &ExecutionContext) -> Result<(), BatchError> {
        Ok(())
    }

    fn update(&self, _context: &mut ExecutionContext) -> Result<(), BatchError> {
        Ok(())
    }

    fn close(&self) -> Result<(), BatchError> {
        Ok(())
    }
}

/// Transforms one item. Must not keep state between calls.
pub trait ItemProcessor<I, O>: Send + Sync {
    fn process(&self, item: &I) -> ItemProcessorResult<O>;
}

/// Writes a whole chunk. An error rolls the chunk back.
pub trait ItemWriter<O>: Send + Sync {
    fn write(&self, items: &[O]) -> ItemWriterResult;

    fn flush(&self) -> Result<(), BatchError> {
        Ok(())
    }

    fn open(&self) -> Result<(), BatchError> {
        Ok(())
    }

    fn close(&self) -> Result<(), BatchError> {
        Ok(())
    }
}

/// Processor handing every item through unchanged.
#[derive(Default)]
pub struct PassThroughProcessor;

impl<T: Clone> ItemProcessor<T, T> for PassThroughProcessor {
    fn process(&self, item: &T) -> ItemProcessorResult<T> {
        Ok(Some(item.clone()))
    }
}

/// Processor backed by a closure.
pub struct FnProcessor<F> {
    function: F,
}

impl<F> FnProcessor<F> {
    pub fn new(function: F) -> Self {
        Self { function }
    }
}

impl<I, O, F> ItemProcessor<I, O> for FnProcessor<F>
where
    F: Fn(&I) -> ItemProcessorResult<O> + Send + Sync,
{
    fn process(&self, item: &I) -> ItemProcessorResult<O> {
        (self.function)(item)
    }
}
