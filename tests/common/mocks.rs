//! Mock version of an item writer
use mockall::mock;

use batch_engine::core::item::{ItemWriter, ItemWriterResult};

mock! {
    pub Writer {}
    impl ItemWriter<u32> for Writer {
        fn write(&self, items: &[u32]) -> ItemWriterResult;
    }
}
