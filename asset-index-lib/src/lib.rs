pub mod async_util;
pub mod buffer;
pub mod driver;
pub mod error;
pub mod loader;
pub mod merger;
pub mod optimistic;
pub mod settings;

pub use async_util::consume_load;
pub use buffer::{BufferConfig, FinishEvent, FlushTimer, StreamBuffer};
pub use driver::{
    row_key, spawn_stream_buffer, spawn_stream_buffer_task, DeadlineTimer, Delivery,
    StreamBufferHandle,
};
pub use error::{LoadError, SettingsError};
pub use loader::{LoadCanceller, LoadHandle, LoadSummary, StreamLoader};
pub use merger::StreamMerger;
pub use optimistic::{
    AssetRowList, MoveStatus, OptimisticTransactionManager, PendingMove, RowChanges,
};
pub use settings::Settings;
