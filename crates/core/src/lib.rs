pub mod config;
pub mod item;
pub mod money;

pub use config::{CommitPolicy, Config, ConfigError, PipelineConfig, StorageConfig};
pub use item::{Assignment, ExpenseId, ItemId, ItemRecord, ItemTuple, UserId};
pub use money::{Money, ParseMoneyError};
