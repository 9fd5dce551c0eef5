pub mod collection;
pub mod db;
pub mod memory;
pub mod reconcile;

pub use collection::{ItemCollection, StoreError};
pub use db::{create_db, create_expense, get_expense, DbPool, Expense, ExpenseItems};
pub use memory::MemoryItems;
pub use reconcile::{FailedOp, FailedWrite, ReconcileReport, ReconciliationEngine, ReconciliationFailure};
