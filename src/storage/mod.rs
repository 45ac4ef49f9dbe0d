pub mod database;
pub mod run_status;

pub use database::{Database, PoolConfig, SharedDatabase, run_blocking};
pub use run_status::{
    MemoryRunStatusStore, RunStatus, RunStatusRecord, RunStatusStore, SharedRunStatus,
    SqliteRunStatusStore,
};
