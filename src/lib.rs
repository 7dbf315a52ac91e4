pub mod api;
pub mod config;
pub mod error;
pub mod processor;
pub mod statement;
pub mod storage;
pub mod telemetry;

pub use error::LedgerError;
pub use processor::TransactionProcessor;
pub use statement::StatementReader;
