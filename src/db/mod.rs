pub mod batch;
pub mod connection;
pub mod error_context;

pub use batch::{BatchOutcome, PgConnector, PgTarget, SqlConnector, SqlTarget, wrap_in_transaction};
pub use error_context::SqlErrorContext;
