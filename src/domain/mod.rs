//! Domain layer for the Orbyt workflow execution kernel.
//!
//! Pure business logic and data model: no I/O, no async runtime, no
//! knowledge of `tokio`/`figment`/`tracing`.

pub mod error;
pub mod models;
pub mod value;

pub use error::{classify, control_for, EngineError, ErrorCategory, ErrorSeverity, ExecutionControl};
pub use value::Value;
