//! localqa-infer
//!
//! Bounded pool of generation workers. Each worker wraps an external
//! inference executable driven through a dual-timeout streaming protocol.

pub mod error;
pub mod executor;
pub mod generator;
pub mod pool;
pub mod prompt;

pub use error::{GenerationError, PoolError};
pub use executor::{ProcessExecutor, ProcessExecutorFactory};
pub use generator::{Generator, GeneratorFactory};
pub use pool::{Handle, InstancePool, WorkerSlot};
pub use prompt::PromptTemplate;
pub use tokio_util::sync::CancellationToken;
