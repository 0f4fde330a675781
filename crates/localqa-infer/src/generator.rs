use std::sync::Arc;

use async_trait::async_trait;

use localqa_core::config::GenerationParams;

use crate::error::{GenerationError, PoolError};

/// One generation backend. The pool never sees how answers are produced.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, system_prompt: &str, question: &str, params: &GenerationParams) -> Result<String, GenerationError>;

    /// Structural health as seen by the backend itself.
    fn is_healthy(&self) -> bool { true }

    /// Stop any in-flight work and release resources. Called once on disposal or replacement.
    async fn shutdown(&self) {}
}

/// Builds generators for pool slots, both at initialization and on replacement.
#[async_trait]
pub trait GeneratorFactory: Send + Sync {
    async fn create(&self, slot_id: usize) -> Result<Arc<dyn Generator>, PoolError>;
}
