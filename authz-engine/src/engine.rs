//! Authorization engine interface and the backends behind it.

pub mod memory;
pub mod spicedb;

pub use memory::InMemoryAuthzEngine;
pub use spicedb::SpiceDbHttpEngine;

use crate::config::{EngineBackend, EngineSettings};
use crate::error::Result;
use crate::tuple::{CheckRequest, CheckResult, EngineTuple};
use async_trait::async_trait;
use std::sync::Arc;

/// Decides permissions and stores the tuples decisions are made from
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthzEngine: Send + Sync {
    /// Replace the installed schema
    async fn write_schema(&self, schema: String) -> Result<()>;

    /// Write a tuple. Writing an existing tuple is not an error.
    async fn add_relation(&self, tuple: EngineTuple) -> Result<()>;

    /// Remove a tuple. Removing a missing tuple is not an error.
    async fn delete_relation(&self, tuple: EngineTuple) -> Result<()>;

    async fn check_relation(&self, request: CheckRequest) -> Result<bool>;

    /// Results line up positionally with `requests`.
    async fn batch_check_permission(&self, requests: Vec<CheckRequest>) -> Result<Vec<CheckResult>>;
}

/// Builds the backend selected in `settings`.
pub fn build_engine(settings: &EngineSettings) -> Result<Arc<dyn AuthzEngine>> {
    match settings.backend {
        EngineBackend::Memory => Ok(Arc::new(InMemoryAuthzEngine::from_settings(settings))),
        EngineBackend::Spicedb => Ok(Arc::new(SpiceDbHttpEngine::from_settings(settings)?)),
    }
}
