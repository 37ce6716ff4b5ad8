//! Loads operator-authored service definitions.

use crate::error::{AuthzError, Result};
use async_trait::async_trait;
use authz_schema::ServiceDefinition;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[async_trait]
pub trait DefinitionSource: Send + Sync {
    async fn get_definitions(&self) -> Result<Vec<ServiceDefinition>>;
}

/// Reads every `*.yaml` / `*.yml` file of a directory, in file name order.
pub struct YamlDefinitionSource {
    dir: PathBuf,
}

impl YamlDefinitionSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn is_definition_file(path: &Path) -> bool {
        path.is_file()
            && path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| matches!(ext, "yaml" | "yml"))
    }
}

#[async_trait]
impl DefinitionSource for YamlDefinitionSource {
    async fn get_definitions(&self) -> Result<Vec<ServiceDefinition>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(dir = %self.dir.display(), "No definition directory");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(AuthzError::Migration(format!(
                    "reading {}: {e}",
                    self.dir.display()
                )))
            }
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AuthzError::Migration(format!("reading {}: {e}", self.dir.display())))?
        {
            let path = entry.path();
            if Self::is_definition_file(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut definitions = Vec::with_capacity(paths.len());
        for path in paths {
            let source = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| AuthzError::Migration(format!("reading {}: {e}", path.display())))?;
            let definition = ServiceDefinition::from_yaml(&source).map_err(|e| {
                AuthzError::Migration(format!("invalid service definition {}: {e}", path.display()))
            })?;
            debug!(file = %path.display(), service = %definition.name, "Loaded service definition");
            definitions.push(definition);
        }

        info!(count = definitions.len(), "Service definitions loaded");
        Ok(definitions)
    }
}

/// Definitions supplied directly, e.g. from configuration
#[derive(Default)]
pub struct StaticDefinitionSource {
    definitions: Vec<ServiceDefinition>,
}

impl StaticDefinitionSource {
    pub fn new(definitions: Vec<ServiceDefinition>) -> Self {
        Self { definitions }
    }
}

#[async_trait]
impl DefinitionSource for StaticDefinitionSource {
    async fn get_definitions(&self) -> Result<Vec<ServiceDefinition>> {
        for definition in &self.definitions {
            definition.validate()?;
        }
        Ok(self.definitions.clone())
    }
}
