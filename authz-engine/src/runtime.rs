//! Wires settings into a ready set of services.

use crate::bootstrap::BootstrapService;
use crate::catalog::{CatalogServices, InMemoryCatalog};
use crate::config::AuthzSettings;
use crate::definitions::{DefinitionSource, StaticDefinitionSource, YamlDefinitionSource};
use crate::engine::{build_engine, AuthzEngine};
use crate::error::Result;
use crate::repository::{InMemoryRelationRepository, PostgresRelationRepository, RelationRepository};
use crate::service::RelationService;
use authz_schema::BaseSchema;
use std::sync::Arc;
use tracing::info;

pub struct AuthzRuntime {
    pub engine: Arc<dyn AuthzEngine>,
    pub repository: Arc<dyn RelationRepository>,
    pub catalog: CatalogServices,
    pub relations: Arc<RelationService>,
    pub bootstrap: BootstrapService,
}

impl AuthzRuntime {
    /// Uses PostgreSQL when `database.url` is set and runs its migrations,
    /// otherwise keeps relations in memory.
    pub async fn from_settings(settings: &AuthzSettings) -> Result<Self> {
        settings.validate()?;

        let engine = build_engine(&settings.engine)?;
        let repository: Arc<dyn RelationRepository> = match &settings.database.url {
            Some(url) => {
                let postgres =
                    PostgresRelationRepository::connect(url, settings.database.max_connections)
                        .await?;
                postgres.migrate().await?;
                Arc::new(postgres)
            }
            None => Arc::new(InMemoryRelationRepository::new()),
        };

        let definitions: Arc<dyn DefinitionSource> = match &settings.bootstrap.definitions_path {
            Some(path) => Arc::new(YamlDefinitionSource::new(path)),
            None => Arc::new(StaticDefinitionSource::default()),
        };

        let catalog = CatalogServices::in_memory(Arc::new(InMemoryCatalog::new()));
        let relations = Arc::new(RelationService::from_settings(
            repository.clone(),
            engine.clone(),
            &settings.service,
        ));
        let bootstrap = BootstrapService::new(
            BaseSchema::load()?,
            definitions,
            catalog.clone(),
            engine.clone(),
            relations.clone(),
            settings.bootstrap.clone(),
        );

        info!(
            backend = ?settings.engine.backend,
            postgres = settings.database.url.is_some(),
            "Authorization runtime ready"
        );
        Ok(Self {
            engine,
            repository,
            catalog,
            relations,
            bootstrap,
        })
    }
}
