//! Relation lifecycle and permission checks.
//!
//! Every mutation touches the relation store first and the engine second.
//! The two are not transactional: a failed update is compensated, and
//! [`RelationService::reconcile`] re-writes stored tuples to repair what
//! compensation could not.

use crate::config::ServiceSettings;
use crate::engine::AuthzEngine;
use crate::error::{AuthzError, Result};
use crate::models::{CheckPair, PermissionCheck, Relation};
use crate::repository::{RelationFilter, RelationRepository};
use crate::transform::{to_check_request, to_engine_tuple};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of a reconciliation sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub checked: usize,
    pub repaired: usize,
    pub failed: usize,
}

pub struct RelationService {
    repository: Arc<dyn RelationRepository>,
    engine: Arc<dyn AuthzEngine>,
    call_timeout: Duration,
}

impl RelationService {
    pub fn new(repository: Arc<dyn RelationRepository>, engine: Arc<dyn AuthzEngine>) -> Self {
        Self {
            repository,
            engine,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn from_settings(
        repository: Arc<dyn RelationRepository>,
        engine: Arc<dyn AuthzEngine>,
        settings: &ServiceSettings,
    ) -> Self {
        Self::new(repository, engine).with_call_timeout(settings.call_timeout())
    }

    /// Deadline applied to each store and engine call
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    async fn within<T>(&self, operation: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(AuthzError::Timeout(operation.to_string())),
        }
    }

    #[instrument(skip(self, relation), fields(object = %relation.object_id, subject = %relation.subject_id))]
    pub async fn create(&self, relation: Relation) -> Result<Relation> {
        to_engine_tuple(&relation)?;
        let subject_relation = relation.subject_relation.clone();
        let stored = self
            .within("relation store create", self.repository.create(relation))
            .await?;

        // The natural key leaves out the subject relation, so an existing row
        // may carry a different userset than the one requested.
        if stored.subject_relation != subject_relation {
            return Err(AuthzError::InvalidRelation(format!(
                "relation {} already exists with subject relation {:?}",
                stored.id, stored.subject_relation
            )));
        }
        let tuple = to_engine_tuple(&stored)?;

        if let Err(e) = self
            .within("engine add relation", self.engine.add_relation(tuple))
            .await
        {
            warn!(relation_id = %stored.id, error = %e, "Relation stored but not written to the engine");
            return Err(e);
        }

        info!(relation_id = %stored.id, "Relation created");
        Ok(stored)
    }

    pub async fn get(&self, id: &str) -> Result<Relation> {
        self.within("relation store get", self.repository.get(id)).await
    }

    pub async fn get_by_fields(&self, filter: RelationFilter) -> Result<Vec<Relation>> {
        self.within("relation store query", self.repository.get_by_fields(filter))
            .await
    }

    pub async fn list(&self) -> Result<Vec<Relation>> {
        self.within("relation store list", self.repository.list()).await
    }

    /// Replaces the relation stored under `relation.id`. The old engine
    /// tuple is deleted before the new one is written.
    #[instrument(skip(self, relation), fields(relation_id = %relation.id))]
    pub async fn update(&self, relation: Relation) -> Result<Relation> {
        let existing = self.get(&relation.id).await?;
        let old_tuple = to_engine_tuple(&existing)?;
        let new_tuple = to_engine_tuple(&relation)?;

        let updated = self
            .within("relation store update", self.repository.update(relation))
            .await?;

        if let Err(e) = self
            .within("engine delete relation", self.engine.delete_relation(old_tuple.clone()))
            .await
        {
            return Err(self.restore_row(existing, e).await);
        }

        if let Err(e) = self
            .within("engine add relation", self.engine.add_relation(new_tuple))
            .await
        {
            let engine_restored = self
                .within("engine add relation", self.engine.add_relation(old_tuple))
                .await;
            let row_restored = self
                .within("relation store update", self.repository.update(existing.clone()))
                .await;

            return Err(match (engine_restored, row_restored) {
                (Ok(()), Ok(_)) => {
                    warn!(relation_id = %existing.id, error = %e, "Relation update rolled back");
                    e
                }
                (engine, row) => {
                    error!(
                        relation_id = %existing.id,
                        error = %e,
                        engine_error = ?engine.err(),
                        store_error = ?row.err(),
                        "Relation update could not be rolled back, reconciliation required"
                    );
                    AuthzError::Inconsistent(format!("relation {}: {e}", existing.id))
                }
            });
        }

        info!(relation_id = %updated.id, "Relation updated");
        Ok(updated)
    }

    /// Puts `existing` back after a failed engine delete during update.
    async fn restore_row(&self, existing: Relation, cause: AuthzError) -> AuthzError {
        let id = existing.id.clone();
        match self
            .within("relation store update", self.repository.update(existing))
            .await
        {
            Ok(_) => {
                warn!(relation_id = %id, error = %cause, "Relation update rolled back");
                cause
            }
            Err(restore) => {
                error!(
                    relation_id = %id,
                    error = %cause,
                    store_error = %restore,
                    "Relation update could not be rolled back, reconciliation required"
                );
                AuthzError::Inconsistent(format!("relation {id}: {cause}"))
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<()> {
        let existing = self.get(id).await?;
        let tuple = to_engine_tuple(&existing)?;

        self.within("relation store delete", self.repository.delete(id))
            .await?;

        if let Err(e) = self
            .within("engine delete relation", self.engine.delete_relation(tuple))
            .await
        {
            return Err(
                match self
                    .within("relation store create", self.repository.create(existing))
                    .await
                {
                    Ok(_) => e,
                    Err(restore) => {
                        error!(relation_id = id, error = %restore, "Deleted relation could not be restored");
                        AuthzError::Inconsistent(format!("relation {id}: {e}"))
                    }
                },
            );
        }

        info!(relation_id = id, "Relation deleted");
        Ok(())
    }

    /// Whether the relation's subject holds `permission` on its object
    pub async fn check_permission(&self, relation: &Relation, permission: &str) -> Result<bool> {
        let request = to_check_request(relation, permission)?;
        self.within("engine check", self.engine.check_relation(request))
            .await
    }

    /// Results line up positionally with `checks`.
    #[instrument(skip(self, checks), fields(count = checks.len()))]
    pub async fn batch_check_permission(&self, checks: Vec<PermissionCheck>) -> Result<Vec<CheckPair>> {
        let requests = checks
            .iter()
            .map(|check| to_check_request(&check.relation, &check.permission))
            .collect::<Result<Vec<_>>>()?;

        let results = self
            .within(
                "engine batch check",
                self.engine.batch_check_permission(requests.clone()),
            )
            .await?;
        if results.len() != requests.len() {
            return Err(AuthzError::Engine(format!(
                "batch check returned {} results for {} checks",
                results.len(),
                requests.len()
            )));
        }

        checks
            .into_iter()
            .zip(requests)
            .zip(results)
            .map(|((check, request), result)| {
                if result.request == request {
                    Ok(CheckPair {
                        check,
                        granted: result.allowed,
                    })
                } else {
                    Err(AuthzError::Engine(format!(
                        "batch check result for {} arrived in place of {request}",
                        result.request
                    )))
                }
            })
            .collect()
    }

    /// Re-writes every stored relation to the engine. Writes are
    /// idempotent, so the sweep can run at any time.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let relations = self.list().await?;
        let mut report = ReconcileReport::default();

        for relation in relations {
            report.checked += 1;
            let outcome = match to_engine_tuple(&relation) {
                Ok(tuple) => {
                    self.within("engine add relation", self.engine.add_relation(tuple))
                        .await
                }
                Err(e) => Err(e),
            };
            match outcome {
                Ok(()) => report.repaired += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(relation_id = %relation.id, error = %e, "Relation could not be reconciled");
                }
            }
        }

        info!(
            checked = report.checked,
            repaired = report.repaired,
            failed = report.failed,
            "Reconciliation finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockAuthzEngine;
    use crate::repository::{InMemoryRelationRepository, MockRelationRepository};
    use crate::tuple::{CheckRequest, CheckResult, EngineTuple};
    use async_trait::async_trait;
    use authz_schema::Role;
    use mockall::predicate::eq;
    use mockall::Sequence;

    fn membership(role: &str) -> Relation {
        Relation::for_role("app/user", "u1", "app/organization", "o1", role)
    }

    fn stored(role: &str) -> Relation {
        let mut relation = membership(role);
        relation.id = "r1".to_string();
        relation
    }

    fn service(repository: MockRelationRepository, engine: MockAuthzEngine) -> RelationService {
        RelationService::new(Arc::new(repository), Arc::new(engine))
    }

    #[tokio::test]
    async fn test_create_writes_store_then_engine() {
        let mut seq = Sequence::new();
        let mut repository = MockRelationRepository::new();
        let mut engine = MockAuthzEngine::new();
        repository
            .expect_create()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|mut relation| {
                relation.id = "r1".to_string();
                Ok(relation)
            });
        engine
            .expect_add_relation()
            .with(eq(to_engine_tuple(&membership("member")).unwrap()))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let created = service(repository, engine).create(membership("member")).await.unwrap();
        assert_eq!(created.id, "r1");
    }

    #[tokio::test]
    async fn test_role_mismatch_never_reaches_store_or_engine() {
        let mut repository = MockRelationRepository::new();
        let mut engine = MockAuthzEngine::new();
        repository.expect_create().times(0);
        engine.expect_add_relation().times(0);

        let relation = Relation::for_role("user", "u1", "project", "p1", "editor")
            .with_role(Role::new("editor", Vec::new()).in_namespace("org"));
        let err = service(repository, engine).create(relation).await.unwrap_err();
        assert_eq!(err.to_string(), "Role editor doesn't exist in project");
    }

    #[tokio::test]
    async fn test_engine_failure_after_store_is_reported() {
        let repository = InMemoryRelationRepository::new();
        let mut engine = MockAuthzEngine::new();
        engine
            .expect_add_relation()
            .returning(|_| Err(AuthzError::EngineUnavailable("down".to_string())));

        let repository = Arc::new(repository);
        let service = RelationService::new(repository.clone(), Arc::new(engine));
        let err = service.create(membership("member")).await.unwrap_err();
        assert!(err.is_retryable());
        // left for the reconciliation sweep
        assert_eq!(repository.len(), 1);
    }

    #[tokio::test]
    async fn test_update_deletes_old_tuple_before_adding_new() {
        let mut seq = Sequence::new();
        let mut repository = MockRelationRepository::new();
        let mut engine = MockAuthzEngine::new();
        repository.expect_get().returning(|_| Ok(stored("member")));
        repository.expect_update().returning(Ok);
        engine
            .expect_delete_relation()
            .with(eq(to_engine_tuple(&stored("member")).unwrap()))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        engine
            .expect_add_relation()
            .with(eq(to_engine_tuple(&stored("owner")).unwrap()))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let updated = service(repository, engine).update(stored("owner")).await.unwrap();
        assert_eq!(updated.role_id, "owner");
    }

    #[tokio::test]
    async fn test_update_compensates_when_add_fails() {
        let mut repository = MockRelationRepository::new();
        let mut engine = MockAuthzEngine::new();
        let old_tuple = to_engine_tuple(&stored("member")).unwrap();
        let new_tuple = to_engine_tuple(&stored("owner")).unwrap();

        repository.expect_get().returning(|_| Ok(stored("member")));
        repository.expect_update().times(2).returning(Ok);
        engine.expect_delete_relation().times(1).returning(|_| Ok(()));
        engine
            .expect_add_relation()
            .with(eq(new_tuple))
            .times(1)
            .returning(|_| Err(AuthzError::EngineUnavailable("down".to_string())));
        engine
            .expect_add_relation()
            .with(eq(old_tuple))
            .times(1)
            .returning(|_| Ok(()));

        let err = service(repository, engine).update(stored("owner")).await.unwrap_err();
        assert!(matches!(err, AuthzError::EngineUnavailable(_)));
    }

    #[tokio::test]
    async fn test_update_restores_row_when_engine_delete_fails() {
        let mut seq = Sequence::new();
        let mut repository = MockRelationRepository::new();
        let mut engine = MockAuthzEngine::new();
        repository.expect_get().returning(|_| Ok(stored("member")));
        repository
            .expect_update()
            .withf(|relation: &Relation| relation.role_id == "owner")
            .times(1)
            .in_sequence(&mut seq)
            .returning(Ok);
        engine
            .expect_delete_relation()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(AuthzError::EngineUnavailable("down".to_string())));
        repository
            .expect_update()
            .withf(|relation: &Relation| relation.role_id == "member")
            .times(1)
            .in_sequence(&mut seq)
            .returning(Ok);
        engine.expect_add_relation().times(0);

        let err = service(repository, engine).update(stored("owner")).await.unwrap_err();
        assert!(matches!(err, AuthzError::EngineUnavailable(_)));
    }

    #[tokio::test]
    async fn test_update_inconsistent_when_row_cannot_be_restored() {
        let mut repository = MockRelationRepository::new();
        let mut engine = MockAuthzEngine::new();
        repository.expect_get().returning(|_| Ok(stored("member")));
        repository
            .expect_update()
            .withf(|relation: &Relation| relation.role_id == "owner")
            .returning(Ok);
        repository
            .expect_update()
            .withf(|relation: &Relation| relation.role_id == "member")
            .returning(|_| Err(AuthzError::Storage("gone".to_string())));
        engine
            .expect_delete_relation()
            .returning(|_| Err(AuthzError::EngineUnavailable("down".to_string())));

        let err = service(repository, engine).update(stored("owner")).await.unwrap_err();
        assert!(matches!(err, AuthzError::Inconsistent(message) if message.contains("r1")));
    }

    #[tokio::test]
    async fn test_create_rejects_existing_row_with_other_userset() {
        let repository = Arc::new(InMemoryRelationRepository::new());
        let mut engine = MockAuthzEngine::new();
        engine.expect_add_relation().times(1).returning(|_| Ok(()));

        let service = RelationService::new(repository.clone(), Arc::new(engine));
        let team = Relation::for_role("app/group", "g1", "app/organization", "o1", "member");
        service.create(team.clone()).await.unwrap();

        let err = service
            .create(team.with_subject_relation("membership"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthzError::InvalidRelation(_)));
        assert_eq!(repository.len(), 1);
    }

    #[tokio::test]
    async fn test_update_reports_inconsistency_when_compensation_fails() {
        let mut repository = MockRelationRepository::new();
        let mut engine = MockAuthzEngine::new();
        repository.expect_get().returning(|_| Ok(stored("member")));
        repository.expect_update().returning(Ok);
        engine.expect_delete_relation().returning(|_| Ok(()));
        engine
            .expect_add_relation()
            .returning(|_| Err(AuthzError::EngineUnavailable("down".to_string())));

        let err = service(repository, engine).update(stored("owner")).await.unwrap_err();
        assert!(matches!(err, AuthzError::Inconsistent(message) if message.contains("r1")));
    }

    #[tokio::test]
    async fn test_delete_restores_row_when_engine_fails() {
        let repository = Arc::new(InMemoryRelationRepository::new());
        let mut engine = MockAuthzEngine::new();
        engine.expect_add_relation().returning(|_| Ok(()));
        engine
            .expect_delete_relation()
            .returning(|_| Err(AuthzError::EngineUnavailable("down".to_string())));

        let service = RelationService::new(repository.clone(), Arc::new(engine));
        let created = service.create(membership("member")).await.unwrap();
        assert!(service.delete(&created.id).await.is_err());
        assert_eq!(repository.len(), 1);
    }

    #[tokio::test]
    async fn test_batch_check_pairs_results_positionally() {
        let mut engine = MockAuthzEngine::new();
        engine.expect_batch_check_permission().returning(|requests: Vec<CheckRequest>| {
            Ok(requests
                .into_iter()
                .map(|request| {
                    let allowed = request.resource.object_id == "o1";
                    CheckResult { request, allowed }
                })
                .collect())
        });

        let checks = vec![
            PermissionCheck::new(membership("x"), "app_organization_get"),
            PermissionCheck::new(
                Relation::for_role("app/user", "u1", "app/organization", "o2", "x"),
                "app_organization_get",
            ),
        ];
        let pairs = service(MockRelationRepository::new(), engine)
            .batch_check_permission(checks)
            .await
            .unwrap();
        let granted: Vec<bool> = pairs.iter().map(|pair| pair.granted).collect();
        assert_eq!(granted, [true, false]);
        assert_eq!(pairs[1].check.relation.object_id, "o2");
    }

    #[tokio::test]
    async fn test_batch_check_rejects_short_answers() {
        let mut engine = MockAuthzEngine::new();
        engine.expect_batch_check_permission().returning(|_| Ok(Vec::new()));

        let checks = vec![PermissionCheck::new(membership("x"), "app_organization_get")];
        let err = service(MockRelationRepository::new(), engine)
            .batch_check_permission(checks)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthzError::Engine(_)));
    }

    #[tokio::test]
    async fn test_reconcile_counts() {
        let repository = Arc::new(InMemoryRelationRepository::new());
        repository.create(membership("member")).await.unwrap();
        repository.create(membership("owner")).await.unwrap();

        let mut engine = MockAuthzEngine::new();
        engine.expect_add_relation().returning(|tuple: EngineTuple| {
            if tuple.relation == "owner" {
                Err(AuthzError::EngineUnavailable("down".to_string()))
            } else {
                Ok(())
            }
        });

        let report = RelationService::new(repository, Arc::new(engine))
            .reconcile()
            .await
            .unwrap();
        assert_eq!(
            report,
            ReconcileReport {
                checked: 2,
                repaired: 1,
                failed: 1
            }
        );
    }

    struct StalledEngine;

    #[async_trait]
    impl AuthzEngine for StalledEngine {
        async fn write_schema(&self, _schema: String) -> Result<()> {
            Ok(())
        }

        async fn add_relation(&self, _tuple: EngineTuple) -> Result<()> {
            Ok(())
        }

        async fn delete_relation(&self, _tuple: EngineTuple) -> Result<()> {
            Ok(())
        }

        async fn check_relation(&self, _request: CheckRequest) -> Result<bool> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(true)
        }

        async fn batch_check_permission(&self, _requests: Vec<CheckRequest>) -> Result<Vec<CheckResult>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_check_honours_call_timeout() {
        let service = RelationService::new(Arc::new(InMemoryRelationRepository::new()), Arc::new(StalledEngine))
            .with_call_timeout(Duration::from_millis(50));
        let err = service
            .check_permission(&membership("x"), "app_organization_get")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthzError::Timeout(_)));
    }
}
