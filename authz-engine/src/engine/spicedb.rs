//! Client for an authorization engine's HTTP gateway (SpiceDB `/v1` API).

use super::AuthzEngine;
use crate::config::{Consistency, EngineSettings};
use crate::error::{AuthzError, Result};
use crate::tuple::{CheckRequest, CheckResult, EngineTuple, ObjectRef, SubjectRef};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const HAS_PERMISSION: &str = "PERMISSIONSHIP_HAS_PERMISSION";
const OPERATION_TOUCH: &str = "OPERATION_TOUCH";

pub struct SpiceDbHttpEngine {
    client: reqwest::Client,
    endpoint: String,
    token: String,
    consistency: Consistency,
    with_tracing: bool,
    /// Most recent revision returned by the engine
    last_token: RwLock<Option<String>>,
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectReference {
    object_type: String,
    object_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubjectReference {
    object: ObjectReference,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    optional_relation: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Relationship {
    resource: ObjectReference,
    relation: String,
    subject: SubjectReference,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RelationshipUpdate {
    operation: &'static str,
    relationship: Relationship,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WriteSchemaRequest {
    schema: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WriteRelationshipsRequest {
    updates: Vec<RelationshipUpdate>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubjectRelationFilter {
    relation: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubjectFilter {
    subject_type: String,
    optional_subject_id: String,
    optional_relation: SubjectRelationFilter,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RelationshipFilter {
    resource_type: String,
    optional_resource_id: String,
    optional_relation: String,
    optional_subject_filter: SubjectFilter,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteRelationshipsRequest {
    relationship_filter: RelationshipFilter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ZedToken {
    token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum ConsistencyRequirement {
    MinimizeLatency(bool),
    FullyConsistent(bool),
    AtLeastAsFresh(ZedToken),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckPermissionRequest {
    consistency: ConsistencyRequirement,
    resource: ObjectReference,
    permission: String,
    subject: SubjectReference,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    with_tracing: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BulkCheckItem {
    resource: ObjectReference,
    permission: String,
    subject: SubjectReference,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckBulkRequest {
    consistency: ConsistencyRequirement,
    items: Vec<BulkCheckItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WriteResponse {
    #[serde(alias = "deletedAt")]
    written_at: Option<ZedToken>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckPermissionResponse {
    checked_at: Option<ZedToken>,
    #[serde(default)]
    permissionship: String,
}

#[derive(Debug, Deserialize)]
struct BulkCheckItemResponse {
    #[serde(default)]
    permissionship: String,
}

#[derive(Debug, Deserialize)]
struct RpcStatus {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct BulkCheckPair {
    item: Option<BulkCheckItemResponse>,
    error: Option<RpcStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckBulkResponse {
    checked_at: Option<ZedToken>,
    #[serde(default)]
    pairs: Vec<BulkCheckPair>,
}

impl From<&ObjectRef> for ObjectReference {
    fn from(object: &ObjectRef) -> Self {
        Self {
            object_type: object.object_type.clone(),
            object_id: object.object_id.clone(),
        }
    }
}

impl From<&SubjectRef> for SubjectReference {
    fn from(subject: &SubjectRef) -> Self {
        Self {
            object: (&subject.object).into(),
            optional_relation: subject.optional_relation.clone().unwrap_or_default(),
        }
    }
}

impl From<&EngineTuple> for Relationship {
    fn from(tuple: &EngineTuple) -> Self {
        Self {
            resource: (&tuple.resource).into(),
            relation: tuple.relation.clone(),
            subject: (&tuple.subject).into(),
        }
    }
}

// ============================================================================
// Client
// ============================================================================

impl SpiceDbHttpEngine {
    pub fn new(endpoint: &str, token: &str) -> Result<Self> {
        Self::with_options(
            endpoint,
            token,
            Consistency::default(),
            Duration::from_secs(10),
        )
    }

    pub fn with_options(
        endpoint: &str,
        token: &str,
        consistency: Consistency,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthzError::Config(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: token.to_string(),
            consistency,
            with_tracing: false,
            last_token: RwLock::new(None),
        })
    }

    pub fn from_settings(settings: &EngineSettings) -> Result<Self> {
        let mut engine = Self::with_options(
            &settings.endpoint,
            &settings.token,
            settings.consistency,
            Duration::from_millis(settings.request_timeout_ms),
        )?;
        engine.with_tracing = settings.tracing;
        Ok(engine)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.endpoint, path.trim_start_matches('/'))
    }

    fn consistency(&self) -> ConsistencyRequirement {
        match self.consistency {
            Consistency::Full => ConsistencyRequirement::FullyConsistent(true),
            Consistency::MinimizeLatency => ConsistencyRequirement::MinimizeLatency(true),
            Consistency::BestEffort => match self.last_token.read().clone() {
                Some(token) => ConsistencyRequirement::AtLeastAsFresh(ZedToken { token }),
                None => ConsistencyRequirement::MinimizeLatency(true),
            },
        }
    }

    fn remember(&self, token: Option<ZedToken>) {
        if let Some(token) = token {
            *self.last_token.write() = Some(token.token);
        }
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AuthzError::Timeout(format!("engine {path}"))
                } else {
                    AuthzError::EngineUnavailable(format!("{path}: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(%status, path, "Engine request failed");
            let message = format!("{path} returned {status}: {error_text}");
            return Err(if status.is_server_error() {
                AuthzError::EngineUnavailable(message)
            } else {
                AuthzError::Engine(message)
            });
        }

        response
            .json()
            .await
            .map_err(|e| AuthzError::Engine(format!("{path}: invalid response: {e}")))
    }
}

#[async_trait]
impl AuthzEngine for SpiceDbHttpEngine {
    async fn write_schema(&self, schema: String) -> Result<()> {
        let response: WriteResponse = self
            .post("schema/write", &WriteSchemaRequest { schema })
            .await?;
        self.remember(response.written_at);
        debug!("Schema written");
        Ok(())
    }

    async fn add_relation(&self, tuple: EngineTuple) -> Result<()> {
        let request = WriteRelationshipsRequest {
            updates: vec![RelationshipUpdate {
                operation: OPERATION_TOUCH,
                relationship: (&tuple).into(),
            }],
        };
        let response: WriteResponse = self.post("relationships/write", &request).await?;
        self.remember(response.written_at);
        debug!(tuple = %tuple, "Relationship touched");
        Ok(())
    }

    async fn delete_relation(&self, tuple: EngineTuple) -> Result<()> {
        let request = DeleteRelationshipsRequest {
            relationship_filter: RelationshipFilter {
                resource_type: tuple.resource.object_type.clone(),
                optional_resource_id: tuple.resource.object_id.clone(),
                optional_relation: tuple.relation.clone(),
                optional_subject_filter: SubjectFilter {
                    subject_type: tuple.subject.object.object_type.clone(),
                    optional_subject_id: tuple.subject.object.object_id.clone(),
                    optional_relation: SubjectRelationFilter {
                        relation: tuple.subject.optional_relation.clone().unwrap_or_default(),
                    },
                },
            },
        };
        let response: WriteResponse = self.post("relationships/delete", &request).await?;
        self.remember(response.written_at);
        debug!(tuple = %tuple, "Relationship deleted");
        Ok(())
    }

    async fn check_relation(&self, request: CheckRequest) -> Result<bool> {
        let body = CheckPermissionRequest {
            consistency: self.consistency(),
            resource: (&request.resource).into(),
            permission: request.permission.clone(),
            subject: (&request.subject).into(),
            with_tracing: self.with_tracing,
        };
        let response: CheckPermissionResponse = self.post("permissions/check", &body).await?;
        self.remember(response.checked_at);
        Ok(response.permissionship == HAS_PERMISSION)
    }

    async fn batch_check_permission(&self, requests: Vec<CheckRequest>) -> Result<Vec<CheckResult>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        let body = CheckBulkRequest {
            consistency: self.consistency(),
            items: requests
                .iter()
                .map(|request| BulkCheckItem {
                    resource: (&request.resource).into(),
                    permission: request.permission.clone(),
                    subject: (&request.subject).into(),
                })
                .collect(),
        };
        let response: CheckBulkResponse = self.post("permissions/checkbulk", &body).await?;
        self.remember(response.checked_at);

        if response.pairs.len() != requests.len() {
            return Err(AuthzError::Engine(format!(
                "bulk check returned {} results for {} requests",
                response.pairs.len(),
                requests.len()
            )));
        }

        let mut failures = Vec::new();
        let mut results = Vec::with_capacity(requests.len());
        for (request, pair) in requests.into_iter().zip(response.pairs) {
            match (pair.item, pair.error) {
                (_, Some(status)) => failures.push(format!("{request}: {}", status.message)),
                (Some(item), None) => results.push(CheckResult {
                    request,
                    allowed: item.permissionship == HAS_PERMISSION,
                }),
                (None, None) => failures.push(format!("{request}: empty result")),
            }
        }
        if failures.is_empty() {
            Ok(results)
        } else {
            Err(AuthzError::Engine(format!(
                "bulk check failed for {} item(s): {}",
                failures.len(),
                failures.join("; ")
            )))
        }
    }
}
