use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::DocumentSource;
use crate::error::SyncError;
use crate::identity::Identity;

/// Body of an execute request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExecuteRequest {
    pub script: String,
    pub definition: String,
    pub input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub key: String,
}

impl ExecuteRequest {
    #[must_use]
    pub fn new(source: &DocumentSource, identity: &Identity) -> Self {
        Self {
            script: source.script.clone(),
            definition: source.definition.clone(),
            input: source.input.clone(),
            id: Some(identity.id.clone()).filter(|id| !id.is_empty()),
            key: identity.key.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// The simulated run produced JSON. `id` is the document id the service
    /// stored the run under, possibly newly assigned.
    Completed { id: Option<String>, output: Value },
    /// The simulated program failed or returned non-JSON.
    Failed { cause: String },
}

impl ExecutionOutcome {
    /// Text for the output panel: pretty JSON on success, the cause verbatim
    /// on failure.
    #[must_use]
    pub fn display_output(&self) -> String {
        match self {
            Self::Completed { output, .. } => {
                serde_json::to_string_pretty(output).unwrap_or_else(|_| output.to_string())
            }
            Self::Failed { cause } => cause.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExecuteEnvelope {
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    cause: Option<String>,
}

/// Decodes the two-layer execute response. The outer body must be JSON; the
/// `output` string inside it is decoded again, and only that inner failure is
/// reported as an execution failure rather than an error.
///
/// An inner `null` counts as a failure. Any other inner JSON value completes:
/// objects contribute their `Id` and `Output` members, while scalars and arrays
/// complete with no id and a `null` output.
pub fn decode_execute_envelope(bytes: &[u8]) -> Result<ExecutionOutcome, SyncError> {
    let envelope =
        serde_json::from_slice::<ExecuteEnvelope>(bytes).map_err(|error| SyncError::Network {
            message: format!("execute_envelope_decode_failed:{error}"),
        })?;

    let payload = envelope.output.as_deref().map(serde_json::from_str::<Value>);
    match payload {
        Some(Ok(Value::Object(mut members))) => Ok(ExecutionOutcome::Completed {
            id: match members.remove("Id") {
                Some(Value::String(id)) if !id.is_empty() => Some(id),
                _ => None,
            },
            output: members.remove("Output").unwrap_or(Value::Null),
        }),
        Some(Ok(Value::Null)) | None => Ok(ExecutionOutcome::Failed {
            cause: envelope.cause.unwrap_or_default(),
        }),
        Some(Ok(other)) => {
            tracing::debug!(kind = value_kind(&other), "Execution output carries no Id or Output");
            Ok(ExecutionOutcome::Completed {
                id: None,
                output: Value::Null,
            })
        }
        Some(Err(error)) => {
            tracing::debug!(%error, "Execution output is not JSON; surfacing cause");
            Ok(ExecutionOutcome::Failed {
                cause: envelope.cause.unwrap_or_default(),
            })
        }
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub fn decode_load_response(bytes: &[u8]) -> Result<DocumentSource, SyncError> {
    serde_json::from_slice::<DocumentSource>(bytes).map_err(|error| SyncError::Network {
        message: format!("load_response_decode_failed:{error}"),
    })
}

/// The remote half of the session: the two network round trips.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn load_document(&self, id: &str) -> Result<DocumentSource, SyncError>;

    async fn execute_document(
        &self,
        source: &DocumentSource,
        identity: &Identity,
    ) -> Result<ExecutionOutcome, SyncError>;
}

#[async_trait]
impl<T: SyncTransport + ?Sized> SyncTransport for std::sync::Arc<T> {
    async fn load_document(&self, id: &str) -> Result<DocumentSource, SyncError> {
        (**self).load_document(id).await
    }

    async fn execute_document(
        &self,
        source: &DocumentSource,
        identity: &Identity,
    ) -> Result<ExecutionOutcome, SyncError> {
        (**self).execute_document(source, identity).await
    }
}
