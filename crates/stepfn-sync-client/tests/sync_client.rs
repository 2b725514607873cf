#![allow(clippy::expect_used, clippy::panic, clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use stepfn_client_core::{
    DocumentSource, ExecuteDisposition, ExecutePath, ExecutionOutcome, Identity, LoadDisposition,
    MemoryNavigation, MemoryStorage, Navigation, SessionController, SyncError, SyncTransport,
};
use stepfn_sync_client::{SyncClient, SyncClientConfig};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};

#[derive(Debug, Clone)]
struct RecordedCall {
    path: String,
    request_id: Option<String>,
}

#[derive(Default)]
struct ServiceState {
    documents: HashMap<String, (DocumentSource, String)>,
    minted: usize,
    calls: Vec<RecordedCall>,
    failing: bool,
}

type SharedState = Arc<Mutex<ServiceState>>;

struct ServiceStub {
    base_url: String,
    state: SharedState,
    shutdown: Option<oneshot::Sender<()>>,
}

impl ServiceStub {
    async fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().await.calls.clone()
    }

    async fn set_failing(&self, failing: bool) {
        self.state.lock().await.failing = failing;
    }

    fn client(&self, execute_path: ExecutePath) -> Result<SyncClient> {
        let mut config = SyncClientConfig::new(self.base_url.as_str());
        config.timeout_ms = 5_000;
        config.execute_path = execute_path;
        Ok(SyncClient::new(config)?)
    }

    fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ExecuteBody {
    script: String,
    definition: String,
    input: String,
    #[serde(default)]
    id: Option<String>,
    key: String,
}

async fn spawn_service_stub() -> Result<ServiceStub> {
    let state: SharedState = Arc::default();
    let app = Router::new()
        .route("/sfn", get(load_document).post(execute_document))
        .route("/execute", post(execute_document))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });
        let _ = server.await;
    });

    Ok(ServiceStub {
        base_url: format!("http://{addr}"),
        state,
        shutdown: Some(shutdown_tx),
    })
}

fn record(state: &mut ServiceState, path: &str, headers: &HeaderMap) {
    state.calls.push(RecordedCall {
        path: path.to_string(),
        request_id: headers
            .get("x-request-id")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
    });
}

async fn load_document(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let mut state = state.lock().await;
    record(&mut state, "GET /sfn", &headers);
    if state.failing {
        return (StatusCode::INTERNAL_SERVER_ERROR, "storage unavailable").into_response();
    }
    let id = query.get("id").cloned().unwrap_or_default();
    match state.documents.get(&id) {
        Some((source, _)) => Json(json!({
            "Script": source.script,
            "Definition": source.definition,
            "Input": source.input,
        }))
        .into_response(),
        None => (StatusCode::NOT_FOUND, "Not Found").into_response(),
    }
}

async fn execute_document(
    State(state): State<SharedState>,
    headers: HeaderMap,
    uri: axum::http::Uri,
    Json(body): Json<ExecuteBody>,
) -> Response {
    let mut state = state.lock().await;
    record(&mut state, &format!("POST {}", uri.path()), &headers);
    if state.failing {
        return (StatusCode::INTERNAL_SERVER_ERROR, "storage unavailable").into_response();
    }

    let requested = body.id.clone().unwrap_or_default();
    let owned = state
        .documents
        .get(&requested)
        .is_some_and(|(_, key)| *key == body.key);
    let id = if owned {
        requested
    } else {
        state.minted += 1;
        format!("S{:026}", state.minted)
    };
    state.documents.insert(
        id.clone(),
        (
            DocumentSource {
                definition: body.definition,
                script: body.script.clone(),
                input: body.input,
            },
            body.key,
        ),
    );

    if body.script.contains("throw") {
        return Json(json!({
            "output": "not json",
            "cause": "boom",
        }))
        .into_response();
    }
    let inner = json!({
        "Id": id,
        "Output": {"First": 1, "Second": 2, "Sum": 3},
    });
    Json(json!({ "output": inner.to_string() })).into_response()
}

fn draft_identity(key: &str) -> Identity {
    Identity {
        id: String::new(),
        key: key.to_string(),
    }
}

#[tokio::test]
async fn execute_then_load_returns_the_same_triple() -> Result<()> {
    let stub = spawn_service_stub().await?;
    let client = stub.client(ExecutePath::Execute)?;
    let source = DocumentSource {
        definition: r#"{"StartAt":"A","States":{"A":{"Type":"Pass","End":true}}}"#.to_string(),
        script: "const sum = input => input.a + input.b;".to_string(),
        input: r#"{"a": 1, "b": 2}"#.to_string(),
    };

    let outcome = client
        .execute_document(&source, &draft_identity("k1"))
        .await?;
    let (id, output) = match outcome {
        ExecutionOutcome::Completed {
            id: Some(id),
            output,
        } => (id, output),
        other => panic!("expected a saved execution, got {other:?}"),
    };
    assert_eq!(id.len(), 27);
    assert_eq!(output, json!({"First": 1, "Second": 2, "Sum": 3}));

    let loaded = client.load_document(&id).await?;
    assert_eq!(loaded, source);

    stub.stop();
    Ok(())
}

#[tokio::test]
async fn matching_key_updates_in_place_and_other_keys_fork() -> Result<()> {
    let stub = spawn_service_stub().await?;
    let client = stub.client(ExecutePath::Execute)?;
    let source = DocumentSource::example();

    let first = client
        .execute_document(&source, &draft_identity("owner"))
        .await?;
    let ExecutionOutcome::Completed { id: Some(id), .. } = first else {
        panic!("expected an id");
    };

    let owner = Identity {
        id: id.clone(),
        key: "owner".to_string(),
    };
    let again = client.execute_document(&source, &owner).await?;
    assert!(matches!(again, ExecutionOutcome::Completed { id: Some(ref same), .. } if *same == id));

    let stranger = Identity {
        id: id.clone(),
        key: "stranger".to_string(),
    };
    let forked = client.execute_document(&source, &stranger).await?;
    assert!(matches!(forked, ExecutionOutcome::Completed { id: Some(ref other), .. } if *other != id));

    stub.stop();
    Ok(())
}

#[tokio::test]
async fn unknown_id_is_not_found() -> Result<()> {
    let stub = spawn_service_stub().await?;
    let client = stub.client(ExecutePath::Execute)?;

    let result = client.load_document("S00000000000000000000000000").await;
    assert_eq!(
        result,
        Err(SyncError::NotFound {
            id: "S00000000000000000000000000".to_string()
        })
    );

    stub.stop();
    Ok(())
}

#[tokio::test]
async fn server_errors_are_network_failures() -> Result<()> {
    let stub = spawn_service_stub().await?;
    stub.set_failing(true).await;
    let client = stub.client(ExecutePath::Execute)?;

    let load = client.load_document("abc").await;
    let message = match load {
        Err(SyncError::Network { message }) => message,
        other => panic!("expected a network error, got {other:?}"),
    };
    assert!(message.starts_with("stepfn_http_500"));
    assert!(message.ends_with("storage unavailable"));

    let execute = client
        .execute_document(&DocumentSource::example(), &draft_identity("k"))
        .await;
    assert!(matches!(execute, Err(SyncError::Network { .. })));

    stub.stop();
    Ok(())
}

#[tokio::test]
async fn non_json_output_is_reported_with_its_cause() -> Result<()> {
    let stub = spawn_service_stub().await?;
    let client = stub.client(ExecutePath::Execute)?;
    let mut source = DocumentSource::example();
    source.script = "function unix() { throw new Error('boom'); }".to_string();

    let outcome = client
        .execute_document(&source, &draft_identity("k"))
        .await?;
    assert_eq!(
        outcome,
        ExecutionOutcome::Failed {
            cause: "boom".to_string()
        }
    );

    stub.stop();
    Ok(())
}

#[tokio::test]
async fn unreachable_service_is_a_network_failure() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let mut config = SyncClientConfig::new(format!("http://{addr}"));
    config.timeout_ms = 1_000;
    let client = SyncClient::new(config)?;

    let load = client.load_document("abc").await;
    assert!(matches!(load, Err(SyncError::Network { .. })));
    let execute = client
        .execute_document(&DocumentSource::example(), &draft_identity("k"))
        .await;
    assert!(matches!(execute, Err(SyncError::Network { .. })));
    Ok(())
}

#[tokio::test]
async fn requests_carry_ids_and_follow_the_configured_execute_path() -> Result<()> {
    let stub = spawn_service_stub().await?;
    let client = stub.client(ExecutePath::Sfn)?;

    client
        .execute_document(&DocumentSource::example(), &draft_identity("k"))
        .await?;
    let _ = client.load_document("missing").await;

    let calls = stub.calls().await;
    let paths: Vec<&str> = calls.iter().map(|call| call.path.as_str()).collect();
    assert_eq!(paths, vec!["POST /sfn", "GET /sfn"]);
    for call in &calls {
        let request_id = call.request_id.as_deref().unwrap_or_default();
        assert!(request_id.starts_with("req_"), "missing request id: {call:?}");
    }
    assert_ne!(calls[0].request_id, calls[1].request_id);

    stub.stop();
    Ok(())
}

#[tokio::test]
async fn session_saves_and_reopens_over_http() -> Result<()> {
    let stub = spawn_service_stub().await?;
    let storage = MemoryStorage::new();

    let navigation = MemoryNavigation::new("");
    let session = SessionController::new(
        stub.client(ExecutePath::Execute)?,
        storage.clone(),
        navigation.clone(),
    );
    session.start().await?;
    session.edit_input(r#"{"a": 10, "b": 20}"#)?;
    let ExecuteDisposition::Completed {
        id,
        new_id_assigned,
    } = session.execute().await?
    else {
        panic!("execute should complete");
    };
    assert!(new_id_assigned);
    assert_eq!(navigation.fragment(), format!("#/sfn/{id}"));
    assert!(session.document().output.contains("\"Sum\": 3"));

    // A second tab on the same device holds the key and updates in place.
    let reopened = SessionController::new(
        stub.client(ExecutePath::Execute)?,
        storage,
        MemoryNavigation::new(format!("#/sfn/{id}")),
    );
    assert_eq!(
        reopened.start().await?,
        LoadDisposition::Loaded { id: id.clone() }
    );
    assert_eq!(reopened.document().input, r#"{"a": 10, "b": 20}"#);
    reopened.edit_input(r#"{"a": 11, "b": 20}"#)?;
    assert_eq!(
        reopened.execute().await?,
        ExecuteDisposition::Completed {
            id: id.clone(),
            new_id_assigned: false,
        }
    );

    let loaded = stub.client(ExecutePath::Execute)?.load_document(&id).await?;
    assert_eq!(loaded.input, r#"{"a": 11, "b": 20}"#);

    stub.stop();
    Ok(())
}
