use actix_cors::Cors;
use actix_web::{
    get, post, web, App, HttpResponse, HttpServer, Responder, Result as ActixResult,
};
use actix_ws::Message;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;
use weavecore::{EngineError, Value, WorkflowDocument, WorkflowError, WorkflowId};
use weaveruntime::{CapabilityRegistry, Orchestrator, OrchestratorConfig};

/// Application state shared across handlers
struct AppState {
    orchestrator: Arc<Orchestrator>,
    registry: Arc<CapabilityRegistry>,
    /// Source documents of registered workflows, served back on GET
    documents: RwLock<HashMap<WorkflowId, WorkflowDocument>>,
}

impl AppState {
    fn new(config: OrchestratorConfig) -> Self {
        Self {
            orchestrator: Arc::new(Orchestrator::with_config(config)),
            registry: Arc::new(weavesteps::standard_registry()),
            documents: RwLock::new(HashMap::new()),
        }
    }
}

/// Request body for workflow execution
#[derive(Debug, Default, Deserialize)]
struct ExecuteRequest {
    #[serde(default)]
    input: Value,
    #[serde(default)]
    metadata: HashMap<String, Value>,
}

/// Response for workflow creation
#[derive(Debug, Serialize)]
struct WorkflowResponse {
    id: WorkflowId,
    replaced: bool,
    message: String,
}

/// Error response
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_body(error: impl ToString) -> ErrorResponse {
    ErrorResponse {
        error: error.to_string(),
    }
}

fn definition_error(e: &WorkflowError) -> HttpResponse {
    HttpResponse::UnprocessableEntity().json(error_body(e))
}

fn engine_error(e: &EngineError) -> HttpResponse {
    match e {
        EngineError::DefinitionNotFound(_) => HttpResponse::NotFound().json(error_body(e)),
        EngineError::ConcurrencyLimitExceeded { .. } => {
            HttpResponse::TooManyRequests().json(error_body(e))
        }
        EngineError::Workflow(inner) => definition_error(inner),
        _ => HttpResponse::InternalServerError().json(error_body(e)),
    }
}

/// Health check endpoint
#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "weave"
    }))
}

/// List all workflows
#[get("/api/workflows")]
async fn list_workflows(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let workflows = data.orchestrator.list_workflows().await;
    let workflow_list: Vec<_> = workflows
        .iter()
        .map(|w| {
            serde_json::json!({
                "id": w.id,
                "name": w.name,
                "description": w.description,
                "steps": w.steps.len(),
                "on_error": w.on_error,
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(workflow_list))
}

/// Create or replace a workflow from a document
#[post("/api/workflows")]
async fn create_workflow(
    data: web::Data<AppState>,
    document: web::Json<WorkflowDocument>,
) -> ActixResult<impl Responder> {
    let document = document.into_inner();
    let workflow_id = document.id.clone();

    let definition = match data.registry.build(&document) {
        Ok(definition) => definition,
        Err(e) => {
            warn!("Rejected workflow {}: {}", workflow_id, e);
            return Ok(definition_error(&e));
        }
    };
    if let Err(e) = data.orchestrator.validate(&definition) {
        warn!("Rejected workflow {}: {}", workflow_id, e);
        return Ok(definition_error(&e));
    }

    info!("Creating workflow: {} ({})", definition.name, workflow_id);

    let replaced = match data.orchestrator.register(definition).await {
        Ok(previous) => previous.is_some(),
        Err(e) => return Ok(engine_error(&e)),
    };
    data.documents
        .write()
        .await
        .insert(workflow_id.clone(), document);

    Ok(HttpResponse::Created().json(WorkflowResponse {
        id: workflow_id,
        replaced,
        message: "Workflow registered successfully".to_string(),
    }))
}

/// Get a specific workflow document
#[get("/api/workflows/{id}")]
async fn get_workflow(
    data: web::Data<AppState>,
    path: web::Path<WorkflowId>,
) -> ActixResult<impl Responder> {
    let workflow_id = path.into_inner();
    let documents = data.documents.read().await;

    match documents.get(&workflow_id) {
        Some(document) => Ok(HttpResponse::Ok().json(document)),
        None => Ok(HttpResponse::NotFound().json(error_body(format!(
            "Workflow {} not found",
            workflow_id
        )))),
    }
}

/// Delete a workflow
#[actix_web::delete("/api/workflows/{id}")]
async fn delete_workflow(
    data: web::Data<AppState>,
    path: web::Path<WorkflowId>,
) -> ActixResult<impl Responder> {
    let workflow_id = path.into_inner();
    data.documents.write().await.remove(&workflow_id);

    match data.orchestrator.unregister(&workflow_id).await {
        Some(_) => {
            info!("Deleted workflow: {}", workflow_id);
            Ok(HttpResponse::Ok().json(serde_json::json!({
                "message": "Workflow deleted successfully"
            })))
        }
        None => Ok(HttpResponse::NotFound().json(error_body(format!(
            "Workflow {} not found",
            workflow_id
        )))),
    }
}

/// Execute a workflow and wait for its result
#[post("/api/workflows/{id}/execute")]
async fn execute_workflow(
    data: web::Data<AppState>,
    path: web::Path<WorkflowId>,
    req: Option<web::Json<ExecuteRequest>>,
) -> ActixResult<impl Responder> {
    let workflow_id = path.into_inner();
    let req = req.map(|r| r.into_inner()).unwrap_or_default();

    info!("Executing workflow: {}", workflow_id);

    match data
        .orchestrator
        .execute(&workflow_id, req.input, req.metadata)
        .await
    {
        Ok(result) => {
            info!(
                "Workflow {} finished as {:?} in {}ms",
                workflow_id, result.status, result.duration_ms
            );
            Ok(HttpResponse::Ok().json(result))
        }
        Err(e) => {
            error!("Workflow {} execution failed: {}", workflow_id, e);
            Ok(engine_error(&e))
        }
    }
}

/// Cancel an active run
#[post("/api/runs/{id}/cancel")]
async fn cancel_run(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ActixResult<impl Responder> {
    let run_id = path.into_inner();

    if data.orchestrator.cancel(run_id) {
        Ok(HttpResponse::Ok().json(serde_json::json!({
            "run_id": run_id,
            "status": "cancelled"
        })))
    } else {
        Ok(HttpResponse::NotFound().json(error_body(format!(
            "Run {} is not active",
            run_id
        ))))
    }
}

/// List active runs
#[get("/api/runs")]
async fn list_runs(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    Ok(HttpResponse::Ok().json(data.orchestrator.active_runs()))
}

/// Orchestrator statistics
#[get("/api/stats")]
async fn stats(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    Ok(HttpResponse::Ok().json(data.orchestrator.stats()))
}

/// WebSocket endpoint for real-time events
#[get("/api/events")]
async fn websocket_events(
    req: actix_web::HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    info!("WebSocket client connected");

    let mut events = data.orchestrator.subscribe();

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            if let Ok(json) = serde_json::to_string(&event) {
                                if session.text(json).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("WebSocket client lagged, {} events dropped", skipped);
                        }
                        Err(_) => break,
                    }
                }

                Some(Ok(msg)) = msg_stream.recv() => {
                    match msg {
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }

                else => break,
            }
        }

        info!("WebSocket client disconnected");
        let _ = session.close(None).await;
    });

    Ok(res)
}

/// List available capabilities
#[get("/api/capabilities")]
async fn list_capabilities(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let registry = &data.registry;

    let capabilities: Vec<_> = registry
        .list_capabilities()
        .iter()
        .map(|name| {
            let metadata = registry.get_metadata(name).unwrap_or_default();
            serde_json::json!({
                "name": name,
                "description": metadata.description,
                "category": metadata.category,
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(capabilities))
}

fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health_check)
        .service(list_workflows)
        .service(create_workflow)
        .service(get_workflow)
        .service(delete_workflow)
        .service(execute_workflow)
        .service(cancel_run)
        .service(list_runs)
        .service(stats)
        .service(websocket_events)
        .service(list_capabilities);
}

fn load_config() -> anyhow::Result<OrchestratorConfig> {
    let mut config = match std::env::var("WEAVE_CONFIG") {
        Ok(path) => OrchestratorConfig::from_file(&path)?,
        Err(_) => OrchestratorConfig::default(),
    };
    if let Ok(max) = std::env::var("WEAVE_MAX_CONCURRENT_RUNS") {
        config = config.with_max_concurrent_runs(max.parse()?);
    }
    Ok(config)
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("🚀 Starting Weave Server");

    let config = load_config()?;
    info!(
        "✅ Orchestrator ready: {} concurrent runs, standard capabilities loaded",
        config.max_concurrent_runs
    );

    let app_state = web::Data::new(AppState::new(config));

    if let Ok(dir) = std::env::var("WEAVE_WORKFLOW_DIR") {
        let loaded = weaveruntime::WorkflowLoader::new(&dir)
            .load_into(&app_state.registry, &app_state.orchestrator)
            .await?;
        info!("📂 Loaded {} workflows from {}", loaded.len(), dir);
    }

    let bind_address =
        std::env::var("WEAVE_BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

    info!("🌐 Server starting on http://{}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .configure(configure)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use actix_web::test;

    const DOCUMENT: &str = r#"{
        "id": "sum",
        "steps": [
            { "id": "total", "kind": "aggregate", "capability": "math.sum" }
        ]
    }"#;

    fn state(max_runs: usize) -> web::Data<AppState> {
        web::Data::new(AppState::new(
            OrchestratorConfig::default().with_max_concurrent_runs(max_runs),
        ))
    }

    #[actix_web::test]
    async fn create_then_execute() {
        let app = test::init_service(App::new().app_data(state(10)).configure(configure)).await;

        let document: serde_json::Value = serde_json::from_str(DOCUMENT).unwrap();
        let req = test::TestRequest::post()
            .uri("/api/workflows")
            .set_json(&document)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let req = test::TestRequest::post()
            .uri("/api/workflows/sum/execute")
            .set_json(serde_json::json!({ "input": [1, 2, 3] }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "completed");
        assert_eq!(body["output"], serde_json::json!(6.0));

        let req = test::TestRequest::get().uri("/api/stats").to_request();
        let stats_body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(stats_body["completed_workflows"], 1);
    }

    #[actix_web::test]
    async fn error_statuses() {
        let app = test::init_service(App::new().app_data(state(10)).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/workflows/ghost/execute")
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let cyclic = serde_json::json!({
            "id": "loop",
            "steps": [
                { "id": "a", "kind": "call", "capability": "debug.log", "depends_on": ["b"] },
                { "id": "b", "kind": "call", "capability": "debug.log", "depends_on": ["a"] }
            ]
        });
        let req = test::TestRequest::post()
            .uri("/api/workflows")
            .set_json(&cyclic)
            .to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );

        let unknown = serde_json::json!({
            "id": "odd",
            "steps": [ { "id": "a", "kind": "call", "capability": "no.such" } ]
        });
        let req = test::TestRequest::post()
            .uri("/api/workflows")
            .set_json(&unknown)
            .to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );

        let req = test::TestRequest::post()
            .uri(&format!("/api/runs/{}/cancel", Uuid::new_v4()))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn capacity_maps_to_too_many_requests() {
        let resp = engine_error(&EngineError::ConcurrencyLimitExceeded { limit: 1 });
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);

        let resp = engine_error(&EngineError::Workflow(WorkflowError::Cycle {
            path: vec!["a".to_string(), "a".to_string()],
        }));
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
