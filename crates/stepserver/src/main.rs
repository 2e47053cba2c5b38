use actix_cors::Cors;
use actix_web::{get, post, put, web, App, HttpResponse, HttpServer, Responder, Result as ActixResult};
use actix_ws::Message;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use stepcodegen::{CompileError, Compiler};
use stepcore::{repair_triggers, Fields, FlowError, Graph};
use stepruntime::{ActionRegistry, ExecutionRun, FlowRuntime, RuntimeConfig};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Application state shared across handlers
struct AppState {
    runtime: Arc<FlowRuntime>,
}

/// Request body for running a stored workflow
#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    #[serde(default)]
    input: Fields,
}

/// Request body for running or compiling an inline graph
#[derive(Debug, Deserialize)]
struct GraphRequest {
    graph: Graph,
    #[serde(default)]
    input: Fields,
    /// Package name for compiled output.
    name: Option<String>,
}

/// Response for workflow creation
#[derive(Debug, Serialize)]
struct WorkflowResponse {
    id: Uuid,
    message: String,
}

/// Error response
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl ErrorResponse {
    fn new(error: impl ToString) -> Self {
        Self {
            error: error.to_string(),
            details: None,
        }
    }
}

fn flow_error_response(e: &FlowError) -> HttpResponse {
    match e {
        FlowError::Structural(s) => HttpResponse::UnprocessableEntity().json(ErrorResponse {
            error: e.to_string(),
            details: serde_json::to_value(s).ok(),
        }),
        FlowError::NotFound(_) => HttpResponse::NotFound().json(ErrorResponse::new(e)),
        _ => HttpResponse::InternalServerError().json(ErrorResponse::new(e)),
    }
}

fn compile_error_response(e: &CompileError) -> HttpResponse {
    let details = match e {
        CompileError::Structural(s) => serde_json::to_value(s).ok(),
        _ => None,
    };
    HttpResponse::UnprocessableEntity().json(ErrorResponse {
        error: e.to_string(),
        details,
    })
}

fn run_response(run: &ExecutionRun) -> HttpResponse {
    HttpResponse::Ok().json(run)
}

/// Health check endpoint
#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "stepflow"
    }))
}

/// List registered actions grouped by integration
#[get("/api/actions")]
async fn list_actions(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let registry = data.runtime.registry();
    let integrations: Vec<_> = registry
        .integrations()
        .into_iter()
        .map(|integration| {
            let actions: Vec<_> = registry
                .list_actions()
                .into_iter()
                .filter(|a| a.integration() == integration.id)
                .collect();
            serde_json::json!({
                "id": integration.id,
                "label": integration.label,
                "description": integration.description,
                "dependencies": integration.dependencies,
                "envVars": integration.env_vars,
                "actions": actions,
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(integrations))
}

/// List stored workflows
#[get("/api/workflows")]
async fn list_workflows(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let workflow_list: Vec<_> = data
        .runtime
        .list_workflows()
        .await
        .into_iter()
        .map(|(id, graph)| {
            serde_json::json!({
                "id": id,
                "name": graph.name,
                "description": graph.description,
                "nodes": graph.nodes.len(),
                "edges": graph.edges.len(),
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(workflow_list))
}

/// Store a workflow. Validation happens when it runs, so drafts are accepted.
#[post("/api/workflows")]
async fn create_workflow(data: web::Data<AppState>, graph: web::Json<Graph>) -> ActixResult<impl Responder> {
    let graph = graph.into_inner();
    let name = graph.name.clone().unwrap_or_default();
    let id = data.runtime.register_workflow(graph).await;

    info!("Created workflow: {} ({})", name, id);

    Ok(HttpResponse::Created().json(WorkflowResponse {
        id,
        message: "Workflow created successfully".to_string(),
    }))
}

/// Get a specific workflow
#[get("/api/workflows/{id}")]
async fn get_workflow(data: web::Data<AppState>, path: web::Path<Uuid>) -> ActixResult<impl Responder> {
    let id = path.into_inner();

    match data.runtime.get_workflow(id).await {
        Some(graph) => Ok(HttpResponse::Ok().json(graph)),
        None => Ok(HttpResponse::NotFound().json(ErrorResponse::new(format!("Workflow {} not found", id)))),
    }
}

/// Replace a stored workflow
#[put("/api/workflows/{id}")]
async fn update_workflow(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
    graph: web::Json<Graph>,
) -> ActixResult<impl Responder> {
    let id = path.into_inner();

    match data.runtime.update_workflow(id, graph.into_inner()).await {
        Ok(()) => {
            info!("Updated workflow: {}", id);
            Ok(HttpResponse::Ok().json(WorkflowResponse {
                id,
                message: "Workflow updated successfully".to_string(),
            }))
        }
        Err(e) => Ok(flow_error_response(&e)),
    }
}

/// Delete a workflow
#[actix_web::delete("/api/workflows/{id}")]
async fn delete_workflow(data: web::Data<AppState>, path: web::Path<Uuid>) -> ActixResult<impl Responder> {
    let id = path.into_inner();

    match data.runtime.remove_workflow(id).await {
        Some(_) => {
            info!("Deleted workflow: {}", id);
            Ok(HttpResponse::Ok().json(serde_json::json!({
                "message": "Workflow deleted successfully"
            })))
        }
        None => Ok(HttpResponse::NotFound().json(ErrorResponse::new(format!("Workflow {} not found", id)))),
    }
}

/// Execute a stored workflow
#[post("/api/workflows/{id}/execute")]
async fn execute_workflow(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
    req: Option<web::Json<ExecuteRequest>>,
) -> ActixResult<impl Responder> {
    let id = path.into_inner();
    let input = req.map(|r| r.into_inner().input).unwrap_or_default();

    info!("Executing workflow: {}", id);

    match data.runtime.execute_workflow(id, input).await {
        Ok(run) => {
            info!("Workflow {} finished as {:?} (run {})", id, run.status, run.run_id);
            Ok(run_response(&run))
        }
        Err(e) => {
            error!("Workflow {} execution failed: {}", id, e);
            Ok(flow_error_response(&e))
        }
    }
}

/// Validate a graph without storing it
#[post("/api/validate")]
async fn validate_graph(data: web::Data<AppState>, graph: web::Json<Graph>) -> ActixResult<impl Responder> {
    match data.runtime.validate(&graph) {
        Ok(()) => Ok(HttpResponse::Ok().json(serde_json::json!({ "valid": true }))),
        Err(e) => Ok(HttpResponse::UnprocessableEntity().json(serde_json::json!({
            "valid": false,
            "error": e,
        }))),
    }
}

/// Drop every trigger after the first
#[post("/api/repair")]
async fn repair_graph(graph: web::Json<Graph>) -> ActixResult<impl Responder> {
    let repair = repair_triggers(graph.into_inner());
    if !repair.is_noop() {
        warn!("Repaired graph by removing triggers {:?}", repair.removed_nodes);
    }
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "graph": repair.graph,
        "removedNodes": repair.removed_nodes,
        "removedEdges": repair.removed_edges,
    })))
}

/// Run an inline graph
#[post("/api/execute")]
async fn execute_graph(data: web::Data<AppState>, req: web::Json<GraphRequest>) -> ActixResult<impl Responder> {
    let GraphRequest { graph, input, .. } = req.into_inner();

    match data.runtime.execute(&graph, input).await {
        Ok(run) => Ok(run_response(&run)),
        Err(e) => {
            error!("Inline execution failed: {}", e);
            Ok(flow_error_response(&e))
        }
    }
}

/// Compile an inline graph to a standalone TypeScript project
#[post("/api/compile")]
async fn compile_graph(data: web::Data<AppState>, req: web::Json<GraphRequest>) -> ActixResult<impl Responder> {
    let GraphRequest { graph, name, .. } = req.into_inner();
    let fan_in = data.runtime.config().fan_in;

    match Compiler::new(&graph, data.runtime.registry()).with_fan_in(fan_in).compile() {
        Ok(compiled) => {
            let name = name.unwrap_or_else(|| "workflow".to_string());
            let files: serde_json::Map<String, serde_json::Value> = compiled
                .files(&name)
                .into_iter()
                .map(|(path, contents)| (path, serde_json::Value::String(contents)))
                .collect();
            Ok(HttpResponse::Ok().json(serde_json::json!({
                "functionName": compiled.function_name,
                "dependencies": compiled.dependencies,
                "envVars": compiled.env_vars,
                "files": files,
            })))
        }
        Err(e) => {
            warn!("Compile rejected: {}", e);
            Ok(compile_error_response(&e))
        }
    }
}

/// WebSocket endpoint for real-time run events
#[get("/api/events")]
async fn websocket_events(
    req: actix_web::HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    info!("WebSocket client connected");

    let mut events = data.runtime.subscribe_events();

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
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                            warn!("WebSocket client lagged, dropped {} events", missed);
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

fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health_check)
        .service(list_actions)
        .service(list_workflows)
        .service(create_workflow)
        .service(get_workflow)
        .service(update_workflow)
        .service(delete_workflow)
        .service(execute_workflow)
        .service(validate_graph)
        .service(repair_graph)
        .service(execute_graph)
        .service(compile_graph)
        .service(websocket_events);
}

fn app_state(registry: Arc<ActionRegistry>, config: RuntimeConfig) -> web::Data<AppState> {
    web::Data::new(AppState {
        runtime: Arc::new(FlowRuntime::with_config(registry, config)),
    })
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🚀 Starting stepflow server");

    let config = match std::env::var("STEPFLOW_CONFIG") {
        Ok(path) => {
            info!("Loading config from {}", path);
            RuntimeConfig::load(&path)?
        }
        Err(_) => RuntimeConfig::default(),
    };
    let registry = stepruntime::registry::init(stepplugins::register_all)?;
    let app_state = app_state(registry, config);

    info!("✅ Runtime initialized with built-in actions");

    let bind_address = std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

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
