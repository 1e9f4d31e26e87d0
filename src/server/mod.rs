//! The HTTP control plane (§6): an `actix-web` mapping of the
//! transport-agnostic operation table onto JSON endpoints, grounded on
//! the teacher's `server::status` router (its `/about`-style health
//! endpoint in particular).

mod error;

pub use error::{Error, ErrorKind, Result};

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use actix_web::{web, App, HttpResponse, HttpServer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Config;
use crate::metadata_store::{MetadataStore, NewTask};
use crate::processor::supervisor::ProcessorRegistry;
use crate::queue_manager::QueueItemManager;
use crate::queue_store::QueueStore;
use crate::registry::Registry;
use crate::types::{DataSource, QueueName, TaskId};

pub struct AppState {
    pub config: Arc<Config>,
    pub metadata_store: MetadataStore,
    pub fetch_registry: Arc<Registry>,
    pub processor_registry: Arc<ProcessorRegistry>,
}

pub async fn run(state: Arc<AppState>) -> std::io::Result<()> {
    let port = state.config.status_server_port;
    log::info!("status server listening on 0.0.0.0:{port}");

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .route("/about", web::get().to(about))
            .route("/tasks", web::post().to(create_task))
            .route("/tasks", web::get().to(list_tasks))
            .route("/tasks/{id}", web::get().to(get_task))
            .route("/tasks/{id}/execute", web::post().to(execute_task))
            .route("/tasks/{id}/pause", web::post().to(pause_task))
            .route("/tasks/{id}/progress", web::get().to(get_progress))
            .route("/tasks/{id}/inputs", web::post().to(add_inputs))
            .route("/tasks/{id}/queue/{queue}", web::get().to(list_queue_items))
            .route("/tasks/{id}/queue/{queue}", web::delete().to(delete_queue_items))
            .route("/tasks/{id}/logs", web::get().to(download_logs))
            .route("/logs/{data_source}", web::get().to(download_client_logs))
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}

fn open_queue_manager(config: &Config, task_id: TaskId) -> std::result::Result<QueueItemManager, crate::queue_manager::Error> {
    let store = QueueStore::open(&config.task_progress_dbs_dir, task_id)
        .map_err(crate::queue_manager::Error::from)?;
    Ok(QueueItemManager::new(store))
}

#[derive(Serialize)]
struct AboutResponse {
    name: &'static str,
    version: &'static str,
}

async fn about() -> HttpResponse {
    HttpResponse::Ok().json(AboutResponse {
        name: "harvestd",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Deserialize)]
struct CreateTaskRequest {
    data_source: String,
    task_type: String,
    params: Option<Value>,
    #[serde(default)]
    inputs: Vec<Value>,
    s3_prefix: Option<String>,
}

async fn create_task(state: web::Data<Arc<AppState>>, body: web::Json<CreateTaskRequest>) -> Result<HttpResponse> {
    let body = body.into_inner();
    let data_source = DataSource::from_str(&body.data_source).map_err(ErrorKind::Validation)?;

    if !state.fetch_registry.is_known(data_source, &body.task_type) {
        return Err(ErrorKind::Validation(format!(
            "unrecognized (data_source, task_type): ({}, {})",
            body.data_source, body.task_type
        ))
        .into());
    }

    let s3_prefix = body
        .s3_prefix
        .unwrap_or_else(|| format!("{}/{}", body.data_source, body.task_type));

    let task = state.metadata_store.create_task(NewTask {
        data_source,
        task_type: body.task_type,
        params: body.params,
        s3_prefix,
    })?;

    if !body.inputs.is_empty() {
        let manager = open_queue_manager(&state.config, task.id)?;
        manager.add_inputs(&body.inputs)?;
    }

    Ok(HttpResponse::Created().json(task))
}

#[derive(Deserialize)]
struct ListQuery {
    cursor: Option<TaskId>,
    limit: Option<i64>,
}

async fn list_tasks(state: web::Data<Arc<AppState>>, query: web::Query<ListQuery>) -> Result<HttpResponse> {
    let page = state
        .metadata_store
        .list_tasks(query.cursor, query.limit.unwrap_or(50))?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "tasks": page.tasks,
        "next_cursor": page.next_cursor,
    })))
}

async fn get_task(state: web::Data<Arc<AppState>>, path: web::Path<TaskId>) -> Result<HttpResponse> {
    let task = state.metadata_store.require_task(path.into_inner())?;
    Ok(HttpResponse::Ok().json(task))
}

async fn execute_task(state: web::Data<Arc<AppState>>, path: web::Path<TaskId>) -> Result<HttpResponse> {
    let id = path.into_inner();
    state.processor_registry.execute(id).await?;
    let task = state.metadata_store.require_task(id)?;
    Ok(HttpResponse::Ok().json(task))
}

async fn pause_task(state: web::Data<Arc<AppState>>, path: web::Path<TaskId>) -> Result<HttpResponse> {
    let id = path.into_inner();
    state.processor_registry.pause(id)?;
    let task = state.metadata_store.require_task(id)?;
    Ok(HttpResponse::Ok().json(task))
}

async fn get_progress(state: web::Data<Arc<AppState>>, path: web::Path<TaskId>) -> Result<HttpResponse> {
    let id = path.into_inner();
    state.metadata_store.require_task(id)?;
    let manager = open_queue_manager(&state.config, id)?;
    let counts = manager.queue_item_counts()?;
    Ok(HttpResponse::Ok().json(counts))
}

#[derive(Deserialize)]
struct PageQuery {
    cursor: Option<i64>,
    limit: Option<i64>,
}

async fn list_queue_items(
    state: web::Data<Arc<AppState>>,
    path: web::Path<(TaskId, String)>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse> {
    let (id, queue_name) = path.into_inner();
    state.metadata_store.require_task(id)?;
    let queue = QueueName::from_str(&queue_name).map_err(ErrorKind::Validation)?;
    let manager = open_queue_manager(&state.config, id)?;
    let page = manager.page(queue, query.cursor, query.limit.unwrap_or(100))?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "items": page.items,
        "next_cursor": page.next_cursor,
        "total": page.total,
    })))
}

#[derive(Deserialize)]
struct DeleteQueueItemsRequest {
    ids: Vec<i64>,
}

async fn delete_queue_items(
    state: web::Data<Arc<AppState>>,
    path: web::Path<(TaskId, String)>,
    body: web::Json<DeleteQueueItemsRequest>,
) -> Result<HttpResponse> {
    let (id, queue_name) = path.into_inner();
    state.metadata_store.require_task(id)?;
    let queue = QueueName::from_str(&queue_name).map_err(ErrorKind::Validation)?;
    let manager = open_queue_manager(&state.config, id)?;
    let removed = manager.delete_by_ids(queue, &body.ids)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "removed_count": removed })))
}

#[derive(Deserialize)]
struct AddInputsRequest {
    payloads: Vec<Value>,
}

async fn add_inputs(
    state: web::Data<Arc<AppState>>,
    path: web::Path<TaskId>,
    body: web::Json<AddInputsRequest>,
) -> Result<HttpResponse> {
    let id = path.into_inner();
    state.metadata_store.require_task(id)?;
    let manager = open_queue_manager(&state.config, id)?;
    let received = manager.add_inputs(&body.payloads)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "received_count": received })))
}

async fn download_logs(state: web::Data<Arc<AppState>>, path: web::Path<TaskId>) -> Result<HttpResponse> {
    let id = path.into_inner();
    state.metadata_store.require_task(id)?;
    let log_path = state.config.task_log_dir.join(format!("{id}.log"));
    let contents = std::fs::read_to_string(&log_path).unwrap_or_default();
    Ok(HttpResponse::Ok().content_type("text/plain").body(contents))
}

/// Filters the shared app log for lines mentioning `data_source`, as a
/// stand-in for a dedicated per-client-library log stream (the original
/// system's client libraries each logged to their own file; this engine
/// has one app-wide log, so filtering is the closest equivalent).
async fn download_client_logs(state: web::Data<Arc<AppState>>, path: web::Path<String>) -> Result<HttpResponse> {
    let data_source = path.into_inner();
    DataSource::from_str(&data_source).map_err(ErrorKind::Validation)?;

    let app_log_path: &Path = &state.config.app_log_dir.join("harvestd.log");
    let contents = std::fs::read_to_string(app_log_path).unwrap_or_default();
    let filtered: String = contents
        .lines()
        .filter(|line| line.contains(&data_source))
        .collect::<Vec<_>>()
        .join("\n");
    Ok(HttpResponse::Ok().content_type("text/plain").body(filtered))
}
