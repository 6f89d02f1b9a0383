//! HTTP admin API
//!
//! RESTful CRUD over namespaces and clusters plus read-only task
//! listings. Every response uses the `{ success, data, error }` envelope.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use metadata::Cluster;

use crate::error::Error;
use crate::store::{FailOverKind, FailOverTask, MetaStore, MigrateTask};

/// HTTP admin service
pub struct AdminApi {
    store: Arc<MetaStore>,
}

impl AdminApi {
    pub fn new(store: Arc<MetaStore>) -> Self {
        Self { store }
    }

    /// Build the router
    pub fn router(self) -> Router {
        Router::new()
            // Controller
            .route("/api/v1/controller/leader", get(get_leader))
            // Namespaces
            .route("/api/v1/namespaces", get(list_namespaces))
            .route("/api/v1/namespaces", post(create_namespace))
            .route("/api/v1/namespaces/:namespace", delete(remove_namespace))
            // Clusters
            .route("/api/v1/namespaces/:namespace/clusters", get(list_clusters))
            .route("/api/v1/namespaces/:namespace/clusters", post(create_cluster))
            .route(
                "/api/v1/namespaces/:namespace/clusters/:cluster",
                get(get_cluster),
            )
            .route(
                "/api/v1/namespaces/:namespace/clusters/:cluster",
                delete(remove_cluster),
            )
            // Failover
            .route(
                "/api/v1/namespaces/:namespace/clusters/:cluster/shards/:shard/failover",
                post(queue_failover),
            )
            .route(
                "/api/v1/namespaces/:namespace/clusters/:cluster/failover/tasks",
                get(list_failover_tasks),
            )
            .route(
                "/api/v1/namespaces/:namespace/clusters/:cluster/failover/history",
                get(failover_history),
            )
            // Migration
            .route(
                "/api/v1/namespaces/:namespace/clusters/:cluster/migrate",
                post(submit_migration),
            )
            .route(
                "/api/v1/namespaces/:namespace/clusters/:cluster/migrate/pending",
                get(pending_migrations),
            )
            .route(
                "/api/v1/namespaces/:namespace/clusters/:cluster/migrate/history",
                get(migrate_history),
            )
            .with_state(self.store)
    }
}

// ==================== Response envelope ====================

#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> (StatusCode, Json<Self>) {
        (
            StatusCode::OK,
            Json(Self {
                success: true,
                data: Some(data),
                error: None,
            }),
        )
    }

    fn err(err: &Error) -> (StatusCode, Json<Self>) {
        (
            status_for(err),
            Json(Self {
                success: false,
                data: None,
                error: Some(err.to_string()),
            }),
        )
    }
}

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::NotLeader => StatusCode::SERVICE_UNAVAILABLE,
        Error::AlreadyExists | Error::NotEmpty | Error::MigrationConflict(_) => {
            StatusCode::CONFLICT
        }
        Error::NotExists => StatusCode::NOT_FOUND,
        Error::InvalidArgument(_) | Error::Metadata(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond<T: Serialize>(result: Result<T, Error>) -> impl IntoResponse {
    match result {
        Ok(data) => ApiResponse::ok(data),
        Err(err) => ApiResponse::err(&err),
    }
}

// ==================== Request types ====================

#[derive(Deserialize)]
struct CreateNamespaceRequest {
    namespace: String,
}

#[derive(Deserialize)]
struct CreateClusterRequest {
    cluster: String,
    /// Flat `host:port` list forming the shards
    nodes: Vec<String>,
    /// Nodes per shard (master plus replicas)
    replica: usize,
}

#[derive(Deserialize)]
struct SubmitMigrationRequest {
    tasks: Vec<MigrateTask>,
}

// ==================== Handlers ====================

async fn get_leader(State(store): State<Arc<MetaStore>>) -> impl IntoResponse {
    ApiResponse::ok(store.leader_id())
}

async fn list_namespaces(State(store): State<Arc<MetaStore>>) -> impl IntoResponse {
    respond(store.list_namespaces().await)
}

async fn create_namespace(
    State(store): State<Arc<MetaStore>>,
    Json(request): Json<CreateNamespaceRequest>,
) -> impl IntoResponse {
    respond(store.create_namespace(&request.namespace).await)
}

async fn remove_namespace(
    State(store): State<Arc<MetaStore>>,
    Path(namespace): Path<String>,
) -> impl IntoResponse {
    respond(store.remove_namespace(&namespace).await)
}

async fn list_clusters(
    State(store): State<Arc<MetaStore>>,
    Path(namespace): Path<String>,
) -> impl IntoResponse {
    respond(store.list_clusters(&namespace).await)
}

async fn create_cluster(
    State(store): State<Arc<MetaStore>>,
    Path(namespace): Path<String>,
    Json(request): Json<CreateClusterRequest>,
) -> impl IntoResponse {
    let result = async {
        let info = Cluster::assemble(&request.nodes, request.replica)?;
        store
            .create_cluster(&namespace, &request.cluster, Some(info))
            .await
    }
    .await;
    respond(result)
}

async fn get_cluster(
    State(store): State<Arc<MetaStore>>,
    Path((namespace, cluster)): Path<(String, String)>,
) -> impl IntoResponse {
    respond(store.get_cluster(&namespace, &cluster).await)
}

async fn remove_cluster(
    State(store): State<Arc<MetaStore>>,
    Path((namespace, cluster)): Path<(String, String)>,
) -> impl IntoResponse {
    respond(store.remove_cluster(&namespace, &cluster).await)
}

async fn queue_failover(
    State(store): State<Arc<MetaStore>>,
    Path((namespace, cluster, shard)): Path<(String, String, usize)>,
) -> impl IntoResponse {
    let task = FailOverTask {
        namespace,
        cluster,
        shard_idx: shard,
        kind: FailOverKind::Manual,
        probe_count: 0,
        queued_at: 0,
        started_at: 0,
        finished_at: 0,
        error_detail: None,
    };
    respond(store.update_failover_task(&task).await)
}

async fn list_failover_tasks(
    State(store): State<Arc<MetaStore>>,
    Path((namespace, cluster)): Path<(String, String)>,
) -> impl IntoResponse {
    respond(store.list_failover_tasks(&namespace, &cluster).await)
}

async fn failover_history(
    State(store): State<Arc<MetaStore>>,
    Path((namespace, cluster)): Path<(String, String)>,
) -> impl IntoResponse {
    respond(store.failover_history(&namespace, &cluster).await)
}

async fn submit_migration(
    State(store): State<Arc<MetaStore>>,
    Path((namespace, cluster)): Path<(String, String)>,
    Json(request): Json<SubmitMigrationRequest>,
) -> impl IntoResponse {
    respond(
        store
            .add_pending_migrate_tasks(&namespace, &cluster, request.tasks)
            .await,
    )
}

async fn pending_migrations(
    State(store): State<Arc<MetaStore>>,
    Path((namespace, cluster)): Path<(String, String)>,
) -> impl IntoResponse {
    respond(store.pending_migrate_tasks(&namespace, &cluster).await)
}

async fn migrate_history(
    State(store): State<Arc<MetaStore>>,
    Path((namespace, cluster)): Path<(String, String)>,
) -> impl IntoResponse {
    respond(store.migrate_history(&namespace, &cluster).await)
}
