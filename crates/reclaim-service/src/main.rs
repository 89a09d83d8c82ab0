use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use clap::Parser;
use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::Date;
use tracing_subscriber::EnvFilter;

use reclaim_api::{
    MatchCancelled, MatchCreated, NoopNotifier, Notifier, ReclaimApi, WebhookNotifier,
    API_CONTRACT_VERSION,
};
use reclaim_core::{
    ArchiveEntry, Category, Claimant, FoundItem, FoundItemDraft, ItemKey, ItemKind, ItemStatus,
    LostItem, LostItemDraft, LostItemPatch, MatchKey, MatchRecord, ReclaimError,
};
use reclaim_store_sqlite::{ListFilter, SortOrder};

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const DEFAULT_LOG_FILTER: &str = "reclaim_service=info,reclaim_api=info";

#[derive(Debug, Clone)]
struct ServiceState {
    api: ReclaimApi,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    #[serde(skip)]
    status: StatusCode,
    service_contract_version: &'static str,
    error_kind: &'static str,
    error: String,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct CategoryInfo {
    value: &'static str,
    label: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct LostSubmission {
    item: LostItem,
    matches_created: Vec<MatchCreated>,
}

#[derive(Debug, Clone, Serialize)]
struct FoundSubmission {
    item: FoundItem,
    matches_created: Vec<MatchCreated>,
}

#[derive(Debug, Clone, Serialize)]
struct CategoryCount {
    category: Category,
    count: u64,
}

#[derive(Debug, Clone, Serialize)]
struct ClaimedPair {
    lost: ArchiveEntry,
    found: ArchiveEntry,
}

#[derive(Debug, Clone, Deserialize)]
struct ClaimRequest {
    claimed_by_id: String,
    claimed_by_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ListQuery {
    category: Option<String>,
    status: Option<String>,
    date: Option<String>,
    order: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct CategoryQuery {
    category: String,
}

#[derive(Debug, Parser)]
#[command(name = "reclaim-service")]
#[command(about = "Local HTTP service for the Reclaim lost-and-found catalog")]
struct Args {
    #[arg(long, default_value = "./reclaim.sqlite3")]
    db: PathBuf,
    #[arg(long, default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
    /// Optional webhook endpoint for match notifications. Without it,
    /// notifications are logged and dropped.
    #[arg(long)]
    notify_webhook: Option<String>,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

impl From<ReclaimError> for ServiceError {
    fn from(err: ReclaimError) -> Self {
        let status = match &err {
            ReclaimError::NotFound(_) => StatusCode::NOT_FOUND,
            ReclaimError::InconsistentState(_) => StatusCode::CONFLICT,
            ReclaimError::Validation(_) => StatusCode::BAD_REQUEST,
            ReclaimError::Store(_) | ReclaimError::Notify(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            service_contract_version: SERVICE_CONTRACT_VERSION,
            error_kind: err.kind(),
            error: err.to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> ServiceError {
    ServiceError {
        status: StatusCode::BAD_REQUEST,
        service_contract_version: SERVICE_CONTRACT_VERSION,
        error_kind: "validation",
        error: message.into(),
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

fn parse_date_param(value: &str) -> Result<Date, ServiceError> {
    Date::parse(value, format_description!("[year]-[month]-[day]"))
        .map_err(|_| bad_request(format!("invalid date: {value}")))
}

fn parse_filter(query: &ListQuery) -> Result<ListFilter, ServiceError> {
    let mut filter = ListFilter::default();
    if let Some(category) = &query.category {
        filter.category =
            Some(Category::parse(category).ok_or_else(|| {
                bad_request(format!("unknown category: {category}"))
            })?);
    }
    if let Some(status) = &query.status {
        filter.status = Some(
            ItemStatus::parse(status)
                .ok_or_else(|| bad_request(format!("unknown status: {status}")))?,
        );
    }
    if let Some(date) = &query.date {
        filter.date = Some(parse_date_param(date)?);
    }
    if let Some(order) = &query.order {
        filter.order = SortOrder::parse(order)
            .ok_or_else(|| bad_request(format!("unknown order: {order}")))?;
    }
    Ok(filter)
}

fn parse_item_key(value: &str) -> Result<ItemKey, ServiceError> {
    ItemKey::parse(value).ok_or_else(|| bad_request(format!("invalid item key: {value}")))
}

fn parse_match_key(value: &str) -> Result<MatchKey, ServiceError> {
    MatchKey::parse(value).ok_or_else(|| bad_request(format!("invalid match key: {value}")))
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/categories", get(categories))
        .route("/v1/statuses", get(statuses))
        .route("/v1/lost-items", post(lost_create).get(lost_list))
        .route("/v1/lost-items/:key", put(lost_update).delete(lost_delete))
        .route("/v1/found-items", post(found_create).get(found_list))
        .route("/v1/found-items/category-count", get(found_category_count))
        .route("/v1/found-items/:key", delete(found_delete))
        .route("/v1/matches", get(matches_list))
        .route("/v1/matches/:key", delete(match_cancel))
        .route("/v1/matches/:key/claim", post(match_claim))
        .route("/v1/items/:kind/:key/claim", post(item_claim))
        .route("/v1/reconcile", post(reconcile_run))
        .route("/v1/archive", get(archive_list))
        .with_state(state)
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    let notifier: Arc<dyn Notifier> = match &args.notify_webhook {
        Some(endpoint) => Arc::new(WebhookNotifier::new(endpoint.clone())),
        None => Arc::new(NoopNotifier),
    };
    let state = ServiceState { api: ReclaimApi::with_notifier(args.db, notifier) };

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(bind = %args.bind, "reclaim service listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn categories() -> Json<ServiceEnvelope<Vec<CategoryInfo>>> {
    let categories = Category::ALL
        .iter()
        .map(|category| CategoryInfo { value: category.as_str(), label: category.label() })
        .collect();
    Json(envelope(categories))
}

async fn statuses() -> Json<ServiceEnvelope<Vec<&'static str>>> {
    let statuses = [ItemStatus::Pending, ItemStatus::Matched, ItemStatus::Claimed]
        .iter()
        .map(|status| status.as_str())
        .collect();
    Json(envelope(statuses))
}

/// Submitting a report triggers a reconciliation pass immediately; a pass
/// failure is logged and leaves the submission intact.
fn reconcile_after_submission(api: &ReclaimApi) -> Vec<MatchCreated> {
    match api.reconcile() {
        Ok(created) => created,
        Err(err) => {
            tracing::error!(error = %err, "post-submission reconciliation failed");
            Vec::new()
        }
    }
}

async fn lost_create(
    State(state): State<ServiceState>,
    Json(draft): Json<LostItemDraft>,
) -> Result<Json<ServiceEnvelope<LostSubmission>>, ServiceError> {
    let item = state.api.submit_lost(&draft)?;
    let matches_created = reconcile_after_submission(&state.api);
    Ok(Json(envelope(LostSubmission { item, matches_created })))
}

async fn lost_list(
    State(state): State<ServiceState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ServiceEnvelope<Vec<LostItem>>>, ServiceError> {
    let filter = parse_filter(&query)?;
    Ok(Json(envelope(state.api.lost_items(&filter)?)))
}

async fn lost_update(
    State(state): State<ServiceState>,
    Path(key): Path<String>,
    Json(patch): Json<LostItemPatch>,
) -> Result<Json<ServiceEnvelope<LostItem>>, ServiceError> {
    let key = parse_item_key(&key)?;
    Ok(Json(envelope(state.api.edit_lost(key, &patch)?)))
}

async fn lost_delete(
    State(state): State<ServiceState>,
    Path(key): Path<String>,
) -> Result<Json<ServiceEnvelope<ItemKey>>, ServiceError> {
    let key = parse_item_key(&key)?;
    state.api.remove_item(ItemKind::Lost, key)?;
    Ok(Json(envelope(key)))
}

async fn found_create(
    State(state): State<ServiceState>,
    Json(draft): Json<FoundItemDraft>,
) -> Result<Json<ServiceEnvelope<FoundSubmission>>, ServiceError> {
    let item = state.api.submit_found(&draft)?;
    let matches_created = reconcile_after_submission(&state.api);
    Ok(Json(envelope(FoundSubmission { item, matches_created })))
}

async fn found_list(
    State(state): State<ServiceState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ServiceEnvelope<Vec<FoundItem>>>, ServiceError> {
    let filter = parse_filter(&query)?;
    Ok(Json(envelope(state.api.found_items(&filter)?)))
}

async fn found_delete(
    State(state): State<ServiceState>,
    Path(key): Path<String>,
) -> Result<Json<ServiceEnvelope<ItemKey>>, ServiceError> {
    let key = parse_item_key(&key)?;
    state.api.remove_item(ItemKind::Found, key)?;
    Ok(Json(envelope(key)))
}

async fn found_category_count(
    State(state): State<ServiceState>,
    Query(query): Query<CategoryQuery>,
) -> Result<Json<ServiceEnvelope<CategoryCount>>, ServiceError> {
    let category = Category::parse(&query.category)
        .ok_or_else(|| bad_request(format!("unknown category: {}", query.category)))?;
    let count = state.api.count_found_in_category(category)?;
    Ok(Json(envelope(CategoryCount { category, count })))
}

async fn matches_list(
    State(state): State<ServiceState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ServiceEnvelope<Vec<MatchRecord>>>, ServiceError> {
    let filter = parse_filter(&query)?;
    Ok(Json(envelope(state.api.matches(filter.date, filter.order)?)))
}

async fn match_cancel(
    State(state): State<ServiceState>,
    Path(key): Path<String>,
) -> Result<Json<ServiceEnvelope<MatchCancelled>>, ServiceError> {
    let key = parse_match_key(&key)?;
    Ok(Json(envelope(state.api.cancel_match(key)?)))
}

async fn match_claim(
    State(state): State<ServiceState>,
    Path(key): Path<String>,
    Json(request): Json<ClaimRequest>,
) -> Result<Json<ServiceEnvelope<ClaimedPair>>, ServiceError> {
    let key = parse_match_key(&key)?;
    let claimant = Claimant { id: request.claimed_by_id, name: request.claimed_by_name };
    let (lost, found) = state.api.claim_matched(key, &claimant)?;
    Ok(Json(envelope(ClaimedPair { lost, found })))
}

async fn item_claim(
    State(state): State<ServiceState>,
    Path((kind, key)): Path<(String, String)>,
    Json(request): Json<ClaimRequest>,
) -> Result<Json<ServiceEnvelope<ArchiveEntry>>, ServiceError> {
    let kind =
        ItemKind::parse(&kind).ok_or_else(|| bad_request(format!("unknown item kind: {kind}")))?;
    let key = parse_item_key(&key)?;
    let claimant = Claimant { id: request.claimed_by_id, name: request.claimed_by_name };
    Ok(Json(envelope(state.api.claim_item(kind, key, &claimant)?)))
}

async fn reconcile_run(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<Vec<MatchCreated>>>, ServiceError> {
    Ok(Json(envelope(state.api.reconcile()?)))
}

async fn archive_list(
    State(state): State<ServiceState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ServiceEnvelope<Vec<ArchiveEntry>>>, ServiceError> {
    let filter = parse_filter(&query)?;
    Ok(Json(envelope(state.api.archive_entries(&filter)?)))
}
