use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use person_store_api::{
    find_tool, AgeRequest, CreatePersonRequest, IdRequest, JobTitleRequest, MutationResult,
    PersonList, PersonStoreApi, SexRequest, ToolDescriptor, UpdatePersonRequest,
    API_CONTRACT_VERSION,
};
use person_store_core::{Person, PersonId, PersonStore};
use person_store_loader::{bundled_dataset, load_dataset, DatasetInfo};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");

#[derive(Debug, Clone)]
struct ServiceState {
    api: PersonStoreApi,
    dataset: Arc<DatasetInfo>,
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
    error: String,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Clone, Deserialize)]
struct JobTitleParams {
    job_title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SexParams {
    sex: Option<String>,
}

#[derive(Debug, Parser)]
#[command(name = "person-store-service")]
#[command(about = "Local HTTP service for the in-memory person store")]
struct Args {
    /// Initial dataset (NDJSON or JSON array); the bundled dataset when omitted.
    #[arg(long)]
    data: Option<PathBuf>,
    #[arg(long, default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

impl ServiceState {
    fn new(store: PersonStore, dataset: DatasetInfo) -> Self {
        Self { api: PersonStoreApi::new(Arc::new(store)), dataset: Arc::new(dataset) }
    }

    fn error(status: StatusCode, message: impl Into<String>) -> ServiceError {
        ServiceError {
            status,
            service_contract_version: SERVICE_CONTRACT_VERSION,
            error: message.into(),
        }
    }

    fn bad_request(err: &anyhow::Error) -> ServiceError {
        Self::error(StatusCode::BAD_REQUEST, format!("{err:#}"))
    }

    fn not_found(id: PersonId) -> ServiceError {
        Self::error(StatusCode::NOT_FOUND, format!("person not found: {id}"))
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

fn is_blank(body: &[u8]) -> bool {
    body.iter().all(u8::is_ascii_whitespace)
}

fn parse_person_body(body: &[u8]) -> Result<Option<Person>, ServiceError> {
    if is_blank(body) {
        return Ok(None);
    }
    serde_json::from_slice::<Option<Person>>(body).map_err(|err| {
        ServiceState::error(StatusCode::BAD_REQUEST, format!("invalid person body: {err}"))
    })
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/openapi", get(openapi))
        .route("/v1/dataset", get(dataset_info))
        .route("/v1/persons", get(persons_list).post(persons_create))
        .route("/v1/persons/search", get(persons_search))
        .route("/v1/persons/filter/sex", get(persons_filter_sex))
        .route("/v1/persons/filter/age/:age", get(persons_filter_age))
        .route(
            "/v1/persons/:id",
            get(persons_show).put(persons_update).delete(persons_delete),
        )
        .route("/v1/tools", get(tools_list))
        .route("/v1/tools/:name", post(tools_invoke))
        .with_state(state)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let dataset = match args.data.as_deref() {
        Some(path) => load_dataset(path)?,
        None => bundled_dataset()?,
    };
    let store = PersonStore::with_records(dataset.records)
        .with_context(|| format!("failed to initialize store from {}", dataset.info.source))?;
    let state = ServiceState::new(store, dataset.info);
    tracing::info!(
        source = %state.dataset.source,
        records = state.dataset.records,
        "person store ready"
    );

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    tracing::info!(bind = %args.bind, "listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn dataset_info(State(state): State<ServiceState>) -> Json<ServiceEnvelope<DatasetInfo>> {
    Json(envelope(state.dataset.as_ref().clone()))
}

async fn persons_list(State(state): State<ServiceState>) -> Json<ServiceEnvelope<PersonList>> {
    Json(envelope(state.api.get_all_persons()))
}

async fn persons_create(
    State(state): State<ServiceState>,
    body: Bytes,
) -> Result<(StatusCode, Json<ServiceEnvelope<Person>>), ServiceError> {
    let person = parse_person_body(&body)?;
    let created = state
        .api
        .create_person(CreatePersonRequest { person })
        .map_err(|err| ServiceState::bad_request(&err))?;
    Ok((StatusCode::CREATED, Json(envelope(created))))
}

async fn persons_show(
    State(state): State<ServiceState>,
    Path(id): Path<u64>,
) -> Result<Json<ServiceEnvelope<Person>>, ServiceError> {
    let id = PersonId(id);
    let person = state.api.get_person_by_id(id).person.ok_or_else(|| ServiceState::not_found(id))?;
    Ok(Json(envelope(person)))
}

async fn persons_update(
    State(state): State<ServiceState>,
    Path(id): Path<u64>,
    body: Bytes,
) -> Result<Json<ServiceEnvelope<MutationResult>>, ServiceError> {
    let id = PersonId(id);
    let person = parse_person_body(&body)?;
    let result = state
        .api
        .update_person(UpdatePersonRequest { id, person })
        .map_err(|err| ServiceState::bad_request(&err))?;
    if !result.applied {
        return Err(ServiceState::not_found(id));
    }
    Ok(Json(envelope(result)))
}

async fn persons_delete(
    State(state): State<ServiceState>,
    Path(id): Path<u64>,
) -> Result<Json<ServiceEnvelope<MutationResult>>, ServiceError> {
    let id = PersonId(id);
    let result =
        state.api.delete_person(IdRequest { id }).map_err(|err| ServiceState::bad_request(&err))?;
    if !result.applied {
        return Err(ServiceState::not_found(id));
    }
    Ok(Json(envelope(result)))
}

async fn persons_search(
    State(state): State<ServiceState>,
    Query(params): Query<JobTitleParams>,
) -> Json<ServiceEnvelope<PersonList>> {
    let request = JobTitleRequest { query: params.job_title };
    Json(envelope(state.api.search_by_job_title(&request)))
}

async fn persons_filter_sex(
    State(state): State<ServiceState>,
    Query(params): Query<SexParams>,
) -> Json<ServiceEnvelope<PersonList>> {
    Json(envelope(state.api.filter_by_sex(&SexRequest { sex: params.sex })))
}

async fn persons_filter_age(
    State(state): State<ServiceState>,
    Path(age): Path<i32>,
) -> Json<ServiceEnvelope<PersonList>> {
    Json(envelope(state.api.filter_by_age(AgeRequest { age })))
}

async fn tools_list() -> Json<ServiceEnvelope<Vec<ToolDescriptor>>> {
    Json(envelope(PersonStoreApi::tools()))
}

async fn tools_invoke(
    State(state): State<ServiceState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Json<ServiceEnvelope<Value>>, ServiceError> {
    if find_tool(&name).is_none() {
        return Err(ServiceState::error(StatusCode::NOT_FOUND, format!("unknown tool: {name}")));
    }
    let arguments = if is_blank(&body) {
        Value::Null
    } else {
        serde_json::from_slice(&body).map_err(|err| {
            ServiceState::error(StatusCode::BAD_REQUEST, format!("invalid tool arguments: {err}"))
        })?
    };
    let result = state.api.invoke(&name, arguments).map_err(|err| ServiceState::bad_request(&err))?;
    Ok(Json(envelope(result)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use http::Request;
    use tower::ServiceExt;

    fn fixture_router() -> Router {
        let dataset = match bundled_dataset() {
            Ok(dataset) => dataset,
            Err(err) => panic!("bundled dataset should load: {err:#}"),
        };
        let store = match PersonStore::with_records(dataset.records) {
            Ok(store) => store,
            Err(err) => panic!("bundled dataset should seed the store: {err}"),
        };
        app(ServiceState::new(store, dataset.info))
    }

    async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> Response {
        let builder = Request::builder().uri(uri).method(method);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(axum::body::Body::from(body.to_string())),
            None => builder.body(axum::body::Body::empty()),
        }
        .unwrap_or_else(|err| panic!("failed to build request: {err}"));

        match router.clone().oneshot(request).await {
            Ok(response) => response,
            Err(err) => panic!("router request failed: {err}"),
        }
    }

    async fn response_json(response: Response) -> Value {
        let bytes = match to_bytes(response.into_body(), 1024 * 1024).await {
            Ok(bytes) => bytes,
            Err(err) => panic!("failed to read response body: {err}"),
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(err) => panic!("response body is not JSON: {err}"),
        }
    }

    fn person_payload(first_name: &str) -> Value {
        serde_json::json!({
            "first_name": first_name,
            "last_name": "User",
            "email": "test.user@example.com",
            "sex": "Other",
            "ip_address": "127.0.0.1",
            "job_title": "Tester",
            "age": 25
        })
    }

    // Test IDs: TSVC-001
    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let router = fixture_router();
        let response = send(&router, "GET", "/v1/health", None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let value = response_json(response).await;
        assert_eq!(
            value.get("service_contract_version").and_then(Value::as_str),
            Some(SERVICE_CONTRACT_VERSION)
        );
        assert_eq!(value["data"]["status"], "ok");
    }

    // Test IDs: TSVC-002
    #[tokio::test]
    async fn openapi_endpoint_returns_versioned_artifact() {
        let router = fixture_router();
        let response = send(&router, "GET", "/v1/openapi", None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = match to_bytes(response.into_body(), 1024 * 1024).await {
            Ok(bytes) => bytes,
            Err(err) => panic!("failed to read response body: {err}"),
        };
        let body = String::from_utf8_lossy(&bytes);
        assert!(body.contains("openapi: 3.1.0"));
        assert!(body.contains("version: service.v1"));
        assert!(body.contains("/v1/persons/{id}"));
        assert!(body.contains("/v1/tools/{name}"));
    }

    // Test IDs: TSVC-003
    #[tokio::test]
    async fn person_crud_round_trip_over_rest_routes() {
        let router = fixture_router();
        let initial = response_json(send(&router, "GET", "/v1/persons", None).await).await["data"]
            ["count"]
            .as_u64()
            .unwrap_or_else(|| panic!("list should report a count"));

        let created = send(&router, "POST", "/v1/persons", Some(person_payload("Test"))).await;
        assert_eq!(created.status(), StatusCode::CREATED);
        let created = response_json(created).await;
        let id = created["data"]["id"]
            .as_u64()
            .unwrap_or_else(|| panic!("created person should carry an id: {created}"));
        assert!(id > initial);

        let shown = send(&router, "GET", &format!("/v1/persons/{id}"), None).await;
        assert_eq!(shown.status(), StatusCode::OK);
        assert_eq!(response_json(shown).await["data"], created["data"]);

        let updated =
            send(&router, "PUT", &format!("/v1/persons/{id}"), Some(person_payload("Updated")))
                .await;
        assert_eq!(updated.status(), StatusCode::OK);
        let shown = response_json(send(&router, "GET", &format!("/v1/persons/{id}"), None).await)
            .await;
        assert_eq!(shown["data"]["first_name"], "Updated");
        assert_eq!(shown["data"]["id"], id);

        let deleted = send(&router, "DELETE", &format!("/v1/persons/{id}"), None).await;
        assert_eq!(deleted.status(), StatusCode::OK);
        let missing = send(&router, "GET", &format!("/v1/persons/{id}"), None).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        let deleted_again = send(&router, "DELETE", &format!("/v1/persons/{id}"), None).await;
        assert_eq!(deleted_again.status(), StatusCode::NOT_FOUND);
    }

    // Test IDs: TSVC-004
    #[tokio::test]
    async fn absent_person_body_is_bad_request() {
        let router = fixture_router();

        let empty = send(&router, "POST", "/v1/persons", None).await;
        assert_eq!(empty.status(), StatusCode::BAD_REQUEST);
        let value = response_json(empty).await;
        assert!(value["error"].as_str().is_some_and(|error| error.contains("invalid argument")));

        let null = send(&router, "PUT", "/v1/persons/9998", Some(Value::Null)).await;
        assert_eq!(null.status(), StatusCode::BAD_REQUEST);

        let missing = send(&router, "PUT", "/v1/persons/9998", Some(person_payload("Ghost"))).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    // Test IDs: TSVC-005
    #[tokio::test]
    async fn query_routes_apply_filters() {
        let router = fixture_router();

        let search = send(&router, "GET", "/v1/persons/search?job_title=developer", None).await;
        let developers = response_json(search).await;
        assert!(developers["data"]["count"].as_u64().is_some_and(|count| count > 0));

        let blank =
            response_json(send(&router, "GET", "/v1/persons/search?job_title=%20%20", None).await)
                .await;
        assert_eq!(blank["data"]["count"], 0);

        let males =
            response_json(send(&router, "GET", "/v1/persons/filter/sex?sex=male", None).await)
                .await;
        let all_male = males["data"]["persons"]
            .as_array()
            .is_some_and(|persons| persons.iter().all(|person| person["sex"] == "Male"));
        assert!(all_male);

        let negative =
            response_json(send(&router, "GET", "/v1/persons/filter/age/-5", None).await).await;
        assert_eq!(negative["data"]["count"], 0);
    }

    // Test IDs: TSVC-006
    #[tokio::test]
    async fn tool_endpoints_list_and_dispatch() {
        let router = fixture_router();

        let tools = response_json(send(&router, "GET", "/v1/tools", None).await).await;
        assert_eq!(tools["data"].as_array().map(Vec::len), Some(person_store_api::TOOLS.len()));

        let lookup = send(
            &router,
            "POST",
            "/v1/tools/get_person_by_id",
            Some(serde_json::json!({ "id": 1 })),
        )
        .await;
        assert_eq!(lookup.status(), StatusCode::OK);
        assert_eq!(response_json(lookup).await["data"]["person"]["first_name"], "Fons");

        let unknown = send(&router, "POST", "/v1/tools/drop_table", None).await;
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

        let invalid = send(
            &router,
            "POST",
            "/v1/tools/create_person",
            Some(serde_json::json!({ "person": null })),
        )
        .await;
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn dataset_endpoint_reports_bundled_source() {
        let router = fixture_router();
        let value = response_json(send(&router, "GET", "/v1/dataset", None).await).await;
        assert_eq!(value["data"]["source"], person_store_loader::BUNDLED_DATASET_SOURCE);
    }
}
