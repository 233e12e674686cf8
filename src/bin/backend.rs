#![forbid(unsafe_code)]

//! Axum front for the collection pipeline.
//!
//! Every request runs its own pipeline execution; the only things shared
//! between requests are the provider handle and the immutable settings. If a
//! client hangs up, axum drops the handler future and the in-flight collection
//! (including a spawned provider process) goes with it.

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Query, State, rejection::QueryRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::Parser;
use clipscout_tools::{
    config,
    export::{CollectionReport, CsvLayout, csv_bytes},
    logging,
    metadata::VideoRecord,
    pipeline::{Pipeline, PipelineSettings},
    provider::{VideoProvider, build_provider},
};
use serde::Deserialize;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

const FILENAME_FRAGMENT_LIMIT: usize = 64;

#[derive(Parser, Debug)]
#[command(author, version, about = "Serve short-video collections over HTTP.")]
struct Cli {
    #[arg(long = "host", value_name = "ADDR", help = "Listen address (overrides CLIPSCOUT_HOST)")]
    host: Option<IpAddr>,
    #[arg(long = "port", value_name = "PORT", help = "Listen port (overrides CLIPSCOUT_PORT)")]
    port: Option<u16>,
    #[arg(long = "config", value_name = "PATH", help = "Path to the env config file")]
    config: Option<PathBuf>,
    #[arg(short = 'v', long = "verbose", help = "Log pipeline details")]
    verbose: bool,
}

#[derive(Clone)]
struct AppState {
    provider: Arc<dyn VideoProvider>,
    settings: Arc<PipelineSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct CollectParams {
    query: Option<String>,
    window_days: Option<u32>,
    limit: Option<usize>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "status": "error",
            "message": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&logging::default_filter("backend", cli.verbose));

    let settings = match &cli.config {
        Some(path) => config::load_settings_from(path)?,
        None => config::load_settings()?,
    };
    let provider = build_provider(&settings.provider).context("initializing video provider")?;

    let host = match cli.host {
        Some(host) => host,
        None => settings
            .host
            .parse()
            .with_context(|| format!("parsing listen host `{}`", settings.host))?,
    };
    let port = cli.port.unwrap_or(settings.port);

    let state = AppState {
        provider,
        settings: Arc::new(settings.pipeline),
    };
    let app = router(state.clone());

    let addr = SocketAddr::new(host, port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!(%addr, provider = state.provider.name(), "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/run", get(run))
        .route("/csv", get(run_csv))
        .layer(cors)
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        error!(error = %err, "failed to install Ctrl+C handler");
    }
}

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "message": "clipscout API is running. Use /run?query=<term> or /csv?query=<term>",
    }))
}

async fn run(
    State(state): State<AppState>,
    params: Result<Query<CollectParams>, QueryRejection>,
) -> ApiResult<Response> {
    let (query, records) = state.collect(params).await?;
    info!(query = %query, count = records.len(), "served JSON collection");
    Ok(Json(CollectionReport::success(&records)).into_response())
}

async fn run_csv(
    State(state): State<AppState>,
    params: Result<Query<CollectParams>, QueryRejection>,
) -> ApiResult<Response> {
    let (query, records) = state.collect(params).await?;
    let body = csv_bytes(&records, CsvLayout::Api, false).map_err(|err| {
        error!(query = %query, stage = "export", error = %err, "CSV export failed");
        ApiError::internal(format!("CSV export failed: {err}"))
    })?;

    let disposition = format!(
        "attachment; filename=\"result_{}.csv\"",
        filename_fragment(&query)
    );
    let disposition = HeaderValue::from_str(&disposition)
        .map_err(|err| ApiError::internal(format!("invalid attachment name: {err}")))?;

    info!(query = %query, count = records.len(), "served CSV collection");
    Ok((
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/csv; charset=utf-8"),
            ),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

impl AppState {
    /// Validates the request and runs a fresh pipeline execution for it.
    async fn collect(
        &self,
        params: Result<Query<CollectParams>, QueryRejection>,
    ) -> ApiResult<(String, Vec<VideoRecord>)> {
        let Query(params) =
            params.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;

        let query = params
            .query
            .as_deref()
            .map(str::trim)
            .filter(|query| !query.is_empty())
            .ok_or_else(|| ApiError::bad_request("query parameter is required"))?
            .to_owned();

        let mut settings = (*self.settings).clone();
        if let Some(window_days) = params.window_days {
            settings.window_days = window_days;
        }
        // `limit` can only narrow the configured MAX_RESULTS, never widen it.
        if let Some(limit) = params.limit {
            let ceiling = self.settings.max_results;
            if limit == 0 || limit > ceiling {
                let message = format!("limit must be between 1 and {ceiling}");
                return Err(ApiError::bad_request(message));
            }
            settings.max_results = limit;
        }

        let pipeline = Pipeline::new(self.provider.clone(), settings);
        let records = pipeline.collect(&query).await;
        Ok((query, records))
    }
}

/// Reduces a query to something safe inside a header-quoted file name.
fn filename_fragment(query: &str) -> String {
    let fragment: String = query
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(FILENAME_FRAGMENT_LIMIT)
        .collect();
    if fragment.chars().any(|c| c.is_ascii_alphanumeric()) {
        fragment
    } else {
        "query".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::to_bytes;
    use chrono::Utc;
    use clipscout_tools::provider::{FixtureProvider, ProviderError};
    use serde_json::{Value, json};

    struct FailingProvider;

    #[async_trait]
    impl VideoProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<Value>, ProviderError> {
            Err(ProviderError::Decode("rate limited".into()))
        }
    }

    fn entry(id: &str, views: u64, age_days: i64) -> Value {
        json!({
            "id": id,
            "desc": format!("Тушь, тест {id} #тушь"),
            "createTime": Utc::now().timestamp() - age_days * 86_400 - 60,
            "stats": { "playCount": views, "diggCount": 1 },
            "author": { "uniqueId": "makeup" }
        })
    }

    fn state_with(provider: Arc<dyn VideoProvider>) -> AppState {
        AppState {
            provider,
            settings: Arc::new(PipelineSettings::default()),
        }
    }

    fn fixture_state() -> AppState {
        state_with(Arc::new(FixtureProvider::new(vec![
            entry("a", 10, 1),
            entry("b", 30, 2),
            entry("old", 99, 12),
        ])))
    }

    fn params(query: Option<&str>) -> Result<Query<CollectParams>, QueryRejection> {
        Ok(Query(CollectParams {
            query: query.map(str::to_owned),
            ..CollectParams::default()
        }))
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn run_returns_ranked_fresh_records() {
        let response = super::run(State(fixture_state()), params(Some("тушь")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["status"], "success");
        assert_eq!(body["count"], 2);
        assert_eq!(body["data"][0]["id"], "b");
        assert_eq!(body["data"][0]["hashtags"], json!(["#тушь"]));
        assert_eq!(body["data"][1]["id"], "a");
    }

    #[tokio::test]
    async fn run_requires_query() {
        for query in [None, Some("   ")] {
            let err = super::run(State(fixture_state()), params(query))
                .await
                .unwrap_err();
            assert_eq!(err.status, StatusCode::BAD_REQUEST);

            let body = body_json(err.into_response()).await;
            assert_eq!(body["status"], "error");
            assert_eq!(body["message"], "query parameter is required");
        }
    }

    #[tokio::test]
    async fn run_rejects_limit_outside_configured_range() {
        let ceiling = PipelineSettings::default().max_results;
        for limit in [0, ceiling + 1, 1_000_000_000] {
            let request = Ok(Query(CollectParams {
                query: Some("тушь".into()),
                limit: Some(limit),
                ..CollectParams::default()
            }));
            let err = super::run(State(fixture_state()), request)
                .await
                .unwrap_err();
            assert_eq!(err.status, StatusCode::BAD_REQUEST);
            assert_eq!(err.message, format!("limit must be between 1 and {ceiling}"));
        }
    }

    #[tokio::test]
    async fn run_accepts_limit_up_to_configured_maximum() {
        let request = Ok(Query(CollectParams {
            query: Some("тушь".into()),
            limit: Some(1),
            ..CollectParams::default()
        }));
        let response = super::run(State(fixture_state()), request).await.unwrap();
        let body = body_json(response).await;
        assert_eq!(body["count"], 1);
    }

    #[tokio::test]
    async fn window_days_parameter_widens_the_window() {
        let request = Ok(Query(CollectParams {
            query: Some("тушь".into()),
            window_days: Some(30),
            ..CollectParams::default()
        }));
        let response = super::run(State(fixture_state()), request).await.unwrap();
        let body = body_json(response).await;
        assert_eq!(body["count"], 3);
        assert_eq!(body["data"][0]["id"], "old");
    }

    #[tokio::test]
    async fn provider_failure_is_an_empty_success() {
        let response = super::run(State(state_with(Arc::new(FailingProvider))), params(Some("q")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["count"], 0);
        assert_eq!(body["data"], json!([]));
    }

    #[tokio::test]
    async fn csv_is_an_attachment_with_author_column() {
        let request = params(Some("тушь для ресниц"));
        let response = super::run_csv(State(fixture_state()), request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/csv; charset=utf-8"
        );
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"result_query.csv\""
        );

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "url,description,views,likes,date,hashtags,author");
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with(concat!(
            "https://www.tiktok.com/@makeup/video/b,",
            "Тушь  тест b #тушь,30,1,"
        )));
        assert!(lines[1].ends_with(",#тушь,makeup"));
    }

    #[tokio::test]
    async fn csv_errors_are_json() {
        let err = super::run_csv(State(fixture_state()), params(None))
            .await
            .unwrap_err();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["status"], "error");
    }

    #[tokio::test]
    async fn root_reports_ok() {
        let Json(body) = super::root().await;
        assert_eq!(body["status"], "ok");
    }

    #[test]
    fn router_builds_with_state() {
        let _ = router(fixture_state());
    }

    #[test]
    fn filename_fragment_keeps_ascii_only() {
        assert_eq!(filename_fragment("mascara review"), "mascara_review");
        assert_eq!(filename_fragment("#lashes\"; x"), "_lashes___x");
        assert_eq!(filename_fragment("тушь"), "query");
        assert_eq!(filename_fragment(&"a".repeat(200)).len(), FILENAME_FRAGMENT_LIMIT);
    }
}
