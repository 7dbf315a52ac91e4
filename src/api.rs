//! HTTP surface: one route to post a transaction, one to read a statement.
//!
//! Store calls are blocking, so every handler hands them to the blocking pool
//! and awaits the result; a row-lock wait never parks an async worker.

use std::{sync::Arc, time::Instant};

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tokio::task::JoinError;

use cashline_core::{parse_account_id, AccountStore, BalanceSnapshot, Statement, TransactionRequest, ValidationError};

use crate::{error::LedgerError, processor::TransactionProcessor, statement::StatementReader};

#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<TransactionProcessor>,
    pub statements: Arc<StatementReader>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self {
            processor: Arc::new(TransactionProcessor::new(store.clone())),
            statements: Arc::new(StatementReader::new(store)),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/accounts/:id/transactions", post(post_transaction))
        .route("/accounts/:id/statement", get(get_statement))
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    code: &'static str,
    error: String,
}

#[derive(Debug)]
pub enum ApiError {
    Ledger(LedgerError),
    Internal(String),
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        ApiError::Ledger(e)
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        ApiError::Ledger(e.into())
    }
}

impl From<JoinError> for ApiError {
    fn from(e: JoinError) -> Self {
        ApiError::Internal(format!("request task failed: {}", e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, error) = match self {
            ApiError::Ledger(LedgerError::Validation(e)) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_request", e.to_string()),
            ApiError::Ledger(e @ LedgerError::NotFound(_)) => (StatusCode::NOT_FOUND, "not_found", e.to_string()),
            ApiError::Ledger(e @ LedgerError::LimitExceeded) => (StatusCode::UNPROCESSABLE_ENTITY, "limit_exceeded", e.to_string()),
            ApiError::Ledger(e @ LedgerError::Store(_)) => {
                tracing::error!(error = %e, "Store failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e.to_string())
            }
            ApiError::Internal(e) => {
                tracing::error!(error = %e, "Internal failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e)
            }
        };

        (status, Json(ErrorBody { success: false, code, error })).into_response()
    }
}

fn outcome_label<T>(result: &Result<T, LedgerError>, success: &'static str) -> &'static str {
    match result {
        Ok(_) => success,
        Err(LedgerError::Validation(_)) => "invalid",
        Err(LedgerError::NotFound(_)) => "not_found",
        Err(LedgerError::LimitExceeded) => "limit_exceeded",
        Err(LedgerError::Store(_)) => "error",
    }
}

async fn post_transaction(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    payload: Result<Json<TransactionRequest>, JsonRejection>,
) -> Result<Json<BalanceSnapshot>, ApiError> {
    let started = Instant::now();
    // the path id is checked before the body
    let request = parse_account_id(&account_id).and_then(|_| match payload {
        Ok(Json(request)) => Ok(request),
        Err(rejection) => {
            tracing::debug!(%rejection, "Transaction payload rejected");
            Err(ValidationError::InvalidPayload)
        }
    });
    let request = request.map_err(|e| {
        metrics::increment_counter!("cashline_transactions_total", "outcome" => "invalid");
        e
    })?;

    let processor = state.processor.clone();
    let result = tokio::task::spawn_blocking(move || processor.process(&account_id, &request)).await?;

    metrics::increment_counter!("cashline_transactions_total", "outcome" => outcome_label(&result, "committed"));
    metrics::histogram!(
        "cashline_request_duration_seconds",
        started.elapsed().as_secs_f64(),
        "route" => "transactions"
    );
    Ok(Json(result?))
}

async fn get_statement(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<Json<Statement>, ApiError> {
    let started = Instant::now();
    let result = match parse_account_id(&account_id) {
        Ok(account_id) => {
            let reader = state.statements.clone();
            tokio::task::spawn_blocking(move || reader.get_statement(account_id)).await?
        }
        Err(e) => Err(e.into()),
    };

    metrics::increment_counter!("cashline_statements_total", "outcome" => outcome_label(&result, "ok"));
    metrics::histogram!(
        "cashline_request_duration_seconds",
        started.elapsed().as_secs_f64(),
        "route" => "statement"
    );
    Ok(Json(result?))
}

async fn health() -> &'static str {
    "ok"
}

async fn render_metrics(State(state): State<AppState>) -> Response {
    match state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
