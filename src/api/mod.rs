use axum::{
    Router,
    extract::{Json, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::core::{
    AllowanceRules, PlanSummary, Pounds, RulesTable, TaxYearPlan, YearRecord,
    allocate_carry_forward, resolve_tapered_allowance, tax_year_label,
};

#[derive(Clone)]
struct AppState {
    rules: Arc<RulesTable>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
enum ApiError {
    #[error("taxYear is required")]
    MissingTaxYear,
    #[error("years is empty and no currentYear was given")]
    MissingCurrentYear,
    #[error("tax year {0} appears more than once")]
    DuplicateYear(i32),
    #[error("years must be sorted ascending by id: {next} follows {previous}")]
    Unsorted { previous: i32, next: i32 },
}

impl ApiError {
    fn status(&self) -> StatusCode {
        StatusCode::BAD_REQUEST
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(error = %self, "rejected request");
        error_response(self.status(), &self.to_string())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct TaperPayload {
    #[serde(deserialize_with = "crate::core::amount_text")]
    threshold_income: String,
    #[serde(deserialize_with = "crate::core::amount_text")]
    adjusted_income: String,
    tax_year: Option<i32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TaperResponse {
    tax_year: i32,
    tax_year_label: String,
    tapered_allowance: u64,
    rules: AllowanceRules,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YearInput {
    id: i32,
    #[serde(default, deserialize_with = "crate::core::amount_text")]
    threshold_income: String,
    #[serde(default, deserialize_with = "crate::core::amount_text")]
    adjusted_income: String,
    #[serde(default, deserialize_with = "crate::core::amount_text")]
    contribution: String,
}

/// A record posted to `/api/allocate`. A missing `taperedAllowance` means the
/// year's standard allowance, not zero.
#[derive(Debug, Deserialize)]
struct AllocateRecord {
    #[serde(default, rename = "taperedAllowance")]
    tapered_allowance: Option<Pounds>,
    #[serde(flatten)]
    record: YearRecord,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PlanPayload {
    years: Vec<YearInput>,
    current_year: Option<i32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlanResponse {
    years: Vec<YearRecord>,
    summary: Option<PlanSummary>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn router(rules: Arc<RulesTable>) -> Router {
    Router::new()
        .route("/api/rules", get(rules_handler))
        .route("/api/taper", get(taper_get_handler).post(taper_post_handler))
        .route("/api/allocate", post(allocate_handler))
        .route("/api/plan", post(plan_handler))
        .fallback(not_found_handler)
        .with_state(AppState { rules })
}

pub async fn run_http_server(config: ServerConfig) -> std::io::Result<()> {
    let addr = config.bind_addr;
    let app = router(Arc::new(config.rules));

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "annual allowance API listening");
    info!("Local access: http://127.0.0.1:{}/api/rules", addr.port());

    axum::serve(listener, app).await
}

async fn rules_handler(State(state): State<AppState>) -> Response {
    json_response(StatusCode::OK, state.rules.as_ref())
}

async fn taper_get_handler(
    State(state): State<AppState>,
    Query(payload): Query<TaperPayload>,
) -> Response {
    taper_handler_impl(&state.rules, payload)
}

async fn taper_post_handler(
    State(state): State<AppState>,
    Json(payload): Json<TaperPayload>,
) -> Response {
    taper_handler_impl(&state.rules, payload)
}

fn taper_handler_impl(rules: &RulesTable, payload: TaperPayload) -> Response {
    match taper_response(rules, payload) {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(err) => err.into_response(),
    }
}

async fn allocate_handler(
    State(state): State<AppState>,
    Json(years): Json<Vec<AllocateRecord>>,
) -> Response {
    match allocate_response(&state.rules, years) {
        Ok(years) => json_response(StatusCode::OK, years),
        Err(err) => err.into_response(),
    }
}

async fn plan_handler(State(state): State<AppState>, Json(payload): Json<PlanPayload>) -> Response {
    match plan_response(&state.rules, payload) {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(err) => err.into_response(),
    }
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

fn taper_response(rules: &RulesTable, payload: TaperPayload) -> Result<TaperResponse, ApiError> {
    let tax_year = payload.tax_year.ok_or(ApiError::MissingTaxYear)?;
    Ok(TaperResponse {
        tax_year,
        tax_year_label: tax_year_label(tax_year),
        tapered_allowance: resolve_tapered_allowance(
            rules,
            &payload.threshold_income,
            &payload.adjusted_income,
            tax_year,
        ),
        rules: *rules.rules_for(tax_year),
    })
}

fn allocate_response(
    rules: &RulesTable,
    years: Vec<AllocateRecord>,
) -> Result<Vec<YearRecord>, ApiError> {
    let years: Vec<YearRecord> = years
        .into_iter()
        .map(|AllocateRecord { tapered_allowance, mut record }| {
            record.tapered_allowance = tapered_allowance
                .unwrap_or_else(|| rules.rules_for(record.id).standard_allowance);
            record
        })
        .collect();
    for pair in years.windows(2) {
        let (previous, next) = (pair[0].id, pair[1].id);
        if next == previous {
            return Err(ApiError::DuplicateYear(next));
        }
        if next < previous {
            return Err(ApiError::Unsorted { previous, next });
        }
    }
    Ok(allocate_carry_forward(years))
}

fn plan_response(rules: &RulesTable, payload: PlanPayload) -> Result<PlanResponse, ApiError> {
    let mut seen = BTreeSet::new();
    for input in &payload.years {
        if !seen.insert(input.id) {
            return Err(ApiError::DuplicateYear(input.id));
        }
    }
    let current_year = match (payload.years.is_empty(), payload.current_year) {
        (true, None) => return Err(ApiError::MissingCurrentYear),
        (_, Some(year)) => year,
        (false, None) => rules.latest_year(),
    };

    let records = payload
        .years
        .into_iter()
        .map(|input| {
            let mut record = YearRecord::new(rules.rules_for(input.id), input.id);
            record.threshold_income = input.threshold_income;
            record.adjusted_income = input.adjusted_income;
            record.contribution = input.contribution;
            record
        })
        .collect();

    let plan = TaxYearPlan::from_records(rules, records, current_year);
    let summary = plan.summary();
    Ok(PlanResponse {
        years: plan.into_years(),
        summary,
    })
}
