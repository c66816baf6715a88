//! Axum REST API handlers.
//!
//! Validation of blood types, dates and pagination happens here, before any
//! engine call; every engine failure renders through
//! [`EngineError::into_response`]. Hospital identity arrives in the
//! `x-hospital-id` header (session handling lives outside this service).

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::blood::BloodType;
use crate::config::Config;
use crate::errors::{EngineError, Result};
use crate::models::{now_ts, Page, RequestStatus, UnitStatus, UrgencyLevel};
use crate::{donors, inventory, matching, network, requests, sweeper};

#[derive(Clone)]
pub struct ApiState {
    pub pool: SqlitePool,
    pub config: Config,
}

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ─────────────────────────────────────────────────────────
// Boundary helpers
// ─────────────────────────────────────────────────────────

fn hospital_id(headers: &HeaderMap) -> Result<String> {
    headers
        .get("x-hospital-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(EngineError::MissingActor)
}

/// Accept either an RFC 3339 datetime or a plain `YYYY-MM-DD` date.
fn parse_date(raw: &str) -> Result<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc).timestamp());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(dt.and_utc().timestamp());
        }
    }
    Err(EngineError::InvalidDate(raw.to_string()))
}

// ─────────────────────────────────────────────────────────
// Public intake
// ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateDonorBody {
    pub name: String,
    pub blood_type: String,
    pub preferred_location: Option<String>,
}

/// `POST /api/public/donors`
pub async fn create_donor(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<CreateDonorBody>,
) -> Result<impl IntoResponse> {
    let blood_type = BloodType::parse(&body.blood_type)?;
    let donor = donors::register_donor(
        &state.pool,
        &body.name,
        blood_type,
        body.preferred_location.as_deref(),
        now_ts(),
    )
    .await?;
    Ok(Json(donor))
}

#[derive(Deserialize)]
pub struct CreateDonationBody {
    pub donor_id: i64,
    pub location: Option<String>,
}

/// `POST /api/public/donations`
pub async fn create_donation(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<CreateDonationBody>,
) -> Result<impl IntoResponse> {
    let donation =
        inventory::create_donation(&state.pool, body.donor_id, body.location.as_deref(), now_ts())
            .await?;
    Ok(Json(donation))
}

#[derive(Deserialize)]
pub struct CreateBloodRequestBody {
    pub requester: String,
    pub blood_type: String,
    pub location: Option<String>,
    #[serde(default)]
    pub urgent: bool,
}

/// `POST /api/public/blood-requests`
pub async fn create_blood_request(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<CreateBloodRequestBody>,
) -> Result<impl IntoResponse> {
    let blood_type = BloodType::parse(&body.blood_type)?;
    let request = requests::create_request(
        &state.pool,
        &body.requester,
        blood_type,
        body.location.as_deref(),
        body.urgent,
        now_ts(),
    )
    .await?;
    Ok(Json(request))
}

// ─────────────────────────────────────────────────────────
// Matching
// ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchingQuery {
    pub blood_type: Option<String>,
    pub search: Option<String>,
    pub location: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// `GET /api/hospital/donors/matching`
pub async fn matching_donors(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<MatchingQuery>,
) -> Result<impl IntoResponse> {
    let raw = query
        .blood_type
        .ok_or_else(|| EngineError::InvalidBloodType("bloodType is required".to_string()))?;
    let requested = BloodType::parse(&raw)?;
    let result = matching::match_donors(
        &state.pool,
        requested,
        query.location.as_deref(),
        query.search.as_deref(),
        Page::new(query.page, query.limit),
    )
    .await?;
    Ok(Json(result))
}

#[derive(Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

/// `GET /api/hospital/blood-requests/:id/compatible-donors`
pub async fn compatible_donors(
    State(state): State<Arc<ApiState>>,
    Path(request_id): Path<i64>,
    Query(query): Query<LimitQuery>,
) -> Result<impl IntoResponse> {
    let result =
        matching::compatible_donors_for_request(&state.pool, request_id, query.limit).await?;
    Ok(Json(result))
}

/// `GET /api/hospital/matching/overview`
pub async fn matching_overview(State(state): State<Arc<ApiState>>) -> Result<impl IntoResponse> {
    Ok(Json(matching::overview(&state.pool).await?))
}

/// `GET /api/hospital/matching/summary`
pub async fn matching_summary(State(state): State<Arc<ApiState>>) -> Result<impl IntoResponse> {
    Ok(Json(matching::summary(&state.pool).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonorListQuery {
    pub blood_type: Option<String>,
    pub search: Option<String>,
    pub preferred_location: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// `GET /api/hospital/donors`
pub async fn list_donors(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<DonorListQuery>,
) -> Result<impl IntoResponse> {
    let filter = donors::DonorFilter {
        blood_type: query.blood_type.as_deref().map(BloodType::parse).transpose()?,
        search: query.search,
        preferred_location: query.preferred_location,
    };
    let page = Page::new(query.page, query.limit);
    let (rows, total) = donors::list_donors(&state.pool, &filter, page).await?;
    Ok(Json(serde_json::json!({
        "total": total,
        "page": page.page,
        "limit": page.limit,
        "donors": rows,
    })))
}

// ─────────────────────────────────────────────────────────
// Inventory
// ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryQuery {
    pub blood_type: Option<String>,
    pub status: Option<String>,
    pub expiring_within_days: Option<i64>,
}

/// `GET /api/hospital/inventory`
pub async fn list_inventory(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<InventoryQuery>,
) -> Result<impl IntoResponse> {
    let status = query
        .status
        .as_deref()
        .map(|raw| {
            UnitStatus::parse(raw).ok_or_else(|| {
                EngineError::InvalidStateTransition(format!("unknown unit status {raw:?}"))
            })
        })
        .transpose()?;
    let filter = inventory::UnitFilter {
        blood_type: query.blood_type.as_deref().map(BloodType::parse).transpose()?,
        status,
        expiring_within_days: query.expiring_within_days,
    };
    let units = inventory::list_units(&state.pool, &filter, now_ts()).await?;
    Ok(Json(serde_json::json!({
        "count": units.len(),
        "units": units,
    })))
}

/// `GET /api/hospital/inventory/summary`
pub async fn inventory_summary(State(state): State<Arc<ApiState>>) -> Result<impl IntoResponse> {
    let by_type = inventory::availability_by_type(&state.pool, now_ts()).await?;
    let available: i64 = by_type.iter().map(|t| t.available).sum();
    let expiring_soon: i64 = by_type.iter().map(|t| t.expiring_soon).sum();
    let total: i64 = by_type.iter().map(|t| t.total).sum();
    Ok(Json(serde_json::json!({
        "available": available,
        "expiring_soon": expiring_soon,
        "total": total,
        "by_type": by_type,
    })))
}

/// `GET /api/hospital/inventory/alerts`
pub async fn inventory_alerts(State(state): State<Arc<ApiState>>) -> Result<impl IntoResponse> {
    let now = now_ts();
    let low_stock =
        inventory::low_stock(&state.pool, state.config.low_stock_threshold, now).await?;
    let expiring = inventory::list_units(
        &state.pool,
        &inventory::UnitFilter {
            expiring_within_days: Some(7),
            ..Default::default()
        },
        now,
    )
    .await?;
    Ok(Json(serde_json::json!({
        "low_stock_threshold": state.config.low_stock_threshold,
        "low_stock": low_stock,
        "expiring_soon": expiring,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitStatusBody {
    pub status: String,
    pub used_date: Option<String>,
}

/// `PUT /api/hospital/inventory/unit/:id`
pub async fn update_unit_status(
    State(state): State<Arc<ApiState>>,
    Path(unit_id): Path<i64>,
    Json(body): Json<UnitStatusBody>,
) -> Result<impl IntoResponse> {
    let target = UnitStatus::parse(&body.status).ok_or_else(|| {
        EngineError::InvalidStateTransition(format!("unknown target status {:?}", body.status))
    })?;
    // An explicit usedDate overrides the clock for the used_at stamp.
    let at = match body.used_date.as_deref() {
        Some(raw) => parse_date(raw)?,
        None => now_ts(),
    };
    let unit = match target {
        UnitStatus::Reserved => inventory::reserve(&state.pool, unit_id, at).await?,
        UnitStatus::Available => inventory::release(&state.pool, unit_id, at).await?,
        UnitStatus::Used => inventory::mark_used(&state.pool, unit_id, at).await?,
        UnitStatus::Expired => inventory::mark_expired(&state.pool, unit_id, at).await?,
    };
    Ok(Json(unit))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertBody {
    pub expiry_date: String,
}

/// `POST /api/hospital/inventory/convert/:donationId`
pub async fn convert_donation(
    State(state): State<Arc<ApiState>>,
    Path(donation_id): Path<i64>,
    Json(body): Json<ConvertBody>,
) -> Result<impl IntoResponse> {
    let expiry_date = parse_date(&body.expiry_date)?;
    let unit = inventory::collect(&state.pool, donation_id, expiry_date, now_ts()).await?;
    Ok(Json(unit))
}

/// `POST /api/hospital/inventory/mark-expired` — manual sweep trigger.
pub async fn mark_expired(State(state): State<Arc<ApiState>>) -> Result<impl IntoResponse> {
    let expired = sweeper::sweep_once(&state.pool, now_ts()).await?;
    Ok(Json(serde_json::json!({ "expired": expired })))
}

/// `GET /api/hospital/donations/:id`
pub async fn get_donation(
    State(state): State<Arc<ApiState>>,
    Path(donation_id): Path<i64>,
) -> Result<impl IntoResponse> {
    let donation = inventory::get_donation(&state.pool, donation_id).await?;
    Ok(Json(donation))
}

#[derive(Deserialize)]
pub struct ReviewBody {
    pub action: String,
}

/// `PUT /api/hospital/donations/:id/review`
pub async fn review_donation(
    State(state): State<Arc<ApiState>>,
    Path(donation_id): Path<i64>,
    Json(body): Json<ReviewBody>,
) -> Result<impl IntoResponse> {
    let approve = match body.action.as_str() {
        "approve" => true,
        "decline" => false,
        other => {
            return Err(EngineError::InvalidStateTransition(format!(
                "unknown review action {other:?}"
            )))
        }
    };
    let donation = inventory::review_donation(&state.pool, donation_id, approve).await?;
    Ok(Json(donation))
}

// ─────────────────────────────────────────────────────────
// Blood request registry
// ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct RequestStatusBody {
    pub status: String,
    pub hospital_notes: Option<String>,
}

/// `PUT /api/hospital/blood-requests/:id/status`
pub async fn update_request_status(
    State(state): State<Arc<ApiState>>,
    Path(request_id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<RequestStatusBody>,
) -> Result<impl IntoResponse> {
    let actor = hospital_id(&headers)?;
    let target = RequestStatus::parse(&body.status).ok_or_else(|| {
        EngineError::InvalidStateTransition(format!("unknown target status {:?}", body.status))
    })?;
    let row = requests::transition(
        &state.pool,
        request_id,
        target,
        &actor,
        body.hospital_notes.as_deref(),
        now_ts(),
    )
    .await?;
    Ok(Json(row))
}

/// `GET /api/hospital/blood-requests/:id` — request plus its audit trail.
pub async fn get_blood_request(
    State(state): State<Arc<ApiState>>,
    Path(request_id): Path<i64>,
) -> Result<impl IntoResponse> {
    let request = requests::get_request(&state.pool, request_id).await?;
    let notes = requests::notes(&state.pool, request_id).await?;
    Ok(Json(serde_json::json!({
        "request": request,
        "notes": notes,
    })))
}

// ─────────────────────────────────────────────────────────
// Hospital network
// ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateHospitalRequestBody {
    pub patient_ref: Option<String>,
    pub blood_type: String,
    pub units_needed: i64,
    #[serde(default = "default_urgency")]
    pub urgency_level: UrgencyLevel,
}

fn default_urgency() -> UrgencyLevel {
    UrgencyLevel::Routine
}

/// `POST /api/hospital/requests`
pub async fn create_hospital_request(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(body): Json<CreateHospitalRequestBody>,
) -> Result<impl IntoResponse> {
    let hospital = hospital_id(&headers)?;
    let blood_type = BloodType::parse(&body.blood_type)?;
    let row = network::create_request(
        &state.pool,
        &hospital,
        body.patient_ref.as_deref(),
        blood_type,
        body.units_needed,
        body.urgency_level,
        state.config.request_ttl_secs(),
        now_ts(),
    )
    .await?;
    Ok(Json(row))
}

/// `GET /api/hospital/requests`
pub async fn list_hospital_requests(
    State(state): State<Arc<ApiState>>,
) -> Result<impl IntoResponse> {
    let rows = network::list_requests(&state.pool, network::RequestScope::All, now_ts()).await?;
    Ok(Json(serde_json::json!({ "count": rows.len(), "requests": rows })))
}

/// `GET /api/hospital/requests/available`
pub async fn available_hospital_requests(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    let hospital = hospital_id(&headers)?;
    let rows = network::list_requests(
        &state.pool,
        network::RequestScope::Available(hospital),
        now_ts(),
    )
    .await?;
    Ok(Json(serde_json::json!({ "count": rows.len(), "requests": rows })))
}

/// `GET /api/hospital/requests/mine`
pub async fn my_hospital_requests(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    let hospital = hospital_id(&headers)?;
    let rows =
        network::list_requests(&state.pool, network::RequestScope::Mine(hospital), now_ts())
            .await?;
    Ok(Json(serde_json::json!({ "count": rows.len(), "requests": rows })))
}

/// `GET /api/hospital/requests/:id` — request plus all responses.
pub async fn get_hospital_request(
    State(state): State<Arc<ApiState>>,
    Path(request_id): Path<i64>,
) -> Result<impl IntoResponse> {
    let request = network::get_request(&state.pool, request_id, now_ts()).await?;
    let responses = network::responses(&state.pool, request_id).await?;
    Ok(Json(serde_json::json!({
        "request": request,
        "responses": responses,
    })))
}

#[derive(Deserialize)]
pub struct RespondBody {
    pub action: String,
    pub units_offered: Option<i64>,
    pub response_notes: Option<String>,
    pub estimated_delivery: Option<String>,
}

/// `POST /api/hospital/requests/:id/respond`
pub async fn respond_to_request(
    State(state): State<Arc<ApiState>>,
    Path(request_id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<RespondBody>,
) -> Result<impl IntoResponse> {
    let hospital = hospital_id(&headers)?;
    let action = match body.action.as_str() {
        "offer" => network::ResponseAction::Offer {
            units: body.units_offered.ok_or_else(|| {
                EngineError::InvalidOffer("units_offered is required for an offer".to_string())
            })?,
        },
        "decline" => network::ResponseAction::Decline,
        other => {
            return Err(EngineError::InvalidOffer(format!(
                "unknown response action {other:?}"
            )))
        }
    };
    let estimated_delivery = body
        .estimated_delivery
        .as_deref()
        .map(parse_date)
        .transpose()?;

    let (request, response) = network::respond(
        &state.pool,
        request_id,
        &hospital,
        action,
        body.response_notes.as_deref(),
        estimated_delivery,
        now_ts(),
    )
    .await?;
    Ok(Json(serde_json::json!({
        "request": request,
        "response": response,
    })))
}

/// `POST /api/hospital/requests/:id/cancel`
pub async fn cancel_hospital_request(
    State(state): State<Arc<ApiState>>,
    Path(request_id): Path<i64>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    let hospital = hospital_id(&headers)?;
    let row = network::cancel_request(&state.pool, request_id, &hospital, now_ts()).await?;
    Ok(Json(row))
}

/// `PUT /api/hospital/responses/:id/delivered`
pub async fn confirm_delivery(
    State(state): State<Arc<ApiState>>,
    Path(response_id): Path<i64>,
) -> Result<impl IntoResponse> {
    let row = network::mark_delivered(&state.pool, response_id).await?;
    Ok(Json(row))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_date_accepts_rfc3339_and_plain_dates() {
        let ts = parse_date("2026-09-15T10:30:00Z").unwrap();
        assert_eq!(ts, 1789468200);
        let ts = parse_date("2026-09-15").unwrap();
        assert_eq!(ts, 1789430400);
        assert!(matches!(
            parse_date("next tuesday"),
            Err(EngineError::InvalidDate(_))
        ));
    }

    #[test]
    fn hospital_header_is_required_and_nonempty() {
        let mut headers = HeaderMap::new();
        assert!(matches!(
            hospital_id(&headers),
            Err(EngineError::MissingActor)
        ));
        headers.insert("x-hospital-id", "".parse().unwrap());
        assert!(matches!(
            hospital_id(&headers),
            Err(EngineError::MissingActor)
        ));
        headers.insert("x-hospital-id", "st-marys".parse().unwrap());
        assert_eq!(hospital_id(&headers).unwrap(), "st-marys");
    }
}
