//! Entity row types and lifecycle status enums.
//!
//! Statuses persist as their canonical text form (`as_str`) and are parsed
//! strictly on the way back out; a row holding an unrecognised status is a
//! data corruption bug, not a value to be guessed at.

use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, Result};

/// Current unix timestamp (seconds, UTC).
pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

// ─────────────────────────────────────────────────────────
// Lifecycle status enums
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DonationStatus {
    Pending,
    Approved,
    Declined,
    Collected,
}

impl DonationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Approved => "Approved",
            Self::Declined => "Declined",
            Self::Collected => "Collected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(Self::Pending),
            "Approved" => Some(Self::Approved),
            "Declined" => Some(Self::Declined),
            "Collected" => Some(Self::Collected),
            _ => None,
        }
    }
}

/// Physical unit lifecycle. Legal edges:
/// `Available → Reserved → Used`, `Available → Used`, `Available → Expired`,
/// `Reserved → Available`. `Used` and `Expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitStatus {
    Available,
    Reserved,
    Used,
    Expired,
}

impl UnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "Available",
            Self::Reserved => "Reserved",
            Self::Used => "Used",
            Self::Expired => "Expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Available" => Some(Self::Available),
            "Reserved" => Some(Self::Reserved),
            "Used" => Some(Self::Used),
            "Expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// States a unit may be in immediately before moving to `self`.
    pub fn legal_predecessors(&self) -> &'static [UnitStatus] {
        match self {
            Self::Reserved => &[Self::Available],
            Self::Available => &[Self::Reserved],
            Self::Used => &[Self::Available, Self::Reserved],
            Self::Expired => &[Self::Available],
        }
    }
}

/// Patient-facing blood request lifecycle:
/// `pending → approved → fulfilled`, `pending → declined`, `pending → cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Fulfilled,
    Declined,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Fulfilled => "fulfilled",
            Self::Declined => "declined",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "fulfilled" => Some(Self::Fulfilled),
            "declined" => Some(Self::Declined),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn legal_predecessors(&self) -> &'static [RequestStatus] {
        match self {
            Self::Pending => &[],
            Self::Approved | Self::Declined | Self::Cancelled => &[Self::Pending],
            Self::Fulfilled => &[Self::Approved],
        }
    }
}

/// Inter-hospital request lifecycle. `fulfilled`, `cancelled` and `expired`
/// are terminal; `expired` is applied lazily on read once the TTL passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HospitalRequestStatus {
    Pending,
    PartiallyFulfilled,
    Fulfilled,
    Cancelled,
    Expired,
}

impl HospitalRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::PartiallyFulfilled => "partially_fulfilled",
            Self::Fulfilled => "fulfilled",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "partially_fulfilled" => Some(Self::PartiallyFulfilled),
            "fulfilled" => Some(Self::Fulfilled),
            "cancelled" => Some(Self::Cancelled),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// Whether the request still accepts responses.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::PartiallyFulfilled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Offered,
    Declined,
    Delivered,
}

impl ResponseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offered => "offered",
            Self::Declined => "declined",
            Self::Delivered => "delivered",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyLevel {
    Routine,
    Urgent,
    Critical,
}

impl UrgencyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Routine => "routine",
            Self::Urgent => "urgent",
            Self::Critical => "critical",
        }
    }
}

// ─────────────────────────────────────────────────────────
// Row types (as stored in / read from the database)
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DonorRow {
    pub id: i64,
    pub name: String,
    pub blood_type: String,
    pub preferred_location: Option<String>,
    pub registered_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DonationRow {
    pub id: i64,
    pub donor_id: i64,
    pub blood_type: String,
    pub location: Option<String>,
    pub status: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BloodUnitRow {
    pub id: i64,
    pub donation_id: Option<i64>,
    pub blood_type: String,
    pub status: String,
    pub collected_at: i64,
    pub expiry_date: i64,
    pub used_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BloodRequestRow {
    pub id: i64,
    pub requester: String,
    pub blood_type: String,
    pub location: Option<String>,
    pub urgent: bool,
    pub status: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RequestNoteRow {
    pub id: i64,
    pub request_id: i64,
    pub actor: String,
    pub transition: String,
    pub notes: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct HospitalRequestRow {
    pub id: i64,
    pub requesting_hospital: String,
    pub patient_ref: Option<String>,
    pub blood_type: String,
    pub units_needed: i64,
    pub urgency_level: String,
    pub status: String,
    pub created_at: i64,
    pub expires_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct HospitalResponseRow {
    pub id: i64,
    pub hospital_request_id: i64,
    pub responding_hospital: String,
    pub units_offered: i64,
    pub status: String,
    pub estimated_delivery: Option<i64>,
    pub response_notes: Option<String>,
    pub created_at: i64,
}

// ─────────────────────────────────────────────────────────
// Pagination
// ─────────────────────────────────────────────────────────

pub const DEFAULT_PAGE_LIMIT: i64 = 20;
pub const MAX_PAGE_LIMIT: i64 = 100;

/// Validated pagination shared by every listing endpoint.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub page: i64,
    pub limit: i64,
}

impl Page {
    /// Clamp raw query parameters to sane bounds.
    pub fn new(page: Option<i64>, limit: Option<i64>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.limit
    }
}

/// Parse a stored status string, mapping corruption to a database-class error.
pub fn parse_stored<T>(parse: impl Fn(&str) -> Option<T>, raw: &str) -> Result<T> {
    parse(raw).ok_or_else(|| {
        EngineError::Database(sqlx::Error::Decode(
            format!("unrecognised stored status {raw:?}").into(),
        ))
    })
}
