//! Hospital network broker — inter-hospital requests and the reconciliation
//! of many responses against one request's `units_needed`.
//!
//! The request status is recomputed inside the same transaction that inserts
//! a response, from a re-read of all counted responses, so concurrent
//! submissions cannot lose an update. The TTL is enforced lazily: any touch
//! of a stale open request first flips it to `expired` with a conditional
//! update, after which no further responses are accepted.

use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::warn;

use crate::blood::BloodType;
use crate::errors::{EngineError, Result};
use crate::models::{
    parse_stored, HospitalRequestRow, HospitalRequestStatus, HospitalResponseRow, ResponseStatus,
    UrgencyLevel,
};

const HREQUEST_COLUMNS: &str = "id, requesting_hospital, patient_ref, blood_type, units_needed, \
                                urgency_level, status, created_at, expires_at";
const HRESPONSE_COLUMNS: &str = "id, hospital_request_id, responding_hospital, units_offered, \
                                 status, estimated_delivery, response_notes, created_at";

/// What a hospital does with someone else's request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseAction {
    Offer { units: i64 },
    Decline,
}

pub async fn create_request(
    pool: &SqlitePool,
    requesting_hospital: &str,
    patient_ref: Option<&str>,
    blood_type: BloodType,
    units_needed: i64,
    urgency_level: UrgencyLevel,
    ttl_secs: i64,
    now: i64,
) -> Result<HospitalRequestRow> {
    if units_needed <= 0 {
        return Err(EngineError::InvalidOffer(format!(
            "units_needed must be positive, got {units_needed}"
        )));
    }

    let row = sqlx::query_as::<_, HospitalRequestRow>(&format!(
        r#"
        INSERT INTO hospital_requests
            (requesting_hospital, patient_ref, blood_type, units_needed, urgency_level,
             status, created_at, expires_at)
        VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?7)
        RETURNING {HREQUEST_COLUMNS}
        "#
    ))
    .bind(requesting_hospital)
    .bind(patient_ref)
    .bind(blood_type.as_str())
    .bind(units_needed)
    .bind(urgency_level.as_str())
    .bind(now)
    .bind(now + ttl_secs)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Flip every stale open request to `expired`. Conditional on the open
/// states, so `fulfilled`/`cancelled` are never touched.
async fn expire_stale(tx: &mut Transaction<'_, Sqlite>, now: i64) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE hospital_requests SET status = 'expired'
        WHERE  status IN ('pending', 'partially_fulfilled') AND expires_at < ?1
        "#,
    )
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn get_request(
    pool: &SqlitePool,
    request_id: i64,
    now: i64,
) -> Result<HospitalRequestRow> {
    let mut tx = pool.begin().await?;
    expire_stale(&mut tx, now).await?;
    let row = fetch_request(&mut tx, request_id).await?;
    tx.commit().await?;
    Ok(row)
}

async fn fetch_request(
    tx: &mut Transaction<'_, Sqlite>,
    request_id: i64,
) -> Result<HospitalRequestRow> {
    sqlx::query_as::<_, HospitalRequestRow>(&format!(
        "SELECT {HREQUEST_COLUMNS} FROM hospital_requests WHERE id = ?1"
    ))
    .bind(request_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(EngineError::NotFound("hospital request", request_id))
}

/// Listing scope for the request board.
#[derive(Debug, Clone)]
pub enum RequestScope {
    /// Requests this hospital opened.
    Mine(String),
    /// Open requests from other hospitals this one could respond to.
    Available(String),
    All,
}

pub async fn list_requests(
    pool: &SqlitePool,
    scope: RequestScope,
    now: i64,
) -> Result<Vec<HospitalRequestRow>> {
    let mut tx = pool.begin().await?;
    expire_stale(&mut tx, now).await?;

    let base = format!("SELECT {HREQUEST_COLUMNS} FROM hospital_requests");
    let rows = match &scope {
        RequestScope::Mine(hospital) => {
            sqlx::query_as::<_, HospitalRequestRow>(&format!(
                "{base} WHERE requesting_hospital = ?1 ORDER BY created_at DESC, id DESC"
            ))
            .bind(hospital)
            .fetch_all(&mut *tx)
            .await?
        }
        RequestScope::Available(hospital) => {
            sqlx::query_as::<_, HospitalRequestRow>(&format!(
                r#"{base}
                WHERE requesting_hospital != ?1
                  AND status IN ('pending', 'partially_fulfilled')
                ORDER BY CASE urgency_level
                           WHEN 'critical' THEN 0
                           WHEN 'urgent' THEN 1
                           ELSE 2
                         END, created_at ASC"#
            ))
            .bind(hospital)
            .fetch_all(&mut *tx)
            .await?
        }
        RequestScope::All => {
            sqlx::query_as::<_, HospitalRequestRow>(&format!(
                "{base} ORDER BY created_at DESC, id DESC"
            ))
            .fetch_all(&mut *tx)
            .await?
        }
    };

    tx.commit().await?;
    Ok(rows)
}

/// Record a response and reconcile the request status.
///
/// Over-offers are clamped to the remaining need (logged, not rejected);
/// offers on a non-open request are rejected outright. Responses are
/// append-only; a changed offer is a new response.
pub async fn respond(
    pool: &SqlitePool,
    request_id: i64,
    responding_hospital: &str,
    action: ResponseAction,
    response_notes: Option<&str>,
    estimated_delivery: Option<i64>,
    now: i64,
) -> Result<(HospitalRequestRow, HospitalResponseRow)> {
    if let ResponseAction::Offer { units } = action {
        if units <= 0 {
            return Err(EngineError::InvalidOffer(format!(
                "units_offered must be positive, got {units}"
            )));
        }
    }

    let mut tx = pool.begin().await?;
    expire_stale(&mut tx, now).await?;

    let request = fetch_request(&mut tx, request_id).await?;
    let status = parse_stored(HospitalRequestStatus::parse, &request.status)?;
    if !status.is_open() {
        return Err(EngineError::InvalidStateTransition(format!(
            "hospital request {request_id} is {} and accepts no further responses",
            request.status
        )));
    }

    let (response_status, units_recorded) = match action {
        ResponseAction::Decline => (ResponseStatus::Declined, 0),
        ResponseAction::Offer { units } => {
            let (total_before,): (i64,) = sqlx::query_as(
                r#"
                SELECT COALESCE(SUM(units_offered), 0)
                FROM   hospital_responses
                WHERE  hospital_request_id = ?1 AND status IN ('offered', 'delivered')
                "#,
            )
            .bind(request_id)
            .fetch_one(&mut *tx)
            .await?;

            let remaining = request.units_needed - total_before;
            let clamped = units.min(remaining);
            if clamped < units {
                warn!(
                    "hospital request {request_id}: offer of {units} units from \
                     {responding_hospital} clamped to remaining need {remaining}"
                );
            }
            (ResponseStatus::Offered, clamped)
        }
    };

    let response = sqlx::query_as::<_, HospitalResponseRow>(&format!(
        r#"
        INSERT INTO hospital_responses
            (hospital_request_id, responding_hospital, units_offered, status,
             estimated_delivery, response_notes, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        RETURNING {HRESPONSE_COLUMNS}
        "#
    ))
    .bind(request_id)
    .bind(responding_hospital)
    .bind(units_recorded)
    .bind(response_status.as_str())
    .bind(estimated_delivery)
    .bind(response_notes)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;

    // Recompute from the full response set inside the same transaction.
    let (total_offered,): (i64,) = sqlx::query_as(
        r#"
        SELECT COALESCE(SUM(units_offered), 0)
        FROM   hospital_responses
        WHERE  hospital_request_id = ?1 AND status IN ('offered', 'delivered')
        "#,
    )
    .bind(request_id)
    .fetch_one(&mut *tx)
    .await?;

    let new_status = if total_offered >= request.units_needed {
        HospitalRequestStatus::Fulfilled
    } else if total_offered > 0 {
        HospitalRequestStatus::PartiallyFulfilled
    } else {
        HospitalRequestStatus::Pending
    };

    let request = sqlx::query_as::<_, HospitalRequestRow>(&format!(
        r#"
        UPDATE hospital_requests SET status = ?1
        WHERE  id = ?2
        RETURNING {HREQUEST_COLUMNS}
        "#
    ))
    .bind(new_status.as_str())
    .bind(request_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok((request, response))
}

/// The requesting hospital withdraws its own open request.
pub async fn cancel_request(
    pool: &SqlitePool,
    request_id: i64,
    hospital: &str,
    now: i64,
) -> Result<HospitalRequestRow> {
    let mut tx = pool.begin().await?;
    expire_stale(&mut tx, now).await?;

    let row = sqlx::query_as::<_, HospitalRequestRow>(&format!(
        r#"
        UPDATE hospital_requests SET status = 'cancelled'
        WHERE  id = ?1 AND requesting_hospital = ?2
               AND status IN ('pending', 'partially_fulfilled')
        RETURNING {HREQUEST_COLUMNS}
        "#
    ))
    .bind(request_id)
    .bind(hospital)
    .fetch_optional(&mut *tx)
    .await?;

    let row = match row {
        Some(row) => row,
        None => {
            let request = fetch_request(&mut tx, request_id).await?;
            return Err(if request.requesting_hospital != hospital {
                EngineError::InvalidStateTransition(format!(
                    "hospital request {request_id} belongs to {}",
                    request.requesting_hospital
                ))
            } else {
                EngineError::InvalidStateTransition(format!(
                    "hospital request {request_id}: {} → cancelled",
                    request.status
                ))
            });
        }
    };

    tx.commit().await?;
    Ok(row)
}

/// An offering hospital confirms delivery: `offered → delivered`. Counts the
/// same toward fulfillment, so the request status is unaffected.
pub async fn mark_delivered(pool: &SqlitePool, response_id: i64) -> Result<HospitalResponseRow> {
    let row = sqlx::query_as::<_, HospitalResponseRow>(&format!(
        r#"
        UPDATE hospital_responses SET status = ?2
        WHERE  id = ?1 AND status = 'offered'
        RETURNING {HRESPONSE_COLUMNS}
        "#
    ))
    .bind(response_id)
    .bind(ResponseStatus::Delivered.as_str())
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(row),
        None => {
            let current: Option<(String,)> =
                sqlx::query_as("SELECT status FROM hospital_responses WHERE id = ?1")
                    .bind(response_id)
                    .fetch_optional(pool)
                    .await?;
            Err(match current {
                None => EngineError::NotFound("hospital response", response_id),
                Some((status,)) => EngineError::InvalidStateTransition(format!(
                    "hospital response {response_id}: {status} → delivered"
                )),
            })
        }
    }
}

/// All responses to a request, oldest first.
pub async fn responses(pool: &SqlitePool, request_id: i64) -> Result<Vec<HospitalResponseRow>> {
    let rows = sqlx::query_as::<_, HospitalResponseRow>(&format!(
        "SELECT {HRESPONSE_COLUMNS} FROM hospital_responses \
         WHERE hospital_request_id = ?1 ORDER BY id ASC"
    ))
    .bind(request_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::models::now_ts;

    const TTL: i64 = 72 * 3600;

    async fn new_request(pool: &SqlitePool, units_needed: i64, now: i64) -> i64 {
        create_request(
            pool,
            "st-marys",
            Some("patient-7"),
            BloodType::APos,
            units_needed,
            UrgencyLevel::Urgent,
            TTL,
            now,
        )
        .await
        .unwrap()
        .id
    }

    #[tokio::test]
    async fn offers_accumulate_to_fulfilled() {
        let pool = test_pool().await;
        let now = now_ts();
        let id = new_request(&pool, 3, now).await;

        let (req, _) = respond(
            &pool,
            id,
            "general",
            ResponseAction::Offer { units: 2 },
            None,
            None,
            now,
        )
        .await
        .unwrap();
        assert_eq!(req.status, "partially_fulfilled");

        let (req, _) = respond(
            &pool,
            id,
            "teaching",
            ResponseAction::Offer { units: 1 },
            None,
            None,
            now,
        )
        .await
        .unwrap();
        assert_eq!(req.status, "fulfilled");
    }

    #[tokio::test]
    async fn decline_contributes_nothing() {
        let pool = test_pool().await;
        let now = now_ts();
        let id = new_request(&pool, 2, now).await;

        let (req, resp) = respond(
            &pool,
            id,
            "general",
            ResponseAction::Decline,
            Some("no stock"),
            None,
            now,
        )
        .await
        .unwrap();
        assert_eq!(req.status, "pending");
        assert_eq!(resp.status, "declined");
        assert_eq!(resp.units_offered, 0);
    }

    #[tokio::test]
    async fn over_offer_is_clamped_to_remaining_need() {
        let pool = test_pool().await;
        let now = now_ts();
        let id = new_request(&pool, 3, now).await;

        respond(&pool, id, "a", ResponseAction::Offer { units: 2 }, None, None, now)
            .await
            .unwrap();
        let (req, resp) = respond(
            &pool,
            id,
            "b",
            ResponseAction::Offer { units: 5 },
            None,
            None,
            now,
        )
        .await
        .unwrap();
        assert_eq!(resp.units_offered, 1);
        assert_eq!(req.status, "fulfilled");
    }

    #[tokio::test]
    async fn non_positive_offer_is_rejected() {
        let pool = test_pool().await;
        let now = now_ts();
        let id = new_request(&pool, 2, now).await;

        for units in [0, -3] {
            let err = respond(
                &pool,
                id,
                "a",
                ResponseAction::Offer { units },
                None,
                None,
                now,
            )
            .await
            .unwrap_err();
            assert!(matches!(err, EngineError::InvalidOffer(_)));
        }
        assert!(responses(&pool, id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fulfilled_request_accepts_no_further_responses() {
        let pool = test_pool().await;
        let now = now_ts();
        let id = new_request(&pool, 1, now).await;

        respond(&pool, id, "a", ResponseAction::Offer { units: 1 }, None, None, now)
            .await
            .unwrap();
        let err = respond(
            &pool,
            id,
            "b",
            ResponseAction::Offer { units: 5 },
            None,
            None,
            now,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidStateTransition(_)));
        assert_eq!(responses(&pool, id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_request_reads_as_expired_and_rejects_offers() {
        let pool = test_pool().await;
        let now = now_ts();
        let id = new_request(&pool, 2, now).await;

        let later = now + TTL + 1;
        let req = get_request(&pool, id, later).await.unwrap();
        assert_eq!(req.status, "expired");

        let err = respond(
            &pool,
            id,
            "a",
            ResponseAction::Offer { units: 1 },
            None,
            None,
            later,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidStateTransition(_)));
    }

    #[tokio::test]
    async fn fulfilled_request_never_expires() {
        let pool = test_pool().await;
        let now = now_ts();
        let id = new_request(&pool, 1, now).await;
        respond(&pool, id, "a", ResponseAction::Offer { units: 1 }, None, None, now)
            .await
            .unwrap();

        let req = get_request(&pool, id, now + TTL + 1).await.unwrap();
        assert_eq!(req.status, "fulfilled");
    }

    #[tokio::test]
    async fn scopes_split_mine_and_available() {
        let pool = test_pool().await;
        let now = now_ts();
        let mine = new_request(&pool, 1, now).await;
        let theirs = create_request(
            &pool,
            "general",
            None,
            BloodType::ONeg,
            2,
            UrgencyLevel::Critical,
            TTL,
            now,
        )
        .await
        .unwrap()
        .id;

        let rows = list_requests(&pool, RequestScope::Mine("st-marys".into()), now)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, mine);

        let rows = list_requests(&pool, RequestScope::Available("st-marys".into()), now)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, theirs);

        let rows = list_requests(&pool, RequestScope::All, now).await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn only_the_owner_cancels_and_only_while_open() {
        let pool = test_pool().await;
        let now = now_ts();
        let id = new_request(&pool, 2, now).await;

        let err = cancel_request(&pool, id, "general", now).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidStateTransition(_)));

        let row = cancel_request(&pool, id, "st-marys", now).await.unwrap();
        assert_eq!(row.status, "cancelled");

        let err = cancel_request(&pool, id, "st-marys", now).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidStateTransition(_)));
    }

    #[tokio::test]
    async fn delivery_confirmation_keeps_fulfillment_arithmetic() {
        let pool = test_pool().await;
        let now = now_ts();
        let id = new_request(&pool, 2, now).await;
        let (_, resp) = respond(
            &pool,
            id,
            "a",
            ResponseAction::Offer { units: 2 },
            None,
            None,
            now,
        )
        .await
        .unwrap();

        let delivered = mark_delivered(&pool, resp.id).await.unwrap();
        assert_eq!(delivered.status, "delivered");
        // Delivered responses still count toward the fulfilled total.
        let req = get_request(&pool, id, now).await.unwrap();
        assert_eq!(req.status, "fulfilled");

        let err = mark_delivered(&pool, resp.id).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidStateTransition(_)));
    }

    #[tokio::test]
    async fn zero_units_needed_is_rejected_at_creation() {
        let pool = test_pool().await;
        let err = create_request(
            &pool,
            "st-marys",
            None,
            BloodType::APos,
            0,
            UrgencyLevel::Routine,
            TTL,
            now_ts(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidOffer(_)));
    }
}
