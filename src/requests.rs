//! Request registry — the patient-facing blood request lifecycle.
//!
//! `pending → approved → fulfilled`, with `declined` and `cancelled` leaving
//! `pending` only. Every hospital-initiated transition appends an immutable
//! note row recording the actor; notes are never edited.

use sqlx::SqlitePool;

use crate::blood::BloodType;
use crate::errors::{EngineError, Result};
use crate::models::{BloodRequestRow, RequestNoteRow, RequestStatus};

const REQUEST_COLUMNS: &str = "id, requester, blood_type, location, urgent, status, created_at";

/// Patient intake: a new request starts `pending`.
pub async fn create_request(
    pool: &SqlitePool,
    requester: &str,
    blood_type: BloodType,
    location: Option<&str>,
    urgent: bool,
    now: i64,
) -> Result<BloodRequestRow> {
    let row = sqlx::query_as::<_, BloodRequestRow>(&format!(
        r#"
        INSERT INTO blood_requests (requester, blood_type, location, urgent, status, created_at)
        VALUES (?1, ?2, ?3, ?4, 'pending', ?5)
        RETURNING {REQUEST_COLUMNS}
        "#
    ))
    .bind(requester)
    .bind(blood_type.as_str())
    .bind(location)
    .bind(urgent)
    .bind(now)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn get_request(pool: &SqlitePool, request_id: i64) -> Result<BloodRequestRow> {
    sqlx::query_as::<_, BloodRequestRow>(&format!(
        "SELECT {REQUEST_COLUMNS} FROM blood_requests WHERE id = ?1"
    ))
    .bind(request_id)
    .fetch_optional(pool)
    .await?
    .ok_or(EngineError::NotFound("blood request", request_id))
}

/// Hospital transition with an append-only audit note.
///
/// The status check-and-set is one conditional update; the note insert shares
/// its transaction so a rejected transition leaves no note behind.
pub async fn transition(
    pool: &SqlitePool,
    request_id: i64,
    target: RequestStatus,
    actor: &str,
    notes: Option<&str>,
    now: i64,
) -> Result<BloodRequestRow> {
    let preds = target.legal_predecessors();
    if preds.is_empty() {
        return Err(EngineError::InvalidStateTransition(format!(
            "blood request {request_id}: no transition leads to {}",
            target.as_str()
        )));
    }
    let preds_sql = preds
        .iter()
        .map(|p| format!("'{}'", p.as_str()))
        .collect::<Vec<_>>()
        .join(", ");

    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, BloodRequestRow>(&format!(
        r#"
        UPDATE blood_requests SET status = ?1
        WHERE  id = ?2 AND status IN ({preds_sql})
        RETURNING {REQUEST_COLUMNS}
        "#
    ))
    .bind(target.as_str())
    .bind(request_id)
    .fetch_optional(&mut *tx)
    .await?;

    let row = match row {
        Some(row) => row,
        None => {
            let current: Option<(String,)> =
                sqlx::query_as("SELECT status FROM blood_requests WHERE id = ?1")
                    .bind(request_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            return Err(match current {
                None => EngineError::NotFound("blood request", request_id),
                Some((status,)) => EngineError::InvalidStateTransition(format!(
                    "blood request {request_id}: {status} → {}",
                    target.as_str()
                )),
            });
        }
    };

    sqlx::query(
        r#"
        INSERT INTO request_notes (request_id, actor, transition, notes, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(request_id)
    .bind(actor)
    .bind(target.as_str())
    .bind(notes)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(row)
}

/// Audit trail for a request, oldest first.
pub async fn notes(pool: &SqlitePool, request_id: i64) -> Result<Vec<RequestNoteRow>> {
    let rows = sqlx::query_as::<_, RequestNoteRow>(
        r#"
        SELECT id, request_id, actor, transition, notes, created_at
        FROM   request_notes
        WHERE  request_id = ?1
        ORDER  BY id ASC
        "#,
    )
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

    async fn new_request(pool: &SqlitePool) -> i64 {
        create_request(pool, "patient", BloodType::APos, Some("Lagos"), false, now_ts())
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn approve_then_fulfill() {
        let pool = test_pool().await;
        let id = new_request(&pool).await;
        let now = now_ts();

        let row = transition(&pool, id, RequestStatus::Approved, "st-marys", None, now)
            .await
            .unwrap();
        assert_eq!(row.status, "approved");

        let row = transition(
            &pool,
            id,
            RequestStatus::Fulfilled,
            "st-marys",
            Some("2 units issued"),
            now,
        )
        .await
        .unwrap();
        assert_eq!(row.status, "fulfilled");

        let log = notes(&pool, id).await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].transition, "approved");
        assert_eq!(log[1].notes.as_deref(), Some("2 units issued"));
    }

    #[tokio::test]
    async fn cannot_skip_approval() {
        let pool = test_pool().await;
        let id = new_request(&pool).await;

        let err = transition(&pool, id, RequestStatus::Fulfilled, "st-marys", None, now_ts())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidStateTransition(_)));
        // A rejected transition leaves no audit note.
        assert!(notes(&pool, id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn declined_and_fulfilled_are_terminal() {
        let pool = test_pool().await;
        let now = now_ts();

        let declined = new_request(&pool).await;
        transition(&pool, declined, RequestStatus::Declined, "h", None, now)
            .await
            .unwrap();
        for target in [
            RequestStatus::Approved,
            RequestStatus::Fulfilled,
            RequestStatus::Cancelled,
        ] {
            let err = transition(&pool, declined, target, "h", None, now)
                .await
                .unwrap_err();
            assert!(matches!(err, EngineError::InvalidStateTransition(_)));
        }
    }

    #[tokio::test]
    async fn pending_may_be_cancelled() {
        let pool = test_pool().await;
        let id = new_request(&pool).await;
        let row = transition(&pool, id, RequestStatus::Cancelled, "patient", None, now_ts())
            .await
            .unwrap();
        assert_eq!(row.status, "cancelled");
    }

    #[tokio::test]
    async fn nothing_transitions_back_to_pending() {
        let pool = test_pool().await;
        let id = new_request(&pool).await;
        let err = transition(&pool, id, RequestStatus::Pending, "h", None, now_ts())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidStateTransition(_)));
    }

    #[tokio::test]
    async fn missing_request_is_not_found() {
        let pool = test_pool().await;
        let err = transition(&pool, 42, RequestStatus::Approved, "h", None, now_ts())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound("blood request", 42)));
    }
}
