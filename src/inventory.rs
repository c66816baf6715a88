//! Inventory ledger — donation review, unit collection, and the unit
//! lifecycle state machine.
//!
//! Every mutation is a single conditional `UPDATE ... WHERE status IN (...)`
//! so that concurrent callers race at the database row, not in application
//! code: whichever transition lands first wins and the loser gets a typed
//! `InvalidStateTransition` with no partial effect.

use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::blood::{BloodType, ALL_BLOOD_TYPES};
use crate::errors::{EngineError, Result};
use crate::models::{BloodUnitRow, DonationRow, DonationStatus, UnitStatus};

/// Units expiring within this window count as `expiring_soon`.
pub const EXPIRING_SOON_WINDOW_SECS: i64 = 7 * 86_400;

const UNIT_COLUMNS: &str =
    "id, donation_id, blood_type, status, collected_at, expiry_date, used_at";

// ─────────────────────────────────────────────────────────
// Donation intake and review
// ─────────────────────────────────────────────────────────

/// Record a donor-submitted donation. The blood type is taken from the donor
/// record, never from the submission.
pub async fn create_donation(
    pool: &SqlitePool,
    donor_id: i64,
    location: Option<&str>,
    now: i64,
) -> Result<DonationRow> {
    let donor_type: Option<(String,)> =
        sqlx::query_as("SELECT blood_type FROM donors WHERE id = ?1")
            .bind(donor_id)
            .fetch_optional(pool)
            .await?;
    let (blood_type,) = donor_type.ok_or(EngineError::NotFound("donor", donor_id))?;

    let row = sqlx::query_as::<_, DonationRow>(
        r#"
        INSERT INTO donations (donor_id, blood_type, location, status, created_at)
        VALUES (?1, ?2, ?3, 'Pending', ?4)
        RETURNING id, donor_id, blood_type, location, status, created_at
        "#,
    )
    .bind(donor_id)
    .bind(&blood_type)
    .bind(location)
    .bind(now)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Hospital review of a pending donation: `Pending → Approved | Declined`.
pub async fn review_donation(
    pool: &SqlitePool,
    donation_id: i64,
    approve: bool,
) -> Result<DonationRow> {
    let target = if approve {
        DonationStatus::Approved
    } else {
        DonationStatus::Declined
    };

    let row = sqlx::query_as::<_, DonationRow>(
        r#"
        UPDATE donations SET status = ?1
        WHERE  id = ?2 AND status = 'Pending'
        RETURNING id, donor_id, blood_type, location, status, created_at
        "#,
    )
    .bind(target.as_str())
    .bind(donation_id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(row),
        None => Err(donation_transition_error(pool, donation_id, target.as_str()).await?),
    }
}

pub async fn get_donation(pool: &SqlitePool, donation_id: i64) -> Result<DonationRow> {
    sqlx::query_as::<_, DonationRow>(
        "SELECT id, donor_id, blood_type, location, status, created_at FROM donations WHERE id = ?1",
    )
    .bind(donation_id)
    .fetch_optional(pool)
    .await?
    .ok_or(EngineError::NotFound("donation", donation_id))
}

/// Diagnose why a conditional donation update matched no row.
async fn donation_transition_error(
    pool: &SqlitePool,
    donation_id: i64,
    target: &str,
) -> Result<EngineError> {
    let current: Option<(String,)> = sqlx::query_as("SELECT status FROM donations WHERE id = ?1")
        .bind(donation_id)
        .fetch_optional(pool)
        .await?;
    Ok(match current {
        None => EngineError::NotFound("donation", donation_id),
        Some((status,)) => EngineError::InvalidStateTransition(format!(
            "donation {donation_id}: {status} → {target}"
        )),
    })
}

// ─────────────────────────────────────────────────────────
// Collection
// ─────────────────────────────────────────────────────────

/// Turn an approved donation into a physical blood unit.
///
/// Atomic and effectively-once: the donation's `Approved → Collected` move and
/// the unit insert happen in one transaction, and the `UNIQUE (donation_id)`
/// constraint backstops any path that would create a second unit.
pub async fn collect(
    pool: &SqlitePool,
    donation_id: i64,
    expiry_date: i64,
    now: i64,
) -> Result<BloodUnitRow> {
    if expiry_date <= now {
        return Err(EngineError::InvalidExpiry);
    }

    let mut tx = pool.begin().await?;

    let donation = sqlx::query_as::<_, DonationRow>(
        r#"
        UPDATE donations SET status = 'Collected'
        WHERE  id = ?1 AND status = 'Approved'
        RETURNING id, donor_id, blood_type, location, status, created_at
        "#,
    )
    .bind(donation_id)
    .fetch_optional(&mut *tx)
    .await?;

    let donation = match donation {
        Some(d) => d,
        None => {
            let current: Option<(String,)> =
                sqlx::query_as("SELECT status FROM donations WHERE id = ?1")
                    .bind(donation_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            return Err(match current {
                None => EngineError::NotFound("donation", donation_id),
                Some((raw,)) => match DonationStatus::parse(&raw) {
                    Some(DonationStatus::Collected) => {
                        EngineError::DuplicateCollection(donation_id)
                    }
                    _ => EngineError::InvalidStateTransition(format!(
                        "donation {donation_id}: {raw} → Collected"
                    )),
                },
            });
        }
    };

    let unit = sqlx::query_as::<_, BloodUnitRow>(&format!(
        r#"
        INSERT INTO blood_units (donation_id, blood_type, status, collected_at, expiry_date)
        VALUES (?1, ?2, 'Available', ?3, ?4)
        RETURNING {UNIT_COLUMNS}
        "#
    ))
    .bind(donation_id)
    .bind(&donation.blood_type)
    .bind(now)
    .bind(expiry_date)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            EngineError::DuplicateCollection(donation_id)
        }
        _ => EngineError::Database(e),
    })?;

    tx.commit().await?;
    Ok(unit)
}

// ─────────────────────────────────────────────────────────
// Unit lifecycle
// ─────────────────────────────────────────────────────────

/// Move a unit to `target`, validating the current status is a legal
/// predecessor. The check-and-update is one conditional statement, so two
/// racing calls resolve to exactly one winner.
pub async fn transition_unit(
    pool: &SqlitePool,
    unit_id: i64,
    target: UnitStatus,
    now: i64,
) -> Result<BloodUnitRow> {
    // Predecessor statuses are 'static enum strings, safe to inline.
    let preds = target
        .legal_predecessors()
        .iter()
        .map(|p| format!("'{}'", p.as_str()))
        .collect::<Vec<_>>()
        .join(", ");

    let sql = format!(
        r#"
        UPDATE blood_units
        SET    status = ?1,
               used_at = CASE WHEN ?1 = 'Used' THEN ?2 ELSE used_at END
        WHERE  id = ?3 AND status IN ({preds})
        RETURNING {UNIT_COLUMNS}
        "#
    );

    let row = sqlx::query_as::<_, BloodUnitRow>(&sql)
        .bind(target.as_str())
        .bind(now)
        .bind(unit_id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => Ok(row),
        None => {
            let current: Option<(String,)> =
                sqlx::query_as("SELECT status FROM blood_units WHERE id = ?1")
                    .bind(unit_id)
                    .fetch_optional(pool)
                    .await?;
            Err(match current {
                None => EngineError::NotFound("unit", unit_id),
                Some((status,)) => EngineError::InvalidStateTransition(format!(
                    "unit {unit_id}: {status} → {}",
                    target.as_str()
                )),
            })
        }
    }
}

pub async fn reserve(pool: &SqlitePool, unit_id: i64, now: i64) -> Result<BloodUnitRow> {
    transition_unit(pool, unit_id, UnitStatus::Reserved, now).await
}

pub async fn release(pool: &SqlitePool, unit_id: i64, now: i64) -> Result<BloodUnitRow> {
    transition_unit(pool, unit_id, UnitStatus::Available, now).await
}

pub async fn mark_used(pool: &SqlitePool, unit_id: i64, now: i64) -> Result<BloodUnitRow> {
    transition_unit(pool, unit_id, UnitStatus::Used, now).await
}

pub async fn mark_expired(pool: &SqlitePool, unit_id: i64, now: i64) -> Result<BloodUnitRow> {
    transition_unit(pool, unit_id, UnitStatus::Expired, now).await
}

// ─────────────────────────────────────────────────────────
// Queries
// ─────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone)]
pub struct UnitFilter {
    pub blood_type: Option<BloodType>,
    pub status: Option<UnitStatus>,
    pub expiring_within_days: Option<i64>,
}

/// List units matching the filter, soonest expiry first.
pub async fn list_units(
    pool: &SqlitePool,
    filter: &UnitFilter,
    now: i64,
) -> Result<Vec<BloodUnitRow>> {
    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT {UNIT_COLUMNS} FROM blood_units WHERE 1 = 1"));
    if let Some(bt) = filter.blood_type {
        qb.push(" AND blood_type = ").push_bind(bt.as_str());
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(days) = filter.expiring_within_days {
        qb.push(" AND status = 'Available' AND expiry_date > ")
            .push_bind(now)
            .push(" AND expiry_date <= ")
            .push_bind(now + days.max(0) * 86_400);
    }
    qb.push(" ORDER BY expiry_date ASC, id ASC");

    let rows = qb.build_query_as::<BloodUnitRow>().fetch_all(pool).await?;
    Ok(rows)
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TypeAvailability {
    pub blood_type: BloodType,
    pub available: i64,
    pub expiring_soon: i64,
    pub total: i64,
}

/// Per-type availability counts.
///
/// `available` filters on `expiry_date > now` as well as status, so a unit
/// past its expiry is never reported available even before the sweeper has
/// visited it.
pub async fn availability_by_type(pool: &SqlitePool, now: i64) -> Result<Vec<TypeAvailability>> {
    let rows: Vec<(String, i64, i64, i64)> = sqlx::query_as(
        r#"
        SELECT blood_type,
               SUM(CASE WHEN status = 'Available' AND expiry_date > ?1 THEN 1 ELSE 0 END),
               SUM(CASE WHEN status = 'Available' AND expiry_date > ?1
                         AND expiry_date <= ?1 + ?2 THEN 1 ELSE 0 END),
               COUNT(*)
        FROM   blood_units
        GROUP  BY blood_type
        "#,
    )
    .bind(now)
    .bind(EXPIRING_SOON_WINDOW_SECS)
    .fetch_all(pool)
    .await?;

    // Report all eight types, zero-filled where no units exist.
    let mut out = Vec::with_capacity(ALL_BLOOD_TYPES.len());
    for ty in ALL_BLOOD_TYPES {
        let found = rows.iter().find(|(raw, ..)| raw == ty.as_str());
        let (available, expiring_soon, total) =
            found.map_or((0, 0, 0), |(_, a, e, t)| (*a, *e, *t));
        out.push(TypeAvailability {
            blood_type: ty,
            available,
            expiring_soon,
            total,
        });
    }
    Ok(out)
}

/// Blood types whose available count is below `threshold`.
pub async fn low_stock(
    pool: &SqlitePool,
    threshold: i64,
    now: i64,
) -> Result<Vec<TypeAvailability>> {
    let mut all = availability_by_type(pool, now).await?;
    all.retain(|t| t.available < threshold);
    Ok(all)
}
