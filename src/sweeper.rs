//! Long-running background task that ages out stale inventory.
//!
//! Each cycle selects `Available` units past their expiry date and moves them
//! to `Expired` one conditional update at a time. A unit concurrently marked
//! `Used` or `Reserved` makes the update miss; that race is expected and
//! swallowed. Database failures abort the cycle and are retried on the next
//! interval.

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::errors::{EngineError, Result};
use crate::inventory;
use crate::models::now_ts;

pub struct SweeperState {
    pub pool: SqlitePool,
    pub config: Config,
}

/// Spawn the sweep loop as a background [`tokio`] task.
pub async fn run(state: Arc<SweeperState>) {
    info!(
        "Expiry sweeper starting — interval {}s",
        state.config.sweep_interval_secs
    );

    loop {
        match sweep_once(&state.pool, now_ts()).await {
            Ok(0) => {}
            Ok(n) => info!("Expiry sweep moved {n} units to Expired"),
            Err(e) => error!("Expiry sweep failed (will retry next cycle): {e}"),
        }

        tokio::time::sleep(Duration::from_secs(state.config.sweep_interval_secs)).await;
    }
}

/// Perform a single sweep. Idempotent: a second run with no intervening
/// mutation finds no candidates and does nothing.
///
/// Returns the number of units expired.
pub async fn sweep_once(pool: &SqlitePool, now: i64) -> Result<u64> {
    let candidates: Vec<(i64,)> = sqlx::query_as(
        "SELECT id FROM blood_units WHERE status = 'Available' AND expiry_date <= ?1",
    )
    .bind(now)
    .fetch_all(pool)
    .await?;

    let mut expired = 0u64;
    for (unit_id,) in candidates {
        match inventory::mark_expired(pool, unit_id, now).await {
            Ok(_) => expired += 1,
            // Lost the race to a concurrent Use/Reserve; the other transition wins.
            Err(EngineError::InvalidStateTransition(reason)) => {
                debug!("sweep skipped unit {unit_id}: {reason}");
            }
            Err(EngineError::NotFound(..)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(expired)
}
