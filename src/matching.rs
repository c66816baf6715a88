//! Matching engine — ranks eligible donors for a requested blood type.
//!
//! Eligibility comes from the compatibility table; ranking is three tiers
//! (exact match, then O- universal donors, then everything else compatible),
//! with same-location rows first inside a tier and ties broken by earliest
//! registration. The candidate fetch is a single indexed query; ranking and
//! pagination happen in memory where the tier logic stays testable.

use serde::Serialize;
use sqlx::SqlitePool;

use crate::blood::{BloodType, DonorCategory, ALL_BLOOD_TYPES};
use crate::donors;
use crate::errors::{EngineError, Result};
use crate::models::{DonorRow, Page};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum MatchTier {
    #[serde(rename = "Exact Match")]
    Exact,
    #[serde(rename = "Universal Donor")]
    UniversalDonor,
    #[serde(rename = "Compatible")]
    Compatible,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchedDonor {
    #[serde(flatten)]
    pub donor: DonorRow,
    pub match_tier: MatchTier,
    pub category: DonorCategory,
}

#[derive(Debug, Serialize)]
pub struct MatchResult {
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub donors: Vec<MatchedDonor>,
}

fn tier_for(donor_type: BloodType, requested: BloodType) -> MatchTier {
    if donor_type == requested {
        MatchTier::Exact
    } else if donor_type == BloodType::ONeg {
        MatchTier::UniversalDonor
    } else {
        MatchTier::Compatible
    }
}

/// Rank pre-fetched candidates. `rows` must already be in registration order;
/// the sort is stable, so that order survives as the within-tier tiebreak.
fn rank(rows: Vec<DonorRow>, requested: BloodType, location: Option<&str>) -> Vec<MatchedDonor> {
    let mut ranked: Vec<MatchedDonor> = rows
        .into_iter()
        .filter_map(|donor| {
            let donor_type = BloodType::parse(&donor.blood_type).ok()?;
            Some(MatchedDonor {
                match_tier: tier_for(donor_type, requested),
                category: donor_type.category(),
                donor,
            })
        })
        .collect();

    ranked.sort_by_key(|m| {
        let local = match location {
            Some(loc) => m.donor.preferred_location.as_deref() != Some(loc),
            None => false,
        };
        (m.match_tier, local)
    });
    ranked
}

/// `GET /donors/matching` — every registered donor able to give to
/// `requested`, ranked and paginated. `total` counts the full eligible set.
pub async fn match_donors(
    pool: &SqlitePool,
    requested: BloodType,
    location: Option<&str>,
    search: Option<&str>,
    page: Page,
) -> Result<MatchResult> {
    let eligible = requested.compatible_donor_types();
    let mut rows = donors::donors_of_types(pool, eligible).await?;

    if let Some(needle) = search {
        let needle = needle.to_lowercase();
        rows.retain(|d| {
            d.name.to_lowercase().contains(&needle)
                || d.preferred_location
                    .as_deref()
                    .is_some_and(|l| l.to_lowercase().contains(&needle))
        });
    }

    let ranked = rank(rows, requested, location);
    let total = ranked.len() as i64;
    let donors = ranked
        .into_iter()
        .skip(page.offset() as usize)
        .take(page.limit as usize)
        .collect();

    Ok(MatchResult {
        total,
        page: page.page,
        limit: page.limit,
        donors,
    })
}

/// `GET /blood-requests/:id/compatible-donors` — ranked candidates for one
/// patient request, using the request's own blood type and location.
pub async fn compatible_donors_for_request(
    pool: &SqlitePool,
    request_id: i64,
    limit: Option<i64>,
) -> Result<MatchResult> {
    let request: Option<(String, Option<String>)> =
        sqlx::query_as("SELECT blood_type, location FROM blood_requests WHERE id = ?1")
            .bind(request_id)
            .fetch_optional(pool)
            .await?;
    let (raw_type, location) = request.ok_or(EngineError::NotFound("blood request", request_id))?;
    let requested = BloodType::parse(&raw_type)?;

    match_donors(
        pool,
        requested,
        location.as_deref(),
        None,
        Page::new(None, limit),
    )
    .await
}

// ─────────────────────────────────────────────────────────
// Overview / summary
// ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct TypeOverview {
    pub blood_type: BloodType,
    pub category: DonorCategory,
    pub donors: i64,
    pub pending_requests: i64,
    /// Pending requests a donor of this type could satisfy (forward relation).
    pub matching_requests: i64,
}

/// `GET /matching/overview` — per-type donor and request counts.
pub async fn overview(pool: &SqlitePool) -> Result<Vec<TypeOverview>> {
    let donor_counts: Vec<(String, i64)> =
        sqlx::query_as("SELECT blood_type, COUNT(*) FROM donors GROUP BY blood_type")
            .fetch_all(pool)
            .await?;
    let request_counts: Vec<(String, i64)> = sqlx::query_as(
        "SELECT blood_type, COUNT(*) FROM blood_requests WHERE status = 'pending' GROUP BY blood_type",
    )
    .fetch_all(pool)
    .await?;

    let count_for = |counts: &[(String, i64)], ty: BloodType| {
        counts
            .iter()
            .find(|(raw, _)| raw == ty.as_str())
            .map_or(0, |(_, n)| *n)
    };

    let out = ALL_BLOOD_TYPES
        .iter()
        .map(|&ty| TypeOverview {
            blood_type: ty,
            category: ty.category(),
            donors: count_for(&donor_counts, ty),
            pending_requests: count_for(&request_counts, ty),
            matching_requests: ALL_BLOOD_TYPES
                .iter()
                .filter(|&&r| ty.can_donate_to(r))
                .map(|&r| count_for(&request_counts, r))
                .sum(),
        })
        .collect();
    Ok(out)
}

#[derive(Debug, Serialize)]
pub struct MatchingSummary {
    pub total_donors: i64,
    pub universal_donors: i64,
    pub pending_requests: i64,
    pub urgent_pending_requests: i64,
    /// Pending requests with at least one registered eligible donor.
    pub matchable_requests: i64,
}

/// `GET /matching/summary` — aggregate matching statistics.
pub async fn summary(pool: &SqlitePool) -> Result<MatchingSummary> {
    let (total_donors,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM donors")
        .fetch_one(pool)
        .await?;
    let (universal_donors,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM donors WHERE blood_type = 'O-'")
            .fetch_one(pool)
            .await?;
    let (pending_requests, urgent_pending_requests): (i64, i64) = sqlx::query_as(
        r#"
        SELECT COUNT(*), SUM(CASE WHEN urgent THEN 1 ELSE 0 END)
        FROM   blood_requests WHERE status = 'pending'
        "#,
    )
    .fetch_optional(pool)
    .await?
    .map(|(a, b): (i64, Option<i64>)| (a, b.unwrap_or(0)))
    .unwrap_or((0, 0));

    let donor_counts: Vec<(String, i64)> =
        sqlx::query_as("SELECT blood_type, COUNT(*) FROM donors GROUP BY blood_type")
            .fetch_all(pool)
            .await?;
    let request_counts: Vec<(String, i64)> = sqlx::query_as(
        "SELECT blood_type, COUNT(*) FROM blood_requests WHERE status = 'pending' GROUP BY blood_type",
    )
    .fetch_all(pool)
    .await?;

    let matchable_requests = request_counts
        .iter()
        .filter_map(|(raw, n)| {
            let requested = BloodType::parse(raw).ok()?;
            let has_donor = requested.compatible_donor_types().iter().any(|d| {
                donor_counts
                    .iter()
                    .any(|(dt, dn)| dt == d.as_str() && *dn > 0)
            });
            has_donor.then_some(*n)
        })
        .sum();

    Ok(MatchingSummary {
        total_donors,
        universal_donors,
        pending_requests,
        urgent_pending_requests,
        matchable_requests,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::inventory::tests::seed_donor;
    use crate::models::now_ts;

    async fn seed_request(pool: &SqlitePool, blood_type: &str, status: &str, urgent: bool) -> i64 {
        sqlx::query(
            r#"
            INSERT INTO blood_requests (requester, blood_type, location, urgent, status, created_at)
            VALUES ('patient', ?1, 'Lagos', ?2, ?3, ?4)
            "#,
        )
        .bind(blood_type)
        .bind(urgent)
        .bind(status)
        .bind(now_ts())
        .execute(pool)
        .await
        .unwrap()
        .last_insert_rowid()
    }

    #[tokio::test]
    async fn ab_pos_request_ranks_exact_then_universal_then_compatible() {
        let pool = test_pool().await;
        let now = now_ts();
        // Registration order: A+, B+, O-, AB+.
        seed_donor(&pool, "a-pos", "A+", None, now).await;
        seed_donor(&pool, "b-pos", "B+", None, now + 1).await;
        seed_donor(&pool, "o-neg", "O-", None, now + 2).await;
        seed_donor(&pool, "ab-pos", "AB+", None, now + 3).await;

        let result = match_donors(&pool, BloodType::AbPos, None, None, Page::new(None, None))
            .await
            .unwrap();
        assert_eq!(result.total, 4);
        let names: Vec<&str> = result.donors.iter().map(|m| m.donor.name.as_str()).collect();
        assert_eq!(names, ["ab-pos", "o-neg", "a-pos", "b-pos"]);
        assert_eq!(result.donors[0].match_tier, MatchTier::Exact);
        assert_eq!(result.donors[1].match_tier, MatchTier::UniversalDonor);
        assert_eq!(result.donors[2].match_tier, MatchTier::Compatible);
    }

    #[tokio::test]
    async fn only_eligible_types_are_returned() {
        let pool = test_pool().await;
        let now = now_ts();
        seed_donor(&pool, "a-pos", "A+", None, now).await;
        seed_donor(&pool, "o-neg", "O-", None, now).await;
        seed_donor(&pool, "ab-pos", "AB+", None, now).await;

        // O- recipients accept only O- donors.
        let result = match_donors(&pool, BloodType::ONeg, None, None, Page::new(None, None))
            .await
            .unwrap();
        assert_eq!(result.total, 1);
        assert_eq!(result.donors[0].donor.name, "o-neg");
        assert_eq!(result.donors[0].match_tier, MatchTier::Exact);
    }

    #[tokio::test]
    async fn location_ranks_first_within_a_tier() {
        let pool = test_pool().await;
        let now = now_ts();
        seed_donor(&pool, "far-early", "A+", Some("Abuja"), now).await;
        seed_donor(&pool, "near-late", "A+", Some("Lagos"), now + 1).await;
        seed_donor(&pool, "near-uni", "O-", Some("Lagos"), now + 2).await;

        let result = match_donors(
            &pool,
            BloodType::APos,
            Some("Lagos"),
            None,
            Page::new(None, None),
        )
        .await
        .unwrap();
        let names: Vec<&str> = result.donors.iter().map(|m| m.donor.name.as_str()).collect();
        // Exact tier first (location-ordered inside it), then the universal donor.
        assert_eq!(names, ["near-late", "far-early", "near-uni"]);
    }

    #[tokio::test]
    async fn empty_pool_returns_zero_total_not_error() {
        let pool = test_pool().await;
        let result = match_donors(&pool, BloodType::BNeg, None, None, Page::new(None, None))
            .await
            .unwrap();
        assert_eq!(result.total, 0);
        assert!(result.donors.is_empty());
    }

    #[tokio::test]
    async fn pagination_preserves_total() {
        let pool = test_pool().await;
        let now = now_ts();
        for i in 0..5 {
            seed_donor(&pool, &format!("d{i}"), "O+", None, now + i).await;
        }
        let result = match_donors(
            &pool,
            BloodType::OPos,
            None,
            None,
            Page::new(Some(2), Some(2)),
        )
        .await
        .unwrap();
        assert_eq!(result.total, 5);
        assert_eq!(result.donors.len(), 2);
        assert_eq!(result.donors[0].donor.name, "d2");
    }

    #[tokio::test]
    async fn request_lookup_uses_request_type_and_location() {
        let pool = test_pool().await;
        let now = now_ts();
        seed_donor(&pool, "o-neg", "O-", Some("Lagos"), now).await;
        let request = seed_request(&pool, "A-", "pending", false).await;

        let result = compatible_donors_for_request(&pool, request, Some(10))
            .await
            .unwrap();
        assert_eq!(result.total, 1);
        assert_eq!(result.donors[0].donor.name, "o-neg");

        let err = compatible_donors_for_request(&pool, 9999, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(..)));
    }

    #[tokio::test]
    async fn overview_counts_inverse_matching_requests() {
        let pool = test_pool().await;
        let now = now_ts();
        seed_donor(&pool, "o-neg", "O-", None, now).await;
        seed_donor(&pool, "a-pos", "A+", None, now).await;
        seed_request(&pool, "A+", "pending", false).await;
        seed_request(&pool, "AB+", "pending", true).await;
        seed_request(&pool, "B+", "fulfilled", false).await; // not pending, ignored

        let rows = overview(&pool).await.unwrap();
        assert_eq!(rows.len(), 8);

        let o_neg = rows.iter().find(|r| r.blood_type == BloodType::ONeg).unwrap();
        // O- can serve every pending request.
        assert_eq!(o_neg.matching_requests, 2);
        assert_eq!(o_neg.category, DonorCategory::UniversalDonor);

        let a_pos = rows.iter().find(|r| r.blood_type == BloodType::APos).unwrap();
        // A+ serves A+ and AB+ requests.
        assert_eq!(a_pos.matching_requests, 2);
        assert_eq!(a_pos.pending_requests, 1);
        assert_eq!(a_pos.donors, 1);

        let b_neg = rows.iter().find(|r| r.blood_type == BloodType::BNeg).unwrap();
        // B- serves B-, B+, AB-, AB+ requests; only the AB+ one is pending.
        assert_eq!(b_neg.matching_requests, 1);
    }

    #[tokio::test]
    async fn summary_aggregates() {
        let pool = test_pool().await;
        let now = now_ts();
        seed_donor(&pool, "o-neg", "O-", None, now).await;
        seed_request(&pool, "A+", "pending", true).await;
        seed_request(&pool, "B-", "pending", false).await;

        let s = summary(&pool).await.unwrap();
        assert_eq!(s.total_donors, 1);
        assert_eq!(s.universal_donors, 1);
        assert_eq!(s.pending_requests, 2);
        assert_eq!(s.urgent_pending_requests, 1);
        // The lone O- donor can serve both pending requests.
        assert_eq!(s.matchable_requests, 2);
    }

    #[tokio::test]
    async fn invalid_requested_type_is_rejected_before_querying() {
        assert!(BloodType::parse("Z+").is_err());
    }
}
