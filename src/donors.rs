//! Donor catalog — registration and the read-side projection the matching
//! engine queries.

use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::blood::BloodType;
use crate::errors::Result;
use crate::models::{DonorRow, Page};

const DONOR_COLUMNS: &str = "id, name, blood_type, preferred_location, registered_at";

#[derive(Debug, Default, Clone)]
pub struct DonorFilter {
    pub blood_type: Option<BloodType>,
    /// Case-insensitive substring match on name or location.
    pub search: Option<String>,
    pub preferred_location: Option<String>,
}

/// Register a donor. The declared blood type is immutable afterwards;
/// re-typing is a medical event handled outside this system.
pub async fn register_donor(
    pool: &SqlitePool,
    name: &str,
    blood_type: BloodType,
    preferred_location: Option<&str>,
    now: i64,
) -> Result<DonorRow> {
    let row = sqlx::query_as::<_, DonorRow>(&format!(
        r#"
        INSERT INTO donors (name, blood_type, preferred_location, registered_at)
        VALUES (?1, ?2, ?3, ?4)
        RETURNING {DONOR_COLUMNS}
        "#
    ))
    .bind(name)
    .bind(blood_type.as_str())
    .bind(preferred_location)
    .bind(now)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Paginated donor listing. `total` counts the full filtered set, not the page.
pub async fn list_donors(
    pool: &SqlitePool,
    filter: &DonorFilter,
    page: Page,
) -> Result<(Vec<DonorRow>, i64)> {
    let (total,): (i64,) = filtered_query("SELECT COUNT(*) FROM donors", filter)
        .build_query_as()
        .fetch_one(pool)
        .await?;

    let mut qb = filtered_query(&format!("SELECT {DONOR_COLUMNS} FROM donors"), filter);
    qb.push(" ORDER BY registered_at ASC, id ASC LIMIT ")
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset());
    let rows = qb.build_query_as::<DonorRow>().fetch_all(pool).await?;

    Ok((rows, total))
}

/// All donors whose blood type is in `types`, registration order. Used by the
/// matching engine, which ranks in memory.
pub async fn donors_of_types(pool: &SqlitePool, types: &[BloodType]) -> Result<Vec<DonorRow>> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "SELECT {DONOR_COLUMNS} FROM donors WHERE blood_type IN ("
    ));
    let mut sep = qb.separated(", ");
    for ty in types {
        sep.push_bind(ty.as_str());
    }
    qb.push(") ORDER BY registered_at ASC, id ASC");

    let rows = qb.build_query_as::<DonorRow>().fetch_all(pool).await?;
    Ok(rows)
}

fn filtered_query<'a>(select: &str, filter: &'a DonorFilter) -> QueryBuilder<'a, Sqlite> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!("{select} WHERE 1 = 1"));
    if let Some(bt) = filter.blood_type {
        qb.push(" AND blood_type = ").push_bind(bt.as_str());
    }
    if let Some(search) = &filter.search {
        let pattern = format!("%{search}%");
        qb.push(" AND (name LIKE ")
            .push_bind(pattern.clone())
            .push(" COLLATE NOCASE OR preferred_location LIKE ")
            .push_bind(pattern)
            .push(" COLLATE NOCASE)");
    }
    if let Some(location) = &filter.preferred_location {
        qb.push(" AND preferred_location = ").push_bind(location.as_str());
    }
    qb
}
