use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::HashSet;
use tracing::{error, warn};
use uuid::Uuid;

use staybook_core::availability;
use staybook_core::repository::ReservationRepository;
use staybook_core::search::{ListingSearch, SearchPage};
use staybook_core::{CoreError, CoreResult, DateRange, Listing, Reservation, ReservationStatus};

use crate::app_config::DatabaseConfig;

const LISTING_COLUMNS: &str = "l.id, l.host_id, l.title, l.city, l.state, l.country, l.price, l.weekend_price, \
     l.guest_count, l.bedroom_count, l.bed_count, l.bathroom_count, l.category_id, l.privacy_type_id, \
     l.amenity_ids, l.host_type, l.is_published, l.is_listed, l.created_at";

const RESERVATION_COLUMNS: &str = "r.id, r.listing_id, r.guest_id, r.check_in_date, r.check_out_date, r.status, \
     r.total_price, r.nights, r.price_per_night, r.confirmation_code, r.guest_reviewed_host, r.created_at, r.updated_at";

pub struct PgReservationRepository {
    pool: PgPool,
    lock_timeout_ms: u64,
    statement_timeout_ms: u64,
}

impl PgReservationRepository {
    pub fn new(pool: PgPool, config: &DatabaseConfig) -> Self {
        Self {
            pool,
            lock_timeout_ms: config.lock_timeout_ms,
            statement_timeout_ms: config.statement_timeout_ms,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ListingRow {
    id: Uuid,
    host_id: Uuid,
    title: String,
    city: Option<String>,
    state: Option<String>,
    country: Option<String>,
    price: i64,
    weekend_price: Option<i64>,
    guest_count: i32,
    bedroom_count: i32,
    bed_count: i32,
    bathroom_count: i32,
    category_id: Option<Uuid>,
    privacy_type_id: Option<Uuid>,
    amenity_ids: Vec<Uuid>,
    host_type: Option<String>,
    is_published: bool,
    is_listed: bool,
    created_at: DateTime<Utc>,
}

impl From<ListingRow> for Listing {
    fn from(row: ListingRow) -> Self {
        Listing {
            id: row.id,
            host_id: row.host_id,
            title: row.title,
            city: row.city,
            state: row.state,
            country: row.country,
            price: row.price,
            weekend_price: row.weekend_price,
            guest_count: row.guest_count,
            bedroom_count: row.bedroom_count,
            bed_count: row.bed_count,
            bathroom_count: row.bathroom_count,
            category_id: row.category_id,
            privacy_type_id: row.privacy_type_id,
            amenity_ids: row.amenity_ids,
            host_type: row.host_type,
            is_published: row.is_published,
            is_listed: row.is_listed,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ReservationRow {
    id: Uuid,
    listing_id: Uuid,
    guest_id: Uuid,
    check_in_date: NaiveDate,
    check_out_date: NaiveDate,
    status: String,
    total_price: i64,
    nights: i32,
    price_per_night: i64,
    confirmation_code: String,
    guest_reviewed_host: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = CoreError;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<ReservationStatus>()
            .map_err(|e| CoreError::Storage(format!("reservation {}: {}", row.id, e)))?;
        Ok(Reservation {
            id: row.id,
            listing_id: row.listing_id,
            guest_id: row.guest_id,
            check_in_date: row.check_in_date,
            check_out_date: row.check_out_date,
            status,
            total_price: row.total_price,
            nights: row.nights,
            price_per_night: row.price_per_night,
            confirmation_code: row.confirmation_code,
            guest_reviewed_host: row.guest_reviewed_host,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_reservations(rows: Vec<ReservationRow>) -> CoreResult<Vec<Reservation>> {
    rows.into_iter().map(Reservation::try_from).collect()
}

/// The one SQL rendering of `DateRange::overlaps` restricted to active
/// reservations. Expects the reservations table aliased as `r`.
fn push_active_overlap(qb: &mut QueryBuilder<'_, Postgres>, range: &DateRange) {
    qb.push("r.status IN ('pending', 'confirmed') AND r.check_in_date < ")
        .push_bind(range.to())
        .push(" AND ")
        .push_bind(range.from())
        .push(" < r.check_out_date");
}

fn active_overlap_query(listing_id: Uuid, range: &DateRange) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!("SELECT {} FROM reservations r WHERE r.listing_id = ", RESERVATION_COLUMNS));
    qb.push_bind(listing_id).push(" AND ");
    push_active_overlap(&mut qb, range);
    qb.push(" ORDER BY r.check_in_date");
    qb
}

/// Escapes LIKE metacharacters so user input only ever matches literally.
fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

fn push_search_filters(qb: &mut QueryBuilder<'_, Postgres>, query: &ListingSearch) {
    qb.push(" WHERE l.is_published AND l.is_listed");

    if let Some(term) = query.location_pattern() {
        let pattern = like_pattern(&term);
        qb.push(" AND (");
        for (i, column) in ["l.city", "l.state", "l.country", "l.title"].iter().enumerate() {
            if i > 0 {
                qb.push(" OR ");
            }
            qb.push(*column).push(" ILIKE ").push_bind(pattern.clone()).push(" ESCAPE '\\'");
        }
        qb.push(")");
    }

    let minimums = [
        ("l.guest_count", query.guests),
        ("l.bedroom_count", query.bedrooms),
        ("l.bed_count", query.beds),
        ("l.bathroom_count", query.bathrooms),
    ];
    for (column, min) in minimums {
        if let Some(min) = min.filter(|m| *m > 0) {
            qb.push(" AND ").push(column).push(" >= ").push_bind(min);
        }
    }

    if let Some(min) = query.min_price {
        qb.push(" AND l.price >= ").push_bind(min);
    }
    if let Some(max) = query.max_price {
        qb.push(" AND l.price <= ").push_bind(max);
    }

    if !query.category_ids.is_empty() {
        qb.push(" AND l.category_id = ANY(").push_bind(query.category_ids.clone()).push(")");
    }
    if !query.privacy_type_ids.is_empty() {
        qb.push(" AND l.privacy_type_id = ANY(").push_bind(query.privacy_type_ids.clone()).push(")");
    }
    if !query.amenity_ids.is_empty() {
        qb.push(" AND l.amenity_ids @> ").push_bind(query.amenity_ids.clone());
    }
    if !query.host_types.is_empty() {
        qb.push(" AND l.host_type = ANY(").push_bind(query.host_types.clone()).push(")");
    }

    if let Some(range) = &query.range {
        qb.push(" AND NOT EXISTS (SELECT 1 FROM reservations r WHERE r.listing_id = l.id AND ");
        push_active_overlap(qb, range);
        qb.push(")");
    }
}

fn storage(e: sqlx::Error) -> CoreError {
    error!("Database error: {}", e);
    CoreError::Storage(e.to_string())
}

/// Maps failures of the booking transaction. Overlap and serialization
/// failures are conflicts; lock and statement timeouts are storage errors.
fn map_insert_error(e: sqlx::Error, listing_id: Uuid) -> CoreError {
    if let sqlx::Error::Database(db) = &e {
        match db.code().as_deref() {
            Some("23P01") | Some("40001") => {
                warn!("Overlap rejected by database for listing {}: {}", listing_id, db.message());
                return CoreError::Conflict { listing_id, conflicting: None };
            }
            Some("23505") if db.constraint() == Some("reservations_confirmation_code_key") => {
                return CoreError::DuplicateCode;
            }
            Some("55P03") | Some("57014") => {
                warn!("Booking transaction timed out for listing {}: {}", listing_id, db.message());
                return CoreError::Storage(format!("timed out booking listing {}", listing_id));
            }
            _ => {}
        }
    }
    storage(e)
}

#[async_trait]
impl ReservationRepository for PgReservationRepository {
    async fn get_listing(&self, id: Uuid) -> CoreResult<Option<Listing>> {
        let row = sqlx::query_as::<_, ListingRow>(&format!("SELECT {} FROM listings l WHERE l.id = $1", LISTING_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        Ok(row.map(Listing::from))
    }

    async fn get_reservation(&self, id: Uuid) -> CoreResult<Option<Reservation>> {
        let row = sqlx::query_as::<_, ReservationRow>(&format!(
            "SELECT {} FROM reservations r WHERE r.id = $1",
            RESERVATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;
        row.map(Reservation::try_from).transpose()
    }

    async fn active_overlapping(&self, listing_id: Uuid, range: &DateRange) -> CoreResult<Vec<Reservation>> {
        let mut qb = active_overlap_query(listing_id, range);
        let rows = qb
            .build_query_as::<ReservationRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        into_reservations(rows)
    }

    async fn reservations_for_listing(&self, listing_id: Uuid) -> CoreResult<Vec<Reservation>> {
        let rows = sqlx::query_as::<_, ReservationRow>(&format!(
            "SELECT {} FROM reservations r WHERE r.listing_id = $1 ORDER BY r.check_in_date",
            RESERVATION_COLUMNS
        ))
        .bind(listing_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        into_reservations(rows)
    }

    async fn reservations_for_guest(&self, guest_id: Uuid) -> CoreResult<Vec<Reservation>> {
        let rows = sqlx::query_as::<_, ReservationRow>(&format!(
            "SELECT {} FROM reservations r WHERE r.guest_id = $1 ORDER BY r.check_in_date",
            RESERVATION_COLUMNS
        ))
        .bind(guest_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        into_reservations(rows)
    }

    async fn listings_with_conflicts(&self, listing_ids: &[Uuid], range: &DateRange) -> CoreResult<HashSet<Uuid>> {
        if listing_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let mut qb = QueryBuilder::<Postgres>::new("SELECT DISTINCT r.listing_id FROM reservations r WHERE r.listing_id = ANY(");
        qb.push_bind(listing_ids.to_vec()).push(") AND ");
        push_active_overlap(&mut qb, range);

        let ids = qb
            .build_query_scalar::<Uuid>()
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        Ok(ids.into_iter().collect())
    }

    async fn search_listings(&self, query: &ListingSearch) -> CoreResult<SearchPage> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM listings l");
        push_search_filters(&mut count, query);
        let total = count
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?;

        let mut select = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM listings l", LISTING_COLUMNS));
        push_search_filters(&mut select, query);
        select
            .push(" ORDER BY l.created_at DESC, l.id LIMIT ")
            .push_bind(i64::from(query.limit()))
            .push(" OFFSET ")
            .push_bind(i64::from(query.offset()));
        let rows = select
            .build_query_as::<ListingRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;

        Ok(SearchPage {
            listings: rows.into_iter().map(Listing::from).collect(),
            total,
        })
    }

    async fn insert_guarded(&self, reservation: &Reservation) -> CoreResult<()> {
        let listing_id = reservation.listing_id;
        let range = reservation.range();
        let mut tx = self.pool.begin().await.map_err(storage)?;

        // SET LOCAL takes no bind parameters; both values are integers from config.
        sqlx::query(&format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout_ms))
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        sqlx::query(&format!("SET LOCAL statement_timeout = '{}ms'", self.statement_timeout_ms))
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

        // Serialises writers per listing for the rest of the transaction.
        let locked: Option<Uuid> = sqlx::query_scalar("SELECT id FROM listings WHERE id = $1 FOR UPDATE")
            .bind(listing_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_insert_error(e, listing_id))?;
        if locked.is_none() {
            return Err(CoreError::NotFound(format!("listing {}", listing_id)));
        }

        let mut qb = active_overlap_query(listing_id, &range);
        let rows = qb
            .build_query_as::<ReservationRow>()
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_insert_error(e, listing_id))?;
        let existing = into_reservations(rows)?;
        if let Some(conflict) = availability::find_conflict(&existing, &range) {
            return Err(CoreError::Conflict {
                listing_id,
                conflicting: Some(conflict.id),
            });
        }

        sqlx::query(
            r#"
            INSERT INTO reservations (
                id, listing_id, guest_id, check_in_date, check_out_date, status,
                total_price, nights, price_per_night, confirmation_code,
                guest_reviewed_host, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(reservation.id)
        .bind(listing_id)
        .bind(reservation.guest_id)
        .bind(reservation.check_in_date)
        .bind(reservation.check_out_date)
        .bind(reservation.status.as_str())
        .bind(reservation.total_price)
        .bind(reservation.nights)
        .bind(reservation.price_per_night)
        .bind(&reservation.confirmation_code)
        .bind(reservation.guest_reviewed_host)
        .bind(reservation.created_at)
        .bind(reservation.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_insert_error(e, listing_id))?;

        tx.commit().await.map_err(|e| map_insert_error(e, listing_id))?;
        Ok(())
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: ReservationStatus,
        to: ReservationStatus,
        at: DateTime<Utc>,
    ) -> CoreResult<bool> {
        let result = sqlx::query("UPDATE reservations SET status = $1, updated_at = $2 WHERE id = $3 AND status = $4")
            .bind(to.as_str())
            .bind(at)
            .bind(id)
            .bind(from.as_str())
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(result.rows_affected() == 1)
    }

    async fn complete_elapsed(&self, today: NaiveDate, at: DateTime<Utc>) -> CoreResult<u64> {
        let result = sqlx::query(
            "UPDATE reservations SET status = 'completed', updated_at = $1 \
             WHERE status IN ('pending', 'confirmed') AND check_out_date <= $2",
        )
        .bind(at)
        .bind(today)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(result.rows_affected())
    }

    async fn expire_pending_before(&self, cutoff: DateTime<Utc>, at: DateTime<Utc>) -> CoreResult<u64> {
        let result = sqlx::query(
            "UPDATE reservations SET status = 'cancelled', updated_at = $1 \
             WHERE status = 'pending' AND created_at < $2",
        )
        .bind(at)
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(result.rows_affected())
    }

    async fn mark_guest_reviewed(&self, id: Uuid, at: DateTime<Utc>) -> CoreResult<bool> {
        let result = sqlx::query(
            "UPDATE reservations SET guest_reviewed_host = TRUE, updated_at = $1 \
             WHERE id = $2 AND status = 'completed' AND NOT guest_reviewed_host",
        )
        .bind(at)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(result.rows_affected() == 1)
    }
}
