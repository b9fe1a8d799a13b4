use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use staybook_core::pricing::Quote;
use staybook_core::search::{ListingSearch, SearchPage};
use staybook_core::DateRange;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

const DEFAULT_CALENDAR_DAYS: i64 = 90;
const MAX_CALENDAR_DAYS: i64 = 366;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/listings/search", get(search_listings))
        .route("/v1/listings/{id}/availability", get(check_availability))
        .route("/v1/listings/{id}/quote", get(quote_stay))
        .route("/v1/listings/{id}/calendar", get(listing_calendar))
}

#[derive(Debug, Deserialize)]
pub struct StayParams {
    pub check_in: String,
    pub check_out: String,
}

impl StayParams {
    fn range(&self) -> Result<DateRange, AppError> {
        Ok(DateRange::parse(&self.check_in, &self.check_out)?)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    pub location: Option<String>,
    pub guests: Option<i32>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub bedrooms: Option<i32>,
    pub beds: Option<i32>,
    pub bathrooms: Option<i32>,
    /// Comma-separated ids
    pub category_ids: Option<String>,
    pub privacy_type_ids: Option<String>,
    pub amenity_ids: Option<String>,
    /// Comma-separated
    pub host_types: Option<String>,
    pub check_in: Option<String>,
    pub check_out: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

fn split_list(raw: Option<&str>) -> impl Iterator<Item = &str> {
    raw.unwrap_or_default().split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_ids(raw: Option<&str>) -> Result<Vec<Uuid>, AppError> {
    split_list(raw)
        .map(|s| Uuid::parse_str(s).map_err(|_| AppError::ValidationError(format!("not an id: {:?}", s))))
        .collect()
}

impl TryFrom<SearchParams> for ListingSearch {
    type Error = AppError;

    fn try_from(params: SearchParams) -> Result<Self, Self::Error> {
        let range = match (params.check_in.as_deref(), params.check_out.as_deref()) {
            (Some(from), Some(to)) => Some(DateRange::parse(from, to)?),
            (None, None) => None,
            _ => {
                return Err(AppError::ValidationError(
                    "check_in and check_out must be given together".to_string(),
                ))
            }
        };

        Ok(ListingSearch {
            location: params.location,
            guests: params.guests,
            min_price: params.min_price,
            max_price: params.max_price,
            bedrooms: params.bedrooms,
            beds: params.beds,
            bathrooms: params.bathrooms,
            category_ids: parse_ids(params.category_ids.as_deref())?,
            privacy_type_ids: parse_ids(params.privacy_type_ids.as_deref())?,
            amenity_ids: parse_ids(params.amenity_ids.as_deref())?,
            host_types: split_list(params.host_types.as_deref()).map(str::to_string).collect(),
            range,
            limit: params.limit,
            offset: params.offset,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct AvailabilityResponse {
    pub listing_id: Uuid,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub available: bool,
    pub quote: Quote,
}

#[derive(Debug, Deserialize)]
pub struct CalendarParams {
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CalendarResponse {
    pub listing_id: Uuid,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub disabled_dates: Vec<NaiveDate>,
}

async fn search_listings(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchPage>, AppError> {
    let query = ListingSearch::try_from(params)?;
    if let Some(range) = &query.range {
        range.ensure_not_past(Utc::now().date_naive())?;
    }
    let page = state.booking.search(&query).await?;
    Ok(Json(page))
}

async fn check_availability(
    State(state): State<AppState>,
    Path(listing_id): Path<Uuid>,
    Query(params): Query<StayParams>,
) -> Result<Json<AvailabilityResponse>, AppError> {
    let range = params.range()?;
    let today = Utc::now().date_naive();

    let available = state.booking.is_available(listing_id, &range, today).await?;
    let quote = state.booking.quote(listing_id, &range).await?;

    Ok(Json(AvailabilityResponse {
        listing_id,
        check_in: range.from(),
        check_out: range.to(),
        available,
        quote,
    }))
}

async fn quote_stay(
    State(state): State<AppState>,
    Path(listing_id): Path<Uuid>,
    Query(params): Query<StayParams>,
) -> Result<Json<Quote>, AppError> {
    let range = params.range()?;
    let quote = state.booking.quote(listing_id, &range).await?;
    Ok(Json(quote))
}

async fn listing_calendar(
    State(state): State<AppState>,
    Path(listing_id): Path<Uuid>,
    Query(params): Query<CalendarParams>,
) -> Result<Json<CalendarResponse>, AppError> {
    let today = Utc::now().date_naive();
    let window = match (params.from.as_deref(), params.to.as_deref()) {
        (Some(from), Some(to)) => DateRange::parse(from, to)?,
        (None, None) => DateRange::new(today, today + Duration::days(DEFAULT_CALENDAR_DAYS))?,
        _ => return Err(AppError::ValidationError("from and to must be given together".to_string())),
    };
    if window.nights() > MAX_CALENDAR_DAYS {
        return Err(AppError::ValidationError(format!(
            "calendar window is limited to {} days",
            MAX_CALENDAR_DAYS
        )));
    }

    let disabled = state.booking.calendar(listing_id, today).await?;

    Ok(Json(CalendarResponse {
        listing_id,
        from: window.from(),
        to: window.to(),
        disabled_dates: disabled.dates_between(&window),
    }))
}
