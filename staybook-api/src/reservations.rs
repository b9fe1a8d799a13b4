use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use staybook_core::search::Trips;
use staybook_core::{DateRange, Reservation};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::{require_auth, AuthUser};
use crate::state::AppState;

pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/v1/reservations", post(create_reservation))
        .route("/v1/reservations/{id}", get(get_reservation))
        .route("/v1/reservations/{id}/confirm", post(confirm_reservation))
        .route("/v1/reservations/{id}/cancel", post(cancel_reservation))
        .route("/v1/reservations/{id}/review-eligibility", get(review_eligibility))
        .route("/v1/reservations/{id}/guest-review", post(mark_guest_reviewed))
        .route("/v1/trips", get(list_trips))
        .route_layer(middleware::from_fn_with_state(state, require_auth))
}

#[derive(Debug, Deserialize)]
pub struct CreateReservationRequest {
    pub listing_id: Uuid,
    pub check_in: String,
    pub check_out: String,
}

#[derive(Debug, Serialize)]
pub struct ReviewEligibilityResponse {
    pub reservation_id: Uuid,
    pub listing_id: Uuid,
    pub eligible: bool,
}

async fn create_reservation(
    State(state): State<AppState>,
    Extension(AuthUser(guest_id)): Extension<AuthUser>,
    Json(req): Json<CreateReservationRequest>,
) -> Result<(StatusCode, Json<Reservation>), AppError> {
    let range = DateRange::parse(&req.check_in, &req.check_out)?;
    let today = Utc::now().date_naive();

    let reservation = state
        .booking
        .create_reservation(req.listing_id, guest_id, &range, today)
        .await?;

    Ok((StatusCode::CREATED, Json(reservation)))
}

async fn get_reservation(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Reservation>, AppError> {
    let reservation = state.booking.get_reservation(id, user_id).await?;
    Ok(Json(reservation))
}

async fn confirm_reservation(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Reservation>, AppError> {
    let reservation = state.booking.confirm_reservation(id, user_id).await?;
    Ok(Json(reservation))
}

async fn cancel_reservation(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Reservation>, AppError> {
    let reservation = state.booking.cancel_reservation(id, user_id).await?;
    Ok(Json(reservation))
}

async fn review_eligibility(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReviewEligibilityResponse>, AppError> {
    let reservation = state.booking.review_eligibility(id, user_id).await?;
    Ok(Json(ReviewEligibilityResponse {
        reservation_id: reservation.id,
        listing_id: reservation.listing_id,
        eligible: true,
    }))
}

async fn mark_guest_reviewed(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.booking.mark_guest_reviewed(id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_trips(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<Json<Trips>, AppError> {
    let trips = state.booking.trips(user_id, Utc::now().date_naive()).await?;
    Ok(Json(trips))
}
