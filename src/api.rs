//! HTTP surface. Handlers stay thin: extract, call a service, wrap in JSON.

use crate::{
    auth::{Identity, MaybeIdentity, TokenIssuer},
    config::LimitsConfig,
    database::Database,
    listings::{ListingDetail, ListingService},
    messaging::{Conversation, MessageService},
    model::*,
    negotiation::NegotiationEngine,
    reviews::ReviewService,
    shipments::ShipmentService,
    ListingId, MatchError, RequestId, Result, ShipmentId, UserId,
};
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        FromRef, FromRequest, FromRequestParts, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, patch, post},
    Router,
};
use serde::Deserialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::error;

#[derive(Clone)]
pub struct AppState {
    pub tokens: TokenIssuer,
    pub listings: ListingService,
    pub shipments: ShipmentService,
    pub negotiation: NegotiationEngine,
    pub messages: MessageService,
    pub reviews: ReviewService,
}

impl AppState {
    pub fn new(db: Database, tokens: TokenIssuer, limits: LimitsConfig) -> Self {
        Self {
            tokens,
            listings: ListingService::new(db.clone(), limits.clone()),
            shipments: ShipmentService::new(db.clone(), limits.clone()),
            negotiation: NegotiationEngine::new(db.clone()),
            messages: MessageService::new(db.clone(), limits),
            reviews: ReviewService::new(db),
        }
    }
}

impl FromRef<AppState> for TokenIssuer {
    fn from_ref(state: &AppState) -> Self {
        state.tokens.clone()
    }
}

impl IntoResponse for MatchError {
    fn into_response(self) -> Response {
        let status = match &self {
            MatchError::Validation(_) => StatusCode::BAD_REQUEST,
            MatchError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            MatchError::Forbidden(_) | MatchError::ChatLocked => StatusCode::FORBIDDEN,
            MatchError::NotFound(_) => StatusCode::NOT_FOUND,
            e if e.is_internal() => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::CONFLICT,
        };

        let message = if self.is_internal() {
            error!(error = %self, "request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = serde_json::json!({
            "error": self.code(),
            "message": message,
        });
        (status, Json(body)).into_response()
    }
}

// Extractor rejections surface as `validation_error` with the usual JSON body.

#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(MatchError))]
struct JsonBody<T>(T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(MatchError))]
struct IdPath<T>(T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(MatchError))]
struct QueryParams<T>(T);

impl From<JsonRejection> for MatchError {
    fn from(rejection: JsonRejection) -> Self {
        MatchError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for MatchError {
    fn from(rejection: PathRejection) -> Self {
        MatchError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for MatchError {
    fn from(rejection: QueryRejection) -> Self {
        MatchError::Validation(rejection.body_text())
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/listings", post(create_listing).get(list_listings))
        .route(
            "/listings/:id",
            get(get_listing).patch(update_listing).delete(delete_listing),
        )
        .route("/listings/:id/status", post(advance_listing))
        .route(
            "/listings/:id/requests",
            post(open_request).get(list_listing_requests),
        )
        .route("/listings/:id/messages", get(list_messages).post(post_message))
        .route("/listings/:id/reviews", post(post_review).get(list_reviews))
        .route("/shipments", post(create_shipment).get(list_shipments))
        .route("/shipments/mine", get(list_my_shipments))
        .route(
            "/shipments/:id",
            get(get_shipment).patch(update_shipment).delete(delete_shipment),
        )
        .route("/shipments/:id/status", post(advance_shipment))
        .route("/requests/mine", get(list_my_requests))
        .route("/requests/:id", get(get_request))
        .route("/requests/:id/counter", post(counter_offer))
        .route("/requests/:id/accept-counter", post(accept_counter))
        .route("/requests/:id/accept", post(accept_request))
        .route("/requests/:id/reject", post(reject_request))
        .route("/requests/:id/cancel", post(cancel_request))
        .route("/requests/:id/note", patch(update_note))
        .route("/users/:id/rating", get(user_rating))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct StatusChange<T> {
    status: T,
}

#[derive(Debug, Deserialize)]
struct NoteBody {
    note: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageBody {
    body: String,
}

#[derive(Debug, Deserialize)]
struct Page {
    limit: Option<u32>,
    offset: Option<u32>,
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "healthy"}))
}

// Listings

async fn create_listing(
    State(state): State<AppState>,
    actor: Identity,
    JsonBody(input): JsonBody<NewListing>,
) -> Result<(StatusCode, Json<Listing>)> {
    let listing = state.listings.create(&actor, input).await?;
    Ok((StatusCode::CREATED, Json(listing)))
}

async fn list_listings(
    State(state): State<AppState>,
    QueryParams(filter): QueryParams<ListingFilter>,
) -> Result<Json<Vec<Listing>>> {
    Ok(Json(state.listings.list(filter).await?))
}

async fn get_listing(
    State(state): State<AppState>,
    MaybeIdentity(viewer): MaybeIdentity,
    IdPath(id): IdPath<ListingId>,
) -> Result<Json<ListingDetail>> {
    Ok(Json(state.listings.detail(id, viewer.as_ref()).await?))
}

async fn update_listing(
    State(state): State<AppState>,
    actor: Identity,
    IdPath(id): IdPath<ListingId>,
    JsonBody(update): JsonBody<ListingUpdate>,
) -> Result<Json<Listing>> {
    Ok(Json(state.listings.update(&actor, id, update).await?))
}

async fn delete_listing(
    State(state): State<AppState>,
    actor: Identity,
    IdPath(id): IdPath<ListingId>,
) -> Result<StatusCode> {
    state.listings.delete(&actor, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn advance_listing(
    State(state): State<AppState>,
    actor: Identity,
    IdPath(id): IdPath<ListingId>,
    JsonBody(change): JsonBody<StatusChange<ListingStatus>>,
) -> Result<Json<Listing>> {
    Ok(Json(state.listings.advance(&actor, id, change.status).await?))
}

// Shipments

async fn create_shipment(
    State(state): State<AppState>,
    actor: Identity,
    JsonBody(input): JsonBody<NewShipment>,
) -> Result<(StatusCode, Json<Shipment>)> {
    let shipment = state.shipments.create(&actor, input).await?;
    Ok((StatusCode::CREATED, Json(shipment)))
}

async fn list_shipments(
    State(state): State<AppState>,
    QueryParams(filter): QueryParams<ShipmentFilter>,
) -> Result<Json<Vec<Shipment>>> {
    Ok(Json(state.shipments.list_public(filter).await?))
}

async fn list_my_shipments(
    State(state): State<AppState>,
    actor: Identity,
    QueryParams(page): QueryParams<Page>,
) -> Result<Json<Vec<Shipment>>> {
    Ok(Json(
        state.shipments.list_mine(&actor, page.limit, page.offset).await?,
    ))
}

async fn get_shipment(
    State(state): State<AppState>,
    MaybeIdentity(viewer): MaybeIdentity,
    IdPath(id): IdPath<ShipmentId>,
) -> Result<Json<Shipment>> {
    Ok(Json(state.shipments.get(id, viewer.as_ref()).await?))
}

async fn update_shipment(
    State(state): State<AppState>,
    actor: Identity,
    IdPath(id): IdPath<ShipmentId>,
    JsonBody(update): JsonBody<ShipmentUpdate>,
) -> Result<Json<Shipment>> {
    Ok(Json(state.shipments.update(&actor, id, update).await?))
}

async fn delete_shipment(
    State(state): State<AppState>,
    actor: Identity,
    IdPath(id): IdPath<ShipmentId>,
) -> Result<StatusCode> {
    state.shipments.delete(&actor, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn advance_shipment(
    State(state): State<AppState>,
    actor: Identity,
    IdPath(id): IdPath<ShipmentId>,
    JsonBody(change): JsonBody<StatusChange<ShipmentStatus>>,
) -> Result<Json<Shipment>> {
    Ok(Json(state.shipments.advance(&actor, id, change.status).await?))
}

// Requests

async fn open_request(
    State(state): State<AppState>,
    actor: Identity,
    IdPath(listing_id): IdPath<ListingId>,
    JsonBody(submission): JsonBody<RequestSubmission>,
) -> Result<(StatusCode, Json<RequestOutcome>)> {
    let outcome = state
        .negotiation
        .open_request(&actor, listing_id, submission)
        .await?;
    let status = if outcome.already {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(outcome)))
}

async fn list_listing_requests(
    State(state): State<AppState>,
    actor: Identity,
    IdPath(listing_id): IdPath<ListingId>,
) -> Result<Json<Vec<MatchRequest>>> {
    Ok(Json(
        state.negotiation.list_for_listing(&actor, listing_id).await?,
    ))
}

async fn list_my_requests(
    State(state): State<AppState>,
    actor: Identity,
) -> Result<Json<Vec<MatchRequest>>> {
    Ok(Json(state.negotiation.list_mine(&actor).await?))
}

async fn get_request(
    State(state): State<AppState>,
    actor: Identity,
    IdPath(id): IdPath<RequestId>,
) -> Result<Json<MatchRequest>> {
    Ok(Json(state.negotiation.get(&actor, id).await?))
}

async fn counter_offer(
    State(state): State<AppState>,
    actor: Identity,
    IdPath(id): IdPath<RequestId>,
    JsonBody(input): JsonBody<CounterOfferInput>,
) -> Result<Json<MatchRequest>> {
    Ok(Json(state.negotiation.counter_offer(&actor, id, input).await?))
}

async fn accept_counter(
    State(state): State<AppState>,
    actor: Identity,
    IdPath(id): IdPath<RequestId>,
) -> Result<Json<MatchRequest>> {
    Ok(Json(state.negotiation.accept_counter(&actor, id).await?))
}

async fn accept_request(
    State(state): State<AppState>,
    actor: Identity,
    IdPath(id): IdPath<RequestId>,
) -> Result<Json<MatchRequest>> {
    Ok(Json(state.negotiation.accept(&actor, id).await?))
}

async fn reject_request(
    State(state): State<AppState>,
    actor: Identity,
    IdPath(id): IdPath<RequestId>,
) -> Result<Json<MatchRequest>> {
    Ok(Json(state.negotiation.reject(&actor, id).await?))
}

async fn cancel_request(
    State(state): State<AppState>,
    actor: Identity,
    IdPath(id): IdPath<RequestId>,
) -> Result<Json<MatchRequest>> {
    Ok(Json(state.negotiation.cancel(&actor, id).await?))
}

async fn update_note(
    State(state): State<AppState>,
    actor: Identity,
    IdPath(id): IdPath<RequestId>,
    JsonBody(body): JsonBody<NoteBody>,
) -> Result<Json<MatchRequest>> {
    Ok(Json(state.negotiation.update_note(&actor, id, body.note).await?))
}

// Chat and reviews

async fn list_messages(
    State(state): State<AppState>,
    MaybeIdentity(viewer): MaybeIdentity,
    IdPath(listing_id): IdPath<ListingId>,
) -> Result<Json<Conversation>> {
    Ok(Json(state.messages.list(listing_id, viewer.as_ref()).await?))
}

async fn post_message(
    State(state): State<AppState>,
    actor: Identity,
    IdPath(listing_id): IdPath<ListingId>,
    JsonBody(body): JsonBody<MessageBody>,
) -> Result<(StatusCode, Json<Message>)> {
    let message = state.messages.post(&actor, listing_id, &body.body).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn post_review(
    State(state): State<AppState>,
    actor: Identity,
    IdPath(listing_id): IdPath<ListingId>,
    JsonBody(input): JsonBody<NewReview>,
) -> Result<(StatusCode, Json<Review>)> {
    let review = state.reviews.post(&actor, listing_id, input).await?;
    Ok((StatusCode::CREATED, Json(review)))
}

async fn list_reviews(
    State(state): State<AppState>,
    IdPath(listing_id): IdPath<ListingId>,
) -> Result<Json<Vec<Review>>> {
    Ok(Json(state.reviews.list_for_listing(listing_id).await?))
}

async fn user_rating(
    State(state): State<AppState>,
    IdPath(user_id): IdPath<UserId>,
) -> Result<Json<RatingSummary>> {
    Ok(Json(state.reviews.rating_for_user(user_id).await?))
}
