//! # tripmatch
//!
//! Matching and negotiation engine between travelers with spare luggage
//! capacity and senders with shipments to move.
//!
//! ## Architecture
//!
//! - **Listings / Shipments**: owner-managed catalog rows with soft delete
//! - **Negotiation**: request lifecycle (offer, counter, accept) as one atomic unit per move
//! - **Gate**: chat access derived from request state
//! - **Messaging / Reviews**: gated chat and post-trip ratings
//! - **API**: axum router with bearer-token identities

pub mod api;
pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod gate;
pub mod listings;
pub mod messaging;
pub mod model;
pub mod negotiation;
pub mod reviews;
pub mod shipments;
pub mod transitions;

pub use api::{router, AppState};
pub use auth::{Identity, TokenIssuer};
pub use config::AppConfig;
pub use database::Database;
pub use error::{MatchError, Result};
pub use gate::{chat_access, ChatAccess, LockReason};
pub use model::{
    Listing, ListingStatus, MatchRequest, Message, RequestStatus, Review, Shipment, ShipmentStatus,
};
pub use negotiation::NegotiationEngine;

pub type ListingId = uuid::Uuid;
pub type ShipmentId = uuid::Uuid;
pub type RequestId = uuid::Uuid;
pub type UserId = uuid::Uuid;
