use thiserror::Error;

pub type Result<T> = std::result::Result<T, MatchError>;

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Authentication required: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Trip is not open for new requests")]
    TripNotOpen,

    #[error("Shipment is not open")]
    ShipmentNotOpen,

    #[error("Shipment is already attached to an active request")]
    ShipmentAlreadyInUse,

    #[error("Shipment does not belong to the requester")]
    ShipmentNotOwner,

    #[error("Shipment is locked by a match and cannot be changed")]
    ShipmentLocked,

    #[error("Cannot send a request to your own trip")]
    CannotRequestOwn,

    #[error("Request is not pending")]
    RequestNotPending,

    #[error("Request has no counter offer to accept")]
    RequestNotCountered,

    #[error("Cannot move from {from} to {to}")]
    InvalidStatusTransition { from: String, to: String },

    #[error("Chat is locked until a request is accepted")]
    ChatLocked,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt stored data: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl MatchError {
    /// Stable machine-readable reason code surfaced to callers.
    pub fn code(&self) -> &'static str {
        match self {
            MatchError::Validation(_) => "validation_error",
            MatchError::Unauthorized(_) => "unauthorized",
            MatchError::Forbidden(_) => "forbidden",
            MatchError::NotFound(_) => "not_found",
            MatchError::TripNotOpen => "trip_not_open",
            MatchError::ShipmentNotOpen => "shipment_not_open",
            MatchError::ShipmentAlreadyInUse => "shipment_already_in_use",
            MatchError::ShipmentNotOwner => "shipment_not_owner",
            MatchError::ShipmentLocked => "shipment_locked",
            MatchError::CannotRequestOwn => "cannot_request_own",
            MatchError::RequestNotPending => "request_not_pending",
            MatchError::RequestNotCountered => "request_not_countered",
            MatchError::InvalidStatusTransition { .. } => "invalid_status_transition",
            MatchError::ChatLocked => "chat_locked",
            MatchError::Config(_)
            | MatchError::Database(_)
            | MatchError::Serialization(_)
            | MatchError::Decode(_)
            | MatchError::Io(_) => "server_error",
        }
    }

    /// True for failures the caller did not cause and cannot fix.
    pub fn is_internal(&self) -> bool {
        self.code() == "server_error"
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        MatchError::Forbidden(reason.into())
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        MatchError::Validation(reason.into())
    }
}

impl From<serde_json::Error> for MatchError {
    fn from(err: serde_json::Error) -> Self {
        MatchError::Serialization(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for MatchError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        MatchError::Unauthorized(err.to_string())
    }
}

/// Caller-supplied ids are parsed by the extractors, so a uuid failure that
/// reaches `?` comes from a stored row.
impl From<uuid::Error> for MatchError {
    fn from(err: uuid::Error) -> Self {
        MatchError::Decode(err.to_string())
    }
}

impl From<std::io::Error> for MatchError {
    fn from(err: std::io::Error) -> Self {
        MatchError::Io(err.to_string())
    }
}
