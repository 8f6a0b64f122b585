use crate::{ListingId, MatchError, RequestId, Result, ShipmentId, UserId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_CURRENCY: &str = "USD";
pub const MAX_MESSAGE_LEN: usize = 4000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Money {
    pub amount: f64,
    pub currency: String,
}

impl Money {
    /// Builds a positive amount; a blank currency falls back to `fallback`.
    pub fn new(amount: f64, currency: Option<&str>, fallback: &str) -> Result<Self> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(MatchError::validation("Amount must be greater than 0"));
        }
        Ok(Self {
            amount,
            currency: normalize_currency(currency, fallback)?,
        })
    }
}

fn normalize_currency(currency: Option<&str>, fallback: &str) -> Result<String> {
    let code = match currency.map(str::trim) {
        Some(c) if !c.is_empty() => c.to_ascii_uppercase(),
        _ => fallback.to_string(),
    };
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(MatchError::validation(format!("Invalid currency code: {}", code)));
    }
    Ok(code)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub from_country: String,
    pub from_city: String,
    pub to_country: String,
    pub to_city: String,
}

impl Route {
    pub fn validate(&self) -> Result<()> {
        if self.from_country.trim().is_empty() || self.to_country.trim().is_empty() {
            return Err(MatchError::validation("Route needs both a from and a to country"));
        }
        Ok(())
    }

    fn merge(&mut self, update: RouteUpdate) {
        merge_text(&mut self.from_country, update.from_country);
        merge_text(&mut self.from_city, update.from_city);
        merge_text(&mut self.to_country, update.to_country);
        merge_text(&mut self.to_city, update.to_city);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteUpdate {
    pub from_country: Option<String>,
    pub from_city: Option<String>,
    pub to_country: Option<String>,
    pub to_city: Option<String>,
}

macro_rules! status_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = MatchError;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(MatchError::Validation(format!(
                        "Invalid {}: {}",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

status_enum!(ListingRole {
    Traveler => "traveler",
});

status_enum!(ListingStatus {
    Open => "open",
    Matched => "matched",
    InTransit => "in_transit",
    Delivered => "delivered",
    Completed => "completed",
    Cancelled => "cancelled",
});

status_enum!(ShipmentStatus {
    Open => "open",
    Matched => "matched",
    Cancelled => "cancelled",
    Completed => "completed",
});

status_enum!(RequestStatus {
    Pending => "pending",
    CounterOffer => "counter_offer",
    Accepted => "accepted",
    Rejected => "rejected",
    Cancelled => "cancelled",
});

impl ListingStatus {
    /// Transitions an owner may drive. `Matched` is reached only through acceptance.
    pub fn can_advance_to(self, next: ListingStatus) -> bool {
        use ListingStatus::*;
        matches!(
            (self, next),
            (Open, Cancelled)
                | (Open, Completed)
                | (Matched, InTransit)
                | (Matched, Cancelled)
                | (Matched, Completed)
                | (InTransit, Delivered)
                | (Delivered, Completed)
        )
    }
}

impl ShipmentStatus {
    pub fn is_locked(self) -> bool {
        !matches!(self, ShipmentStatus::Open)
    }

    pub fn can_advance_to(self, next: ShipmentStatus) -> bool {
        use ShipmentStatus::*;
        matches!((self, next), (Open, Cancelled) | (Matched, Completed))
    }
}

impl RequestStatus {
    /// Statuses that hold a claim on the attached shipment.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            RequestStatus::Pending | RequestStatus::CounterOffer | RequestStatus::Accepted
        )
    }

    /// Statuses still open to a decision by either side.
    pub fn is_negotiable(self) -> bool {
        matches!(self, RequestStatus::Pending | RequestStatus::CounterOffer)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub id: ListingId,
    pub owner_id: UserId,
    pub role: ListingRole,
    pub route: Route,
    pub depart_on: NaiveDate,
    pub arrive_by: Option<NaiveDate>,
    pub available_weight: f64,
    pub reward: Money,
    pub item_type: String,
    pub description: String,
    pub status: ListingStatus,
    pub is_active: bool,
    pub extra: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewListing {
    pub role: Option<String>,
    pub route: Route,
    pub depart_on: NaiveDate,
    pub arrive_by: Option<NaiveDate>,
    pub available_weight: f64,
    pub reward_amount: f64,
    pub reward_currency: Option<String>,
    #[serde(default)]
    pub item_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub extra: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListingUpdate {
    #[serde(default)]
    pub route: RouteUpdate,
    pub depart_on: Option<NaiveDate>,
    pub arrive_by: Option<NaiveDate>,
    pub available_weight: Option<f64>,
    pub reward_amount: Option<f64>,
    pub reward_currency: Option<String>,
    pub item_type: Option<String>,
    pub description: Option<String>,
    pub extra: Option<serde_json::Value>,
}

impl Listing {
    pub fn create(owner_id: UserId, input: NewListing) -> Result<Self> {
        let role = match input.role.as_deref().map(str::trim) {
            None | Some("") => ListingRole::Traveler,
            Some(role) => role.parse()?,
        };
        input.route.validate()?;
        validate_window(input.depart_on, input.arrive_by)?;
        validate_weight(input.available_weight)?;
        let now = Utc::now();
        Ok(Self {
            id: uuid::Uuid::new_v4(),
            owner_id,
            role,
            route: input.route,
            depart_on: input.depart_on,
            arrive_by: input.arrive_by,
            available_weight: input.available_weight,
            reward: Money::new(
                input.reward_amount,
                input.reward_currency.as_deref(),
                DEFAULT_CURRENCY,
            )?,
            item_type: input.item_type.trim().to_string(),
            description: input.description.trim().to_string(),
            status: ListingStatus::Open,
            is_active: true,
            extra: extra_object(input.extra)?,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_open(&self) -> bool {
        self.is_active && self.status == ListingStatus::Open
    }

    /// Partial merge: absent or blank fields keep the stored value.
    pub fn apply(&mut self, update: ListingUpdate) -> Result<()> {
        let mut route = self.route.clone();
        route.merge(update.route);
        route.validate()?;

        let depart_on = update.depart_on.unwrap_or(self.depart_on);
        let arrive_by = update.arrive_by.or(self.arrive_by);
        validate_window(depart_on, arrive_by)?;

        if let Some(weight) = update.available_weight {
            validate_weight(weight)?;
            self.available_weight = weight;
        }
        if update.reward_amount.is_some() || update.reward_currency.is_some() {
            let current = self.reward.currency.clone();
            self.reward = Money::new(
                update.reward_amount.unwrap_or(self.reward.amount),
                update.reward_currency.as_deref(),
                &current,
            )?;
        }
        merge_text(&mut self.item_type, update.item_type);
        merge_text(&mut self.description, update.description);
        merge_extra(&mut self.extra, update.extra)?;

        self.route = route;
        self.depart_on = depart_on;
        self.arrive_by = arrive_by;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListingFilter {
    pub role: Option<String>,
    pub q: Option<String>,
    pub from_country: Option<String>,
    pub to_country: Option<String>,
    pub item_type: Option<String>,
    pub status: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shipment {
    pub id: ShipmentId,
    pub owner_id: UserId,
    pub route: Route,
    pub deadline: NaiveDate,
    pub item_description: String,
    pub item_weight: f64,
    pub budget: Money,
    pub status: ShipmentStatus,
    pub is_active: bool,
    pub extra: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewShipment {
    pub route: Route,
    pub deadline: NaiveDate,
    pub item_description: String,
    pub item_weight: f64,
    pub budget_amount: f64,
    pub budget_currency: Option<String>,
    #[serde(default)]
    pub extra: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShipmentUpdate {
    #[serde(default)]
    pub route: RouteUpdate,
    pub deadline: Option<NaiveDate>,
    pub item_description: Option<String>,
    pub item_weight: Option<f64>,
    pub budget_amount: Option<f64>,
    pub budget_currency: Option<String>,
    pub extra: Option<serde_json::Value>,
}

impl Shipment {
    pub fn create(owner_id: UserId, input: NewShipment) -> Result<Self> {
        input.route.validate()?;
        validate_weight(input.item_weight)?;
        if input.item_description.trim().is_empty() {
            return Err(MatchError::validation("Item description is required"));
        }
        let now = Utc::now();
        Ok(Self {
            id: uuid::Uuid::new_v4(),
            owner_id,
            route: input.route,
            deadline: input.deadline,
            item_description: input.item_description.trim().to_string(),
            item_weight: input.item_weight,
            budget: Money::new(
                input.budget_amount,
                input.budget_currency.as_deref(),
                DEFAULT_CURRENCY,
            )?,
            status: ShipmentStatus::Open,
            is_active: true,
            extra: extra_object(input.extra)?,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_open(&self) -> bool {
        self.is_active && self.status == ShipmentStatus::Open
    }

    pub fn apply(&mut self, update: ShipmentUpdate) -> Result<()> {
        if self.status.is_locked() {
            return Err(MatchError::ShipmentLocked);
        }
        let mut route = self.route.clone();
        route.merge(update.route);
        route.validate()?;

        if let Some(weight) = update.item_weight {
            validate_weight(weight)?;
            self.item_weight = weight;
        }
        if update.budget_amount.is_some() || update.budget_currency.is_some() {
            let current = self.budget.currency.clone();
            self.budget = Money::new(
                update.budget_amount.unwrap_or(self.budget.amount),
                update.budget_currency.as_deref(),
                &current,
            )?;
        }
        if let Some(deadline) = update.deadline {
            self.deadline = deadline;
        }
        merge_text(&mut self.item_description, update.item_description);
        merge_extra(&mut self.extra, update.extra)?;

        self.route = route;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShipmentFilter {
    pub q: Option<String>,
    pub from_country: Option<String>,
    pub to_country: Option<String>,
    pub deadline_from: Option<NaiveDate>,
    pub deadline_to: Option<NaiveDate>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterOffer {
    pub amount: f64,
    pub currency: String,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRequest {
    pub id: RequestId,
    pub listing_id: ListingId,
    pub requester_id: UserId,
    pub shipment_id: Option<ShipmentId>,
    pub offer: Money,
    pub counter_offer: Option<CounterOffer>,
    pub note: Option<String>,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSubmission {
    pub shipment_id: ShipmentId,
    pub offer_amount: f64,
    pub offer_currency: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterOfferInput {
    pub amount: f64,
    pub currency: Option<String>,
    pub note: Option<String>,
}

/// Result of opening a request; `already` is set when an existing row was reused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestOutcome {
    pub request: MatchRequest,
    pub already: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: uuid::Uuid,
    pub listing_id: ListingId,
    pub sender_id: UserId,
    pub sender_name: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub id: uuid::Uuid,
    pub listing_id: ListingId,
    pub reviewer_id: UserId,
    pub reviewed_user_id: UserId,
    pub rating: u8,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReview {
    pub rating: u8,
    #[serde(default)]
    pub comment: String,
    pub reviewed_user_id: Option<UserId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RatingSummary {
    pub average: Option<f64>,
    pub count: u32,
}

pub(crate) fn merge_text(target: &mut String, value: Option<String>) {
    if let Some(value) = value {
        let value = value.trim();
        if !value.is_empty() {
            *target = value.to_string();
        }
    }
}

/// Trims a free-text note, mapping blank input to `None`.
pub(crate) fn clean_note(note: Option<String>) -> Option<String> {
    note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())
}

fn merge_extra(target: &mut serde_json::Value, update: Option<serde_json::Value>) -> Result<()> {
    let Some(update) = update else {
        return Ok(());
    };
    let update = extra_object(Some(update))?;
    if let (Some(stored), serde_json::Value::Object(incoming)) = (target.as_object_mut(), update) {
        for (key, value) in incoming {
            stored.insert(key, value);
        }
    }
    Ok(())
}

fn extra_object(extra: Option<serde_json::Value>) -> Result<serde_json::Value> {
    match extra {
        None | Some(serde_json::Value::Null) => Ok(serde_json::Value::Object(Default::default())),
        Some(value @ serde_json::Value::Object(_)) => Ok(value),
        Some(_) => Err(MatchError::validation("Extra fields must be a JSON object")),
    }
}

fn validate_window(depart_on: NaiveDate, arrive_by: Option<NaiveDate>) -> Result<()> {
    if let Some(arrive_by) = arrive_by {
        if arrive_by < depart_on {
            return Err(MatchError::validation("Arrival date must not precede departure"));
        }
    }
    Ok(())
}

fn validate_weight(weight: f64) -> Result<()> {
    if !weight.is_finite() || weight <= 0.0 {
        return Err(MatchError::validation("Weight must be greater than 0"));
    }
    Ok(())
}
