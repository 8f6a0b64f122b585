use crate::{
    auth::Identity,
    config::LimitsConfig,
    database::{self, Database, ListingSearch},
    gate::{self, ChatAccess},
    model::*,
    negotiation, ListingId, MatchError, Result,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Fallback sender label when no display name is known.
pub const UNKNOWN_SENDER: &str = "Member";

/// A listing as seen by one viewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingDetail {
    pub listing: Listing,
    pub is_owner: bool,
    pub request_count: i64,
    pub my_request_status: Option<RequestStatus>,
    pub chat: ChatAccess,
    pub chat_hint: Option<String>,
    pub recent_messages: Vec<Message>,
    pub rating: RatingSummary,
}

#[derive(Clone)]
pub struct ListingService {
    db: Database,
    limits: LimitsConfig,
}

impl ListingService {
    pub fn new(db: Database, limits: LimitsConfig) -> Self {
        Self { db, limits }
    }

    pub async fn create(&self, actor: &Identity, input: NewListing) -> Result<Listing> {
        let listing = Listing::create(actor.user_id, input)?;

        let mut tx = self.db.begin().await?;
        database::insert_listing(&mut tx, &listing).await?;
        tx.commit().await?;

        info!(listing_id = %listing.id, owner_id = %listing.owner_id, "listing created");
        Ok(listing)
    }

    pub async fn list(&self, filter: ListingFilter) -> Result<Vec<Listing>> {
        let (limit, offset) = self.limits.page(filter.limit, filter.offset);
        let search = ListingSearch {
            role: parse_optional(filter.role.as_deref())?,
            status: parse_optional(filter.status.as_deref())?,
            text: non_blank(filter.q),
            from_country: non_blank(filter.from_country),
            to_country: non_blank(filter.to_country),
            item_type: non_blank(filter.item_type),
            limit,
            offset,
        };

        let mut conn = self.db.reader().acquire().await?;
        let listings = database::search_listings(&mut conn, &search).await?;
        debug!(count = listings.len(), "listed listings");
        Ok(listings)
    }

    pub async fn get(&self, id: ListingId, viewer: Option<&Identity>) -> Result<Listing> {
        let listing = self
            .db
            .get_listing(id)
            .await?
            .ok_or(MatchError::NotFound("Listing"))?;
        if !listing.is_active && !viewer.is_some_and(|v| v.owns(listing.owner_id)) {
            return Err(MatchError::NotFound("Listing"));
        }
        Ok(listing)
    }

    pub async fn detail(&self, id: ListingId, viewer: Option<&Identity>) -> Result<ListingDetail> {
        let listing = self.get(id, viewer).await?;

        let mut conn = self.db.reader().acquire().await?;
        let requests = database::requests_for_listing(&mut conn, id).await?;
        let chat = gate::chat_access(&listing, &requests, viewer);
        let recent_messages = if chat.is_open() {
            database::recent_messages(
                &mut conn,
                id,
                self.limits.recent_messages as i64,
                UNKNOWN_SENDER,
            )
            .await?
        } else {
            Vec::new()
        };
        let rating = database::rating_for_listing(&mut conn, id).await?;

        let my_request_status = viewer.and_then(|v| {
            requests
                .iter()
                .find(|r| r.requester_id == v.user_id)
                .map(|r| r.status)
        });

        Ok(ListingDetail {
            is_owner: viewer.is_some_and(|v| v.user_id == listing.owner_id),
            request_count: requests.len() as i64,
            my_request_status,
            chat_hint: chat.hint().map(str::to_string),
            chat,
            recent_messages,
            rating,
            listing,
        })
    }

    pub async fn update(&self, actor: &Identity, id: ListingId, update: ListingUpdate) -> Result<Listing> {
        let mut tx = self.db.begin().await?;
        let mut listing = database::fetch_listing(&mut tx, id)
            .await?
            .filter(|l| l.is_active)
            .ok_or(MatchError::NotFound("Listing"))?;
        if !actor.owns(listing.owner_id) {
            warn!(listing_id = %id, user_id = %actor.user_id, "listing update refused");
            return Err(MatchError::forbidden("Only the owner can edit this trip"));
        }

        listing.apply(update)?;
        database::update_listing(&mut tx, &listing).await?;
        tx.commit().await?;

        info!(listing_id = %id, "listing updated");
        Ok(listing)
    }

    /// Soft delete. Requests on the listing are left untouched.
    pub async fn delete(&self, actor: &Identity, id: ListingId) -> Result<()> {
        let mut tx = self.db.begin().await?;
        let listing = database::fetch_listing(&mut tx, id)
            .await?
            .filter(|l| l.is_active)
            .ok_or(MatchError::NotFound("Listing"))?;
        if !actor.owns(listing.owner_id) {
            warn!(listing_id = %id, user_id = %actor.user_id, "listing delete refused");
            return Err(MatchError::forbidden("Only the owner can delete this trip"));
        }

        database::deactivate_listing(&mut tx, id, Utc::now()).await?;
        tx.commit().await?;

        info!(listing_id = %id, "listing deactivated");
        Ok(())
    }

    pub async fn advance(&self, actor: &Identity, id: ListingId, next: ListingStatus) -> Result<Listing> {
        let mut tx = self.db.begin().await?;
        let mut listing = database::fetch_listing(&mut tx, id)
            .await?
            .filter(|l| l.is_active)
            .ok_or(MatchError::NotFound("Listing"))?;
        if !actor.owns(listing.owner_id) {
            return Err(MatchError::forbidden("Only the owner can change this trip's status"));
        }
        if !listing.status.can_advance_to(next) {
            return Err(MatchError::InvalidStatusTransition {
                from: listing.status.to_string(),
                to: next.to_string(),
            });
        }

        let now = Utc::now();
        if listing.status == ListingStatus::Matched && next == ListingStatus::Cancelled {
            negotiation::release_match(&mut tx, id, now).await?;
        }
        database::set_listing_status(&mut tx, id, next, now).await?;
        tx.commit().await?;

        info!(listing_id = %id, from = %listing.status, to = %next, "listing status changed");
        listing.status = next;
        listing.updated_at = now;
        Ok(listing)
    }
}

pub(crate) fn parse_optional<T>(value: Option<&str>) -> Result<Option<T>>
where
    T: std::str::FromStr<Err = MatchError>,
{
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value.parse().map(Some),
    }
}

pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
