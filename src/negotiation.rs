//! Negotiation engine.
//!
//! Each operation runs as one write transaction: preconditions are read and
//! checked on the writer connection, then every row the move touches is
//! written before commit. Any error drops the transaction and rolls back.

use crate::{
    auth::Identity,
    database::{self, Database},
    model::*,
    transitions::{self, Action, Party, Submission},
    ListingId, MatchError, RequestId, Result,
};
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::{info, warn};

#[derive(Clone)]
pub struct NegotiationEngine {
    db: Database,
}

impl NegotiationEngine {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Opens a request on a listing, or rewrites the caller's existing one.
    pub async fn open_request(
        &self,
        actor: &Identity,
        listing_id: ListingId,
        submission: RequestSubmission,
    ) -> Result<RequestOutcome> {
        let mut tx = self.db.begin().await?;

        let listing = database::fetch_listing(&mut tx, listing_id)
            .await?
            .ok_or(MatchError::NotFound("Listing"))?;
        // Owners are refused whatever state their listing is in.
        if listing.owner_id == actor.user_id {
            return Err(MatchError::CannotRequestOwn);
        }
        if !listing.is_active {
            return Err(MatchError::TripNotOpen);
        }

        let existing = database::fetch_request_for(&mut tx, listing_id, actor.user_id).await?;
        let plan = transitions::plan_submission(existing.as_ref().map(|r| r.status), listing.is_open())?;

        let shipment = database::fetch_shipment(&mut tx, submission.shipment_id)
            .await?
            .ok_or(MatchError::NotFound("Shipment"))?;
        if shipment.owner_id != actor.user_id {
            return Err(MatchError::ShipmentNotOwner);
        }

        // A claim by another request wins over the shipment's own status, so a
        // shipment matched elsewhere reports as in use.
        let own_id = existing.as_ref().map(|r| r.id);
        if let Some(holder) = database::active_request_for_shipment(&mut tx, shipment.id, own_id).await? {
            warn!(shipment_id = %shipment.id, holder = %holder, "shipment already claimed");
            return Err(MatchError::ShipmentAlreadyInUse);
        }
        if !shipment.is_open() {
            return Err(MatchError::ShipmentNotOpen);
        }

        let offer = Money::new(
            submission.offer_amount,
            submission.offer_currency.as_deref(),
            &listing.reward.currency,
        )?;
        let note = clean_note(submission.note);
        let now = Utc::now();

        let (request, already) = match (plan, existing) {
            (Submission::Replace, Some(mut request)) => {
                request.shipment_id = Some(shipment.id);
                request.offer = offer;
                request.note = note;
                request.counter_offer = None;
                request.status = RequestStatus::Pending;
                request.updated_at = now;
                database::save_request(&mut tx, &request)
                    .await
                    .map_err(claim_conflict)?;
                (request, true)
            }
            _ => {
                let request = MatchRequest {
                    id: uuid::Uuid::new_v4(),
                    listing_id,
                    requester_id: actor.user_id,
                    shipment_id: Some(shipment.id),
                    offer,
                    counter_offer: None,
                    note,
                    status: RequestStatus::Pending,
                    created_at: now,
                    updated_at: now,
                };
                database::insert_request(&mut tx, &request)
                    .await
                    .map_err(claim_conflict)?;
                (request, false)
            }
        };

        tx.commit().await?;

        info!(
            request_id = %request.id,
            listing_id = %listing_id,
            shipment_id = %shipment.id,
            already,
            "request submitted"
        );
        Ok(RequestOutcome { request, already })
    }

    pub async fn counter_offer(
        &self,
        actor: &Identity,
        request_id: RequestId,
        input: CounterOfferInput,
    ) -> Result<MatchRequest> {
        self.transition(actor, request_id, Action::Counter, |request| {
            let price = Money::new(input.amount, input.currency.as_deref(), &request.offer.currency)?;
            request.counter_offer = Some(CounterOffer {
                amount: price.amount,
                currency: price.currency,
                note: clean_note(input.note),
            });
            Ok(())
        })
        .await
    }

    /// Requester takes the owner's counter price and closes the match.
    pub async fn accept_counter(&self, actor: &Identity, request_id: RequestId) -> Result<MatchRequest> {
        self.transition(actor, request_id, Action::AcceptCounter, |request| {
            let counter = request
                .counter_offer
                .as_ref()
                .ok_or(MatchError::RequestNotCountered)?;
            request.offer = Money {
                amount: counter.amount,
                currency: counter.currency.clone(),
            };
            Ok(())
        })
        .await
    }

    pub async fn accept(&self, actor: &Identity, request_id: RequestId) -> Result<MatchRequest> {
        self.transition(actor, request_id, Action::Accept, |_| Ok(())).await
    }

    pub async fn reject(&self, actor: &Identity, request_id: RequestId) -> Result<MatchRequest> {
        self.transition(actor, request_id, Action::Reject, |_| Ok(())).await
    }

    pub async fn cancel(&self, actor: &Identity, request_id: RequestId) -> Result<MatchRequest> {
        self.transition(actor, request_id, Action::Cancel, |_| Ok(())).await
    }

    pub async fn update_note(
        &self,
        actor: &Identity,
        request_id: RequestId,
        note: Option<String>,
    ) -> Result<MatchRequest> {
        self.transition(actor, request_id, Action::EditNote, |request| {
            request.note = clean_note(note);
            Ok(())
        })
        .await
    }

    pub async fn list_for_listing(&self, actor: &Identity, listing_id: ListingId) -> Result<Vec<MatchRequest>> {
        let mut conn = self.db.reader().acquire().await?;
        let listing = database::fetch_listing(&mut conn, listing_id)
            .await?
            .ok_or(MatchError::NotFound("Listing"))?;
        if !actor.owns(listing.owner_id) {
            return Err(MatchError::forbidden("Only the owner can see requests on this trip"));
        }
        database::requests_for_listing(&mut conn, listing_id).await
    }

    pub async fn list_mine(&self, actor: &Identity) -> Result<Vec<MatchRequest>> {
        let mut conn = self.db.reader().acquire().await?;
        database::requests_by_requester(&mut conn, actor.user_id).await
    }

    pub async fn get(&self, actor: &Identity, request_id: RequestId) -> Result<MatchRequest> {
        let mut conn = self.db.reader().acquire().await?;
        let request = database::fetch_request(&mut conn, request_id)
            .await?
            .ok_or(MatchError::NotFound("Request"))?;
        if actor.owns(request.requester_id) {
            return Ok(request);
        }
        let listing = database::fetch_listing(&mut conn, request.listing_id)
            .await?
            .ok_or(MatchError::NotFound("Listing"))?;
        if listing.owner_id != actor.user_id {
            return Err(MatchError::forbidden("Not a party to this request"));
        }
        Ok(request)
    }

    async fn transition<F>(
        &self,
        actor: &Identity,
        request_id: RequestId,
        action: Action,
        edit: F,
    ) -> Result<MatchRequest>
    where
        F: FnOnce(&mut MatchRequest) -> Result<()>,
    {
        let mut tx = self.db.begin().await?;

        let mut request = database::fetch_request(&mut tx, request_id)
            .await?
            .ok_or(MatchError::NotFound("Request"))?;
        let listing = database::fetch_listing(&mut tx, request.listing_id)
            .await?
            .ok_or(MatchError::NotFound("Listing"))?;

        let party = Party::of(
            actor.is_admin,
            actor.user_id == listing.owner_id,
            actor.user_id == request.requester_id,
        );
        let from = request.status;
        let next = transitions::apply(from, action, party, actor.is_admin, listing.is_open()).map_err(|e| {
            warn!(request_id = %request_id, ?action, ?party, status = %from, error = %e, "transition refused");
            e
        })?;

        edit(&mut request)?;
        let now = Utc::now();
        request.status = next;
        request.updated_at = now;

        if action.closes_match() {
            close_match(&mut tx, &listing, &request, now).await?;
        }
        database::save_request(&mut tx, &request).await?;

        tx.commit().await?;

        info!(
            request_id = %request_id,
            listing_id = %listing.id,
            ?action,
            from = %from,
            to = %next,
            "request transitioned"
        );
        Ok(request)
    }
}

/// Side effects of an acceptance. The listing and shipment statuses written
/// here belong to the engine, not to their owners.
async fn close_match(
    conn: &mut SqliteConnection,
    listing: &Listing,
    request: &MatchRequest,
    now: DateTime<Utc>,
) -> Result<()> {
    if let Some(shipment_id) = request.shipment_id {
        let open = database::fetch_shipment(conn, shipment_id)
            .await?
            .is_some_and(|s| s.is_open());
        if !open {
            return Err(MatchError::ShipmentNotOpen);
        }
    }

    let rejected = database::reject_siblings(conn, listing.id, request.id, now).await?;
    database::set_listing_status(conn, listing.id, ListingStatus::Matched, now).await?;
    if let Some(shipment_id) = request.shipment_id {
        database::set_shipment_status(conn, shipment_id, ShipmentStatus::Matched, now).await?;
    }

    info!(listing_id = %listing.id, request_id = %request.id, rejected, "match closed");
    Ok(())
}

/// Undoes an acceptance when a matched listing is cancelled: the accepted
/// request becomes cancelled and its shipment returns to open.
pub(crate) async fn release_match(conn: &mut SqliteConnection, listing_id: ListingId, now: DateTime<Utc>) -> Result<()> {
    let requests = database::requests_for_listing(conn, listing_id).await?;
    let Some(mut request) = requests
        .into_iter()
        .find(|r| r.status == RequestStatus::Accepted)
    else {
        return Ok(());
    };

    request.status = RequestStatus::Cancelled;
    request.updated_at = now;
    database::save_request(conn, &request).await?;

    let mut reopened = false;
    if let Some(shipment_id) = request.shipment_id {
        let matched = database::fetch_shipment(conn, shipment_id)
            .await?
            .is_some_and(|s| s.status == ShipmentStatus::Matched);
        if matched {
            database::set_shipment_status(conn, shipment_id, ShipmentStatus::Open, now).await?;
            reopened = true;
        }
    }

    info!(listing_id = %listing_id, request_id = %request.id, reopened, "match released");
    Ok(())
}

/// The partial unique index on active shipment claims is the storage-level
/// backstop for the procedural check in `open_request`.
fn claim_conflict(err: MatchError) -> MatchError {
    match &err {
        MatchError::Database(sqlx::Error::Database(db))
            if db.is_unique_violation() && db.message().contains("shipment_id") =>
        {
            MatchError::ShipmentAlreadyInUse
        }
        _ => err,
    }
}
