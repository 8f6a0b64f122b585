//! Pure request state machine.
//!
//! Every negotiation operation first asks this module whether the move is
//! legal for the current request status, the acting party and the listing
//! state. The engine in [`crate::negotiation`] only performs the side effects.

use crate::{MatchError, RequestStatus, Result};

/// What a requester submission does to the (listing, requester) row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// No row yet: insert a fresh pending request.
    Insert,
    /// Reuse the existing row, overwrite its terms and reset it to pending.
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Counter,
    Accept,
    AcceptCounter,
    Reject,
    Cancel,
    EditNote,
}

/// How the actor relates to the request being acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Admin,
    Owner,
    Requester,
    Outsider,
}

impl Party {
    /// A direct relationship to the request wins over the admin flag, so an
    /// admin acting on their own request is still its requester.
    pub fn of(is_admin: bool, is_owner: bool, is_requester: bool) -> Self {
        if is_owner {
            Party::Owner
        } else if is_requester {
            Party::Requester
        } else if is_admin {
            Party::Admin
        } else {
            Party::Outsider
        }
    }
}

impl Action {
    pub const ALL: &'static [Action] = &[
        Action::Counter,
        Action::Accept,
        Action::AcceptCounter,
        Action::Reject,
        Action::Cancel,
        Action::EditNote,
    ];

    pub fn allowed_for(self, party: Party) -> bool {
        use Party::*;
        match self {
            Action::Counter | Action::Accept | Action::Reject => matches!(party, Owner | Admin),
            Action::AcceptCounter => matches!(party, Requester | Admin),
            Action::Cancel => matches!(party, Requester | Owner | Admin),
            Action::EditNote => matches!(party, Requester),
        }
    }

    /// Admins may drive every move except editing someone else's note.
    pub fn admin_may(self) -> bool {
        !matches!(self, Action::EditNote)
    }

    pub fn requires_open_listing(self) -> bool {
        matches!(self, Action::Counter | Action::Accept | Action::AcceptCounter)
    }

    /// Closes the match: siblings rejected, listing and shipment matched.
    pub fn closes_match(self) -> bool {
        matches!(self, Action::Accept | Action::AcceptCounter)
    }

    pub fn target(self, current: RequestStatus) -> Result<RequestStatus> {
        use RequestStatus::*;
        match (self, current) {
            (Action::AcceptCounter, CounterOffer) => Ok(Accepted),
            (Action::AcceptCounter, _) => Err(MatchError::RequestNotCountered),
            (Action::EditNote, Pending) => Ok(Pending),
            (Action::EditNote, _) => Err(MatchError::RequestNotPending),
            (_, status) if !status.is_negotiable() => Err(MatchError::RequestNotPending),
            (Action::Counter, _) => Ok(CounterOffer),
            (Action::Accept, _) => Ok(Accepted),
            (Action::Reject, _) => Ok(Rejected),
            (Action::Cancel, _) => Ok(Cancelled),
        }
    }
}

/// Decides the full transition: who may act, from which status, on which listing state.
pub fn apply(
    current: RequestStatus,
    action: Action,
    party: Party,
    is_admin: bool,
    listing_open: bool,
) -> Result<RequestStatus> {
    if !action.allowed_for(party) && !(is_admin && action.admin_may()) {
        return Err(MatchError::forbidden(format!(
            "{:?} cannot {:?} this request",
            party, action
        )));
    }
    let next = action.target(current)?;
    if action.requires_open_listing() && !listing_open {
        return Err(MatchError::TripNotOpen);
    }
    Ok(next)
}

/// Plans a requester submission against the row they may already have on the listing.
pub fn plan_submission(existing: Option<RequestStatus>, listing_open: bool) -> Result<Submission> {
    use RequestStatus::*;
    match existing {
        None if listing_open => Ok(Submission::Insert),
        None => Err(MatchError::TripNotOpen),
        Some(Pending | CounterOffer) => Ok(Submission::Replace),
        Some(Accepted) => Err(MatchError::RequestNotPending),
        Some(Rejected | Cancelled) if listing_open => Ok(Submission::Replace),
        Some(Rejected | Cancelled) => Err(MatchError::TripNotOpen),
    }
}
