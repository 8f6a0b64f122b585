use crate::{auth::Identity, Listing, MatchRequest, RequestStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ChatAccess {
    Open,
    Locked(LockReason),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum LockReason {
    SignIn,
    /// Owner view with no accepted request yet.
    AwaitingAcceptance { pending: usize },
    /// Requester whose own request exists but is not accepted.
    RequestPending { status: RequestStatus },
    NoRequest,
}

impl ChatAccess {
    pub fn is_open(&self) -> bool {
        matches!(self, ChatAccess::Open)
    }

    /// Guidance for rendering a locked chat.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            ChatAccess::Open => None,
            ChatAccess::Locked(LockReason::SignIn) => Some("Sign in to contact the traveler"),
            ChatAccess::Locked(LockReason::AwaitingAcceptance { .. }) => {
                Some("Accept a pending request to open the chat")
            }
            ChatAccess::Locked(LockReason::RequestPending { .. }) => {
                Some("The chat opens once the traveler accepts your request")
            }
            ChatAccess::Locked(LockReason::NoRequest) => Some("Send a request to this trip"),
        }
    }
}

/// Decides whether `viewer` may read and post in the listing's chat.
///
/// `requests` must hold every request on the listing.
pub fn chat_access(
    listing: &Listing,
    requests: &[MatchRequest],
    viewer: Option<&Identity>,
) -> ChatAccess {
    let Some(viewer) = viewer else {
        return ChatAccess::Locked(LockReason::SignIn);
    };
    if viewer.is_admin {
        return ChatAccess::Open;
    }

    let mut on_listing = requests.iter().filter(|r| r.listing_id == listing.id);

    if viewer.user_id == listing.owner_id {
        let mut pending = 0;
        for request in on_listing {
            match request.status {
                RequestStatus::Accepted => return ChatAccess::Open,
                status if status.is_negotiable() => pending += 1,
                _ => {}
            }
        }
        return ChatAccess::Locked(LockReason::AwaitingAcceptance { pending });
    }

    match on_listing.find(|r| r.requester_id == viewer.user_id) {
        Some(request) if request.status == RequestStatus::Accepted => ChatAccess::Open,
        Some(request) => ChatAccess::Locked(LockReason::RequestPending {
            status: request.status,
        }),
        None => ChatAccess::Locked(LockReason::NoRequest),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Money, ListingStatus, NewListing, Route};
    use chrono::{NaiveDate, Utc};
    use uuid::Uuid;

    fn listing(owner: Uuid) -> Listing {
        Listing::create(
            owner,
            NewListing {
                role: None,
                route: Route {
                    from_country: "FR".into(),
                    from_city: "Paris".into(),
                    to_country: "CM".into(),
                    to_city: "Douala".into(),
                },
                depart_on: NaiveDate::from_ymd_opt(2026, 11, 20).unwrap(),
                arrive_by: None,
                available_weight: 10.0,
                reward_amount: 50.0,
                reward_currency: None,
                item_type: "documents".into(),
                description: String::new(),
                extra: None,
            },
        )
        .unwrap()
    }

    fn request(listing: &Listing, requester: Uuid, status: RequestStatus) -> MatchRequest {
        MatchRequest {
            id: Uuid::new_v4(),
            listing_id: listing.id,
            requester_id: requester,
            shipment_id: Some(Uuid::new_v4()),
            offer: Money {
                amount: 40.0,
                currency: "USD".into(),
            },
            counter_offer: None,
            note: None,
            status,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn user(id: Uuid) -> Identity {
        Identity {
            user_id: id,
            display_name: None,
            is_admin: false,
        }
    }

    #[test]
    fn test_every_viewer_over_every_status() {
        let owner = Uuid::new_v4();
        let requester = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let trip = listing(owner);

        for status in RequestStatus::ALL {
            let requests = vec![request(&trip, requester, *status)];
            let accepted = *status == RequestStatus::Accepted;

            assert_eq!(chat_access(&trip, &requests, Some(&user(owner))).is_open(), accepted);
            assert_eq!(
                chat_access(&trip, &requests, Some(&user(requester))).is_open(),
                accepted
            );
            assert_eq!(
                chat_access(&trip, &requests, Some(&user(stranger))),
                ChatAccess::Locked(LockReason::NoRequest)
            );
            let admin = Identity {
                is_admin: true,
                ..user(stranger)
            };
            assert!(chat_access(&trip, &requests, Some(&admin)).is_open());
            assert_eq!(
                chat_access(&trip, &requests, None),
                ChatAccess::Locked(LockReason::SignIn)
            );
        }
    }

    #[test]
    fn test_rejected_requester_stays_locked_when_another_is_accepted() {
        let owner = Uuid::new_v4();
        let winner = Uuid::new_v4();
        let loser = Uuid::new_v4();
        let mut trip = listing(owner);
        trip.status = ListingStatus::Matched;
        let requests = vec![
            request(&trip, winner, RequestStatus::Accepted),
            request(&trip, loser, RequestStatus::Rejected),
        ];

        assert!(chat_access(&trip, &requests, Some(&user(owner))).is_open());
        assert!(chat_access(&trip, &requests, Some(&user(winner))).is_open());
        assert_eq!(
            chat_access(&trip, &requests, Some(&user(loser))),
            ChatAccess::Locked(LockReason::RequestPending {
                status: RequestStatus::Rejected
            })
        );
    }

    #[test]
    fn test_owner_sees_pending_count() {
        let owner = Uuid::new_v4();
        let trip = listing(owner);
        let requests = vec![
            request(&trip, Uuid::new_v4(), RequestStatus::Pending),
            request(&trip, Uuid::new_v4(), RequestStatus::CounterOffer),
            request(&trip, Uuid::new_v4(), RequestStatus::Cancelled),
        ];
        let access = chat_access(&trip, &requests, Some(&user(owner)));
        assert_eq!(access, ChatAccess::Locked(LockReason::AwaitingAcceptance { pending: 2 }));
        assert!(access.hint().is_some());
    }

    #[test]
    fn test_requests_from_other_listings_are_ignored() {
        let owner = Uuid::new_v4();
        let requester = Uuid::new_v4();
        let trip = listing(owner);
        let other = listing(owner);
        let requests = vec![request(&other, requester, RequestStatus::Accepted)];
        assert!(!chat_access(&trip, &requests, Some(&user(requester))).is_open());
        assert!(!chat_access(&trip, &requests, Some(&user(owner))).is_open());
    }

    #[test]
    fn test_locked_state_serializes_with_reason() {
        let access = ChatAccess::Locked(LockReason::AwaitingAcceptance { pending: 1 });
        let json = serde_json::to_value(&access).unwrap();
        assert_eq!(json["state"], "locked");
        assert_eq!(json["reason"], "awaiting_acceptance");
        assert_eq!(json["pending"], 1);
    }
}
