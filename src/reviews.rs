use crate::{
    auth::Identity,
    database::{self, Database},
    model::*,
    ListingId, MatchError, Result, UserId,
};
use chrono::Utc;
use tracing::info;

#[derive(Clone)]
pub struct ReviewService {
    db: Database,
}

impl ReviewService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Records a review. Without an explicit target the listing owner is reviewed.
    pub async fn post(&self, actor: &Identity, listing_id: ListingId, input: NewReview) -> Result<Review> {
        if !(1..=5).contains(&input.rating) {
            return Err(MatchError::validation("Rating must be between 1 and 5"));
        }

        let mut tx = self.db.begin().await?;
        let listing = database::fetch_listing(&mut tx, listing_id)
            .await?
            .ok_or(MatchError::NotFound("Listing"))?;

        let review = Review {
            id: uuid::Uuid::new_v4(),
            listing_id,
            reviewer_id: actor.user_id,
            reviewed_user_id: input.reviewed_user_id.unwrap_or(listing.owner_id),
            rating: input.rating,
            comment: input.comment.trim().to_string(),
            created_at: Utc::now(),
        };
        database::insert_review(&mut tx, &review).await?;
        tx.commit().await?;

        info!(
            listing_id = %listing_id,
            reviewed_user_id = %review.reviewed_user_id,
            rating = review.rating,
            "review posted"
        );
        Ok(review)
    }

    pub async fn list_for_listing(&self, listing_id: ListingId) -> Result<Vec<Review>> {
        let mut conn = self.db.reader().acquire().await?;
        if database::fetch_listing(&mut conn, listing_id).await?.is_none() {
            return Err(MatchError::NotFound("Listing"));
        }
        database::reviews_for_listing(&mut conn, listing_id).await
    }

    pub async fn rating_for_user(&self, user_id: UserId) -> Result<RatingSummary> {
        let mut conn = self.db.reader().acquire().await?;
        database::rating_for_user(&mut conn, user_id).await
    }
}
