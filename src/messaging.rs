use crate::{
    auth::Identity,
    config::LimitsConfig,
    database::{self, Database},
    gate::{self, ChatAccess},
    listings::UNKNOWN_SENDER,
    model::*,
    ListingId, MatchError, Result,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};

/// A chat read. `messages` is empty whenever `access` is locked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub access: ChatAccess,
    pub messages: Vec<Message>,
}

#[derive(Clone)]
pub struct MessageService {
    db: Database,
    limits: LimitsConfig,
}

impl MessageService {
    pub fn new(db: Database, limits: LimitsConfig) -> Self {
        Self { db, limits }
    }

    pub async fn list(&self, listing_id: ListingId, viewer: Option<&Identity>) -> Result<Conversation> {
        let mut conn = self.db.reader().acquire().await?;
        let access = access_for(&mut conn, listing_id, viewer).await?;
        if !access.is_open() {
            return Ok(Conversation {
                access,
                messages: Vec::new(),
            });
        }

        let messages = database::recent_messages(
            &mut conn,
            listing_id,
            self.limits.recent_messages as i64,
            UNKNOWN_SENDER,
        )
        .await?;
        debug!(listing_id = %listing_id, count = messages.len(), "read conversation");
        Ok(Conversation { access, messages })
    }

    pub async fn post(&self, actor: &Identity, listing_id: ListingId, body: &str) -> Result<Message> {
        let body = body.trim();
        if body.is_empty() {
            return Err(MatchError::validation("Message body is required"));
        }
        if body.chars().count() > MAX_MESSAGE_LEN {
            return Err(MatchError::validation(format!(
                "Message body exceeds {} characters",
                MAX_MESSAGE_LEN
            )));
        }

        let mut tx = self.db.begin().await?;
        let access = access_for(&mut tx, listing_id, Some(actor)).await?;
        if !access.is_open() {
            warn!(listing_id = %listing_id, user_id = %actor.user_id, ?access, "chat post refused");
            return Err(MatchError::ChatLocked);
        }

        let sender_name = match actor.display_name.as_deref() {
            Some(name) => {
                database::upsert_profile(&mut tx, actor.user_id, name).await?;
                name.to_string()
            }
            None => UNKNOWN_SENDER.to_string(),
        };
        let message = Message {
            id: uuid::Uuid::new_v4(),
            listing_id,
            sender_id: actor.user_id,
            sender_name,
            body: body.to_string(),
            created_at: Utc::now(),
        };
        database::insert_message(&mut tx, &message).await?;
        tx.commit().await?;

        info!(listing_id = %listing_id, message_id = %message.id, "message posted");
        Ok(message)
    }
}

async fn access_for(
    conn: &mut SqliteConnection,
    listing_id: ListingId,
    viewer: Option<&Identity>,
) -> Result<ChatAccess> {
    let listing = database::fetch_listing(conn, listing_id)
        .await?
        .filter(|l| l.is_active || viewer.is_some_and(|v| v.owns(l.owner_id)))
        .ok_or(MatchError::NotFound("Listing"))?;
    let requests = database::requests_for_listing(conn, listing_id).await?;
    Ok(gate::chat_access(&listing, &requests, viewer))
}
