//! SQLite persistence.
//!
//! Reads go through a WAL reader pool. Every write goes through a writer pool
//! holding a single connection, so a write transaction observes and mutates
//! the database with no interleaved writer: check-then-act sequences inside
//! one transaction are serializable.

use crate::{
    model::*, ListingId, MatchError, RequestId, Result, ShipmentId, UserId,
};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow},
    QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool, Transaction,
};
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone)]
pub struct Database {
    reader: SqlitePool,
    writer: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::connect(database_url, 8, Duration::from_secs(5)).await
    }

    pub async fn connect(database_url: &str, max_readers: u32, busy_timeout: Duration) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(busy_timeout);

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options.clone())
            .await?;

        // An in-memory database exists per connection, so both roles share the writer.
        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
        let reader = if in_memory {
            writer.clone()
        } else {
            SqlitePoolOptions::new()
                .max_connections(max_readers.max(1))
                .connect_with(options)
                .await?
        };

        let db = Self { reader, writer };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS listings (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                role TEXT NOT NULL,
                from_country TEXT NOT NULL,
                from_city TEXT NOT NULL,
                to_country TEXT NOT NULL,
                to_city TEXT NOT NULL,
                depart_on DATE NOT NULL,
                arrive_by DATE,
                available_weight REAL NOT NULL,
                reward_amount REAL NOT NULL,
                reward_currency TEXT NOT NULL,
                item_type TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                extra TEXT NOT NULL DEFAULT '{}',
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            );

            CREATE TABLE IF NOT EXISTS shipments (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                from_country TEXT NOT NULL,
                from_city TEXT NOT NULL,
                to_country TEXT NOT NULL,
                to_city TEXT NOT NULL,
                deadline DATE NOT NULL,
                item_description TEXT NOT NULL,
                item_weight REAL NOT NULL,
                budget_amount REAL NOT NULL,
                budget_currency TEXT NOT NULL,
                status TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                extra TEXT NOT NULL DEFAULT '{}',
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            );

            CREATE TABLE IF NOT EXISTS requests (
                id TEXT PRIMARY KEY,
                listing_id TEXT NOT NULL,
                requester_id TEXT NOT NULL,
                shipment_id TEXT,
                offer_amount REAL NOT NULL,
                offer_currency TEXT NOT NULL,
                counter_amount REAL,
                counter_currency TEXT,
                counter_note TEXT,
                note TEXT,
                status TEXT NOT NULL,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL,
                UNIQUE (listing_id, requester_id),
                FOREIGN KEY (listing_id) REFERENCES listings(id),
                FOREIGN KEY (shipment_id) REFERENCES shipments(id)
            );

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                listing_id TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at DATETIME NOT NULL,
                FOREIGN KEY (listing_id) REFERENCES listings(id)
            );

            CREATE TABLE IF NOT EXISTS reviews (
                id TEXT PRIMARY KEY,
                listing_id TEXT NOT NULL,
                reviewer_id TEXT NOT NULL,
                reviewed_user_id TEXT NOT NULL,
                rating INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
                comment TEXT NOT NULL DEFAULT '',
                created_at DATETIME NOT NULL,
                FOREIGN KEY (listing_id) REFERENCES listings(id)
            );

            CREATE TABLE IF NOT EXISTS profiles (
                user_id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                updated_at DATETIME NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_requests_active_shipment
                ON requests(shipment_id)
                WHERE shipment_id IS NOT NULL AND status IN ('pending', 'counter_offer', 'accepted');

            CREATE INDEX IF NOT EXISTS idx_listings_owner ON listings(owner_id);
            CREATE INDEX IF NOT EXISTS idx_listings_status ON listings(status, is_active);
            CREATE INDEX IF NOT EXISTS idx_shipments_owner ON shipments(owner_id);
            CREATE INDEX IF NOT EXISTS idx_shipments_deadline ON shipments(deadline);
            CREATE INDEX IF NOT EXISTS idx_requests_requester ON requests(requester_id);
            CREATE INDEX IF NOT EXISTS idx_messages_listing ON messages(listing_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_reviews_listing ON reviews(listing_id);
            CREATE INDEX IF NOT EXISTS idx_reviews_reviewed ON reviews(reviewed_user_id);
            "#,
        )
        .execute(&self.writer)
        .await?;

        Ok(())
    }

    /// Starts a write transaction on the single writer connection.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.writer.begin().await?)
    }

    pub fn reader(&self) -> &SqlitePool {
        &self.reader
    }

    pub async fn get_listing(&self, id: ListingId) -> Result<Option<Listing>> {
        let mut conn = self.reader.acquire().await?;
        fetch_listing(&mut conn, id).await
    }

    pub async fn get_shipment(&self, id: ShipmentId) -> Result<Option<Shipment>> {
        let mut conn = self.reader.acquire().await?;
        fetch_shipment(&mut conn, id).await
    }

    pub async fn get_request(&self, id: RequestId) -> Result<Option<MatchRequest>> {
        let mut conn = self.reader.acquire().await?;
        fetch_request(&mut conn, id).await
    }

    pub async fn get_requests_for_listing(&self, listing_id: ListingId) -> Result<Vec<MatchRequest>> {
        let mut conn = self.reader.acquire().await?;
        requests_for_listing(&mut conn, listing_id).await
    }
}

pub struct ListingSearch {
    pub role: Option<ListingRole>,
    pub text: Option<String>,
    pub from_country: Option<String>,
    pub to_country: Option<String>,
    pub item_type: Option<String>,
    pub status: Option<ListingStatus>,
    pub limit: i64,
    pub offset: i64,
}

pub struct ShipmentSearch {
    pub owner_id: Option<UserId>,
    pub open_only: bool,
    pub text: Option<String>,
    pub from_country: Option<String>,
    pub to_country: Option<String>,
    pub deadline_from: Option<NaiveDate>,
    pub deadline_to: Option<NaiveDate>,
    pub limit: i64,
    pub offset: i64,
}

fn like_pattern(text: &str) -> String {
    let escaped = text
        .to_lowercase()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn push_text_match(qb: &mut QueryBuilder<'_, Sqlite>, columns: &[&str], text: &str) {
    let pattern = like_pattern(text);
    qb.push(" AND (");
    for (i, column) in columns.iter().enumerate() {
        if i > 0 {
            qb.push(" OR ");
        }
        qb.push(format!("lower({}) LIKE ", column))
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\'");
    }
    qb.push(")");
}

fn parse_id(value: String) -> Result<uuid::Uuid> {
    Ok(uuid::Uuid::parse_str(&value)?)
}

/// Stored enum columns that fail to parse are corruption, not caller input.
fn parse_enum<T: FromStr<Err = MatchError>>(value: String) -> Result<T> {
    value
        .parse()
        .map_err(|e: MatchError| MatchError::Decode(e.to_string()))
}

fn parse_extra(value: String) -> Result<serde_json::Value> {
    Ok(serde_json::from_str(&value)?)
}

fn route_from_row(row: &SqliteRow) -> Result<Route> {
    Ok(Route {
        from_country: row.try_get("from_country")?,
        from_city: row.try_get("from_city")?,
        to_country: row.try_get("to_country")?,
        to_city: row.try_get("to_city")?,
    })
}

fn listing_from_row(row: &SqliteRow) -> Result<Listing> {
    Ok(Listing {
        id: parse_id(row.try_get("id")?)?,
        owner_id: parse_id(row.try_get("owner_id")?)?,
        role: parse_enum(row.try_get("role")?)?,
        route: route_from_row(row)?,
        depart_on: row.try_get("depart_on")?,
        arrive_by: row.try_get("arrive_by")?,
        available_weight: row.try_get("available_weight")?,
        reward: Money {
            amount: row.try_get("reward_amount")?,
            currency: row.try_get("reward_currency")?,
        },
        item_type: row.try_get("item_type")?,
        description: row.try_get("description")?,
        status: parse_enum(row.try_get("status")?)?,
        is_active: row.try_get("is_active")?,
        extra: parse_extra(row.try_get("extra")?)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn shipment_from_row(row: &SqliteRow) -> Result<Shipment> {
    Ok(Shipment {
        id: parse_id(row.try_get("id")?)?,
        owner_id: parse_id(row.try_get("owner_id")?)?,
        route: route_from_row(row)?,
        deadline: row.try_get("deadline")?,
        item_description: row.try_get("item_description")?,
        item_weight: row.try_get("item_weight")?,
        budget: Money {
            amount: row.try_get("budget_amount")?,
            currency: row.try_get("budget_currency")?,
        },
        status: parse_enum(row.try_get("status")?)?,
        is_active: row.try_get("is_active")?,
        extra: parse_extra(row.try_get("extra")?)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn request_from_row(row: &SqliteRow) -> Result<MatchRequest> {
    let counter_amount: Option<f64> = row.try_get("counter_amount")?;
    let counter_currency: Option<String> = row.try_get("counter_currency")?;
    let counter_offer = match (counter_amount, counter_currency) {
        (Some(amount), Some(currency)) => Some(CounterOffer {
            amount,
            currency,
            note: row.try_get("counter_note")?,
        }),
        _ => None,
    };

    Ok(MatchRequest {
        id: parse_id(row.try_get("id")?)?,
        listing_id: parse_id(row.try_get("listing_id")?)?,
        requester_id: parse_id(row.try_get("requester_id")?)?,
        shipment_id: row
            .try_get::<Option<String>, _>("shipment_id")?
            .map(parse_id)
            .transpose()?,
        offer: Money {
            amount: row.try_get("offer_amount")?,
            currency: row.try_get("offer_currency")?,
        },
        counter_offer,
        note: row.try_get("note")?,
        status: parse_enum(row.try_get("status")?)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn message_from_row(row: &SqliteRow) -> Result<Message> {
    Ok(Message {
        id: parse_id(row.try_get("id")?)?,
        listing_id: parse_id(row.try_get("listing_id")?)?,
        sender_id: parse_id(row.try_get("sender_id")?)?,
        sender_name: row.try_get("sender_name")?,
        body: row.try_get("body")?,
        created_at: row.try_get("created_at")?,
    })
}

fn review_from_row(row: &SqliteRow) -> Result<Review> {
    let rating: i64 = row.try_get("rating")?;
    Ok(Review {
        id: parse_id(row.try_get("id")?)?,
        listing_id: parse_id(row.try_get("listing_id")?)?,
        reviewer_id: parse_id(row.try_get("reviewer_id")?)?,
        reviewed_user_id: parse_id(row.try_get("reviewed_user_id")?)?,
        rating: u8::try_from(rating)
            .map_err(|_| MatchError::Decode(format!("Stored rating out of range: {}", rating)))?,
        comment: row.try_get("comment")?,
        created_at: row.try_get("created_at")?,
    })
}

pub async fn insert_listing(conn: &mut SqliteConnection, listing: &Listing) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO listings (id, owner_id, role, from_country, from_city, to_country, to_city,
            depart_on, arrive_by, available_weight, reward_amount, reward_currency, item_type,
            description, status, is_active, extra, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(listing.id.to_string())
    .bind(listing.owner_id.to_string())
    .bind(listing.role.as_str())
    .bind(&listing.route.from_country)
    .bind(&listing.route.from_city)
    .bind(&listing.route.to_country)
    .bind(&listing.route.to_city)
    .bind(listing.depart_on)
    .bind(listing.arrive_by)
    .bind(listing.available_weight)
    .bind(listing.reward.amount)
    .bind(&listing.reward.currency)
    .bind(&listing.item_type)
    .bind(&listing.description)
    .bind(listing.status.as_str())
    .bind(listing.is_active)
    .bind(serde_json::to_string(&listing.extra)?)
    .bind(listing.created_at)
    .bind(listing.updated_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Writes the owner-editable columns. Status is written only by [`set_listing_status`].
pub async fn update_listing(conn: &mut SqliteConnection, listing: &Listing) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE listings
        SET from_country = ?, from_city = ?, to_country = ?, to_city = ?, depart_on = ?,
            arrive_by = ?, available_weight = ?, reward_amount = ?, reward_currency = ?,
            item_type = ?, description = ?, extra = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&listing.route.from_country)
    .bind(&listing.route.from_city)
    .bind(&listing.route.to_country)
    .bind(&listing.route.to_city)
    .bind(listing.depart_on)
    .bind(listing.arrive_by)
    .bind(listing.available_weight)
    .bind(listing.reward.amount)
    .bind(&listing.reward.currency)
    .bind(&listing.item_type)
    .bind(&listing.description)
    .bind(serde_json::to_string(&listing.extra)?)
    .bind(listing.updated_at)
    .bind(listing.id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn set_listing_status(
    conn: &mut SqliteConnection,
    id: ListingId,
    status: ListingStatus,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE listings SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(now)
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn deactivate_listing(conn: &mut SqliteConnection, id: ListingId, now: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE listings SET is_active = 0, updated_at = ? WHERE id = ?")
        .bind(now)
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn fetch_listing(conn: &mut SqliteConnection, id: ListingId) -> Result<Option<Listing>> {
    let row = sqlx::query("SELECT * FROM listings WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(listing_from_row).transpose()
}

pub async fn search_listings(conn: &mut SqliteConnection, search: &ListingSearch) -> Result<Vec<Listing>> {
    let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM listings WHERE is_active = 1");
    if let Some(role) = search.role {
        qb.push(" AND role = ").push_bind(role.as_str());
    }
    if let Some(status) = search.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(country) = &search.from_country {
        qb.push(" AND lower(from_country) = ").push_bind(country.to_lowercase());
    }
    if let Some(country) = &search.to_country {
        qb.push(" AND lower(to_country) = ").push_bind(country.to_lowercase());
    }
    if let Some(item_type) = &search.item_type {
        qb.push(" AND lower(item_type) = ").push_bind(item_type.to_lowercase());
    }
    if let Some(text) = &search.text {
        push_text_match(
            &mut qb,
            &["item_type", "description", "from_city", "to_city", "from_country", "to_country"],
            text,
        );
    }
    qb.push(" ORDER BY created_at DESC LIMIT ")
        .push_bind(search.limit)
        .push(" OFFSET ")
        .push_bind(search.offset);

    let rows = qb.build().fetch_all(&mut *conn).await?;
    rows.iter().map(listing_from_row).collect()
}

pub async fn insert_shipment(conn: &mut SqliteConnection, shipment: &Shipment) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO shipments (id, owner_id, from_country, from_city, to_country, to_city, deadline,
            item_description, item_weight, budget_amount, budget_currency, status, is_active, extra,
            created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(shipment.id.to_string())
    .bind(shipment.owner_id.to_string())
    .bind(&shipment.route.from_country)
    .bind(&shipment.route.from_city)
    .bind(&shipment.route.to_country)
    .bind(&shipment.route.to_city)
    .bind(shipment.deadline)
    .bind(&shipment.item_description)
    .bind(shipment.item_weight)
    .bind(shipment.budget.amount)
    .bind(&shipment.budget.currency)
    .bind(shipment.status.as_str())
    .bind(shipment.is_active)
    .bind(serde_json::to_string(&shipment.extra)?)
    .bind(shipment.created_at)
    .bind(shipment.updated_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn update_shipment(conn: &mut SqliteConnection, shipment: &Shipment) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE shipments
        SET from_country = ?, from_city = ?, to_country = ?, to_city = ?, deadline = ?,
            item_description = ?, item_weight = ?, budget_amount = ?, budget_currency = ?,
            extra = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&shipment.route.from_country)
    .bind(&shipment.route.from_city)
    .bind(&shipment.route.to_country)
    .bind(&shipment.route.to_city)
    .bind(shipment.deadline)
    .bind(&shipment.item_description)
    .bind(shipment.item_weight)
    .bind(shipment.budget.amount)
    .bind(&shipment.budget.currency)
    .bind(serde_json::to_string(&shipment.extra)?)
    .bind(shipment.updated_at)
    .bind(shipment.id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn set_shipment_status(
    conn: &mut SqliteConnection,
    id: ShipmentId,
    status: ShipmentStatus,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE shipments SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(now)
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn deactivate_shipment(conn: &mut SqliteConnection, id: ShipmentId, now: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE shipments SET is_active = 0, updated_at = ? WHERE id = ?")
        .bind(now)
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn fetch_shipment(conn: &mut SqliteConnection, id: ShipmentId) -> Result<Option<Shipment>> {
    let row = sqlx::query("SELECT * FROM shipments WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(shipment_from_row).transpose()
}

pub async fn search_shipments(conn: &mut SqliteConnection, search: &ShipmentSearch) -> Result<Vec<Shipment>> {
    let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM shipments WHERE is_active = 1");
    if let Some(owner_id) = search.owner_id {
        qb.push(" AND owner_id = ").push_bind(owner_id.to_string());
    }
    if search.open_only {
        qb.push(" AND status = ").push_bind(ShipmentStatus::Open.as_str());
    }
    if let Some(country) = &search.from_country {
        qb.push(" AND lower(from_country) = ").push_bind(country.to_lowercase());
    }
    if let Some(country) = &search.to_country {
        qb.push(" AND lower(to_country) = ").push_bind(country.to_lowercase());
    }
    if let Some(from) = search.deadline_from {
        qb.push(" AND deadline >= ").push_bind(from);
    }
    if let Some(to) = search.deadline_to {
        qb.push(" AND deadline <= ").push_bind(to);
    }
    if let Some(text) = &search.text {
        push_text_match(
            &mut qb,
            &["item_description", "from_city", "to_city", "from_country", "to_country"],
            text,
        );
    }
    qb.push(" ORDER BY created_at DESC LIMIT ")
        .push_bind(search.limit)
        .push(" OFFSET ")
        .push_bind(search.offset);

    let rows = qb.build().fetch_all(&mut *conn).await?;
    rows.iter().map(shipment_from_row).collect()
}

pub async fn fetch_request(conn: &mut SqliteConnection, id: RequestId) -> Result<Option<MatchRequest>> {
    let row = sqlx::query("SELECT * FROM requests WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(request_from_row).transpose()
}

pub async fn fetch_request_for(
    conn: &mut SqliteConnection,
    listing_id: ListingId,
    requester_id: UserId,
) -> Result<Option<MatchRequest>> {
    let row = sqlx::query("SELECT * FROM requests WHERE listing_id = ? AND requester_id = ?")
        .bind(listing_id.to_string())
        .bind(requester_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(request_from_row).transpose()
}

pub async fn requests_for_listing(conn: &mut SqliteConnection, listing_id: ListingId) -> Result<Vec<MatchRequest>> {
    let rows = sqlx::query("SELECT * FROM requests WHERE listing_id = ? ORDER BY created_at ASC")
        .bind(listing_id.to_string())
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(request_from_row).collect()
}

pub async fn requests_by_requester(conn: &mut SqliteConnection, requester_id: UserId) -> Result<Vec<MatchRequest>> {
    let rows = sqlx::query("SELECT * FROM requests WHERE requester_id = ? ORDER BY updated_at DESC")
        .bind(requester_id.to_string())
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(request_from_row).collect()
}

pub async fn count_requests(conn: &mut SqliteConnection, listing_id: ListingId) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) FROM requests WHERE listing_id = ?")
        .bind(listing_id.to_string())
        .fetch_one(&mut *conn)
        .await?;
    Ok(row.try_get(0)?)
}

/// Finds another request that currently holds a claim on `shipment_id`.
pub async fn active_request_for_shipment(
    conn: &mut SqliteConnection,
    shipment_id: ShipmentId,
    excluding: Option<RequestId>,
) -> Result<Option<RequestId>> {
    let row = sqlx::query(
        r#"
        SELECT id FROM requests
        WHERE shipment_id = ? AND status IN ('pending', 'counter_offer', 'accepted') AND id != ?
        LIMIT 1
        "#,
    )
    .bind(shipment_id.to_string())
    .bind(excluding.map(|id| id.to_string()).unwrap_or_default())
    .fetch_optional(&mut *conn)
    .await?;

    row.map(|row| parse_id(row.try_get("id")?)).transpose()
}

pub async fn insert_request(conn: &mut SqliteConnection, request: &MatchRequest) -> Result<()> {
    let counter = request.counter_offer.as_ref();
    sqlx::query(
        r#"
        INSERT INTO requests (id, listing_id, requester_id, shipment_id, offer_amount, offer_currency,
            counter_amount, counter_currency, counter_note, note, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(request.id.to_string())
    .bind(request.listing_id.to_string())
    .bind(request.requester_id.to_string())
    .bind(request.shipment_id.map(|id| id.to_string()))
    .bind(request.offer.amount)
    .bind(&request.offer.currency)
    .bind(counter.map(|c| c.amount))
    .bind(counter.map(|c| c.currency.clone()))
    .bind(counter.and_then(|c| c.note.clone()))
    .bind(&request.note)
    .bind(request.status.as_str())
    .bind(request.created_at)
    .bind(request.updated_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn save_request(conn: &mut SqliteConnection, request: &MatchRequest) -> Result<()> {
    let counter = request.counter_offer.as_ref();
    sqlx::query(
        r#"
        UPDATE requests
        SET shipment_id = ?, offer_amount = ?, offer_currency = ?, counter_amount = ?,
            counter_currency = ?, counter_note = ?, note = ?, status = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(request.shipment_id.map(|id| id.to_string()))
    .bind(request.offer.amount)
    .bind(&request.offer.currency)
    .bind(counter.map(|c| c.amount))
    .bind(counter.map(|c| c.currency.clone()))
    .bind(counter.and_then(|c| c.note.clone()))
    .bind(&request.note)
    .bind(request.status.as_str())
    .bind(request.updated_at)
    .bind(request.id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Rejects every still-negotiable request on the listing except `keep`.
pub async fn reject_siblings(
    conn: &mut SqliteConnection,
    listing_id: ListingId,
    keep: RequestId,
    now: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE requests SET status = 'rejected', updated_at = ?
        WHERE listing_id = ? AND id != ? AND status IN ('pending', 'counter_offer')
        "#,
    )
    .bind(now)
    .bind(listing_id.to_string())
    .bind(keep.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

pub async fn insert_message(conn: &mut SqliteConnection, message: &Message) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO messages (id, listing_id, sender_id, body, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(message.id.to_string())
    .bind(message.listing_id.to_string())
    .bind(message.sender_id.to_string())
    .bind(&message.body)
    .bind(message.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// The latest `limit` messages, oldest first. Unknown senders get `fallback_name`.
pub async fn recent_messages(
    conn: &mut SqliteConnection,
    listing_id: ListingId,
    limit: i64,
    fallback_name: &str,
) -> Result<Vec<Message>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM (
            SELECT m.id, m.listing_id, m.sender_id, m.body, m.created_at, m.rowid AS seq,
                COALESCE(p.display_name, ?) AS sender_name
            FROM messages m
            LEFT JOIN profiles p ON p.user_id = m.sender_id
            WHERE m.listing_id = ?
            ORDER BY m.created_at DESC, m.rowid DESC
            LIMIT ?
        ) ORDER BY created_at ASC, seq ASC
        "#,
    )
    .bind(fallback_name)
    .bind(listing_id.to_string())
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(message_from_row).collect()
}

pub async fn upsert_profile(conn: &mut SqliteConnection, user_id: UserId, display_name: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO profiles (user_id, display_name, updated_at) VALUES (?, ?, ?)
        ON CONFLICT(user_id) DO UPDATE SET display_name = excluded.display_name, updated_at = excluded.updated_at
        "#,
    )
    .bind(user_id.to_string())
    .bind(display_name)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn insert_review(conn: &mut SqliteConnection, review: &Review) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO reviews (id, listing_id, reviewer_id, reviewed_user_id, rating, comment, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(review.id.to_string())
    .bind(review.listing_id.to_string())
    .bind(review.reviewer_id.to_string())
    .bind(review.reviewed_user_id.to_string())
    .bind(review.rating as i64)
    .bind(&review.comment)
    .bind(review.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn reviews_for_listing(conn: &mut SqliteConnection, listing_id: ListingId) -> Result<Vec<Review>> {
    let rows = sqlx::query("SELECT * FROM reviews WHERE listing_id = ? ORDER BY created_at DESC")
        .bind(listing_id.to_string())
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(review_from_row).collect()
}

pub async fn rating_for_listing(conn: &mut SqliteConnection, listing_id: ListingId) -> Result<RatingSummary> {
    let row = sqlx::query("SELECT AVG(rating) AS average, COUNT(*) AS count FROM reviews WHERE listing_id = ?")
        .bind(listing_id.to_string())
        .fetch_one(&mut *conn)
        .await?;
    rating_from_row(&row)
}

pub async fn rating_for_user(conn: &mut SqliteConnection, user_id: UserId) -> Result<RatingSummary> {
    let row = sqlx::query(
        "SELECT AVG(rating) AS average, COUNT(*) AS count FROM reviews WHERE reviewed_user_id = ?",
    )
    .bind(user_id.to_string())
    .fetch_one(&mut *conn)
    .await?;
    rating_from_row(&row)
}

fn rating_from_row(row: &SqliteRow) -> Result<RatingSummary> {
    let count: i64 = row.try_get("count")?;
    Ok(RatingSummary {
        average: row.try_get("average")?,
        count: count as u32,
    })
}
