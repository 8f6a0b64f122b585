use crate::{
    auth::Identity,
    config::LimitsConfig,
    database::{self, Database, ShipmentSearch},
    listings::non_blank,
    model::*,
    MatchError, Result, ShipmentId,
};
use chrono::Utc;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct ShipmentService {
    db: Database,
    limits: LimitsConfig,
}

impl ShipmentService {
    pub fn new(db: Database, limits: LimitsConfig) -> Self {
        Self { db, limits }
    }

    pub async fn create(&self, actor: &Identity, input: NewShipment) -> Result<Shipment> {
        let shipment = Shipment::create(actor.user_id, input)?;

        let mut tx = self.db.begin().await?;
        database::insert_shipment(&mut tx, &shipment).await?;
        tx.commit().await?;

        info!(shipment_id = %shipment.id, owner_id = %shipment.owner_id, "shipment created");
        Ok(shipment)
    }

    /// Every active shipment of the caller, whatever its status.
    pub async fn list_mine(&self, actor: &Identity, limit: Option<u32>, offset: Option<u32>) -> Result<Vec<Shipment>> {
        let (limit, offset) = self.limits.page(limit, offset);
        let search = ShipmentSearch {
            owner_id: Some(actor.user_id),
            open_only: false,
            text: None,
            from_country: None,
            to_country: None,
            deadline_from: None,
            deadline_to: None,
            limit,
            offset,
        };
        let mut conn = self.db.reader().acquire().await?;
        database::search_shipments(&mut conn, &search).await
    }

    /// Open shipments any traveler may browse.
    pub async fn list_public(&self, filter: ShipmentFilter) -> Result<Vec<Shipment>> {
        if let (Some(from), Some(to)) = (filter.deadline_from, filter.deadline_to) {
            if from > to {
                return Err(MatchError::validation("deadline_from must not be after deadline_to"));
            }
        }
        let (limit, offset) = self.limits.page(filter.limit, filter.offset);
        let search = ShipmentSearch {
            owner_id: None,
            open_only: true,
            text: non_blank(filter.q),
            from_country: non_blank(filter.from_country),
            to_country: non_blank(filter.to_country),
            deadline_from: filter.deadline_from,
            deadline_to: filter.deadline_to,
            limit,
            offset,
        };
        let mut conn = self.db.reader().acquire().await?;
        let shipments = database::search_shipments(&mut conn, &search).await?;
        debug!(count = shipments.len(), "listed public shipments");
        Ok(shipments)
    }

    pub async fn get(&self, id: ShipmentId, viewer: Option<&Identity>) -> Result<Shipment> {
        let shipment = self
            .db
            .get_shipment(id)
            .await?
            .ok_or(MatchError::NotFound("Shipment"))?;
        if !shipment.is_active && !viewer.is_some_and(|v| v.owns(shipment.owner_id)) {
            return Err(MatchError::NotFound("Shipment"));
        }
        Ok(shipment)
    }

    pub async fn update(&self, actor: &Identity, id: ShipmentId, update: ShipmentUpdate) -> Result<Shipment> {
        let mut tx = self.db.begin().await?;
        let mut shipment = self.owned(&mut tx, actor, id).await?;

        shipment.apply(update)?;
        database::update_shipment(&mut tx, &shipment).await?;
        tx.commit().await?;

        info!(shipment_id = %id, "shipment updated");
        Ok(shipment)
    }

    /// Soft delete, refused once a match depends on the shipment.
    pub async fn delete(&self, actor: &Identity, id: ShipmentId) -> Result<()> {
        let mut tx = self.db.begin().await?;
        let shipment = self.owned(&mut tx, actor, id).await?;
        if shipment.status.is_locked() {
            warn!(shipment_id = %id, status = %shipment.status, "locked shipment delete refused");
            return Err(MatchError::ShipmentLocked);
        }

        database::deactivate_shipment(&mut tx, id, Utc::now()).await?;
        tx.commit().await?;

        info!(shipment_id = %id, "shipment deactivated");
        Ok(())
    }

    pub async fn advance(&self, actor: &Identity, id: ShipmentId, next: ShipmentStatus) -> Result<Shipment> {
        let mut tx = self.db.begin().await?;
        let mut shipment = self.owned(&mut tx, actor, id).await?;
        if !shipment.status.can_advance_to(next) {
            return Err(MatchError::InvalidStatusTransition {
                from: shipment.status.to_string(),
                to: next.to_string(),
            });
        }

        let now = Utc::now();
        database::set_shipment_status(&mut tx, id, next, now).await?;
        tx.commit().await?;

        info!(shipment_id = %id, from = %shipment.status, to = %next, "shipment status changed");
        shipment.status = next;
        shipment.updated_at = now;
        Ok(shipment)
    }

    async fn owned(
        &self,
        conn: &mut sqlx::SqliteConnection,
        actor: &Identity,
        id: ShipmentId,
    ) -> Result<Shipment> {
        let shipment = database::fetch_shipment(conn, id)
            .await?
            .filter(|s| s.is_active)
            .ok_or(MatchError::NotFound("Shipment"))?;
        if !actor.owns(shipment.owner_id) {
            warn!(shipment_id = %id, user_id = %actor.user_id, "shipment change refused");
            return Err(MatchError::forbidden("Only the owner can change this shipment"));
        }
        Ok(shipment)
    }
}
