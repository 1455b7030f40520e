use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{DatabaseConnection, Set};
use tracing::{debug, info, instrument, warn};

use crate::{
    auth::Actor,
    entities::order::{ActiveModel as OrderActiveModel, Model as OrderModel, OrderStatus},
    errors::ServiceError,
    events::{self, Event, EventSender},
    notifications::OrderStatusChange,
    repositories::OrderRepository,
};

/// Writes order status changes.
///
/// Regular updates are checked against the order adjacency table. The
/// administrative override skips that check and leaves an audit record.
#[derive(Clone)]
pub struct OrderStatusService {
    db: Arc<DatabaseConnection>,
    event_sender: Option<Arc<EventSender>>,
    orders: OrderRepository,
}

impl OrderStatusService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db,
            event_sender,
            orders: OrderRepository::new(),
        }
    }

    /// Moves an order along the adjacency table. Staff only.
    #[instrument(skip(self, actor), fields(actor_id = actor.user_id, new_status = %new_status))]
    pub async fn update_status(
        &self,
        actor: &Actor,
        order_id: i64,
        new_status: OrderStatus,
    ) -> Result<OrderModel, ServiceError> {
        actor.require_staff("update order status")?;

        let order = self.orders.get(&*self.db, order_id).await?;
        self.transition(order, new_status, |_| {}).await
    }

    /// Sets any status regardless of the adjacency table. Admin only; every
    /// use is written to the `audit` log target.
    #[instrument(skip(self, actor, reason), fields(actor_id = actor.user_id, new_status = %new_status))]
    pub async fn override_status(
        &self,
        actor: &Actor,
        order_id: i64,
        new_status: OrderStatus,
        reason: &str,
    ) -> Result<OrderModel, ServiceError> {
        actor.require_admin("override order status")?;
        if reason.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "an override requires a reason".to_string(),
            ));
        }

        let order = self.orders.get(&*self.db, order_id).await?;
        let old_status = order.status;
        let updated = self.write(order, new_status, |_| {}).await?;

        warn!(
            target: "audit",
            actor_id = actor.user_id,
            role = %actor.role,
            order_id,
            old_status = %old_status,
            new_status = %new_status,
            reason,
            "order status overridden"
        );
        Ok(updated)
    }

    /// Validated transition of an already loaded order. `edit` may set extra
    /// columns that belong to the same write.
    pub(crate) async fn transition<F>(
        &self,
        order: OrderModel,
        new_status: OrderStatus,
        edit: F,
    ) -> Result<OrderModel, ServiceError>
    where
        F: FnOnce(&mut OrderActiveModel),
    {
        if order.status == new_status {
            debug!(order_id = order.id, status = %new_status, "status unchanged");
            return Ok(order);
        }
        if let Err(e) = order.status.validate_transition(new_status) {
            warn!(
                order_id = order.id,
                from = %order.status,
                to = %new_status,
                "invalid order status transition"
            );
            return Err(e);
        }
        self.write(order, new_status, edit).await
    }

    /// Unchecked write with version check, timestamps and event.
    pub(crate) async fn write<F>(
        &self,
        order: OrderModel,
        new_status: OrderStatus,
        edit: F,
    ) -> Result<OrderModel, ServiceError>
    where
        F: FnOnce(&mut OrderActiveModel),
    {
        let old_status = order.status;
        let version = order.version;
        let mut active: OrderActiveModel = order.into();
        stamp_status(&mut active, new_status, Utc::now());
        edit(&mut active);

        let updated = self
            .orders
            .update_versioned(&*self.db, active, version)
            .await?;

        info!(
            order_id = updated.id,
            from = %old_status,
            to = %new_status,
            "Order status updated"
        );
        if old_status != updated.status {
            events::publish(
                self.event_sender.as_ref(),
                Event::OrderStatusChanged(OrderStatusChange {
                    user_id: updated.user_id,
                    order_id: updated.id,
                    order_number: updated.order_number.clone(),
                    old_status,
                    new_status: updated.status,
                    tracking_code: updated.tracking_code.clone(),
                }),
            );
        }
        Ok(updated)
    }
}

/// Sets `status` and the timestamps that go with it.
pub(crate) fn stamp_status(active: &mut OrderActiveModel, status: OrderStatus, now: DateTime<Utc>) {
    active.status = Set(status);
    active.updated_at = Set(now);
    match status {
        OrderStatus::Shipped => active.shipped_at = Set(Some(now)),
        OrderStatus::Delivered => active.delivered_at = Set(Some(now)),
        _ => {}
    }
}
