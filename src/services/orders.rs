use std::sync::Arc;

use chrono::{Duration, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;
use sea_orm::{DatabaseConnection, Set, TransactionTrait};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    auth::Actor,
    config::OrderConfig,
    entities::{
        order::ActiveModel as OrderActiveModel,
        order_item::ActiveModel as OrderItemActiveModel,
        prelude::{OrderItemModel, OrderModel},
        OrderStatus, PaymentMethod, ShippingAddress,
    },
    errors::ServiceError,
    events::{self, Event, EventSender},
    money,
    repositories::OrderRepository,
};

use super::append_note;
use super::commerce::cart::{CartLine, CartProvider};
use super::commerce::catalog::ProductCatalog;
use super::order_status::OrderStatusService;

/// Input for turning a user's cart into an order.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateOrderRequest {
    pub user_id: i64,
    pub payment_method: PaymentMethod,
    #[validate]
    pub shipping_address: ShippingAddress,
    /// Falls back to the configured default when absent
    #[validate(custom = "validate_non_negative")]
    pub shipping_cost: Option<Decimal>,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

fn validate_non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(ValidationError::new("must_not_be_negative"));
    }
    Ok(())
}

/// An order header with its lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderWithItems {
    pub order: OrderModel,
    pub items: Vec<OrderItemModel>,
}

impl OrderWithItems {
    /// Σ quantity over all lines
    pub fn total_items(&self) -> i64 {
        self.items.iter().map(|i| i64::from(i.quantity)).sum()
    }
}

/// An order line with the product name resolved from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLineDetails {
    pub item: OrderItemModel,
    /// `None` when the catalog no longer knows the product
    pub product_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDetails {
    pub order: OrderModel,
    pub lines: Vec<OrderLineDetails>,
    pub full_shipping_address: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotals {
    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub total: Decimal,
}

/// subtotal = Σ line subtotals, total = subtotal + shipping (zero if unset).
pub fn compute_totals<I>(line_subtotals: I, shipping_cost: Option<Decimal>) -> OrderTotals
where
    I: IntoIterator<Item = Decimal>,
{
    let subtotal = money::sum(line_subtotals);
    let shipping_cost = money::round_money(shipping_cost.unwrap_or(Decimal::ZERO));
    OrderTotals {
        subtotal,
        shipping_cost,
        total: subtotal + shipping_cost,
    }
}

/// `ORD-<millis>-<8 uppercase hex>`
pub fn generate_order_number(now: chrono::DateTime<Utc>) -> String {
    let suffix: String = Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(8)
        .collect();
    format!("ORD-{}-{}", now.timestamp_millis(), suffix.to_uppercase())
}

fn validate_line(line: &CartLine) -> Result<(), ServiceError> {
    if line.quantity <= 0 {
        return Err(ServiceError::ValidationError(format!(
            "product {} has non-positive quantity {}",
            line.product_id, line.quantity
        )));
    }
    if line.unit_price.is_sign_negative() && !line.unit_price.is_zero() {
        return Err(ServiceError::ValidationError(format!(
            "product {} has negative unit price {}",
            line.product_id, line.unit_price
        )));
    }
    Ok(())
}

/// Order engine: builds orders from carts and drives the order state
/// machine.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    cart: Arc<dyn CartProvider>,
    catalog: Arc<dyn ProductCatalog>,
    config: OrderConfig,
    event_sender: Option<Arc<EventSender>>,
    status: OrderStatusService,
    orders: OrderRepository,
}

impl OrderService {
    /// Creates a new order service instance
    pub fn new(
        db: Arc<DatabaseConnection>,
        cart: Arc<dyn CartProvider>,
        catalog: Arc<dyn ProductCatalog>,
        config: OrderConfig,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        let status = OrderStatusService::new(db.clone(), event_sender.clone());
        Self {
            db,
            cart,
            catalog,
            config,
            event_sender,
            status,
            orders: OrderRepository::new(),
        }
    }

    /// Creates a PENDING order from the user's cart.
    ///
    /// The total must be a payable amount before anything is written. Lines
    /// are copied at the price recorded in the cart. The order and
    /// its items are written in one transaction; the cart is cleared only
    /// after that transaction commits, and a failure to clear it is logged
    /// without failing the order.
    #[instrument(skip(self, request), fields(user_id = request.user_id, method = %request.payment_method))]
    pub async fn create_order_from_cart(
        &self,
        request: CreateOrderRequest,
    ) -> Result<OrderWithItems, ServiceError> {
        request.validate()?;
        let user_id = request.user_id;

        let lines = self.cart.get_lines(user_id).await?.ok_or_else(|| {
            warn!(user_id, "No cart for user");
            ServiceError::NotFound(format!("Cart for user {} not found", user_id))
        })?;
        if lines.is_empty() {
            warn!(user_id, "Checkout attempted with an empty cart");
            return Err(ServiceError::InvalidState("Cart is empty".to_string()));
        }

        let shipping_cost = request
            .shipping_cost
            .unwrap_or(self.config.default_shipping_cost);
        let totals = compute_totals(lines.iter().map(CartLine::line_total), Some(shipping_cost));
        if let Err(reason) = money::payable_amount(totals.total) {
            warn!(user_id, total = %totals.total, reason, "Order total cannot be paid");
            return Err(ServiceError::ValidationError(format!(
                "order total {} cannot be paid: {}",
                money::format_brl(totals.total),
                reason
            )));
        }
        let now = Utc::now();
        let address = request.shipping_address;

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order creation");
            ServiceError::DatabaseError(e)
        })?;

        let order = self
            .orders
            .insert(
                &txn,
                OrderActiveModel {
                    order_number: Set(generate_order_number(now)),
                    user_id: Set(user_id),
                    subtotal: Set(totals.subtotal),
                    shipping_cost: Set(totals.shipping_cost),
                    total: Set(totals.total),
                    status: Set(OrderStatus::Pending),
                    payment_method: Set(request.payment_method),
                    payment_confirmed: Set(false),
                    shipping_street: Set(address.street),
                    shipping_number: Set(address.number),
                    shipping_complement: Set(address.complement),
                    shipping_neighborhood: Set(address.neighborhood),
                    shipping_city: Set(address.city),
                    shipping_state: Set(address.state),
                    shipping_zip_code: Set(address.zip_code),
                    notes: Set(request.notes),
                    tracking_code: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                    shipped_at: Set(None),
                    delivered_at: Set(None),
                    version: Set(1),
                    ..Default::default()
                },
            )
            .await?;

        // an invalid line returns early and the dropped transaction rolls back
        let mut items = Vec::with_capacity(lines.len());
        for line in &lines {
            validate_line(line)?;
            let item = self
                .orders
                .insert_item(
                    &txn,
                    OrderItemActiveModel {
                        order_id: Set(order.id),
                        product_id: Set(line.product_id),
                        quantity: Set(line.quantity),
                        unit_price: Set(line.unit_price),
                        ..Default::default()
                    },
                )
                .await?;
            items.push(item);
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = order.id, "Failed to commit order creation transaction");
            ServiceError::DatabaseError(e)
        })?;

        info!(
            order_id = order.id,
            order_number = %order.order_number,
            items = items.len(),
            total = %order.total,
            "Order created from cart"
        );
        events::publish(
            self.event_sender.as_ref(),
            Event::OrderCreated {
                order_id: order.id,
                user_id,
                order_number: order.order_number.clone(),
                total: order.total,
            },
        );

        match self.cart.clear(user_id).await {
            Ok(()) => events::publish(self.event_sender.as_ref(), Event::CartCleared { user_id }),
            Err(e) => warn!(user_id, order_id = order.id, error = %e, "Failed to clear cart after checkout"),
        }

        Ok(OrderWithItems { order, items })
    }

    /// Retrieves an order and its items
    #[instrument(skip(self))]
    pub async fn get_order(&self, order_id: i64) -> Result<OrderWithItems, ServiceError> {
        let db = &*self.db;
        let order = self.orders.get(db, order_id).await?;
        let items = self.orders.items_for(db, order_id).await?;
        Ok(OrderWithItems { order, items })
    }

    /// Looks an order up by its public `ORD-…` number.
    #[instrument(skip(self))]
    pub async fn get_order_by_number(
        &self,
        order_number: &str,
    ) -> Result<OrderWithItems, ServiceError> {
        let db = &*self.db;
        let order = self
            .orders
            .find_by_order_number(db, order_number.trim())
            .await?
            .ok_or_else(|| ServiceError::not_found("Order", order_number))?;
        let items = self.orders.items_for(db, order.id).await?;
        Ok(OrderWithItems { order, items })
    }

    /// Order with product names looked up live in the catalog.
    #[instrument(skip(self))]
    pub async fn get_order_details(&self, order_id: i64) -> Result<OrderDetails, ServiceError> {
        let OrderWithItems { order, items } = self.get_order(order_id).await?;

        let mut lines = Vec::with_capacity(items.len());
        for item in items {
            let product_name = match self.catalog.get_by_id(item.product_id).await {
                Ok(product) => product.map(|p| p.name),
                Err(e) => {
                    warn!(product_id = item.product_id, error = %e, "Catalog lookup failed");
                    None
                }
            };
            lines.push(OrderLineDetails { item, product_name });
        }

        Ok(OrderDetails {
            full_shipping_address: order.full_shipping_address(),
            order,
            lines,
        })
    }

    /// Validated status change. Staff only.
    pub async fn update_order_status(
        &self,
        actor: &Actor,
        order_id: i64,
        new_status: OrderStatus,
    ) -> Result<OrderModel, ServiceError> {
        self.status.update_status(actor, order_id, new_status).await
    }

    /// Unvalidated, audit-logged status change. Admin only.
    pub async fn override_order_status(
        &self,
        actor: &Actor,
        order_id: i64,
        new_status: OrderStatus,
        reason: &str,
    ) -> Result<OrderModel, ServiceError> {
        self.status
            .override_status(actor, order_id, new_status, reason)
            .await
    }

    /// Administrative payment confirmation: flags the order as paid and
    /// moves it to CONFIRMED. Staff only.
    #[instrument(skip(self, actor), fields(actor_id = actor.user_id))]
    pub async fn process_payment(
        &self,
        actor: &Actor,
        order_id: i64,
    ) -> Result<OrderModel, ServiceError> {
        actor.require_staff("confirm order payment")?;
        self.mark_payment_confirmed(order_id).await
    }

    /// Records a confirmed payment on the order. Repeating it is a no-op.
    pub(crate) async fn mark_payment_confirmed(
        &self,
        order_id: i64,
    ) -> Result<OrderModel, ServiceError> {
        let db = &*self.db;
        let order = self.orders.get(db, order_id).await?;

        if order.status == OrderStatus::Confirmed {
            if order.payment_confirmed {
                return Ok(order);
            }
            let version = order.version;
            let mut active: OrderActiveModel = order.into();
            active.payment_confirmed = Set(true);
            active.updated_at = Set(Utc::now());
            return self.orders.update_versioned(db, active, version).await;
        }

        let updated = self
            .status
            .transition(order, OrderStatus::Confirmed, |active| {
                active.payment_confirmed = Set(true);
            })
            .await?;
        info!(order_id, "Order payment confirmed");
        Ok(updated)
    }

    /// Ships an order. From CONFIRMED this passes through PROCESSING in the
    /// same write. Staff only.
    #[instrument(skip(self, actor), fields(actor_id = actor.user_id))]
    pub async fn fulfill_order(
        &self,
        actor: &Actor,
        order_id: i64,
        tracking_code: Option<String>,
    ) -> Result<OrderModel, ServiceError> {
        actor.require_staff("fulfill order")?;

        let order = self.orders.get(&*self.db, order_id).await?;
        if !matches!(order.status, OrderStatus::Confirmed | OrderStatus::Processing) {
            warn!(order_id, status = %order.status, "fulfill rejected");
            return Err(ServiceError::InvalidOperation(format!(
                "order {} is {}; only confirmed or processing orders can be shipped",
                order_id, order.status
            )));
        }

        self.status
            .write(order, OrderStatus::Shipped, |active| {
                if let Some(code) = tracking_code {
                    active.tracking_code = Set(Some(code));
                }
            })
            .await
    }

    /// Cancels an order inside the cancellable window. Users may cancel
    /// their own orders; staff may cancel any.
    #[instrument(skip(self, actor, reason), fields(actor_id = actor.user_id))]
    pub async fn cancel_order(
        &self,
        actor: &Actor,
        order_id: i64,
        reason: Option<String>,
    ) -> Result<OrderModel, ServiceError> {
        let order = self.orders.get(&*self.db, order_id).await?;
        actor.require_owner_or_staff(order.user_id, "cancel order")?;

        if let Err(e) = order.status.ensure_cancellable() {
            warn!(order_id, status = %order.status, "cancel rejected");
            return Err(e);
        }

        let notes = reason
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .map(|r| append_note(order.notes.as_deref(), &format!("Cancelled: {}", r)));
        let cancelled = self
            .status
            .transition(order, OrderStatus::Cancelled, |active| {
                if let Some(notes) = notes {
                    active.notes = Set(Some(notes));
                }
            })
            .await?;
        info!(order_id, "Order cancelled");
        Ok(cancelled)
    }

    /// DELIVERED to REFUNDED. Staff only.
    #[instrument(skip(self, actor, reason), fields(actor_id = actor.user_id))]
    pub async fn refund_order(
        &self,
        actor: &Actor,
        order_id: i64,
        reason: &str,
    ) -> Result<OrderModel, ServiceError> {
        actor.require_staff("refund order")?;

        let order = self.orders.get(&*self.db, order_id).await?;
        if order.status != OrderStatus::Delivered {
            return Err(ServiceError::InvalidOperation(format!(
                "order {} is {}; only delivered orders can be refunded",
                order_id, order.status
            )));
        }
        let notes = append_note(order.notes.as_deref(), &format!("Refund: {}", reason));
        self.status
            .transition(order, OrderStatus::Refunded, |active| {
                active.notes = Set(Some(notes));
            })
            .await
    }

    /// `false` for unknown orders.
    pub async fn can_cancel_order(&self, order_id: i64) -> Result<bool, ServiceError> {
        Ok(self
            .orders
            .find_by_id(&*self.db, order_id)
            .await?
            .map_or(false, |o| o.status.can_be_cancelled()))
    }

    pub async fn is_order_owned_by_user(
        &self,
        order_id: i64,
        user_id: i64,
    ) -> Result<bool, ServiceError> {
        Ok(self
            .orders
            .find_by_id(&*self.db, order_id)
            .await?
            .map_or(false, |o| o.is_owned_by(user_id)))
    }

    /// Orders of a user, newest first
    pub async fn orders_for_user(&self, user_id: i64) -> Result<Vec<OrderModel>, ServiceError> {
        self.orders.find_by_user(&*self.db, user_id).await
    }

    pub async fn orders_by_status(
        &self,
        status: OrderStatus,
    ) -> Result<Vec<OrderModel>, ServiceError> {
        self.orders.find_by_status(&*self.db, status).await
    }

    /// Orders created within the last `days` days, newest first
    pub async fn recent_orders(&self, days: i64) -> Result<Vec<OrderModel>, ServiceError> {
        if days < 0 {
            return Err(ServiceError::ValidationError(
                "days must not be negative".to_string(),
            ));
        }
        let since = Utc::now() - Duration::days(days);
        self.orders.find_created_since(&*self.db, since).await
    }

    pub async fn count_orders_for_user(&self, user_id: i64) -> Result<u64, ServiceError> {
        self.orders.count_by_user(&*self.db, user_id).await
    }

    pub async fn total_orders(&self) -> Result<u64, ServiceError> {
        self.orders.count(&*self.db).await
    }

    pub async fn count_by_status(&self, status: OrderStatus) -> Result<u64, ServiceError> {
        self.orders.count_by_status(&*self.db, status).await
    }

    /// Sum of totals over all DELIVERED orders.
    pub async fn total_revenue(&self) -> Result<Decimal, ServiceError> {
        let delivered = self
            .orders
            .find_by_status_between(&*self.db, OrderStatus::Delivered, None, None)
            .await?;
        Ok(money::sum(delivered.into_iter().map(|o| o.total)))
    }

    /// Revenue of DELIVERED orders created within the last `days` days.
    pub async fn revenue_last_days(&self, days: i64) -> Result<Decimal, ServiceError> {
        if days < 0 {
            return Err(ServiceError::ValidationError(
                "days must not be negative".to_string(),
            ));
        }
        let since = Utc::now() - Duration::days(days);
        let delivered = self
            .orders
            .find_by_status_between(&*self.db, OrderStatus::Delivered, Some(since), None)
            .await?;
        Ok(money::sum(delivered.into_iter().map(|o| o.total)))
    }

    /// Totals of orders created today (UTC), not counting cancelled or
    /// refunded ones.
    pub async fn todays_sales(&self) -> Result<Decimal, ServiceError> {
        let today = Utc::now().date_naive();
        let start = Utc.from_utc_datetime(&today.and_time(NaiveTime::MIN));
        let end = start + Duration::days(1);
        let orders = self
            .orders
            .find_created_between_excluding(
                &*self.db,
                start,
                end,
                &[OrderStatus::Cancelled, OrderStatus::Refunded],
            )
            .await?;
        Ok(money::sum(orders.into_iter().map(|o| o.total)))
    }
}
