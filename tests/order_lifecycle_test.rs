//! Integration tests for the order engine.
//!
//! Tests cover:
//! - Building an order from a cart (totals, snapshot pricing, cart clearing)
//! - Rollback when a cart line is invalid, and unpayable totals
//! - Validated status updates, fulfillment, cancellation and refunds
//! - Administrative override and role checks
//! - Optimistic locking
//! - Reporting queries

mod common;

use assert_matches::assert_matches;
use common::{admin, customer, manager, order_request, TestContext};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::Set;
use storefront_core::{
    auth::Actor,
    entities::{order, OrderStatus, PaymentMethod},
    errors::ServiceError,
    events::Event,
    repositories::OrderRepository,
    services::commerce::{CartLine, CartProvider},
};

// ==================== Creation ====================

#[tokio::test]
async fn totals_follow_items_and_shipping() {
    let mut ctx = TestContext::new().await;

    let created = ctx.place_order(1, PaymentMethod::Pix, dec!(7.50)).await;

    assert_eq!(created.order.subtotal, dec!(25.00));
    assert_eq!(created.order.shipping_cost, dec!(7.50));
    assert_eq!(created.order.total, dec!(32.50));
    assert_eq!(created.order.status, OrderStatus::Pending);
    assert!(!created.order.payment_confirmed);
    assert_eq!(created.items.len(), 2);
    assert_eq!(created.total_items(), 3);

    let subtotals: Vec<Decimal> = created.items.iter().map(|i| i.subtotal).collect();
    assert_eq!(subtotals, vec![dec!(20.00), dec!(5.00)]);

    let stored = ctx.orders.get_order(created.order.id).await.unwrap();
    assert_eq!(stored.order.total, dec!(32.50));
    assert_eq!(
        stored.items.iter().map(|i| i.subtotal).sum::<Decimal>() + stored.order.shipping_cost,
        stored.order.total
    );
    assert!(stored.order.order_number.starts_with("ORD-"));

    let events = ctx.drain_events();
    assert_matches!(&events[0], Event::OrderCreated { order_id, .. } if *order_id == created.order.id);
    assert_matches!(&events[1], Event::CartCleared { user_id: 1 });
}

#[tokio::test]
async fn cart_is_cleared_and_prices_are_frozen() {
    let ctx = TestContext::new().await;
    let created = ctx.place_order(1, PaymentMethod::Pix, dec!(0)).await;

    assert_eq!(cart_lines(&ctx, 1).await, Some(Vec::new()));

    // the catalog lists product 101 at 12.00, the cart recorded 10.00
    let item = &created.items[0];
    assert_eq!(item.product_id, 101);
    assert_eq!(item.unit_price, dec!(10.00));
}

#[tokio::test]
async fn address_is_snapshotted() {
    let ctx = TestContext::new().await;
    let created = ctx.place_order(1, PaymentMethod::Boleto, dec!(0)).await;

    assert_eq!(created.order.shipping_city, "Sao Paulo");
    assert_eq!(
        created.order.full_shipping_address(),
        "Avenida Paulista, 1578, Conj. 12, Bela Vista, Sao Paulo - SP, CEP: 01310-200"
    );
}

#[tokio::test]
async fn missing_cart_is_not_found() {
    let ctx = TestContext::new().await;
    let result = ctx
        .orders
        .create_order_from_cart(order_request(42, PaymentMethod::Pix, None))
        .await;
    assert_matches!(result, Err(ServiceError::NotFound(_)));
}

#[tokio::test]
async fn empty_cart_is_invalid_state() {
    let ctx = TestContext::new().await;
    ctx.cart.put(1, Vec::new()).await;
    let result = ctx
        .orders
        .create_order_from_cart(order_request(1, PaymentMethod::Pix, None))
        .await;
    assert_matches!(result, Err(ServiceError::InvalidState(_)));
}

#[tokio::test]
async fn invalid_line_rolls_back_the_whole_order() {
    let ctx = TestContext::new().await;
    ctx.cart
        .put(
            1,
            vec![
                CartLine::new(101, 1, dec!(10.00)),
                CartLine::new(102, 0, dec!(5.00)),
            ],
        )
        .await;

    let result = ctx
        .orders
        .create_order_from_cart(order_request(1, PaymentMethod::Pix, None))
        .await;

    assert_matches!(result, Err(ServiceError::ValidationError(_)));
    assert_eq!(ctx.orders.total_orders().await.unwrap(), 0);
    assert_eq!(cart_lines(&ctx, 1).await.map(|l| l.len()), Some(2));
}

#[tokio::test]
async fn zero_total_cart_is_rejected_before_writing() {
    let ctx = TestContext::new().await;
    ctx.cart.put(1, vec![CartLine::new(5, 1, dec!(0))]).await;

    let result = ctx
        .orders
        .create_order_from_cart(order_request(1, PaymentMethod::Pix, Some(dec!(0))))
        .await;

    assert_matches!(result, Err(ServiceError::ValidationError(_)));
    assert_eq!(ctx.orders.total_orders().await.unwrap(), 0);
    assert_eq!(cart_lines(&ctx, 1).await.map(|l| l.len()), Some(1));
}

#[tokio::test]
async fn invalid_address_is_rejected_before_writing() {
    let ctx = TestContext::new().await;
    ctx.seed_standard_cart(1).await;
    let mut request = order_request(1, PaymentMethod::Pix, None);
    request.shipping_address.city.clear();

    let result = ctx.orders.create_order_from_cart(request).await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));
    assert_eq!(ctx.orders.total_orders().await.unwrap(), 0);
}

// ==================== Status transitions ====================

#[tokio::test]
async fn shipped_order_cannot_be_cancelled() {
    let ctx = TestContext::new().await;
    let order_id = ctx.place_order(1, PaymentMethod::Pix, dec!(0)).await.order.id;

    ctx.orders.process_payment(&manager(), order_id).await.unwrap();
    let shipped = ctx
        .orders
        .fulfill_order(&manager(), order_id, Some("BR123456789".into()))
        .await
        .unwrap();
    assert_eq!(shipped.status, OrderStatus::Shipped);

    let result = ctx.orders.cancel_order(&customer(), order_id, None).await;
    assert_matches!(
        result,
        Err(ServiceError::InvalidOperation(msg)) if msg == "cannot cancel order that has been shipped or delivered"
    );

    let stored = ctx.orders.get_order(order_id).await.unwrap().order;
    assert_eq!(stored.status, OrderStatus::Shipped);
    assert!(!ctx.orders.can_cancel_order(order_id).await.unwrap());
}

#[tokio::test]
async fn owner_cancels_pending_order_other_users_cannot() {
    let ctx = TestContext::new().await;
    let order_id = ctx.place_order(1, PaymentMethod::Pix, dec!(0)).await.order.id;

    let stranger = Actor::user(2);
    assert_matches!(
        ctx.orders.cancel_order(&stranger, order_id, None).await,
        Err(ServiceError::Forbidden(_))
    );

    let cancelled = ctx
        .orders
        .cancel_order(&customer(), order_id, Some("changed my mind".into()))
        .await
        .unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(cancelled.notes.as_deref(), Some("Cancelled: changed my mind"));

    assert_matches!(
        ctx.orders.cancel_order(&customer(), order_id, None).await,
        Err(ServiceError::InvalidOperation(_))
    );
}

#[tokio::test]
async fn staff_cancels_confirmed_order() {
    let ctx = TestContext::new().await;
    let order_id = ctx.place_order(1, PaymentMethod::Pix, dec!(0)).await.order.id;
    ctx.orders.process_payment(&manager(), order_id).await.unwrap();

    assert!(ctx.orders.can_cancel_order(order_id).await.unwrap());
    let cancelled = ctx.orders.cancel_order(&manager(), order_id, None).await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
}

#[tokio::test]
async fn can_cancel_unknown_order_is_false() {
    let ctx = TestContext::new().await;
    assert!(!ctx.orders.can_cancel_order(999).await.unwrap());
}

#[tokio::test]
async fn status_updates_follow_the_adjacency_table() {
    let ctx = TestContext::new().await;
    let order_id = ctx.place_order(1, PaymentMethod::Pix, dec!(0)).await.order.id;

    assert_matches!(
        ctx.orders
            .update_order_status(&manager(), order_id, OrderStatus::Shipped)
            .await,
        Err(ServiceError::InvalidOperation(_))
    );

    let mut status = OrderStatus::Pending;
    for next in [
        OrderStatus::Confirmed,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
    ] {
        let updated = ctx
            .orders
            .update_order_status(&manager(), order_id, next)
            .await
            .unwrap();
        assert_eq!(updated.status, next, "from {}", status);
        status = next;
    }

    let delivered = ctx.orders.get_order(order_id).await.unwrap().order;
    assert!(delivered.shipped_at.is_some());
    assert!(delivered.delivered_at.is_some());
}

#[tokio::test]
async fn same_status_update_is_a_no_op() {
    let ctx = TestContext::new().await;
    let order = ctx.place_order(1, PaymentMethod::Pix, dec!(0)).await.order;

    let unchanged = ctx
        .orders
        .update_order_status(&manager(), order.id, OrderStatus::Pending)
        .await
        .unwrap();
    assert_eq!(unchanged.version, order.version);
}

#[tokio::test]
async fn users_cannot_change_status() {
    let ctx = TestContext::new().await;
    let order_id = ctx.place_order(1, PaymentMethod::Pix, dec!(0)).await.order.id;

    assert_matches!(
        ctx.orders
            .update_order_status(&customer(), order_id, OrderStatus::Confirmed)
            .await,
        Err(ServiceError::Forbidden(_))
    );
    assert_matches!(
        ctx.orders.process_payment(&customer(), order_id).await,
        Err(ServiceError::Forbidden(_))
    );
    assert_matches!(
        ctx.orders.fulfill_order(&customer(), order_id, None).await,
        Err(ServiceError::Forbidden(_))
    );
}

#[tokio::test]
async fn override_is_admin_only_and_skips_validation() {
    let ctx = TestContext::new().await;
    let order_id = ctx.place_order(1, PaymentMethod::Pix, dec!(0)).await.order.id;

    assert_matches!(
        ctx.orders
            .override_order_status(&manager(), order_id, OrderStatus::Delivered, "lost scan")
            .await,
        Err(ServiceError::Forbidden(_))
    );
    assert_matches!(
        ctx.orders
            .override_order_status(&admin(), order_id, OrderStatus::Delivered, "  ")
            .await,
        Err(ServiceError::ValidationError(_))
    );

    let overridden = ctx
        .orders
        .override_order_status(&admin(), order_id, OrderStatus::Delivered, "carrier confirmed by phone")
        .await
        .unwrap();
    assert_eq!(overridden.status, OrderStatus::Delivered);
    assert!(overridden.delivered_at.is_some());
}

#[tokio::test]
async fn fulfill_from_confirmed_passes_processing() {
    let ctx = TestContext::new().await;
    let order_id = ctx.place_order(1, PaymentMethod::Pix, dec!(0)).await.order.id;

    assert_matches!(
        ctx.orders.fulfill_order(&manager(), order_id, None).await,
        Err(ServiceError::InvalidOperation(_))
    );

    let confirmed = ctx.orders.process_payment(&manager(), order_id).await.unwrap();
    assert!(confirmed.payment_confirmed);
    assert_eq!(confirmed.status, OrderStatus::Confirmed);

    let shipped = ctx
        .orders
        .fulfill_order(&manager(), order_id, Some("BR000111222".into()))
        .await
        .unwrap();
    assert_eq!(shipped.status, OrderStatus::Shipped);
    assert_eq!(shipped.tracking_code.as_deref(), Some("BR000111222"));
    assert!(shipped.shipped_at.is_some());
}

#[tokio::test]
async fn process_payment_is_idempotent() {
    let ctx = TestContext::new().await;
    let order_id = ctx.place_order(1, PaymentMethod::Pix, dec!(0)).await.order.id;

    let first = ctx.orders.process_payment(&manager(), order_id).await.unwrap();
    let second = ctx.orders.process_payment(&manager(), order_id).await.unwrap();
    assert_eq!(first.version, second.version);
}

#[tokio::test]
async fn refund_requires_delivered_order() {
    let ctx = TestContext::new().await;
    let order_id = ctx.place_order(1, PaymentMethod::Pix, dec!(0)).await.order.id;

    assert_matches!(
        ctx.orders.refund_order(&manager(), order_id, "damaged").await,
        Err(ServiceError::InvalidOperation(_))
    );

    ctx.force_order_status(order_id, OrderStatus::Delivered).await;
    assert_matches!(
        ctx.orders.refund_order(&customer(), order_id, "damaged").await,
        Err(ServiceError::Forbidden(_))
    );
    let refunded = ctx
        .orders
        .refund_order(&manager(), order_id, "damaged")
        .await
        .unwrap();
    assert_eq!(refunded.status, OrderStatus::Refunded);
    assert_eq!(refunded.notes.as_deref(), Some("Refund: damaged"));
}

#[tokio::test]
async fn stale_version_is_a_conflict() {
    let ctx = TestContext::new().await;
    let order = ctx.place_order(1, PaymentMethod::Pix, dec!(0)).await.order;

    ctx.orders.process_payment(&manager(), order.id).await.unwrap();

    // a writer still holding the version it read before the confirmation
    let mut stale: order::ActiveModel = order.clone().into();
    stale.status = Set(OrderStatus::Cancelled);
    let result = OrderRepository::new()
        .update_versioned(&*ctx.db, stale, order.version)
        .await;
    assert_matches!(result, Err(ServiceError::Conflict(_)));

    let stored = ctx.orders.get_order(order.id).await.unwrap().order;
    assert_eq!(stored.status, OrderStatus::Confirmed);
}

#[tokio::test]
async fn status_change_events_carry_the_notice() {
    let mut ctx = TestContext::new().await;
    let order_id = ctx.place_order(1, PaymentMethod::Pix, dec!(0)).await.order.id;
    ctx.drain_events();

    ctx.orders.process_payment(&manager(), order_id).await.unwrap();
    let events = ctx.drain_events();
    assert_eq!(events.len(), 1);
    assert_matches!(
        &events[0],
        Event::OrderStatusChanged(notice)
            if notice.old_status == OrderStatus::Pending
                && notice.new_status == OrderStatus::Confirmed
                && notice.user_id == 1
    );
}

// ==================== Queries ====================

#[tokio::test]
async fn details_resolve_product_names_live() {
    let ctx = TestContext::new().await;
    let order_id = ctx.place_order(1, PaymentMethod::Pix, dec!(0)).await.order.id;

    let details = ctx.orders.get_order_details(order_id).await.unwrap();
    let names: Vec<Option<&str>> = details
        .lines
        .iter()
        .map(|l| l.product_name.as_deref())
        .collect();
    assert_eq!(names, vec![Some("Caneca"), Some("Camiseta")]);
    assert!(details.full_shipping_address.contains("CEP: 01310-200"));
}

#[tokio::test]
async fn ownership_and_listing() {
    let ctx = TestContext::new().await;
    let first = ctx.place_order(1, PaymentMethod::Pix, dec!(0)).await.order.id;
    let second = ctx.place_order(1, PaymentMethod::Boleto, dec!(0)).await.order.id;
    ctx.place_order(2, PaymentMethod::Pix, dec!(0)).await;

    assert!(ctx.orders.is_order_owned_by_user(first, 1).await.unwrap());
    assert!(!ctx.orders.is_order_owned_by_user(first, 2).await.unwrap());
    assert!(!ctx.orders.is_order_owned_by_user(999, 1).await.unwrap());

    let mine: Vec<i64> = ctx
        .orders
        .orders_for_user(1)
        .await
        .unwrap()
        .into_iter()
        .map(|o| o.id)
        .collect();
    assert_eq!(mine, vec![second, first]);
    assert_eq!(ctx.orders.count_orders_for_user(1).await.unwrap(), 2);

    let number = ctx.orders.get_order(first).await.unwrap().order.order_number;
    let by_number = ctx.orders.get_order_by_number(&number).await.unwrap();
    assert_eq!(by_number.order.id, first);
    assert_eq!(by_number.items.len(), 2);
    assert_matches!(
        ctx.orders.get_order_by_number("ORD-0-NOPE").await,
        Err(ServiceError::NotFound(_))
    );
    assert_eq!(ctx.orders.recent_orders(1).await.unwrap().len(), 3);
    assert_matches!(
        ctx.orders.recent_orders(-1).await,
        Err(ServiceError::ValidationError(_))
    );
}

#[tokio::test]
async fn reporting_aggregates() {
    let ctx = TestContext::new().await;
    let delivered = ctx.place_order(1, PaymentMethod::Pix, dec!(7.50)).await.order.id;
    let cancelled = ctx.place_order(1, PaymentMethod::Pix, dec!(0)).await.order.id;
    ctx.place_order(2, PaymentMethod::Pix, dec!(0)).await;

    ctx.force_order_status(delivered, OrderStatus::Delivered).await;
    ctx.orders.cancel_order(&customer(), cancelled, None).await.unwrap();

    assert_eq!(ctx.orders.total_orders().await.unwrap(), 3);
    assert_eq!(ctx.orders.count_by_status(OrderStatus::Pending).await.unwrap(), 1);
    assert_eq!(
        ctx.orders.orders_by_status(OrderStatus::Cancelled).await.unwrap()[0].id,
        cancelled
    );
    assert_eq!(ctx.orders.total_revenue().await.unwrap(), dec!(32.50));
    assert_eq!(ctx.orders.revenue_last_days(7).await.unwrap(), dec!(32.50));
    // delivered 32.50 + pending 25.00; the cancelled order is left out
    assert_eq!(ctx.orders.todays_sales().await.unwrap(), dec!(57.50));
}

async fn cart_lines(ctx: &TestContext, user_id: i64) -> Option<Vec<CartLine>> {
    ctx.cart.get_lines(user_id).await.unwrap()
}
