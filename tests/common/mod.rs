#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mockall::mock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use tokio::sync::mpsc;

use storefront_core::{
    auth::Actor,
    config::{OrderConfig, PaymentConfig},
    db::{self, DbConfig},
    entities::{order, prelude::PaymentModel, OrderStatus, PaymentMethod, ShippingAddress},
    events::{Event, EventSender},
    notifications::{NotificationError, Notifier, OrderStatusChange, PaymentConfirmation},
    services::{
        commerce::{CartLine, InMemoryCart, InMemoryCatalog, ProductSnapshot},
        orders::{CreateOrderRequest, OrderWithItems},
        payment_gateway::{GatewayClient, GatewayDecision, GatewayError},
        CheckoutService, OrderService, PaymentService,
    },
};

mock! {
    pub Gateway {}

    #[async_trait]
    impl GatewayClient for Gateway {
        async fn authorize(&self, payment: &PaymentModel) -> Result<GatewayDecision, GatewayError>;
    }
}

mock! {
    pub EmailNotifier {}

    #[async_trait]
    impl Notifier for EmailNotifier {
        async fn send_payment_confirmation(
            &self,
            notice: &PaymentConfirmation,
        ) -> Result<(), NotificationError>;

        async fn send_order_status_change(
            &self,
            notice: &OrderStatusChange,
        ) -> Result<(), NotificationError>;
    }
}

/// Gateway that replays queued outcomes, approving once the queue is empty.
#[derive(Default)]
pub struct ScriptedGateway {
    outcomes: Mutex<VecDeque<Result<GatewayDecision, GatewayError>>>,
    delay: Option<Duration>,
    calls: Mutex<u32>,
}

impl ScriptedGateway {
    pub fn approving() -> Self {
        Self::default()
    }

    pub fn declining(reason: &str) -> Self {
        let gateway = Self::default();
        gateway.push(Ok(GatewayDecision::Declined {
            reason: reason.to_string(),
        }));
        gateway
    }

    /// Never answers within `delay`.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn push(&self, outcome: Result<GatewayDecision, GatewayError>) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl GatewayClient for ScriptedGateway {
    async fn authorize(&self, payment: &PaymentModel) -> Result<GatewayDecision, GatewayError> {
        *self.calls.lock().unwrap() += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.outcomes.lock().unwrap().pop_front();
        next.unwrap_or_else(|| {
            Ok(GatewayDecision::Approved {
                gateway_transaction_id: format!("TEST-{}", payment.id),
                response: "Approved".to_string(),
            })
        })
    }
}

pub struct TestContext {
    pub db: Arc<DatabaseConnection>,
    pub cart: Arc<InMemoryCart>,
    pub catalog: Arc<InMemoryCatalog>,
    pub orders: OrderService,
    pub payments: PaymentService,
    pub checkout: CheckoutService,
    events: mpsc::Receiver<Event>,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_gateway(Arc::new(ScriptedGateway::approving())).await
    }

    pub async fn with_gateway(gateway: Arc<dyn GatewayClient>) -> Self {
        Self::build(gateway, PaymentConfig::default()).await
    }

    pub async fn build(gateway: Arc<dyn GatewayClient>, payment_config: PaymentConfig) -> Self {
        let pool = db::establish_connection_with_config(&DbConfig::in_memory_sqlite())
            .await
            .expect("in-memory database");
        db::run_migrations(&pool).await.expect("migrations");
        let db = Arc::new(pool);

        let (sender, events) = EventSender::channel(256);
        let sender = Some(Arc::new(sender));
        let cart = Arc::new(InMemoryCart::new());
        let catalog = Arc::new(InMemoryCatalog::new());

        let orders = OrderService::new(
            db.clone(),
            cart.clone(),
            catalog.clone(),
            OrderConfig::default(),
            sender.clone(),
        );
        let payments = PaymentService::new(db.clone(), gateway, payment_config, sender);
        let checkout = CheckoutService::new(orders.clone(), payments.clone());

        Self {
            db,
            cart,
            catalog,
            orders,
            payments,
            checkout,
            events,
        }
    }

    /// Events published so far, in order.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    /// The two-line cart most tests order from: 2 x 10.00 and 1 x 5.00.
    pub async fn seed_standard_cart(&self, user_id: i64) {
        self.cart
            .put(
                user_id,
                vec![
                    CartLine::new(101, 2, dec!(10.00)),
                    CartLine::new(102, 1, dec!(5.00)),
                ],
            )
            .await;
        for (id, name, price) in [(101, "Caneca", dec!(12.00)), (102, "Camiseta", dec!(5.00))] {
            self.catalog
                .upsert(ProductSnapshot {
                    id,
                    name: name.to_string(),
                    price,
                    stock: 10,
                })
                .await;
        }
    }

    pub async fn place_order(
        &self,
        user_id: i64,
        method: PaymentMethod,
        shipping_cost: Decimal,
    ) -> OrderWithItems {
        self.seed_standard_cart(user_id).await;
        self.orders
            .create_order_from_cart(order_request(user_id, method, Some(shipping_cost)))
            .await
            .expect("order created")
    }

    /// Forces an order into `status` without going through the engines.
    pub async fn force_order_status(&self, order_id: i64, status: OrderStatus) {
        let current = order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await
            .unwrap()
            .expect("order exists");
        let mut active: order::ActiveModel = current.into();
        active.status = Set(status);
        active.update(&*self.db).await.unwrap();
    }
}

pub fn address() -> ShippingAddress {
    ShippingAddress {
        street: "Avenida Paulista".to_string(),
        number: "1578".to_string(),
        complement: Some("Conj. 12".to_string()),
        neighborhood: "Bela Vista".to_string(),
        city: "Sao Paulo".to_string(),
        state: "SP".to_string(),
        zip_code: "01310-200".to_string(),
    }
}

pub fn order_request(
    user_id: i64,
    method: PaymentMethod,
    shipping_cost: Option<Decimal>,
) -> CreateOrderRequest {
    CreateOrderRequest {
        user_id,
        payment_method: method,
        shipping_address: address(),
        shipping_cost,
        notes: None,
    }
}

pub fn customer() -> Actor {
    Actor::user(1)
}

pub fn manager() -> Actor {
    Actor::manager(900)
}

pub fn admin() -> Actor {
    Actor::admin(901)
}
