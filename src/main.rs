use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{ArgAction, Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::{signal, sync::watch};
use tracing::{error, info};

use storefront_core::{
    config::{self, AppConfig},
    db::{self, DbPool},
    entities::OrderStatus,
    events::{self, EventSender},
    money,
    notifications::LoggingNotifier,
    services::{
        commerce::{InMemoryCart, InMemoryCatalog},
        payments::{MethodStatistics, PaymentStatistics},
        OrderService, PaymentExpiryWorker, PaymentService, SimulatedGateway,
    },
};

#[derive(Parser)]
#[command(name = "storefront-core", about = "Order and payment lifecycle service", version)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON when available"
    )]
    json: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the event dispatcher and the payment expiry sweep until Ctrl-C
    Serve,
    /// Apply pending schema migrations and exit
    Migrate,
    /// Expire overdue payments once and exit
    SweepExpired,
    /// Print payment and order statistics for the last N days
    Stats {
        #[arg(long, default_value_t = 30)]
        days: i64,
    },
    /// Show an order with its items and payments, by id or ORD- number
    Order { reference: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config().context("failed to load configuration")?;
    config::init_tracing(cfg.log_level(), cfg.log_json);

    let pool = db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to the database")?;
    if cfg.auto_migrate || matches!(cli.command, Some(Commands::Migrate)) {
        db::run_migrations(&pool).await.context("migrations failed")?;
    }

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(cfg, pool).await,
        Commands::Migrate => Ok(()),
        Commands::SweepExpired => {
            let (payments, _) = build_services(&cfg, Arc::new(pool), None);
            let expired = PaymentExpiryWorker::from_config(payments).run_once().await?;
            println!("Expired {} payment(s)", expired);
            Ok(())
        }
        Commands::Stats { days } => stats(&cfg, pool, days, cli.json).await,
        Commands::Order { reference } => show_order(&cfg, pool, &reference, cli.json).await,
    }
}

fn build_services(
    cfg: &AppConfig,
    db: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
) -> (PaymentService, OrderService) {
    let gateway = Arc::new(SimulatedGateway::new(cfg.payments.gateway_approval_rate));
    let payments = PaymentService::new(
        db.clone(),
        gateway,
        cfg.payments.clone(),
        event_sender.clone(),
    );
    let orders = OrderService::new(
        db,
        Arc::new(InMemoryCart::new()),
        Arc::new(InMemoryCatalog::new()),
        cfg.orders.clone(),
        event_sender,
    );
    (payments, orders)
}

async fn serve(cfg: AppConfig, pool: DbPool) -> Result<()> {
    let (sender, rx) = EventSender::channel(cfg.event_channel_capacity);
    let sender = Arc::new(sender);
    let dispatcher = tokio::spawn(events::process_events(rx, Arc::new(LoggingNotifier)));

    let (payments, _orders) = build_services(&cfg, Arc::new(pool), Some(sender.clone()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = PaymentExpiryWorker::from_config(payments).spawn(shutdown_rx);

    info!(environment = %cfg.environment, "storefront-core running; press Ctrl-C to stop");
    signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper.await {
        error!(error = %e, "expiry worker terminated abnormally");
    }

    // the dispatcher stops once the last sender is gone
    drop(sender);
    if let Err(e) = dispatcher.await {
        error!(error = %e, "event dispatcher terminated abnormally");
    }
    info!("Shutdown complete");
    Ok(())
}

#[derive(Serialize)]
struct StatsReport {
    days: i64,
    payments: PaymentStatistics,
    by_method: Vec<MethodStatistics>,
    total_orders: u64,
    pending_orders: u64,
    total_revenue: Decimal,
    period_revenue: Decimal,
    todays_sales: Decimal,
}

async fn stats(cfg: &AppConfig, pool: DbPool, days: i64, json: bool) -> Result<()> {
    let (payments, orders) = build_services(cfg, Arc::new(pool), None);
    let end = Utc::now();
    let start = end - Duration::days(days.max(0));

    let report = StatsReport {
        days,
        payments: payments.payment_statistics(start, end).await?,
        by_method: payments.method_statistics(start, end).await?,
        total_orders: orders.total_orders().await?,
        pending_orders: orders.count_by_status(OrderStatus::Pending).await?,
        total_revenue: orders.total_revenue().await?,
        period_revenue: orders.revenue_last_days(days.max(0)).await?,
        todays_sales: orders.todays_sales().await?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!("Last {} day(s)", report.days);
    println!(
        "  payments: {} total, {} successful ({}), {} failed",
        report.payments.total_count,
        report.payments.successful_count,
        money::format_brl(report.payments.successful_amount),
        report.payments.failed_count
    );
    for method in &report.by_method {
        println!(
            "    {:<14} {:>5}  {}",
            method.method.display_name(),
            method.successful_count,
            money::format_brl(method.successful_amount)
        );
    }
    println!(
        "  orders: {} total, {} pending",
        report.total_orders, report.pending_orders
    );
    println!(
        "  revenue: {} all time, {} in period, {} today",
        money::format_brl(report.total_revenue),
        money::format_brl(report.period_revenue),
        money::format_brl(report.todays_sales)
    );
    Ok(())
}

async fn show_order(cfg: &AppConfig, pool: DbPool, reference: &str, json: bool) -> Result<()> {
    let (payments, orders) = build_services(cfg, Arc::new(pool), None);
    let order = match reference.parse::<i64>() {
        Ok(id) => orders.get_order(id).await?,
        Err(_) => orders.get_order_by_number(reference).await?,
    };
    let order_payments = payments.payments_for_order(order.order.id).await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "order": order,
                "payments": order_payments,
            }))?
        );
        return Ok(());
    }

    let header = &order.order;
    println!("{} [{}]", header.order_number, header.status);
    println!("  ship to: {}", header.full_shipping_address());
    for item in &order.items {
        println!(
            "  product {:>6} x{:<3} {}",
            item.product_id,
            item.quantity,
            money::format_brl(item.subtotal)
        );
    }
    println!(
        "  subtotal {}  shipping {}  total {}",
        money::format_brl(header.subtotal),
        money::format_brl(header.shipping_cost),
        money::format_brl(header.total)
    );
    for payment in &order_payments {
        println!(
            "  payment {} {} {} {}",
            payment.transaction_id,
            payment.payment_method,
            payment.status,
            money::format_brl(payment.amount)
        );
    }
    Ok(())
}
