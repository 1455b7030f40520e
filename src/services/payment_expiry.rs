use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::errors::ServiceError;

use super::payments::PaymentService;

/// Periodically moves overdue payments to EXPIRED.
pub struct PaymentExpiryWorker {
    payments: PaymentService,
    period: Duration,
}

impl PaymentExpiryWorker {
    pub fn new(payments: PaymentService, period: Duration) -> Self {
        Self {
            payments,
            period: period.max(Duration::from_millis(10)),
        }
    }

    /// Uses the sweep interval from the payment configuration.
    pub fn from_config(payments: PaymentService) -> Self {
        let period = payments.config().expiry_sweep_interval();
        Self::new(payments, period)
    }

    /// One sweep at the current time; returns how many payments expired.
    pub async fn run_once(&self) -> Result<usize, ServiceError> {
        Ok(self.payments.expire_overdue_payments(Utc::now()).await?.len())
    }

    /// Sweeps every period until `shutdown` turns true or its sender is
    /// dropped. A failed sweep is logged and retried on the next tick.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(period_ms = self.period.as_millis() as u64, "Payment expiry worker started");
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "payment expiry sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Payment expiry worker stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
