//! Expiry Reclaimer.
//!
//! Periodically expires active holds past their deadline and closes the
//! pending orders they belonged to. Correctness never depends on the sweep
//! running: availability already ignores overdue holds. The sweep only makes
//! the stored statuses match what availability computes.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::ReservationConfig;
use crate::error::CoreError;
use crate::order_machine::OrderStateMachine;
use crate::types::DbId;

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub holds_expired: usize,
    pub orders_expired: usize,
    pub errors: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.holds_expired == 0 && self.orders_expired == 0 && self.errors == 0
    }
}

pub struct ExpiryReclaimer {
    orders: Arc<OrderStateMachine>,
    interval: Duration,
    batch_size: i64,
}

impl ExpiryReclaimer {
    pub fn new(orders: Arc<OrderStateMachine>, config: &ReservationConfig) -> Self {
        Self {
            orders,
            interval: config.reclaim_interval,
            batch_size: config.reclaim_batch_size.max(1),
        }
    }

    /// Run sweeps on a fixed interval until `cancel` is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            batch_size = self.batch_size,
            "Expiry reclaimer started"
        );

        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Expiry reclaimer stopping");
                    break;
                }
                _ = interval.tick() => {
                    match self.sweep().await {
                        Ok(report) if report.is_empty() => {
                            tracing::debug!("Expiry sweep: nothing to reclaim");
                        }
                        Ok(report) => {
                            tracing::info!(
                                holds_expired = report.holds_expired,
                                orders_expired = report.orders_expired,
                                errors = report.errors,
                                "Expiry sweep finished"
                            );
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Expiry sweep failed");
                        }
                    }
                }
            }
        }
    }

    /// One pass: expire overdue holds batch by batch, then close the pending
    /// orders left without any active hold.
    ///
    /// Per-item failures are counted and logged; only a failure to list work
    /// aborts the sweep. Every step is idempotent, so a later sweep picks up
    /// whatever this one missed.
    pub async fn sweep(&self) -> Result<SweepReport, CoreError> {
        let gateway = self.orders.gateway();
        let ledger = self.orders.ledger();
        let now = self.orders.clock().now();

        let mut report = SweepReport::default();
        let mut touched: BTreeSet<DbId> = BTreeSet::new();

        loop {
            let batch = gateway
                .list_expired_active_holds(now, self.batch_size)
                .await?;
            if batch.is_empty() {
                break;
            }

            let mut progressed = 0usize;
            for hold in &batch {
                match ledger.expire(hold.id).await {
                    Ok(true) => {
                        report.holds_expired += 1;
                        progressed += 1;
                        touched.insert(hold.order_id);
                    }
                    // Confirmed, released or extended since it was listed.
                    Ok(false) => {}
                    Err(e) => {
                        report.errors += 1;
                        tracing::error!(hold_id = hold.id, error = %e, "Failed to expire hold");
                    }
                }
            }

            if (batch.len() as i64) < self.batch_size || progressed == 0 {
                break;
            }
        }

        for order_id in touched {
            self.close_lapsed_order(order_id, &mut report).await;
        }

        let orphans = gateway
            .list_expired_pending_orders(now, self.batch_size)
            .await?;
        for order in orphans {
            self.close_lapsed_order(order.id, &mut report).await;
        }

        Ok(report)
    }

    /// Expire a pending order once none of its holds is active.
    async fn close_lapsed_order(&self, order_id: DbId, report: &mut SweepReport) {
        let holds = match self.orders.gateway().holds_for_order(order_id).await {
            Ok(holds) => holds,
            Err(e) => {
                report.errors += 1;
                tracing::error!(order_id, error = %e, "Failed to load order holds");
                return;
            }
        };
        if holds.iter().any(|h| h.status.is_active()) {
            return;
        }

        match self.orders.expire(order_id).await {
            Ok(_) => report.orders_expired += 1,
            // Paid, cancelled or already closed: not ours to expire.
            Err(CoreError::IllegalTransition { from, .. }) => {
                tracing::debug!(order_id, status = %from, "Order not pending, left as is");
            }
            Err(e) => {
                report.errors += 1;
                tracing::error!(order_id, error = %e, "Failed to expire order");
            }
        }
    }
}
