//! Subscriber registry, wake-up channel and the synchronous dispatch pass.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::mpsc;

use super::{CoreEvent, EventHandler, HandlerEnv};
use crate::context::CancelHandle;
use crate::core_state::CoreState;
use crate::db::{self, OutboxRow};
use crate::error::CoreError;
use crate::models::enums::DeliveryStatus;

/// Outbox rows handed to one subscriber per pass.
const DISPATCH_BATCH: usize = 100;

pub struct EventBus {
    subscribers: Vec<Arc<dyn EventHandler>>,
    wake_tx: mpsc::Sender<()>,
    wake_rx: Mutex<Option<mpsc::Receiver<()>>>,
    /// One dispatch pass at a time, whoever drives it.
    dispatch_lock: Mutex<()>,
}

impl EventBus {
    pub fn new(subscribers: Vec<Arc<dyn EventHandler>>, buffer: usize) -> Self {
        let (wake_tx, wake_rx) = mpsc::channel(buffer.max(1));
        Self {
            subscribers,
            wake_tx,
            wake_rx: Mutex::new(Some(wake_rx)),
            dispatch_lock: Mutex::new(()),
        }
    }

    pub fn subscriber_names(&self) -> Vec<&str> {
        self.subscribers.iter().map(|s| s.name()).collect()
    }

    /// Wake the dispatcher. Never blocks: a full buffer already guarantees a
    /// pending pass, and the periodic sweep covers everything else.
    pub fn notify(&self) {
        match self.wake_tx.try_send(()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => {}
            Err(mpsc::error::TrySendError::Closed(())) => {
                tracing::debug!("no dispatcher listening, events wait for the next sweep");
            }
        }
    }

    /// The wake-up receiver; only one dispatcher may own it.
    pub(crate) fn take_receiver(&self) -> Option<mpsc::Receiver<()>> {
        self.wake_rx.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// Outcome counts of one dispatch pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
    pub abandoned: usize,
}

impl DispatchReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl CoreState {
    /// Deliver every pending outbox row to every subscriber once.
    ///
    /// Each (event, subscriber) pair runs in its own transaction. A failing
    /// handler's writes are rolled back and the failure recorded; the pair is
    /// retried on later passes until `max_delivery_attempts` is reached.
    pub fn dispatch_pending(&self) -> Result<DispatchReport, CoreError> {
        let bus = self.events();
        let _pass = bus
            .dispatch_lock
            .lock()
            .map_err(|_| CoreError::internal("dispatch lock poisoned"))?;

        let mut report = DispatchReport::default();
        for handler in &bus.subscribers {
            let pending = self
                .store()
                .read(|conn| Ok(db::pending_for_subscriber(conn, handler.name(), DISPATCH_BATCH)?))?;
            for row in &pending {
                match self.deliver(handler.as_ref(), row)? {
                    DeliveryStatus::Delivered => report.delivered += 1,
                    DeliveryStatus::Failed => report.failed += 1,
                    DeliveryStatus::Abandoned => report.abandoned += 1,
                }
            }
        }
        if !report.is_empty() {
            tracing::info!(
                delivered = report.delivered,
                failed = report.failed,
                abandoned = report.abandoned,
                "dispatch pass complete"
            );
        }
        Ok(report)
    }

    fn deliver(&self, handler: &dyn EventHandler, row: &OutboxRow) -> Result<DeliveryStatus, CoreError> {
        let name = handler.name();
        let cancel = CancelHandle::new();

        let event: CoreEvent = match serde_json::from_str(&row.payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(event = %row.id, subscriber = name, error = %e, "undecodable outbox payload");
                self.store().write(&cancel, |tx| {
                    db::record_delivery(tx, row.id, name, DeliveryStatus::Abandoned, Some(&e.to_string()), Utc::now())?;
                    Ok(())
                })?;
                return Ok(DeliveryStatus::Abandoned);
            }
        };

        let attempt = self.store().write(&cancel, |tx| {
            let env = HandlerEnv {
                conn: tx,
                config: self.config(),
                layouts: self.layouts(),
                now: Utc::now(),
            };
            handler.handle(&env, &event).map_err(|e| CoreError::Dependency {
                service: "event_handler",
                message: e.to_string(),
            })?;
            db::record_delivery(tx, row.id, name, DeliveryStatus::Delivered, None, env.now)?;
            Ok(())
        });

        let error = match attempt {
            Ok(()) => {
                tracing::debug!(event = %row.id, kind = %row.event_type, subscriber = name, "delivered");
                return Ok(DeliveryStatus::Delivered);
            }
            Err(e) => e.to_string(),
        };

        self.store().write(&cancel, |tx| {
            let attempts = db::delivery_attempts(tx, row.id, name)? + 1;
            let status = if attempts >= self.config().max_delivery_attempts {
                DeliveryStatus::Abandoned
            } else {
                DeliveryStatus::Failed
            };
            db::record_delivery(tx, row.id, name, status, Some(&error), Utc::now())?;
            if status == DeliveryStatus::Abandoned {
                tracing::error!(event = %row.id, kind = %row.event_type, subscriber = name, attempts, error = %error, "delivery abandoned");
            } else {
                tracing::warn!(event = %row.id, kind = %row.event_type, subscriber = name, attempts, error = %error, "delivery failed");
            }
            Ok(status)
        })
    }
}
