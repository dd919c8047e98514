//! Notification dispatcher: pull and push delivery of resolved results and
//! endpoint lifecycle events.
//!
//! Resolved operations are queued as tickets naming their id; the result itself
//! stays in the [`AsyncOperationTable`] until a drain takes it, so the table
//! remains the single source of truth and an id is delivered at most once.
//!
//! Exactly one delivery mode is authoritative: while a [`CallbackRegistration`]
//! is set, queued events go out through [`CallbackPushRunnable`] and
//! `GET /notification/pull` returns an empty batch.

use std::collections::VecDeque;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use metrics::counter;
use parking_lot::Mutex;
use restgate_core::{CallbackRegistration, NotificationBatch, NotificationEvent, OperationId};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::table::AsyncOperationTable;
use super::worker::BackgroundRunnable;
use crate::traits::CallbackClient;

#[derive(Debug)]
enum Ticket {
    /// A resolved result waiting in the operation table.
    Response(OperationId),
    /// A self-contained event (endpoint lifecycle).
    Event(NotificationEvent),
}

/// Queues delivery tickets and holds the process-wide callback registration.
#[derive(Default)]
pub struct NotificationDispatcher {
    queue: Mutex<VecDeque<Ticket>>,
    callback: ArcSwapOption<CallbackRegistration>,
}

impl NotificationDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a resolved operation result for delivery.
    pub(crate) fn enqueue_response(&self, id: OperationId) {
        self.queue.lock().push_back(Ticket::Response(id));
    }

    /// Queues a self-contained event for delivery.
    pub fn publish(&self, event: NotificationEvent) {
        counter!("restgate_notifications_total", "category" => event.category().as_str())
            .increment(1);
        self.queue.lock().push_back(Ticket::Event(event));
    }

    /// Number of queued tickets.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// Installs the push callback, replacing any previous one.
    pub fn set_callback(&self, registration: CallbackRegistration) {
        info!(url = %registration.url, "notification callback registered");
        self.callback.store(Some(Arc::new(registration)));
    }

    /// Removes the push callback. Returns whether one was set.
    pub fn clear_callback(&self) -> bool {
        let previous = self.callback.swap(None);
        if let Some(previous) = &previous {
            info!(url = %previous.url, "notification callback removed");
        }
        previous.is_some()
    }

    #[must_use]
    pub fn callback(&self) -> Option<Arc<CallbackRegistration>> {
        self.callback.load_full()
    }

    /// Pull-mode retrieval. Empty while a callback is registered.
    #[must_use]
    pub fn pull(&self, table: &AsyncOperationTable) -> NotificationBatch {
        if self.callback.load().is_some() {
            return NotificationBatch::default();
        }
        self.drain(table)
    }

    /// Atomically takes every queued ticket and materializes it into a batch.
    ///
    /// Tickets whose result was already taken are skipped, so concurrent
    /// drains never deliver the same result twice.
    #[must_use]
    pub fn drain(&self, table: &AsyncOperationTable) -> NotificationBatch {
        let tickets = std::mem::take(&mut *self.queue.lock());
        tickets
            .into_iter()
            .filter_map(|ticket| match ticket {
                Ticket::Response(id) => table.take(id).map(NotificationEvent::AsyncResponse),
                Ticket::Event(event) => Some(event),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Push delivery
// ---------------------------------------------------------------------------

/// Task variants for the push worker.
#[derive(Debug)]
pub enum PushTask {
    /// Deliver everything queued now; the number of events sent is reported back.
    Flush(oneshot::Sender<usize>),
}

/// Delivers queued events to the registered callback on every tick.
///
/// Each tick drains the queue into one batch and sends it with a single `PUT`,
/// so events resolved while a delivery is in flight are coalesced into the
/// next one. Non-2xx responses and transport errors are logged, never retried.
pub struct CallbackPushRunnable {
    dispatcher: Arc<NotificationDispatcher>,
    table: Arc<AsyncOperationTable>,
    client: Arc<dyn CallbackClient>,
}

impl CallbackPushRunnable {
    #[must_use]
    pub fn new(
        dispatcher: Arc<NotificationDispatcher>,
        table: Arc<AsyncOperationTable>,
        client: Arc<dyn CallbackClient>,
    ) -> Self {
        Self {
            dispatcher,
            table,
            client,
        }
    }

    async fn flush(&self) -> usize {
        let Some(callback) = self.dispatcher.callback() else {
            return 0;
        };
        let batch = self.dispatcher.drain(&self.table);
        if batch.is_empty() {
            return 0;
        }

        let count = batch.len();
        match self.client.deliver(&callback, &batch).await {
            Ok(status) if (200..300).contains(&status) => {
                counter!("restgate_callback_deliveries_total", "outcome" => "ok").increment(1);
                debug!(url = %callback.url, count, status, "notification batch delivered");
            }
            Ok(status) => {
                counter!("restgate_callback_deliveries_total", "outcome" => "rejected")
                    .increment(1);
                warn!(url = %callback.url, count, status, "callback rejected notification batch");
            }
            Err(error) => {
                counter!("restgate_callback_deliveries_total", "outcome" => "failed")
                    .increment(1);
                warn!(url = %callback.url, count, error = %error, "callback delivery failed");
            }
        }
        count
    }
}

#[async_trait]
impl BackgroundRunnable for CallbackPushRunnable {
    type Task = PushTask;

    async fn run(&mut self, task: PushTask) {
        match task {
            PushTask::Flush(reply) => {
                let sent = self.flush().await;
                let _ = reply.send(sent);
            }
        }
    }

    async fn on_tick(&mut self) {
        self.flush().await;
    }

    async fn shutdown(&mut self) {
        self.flush().await;
    }
}
