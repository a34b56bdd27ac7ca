//! The durable channel implementation.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::dead_letter::{DeadLetter, DeadLetterChannel};
use super::delivery::{Delivery, ReceiptHandle, Redelivery};
use crate::config::ChannelConfig;
use crate::errors::{ChannelError, PublishError};
use crate::events::{event_types, EventSink, NoOpEventSink};
use crate::utils::{generate_event_id, now_utc, Timestamp};

const EXHAUSTED_REASON: &str = "max receive count reached";

// Stand-in for "never" when an offset does not fit in an Instant.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn offset(from: Instant, by: Duration) -> Instant {
    from.checked_add(by)
        .or_else(|| from.checked_add(FAR_FUTURE))
        .unwrap_or(from)
}

#[derive(Debug)]
struct StoredMessage<T> {
    seq: u64,
    body: T,
    receive_count: u32,
    visible_at: Instant,
    token: Option<u64>,
    published_at: Timestamp,
}

#[derive(Debug)]
struct ChannelState<T> {
    messages: HashMap<String, StoredMessage<T>>,
    order: BTreeMap<u64, String>,
    next_seq: u64,
    next_token: u64,
}

impl<T> ChannelState<T> {
    fn new() -> Self {
        Self {
            messages: HashMap::new(),
            order: BTreeMap::new(),
            next_seq: 0,
            next_token: 0,
        }
    }

    fn remove(&mut self, message_id: &str) -> Option<StoredMessage<T>> {
        let message = self.messages.remove(message_id)?;
        self.order.remove(&message.seq);
        Some(message)
    }

    fn check_receipt(&self, receipt: &ReceiptHandle) -> Result<&StoredMessage<T>, ChannelError> {
        let message = self
            .messages
            .get(&receipt.message_id)
            .ok_or_else(|| ChannelError::UnknownMessage {
                message_id: receipt.message_id.clone(),
            })?;
        if message.token != Some(receipt.token) {
            return Err(ChannelError::StaleReceipt {
                receipt: receipt.to_string(),
            });
        }
        Ok(message)
    }
}

enum Poll<T> {
    Ready(Vec<Delivery<T>>),
    Pending { next_visible_at: Option<Instant> },
}

/// A bounded at-least-once channel with a visibility window and
/// dead-letter diversion.
pub struct DurableChannel<T> {
    config: ChannelConfig,
    state: Mutex<ChannelState<T>>,
    dead_letters: Arc<DeadLetterChannel<T>>,
    notify: Notify,
    closed: AtomicBool,
    events: Arc<dyn EventSink>,
}

impl<T> std::fmt::Debug for DurableChannel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableChannel")
            .field("name", &self.config.name)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + Sync + 'static> DurableChannel<T> {
    /// Creates an empty channel.
    #[must_use]
    pub fn new(config: ChannelConfig) -> Self {
        let dead_letters = Arc::new(DeadLetterChannel::new(format!("{}-dlq", config.name)));
        Self {
            config,
            state: Mutex::new(ChannelState::new()),
            dead_letters,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the sink that is told about dead-lettered messages.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// The channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The channel configuration.
    #[must_use]
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// The dead-letter channel fed by this channel.
    #[must_use]
    pub fn dead_letters(&self) -> &Arc<DeadLetterChannel<T>> {
        &self.dead_letters
    }

    /// Publishes a message and returns its id.
    ///
    /// Fails without side effects if the channel is closed or full.
    pub fn publish(&self, body: T) -> Result<String, PublishError> {
        if self.is_closed() {
            return Err(PublishError::unreachable(&self.config.name));
        }

        let message_id = generate_event_id();
        {
            let mut state = self.state.lock();
            if state.messages.len() >= self.config.capacity {
                return Err(PublishError::over_capacity(
                    &self.config.name,
                    self.config.capacity,
                ));
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state.order.insert(seq, message_id.clone());
            state.messages.insert(
                message_id.clone(),
                StoredMessage {
                    seq,
                    body,
                    receive_count: 0,
                    visible_at: Instant::now(),
                    token: None,
                    published_at: now_utc(),
                },
            );
        }

        self.notify.notify_waiters();
        Ok(message_id)
    }

    /// Receives one batch using the configured batch size and window.
    pub async fn receive_batch(&self) -> Vec<Delivery<T>> {
        self.receive(self.config.batch_size, self.config.batch_window())
            .await
    }

    /// Receives up to `max` messages.
    ///
    /// Returns as soon as `max` messages are visible, or once `window` has
    /// elapsed with whatever is visible then, possibly nothing.
    pub async fn receive(&self, max: usize, window: Duration) -> Vec<Delivery<T>> {
        self.collect(max, window, true).await
    }

    /// Like [`receive_batch`](Self::receive_batch), but never returns an
    /// empty batch: once the window has elapsed it keeps waiting for the
    /// first visible message.
    pub async fn next_batch(&self) -> Vec<Delivery<T>> {
        self.collect(self.config.batch_size, self.config.batch_window(), false)
            .await
    }

    async fn collect(&self, max: usize, window: Duration, allow_empty: bool) -> Vec<Delivery<T>> {
        let max = max.max(1);
        let deadline = offset(Instant::now(), window);

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let take_partial = Instant::now() >= deadline;
            let next_visible_at = match self.poll(max, take_partial, allow_empty) {
                Poll::Ready(batch) => return batch,
                Poll::Pending { next_visible_at } => next_visible_at,
            };

            let wake_at = match (next_visible_at, take_partial) {
                (Some(at), false) => Some(at.min(deadline)),
                (None, false) => Some(deadline),
                (at, true) => at,
            };
            match wake_at {
                Some(at) => {
                    tokio::select! {
                        () = notified.as_mut() => {}
                        () = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.as_mut().await,
            }
        }
    }

    /// Receives whatever is visible right now, up to `max` messages.
    pub fn try_receive(&self, max: usize) -> Vec<Delivery<T>> {
        match self.poll(max.max(1), true, true) {
            Poll::Ready(batch) => batch,
            Poll::Pending { .. } => Vec::new(),
        }
    }

    fn poll(&self, max: usize, take_partial: bool, allow_empty: bool) -> Poll<T> {
        let now = Instant::now();
        let mut parked = Vec::new();

        let result = {
            let mut state = self.state.lock();
            self.sweep_exhausted(&mut state, now, &mut parked);

            let visible: Vec<String> = state
                .order
                .values()
                .filter(|id| state.messages.get(*id).is_some_and(|m| m.visible_at <= now))
                .take(max)
                .cloned()
                .collect();

            let waiting = if take_partial {
                visible.is_empty() && !allow_empty
            } else {
                visible.len() < max
            };
            if waiting {
                let next_visible_at = state
                    .messages
                    .values()
                    .map(|m| m.visible_at)
                    .filter(|at| *at > now)
                    .min();
                Poll::Pending { next_visible_at }
            } else {
                let hidden_until = offset(now, self.config.visibility_timeout());
                let mut batch = Vec::with_capacity(visible.len());
                for id in visible {
                    let token = state.next_token;
                    state.next_token += 1;
                    if let Some(message) = state.messages.get_mut(&id) {
                        message.receive_count += 1;
                        message.visible_at = hidden_until;
                        message.token = Some(token);
                        batch.push(Delivery {
                            message_id: id.clone(),
                            body: message.body.clone(),
                            receipt: ReceiptHandle {
                                message_id: id,
                                token,
                            },
                            receive_count: message.receive_count,
                            published_at: message.published_at,
                        });
                    }
                }
                Poll::Ready(batch)
            }
        };

        self.report_parked(&parked);
        if let Poll::Ready(ref batch) = result {
            if !batch.is_empty() {
                debug!(channel = %self.config.name, batch_size = batch.len(), "Delivered batch");
            }
        }
        result
    }

    // Visible messages that already used up their deliveries go to the
    // dead-letter channel instead of being handed out again.
    fn sweep_exhausted(
        &self,
        state: &mut ChannelState<T>,
        now: Instant,
        parked: &mut Vec<(String, u32, String)>,
    ) {
        let exhausted: Vec<String> = state
            .messages
            .iter()
            .filter(|(_, m)| m.visible_at <= now && m.receive_count >= self.config.max_receive_count)
            .map(|(id, _)| id.clone())
            .collect();

        for id in exhausted {
            if let Some(message) = state.remove(&id) {
                parked.push((id.clone(), message.receive_count, EXHAUSTED_REASON.to_string()));
                self.dead_letters.push(DeadLetter {
                    message_id: id,
                    body: message.body,
                    receive_count: message.receive_count,
                    reason: EXHAUSTED_REASON.to_string(),
                    published_at: message.published_at,
                    dead_lettered_at: now_utc(),
                });
            }
        }
    }

    fn report_parked(&self, parked: &[(String, u32, String)]) {
        for (message_id, receive_count, reason) in parked {
            warn!(
                channel = %self.config.name,
                message_id = %message_id,
                receive_count = receive_count,
                reason = %reason,
                "Message moved to dead-letter channel"
            );
            self.events.try_emit(
                event_types::DEAD_LETTERED,
                Some(serde_json::json!({
                    "channel": self.config.name,
                    "message_id": message_id,
                    "receive_count": receive_count,
                    "reason": reason,
                })),
            );
        }
    }

    /// Acknowledges a delivery, deleting the message.
    pub fn ack(&self, receipt: &ReceiptHandle) -> Result<(), ChannelError> {
        let mut state = self.state.lock();
        state.check_receipt(receipt)?;
        state.remove(&receipt.message_id);
        Ok(())
    }

    /// Negatively acknowledges a delivery.
    ///
    /// The message becomes visible again after `delay`, unless it has
    /// already been delivered `max_receive_count` times, in which case it is
    /// moved to the dead-letter channel with `reason`.
    pub fn nack(
        &self,
        receipt: &ReceiptHandle,
        delay: Duration,
        reason: impl Into<String>,
    ) -> Result<Redelivery, ChannelError> {
        let reason = reason.into();
        let mut parked = Vec::new();

        let outcome = {
            let mut state = self.state.lock();
            let receive_count = state.check_receipt(receipt)?.receive_count;

            if receive_count >= self.config.max_receive_count {
                if let Some(message) = state.remove(&receipt.message_id) {
                    parked.push((receipt.message_id.clone(), receive_count, reason.clone()));
                    self.dead_letters.push(DeadLetter {
                        message_id: receipt.message_id.clone(),
                        body: message.body,
                        receive_count,
                        reason,
                        published_at: message.published_at,
                        dead_lettered_at: now_utc(),
                    });
                }
                Redelivery::DeadLettered
            } else {
                if let Some(message) = state.messages.get_mut(&receipt.message_id) {
                    message.visible_at = offset(Instant::now(), delay);
                    message.token = None;
                }
                Redelivery::Scheduled(delay)
            }
        };

        self.report_parked(&parked);
        self.notify.notify_waiters();
        Ok(outcome)
    }

    /// Keeps an in-flight message hidden for `by` from now.
    pub fn extend_visibility(&self, receipt: &ReceiptHandle, by: Duration) -> Result<(), ChannelError> {
        let mut state = self.state.lock();
        state.check_receipt(receipt)?;
        if let Some(message) = state.messages.get_mut(&receipt.message_id) {
            message.visible_at = offset(Instant::now(), by);
        }
        Ok(())
    }

    /// Moves every dead-lettered message back into this channel with a
    /// fresh delivery budget. Returns how many were moved.
    ///
    /// Entries that do not fit stay parked.
    pub fn redrive_dead_letters(&self) -> Result<usize, PublishError> {
        let mut pending = self.dead_letters.drain().into_iter();
        let mut moved = 0;
        while let Some(entry) = pending.next() {
            if let Err(err) = self.publish(entry.body.clone()) {
                self.dead_letters.push(entry);
                pending.for_each(|rest| self.dead_letters.push(rest));
                return Err(err);
            }
            moved += 1;
        }
        Ok(moved)
    }

    /// Stops accepting new messages. Buffered messages can still be received.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Returns true if the channel was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of buffered messages, in flight included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().messages.len()
    }

    /// Returns true if no messages are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of messages that could be delivered right now.
    #[must_use]
    pub fn visible_len(&self) -> usize {
        let now = Instant::now();
        self.state
            .lock()
            .messages
            .values()
            .filter(|m| m.visible_at <= now)
            .count()
    }

    /// Number of messages currently hidden by a visibility window or delay.
    #[must_use]
    pub fn in_flight_len(&self) -> usize {
        let now = Instant::now();
        self.state
            .lock()
            .messages
            .values()
            .filter(|m| m.visible_at > now)
            .count()
    }
}
