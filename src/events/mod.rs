use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Default buffer size for the event channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 128;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the receiver is gone.
    /// Event delivery is best-effort; losing one must never fail the
    /// operation that produced it.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("event dropped: {}", e);
        }
    }
}

/// Creates a bounded event channel pair.
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender::new(tx), rx)
}

// Define the various events that can occur in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Coupon events
    CouponCreated(Uuid),
    CouponUpdated(Uuid),
    CouponDeleted(Uuid),
    CouponRedeemed {
        coupon_id: Uuid,
        order_id: Uuid,
    },

    // Order events
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
}

/// Consumes events off the channel and logs them. Runs until every sender
/// is dropped.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match event {
            Event::CouponCreated(coupon_id) => {
                info!("Coupon created: {}", coupon_id);
            }
            Event::CouponUpdated(coupon_id) => {
                info!("Coupon updated: {}", coupon_id);
            }
            Event::CouponDeleted(coupon_id) => {
                info!("Coupon deleted: {}", coupon_id);
            }
            Event::CouponRedeemed {
                coupon_id,
                order_id,
            } => {
                info!("Coupon {} redeemed by order {}", coupon_id, order_id);
            }
            Event::OrderCreated(order_id) => {
                info!("Order created: {}", order_id);
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(
                    "Order {} status changed: {} -> {}",
                    order_id, old_status, new_status
                );
            }
        }
    }

    warn!("Event processing loop has ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_delivers_event() {
        let (sender, mut rx) = channel(8);
        let order_id = Uuid::new_v4();

        sender.send(Event::OrderCreated(order_id)).await.unwrap();

        match rx.recv().await {
            Some(Event::OrderCreated(id)) => assert_eq!(id, order_id),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_or_log_swallows_closed_channel() {
        let (sender, rx) = channel(8);
        drop(rx);

        // Must not panic or error out.
        sender.send_or_log(Event::CouponCreated(Uuid::new_v4())).await;
    }
}
