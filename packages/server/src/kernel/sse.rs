//! Durable event stream for one range.
//!
//! Subscribers first get a replay of the most recent events (re-sorted
//! ascending by id), then a poll loop tails the log for anything newer than
//! the last delivered id. Poll errors skip the tick instead of dropping the
//! subscriber; the pump stops as soon as the subscriber goes away.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::domains::events::data::EventFeed;
use crate::domains::events::Event;

const REPLAY_LIMIT: i64 = 50;
const CHANNEL_CAPACITY: usize = 64;

/// Stream of events for a range: replay, then live tail. The backing pump
/// task exits when the returned stream is dropped.
pub fn range_event_stream(
    feed: Arc<dyn EventFeed>,
    range_id: i64,
    poll_interval: Duration,
) -> ReceiverStream<Event> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    tokio::spawn(pump_events(feed, range_id, poll_interval, tx));
    ReceiverStream::new(rx)
}

async fn pump_events(
    feed: Arc<dyn EventFeed>,
    range_id: i64,
    poll_interval: Duration,
    tx: mpsc::Sender<Event>,
) {
    let mut last_id = 0i64;

    match feed.recent(range_id, REPLAY_LIMIT).await {
        Ok(mut recent) => {
            recent.sort_by_key(|event| event.id);
            for event in recent {
                last_id = last_id.max(event.id);
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        }
        Err(err) => warn!(range_id, error = %err, "event replay failed"),
    }

    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // Skip the interval's immediate first fire; the replay just ran.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = tx.closed() => return,
            _ = ticker.tick() => {}
        }
        let batch = match feed.after(range_id, last_id).await {
            Ok(batch) => batch,
            Err(err) => {
                debug!(range_id, error = %err, "event poll failed, skipping tick");
                continue;
            }
        };
        for event in batch {
            last_id = last_id.max(event.id);
            if tx.send(event).await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;
    use tokio_stream::StreamExt;

    struct StubFeed {
        recent: Vec<Event>,
        after_batches: Mutex<Vec<Vec<Event>>>,
    }

    #[async_trait]
    impl EventFeed for StubFeed {
        async fn recent(&self, _range_id: i64, _limit: i64) -> Result<Vec<Event>> {
            Ok(self.recent.clone())
        }

        async fn after(&self, _range_id: i64, after_id: i64) -> Result<Vec<Event>> {
            let mut batches = self.after_batches.lock().unwrap();
            if batches.is_empty() {
                return Ok(Vec::new());
            }
            let batch = batches.remove(0);
            Ok(batch.into_iter().filter(|e| e.id > after_id).collect())
        }
    }

    fn event(id: i64, message: &str) -> Event {
        Event {
            id,
            range_id: 1,
            job_id: None,
            level: "info".into(),
            kind: "k".into(),
            message: message.into(),
            payload: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn replays_in_id_order_then_tails() {
        let feed = Arc::new(StubFeed {
            // Recent arrives newest-first, as the query returns it.
            recent: vec![event(2, "second"), event(1, "first")],
            after_batches: Mutex::new(vec![vec![event(3, "third")]]),
        });

        let mut stream = range_event_stream(feed, 1, Duration::from_secs(1));
        assert_eq!(stream.next().await.unwrap().message, "first");
        assert_eq!(stream.next().await.unwrap().message, "second");
        assert_eq!(stream.next().await.unwrap().message, "third");
    }

    #[tokio::test(start_paused = true)]
    async fn already_replayed_ids_are_not_redelivered() {
        let feed = Arc::new(StubFeed {
            recent: vec![event(5, "five")],
            after_batches: Mutex::new(vec![
                vec![event(5, "five"), event(6, "six")],
                vec![event(6, "six")],
                vec![event(7, "seven")],
            ]),
        });

        let mut stream = range_event_stream(feed, 1, Duration::from_millis(10));
        assert_eq!(stream.next().await.unwrap().id, 5);
        assert_eq!(stream.next().await.unwrap().id, 6);
        assert_eq!(stream.next().await.unwrap().id, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn pump_stops_when_subscriber_drops() {
        let feed = Arc::new(StubFeed {
            recent: Vec::new(),
            after_batches: Mutex::new(Vec::new()),
        });
        let feed_refs = Arc::clone(&feed);

        let stream = range_event_stream(feed, 1, Duration::from_millis(10));
        drop(stream);

        // Give the pump a chance to observe the closed channel.
        tokio::time::sleep(Duration::from_millis(100)).await;
        tokio::task::yield_now().await;
        assert_eq!(Arc::strong_count(&feed_refs), 1, "pump should have exited");
    }
}
