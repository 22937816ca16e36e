//! Subscribers Registry, §4.4: a per-category pool of subscribers in
//! one of three states — available, busy, deleted — handing out one
//! available subscriber per request and queueing callers FIFO when the
//! pool is empty.
//!
//! Mirrors the teacher's `PresenceTrackingActor` in shape (a
//! `HashMap`-keyed in-memory registry with a periodic background
//! sweep) but funnels access through a single `std::sync::Mutex`
//! rather than an actix actor mailbox — the registry is small and
//! mutation-dominated, so actor-style message passing would only add
//! ceremony.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use event_log_types::Subscriber;

struct SubscriberEntry {
    subscriber: Subscriber,
    busy_until: Option<DateTime<Utc>>,
}

struct RegistryState {
    subscribers: HashMap<String, SubscriberEntry>,
    waiters: VecDeque<oneshot::Sender<String>>,
    /// Round-robin cursor over the most-recently-sorted key order, so
    /// `findAvailableSubscriber` rotates instead of always returning
    /// the lexicographically-first available entry.
    rotation_cursor: usize,
    /// Set once the "all busy; waiting" message has been logged for
    /// the current empty-pool episode; cleared as soon as any
    /// subscriber becomes available again.
    empty_pool_logged: bool,
}

impl RegistryState {
    fn new() -> Self {
        Self {
            subscribers: HashMap::new(),
            waiters: VecDeque::new(),
            rotation_cursor: 0,
            empty_pool_logged: false,
        }
    }
}

/// Maintains subscriber availability for one event category. One
/// instance per category (awaiting-generation, awaiting-transformation,
/// ...).
pub struct SubscribersRegistry {
    state: Mutex<RegistryState>,
    busy_sleep: chrono::Duration,
}

impl SubscribersRegistry {
    pub fn new(busy_sleep: Duration) -> Self {
        Self {
            state: Mutex::new(RegistryState::new()),
            busy_sleep: chrono::Duration::from_std(busy_sleep).unwrap_or(chrono::Duration::seconds(30)),
        }
    }

    /// `add(subscriber) -> added`. Re-adding a previously deleted or
    /// unknown URL returns `true`; updating an existing entry's
    /// `delivery_id`/capacity returns `false`.
    pub fn add(&self, subscriber: Subscriber) -> bool {
        let key = subscriber.identity().to_string();
        let mut state = self.state.lock().expect("registry mutex poisoned");

        let added = !state.subscribers.contains_key(&key);
        state.subscribers.insert(
            key,
            SubscriberEntry {
                subscriber,
                busy_until: None,
            },
        );

        if added {
            self.release_one_waiter(&mut state);
        }
        added
    }

    /// `delete(url) -> existed`.
    pub fn delete(&self, url: &str) -> bool {
        let mut state = self.state.lock().expect("registry mutex poisoned");
        state.subscribers.remove(url).is_some()
    }

    /// Looks up the `delivery_id` backing a subscriber URL, needed by
    /// callers (the finder loop) that must resolve a delivery slot
    /// before `Finder::pop_event` can insert its `event_delivery` row.
    pub fn delivery_id_for(&self, url: &str) -> Option<uuid::Uuid> {
        let state = self.state.lock().expect("registry mutex poisoned");
        state.subscribers.get(url).map(|entry| entry.subscriber.delivery_id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().expect("registry mutex poisoned").subscribers.len()
    }

    /// `getTotalCapacity() -> None | sum`. `None` iff no subscriber has
    /// declared any capacity.
    pub fn get_total_capacity(&self) -> Option<u32> {
        let state = self.state.lock().expect("registry mutex poisoned");
        let mut any_declared = false;
        let mut total = 0u32;
        for entry in state.subscribers.values() {
            if let Some(capacity) = entry.subscriber.capacity {
                any_declared = true;
                total += capacity;
            }
        }
        any_declared.then_some(total)
    }

    /// `markBusy(url)`. If already busy, extends the window by another
    /// `busy_sleep` rather than resetting the clock from now.
    pub fn mark_busy(&self, url: &str) {
        let mut state = self.state.lock().expect("registry mutex poisoned");
        let busy_sleep = self.busy_sleep;
        if let Some(entry) = state.subscribers.get_mut(url) {
            entry.busy_until = Some(match entry.busy_until {
                Some(existing) => existing + busy_sleep,
                None => Utc::now() + busy_sleep,
            });
        }
    }

    /// `findAvailableSubscriber() -> URL`, blocking the caller via a
    /// FIFO queue when the pool is empty.
    pub async fn find_available_subscriber(&self) -> String {
        let receiver = {
            let mut state = self.state.lock().expect("registry mutex poisoned");
            if let Some(url) = self.pick_available_locked(&mut state) {
                return url;
            }

            let count = state.subscribers.len();
            if !state.empty_pool_logged {
                tracing::info!(
                    "all {} subscriber(s) are busy; waiting for one to become available",
                    count
                );
                state.empty_pool_logged = true;
            }

            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            rx
        };

        receiver.await.unwrap_or_default()
    }

    /// Promotes any subscriber whose `busy_sleep` window has elapsed
    /// back to available, releasing queued waiters FIFO. Called by the
    /// background checker every `checkup_interval`.
    pub fn run_checkup(&self) {
        let mut state = self.state.lock().expect("registry mutex poisoned");
        let now = Utc::now();
        let expired: Vec<String> = state
            .subscribers
            .iter()
            .filter(|(_, entry)| matches!(entry.busy_until, Some(until) if until <= now))
            .map(|(url, _)| url.clone())
            .collect();

        for url in expired {
            if let Some(entry) = state.subscribers.get_mut(&url) {
                entry.busy_until = None;
            }
        }

        while !state.waiters.is_empty() {
            if self.pick_available_locked(&mut state).is_none() {
                break;
            }
        }
    }

    /// Finds an available subscriber and either hands it to the
    /// longest-waiting caller (FIFO) or returns it directly, rotating
    /// the starting point each call for fairness.
    ///
    /// A subscriber picked here is immediately reserved (the same
    /// `busy_until` window `mark_busy` uses) so the next call in the
    /// same drain loop (`run_checkup`) sees it as unavailable instead of
    /// handing the identical URL to a second waiter in the same tick.
    /// The reservation is just the ordinary busy window: it lapses on
    /// the next `run_checkup` like any other, or is extended/cleared by
    /// the receiving caller via `mark_busy`/`delete` as usual.
    fn pick_available_locked(&self, state: &mut RegistryState) -> Option<String> {
        let mut keys: Vec<&String> = state.subscribers.keys().collect();
        keys.sort();
        if keys.is_empty() {
            return None;
        }

        let len = keys.len();
        let start = state.rotation_cursor % len;
        let chosen = (0..len)
            .map(|offset| (start + offset) % len)
            .find(|&idx| state.subscribers[keys[idx]].busy_until.is_none())
            .map(|idx| keys[idx].clone());

        let Some(url) = chosen else {
            return None;
        };

        state.rotation_cursor = state
            .subscribers
            .keys()
            .position(|k| k == &url)
            .map(|idx| idx + 1)
            .unwrap_or(0);
        state.empty_pool_logged = false;

        if let Some(entry) = state.subscribers.get_mut(&url) {
            entry.busy_until = Some(Utc::now() + self.busy_sleep);
        }

        if let Some(waiter) = state.waiters.pop_front() {
            let _ = waiter.send(url.clone());
        }

        Some(url)
    }

    /// Hands the just-added subscriber to a queued waiter, if any. Must
    /// check `waiters` first: `pick_available_locked` reserves whatever
    /// it picks, and calling it with no waiter to receive the result
    /// would reserve the subscriber for nobody.
    fn release_one_waiter(&self, state: &mut RegistryState) {
        if state.waiters.is_empty() {
            return;
        }
        let _ = self.pick_available_locked(state);
    }
}

/// Spawns the background checker loop as a detached Tokio task. The
/// handle is dropped by the caller to stop it (e.g. on shutdown).
pub fn spawn_checker(registry: std::sync::Arc<SubscribersRegistry>, checkup_interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(checkup_interval);
        loop {
            ticker.tick().await;
            registry.run_checkup();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn subscriber(url: &str) -> Subscriber {
        Subscriber {
            delivery_id: Uuid::new_v4(),
            delivery_url: url.to_string(),
            source_url: "https://source.example".to_string(),
            capacity: None,
        }
    }

    #[test]
    fn add_returns_true_for_new_url_false_for_update() {
        let registry = SubscribersRegistry::new(Duration::from_secs(30));
        assert!(registry.add(subscriber("https://a.example")));
        assert!(!registry.add(subscriber("https://a.example")));
        assert_eq!(registry.subscriber_count(), 1);
    }

    #[test]
    fn delete_reports_existed() {
        let registry = SubscribersRegistry::new(Duration::from_secs(30));
        assert!(!registry.delete("https://missing.example"));
        registry.add(subscriber("https://a.example"));
        assert!(registry.delete("https://a.example"));
        assert_eq!(registry.subscriber_count(), 0);
    }

    #[test]
    fn add_after_delete_recreates_as_available() {
        let registry = SubscribersRegistry::new(Duration::from_secs(30));
        registry.add(subscriber("https://a.example"));
        registry.mark_busy("https://a.example");
        registry.delete("https://a.example");
        assert!(registry.add(subscriber("https://a.example")));

        let state = registry.state.lock().unwrap();
        assert!(state.subscribers["https://a.example"].busy_until.is_none());
    }

    #[test]
    fn mark_busy_extends_rather_than_resets() {
        let registry = SubscribersRegistry::new(Duration::from_secs(30));
        registry.add(subscriber("https://a.example"));
        registry.mark_busy("https://a.example");
        let first_deadline = {
            let state = registry.state.lock().unwrap();
            state.subscribers["https://a.example"].busy_until.unwrap()
        };
        registry.mark_busy("https://a.example");
        let second_deadline = {
            let state = registry.state.lock().unwrap();
            state.subscribers["https://a.example"].busy_until.unwrap()
        };
        assert!(second_deadline >= first_deadline + chrono::Duration::seconds(29));
    }

    proptest::proptest! {
        /// `mark_busy`'s extend-not-reset invariant holds for any number
        /// of consecutive calls: each one pushes the deadline out by a
        /// full `busy_sleep` window rather than resetting the clock, so
        /// after `n` calls the deadline is at least `(n - 1)` windows
        /// out from the first one.
        #[test]
        fn mark_busy_extends_by_a_full_window_every_call(n in 1usize..8) {
            let registry = SubscribersRegistry::new(Duration::from_secs(30));
            registry.add(subscriber("https://a.example"));

            for _ in 0..n {
                registry.mark_busy("https://a.example");
            }

            let busy_until = {
                let state = registry.state.lock().unwrap();
                state.subscribers["https://a.example"].busy_until.unwrap()
            };

            let minimum_expected = Utc::now() + chrono::Duration::seconds(30 * (n as i64 - 1));
            proptest::prop_assert!(busy_until >= minimum_expected - chrono::Duration::seconds(1));
        }
    }

    #[test]
    fn total_capacity_is_none_when_nothing_declared() {
        let registry = SubscribersRegistry::new(Duration::from_secs(30));
        registry.add(subscriber("https://a.example"));
        assert_eq!(registry.get_total_capacity(), None);
    }

    #[test]
    fn total_capacity_sums_declared_capacities() {
        let registry = SubscribersRegistry::new(Duration::from_secs(30));
        registry.add(Subscriber {
            capacity: Some(3),
            ..subscriber("https://a.example")
        });
        registry.add(Subscriber {
            capacity: Some(4),
            ..subscriber("https://b.example")
        });
        assert_eq!(registry.get_total_capacity(), Some(7));
    }

    #[tokio::test]
    async fn find_available_subscriber_returns_immediately_when_one_exists() {
        let registry = SubscribersRegistry::new(Duration::from_secs(30));
        registry.add(subscriber("https://a.example"));
        let url = registry.find_available_subscriber().await;
        assert_eq!(url, "https://a.example");
    }

    #[tokio::test]
    async fn find_available_subscriber_is_released_when_one_is_added() {
        let registry = std::sync::Arc::new(SubscribersRegistry::new(Duration::from_secs(30)));
        let waiter_registry = registry.clone();
        let waiter = tokio::spawn(async move { waiter_registry.find_available_subscriber().await });

        tokio::task::yield_now().await;
        registry.add(subscriber("https://a.example"));

        let url = waiter.await.unwrap();
        assert_eq!(url, "https://a.example");
    }

    #[tokio::test]
    async fn run_checkup_hands_distinct_subscribers_to_distinct_queued_waiters() {
        let registry = std::sync::Arc::new(SubscribersRegistry::new(Duration::from_millis(1)));
        registry.add(subscriber("https://a.example"));
        registry.add(subscriber("https://b.example"));
        registry.add(subscriber("https://c.example"));
        registry.mark_busy("https://a.example");
        registry.mark_busy("https://b.example");
        registry.mark_busy("https://c.example");

        // All three subscribers are busy, so each waiter queues up.
        let mut waiters = Vec::new();
        for _ in 0..3 {
            let waiter_registry = registry.clone();
            waiters.push(tokio::spawn(async move { waiter_registry.find_available_subscriber().await }));
        }
        tokio::task::yield_now().await;

        // Let every busy window lapse, then drain all three waiters in
        // one `run_checkup` call: each must get a distinct subscriber,
        // not the same one handed out three times.
        std::thread::sleep(Duration::from_millis(5));
        registry.run_checkup();

        let mut urls: Vec<String> = Vec::new();
        for waiter in waiters {
            urls.push(waiter.await.unwrap());
        }
        urls.sort();
        urls.dedup();
        assert_eq!(urls.len(), 3, "each waiter must receive a distinct subscriber");
    }

    #[test]
    fn run_checkup_clears_expired_busy_window() {
        let registry = SubscribersRegistry::new(Duration::from_millis(1));
        registry.add(subscriber("https://a.example"));
        registry.mark_busy("https://a.example");
        std::thread::sleep(Duration::from_millis(5));
        registry.run_checkup();

        let state = registry.state.lock().unwrap();
        assert!(state.subscribers["https://a.example"].busy_until.is_none());
    }
}
