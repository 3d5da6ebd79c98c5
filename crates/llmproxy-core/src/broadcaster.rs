//! The dedup broadcaster (§4.5): one upstream stream fanned out to every
//! concurrent client holding an identical fingerprint, surviving the
//! initiating client's disconnect without dropping frames for the rest.
//!
//! Per-subscriber delivery uses bounded `tokio::sync::mpsc` queues fed by
//! the initiator's publish loop — subscribers are pushed to, never made to
//! poll a shared buffer (§9 "Broadcast fan-out").

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex, Notify};

type SessionRegistry = Mutex<HashMap<String, Arc<Session>>>;

#[derive(Debug, Clone)]
pub struct Frame {
    pub event: Option<String>,
    pub data: Bytes,
}

#[derive(Debug, Clone)]
pub enum SessionOutcome {
    Completed,
    Failed(Arc<str>),
}

#[derive(Debug, Clone)]
pub enum SessionMessage {
    Frame(Frame),
    Terminal(SessionOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Subscriber,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeError {
    BufferExceeded,
}

struct SessionInner {
    buffered: Vec<Frame>,
    terminal: Option<SessionOutcome>,
    subscribers: HashMap<u64, mpsc::Sender<SessionMessage>>,
}

/// One in-flight (or just-finished, awaiting drain) upstream stream and its
/// subscriber set.
pub struct Session {
    inner: Mutex<SessionInner>,
    next_subscriber_id: AtomicU64,
    buffer_soft_cap: usize,
    subscriber_queue_cap: usize,
    /// Signalled whenever the subscriber set becomes empty while the stream
    /// is still in progress — the publish loop selects on this to learn it
    /// should stop reading from upstream (§4.5 `detach`, §5 cancellation).
    /// Uses `notify_one`, which stores a permit for a `notified()` call that
    /// hasn't happened yet, so the producer never misses the signal by
    /// polling it a moment too late.
    pub all_detached: Notify,
    fingerprint: String,
    registry: Weak<SessionRegistry>,
}

impl Session {
    fn new(
        buffer_soft_cap: usize,
        subscriber_queue_cap: usize,
        fingerprint: String,
        registry: Weak<SessionRegistry>,
    ) -> Self {
        Self {
            inner: Mutex::new(SessionInner {
                buffered: Vec::new(),
                terminal: None,
                subscribers: HashMap::new(),
            }),
            next_subscriber_id: AtomicU64::new(0),
            buffer_soft_cap,
            subscriber_queue_cap,
            all_detached: Notify::new(),
            fingerprint,
            registry,
        }
    }

    /// Appends `frame` to the replay buffer and pushes it to every live
    /// subscriber. Initiator-only; the broadcaster does not enforce this,
    /// the lifecycle does by construction (only the initiator ever calls
    /// it).
    pub async fn publish(&self, frame: Frame) {
        let mut inner = self.inner.lock().await;
        inner.buffered.push(frame.clone());

        let mut dead = Vec::new();
        for (id, tx) in inner.subscribers.iter() {
            if tx.try_send(SessionMessage::Frame(frame.clone())).is_err() {
                dead.push(*id);
            }
        }
        for id in dead {
            inner.subscribers.remove(&id);
        }
    }

    pub async fn complete(&self, outcome: SessionOutcome) {
        let mut inner = self.inner.lock().await;
        inner.terminal = Some(outcome.clone());
        for tx in inner.subscribers.values() {
            let _ = tx.try_send(SessionMessage::Terminal(outcome.clone()));
        }
        let should_evict = inner.subscribers.is_empty();
        drop(inner);

        // Nothing left to drain this session (every subscriber had already
        // detached before the terminal outcome landed) — evict now instead
        // of waiting for a `detach` that will never come.
        if should_evict {
            self.evict_if_current().await;
        }
    }

    /// Removes this session from the fingerprint registry, but only if the
    /// registry's current entry for `fingerprint` still points at this
    /// exact session — a concurrent `attach` may already have replaced it
    /// with a fresh one for the same fingerprint. A no-op for sessions that
    /// were never registered (`registry` is a dangling `Weak`).
    async fn evict_if_current(&self) {
        if let Some(registry) = self.registry.upgrade() {
            let mut sessions = registry.lock().await;
            if let Some(existing) = sessions.get(&self.fingerprint) {
                if std::ptr::eq(existing.as_ref(), self) {
                    sessions.remove(&self.fingerprint);
                }
            }
        }
    }

    /// Subscribes to this session, replaying the buffered prefix before any
    /// live frame can arrive (both happen under the same lock acquisition,
    /// so no interleaving is possible). Rejected once the buffer has grown
    /// past the soft cap — the caller falls back to its own fresh upstream
    /// attempt rather than attaching (§4.5 "Memory bound").
    pub async fn subscribe(self: &Arc<Self>) -> Result<Subscriber, SubscribeError> {
        let mut inner = self.inner.lock().await;
        if inner.buffered.len() > self.buffer_soft_cap {
            return Err(SubscribeError::BufferExceeded);
        }

        let capacity = self.subscriber_queue_cap.max(inner.buffered.len() + 2);
        let (tx, rx) = mpsc::channel(capacity);
        for frame in inner.buffered.iter().cloned() {
            // Capacity was sized to fit the replay above; this cannot fail.
            let _ = tx.try_send(SessionMessage::Frame(frame));
        }
        let delivered_any = !inner.buffered.is_empty();
        if let Some(outcome) = &inner.terminal {
            let _ = tx.try_send(SessionMessage::Terminal(outcome.clone()));
        }

        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        inner.subscribers.insert(id, tx);

        Ok(Subscriber {
            session: self.clone(),
            id,
            rx,
            delivered_any,
        })
    }

    /// Removes subscriber `id`. If the stream is still in progress and this
    /// was the last subscriber, wakes the producer via `all_detached`. If
    /// the stream has already reached a terminal outcome and this was the
    /// last subscriber draining it, evicts the session from the fingerprint
    /// registry (§4.5 "destroyed after completion and all subscribers have
    /// drained, or on failure propagation") instead of leaving it for a
    /// future `attach` on the same fingerprint to reclaim.
    async fn detach(&self, id: u64) {
        let mut inner = self.inner.lock().await;
        inner.subscribers.remove(&id);
        let should_evict = inner.subscribers.is_empty() && inner.terminal.is_some();
        if inner.subscribers.is_empty() && inner.terminal.is_none() {
            self.all_detached.notify_one();
        }
        drop(inner);

        if should_evict {
            self.evict_if_current().await;
        }
    }

    /// Snapshot of the live subscriber count, used by the producer as a
    /// cheap fallback check alongside `all_detached`.
    pub async fn subscriber_count(&self) -> usize {
        self.inner.lock().await.subscribers.len()
    }
}

/// A handle to one subscriber's delivery queue. Callers must call
/// [`Subscriber::detach`] when they are done (success, client disconnect,
/// or error) — there is no implicit detach on drop because that would
/// require blocking inside a destructor.
pub struct Subscriber {
    session: Arc<Session>,
    id: u64,
    rx: mpsc::Receiver<SessionMessage>,
    delivered_any: bool,
}

impl Subscriber {
    pub async fn recv(&mut self) -> Option<SessionMessage> {
        let msg = self.rx.recv().await;
        if let Some(SessionMessage::Frame(_)) = &msg {
            self.delivered_any = true;
        }
        msg
    }

    /// Whether this subscriber has already been handed at least one frame.
    /// §4.5 `fail`: a subscriber with no delivered frames yet can fall back
    /// to its own independent attempt; one that has already streamed
    /// partial output to its client must surface the error mid-stream
    /// instead.
    pub fn delivered_any(&self) -> bool {
        self.delivered_any
    }

    pub async fn detach(self) {
        self.session.detach(self.id).await;
    }
}

/// Global registry of in-flight sessions, keyed by request fingerprint.
/// Only `stream: true` requests are ever looked up here (§4.5 "Fingerprint
/// scope") — non-streaming requests issue independent upstream calls.
pub struct DedupBroadcaster {
    sessions: Arc<SessionRegistry>,
    buffer_soft_cap: usize,
    subscriber_queue_cap: usize,
}

impl DedupBroadcaster {
    pub fn new(buffer_soft_cap: usize, subscriber_queue_cap: usize) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            buffer_soft_cap,
            subscriber_queue_cap,
        }
    }

    /// Attaches to the session for `fingerprint`, creating one if none
    /// exists or if the existing one already finished (a finished session
    /// has nothing left to stream to a new subscriber, so it is evicted in
    /// favour of a fresh attempt here rather than reused). A session also
    /// evicts itself from this registry the moment it reaches a terminal
    /// outcome with no subscribers left to drain it (see
    /// `Session::evict_if_current`), so the map never retains more than one
    /// finished-but-undrained entry per fingerprint at a time.
    pub async fn attach(&self, fingerprint: &str) -> (Arc<Session>, Role) {
        let mut sessions = self.sessions.lock().await;

        if let Some(session) = sessions.get(fingerprint) {
            let still_live = session.inner.lock().await.terminal.is_none();
            if still_live {
                return (session.clone(), Role::Subscriber);
            }
        }

        let session = Arc::new(Session::new(
            self.buffer_soft_cap,
            self.subscriber_queue_cap,
            fingerprint.to_string(),
            Arc::downgrade(&self.sessions),
        ));
        sessions.insert(fingerprint.to_string(), session.clone());
        (session, Role::Initiator)
    }

    /// A session that is never registered in the fingerprint map — used
    /// when a subscriber is rejected for exceeding the buffer soft cap and
    /// must run its own independent upstream attempt instead (§4.5 "Memory
    /// bound").
    pub fn standalone_session(&self) -> Arc<Session> {
        Arc::new(Session::new(
            self.buffer_soft_cap,
            self.subscriber_queue_cap,
            String::new(),
            Weak::new(),
        ))
    }

    #[cfg(test)]
    async fn registered_session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(data: &str) -> Frame {
        Frame {
            event: Some("content_block_delta".to_string()),
            data: Bytes::from(data.to_string()),
        }
    }

    #[tokio::test]
    async fn second_attach_for_same_fingerprint_is_a_subscriber() {
        let broadcaster = DedupBroadcaster::new(512, 64);
        let (_session, role1) = broadcaster.attach("fp-1").await;
        let (_session, role2) = broadcaster.attach("fp-1").await;
        assert_eq!(role1, Role::Initiator);
        assert_eq!(role2, Role::Subscriber);
    }

    #[tokio::test]
    async fn subscriber_replays_buffer_then_sees_live_frames_in_order() {
        let broadcaster = DedupBroadcaster::new(512, 64);
        let (session, _role) = broadcaster.attach("fp-1").await;
        session.publish(frame("A")).await;
        session.publish(frame("B")).await;

        let mut subscriber = session.subscribe().await.unwrap();
        session.publish(frame("C")).await;
        session.complete(SessionOutcome::Completed).await;

        let mut seen = Vec::new();
        while let Some(SessionMessage::Frame(f)) = subscriber.recv().await {
            seen.push(String::from_utf8(f.data.to_vec()).unwrap());
        }
        assert_eq!(seen, vec!["A", "B", "C"]);
        subscriber.detach().await;
    }

    #[tokio::test]
    async fn initiator_drop_survives_for_remaining_subscribers() {
        let broadcaster = DedupBroadcaster::new(512, 64);
        let (session, _role) = broadcaster.attach("fp-1").await;

        let mut sub1 = session.subscribe().await.unwrap();
        let mut sub2 = session.subscribe().await.unwrap();

        session.publish(frame("A")).await;
        // initiator (itself just a subscriber once the session exists)
        // drops after one frame.
        sub1.recv().await;
        sub1.detach().await;

        session.publish(frame("B")).await;
        session.complete(SessionOutcome::Completed).await;

        let mut seen = Vec::new();
        loop {
            match sub2.recv().await {
                Some(SessionMessage::Frame(f)) => {
                    seen.push(String::from_utf8(f.data.to_vec()).unwrap())
                }
                Some(SessionMessage::Terminal(SessionOutcome::Completed)) => break,
                Some(SessionMessage::Terminal(SessionOutcome::Failed(_))) => panic!("unexpected failure"),
                None => panic!("channel closed before terminal message"),
            }
        }
        assert_eq!(seen, vec!["A", "B"]);
        sub2.detach().await;
    }

    #[tokio::test]
    async fn buffer_exceeded_rejects_new_subscribers_but_not_existing_ones() {
        let broadcaster = DedupBroadcaster::new(1, 64);
        let (session, _role) = broadcaster.attach("fp-1").await;
        session.publish(frame("A")).await;
        session.publish(frame("B")).await;

        let result = session.subscribe().await;
        assert_eq!(result.unwrap_err(), SubscribeError::BufferExceeded);
    }

    #[tokio::test]
    async fn all_detached_notifies_while_in_progress() {
        let broadcaster = DedupBroadcaster::new(512, 64);
        let (session, _role) = broadcaster.attach("fp-1").await;
        let subscriber = session.subscribe().await.unwrap();

        let notified = session.all_detached.notified();
        subscriber.detach().await;
        notified.await;
    }

    #[tokio::test]
    async fn finished_session_is_evicted_on_next_attach() {
        let broadcaster = DedupBroadcaster::new(512, 64);
        let (session, _role) = broadcaster.attach("fp-1").await;
        session.complete(SessionOutcome::Completed).await;

        let (second, role) = broadcaster.attach("fp-1").await;
        assert_eq!(role, Role::Initiator);
        assert!(!Arc::ptr_eq(&session, &second));
    }

    #[tokio::test]
    async fn completed_session_is_evicted_as_soon_as_its_last_subscriber_drains() {
        let broadcaster = DedupBroadcaster::new(512, 64);
        let (session, _role) = broadcaster.attach("fp-1").await;
        let mut subscriber = session.subscribe().await.unwrap();

        session.publish(frame("A")).await;
        session.complete(SessionOutcome::Completed).await;
        assert_eq!(broadcaster.registered_session_count().await, 1);

        subscriber.recv().await;
        match subscriber.recv().await {
            Some(SessionMessage::Terminal(SessionOutcome::Completed)) => {}
            other => panic!("expected terminal message, got {other:?}"),
        }
        subscriber.detach().await;

        // No fresh `attach` needed to reclaim it: the session removed
        // itself from the registry the moment its last subscriber detached.
        assert_eq!(broadcaster.registered_session_count().await, 0);
    }

    #[tokio::test]
    async fn session_with_no_subscribers_left_is_evicted_on_complete() {
        let broadcaster = DedupBroadcaster::new(512, 64);
        let (session, _role) = broadcaster.attach("fp-1").await;
        let subscriber = session.subscribe().await.unwrap();
        subscriber.detach().await;

        // The only subscriber already left before the stream finished; the
        // eviction has to happen from `complete` itself, since there will be
        // no further `detach` call to trigger it.
        session.complete(SessionOutcome::Completed).await;
        assert_eq!(broadcaster.registered_session_count().await, 0);
    }
}
