#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::Notify;
use complaint_pipeline::{
    clients::{
        database::ComplaintStore, dead_letter::DeadLetterSink, notifier::Notifier,
        queue::QueueClient, redis::NotificationLedger, topic::TopicClient,
    },
    error::{LedgerError, NotifyError, PolicyError, QueueError, StoreError, TopicError},
    models::{
        circuit_breaker::CircuitState,
        complaint::{ComplaintRecord, ComplaintSubmission, NewComplaint, PersistedComplaint},
        event::ProcessedEvent,
        message::{QueueMessage, ReceiptHandle},
        outcome::Stage,
        status::ClaimStatus,
    },
    policy::{ResilienceObserver, RetryEvent},
};
use uuid::Uuid;

pub fn submission() -> ComplaintSubmission {
    ComplaintSubmission {
        customer_name: "Ana Silva".to_string(),
        customer_email: "ana@example.com".to_string(),
        complaint_type: "Billing".to_string(),
        description: "I was charged twice for the same order".to_string(),
    }
}

pub fn submission_body() -> String {
    serde_json::to_string(&submission()).unwrap()
}

pub fn event() -> ProcessedEvent {
    ProcessedEvent {
        complaint_id: Uuid::new_v4(),
        customer_email: "ana@example.com".to_string(),
        complaint_type: "Billing".to_string(),
        processed_at: chrono::Utc::now(),
    }
}

/// Wraps `event` the way the topic delivers it to a subscriber queue.
pub fn envelope_body(event: &ProcessedEvent) -> String {
    serde_json::json!({
        "Type": "Notification",
        "MessageId": Uuid::new_v4().to_string(),
        "TopicArn": "complaint-processed",
        "Message": serde_json::to_string(event).unwrap(),
        "Timestamp": "2024-05-01T10:00:00Z",
    })
    .to_string()
}

fn unavailable(what: &str) -> String {
    format!("{} unavailable (injected)", what)
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueueMessage>,
    in_flight: HashMap<String, QueueMessage>,
    deleted: Vec<QueueMessage>,
    sent: Vec<String>,
    next_receipt: u64,
    expire_after_deletes: Option<u32>,
}

impl QueueState {
    fn expire_in_flight(&mut self) {
        let expired: Vec<QueueMessage> = self.in_flight.drain().map(|(_, m)| m).collect();
        for mut message in expired {
            message.redelivered = true;
            self.pending.push_back(message);
        }
    }

    fn take_pending(&mut self, max_messages: usize) -> Vec<QueueMessage> {
        let mut messages = Vec::new();
        while messages.len() < max_messages {
            let Some(mut message) = self.pending.pop_front() else {
                break;
            };
            self.next_receipt += 1;
            message.receipt = ReceiptHandle(format!("receipt-{}", self.next_receipt));
            self.in_flight
                .insert(message.receipt.0.clone(), message.clone());
            messages.push(message);
        }
        messages
    }
}

/// In-memory queue with explicit control over redelivery.
pub struct FakeQueue {
    name: String,
    state: Mutex<QueueState>,
    arrivals: Notify,
    receive_calls: AtomicU32,
    failing_sends: AtomicU32,
    failing_receives: AtomicU32,
    delete_calls: AtomicU32,
}

impl FakeQueue {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            state: Mutex::new(QueueState::default()),
            arrivals: Notify::new(),
            receive_calls: AtomicU32::new(0),
            failing_sends: AtomicU32::new(0),
            failing_receives: AtomicU32::new(0),
            delete_calls: AtomicU32::new(0),
        })
    }

    pub fn push(&self, body: &str) -> String {
        let id = Uuid::new_v4().to_string();
        self.enqueue(Some(id.clone()), body);
        id
    }

    pub fn push_without_id(&self, body: &str) {
        self.enqueue(None, body);
    }

    fn enqueue(&self, message_id: Option<String>, body: &str) {
        self.state.lock().unwrap().pending.push_back(QueueMessage {
            message_id,
            body: body.to_string(),
            receipt: ReceiptHandle(String::new()),
            redelivered: false,
        });
        self.arrivals.notify_waiters();
    }

    /// Makes every undeleted message visible again, as a lapsed visibility timeout would.
    pub fn expire_in_flight(&self) {
        self.state.lock().unwrap().expire_in_flight();
        self.arrivals.notify_waiters();
    }

    /// Lets the visibility timeout of every outstanding message lapse right after the
    /// `count`-th successful delete.
    pub fn expire_after_deletes(&self, count: u32) {
        self.state.lock().unwrap().expire_after_deletes = Some(count);
    }

    pub fn receive_calls(&self) -> u32 {
        self.receive_calls.load(Ordering::SeqCst)
    }

    pub fn fail_next_sends(&self, count: u32) {
        self.failing_sends.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_receives(&self, count: u32) {
        self.failing_receives.store(count, Ordering::SeqCst);
    }

    pub fn deleted(&self) -> Vec<QueueMessage> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn delete_calls(&self) -> u32 {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().unwrap().in_flight.len()
    }

    pub fn pending(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    pub fn sent(&self) -> Vec<String> {
        self.state.lock().unwrap().sent.clone()
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl QueueClient for FakeQueue {
    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        self.receive_calls.fetch_add(1, Ordering::SeqCst);

        if take_one(&self.failing_receives) {
            return Err(QueueError::Unavailable(unavailable("queue")));
        }

        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let arrival = self.arrivals.notified();
            tokio::pin!(arrival);
            arrival.as_mut().enable();

            let messages = self.state.lock().unwrap().take_pending(max_messages);
            if !messages.is_empty() {
                return Ok(messages);
            }

            if tokio::time::timeout_at(deadline, arrival).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn delete(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);

        let mut state = self.state.lock().unwrap();
        match state.in_flight.remove(&receipt.0) {
            Some(message) => {
                state.deleted.push(message);
                match state.expire_after_deletes {
                    Some(n) if n <= 1 => {
                        state.expire_after_deletes = None;
                        state.expire_in_flight();
                    }
                    Some(n) => state.expire_after_deletes = Some(n - 1),
                    None => {}
                }
                Ok(())
            }
            None => Err(QueueError::ReceiptExpired(receipt.0.clone())),
        }
    }

    fn is_receipt_live(&self, receipt: &ReceiptHandle) -> bool {
        self.state.lock().unwrap().in_flight.contains_key(&receipt.0)
    }

    async fn send(&self, body: &str) -> Result<String, QueueError> {
        if take_one(&self.failing_sends) {
            return Err(QueueError::Unavailable(unavailable("queue")));
        }

        self.state.lock().unwrap().sent.push(body.to_string());
        Ok(self.push(body))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Default)]
pub struct FakeTopic {
    published: Mutex<Vec<(String, HashMap<String, String>)>>,
    failing: AtomicU32,
    calls: AtomicU32,
}

impl FakeTopic {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next(&self, count: u32) {
        self.failing.store(count, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<(String, HashMap<String, String>)> {
        self.published.lock().unwrap().clone()
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TopicClient for FakeTopic {
    async fn publish(
        &self,
        body: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<String, TopicError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if take_one(&self.failing) {
            return Err(TopicError::Unavailable(unavailable("topic")));
        }

        self.published
            .lock()
            .unwrap()
            .push((body.to_string(), attributes.clone()));
        Ok(Uuid::new_v4().to_string())
    }
}

pub enum StoreFailure {
    Transient,
    Fatal,
}

/// Complaint store keyed by idempotency key, with scripted failures.
#[derive(Default)]
pub struct FakeStore {
    rows: Mutex<HashMap<String, ComplaintRecord>>,
    failures: Mutex<VecDeque<StoreFailure>>,
    calls: AtomicU32,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next(&self, count: usize, kind: fn() -> StoreFailure) {
        let mut failures = self.failures.lock().unwrap();
        for _ in 0..count {
            failures.push_back(kind());
        }
    }

    pub fn rows(&self) -> Vec<ComplaintRecord> {
        self.rows.lock().unwrap().values().cloned().collect()
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ComplaintStore for FakeStore {
    async fn insert(&self, complaint: &NewComplaint) -> Result<PersistedComplaint, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        match self.failures.lock().unwrap().pop_front() {
            Some(StoreFailure::Transient) => {
                return Err(StoreError::Unavailable(unavailable("database")));
            }
            Some(StoreFailure::Fatal) => {
                return Err(StoreError::Constraint("value too long".to_string()));
            }
            None => {}
        }

        let mut rows = self.rows.lock().unwrap();
        if let Some(existing) = rows.get(&complaint.idempotency_key) {
            return Ok(PersistedComplaint {
                record: existing.clone(),
                created: false,
            });
        }

        let record = complaint.clone().into_record();
        rows.insert(complaint.idempotency_key.clone(), record.clone());
        Ok(PersistedComplaint {
            record,
            created: true,
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

pub enum NotifierMode {
    Healthy,
    /// Every call fails with a retryable provider error.
    Down,
    /// Every call fails with a non-retryable provider error.
    Rejecting,
}

pub struct FakeNotifier {
    mode: Mutex<NotifierMode>,
    failing: AtomicU32,
    calls: AtomicU32,
    delivered: Mutex<Vec<ProcessedEvent>>,
}

impl FakeNotifier {
    pub fn new(mode: NotifierMode) -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(mode),
            failing: AtomicU32::new(0),
            calls: AtomicU32::new(0),
            delivered: Mutex::new(Vec::new()),
        })
    }

    pub fn set_mode(&self, mode: NotifierMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn fail_next(&self, count: u32) {
        self.failing.store(count, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> Vec<ProcessedEvent> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn notify(&self, event: &ProcessedEvent) -> Result<(), NotifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if take_one(&self.failing) {
            return Err(NotifyError::Unavailable {
                status: 503,
                body: String::new(),
            });
        }

        match *self.mode.lock().unwrap() {
            NotifierMode::Healthy => {}
            NotifierMode::Down => {
                return Err(NotifyError::Unavailable {
                    status: 503,
                    body: "provider down".to_string(),
                });
            }
            NotifierMode::Rejecting => {
                return Err(NotifyError::Rejected {
                    status: 400,
                    body: "bad address".to_string(),
                });
            }
        }

        self.delivered.lock().unwrap().push(event.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeLedger {
    entries: Mutex<HashMap<Uuid, ClaimStatus>>,
    unavailable: Mutex<bool>,
    released: Mutex<Vec<Uuid>>,
}

impl FakeLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, complaint_id: Uuid, status: ClaimStatus) {
        self.entries.lock().unwrap().insert(complaint_id, status);
    }

    pub fn get(&self, complaint_id: Uuid) -> Option<ClaimStatus> {
        self.entries.lock().unwrap().get(&complaint_id).copied()
    }

    pub fn set_unavailable(&self) {
        *self.unavailable.lock().unwrap() = true;
    }

    pub fn released(&self) -> Vec<Uuid> {
        self.released.lock().unwrap().clone()
    }

    fn check(&self) -> Result<(), LedgerError> {
        if *self.unavailable.lock().unwrap() {
            let error = redis::RedisError::from((redis::ErrorKind::IoError, "connection refused"));
            return Err(LedgerError::Redis(error));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationLedger for FakeLedger {
    async fn claim(&self, complaint_id: Uuid) -> Result<ClaimStatus, LedgerError> {
        self.check()?;

        let mut entries = self.entries.lock().unwrap();
        match entries.get(&complaint_id) {
            Some(ClaimStatus::AlreadySent) => Ok(ClaimStatus::AlreadySent),
            Some(_) => Ok(ClaimStatus::InProgress),
            None => {
                entries.insert(complaint_id, ClaimStatus::InProgress);
                Ok(ClaimStatus::Acquired)
            }
        }
    }

    async fn mark_sent(&self, complaint_id: Uuid) -> Result<(), PolicyError<LedgerError>> {
        self.check().map_err(|source| PolicyError::Fatal {
            policy: "ledger".to_string(),
            source,
        })?;
        self.set(complaint_id, ClaimStatus::AlreadySent);
        Ok(())
    }

    async fn release(&self, complaint_id: Uuid) -> Result<(), LedgerError> {
        self.check()?;
        self.entries.lock().unwrap().remove(&complaint_id);
        self.released.lock().unwrap().push(complaint_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingDeadLetters {
    poisoned: Mutex<Vec<String>>,
    exhausted: Mutex<Vec<Stage>>,
}

impl RecordingDeadLetters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn poisoned(&self) -> Vec<String> {
        self.poisoned.lock().unwrap().clone()
    }

    pub fn exhausted(&self) -> Vec<Stage> {
        self.exhausted.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeadLetterSink for RecordingDeadLetters {
    async fn on_poison(&self, _message: &QueueMessage, reason: &str) {
        self.poisoned.lock().unwrap().push(reason.to_string());
    }

    async fn on_exhausted(&self, _message: &QueueMessage, stage: Stage, _reason: &str) {
        self.exhausted.lock().unwrap().push(stage);
    }
}

#[derive(Default)]
pub struct CountingObserver {
    retries: Mutex<Vec<(String, u32, Duration)>>,
    transitions: Mutex<Vec<(CircuitState, CircuitState)>>,
}

impl CountingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn retries(&self) -> Vec<(String, u32, Duration)> {
        self.retries.lock().unwrap().clone()
    }

    pub fn transitions(&self) -> Vec<(CircuitState, CircuitState)> {
        self.transitions.lock().unwrap().clone()
    }
}

impl ResilienceObserver for CountingObserver {
    fn on_retry(&self, event: &RetryEvent<'_>) {
        self.retries
            .lock()
            .unwrap()
            .push((event.policy.to_string(), event.attempt, event.delay));
    }

    fn on_circuit_transition(&self, _breaker: &str, from: CircuitState, to: CircuitState) {
        self.transitions.lock().unwrap().push((from, to));
    }
}
