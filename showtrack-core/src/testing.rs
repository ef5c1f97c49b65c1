//! Scriptable fakes shared by the unit tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::entity::SyncEntity;
use crate::models::{EntityId, Record, RemoteRecord};
use crate::sync::{
    Commit, GatewayError, LocalStore, PendingOperation, QueueChange, RecordPredicate,
    RemoteGateway, StoreError,
};

pub const OWNER: &str = "student-1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Create,
    Update,
    Delete,
    Get,
    List,
}

#[derive(Debug, Clone)]
pub struct FakeCall<E> {
    pub kind: CallKind,
    pub id: Option<EntityId>,
    pub payload: Option<E>,
}

type FailureRule<E> = Box<dyn Fn(&FakeCall<E>) -> Option<GatewayError> + Send + Sync>;

struct FakeState<E> {
    rows: Vec<RemoteRecord<E>>,
    next_id: usize,
    calls: Vec<FakeCall<E>>,
    scripted: VecDeque<GatewayError>,
    always: Option<GatewayError>,
    rule: Option<FailureRule<E>>,
}

/// In-memory backend with injectable failures.
///
/// Failures are checked in order: `fail_always`, then `fail_where`, then the
/// `fail_next` script.
pub struct FakeGateway<E> {
    state: Mutex<FakeState<E>>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl<E: SyncEntity> FakeGateway<E> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                rows: Vec::new(),
                next_id: 0,
                calls: Vec::new(),
                scripted: VecDeque::new(),
                always: None,
                rule: None,
            }),
            delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Every call sleeps for `delay`, widening any overlap between callers.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn offline() -> Self {
        let fake = Self::new();
        fake.fail_always(GatewayError::NetworkUnavailable("offline".to_string()));
        fake
    }

    pub fn fail_always(&self, error: GatewayError) {
        self.state.lock().unwrap().always = Some(error);
    }

    pub fn fail_next(&self, error: GatewayError) {
        self.state.lock().unwrap().scripted.push_back(error);
    }

    pub fn fail_where(
        &self,
        rule: impl Fn(&FakeCall<E>) -> Option<GatewayError> + Send + Sync + 'static,
    ) {
        self.state.lock().unwrap().rule = Some(Box::new(rule));
    }

    /// Clears `fail_always` and the script; a `fail_where` rule stays.
    pub fn heal(&self) {
        let mut state = self.state.lock().unwrap();
        state.always = None;
        state.scripted.clear();
    }

    /// Puts an entity on the server without recording a call.
    pub fn seed(&self, payload: E) -> RemoteRecord<E> {
        let mut state = self.state.lock().unwrap();
        let row = Self::new_row(&mut *state, payload);
        state.rows.push(row.clone());
        row
    }

    pub fn server_rows(&self) -> Vec<RemoteRecord<E>> {
        self.state.lock().unwrap().rows.clone()
    }

    /// Changes a row as another device would.
    pub fn edit_on_server(&self, id: &EntityId, payload: E) {
        let mut state = self.state.lock().unwrap();
        if let Some(row) = state.rows.iter_mut().find(|r| &r.id == id) {
            row.payload = payload;
            row.version += 1;
            row.updated_at = Utc::now();
        }
    }

    /// Removes a row as another device would.
    pub fn delete_on_server(&self, id: &EntityId) {
        self.state.lock().unwrap().rows.retain(|r| &r.id != id);
    }

    pub fn calls(&self) -> Vec<FakeCall<E>> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, kind: CallKind) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.kind == kind)
            .count()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn new_row(state: &mut FakeState<E>, payload: E) -> RemoteRecord<E> {
        state.next_id += 1;
        RemoteRecord {
            id: EntityId::new(format!("srv-{}", state.next_id)),
            owner_id: OWNER.to_string(),
            version: 1,
            updated_at: Utc::now(),
            payload,
        }
    }

    fn not_found() -> GatewayError {
        GatewayError::Server {
            status: 404,
            message: "not found".to_string(),
        }
    }

    async fn enter(&self, call: FakeCall<E>) -> Result<(), GatewayError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut state = self.state.lock().unwrap();
        let failure = state
            .always
            .clone()
            .or_else(|| state.rule.as_ref().and_then(|rule| rule(&call)))
            .or_else(|| state.scripted.pop_front());
        state.calls.push(call);
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl<E: SyncEntity> RemoteGateway<E> for FakeGateway<E> {
    async fn create(&self, payload: &E) -> Result<RemoteRecord<E>, GatewayError> {
        self.enter(FakeCall {
            kind: CallKind::Create,
            id: None,
            payload: Some(payload.clone()),
        })
        .await?;
        let mut state = self.state.lock().unwrap();
        let row = Self::new_row(&mut *state, payload.clone());
        state.rows.push(row.clone());
        Ok(row)
    }

    async fn update(&self, id: &EntityId, payload: &E) -> Result<RemoteRecord<E>, GatewayError> {
        self.enter(FakeCall {
            kind: CallKind::Update,
            id: Some(id.clone()),
            payload: Some(payload.clone()),
        })
        .await?;
        let mut state = self.state.lock().unwrap();
        let row = state
            .rows
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or_else(Self::not_found)?;
        row.payload = payload.clone();
        row.version += 1;
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn delete(&self, id: &EntityId) -> Result<(), GatewayError> {
        self.enter(FakeCall {
            kind: CallKind::Delete,
            id: Some(id.clone()),
            payload: None,
        })
        .await?;
        self.state.lock().unwrap().rows.retain(|r| &r.id != id);
        Ok(())
    }

    async fn get(&self, id: &EntityId) -> Result<RemoteRecord<E>, GatewayError> {
        self.enter(FakeCall {
            kind: CallKind::Get,
            id: Some(id.clone()),
            payload: None,
        })
        .await?;
        let state = self.state.lock().unwrap();
        state
            .rows
            .iter()
            .find(|r| &r.id == id)
            .cloned()
            .ok_or_else(Self::not_found)
    }

    async fn list(&self, filter: &E::Filter) -> Result<Vec<RemoteRecord<E>>, GatewayError> {
        self.enter(FakeCall {
            kind: CallKind::List,
            id: None,
            payload: None,
        })
        .await?;
        let state = self.state.lock().unwrap();
        Ok(state
            .rows
            .iter()
            .filter(|r| r.payload.matches_filter(filter))
            .cloned()
            .collect())
    }
}

/// Wraps a store and counts the queue writes that go through it.
pub struct CountingStore<S> {
    pub inner: S,
    enqueues: AtomicUsize,
    commits: AtomicUsize,
}

impl<S> CountingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            enqueues: AtomicUsize::new(0),
            commits: AtomicUsize::new(0),
        }
    }

    pub fn enqueues(&self) -> usize {
        self.enqueues.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<E: SyncEntity, S: LocalStore<E>> LocalStore<E> for CountingStore<S> {
    async fn commit(&self, commit: Commit<E>) -> Result<Option<PendingOperation<E>>, StoreError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        if matches!(commit.queue, Some(QueueChange::Enqueue(_))) {
            self.enqueues.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.commit(commit).await
    }

    async fn get(&self, id: &EntityId) -> Result<Option<Record<E>>, StoreError> {
        self.inner.get(id).await
    }

    async fn list_all(
        &self,
        predicate: RecordPredicate<'_, E>,
    ) -> Result<Vec<Record<E>>, StoreError> {
        self.inner.list_all(predicate).await
    }

    async fn dequeue_operations(&self) -> Result<Vec<PendingOperation<E>>, StoreError> {
        self.inner.dequeue_operations().await
    }

    async fn pending_operation(
        &self,
        id: &EntityId,
    ) -> Result<Option<PendingOperation<E>>, StoreError> {
        self.inner.pending_operation(id).await
    }

    async fn resolve_alias(&self, id: &EntityId) -> Result<Option<EntityId>, StoreError> {
        self.inner.resolve_alias(id).await
    }
}
