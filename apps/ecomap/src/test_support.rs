use crate::error::GatewayError;
use crate::gateway::{InsertSubscription, ReportGateway};
use crate::report::{NewReport, Report, ReportId};
use crate::session::Identity;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum Failure {
    Backend(String),
    Transport,
}

impl Failure {
    pub fn backend(message: &str) -> Self {
        Failure::Backend(message.to_string())
    }

    pub fn transport() -> Self {
        Failure::Transport
    }

    fn into_error(self) -> GatewayError {
        match self {
            Failure::Backend(message) => GatewayError::Backend {
                status: 400,
                message,
            },
            Failure::Transport => GatewayError::Decode("connection reset".to_string()),
        }
    }
}

/// Parks uploads until the test releases them.
#[derive(Default)]
pub struct Gate {
    entered: Notify,
    released: Notify,
}

impl Gate {
    async fn enter(&self) {
        self.entered.notify_one();
        self.released.notified().await;
    }

    pub async fn wait_for_waiter(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.released.notify_one();
    }
}

#[derive(Default)]
struct FakeState {
    user: Option<Identity>,
    reports: Vec<Report>,
    uploads: Vec<String>,
    subscribers: Vec<mpsc::Sender<Report>>,
    fail_session: Option<Failure>,
    fail_list: Option<Failure>,
    fail_upload: Option<Failure>,
    fail_insert: Option<Failure>,
    fail_subscribe: Option<Failure>,
    upload_gate: Option<Arc<Gate>>,
    echo_inserts: bool,
}

/// In-memory backend: stores reports, records calls and fans out inserts to
/// live subscribers the way the hosted platform does.
pub struct FakeGateway {
    state: Mutex<FakeState>,
    next_id: AtomicU64,
    session_calls: AtomicU64,
    list_calls: AtomicU64,
    upload_calls: AtomicU64,
    insert_calls: AtomicU64,
    subscribe_calls: AtomicU64,
    sign_out_calls: AtomicU64,
}

impl FakeGateway {
    fn with_user(user: Option<Identity>) -> Self {
        Self {
            state: Mutex::new(FakeState {
                user,
                echo_inserts: true,
                ..FakeState::default()
            }),
            next_id: AtomicU64::new(100),
            session_calls: AtomicU64::new(0),
            list_calls: AtomicU64::new(0),
            upload_calls: AtomicU64::new(0),
            insert_calls: AtomicU64::new(0),
            subscribe_calls: AtomicU64::new(0),
            sign_out_calls: AtomicU64::new(0),
        }
    }

    pub fn anonymous() -> Self {
        Self::with_user(None)
    }

    pub fn signed_in() -> Self {
        Self::with_user(Some(Identity {
            id: Uuid::new_v4(),
            email: Some("reporter@example.com".to_string()),
        }))
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake gateway state poisoned")
    }

    pub fn with_reports(self, reports: Vec<Report>) -> Self {
        self.state().reports = reports;
        self
    }

    pub fn without_insert_echo(self) -> Self {
        self.state().echo_inserts = false;
        self
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.state().user.as_ref().map(|user| user.id)
    }

    pub fn expire_session(&self) {
        self.state().user = None;
    }

    pub fn fail_next_session(&self, failure: Failure) {
        self.state().fail_session = Some(failure);
    }

    pub fn fail_next_list(&self, failure: Failure) {
        self.state().fail_list = Some(failure);
    }

    pub fn fail_next_upload(&self, failure: Failure) {
        self.state().fail_upload = Some(failure);
    }

    pub fn fail_next_insert(&self, failure: Failure) {
        self.state().fail_insert = Some(failure);
    }

    pub fn fail_next_subscribe(&self, failure: Failure) {
        self.state().fail_subscribe = Some(failure);
    }

    pub fn hold_uploads(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.state().upload_gate = Some(gate.clone());
        gate
    }

    /// Stores a report written by another client and pushes it to subscribers.
    pub async fn insert_from_elsewhere(&self, report: Report) -> usize {
        self.state().reports.push(report.clone());
        self.push_live(report).await
    }

    /// Delivers `report` to every open subscription; returns how many received it.
    pub async fn push_live(&self, report: Report) -> usize {
        let subscribers: Vec<mpsc::Sender<Report>> = {
            let mut state = self.state();
            state.subscribers.retain(|tx| !tx.is_closed());
            state.subscribers.clone()
        };
        let mut delivered = 0;
        for tx in subscribers {
            if tx.send(report.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    pub fn active_subscriptions(&self) -> usize {
        self.state()
            .subscribers
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }

    pub fn stored_reports(&self) -> Vec<Report> {
        self.state().reports.clone()
    }

    pub fn uploaded_keys(&self) -> Vec<String> {
        self.state().uploads.clone()
    }

    pub fn session_calls(&self) -> u64 {
        self.session_calls.load(Ordering::Relaxed)
    }

    pub fn list_calls(&self) -> u64 {
        self.list_calls.load(Ordering::Relaxed)
    }

    pub fn upload_calls(&self) -> u64 {
        self.upload_calls.load(Ordering::Relaxed)
    }

    pub fn insert_calls(&self) -> u64 {
        self.insert_calls.load(Ordering::Relaxed)
    }

    pub fn subscribe_calls(&self) -> u64 {
        self.subscribe_calls.load(Ordering::Relaxed)
    }

    pub fn sign_out_calls(&self) -> u64 {
        self.sign_out_calls.load(Ordering::Relaxed)
    }

    pub fn backend_calls(&self) -> u64 {
        self.session_calls()
            + self.list_calls()
            + self.upload_calls()
            + self.insert_calls()
            + self.subscribe_calls()
            + self.sign_out_calls()
    }
}

#[async_trait]
impl ReportGateway for FakeGateway {
    async fn current_user(&self) -> Result<Option<Identity>, GatewayError> {
        self.session_calls.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state();
        if let Some(failure) = state.fail_session.take() {
            return Err(failure.into_error());
        }
        Ok(state.user.clone())
    }

    async fn sign_out(&self) -> Result<(), GatewayError> {
        self.sign_out_calls.fetch_add(1, Ordering::Relaxed);
        self.state().user = None;
        Ok(())
    }

    async fn list_reports(&self) -> Result<Vec<Report>, GatewayError> {
        self.list_calls.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state();
        if let Some(failure) = state.fail_list.take() {
            return Err(failure.into_error());
        }
        Ok(state.reports.clone())
    }

    async fn insert_report(&self, report: NewReport) -> Result<Report, GatewayError> {
        self.insert_calls.fetch_add(1, Ordering::Relaxed);
        let (stored, echo) = {
            let mut state = self.state();
            if let Some(failure) = state.fail_insert.take() {
                return Err(failure.into_error());
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let stored = Report {
                id: ReportId::new(id.to_string()),
                name: report.name,
                category: report.category,
                photo_url: Some(report.photo_url),
                latitude: report.latitude,
                longitude: report.longitude,
                owner_id: Some(report.owner_id),
            };
            state.reports.push(stored.clone());
            (stored, state.echo_inserts)
        };
        if echo {
            self.push_live(stored.clone()).await;
        }
        Ok(stored)
    }

    async fn upload_object(
        &self,
        bucket: &str,
        key: &str,
        _bytes: Bytes,
        _content_type: Option<&str>,
    ) -> Result<String, GatewayError> {
        self.upload_calls.fetch_add(1, Ordering::Relaxed);
        let gate = self.state().upload_gate.clone();
        if let Some(gate) = gate {
            gate.enter().await;
        }
        let mut state = self.state();
        if let Some(failure) = state.fail_upload.take() {
            return Err(failure.into_error());
        }
        let path = format!("{bucket}/{key}");
        state.uploads.push(path.clone());
        Ok(format!("https://fake.local/{path}"))
    }

    async fn subscribe_inserts(&self, _table: &str) -> Result<InsertSubscription, GatewayError> {
        self.subscribe_calls.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state();
        if let Some(failure) = state.fail_subscribe.take() {
            return Err(failure.into_error());
        }
        let (tx, rx) = mpsc::channel(32);
        state.subscribers.push(tx);
        Ok(InsertSubscription::new(rx, CancellationToken::new(), None))
    }
}
