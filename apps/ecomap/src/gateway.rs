use crate::error::GatewayError;
use crate::report::{NewReport, Report};
use crate::session::Identity;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

/// Everything the map client needs from the hosted backend.
#[async_trait]
pub trait ReportGateway: Send + Sync {
    async fn current_user(&self) -> Result<Option<Identity>, GatewayError>;

    async fn sign_out(&self) -> Result<(), GatewayError>;

    async fn list_reports(&self) -> Result<Vec<Report>, GatewayError>;

    async fn insert_report(&self, report: NewReport) -> Result<Report, GatewayError>;

    /// Stores `bytes` under `bucket/key` and returns the object's public URL.
    async fn upload_object(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
        content_type: Option<&str>,
    ) -> Result<String, GatewayError>;

    async fn subscribe_inserts(&self, table: &str) -> Result<InsertSubscription, GatewayError>;
}

/// Live feed of inserted reports. Dropping it (or calling `unsubscribe`)
/// stops the feeding task and releases the backend channel.
pub struct InsertSubscription {
    stream: ReceiverStream<Report>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl InsertSubscription {
    pub fn new(
        rx: mpsc::Receiver<Report>,
        cancel: CancellationToken,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            stream: ReceiverStream::new(rx),
            cancel,
            task,
        }
    }

    /// Next inserted record, or `None` once the feed has ended.
    pub async fn next(&mut self) -> Option<Report> {
        self.stream.next().await
    }

    /// Already-delivered record, without waiting.
    pub fn try_next(&mut self) -> Option<Report> {
        self.stream.as_mut().try_recv().ok()
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    pub async fn unsubscribe(mut self) {
        self.cancel.cancel();
        self.stream.close();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                if !err.is_cancelled() {
                    tracing::warn!(error = %err, "live subscription task failed");
                }
            }
        }
    }
}

impl Drop for InsertSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
