use super::auth::AuthClient;
use crate::error::GatewayError;
use crate::gateway::InsertSubscription;
use crate::report::Report;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

const LIVE_QUEUE: usize = 64;
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub(super) struct RealtimeSettings {
    pub(super) websocket_url: Url,
    pub(super) heartbeat: Duration,
    pub(super) reconnect_delay: Duration,
}

pub(super) fn websocket_url(base_url: &str, anon_key: &str) -> Result<Url, GatewayError> {
    let mut url = Url::parse(base_url.trim())
        .map_err(|err| GatewayError::Realtime(format!("invalid backend url: {err}")))?;
    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => {
            return Err(GatewayError::Realtime(format!(
                "unsupported backend url scheme `{other}`"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| GatewayError::Realtime("cannot derive websocket url".to_string()))?;
    url.set_path("/realtime/v1/websocket");
    url.query_pairs_mut()
        .clear()
        .append_pair("apikey", anon_key)
        .append_pair("vsn", "1.0.0");
    Ok(url)
}

pub(super) fn spawn_insert_listener(
    settings: RealtimeSettings,
    table: String,
    auth: Arc<AuthClient>,
) -> InsertSubscription {
    let (tx, rx) = mpsc::channel(LIVE_QUEUE);
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();
    let task = tokio::spawn(async move {
        run_listener(settings, table, auth, tx, task_cancel).await;
    });
    InsertSubscription::new(rx, cancel, Some(task))
}

#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Cancelled,
    ReceiverGone,
    Closed,
}

/// Reconnect delay that doubles after each failed attempt and resets once a
/// join succeeds.
#[derive(Debug)]
struct Backoff {
    base: Duration,
    current: Duration,
}

impl Backoff {
    fn new(base: Duration) -> Self {
        Self {
            base,
            current: base,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(MAX_RECONNECT_DELAY.max(self.base));
        delay
    }

    fn reset(&mut self) {
        self.current = self.base;
    }
}

async fn run_listener(
    settings: RealtimeSettings,
    table: String,
    auth: Arc<AuthClient>,
    tx: mpsc::Sender<Report>,
    cancel: CancellationToken,
) {
    let topic = format!("realtime:public:{table}");
    let mut backoff = Backoff::new(settings.reconnect_delay);
    loop {
        let channel = Channel {
            topic: &topic,
            table: &table,
            auth: &auth,
        };
        match run_session(&settings, channel, &tx, &cancel, &mut backoff).await {
            Ok(SessionEnd::Cancelled) | Ok(SessionEnd::ReceiverGone) => break,
            Ok(SessionEnd::Closed) => {
                tracing::warn!(topic = %topic, "realtime connection closed; reconnecting");
            }
            Err(err) => {
                tracing::warn!(error = %err, topic = %topic, "realtime connection dropped; reconnecting");
            }
        }
        let delay = backoff.next_delay();
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(delay) => {}
        }
    }
    tracing::debug!(topic = %topic, "live subscription released");
}

struct Channel<'a> {
    topic: &'a str,
    table: &'a str,
    auth: &'a AuthClient,
}

async fn run_session(
    settings: &RealtimeSettings,
    channel: Channel<'_>,
    tx: &mpsc::Sender<Report>,
    cancel: &CancellationToken,
    backoff: &mut Backoff,
) -> Result<SessionEnd, GatewayError> {
    let topic = channel.topic;
    // read per connection: a token captured at subscribe time expires
    let mut access_token = channel.auth.realtime_token().await?;
    let connect = tokio::select! {
        _ = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
        result = connect_async(settings.websocket_url.as_str()) => result,
    };
    let (socket, _) = connect.map_err(realtime_error)?;
    let (mut sink, mut stream) = socket.split();

    let mut refs = RefCounter::default();
    let join_ref = refs.next();
    sink.send(Message::text(join_frame(
        topic,
        channel.table,
        &access_token,
        &join_ref,
    )))
    .await
    .map_err(realtime_error)?;

    let mut heartbeat = tokio::time::interval(settings.heartbeat);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::text(leave_frame(topic, &refs.next(), &join_ref))).await;
                let _ = sink.close().await;
                return Ok(SessionEnd::Cancelled);
            }
            _ = heartbeat.tick() => {
                sink.send(Message::text(heartbeat_frame(&refs.next())))
                    .await
                    .map_err(realtime_error)?;
                match channel.auth.realtime_token().await {
                    Ok(token) if token != access_token => {
                        sink.send(Message::text(access_token_frame(topic, &token, &refs.next(), &join_ref)))
                            .await
                            .map_err(realtime_error)?;
                        tracing::debug!(topic = %topic, "pushed refreshed token to realtime channel");
                        access_token = token;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to refresh realtime token");
                    }
                }
            }
            message = stream.next() => {
                let mut payload = match message {
                    Some(Ok(Message::Text(text))) => text.as_bytes().to_vec(),
                    Some(Ok(Message::Binary(data))) => data.to_vec(),
                    Some(Ok(Message::Close(_))) | None => return Ok(SessionEnd::Closed),
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => return Err(realtime_error(err)),
                };
                match decode_frame(&mut payload, &join_ref) {
                    Ok(ChannelFrame::Insert(report)) => {
                        tracing::debug!(report_id = %report.id, "live insert received");
                        if tx.send(report).await.is_err() {
                            return Ok(SessionEnd::ReceiverGone);
                        }
                    }
                    Ok(ChannelFrame::Joined) => {
                        backoff.reset();
                        tracing::info!(topic = %topic, "subscribed to live report inserts");
                    }
                    Ok(ChannelFrame::Rejected(reason)) => {
                        return Err(GatewayError::Realtime(format!("join rejected: {reason}")));
                    }
                    Ok(ChannelFrame::ChannelClosed) => return Ok(SessionEnd::Closed),
                    Ok(ChannelFrame::Ignored) => {}
                    Err(err) => {
                        tracing::debug!(error = %err, "failed to decode realtime frame");
                    }
                }
            }
        }
    }
}

fn realtime_error(err: impl std::fmt::Display) -> GatewayError {
    GatewayError::Realtime(err.to_string())
}

#[derive(Default)]
struct RefCounter(u64);

impl RefCounter {
    fn next(&mut self) -> String {
        self.0 += 1;
        self.0.to_string()
    }
}

fn join_frame(topic: &str, table: &str, access_token: &str, join_ref: &str) -> String {
    json!({
        "topic": topic,
        "event": "phx_join",
        "payload": {
            "config": {
                "broadcast": { "ack": false, "self": false },
                "presence": { "key": "" },
                "postgres_changes": [
                    { "event": "INSERT", "schema": "public", "table": table }
                ],
                "private": false
            },
            "access_token": access_token
        },
        "ref": join_ref,
        "join_ref": join_ref
    })
    .to_string()
}

fn leave_frame(topic: &str, reference: &str, join_ref: &str) -> String {
    json!({
        "topic": topic,
        "event": "phx_leave",
        "payload": {},
        "ref": reference,
        "join_ref": join_ref
    })
    .to_string()
}

fn access_token_frame(topic: &str, access_token: &str, reference: &str, join_ref: &str) -> String {
    json!({
        "topic": topic,
        "event": "access_token",
        "payload": { "access_token": access_token },
        "ref": reference,
        "join_ref": join_ref
    })
    .to_string()
}

fn heartbeat_frame(reference: &str) -> String {
    json!({
        "topic": "phoenix",
        "event": "heartbeat",
        "payload": {},
        "ref": reference
    })
    .to_string()
}

#[derive(Debug)]
enum ChannelFrame {
    Insert(Report),
    Joined,
    Rejected(String),
    ChannelClosed,
    Ignored,
}

#[derive(Debug, Deserialize)]
struct WireFrame {
    #[serde(default)]
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
    #[serde(default, rename = "ref")]
    reference: Option<String>,
}

fn decode_frame(payload: &mut [u8], join_ref: &str) -> Result<ChannelFrame, GatewayError> {
    let frame: WireFrame = simd_json::serde::from_slice(payload)
        .map_err(|err| GatewayError::Decode(err.to_string()))?;
    tracing::trace!(topic = %frame.topic, event = %frame.event, "realtime frame");

    match frame.event.as_str() {
        "phx_reply" if frame.reference.as_deref() == Some(join_ref) => {
            let status = frame.payload.get("status").and_then(Value::as_str);
            if status == Some("ok") {
                Ok(ChannelFrame::Joined)
            } else {
                let reason = frame
                    .payload
                    .pointer("/response/reason")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown reason")
                    .to_string();
                Ok(ChannelFrame::Rejected(reason))
            }
        }
        "postgres_changes" => {
            let data = frame.payload.get("data").unwrap_or(&Value::Null);
            if data.get("type").and_then(Value::as_str) != Some("INSERT") {
                return Ok(ChannelFrame::Ignored);
            }
            decode_record(data)
        }
        "INSERT" => decode_record(&frame.payload),
        "phx_error" | "phx_close" => Ok(ChannelFrame::ChannelClosed),
        _ => Ok(ChannelFrame::Ignored),
    }
}

fn decode_record(data: &Value) -> Result<ChannelFrame, GatewayError> {
    let record = data
        .get("record")
        .cloned()
        .ok_or_else(|| GatewayError::Decode("insert event without record".to_string()))?;
    Ok(ChannelFrame::Insert(serde_json::from_value(record)?))
}
