//! WebSocket client for the Polymarket CLOB market channel.
//!
//! Features:
//! - Batched subscriptions, growing as the token universe grows
//! - Reconnection with exponential backoff, bounded by consecutive failures
//! - Heartbeat pings
//! - Cooperative shutdown through a `CancellationToken`

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use super::types::{parse_frame, PriceUpdate, SubscribeMessage};
use crate::config::Config;
use crate::error::WsError;
use crate::market::types::TokenId;
use crate::metrics;

/// Reconnection configuration for WebSocket.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial backoff delay in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum backoff delay in seconds.
    pub max_delay_s: u64,
    /// Backoff multiplier (e.g., 2.0 for exponential).
    pub backoff_multiplier: f64,
    /// Heartbeat interval in seconds.
    pub heartbeat_interval_s: u64,
    /// Consecutive failed connects before giving up.
    pub max_attempts: u32,
    /// Connect timeout in seconds.
    pub connect_timeout_s: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_s: 30,
            backoff_multiplier: 2.0,
            heartbeat_interval_s: 20,
            max_attempts: 5,
            connect_timeout_s: 15,
        }
    }
}

impl ReconnectConfig {
    /// Create from config values.
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_delay_s: config.ws_reconnect_max_delay_s,
            heartbeat_interval_s: config.ws_heartbeat_interval_s.max(1),
            max_attempts: config.ws_max_reconnect_attempts.max(1),
            connect_timeout_s: config.ws_connect_timeout_s,
            ..Default::default()
        }
    }

    /// Calculate next delay with exponential backoff.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let max_delay_ms = self.max_delay_s * 1000;
        let clamped_ms = delay_ms.min(max_delay_ms as f64) as u64;
        Duration::from_millis(clamped_ms)
    }
}

/// Why a connected session ended.
#[derive(Debug)]
enum SessionEnd {
    Cancelled,
    /// Nobody is reading updates any more.
    ReceiverGone,
    Disconnected(String),
}

/// Shared view of the feed for other tasks.
#[derive(Debug, Clone)]
pub struct FeedHandle {
    subscribe_tx: mpsc::Sender<Vec<TokenId>>,
    connected: Arc<AtomicBool>,
    messages: Arc<AtomicU64>,
}

impl FeedHandle {
    /// Ask the feed to cover `tokens`. Already-subscribed ids are ignored.
    pub async fn subscribe(&self, tokens: Vec<TokenId>) -> Result<(), WsError> {
        self.subscribe_tx
            .send(tokens)
            .await
            .map_err(|_| WsError::SendFailed("feed task has stopped".to_string()))
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Text frames received since start.
    pub fn messages_received(&self) -> u64 {
        self.messages.load(Ordering::Relaxed)
    }
}

/// Streaming price client for the market channel.
#[derive(Debug)]
pub struct MarketFeed {
    url: String,
    reconnect: ReconnectConfig,
    batch_size: usize,
    /// Every token ever requested; resubscribed on reconnect.
    tokens: BTreeSet<TokenId>,
    connected: Arc<AtomicBool>,
    messages: Arc<AtomicU64>,
}

impl MarketFeed {
    pub fn new(url: impl Into<String>, reconnect: ReconnectConfig, batch_size: usize) -> Self {
        Self {
            url: url.into(),
            reconnect,
            batch_size: batch_size.max(1),
            tokens: BTreeSet::new(),
            connected: Arc::new(AtomicBool::new(false)),
            messages: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.market_ws_url(),
            ReconnectConfig::from_config(config),
            config.ws_subscribe_batch_size,
        )
    }

    /// Tokens subscribed as soon as the first connection opens.
    pub fn with_tokens(mut self, tokens: impl IntoIterator<Item = TokenId>) -> Self {
        self.tokens.extend(tokens);
        self
    }

    /// Start the feed on `tracker`.
    ///
    /// Returns the subscription handle, the update stream, and the task's
    /// join handle. The task ends with `Err(RetriesExhausted)` once the
    /// reconnect budget is spent; it cancels nothing itself.
    pub fn spawn(
        self,
        tracker: &TaskTracker,
        cancel: CancellationToken,
    ) -> (
        FeedHandle,
        mpsc::Receiver<PriceUpdate>,
        tokio::task::JoinHandle<Result<(), WsError>>,
    ) {
        let (subscribe_tx, subscribe_rx) = mpsc::channel(64);
        let (updates_tx, updates_rx) = mpsc::channel(4096);

        let handle = FeedHandle {
            subscribe_tx,
            connected: self.connected.clone(),
            messages: self.messages.clone(),
        };

        let join = tracker.spawn(self.run(updates_tx, subscribe_rx, cancel));
        (handle, updates_rx, join)
    }

    /// Connect, stream, and reconnect until cancelled or out of attempts.
    async fn run(
        mut self,
        updates: mpsc::Sender<PriceUpdate>,
        mut subscriptions: mpsc::Receiver<Vec<TokenId>>,
        cancel: CancellationToken,
    ) -> Result<(), WsError> {
        let mut failures = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            info!(url = %self.url, tokens = self.tokens.len(), "Connecting to market channel");

            match self.connect().await {
                Ok(ws) => {
                    failures = 0;
                    self.connected.store(true, Ordering::SeqCst);
                    let end = self.session(ws, &updates, &mut subscriptions, &cancel).await;
                    self.connected.store(false, Ordering::SeqCst);

                    match end {
                        SessionEnd::Cancelled => {
                            info!("Market feed stopped");
                            return Ok(());
                        }
                        SessionEnd::ReceiverGone => {
                            info!("Update channel closed, stopping market feed");
                            return Ok(());
                        }
                        SessionEnd::Disconnected(reason) => {
                            warn!(reason = %reason, "Market channel disconnected, will reconnect");
                        }
                    }
                }
                Err(e) => {
                    failures += 1;
                    error!(
                        error = %e,
                        failures,
                        max_attempts = self.reconnect.max_attempts,
                        "Market channel connection failed"
                    );
                    if failures >= self.reconnect.max_attempts {
                        return Err(WsError::RetriesExhausted { attempts: failures });
                    }
                }
            }

            metrics::inc_ws_reconnects();
            let delay = self.reconnect.next_delay(failures);
            info!(delay_ms = delay.as_millis() as u64, "Reconnecting after delay");
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn connect(
        &self,
    ) -> Result<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        WsError,
    > {
        let timeout = Duration::from_secs(self.reconnect.connect_timeout_s);
        match tokio::time::timeout(timeout, connect_async(self.url.as_str())).await {
            Ok(Ok((ws, _response))) => Ok(ws),
            Ok(Err(e)) => Err(WsError::ConnectionFailed(e.to_string())),
            Err(_) => Err(WsError::ConnectionFailed(format!(
                "timed out after {}s",
                timeout.as_secs()
            ))),
        }
    }

    /// Drive one connected session.
    #[instrument(skip_all, fields(tokens = self.tokens.len()))]
    async fn session<S>(
        &mut self,
        ws: S,
        updates: &mpsc::Sender<PriceUpdate>,
        subscriptions: &mut mpsc::Receiver<Vec<TokenId>>,
        cancel: &CancellationToken,
    ) -> SessionEnd
    where
        S: Stream<Item = Result<Message, tungstenite::Error>>
            + Sink<Message, Error = tungstenite::Error>
            + Unpin,
    {
        let (mut write, mut read) = ws.split();

        let known: Vec<TokenId> = self.tokens.iter().cloned().collect();
        if let Err(e) = send_batches(&mut write, &known, self.batch_size).await {
            return SessionEnd::Disconnected(e.to_string());
        }

        let heartbeat_every = Duration::from_secs(self.reconnect.heartbeat_interval_s);
        let mut heartbeat = tokio::time::interval_at(
            tokio::time::Instant::now() + heartbeat_every,
            heartbeat_every,
        );
        let mut subscriptions_open = true;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return SessionEnd::Cancelled;
                }
                request = subscriptions.recv(), if subscriptions_open => {
                    let Some(tokens) = request else {
                        subscriptions_open = false;
                        continue;
                    };
                    let fresh: Vec<TokenId> = tokens
                        .into_iter()
                        .filter(|t| self.tokens.insert(t.clone()))
                        .collect();
                    if fresh.is_empty() {
                        continue;
                    }
                    metrics::set_subscribed_tokens(self.tokens.len());
                    if let Err(e) = send_batches(&mut write, &fresh, self.batch_size).await {
                        return SessionEnd::Disconnected(e.to_string());
                    }
                }
                _ = heartbeat.tick() => {
                    if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                        return SessionEnd::Disconnected(format!("ping failed: {e}"));
                    }
                }
                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            let start = Instant::now();
                            self.messages.fetch_add(1, Ordering::Relaxed);
                            metrics::inc_ws_messages_received();

                            match parse_frame(&text) {
                                Ok(events) => {
                                    for update in events.iter().flat_map(|e| e.price_updates()) {
                                        if updates.send(update).await.is_err() {
                                            return SessionEnd::ReceiverGone;
                                        }
                                    }
                                }
                                Err(e) => debug!(error = %e, "Ignoring non-JSON frame"),
                            }
                            metrics::record_ws_message_latency(start);
                        }
                        Some(Ok(Message::Close(frame))) => {
                            return SessionEnd::Disconnected(format!("closed by server: {frame:?}"));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return SessionEnd::Disconnected(e.to_string()),
                        None => return SessionEnd::Disconnected("stream ended".to_string()),
                    }
                }
            }
        }
    }
}

/// Send `tokens` as market subscriptions of at most `batch_size` ids each.
async fn send_batches<W>(write: &mut W, tokens: &[TokenId], batch_size: usize) -> Result<(), WsError>
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    for batch in tokens.chunks(batch_size.max(1)) {
        let body = serde_json::to_string(&SubscribeMessage::market(batch))
            .map_err(|e| WsError::SendFailed(e.to_string()))?;
        write
            .send(Message::Text(body))
            .await
            .map_err(|e| WsError::SendFailed(e.to_string()))?;
        debug!(count = batch.len(), "Sent subscription batch");
    }

    if !tokens.is_empty() {
        info!(tokens = tokens.len(), "Subscribed to market channel");
    }
    Ok(())
}
