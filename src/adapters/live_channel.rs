use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures_util::{SinkExt, Stream, StreamExt, stream};
use reqwest::Url;
use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::error::Elapsed;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::domain::live_message::LiveMessage;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Handshake = Pin<Box<dyn Future<Output = Result<Result<WsStream, WsError>, Elapsed>>>>;

#[derive(Debug, Clone)]
pub struct LiveChannelConfig {
    pub ws_base_url: String,
    pub reconnect_delay: Duration,
    pub handshake_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum LiveChannelError {
    #[error("invalid live channel url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
    TornDown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    Connected { attempt: u64 },
    Message(LiveMessage),
    Disconnected { attempt: u64, reason: String },
}

enum Stage {
    Connecting(Handshake),
    Open(WsStream),
    Closed { retry_at: Instant },
    TornDown,
}

enum Step {
    Handshake(Result<WsStream, WsError>),
    HandshakeTimedOut,
    Frame(Option<Result<Message, WsError>>),
    RetryDue,
}

pub struct LiveChannel {
    url: String,
    device_id: String,
    reconnect_delay: Duration,
    handshake_timeout: Duration,
    stage: Stage,
    connected: bool,
    attempts: u64,
    last_message: Option<LiveMessage>,
}

impl LiveChannel {
    pub fn connect(config: &LiveChannelConfig, device_id: &str) -> Result<Self, LiveChannelError> {
        let url = channel_url(&config.ws_base_url, device_id)?;
        tracing::info!(device_id, url = %url, "opening live channel");

        let mut channel = Self {
            url,
            device_id: device_id.to_string(),
            reconnect_delay: config.reconnect_delay,
            handshake_timeout: config.handshake_timeout,
            stage: Stage::TornDown,
            connected: false,
            attempts: 0,
            last_message: None,
        };
        channel.begin_attempt();
        Ok(channel)
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn state(&self) -> ConnectionState {
        match self.stage {
            Stage::Connecting(_) => ConnectionState::Connecting,
            Stage::Open(_) => ConnectionState::Open,
            Stage::Closed { .. } => ConnectionState::Closed,
            Stage::TornDown => ConnectionState::TornDown,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn last_message(&self) -> Option<&LiveMessage> {
        self.last_message.as_ref()
    }

    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    pub fn pending_reconnects(&self) -> usize {
        usize::from(matches!(self.stage, Stage::Closed { .. }))
    }

    /// Waits for the next connectivity change or parsed message. Cancel safe:
    /// a dropped call keeps both the handshake and the reconnect deadline.
    /// Never returns once the channel is torn down.
    pub async fn next_event(&mut self) -> LiveEvent {
        loop {
            let step = match &mut self.stage {
                Stage::Connecting(handshake) => match handshake.as_mut().await {
                    Ok(result) => Step::Handshake(result),
                    Err(_) => Step::HandshakeTimedOut,
                },
                Stage::Open(socket) => Step::Frame(socket.next().await),
                Stage::Closed { retry_at } => {
                    tokio::time::sleep_until(*retry_at).await;
                    Step::RetryDue
                }
                Stage::TornDown => std::future::pending::<Step>().await,
            };

            if let Some(event) = self.advance(step) {
                return event;
            }
        }
    }

    pub async fn send<T: Serialize>(&mut self, message: &T) -> bool {
        let Stage::Open(socket) = &mut self.stage else {
            tracing::debug!(device_id = %self.device_id, "live channel not open, outbound message dropped");
            return false;
        };

        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(error) => {
                tracing::warn!(error = %error, "failed to encode outbound live message");
                return false;
            }
        };

        if let Err(error) = socket.send(Message::Text(text)).await {
            tracing::warn!(device_id = %self.device_id, error = %error, "live channel send failed");
        }
        true
    }

    pub async fn close(&mut self) {
        let stage = std::mem::replace(&mut self.stage, Stage::TornDown);
        self.connected = false;

        if let Stage::Open(mut socket) = stage
            && let Err(error) = socket.close(None).await
        {
            tracing::debug!(device_id = %self.device_id, error = %error, "live channel close handshake failed");
        }

        tracing::info!(device_id = %self.device_id, "live channel torn down");
    }

    pub fn into_events(self) -> impl Stream<Item = LiveEvent> {
        stream::unfold(self, |mut channel| async move {
            let event = channel.next_event().await;
            Some((event, channel))
        })
    }

    fn begin_attempt(&mut self) {
        self.attempts += 1;
        tracing::debug!(
            device_id = %self.device_id,
            attempt = self.attempts,
            "connecting live channel"
        );

        let url = self.url.clone();
        let deadline = self.handshake_timeout;
        self.stage = Stage::Connecting(Box::pin(async move {
            tokio::time::timeout(deadline, connect_async(url))
                .await
                .map(|result| result.map(|(socket, _)| socket))
        }));
    }

    fn advance(&mut self, step: Step) -> Option<LiveEvent> {
        match step {
            Step::Handshake(Ok(socket)) => {
                self.stage = Stage::Open(socket);
                self.connected = true;
                tracing::info!(
                    device_id = %self.device_id,
                    attempt = self.attempts,
                    "live channel connected"
                );
                Some(LiveEvent::Connected {
                    attempt: self.attempts,
                })
            }
            Step::Handshake(Err(error)) => {
                Some(self.schedule_reconnect(format!("handshake failed: {error}")))
            }
            Step::HandshakeTimedOut => {
                Some(self.schedule_reconnect("handshake timed out".to_string()))
            }
            Step::Frame(Some(Ok(message))) => self.handle_frame(message),
            Step::Frame(Some(Err(error))) => {
                Some(self.schedule_reconnect(format!("transport error: {error}")))
            }
            Step::Frame(None) => Some(self.schedule_reconnect("stream ended".to_string())),
            Step::RetryDue => {
                self.begin_attempt();
                None
            }
        }
    }

    fn handle_frame(&mut self, frame: Message) -> Option<LiveEvent> {
        let parsed = match frame {
            Message::Text(text) => LiveMessage::parse(text.as_bytes()),
            Message::Binary(bytes) => LiveMessage::parse(&bytes),
            Message::Close(close_frame) => {
                let reason = close_frame
                    .map(|close_frame| {
                        format!(
                            "closed by peer ({}): {}",
                            u16::from(close_frame.code),
                            close_frame.reason
                        )
                    })
                    .unwrap_or_else(|| "closed by peer".to_string());
                return Some(self.schedule_reconnect(reason));
            }
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => return None,
        };

        match parsed {
            Ok(message) => {
                if message.is_connection_confirmation() {
                    tracing::debug!(device_id = %self.device_id, "connection confirmed by backend");
                    self.connected = true;
                }
                self.last_message = Some(message.clone());
                Some(LiveEvent::Message(message))
            }
            Err(error) => {
                tracing::warn!(
                    device_id = %self.device_id,
                    error = %error,
                    "discarding malformed live frame"
                );
                None
            }
        }
    }

    fn schedule_reconnect(&mut self, reason: String) -> LiveEvent {
        self.connected = false;
        self.stage = Stage::Closed {
            retry_at: Instant::now() + self.reconnect_delay,
        };

        tracing::warn!(
            device_id = %self.device_id,
            attempt = self.attempts,
            reason = %reason,
            retry_in_ms = self.reconnect_delay.as_millis() as u64,
            "live channel disconnected, reconnect scheduled"
        );

        LiveEvent::Disconnected {
            attempt: self.attempts,
            reason,
        }
    }
}

fn channel_url(base: &str, device_id: &str) -> Result<String, LiveChannelError> {
    let invalid = |reason: String| LiveChannelError::InvalidUrl {
        url: base.to_string(),
        reason,
    };

    let mut url = Url::parse(base).map_err(|error| invalid(error.to_string()))?;
    if url.scheme() != "ws" {
        return Err(invalid("scheme must be ws".to_string()));
    }

    url.path_segments_mut()
        .map_err(|_| invalid("url cannot be used as a base".to_string()))?
        .pop_if_empty()
        .extend(["ws", device_id]);

    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use std::pin::pin;
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use tokio::sync::oneshot;
    use tokio_tungstenite::tungstenite::Message;

    use crate::domain::live_message::{LiveMessage, LiveMessageKind};
    use crate::test_support::{accept_ws, unused_ws_url, ws_listener};

    use super::{ConnectionState, LiveChannel, LiveChannelConfig, LiveEvent, channel_url};

    fn config(base: &str, reconnect_delay: Duration) -> LiveChannelConfig {
        LiveChannelConfig {
            ws_base_url: base.to_string(),
            reconnect_delay,
            handshake_timeout: Duration::from_secs(2),
        }
    }

    async fn next(channel: &mut LiveChannel) -> LiveEvent {
        tokio::time::timeout(Duration::from_secs(5), channel.next_event())
            .await
            .expect("live event should arrive")
    }

    fn expect_message(event: LiveEvent) -> LiveMessage {
        match event {
            LiveEvent::Message(message) => message,
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn surfaces_parsed_messages_and_skips_malformed_frames() {
        let (listener, base) = ws_listener().await;
        let (resume_tx, resume_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let (mut socket, path) = accept_ws(&listener).await;
            for frame in [
                r#"{"type":"connection","status":"connected","client_id":"EV001"}"#,
                "{broken",
            ] {
                socket
                    .send(Message::Text(frame.into()))
                    .await
                    .expect("frame should be sent");
            }
            resume_rx.await.expect("client should resume the server");
            socket
                .send(Message::Text(r#"{"type":"status_update","data":{"soc":50}}"#.into()))
                .await
                .expect("frame should be sent");
            while let Some(Ok(_)) = socket.next().await {}
            path
        });

        let mut channel = LiveChannel::connect(&config(&base, Duration::from_millis(50)), "EV001")
            .expect("channel should open");
        assert_eq!(channel.device_id(), "EV001");
        assert_eq!(channel.state(), ConnectionState::Connecting);
        assert!(!channel.is_connected());

        assert_eq!(next(&mut channel).await, LiveEvent::Connected { attempt: 1 });
        assert!(channel.is_connected());

        let confirmation = expect_message(next(&mut channel).await);
        assert!(confirmation.is_connection_confirmation());

        let idle = tokio::time::timeout(Duration::from_millis(150), channel.next_event()).await;
        assert!(idle.is_err());
        assert_eq!(channel.last_message(), Some(&confirmation));
        assert_eq!(channel.state(), ConnectionState::Open);
        assert!(channel.is_connected());
        resume_tx.send(()).expect("server should wait for resume");

        let update = expect_message(next(&mut channel).await);
        assert_eq!(update.kind, LiveMessageKind::StatusUpdate);
        assert_eq!(channel.last_message(), Some(&update));
        assert!(channel.is_connected());
        assert_eq!(channel.state(), ConnectionState::Open);

        channel.close().await;
        assert_eq!(channel.state(), ConnectionState::TornDown);
        assert!(!channel.is_connected());

        let path = server.await.expect("server task should finish");
        assert_eq!(path, "/ws/EV001");
    }

    #[tokio::test]
    async fn reconnects_after_peer_closes() {
        let (listener, base) = ws_listener().await;
        let server = tokio::spawn(async move {
            let (mut first, _) = accept_ws(&listener).await;
            first.close(None).await.expect("close should be sent");
            while let Some(Ok(_)) = first.next().await {}

            let (mut second, _) = accept_ws(&listener).await;
            second
                .send(Message::Text(r#"{"type":"session_start"}"#.into()))
                .await
                .expect("frame should be sent");
            while let Some(Ok(_)) = second.next().await {}
        });

        let mut channel = LiveChannel::connect(&config(&base, Duration::from_millis(50)), "EV001")
            .expect("channel should open");

        assert_eq!(next(&mut channel).await, LiveEvent::Connected { attempt: 1 });
        assert!(matches!(
            next(&mut channel).await,
            LiveEvent::Disconnected { attempt: 1, .. }
        ));
        assert!(!channel.is_connected());
        assert_eq!(channel.state(), ConnectionState::Closed);
        assert_eq!(channel.pending_reconnects(), 1);

        assert_eq!(next(&mut channel).await, LiveEvent::Connected { attempt: 2 });
        let message = expect_message(next(&mut channel).await);
        assert_eq!(message.kind, LiveMessageKind::SessionStart);

        channel.close().await;
        server.await.expect("server task should finish");
    }

    #[tokio::test]
    async fn reconnects_when_upgrade_never_completes() {
        let (listener, base) = ws_listener().await;
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let mut channel = LiveChannel::connect(
            &LiveChannelConfig {
                ws_base_url: base,
                reconnect_delay: Duration::from_millis(50),
                handshake_timeout: Duration::from_millis(100),
            },
            "EV001",
        )
        .expect("channel should open");

        assert_eq!(
            next(&mut channel).await,
            LiveEvent::Disconnected {
                attempt: 1,
                reason: "handshake timed out".to_string(),
            }
        );
        assert_eq!(channel.state(), ConnectionState::Closed);
        assert_eq!(channel.pending_reconnects(), 1);

        assert!(matches!(
            next(&mut channel).await,
            LiveEvent::Disconnected { attempt: 2, .. }
        ));

        channel.close().await;
        server.abort();
    }

    #[tokio::test]
    async fn keeps_single_pending_reconnect_across_cancelled_polls() {
        let base = unused_ws_url();
        let mut channel =
            LiveChannel::connect(&config(&base, Duration::from_millis(400)), "EV001")
                .expect("channel should open");

        assert!(matches!(
            next(&mut channel).await,
            LiveEvent::Disconnected { attempt: 1, .. }
        ));
        assert_eq!(channel.pending_reconnects(), 1);

        for _ in 0..3 {
            let polled =
                tokio::time::timeout(Duration::from_millis(5), channel.next_event()).await;
            assert!(polled.is_err());
            assert_eq!(channel.pending_reconnects(), 1);
            assert_eq!(channel.attempts(), 1);
        }

        channel.close().await;
        assert_eq!(channel.pending_reconnects(), 0);
        assert_eq!(channel.state(), ConnectionState::TornDown);

        let after_teardown =
            tokio::time::timeout(Duration::from_millis(600), channel.next_event()).await;
        assert!(after_teardown.is_err());
        assert_eq!(channel.attempts(), 1);
    }

    #[tokio::test]
    async fn sends_only_while_open() {
        let (listener, base) = ws_listener().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = accept_ws(&listener).await;
            let received = match socket.next().await {
                Some(Ok(Message::Text(text))) => text.to_string(),
                other => panic!("expected text frame, got {other:?}"),
            };
            while let Some(Ok(_)) = socket.next().await {}
            received
        });

        let mut channel = LiveChannel::connect(&config(&base, Duration::from_millis(50)), "EV001")
            .expect("channel should open");
        assert!(!channel.send(&json!({"type": "ping"})).await);

        assert_eq!(next(&mut channel).await, LiveEvent::Connected { attempt: 1 });
        assert!(channel.send(&json!({"type": "ping"})).await);

        channel.close().await;
        assert!(!channel.send(&json!({"type": "ping"})).await);

        let received = server.await.expect("server task should finish");
        assert_eq!(received, r#"{"type":"ping"}"#);
    }

    #[tokio::test]
    async fn exposes_events_as_stream() {
        let (listener, base) = ws_listener().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = accept_ws(&listener).await;
            socket
                .send(Message::Binary(br#"{"type":"meter_value","data":{"soc":70}}"#.to_vec()))
                .await
                .expect("frame should be sent");
            while let Some(Ok(_)) = socket.next().await {}
        });

        let channel = LiveChannel::connect(&config(&base, Duration::from_millis(50)), "EV001")
            .expect("channel should open");
        {
            let mut events = pin!(channel.into_events());

            assert_eq!(
                events.next().await,
                Some(LiveEvent::Connected { attempt: 1 })
            );
            let message = match events.next().await {
                Some(LiveEvent::Message(message)) => message,
                other => panic!("expected message, got {other:?}"),
            };
            assert_eq!(message.kind, LiveMessageKind::MeterValue);
            assert_eq!(message.payload, json!({"soc": 70}));
        }

        server.await.expect("server task should finish");
    }

    #[test]
    fn builds_encoded_channel_url() {
        assert_eq!(
            channel_url("ws://127.0.0.1:9000", "EV 01").expect("url should build"),
            "ws://127.0.0.1:9000/ws/EV%2001"
        );
        assert_eq!(
            channel_url("ws://proxy.local/live/", "EV001").expect("url should build"),
            "ws://proxy.local/live/ws/EV001"
        );
    }

    #[test]
    fn rejects_non_websocket_url() {
        let result = LiveChannel::connect(&config("http://127.0.0.1:9000", Duration::ZERO), "EV001");
        assert!(result.is_err());
    }
}
