//! SOS Stream Session
//!
//! One live `GetResult` stream for a single (offering, observed property)
//! pair, delivered over HTTP polling or a WebSocket.
//!
//! `start` validates the stream synchronously (first poll or WebSocket
//! handshake) so connection problems surface as [`StreamError`]s, then hands
//! delivery to a background task. `stop` cancels that task and waits for it
//! to finish; a stopped session can be started again.

use std::sync::Arc;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use async_trait::async_trait;

use super::client::{SosClientConfig, SosHttp, SosRequestError};
use super::codec::ResultCodec;
use super::reconnect::Backoff;
use crate::application::ports::{
    RecordSink, SessionRequest, StreamError, StreamSession, StreamTransport, TimeWindow,
};
use crate::domain::offering::SensorIdentity;
use crate::domain::record::{RecordSchema, SensorDescription};
use crate::infrastructure::metrics;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct RunningStream {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Streaming session against an SOS endpoint.
pub struct SosStreamSession {
    http: Arc<SosHttp>,
    request: SessionRequest,
    schema: RecordSchema,
    codec: ResultCodec,
    config: SosClientConfig,
    running: tokio::sync::Mutex<Option<RunningStream>>,
}

impl SosStreamSession {
    pub(crate) fn new(
        http: Arc<SosHttp>,
        request: SessionRequest,
        schema: RecordSchema,
        config: SosClientConfig,
    ) -> Self {
        Self {
            http,
            request,
            codec: ResultCodec::new(schema.clone()),
            schema,
            config,
            running: tokio::sync::Mutex::new(None),
        }
    }

    /// Window for a (re)start: from now to the end of the requested window.
    fn window_from_now(&self) -> TimeWindow {
        TimeWindow {
            begin: Utc::now(),
            end: self.request.window.end,
        }
    }

    async fn start_polling(&self, sink: RecordSink, cancel: CancellationToken) -> Result<JoinHandle<()>, StreamError> {
        let window = self.window_from_now();
        let records = poll_once(&self.http, &self.request, &self.codec, &window).await?;
        let since = advance_cursor(window.begin, Utc::now());
        for record in records {
            sink.deliver(record);
        }

        let task = PollTask {
            http: Arc::clone(&self.http),
            request: self.request.clone(),
            codec: self.codec.clone(),
            config: self.config,
            sink,
            cancel,
            since,
        };
        Ok(tokio::spawn(task.run()))
    }

    async fn start_websocket(&self, sink: RecordSink, cancel: CancellationToken) -> Result<JoinHandle<()>, StreamError> {
        let url = websocket_url(&self.request, &self.window_from_now())?;
        let (stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| StreamError::Transport(format!("websocket connect failed: {e}")))?;

        let task = WebSocketTask {
            url,
            codec: self.codec.clone(),
            config: self.config,
            sink,
            cancel,
        };
        Ok(tokio::spawn(task.run(stream)))
    }
}

#[async_trait]
impl StreamSession for SosStreamSession {
    fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    async fn start(&self, sink: RecordSink) -> Result<(), StreamError> {
        let mut running = self.running.lock().await;
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let handle = match self.request.transport {
            StreamTransport::Polling => self.start_polling(sink, cancel.clone()).await?,
            StreamTransport::WebSocket => self.start_websocket(sink, cancel.clone()).await?,
        };
        *running = Some(RunningStream { cancel, handle });
        Ok(())
    }

    async fn stop(&self) -> Result<(), StreamError> {
        let Some(stream) = self.running.lock().await.take() else {
            return Ok(());
        };
        stream.cancel.cancel();
        stream
            .handle
            .await
            .map_err(|e| StreamError::Transport(format!("stream task failed: {e}")))
    }

    async fn sensor_description(
        &self,
        sensor: &SensorIdentity,
    ) -> Result<SensorDescription, StreamError> {
        self.http
            .describe_sensor(&self.request.endpoint, &self.request.version, sensor)
            .await
            .map_err(|e| match e {
                SosRequestError::Status { status: 404, .. } => {
                    StreamError::Unavailable(format!("no description for '{sensor}'"))
                }
                other => other.into(),
            })
    }
}

// =============================================================================
// Polling
// =============================================================================

/// Start of the next poll window: the time the last response arrived, and
/// always at least one millisecond past the previous start.
fn advance_cursor(
    previous: chrono::DateTime<Utc>,
    arrived: chrono::DateTime<Utc>,
) -> chrono::DateTime<Utc> {
    arrived.max(previous + chrono::Duration::milliseconds(1))
}

async fn poll_once(
    http: &SosHttp,
    request: &SessionRequest,
    codec: &ResultCodec,
    window: &TimeWindow,
) -> Result<Vec<crate::domain::record::Record>, StreamError> {
    let url = SosHttp::result_url(request, window)?;
    let body = http.get_text(url).await?;
    codec
        .decode(&body)
        .map_err(|e| StreamError::Transport(format!("undecodable result: {e}")))
}

struct PollTask {
    http: Arc<SosHttp>,
    request: SessionRequest,
    codec: ResultCodec,
    config: SosClientConfig,
    sink: RecordSink,
    cancel: CancellationToken,
    since: chrono::DateTime<Utc>,
}

impl PollTask {
    async fn run(mut self) {
        let mut backoff = Backoff::new(self.config.backoff);
        let mut delay = self.config.poll_interval;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!(output = self.sink.output_name(), "Polling cancelled");
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }

            let window = TimeWindow {
                begin: self.since,
                end: self.request.window.end,
            };
            match poll_once(&self.http, &self.request, &self.codec, &window).await {
                Ok(records) => {
                    self.since = advance_cursor(self.since, Utc::now());
                    for record in records {
                        self.sink.deliver(record);
                    }
                    backoff.reset();
                    delay = self.config.poll_interval;
                }
                Err(e) => {
                    metrics::record_poll_error(self.sink.output_name());
                    delay = backoff.next_delay().max(self.config.poll_interval);
                    tracing::warn!(
                        output = self.sink.output_name(),
                        error = %e,
                        attempt = backoff.attempts(),
                        delay_ms = delay.as_millis(),
                        "Poll failed, backing off"
                    );
                }
            }
        }
    }
}

// =============================================================================
// WebSocket
// =============================================================================

/// `GetResult` URL with the scheme switched to `ws`/`wss`.
fn websocket_url(request: &SessionRequest, window: &TimeWindow) -> Result<Url, StreamError> {
    let mut url = SosHttp::result_url(request, window)?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    url.set_scheme(scheme)
        .map_err(|()| StreamError::Transport(format!("cannot use '{scheme}' for {url}")))?;
    Ok(url)
}

#[derive(Debug, thiserror::Error)]
enum WsError {
    #[error("websocket error: {0}")]
    Protocol(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("connection closed by server")]
    Closed,
}

struct WebSocketTask {
    url: Url,
    codec: ResultCodec,
    config: SosClientConfig,
    sink: RecordSink,
    cancel: CancellationToken,
}

impl WebSocketTask {
    async fn run(self, first: WsStream) {
        let mut backoff = Backoff::new(self.config.backoff);
        let mut connected = Some(first);

        loop {
            let stream = match connected.take() {
                Some(stream) => stream,
                None => match tokio_tungstenite::connect_async(self.url.as_str()).await {
                    Ok((stream, _response)) => {
                        tracing::info!(output = self.sink.output_name(), "Websocket reconnected");
                        stream
                    }
                    Err(e) => {
                        metrics::record_poll_error(self.sink.output_name());
                        tracing::warn!(output = self.sink.output_name(), error = %e, "Websocket reconnect failed");
                        if !self.pause(backoff.next_delay()).await {
                            return;
                        }
                        continue;
                    }
                },
            };

            backoff.reset();
            match self.pump(stream).await {
                Ok(()) => return,
                Err(e) => {
                    metrics::record_poll_error(self.sink.output_name());
                    tracing::warn!(output = self.sink.output_name(), error = %e, "Websocket stream dropped");
                    if !self.pause(backoff.next_delay()).await {
                        return;
                    }
                }
            }
        }
    }

    /// Sleep unless cancelled first. Returns `false` when cancelled.
    async fn pause(&self, delay: std::time::Duration) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }

    /// Deliver frames until cancelled (`Ok`) or the connection fails.
    async fn pump(&self, stream: WsStream) -> Result<(), WsError> {
        let (mut write, mut read) = stream.split();

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    // Best effort: the server may already be gone.
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.deliver(&text),
                    Some(Ok(Message::Binary(bytes))) => self.deliver_binary(&bytes),
                    Some(Ok(Message::Close(_))) | None => return Err(WsError::Closed),
                    // tungstenite queues the pong for pings itself.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                },
            }
        }
    }

    fn deliver_binary(&self, bytes: &[u8]) {
        match std::str::from_utf8(bytes) {
            Ok(text) => self.deliver(text),
            Err(e) => {
                metrics::record_undecodable(self.sink.output_name());
                tracing::debug!(output = self.sink.output_name(), error = %e, "Dropping non UTF-8 binary frame");
            }
        }
    }

    fn deliver(&self, text: &str) {
        match self.codec.decode(text) {
            Ok(records) => {
                for record in records {
                    self.sink.deliver(record);
                }
            }
            Err(e) => {
                metrics::record_undecodable(self.sink.output_name());
                tracing::debug!(output = self.sink.output_name(), error = %e, "Dropping undecodable frame");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::domain::offering::Match;
    use crate::domain::record::{FieldDef, FieldKind, FieldValue};
    use crate::infrastructure::broadcast::{OutputPort, SharedOutput};

    fn websocket_task(url: &str) -> (WebSocketTask, SharedOutput) {
        let schema = RecordSchema::new(None, vec![FieldDef::new("temp", FieldKind::Double)]);
        let output = Arc::new(OutputPort::new("output1", schema.clone(), 8));
        let task = WebSocketTask {
            url: Url::parse(url).unwrap(),
            codec: ResultCodec::new(schema),
            config: SosClientConfig::default(),
            sink: RecordSink::new(Arc::clone(&output)),
            cancel: CancellationToken::new(),
        };
        (task, output)
    }

    fn request(endpoint: &str) -> SessionRequest {
        SessionRequest {
            endpoint: endpoint.to_string(),
            version: "2.0".to_string(),
            matched: Match::new("O1", "temp"),
            window: TimeWindow::live(),
            transport: StreamTransport::WebSocket,
        }
    }

    #[test]
    fn cursor_moves_to_response_arrival() {
        let previous = Utc::now();
        let arrived = previous + chrono::Duration::milliseconds(250);

        assert_eq!(advance_cursor(previous, arrived), arrived);
    }

    #[test]
    fn cursor_always_moves_forward() {
        let previous = Utc::now();
        let stale = previous - chrono::Duration::seconds(5);

        let next = advance_cursor(previous, stale);

        assert!(next > previous);
        assert_eq!(next - previous, chrono::Duration::milliseconds(1));
    }

    #[test]
    fn websocket_url_follows_http_scheme() {
        let window = TimeWindow::live();

        let plain = websocket_url(&request("http://sos.test/sos"), &window).unwrap();
        let secure = websocket_url(&request("https://sos.test/sos"), &window).unwrap();

        assert_eq!(plain.scheme(), "ws");
        assert_eq!(secure.scheme(), "wss");
        assert!(plain.query().unwrap().contains("request=GetResult"));
        assert!(plain.query().unwrap().contains("temporalFilter=phenomenonTime"));
    }

    #[test]
    fn binary_frames_are_decoded_as_text() {
        let (task, output) = websocket_task("ws://sos.test/sos");

        task.deliver_binary(br#"{"temp": 19.0}"#);

        let latest = output.latest().unwrap();
        assert_eq!(latest.record.get("temp"), Some(&FieldValue::Double(19.0)));
    }

    #[test]
    fn non_utf8_binary_frames_are_dropped() {
        let (task, output) = websocket_task("ws://sos.test/sos");

        task.deliver_binary(&[0xff, 0xfe, 0x00]);

        assert_eq!(output.published_count(), 0);
        assert!(output.latest().is_none());
    }

    #[tokio::test]
    async fn ping_is_answered_exactly_once() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            ws.send(Message::Ping(vec![7].into())).await.unwrap();
            ws.send(Message::Text(r#"{"temp": 21.5}"#.into())).await.unwrap();

            let mut received = Vec::new();
            while let Some(Ok(message)) = ws.next().await {
                let closing = message.is_close();
                received.push(message);
                if closing {
                    break;
                }
            }
            received
        });

        let url = format!("ws://{addr}/sos");
        let (stream, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        let (task, output) = websocket_task(&url);
        let cancel = task.cancel.clone();
        let pump = tokio::spawn(async move { task.pump(stream).await });

        tokio::time::timeout(Duration::from_secs(2), async {
            while output.latest().is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        cancel.cancel();
        pump.await.unwrap().unwrap();

        let received = server.await.unwrap();
        let pongs = received.iter().filter(|m| m.is_pong()).count();
        assert_eq!(pongs, 1);
        assert!(received.last().unwrap().is_close());
    }
}
