//! The telemetry client: one live channel to the backend, a decode/dispatch
//! core, and a fixed-delay reconnect policy.
//!
//! [`TelemetryClient`] is a handle to a single driver task that owns the
//! connection, the cached state, and the observer registry. All state
//! mutation, observer callbacks, and timer arming/cancellation happen on
//! that one task.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::observer::{Registry, SubscriptionId, TelemetryObserver};
use crate::protocol::{
    decode_binary, decode_frame, DecodeError, DeviceUpdate, FileList, InboundEvent, LogLine,
    OutboundCommand, ProjectUpdate,
};
use crate::state::{ConnectionState, StateCache, TelemetrySnapshot};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Delay before a dropped channel is redialed. Retries indefinitely with no
/// backoff growth; the backend is expected to run on the same machine.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub reconnect_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: RECONNECT_DELAY,
        }
    }
}

/// Errors surfaced synchronously by [`TelemetryClient::connect`]. Everything
/// else in the client degrades to a state transition or a logged drop.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid endpoint `{endpoint}`: {source}")]
    InvalidEndpoint {
        endpoint: String,
        source: url::ParseError,
    },
    #[error("unsupported scheme `{scheme}` in `{endpoint}` (expected ws or wss)")]
    UnsupportedScheme { endpoint: String, scheme: String },
}

enum Request {
    Connect(Url),
    Disconnect,
    Send(OutboundCommand),
    Subscribe(SubscriptionId, Box<dyn TelemetryObserver>),
    Unsubscribe(SubscriptionId),
    QueryState(oneshot::Sender<ConnectionState>),
    QuerySnapshot(oneshot::Sender<Option<TelemetrySnapshot>>),
    QueryLogs(oneshot::Sender<Vec<LogLine>>),
    QueryDevices(oneshot::Sender<Vec<DeviceUpdate>>),
    QueryProjects(oneshot::Sender<Vec<ProjectUpdate>>),
    QueryFiles(oneshot::Sender<Option<FileList>>),
}

/// Handle to a spawned client driver.
///
/// Construct one at application start, inject it into whatever layer needs
/// telemetry, and tear it down with [`TelemetryClient::shutdown`]. The
/// embedding layer talks to the channel only through this handle.
pub struct TelemetryClient {
    requests: mpsc::UnboundedSender<Request>,
    driver: JoinHandle<()>,
    next_subscription: AtomicU64,
}

impl TelemetryClient {
    /// Spawn the driver task that owns all connection state.
    pub fn spawn(config: ClientConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let driver = tokio::spawn(Driver::new(config, rx).run());
        Self {
            requests: tx,
            driver,
            next_subscription: AtomicU64::new(1),
        }
    }

    /// Begin establishing a channel to `endpoint`. No-op if a channel is
    /// already connecting or connected; a pending reconnect timer is
    /// cancelled in favor of this attempt. Invalid endpoints fail fast here
    /// and never enter the reconnect loop.
    pub fn connect(&self, endpoint: &str) -> Result<(), ClientError> {
        let url = Url::parse(endpoint).map_err(|source| ClientError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            source,
        })?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(ClientError::UnsupportedScheme {
                    endpoint: endpoint.to_string(),
                    scheme: other.to_string(),
                })
            }
        }
        self.request(Request::Connect(url));
        Ok(())
    }

    /// Cancel any pending reconnect, close the channel if open, go
    /// `disconnected`. Idempotent.
    pub fn disconnect(&self) {
        self.request(Request::Disconnect);
    }

    /// Fire-and-forget transmit; dropped with a logged warning unless
    /// connected. The next inbound event re-syncs state either way.
    pub fn send(&self, command: OutboundCommand) {
        self.request(Request::Send(command));
    }

    /// Register an observer. It sees every transition and event from the
    /// point the registration is processed by the driver.
    pub fn subscribe(&self, observer: Box<dyn TelemetryObserver>) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.request(Request::Subscribe(id, observer));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.request(Request::Unsubscribe(id));
    }

    /// Current lifecycle state; `Disconnected` once the driver is gone.
    pub async fn connection_state(&self) -> ConnectionState {
        self.query(Request::QueryState)
            .await
            .unwrap_or(ConnectionState::Disconnected)
    }

    /// Latest decoded telemetry snapshot, if any frame has arrived yet.
    pub async fn snapshot(&self) -> Option<TelemetrySnapshot> {
        self.query(Request::QuerySnapshot).await.flatten()
    }

    /// Contents of the bounded log ring, oldest first.
    pub async fn recent_logs(&self) -> Vec<LogLine> {
        self.query(Request::QueryLogs).await.unwrap_or_default()
    }

    pub async fn devices(&self) -> Vec<DeviceUpdate> {
        self.query(Request::QueryDevices).await.unwrap_or_default()
    }

    pub async fn projects(&self) -> Vec<ProjectUpdate> {
        self.query(Request::QueryProjects).await.unwrap_or_default()
    }

    pub async fn file_listing(&self) -> Option<FileList> {
        self.query(Request::QueryFiles).await.flatten()
    }

    /// Tear the driver down. No observer is notified after this returns.
    pub async fn shutdown(self) {
        drop(self.requests);
        let _ = self.driver.await;
    }

    fn request(&self, request: Request) {
        if self.requests.send(request).is_err() {
            warn!("client driver is gone; request dropped");
        }
    }

    async fn query<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Request) -> Option<T> {
        let (tx, rx) = oneshot::channel();
        if self.requests.send(make(tx)).is_err() {
            return None;
        }
        rx.await.ok()
    }
}

struct Link {
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
}

struct ReconnectTimer {
    generation: u64,
    sleep: Pin<Box<Sleep>>,
}

/// Owns the channel, the decode core, and the reconnect timer. Runs as one
/// task; request handling, frame processing, and timer expiry are serialized
/// through a single `select` loop.
struct Driver {
    config: ClientConfig,
    requests: mpsc::UnboundedReceiver<Request>,
    core: Core,
    link: Option<Link>,
    /// Dial target; cleared by an explicit disconnect so channel failure
    /// afterwards cannot resurrect the connection.
    endpoint: Option<Url>,
    /// Bumped on every connect/disconnect; a reconnect timer only fires if
    /// its tagged generation still matches.
    generation: u64,
    reconnect: Option<ReconnectTimer>,
}

impl Driver {
    fn new(config: ClientConfig, requests: mpsc::UnboundedReceiver<Request>) -> Self {
        Self {
            config,
            requests,
            core: Core::new(),
            link: None,
            endpoint: None,
            generation: 0,
            reconnect: None,
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(request) => self.handle_request(request).await,
                    // Handle dropped: tear down without further notification.
                    None => break,
                },
                frame = next_frame(&mut self.link), if self.link.is_some() => {
                    self.handle_frame(frame);
                }
                () = pending_reconnect(&mut self.reconnect), if self.reconnect.is_some() => {
                    self.handle_reconnect_due().await;
                }
            }
        }
        self.close_link().await;
    }

    async fn handle_request(&mut self, request: Request) {
        match request {
            Request::Connect(url) => self.handle_connect(url).await,
            Request::Disconnect => self.handle_disconnect().await,
            Request::Send(command) => self.handle_send(command).await,
            Request::Subscribe(id, observer) => self.core.observers.insert(id, observer),
            Request::Unsubscribe(id) => {
                if !self.core.observers.remove(id) {
                    debug!("unsubscribe for unknown {id:?}");
                }
            }
            Request::QueryState(reply) => {
                let _ = reply.send(self.core.state);
            }
            Request::QuerySnapshot(reply) => {
                let _ = reply.send(self.core.cache.snapshot().cloned());
            }
            Request::QueryLogs(reply) => {
                let _ = reply.send(self.core.cache.logs().cloned().collect());
            }
            Request::QueryDevices(reply) => {
                let _ = reply.send(self.core.cache.devices().cloned().collect());
            }
            Request::QueryProjects(reply) => {
                let _ = reply.send(self.core.cache.projects().cloned().collect());
            }
            Request::QueryFiles(reply) => {
                let _ = reply.send(self.core.cache.file_listing().cloned());
            }
        }
    }

    async fn handle_connect(&mut self, url: Url) {
        if self.core.state != ConnectionState::Disconnected {
            debug!("connect ignored: channel already {}", self.core.state);
            return;
        }
        self.generation += 1;
        self.reconnect = None;
        self.endpoint = Some(url);
        self.dial().await;
    }

    async fn handle_disconnect(&mut self) {
        self.generation += 1;
        self.reconnect = None;
        self.endpoint = None;
        self.close_link().await;
        self.core.set_state(ConnectionState::Disconnected);
    }

    async fn handle_send(&mut self, command: OutboundCommand) {
        if self.core.state != ConnectionState::Connected {
            warn!(
                "dropping `{}` command: channel is {}",
                command.event, self.core.state
            );
            return;
        }
        let Some(link) = self.link.as_mut() else {
            warn!("dropping `{}` command: channel is gone", command.event);
            return;
        };
        if let Err(e) = link.sink.send(Message::Text(command.to_frame())).await {
            warn!("failed to transmit `{}` command: {e}", command.event);
        }
    }

    /// One dial attempt against the stored endpoint. Failure goes back to
    /// `disconnected` and arms the reconnect timer.
    async fn dial(&mut self) {
        let Some(url) = self.endpoint.clone() else {
            return;
        };
        self.core.set_state(ConnectionState::Connecting);
        match connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                let (sink, stream) = ws.split();
                self.link = Some(Link { sink, stream });
                info!("connected to {url}");
                self.core.set_state(ConnectionState::Connected);
            }
            Err(e) => {
                warn!("connect to {url} failed: {e}");
                self.core.set_state(ConnectionState::Disconnected);
                self.arm_reconnect();
            }
        }
    }

    fn handle_frame(
        &mut self,
        frame: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
    ) {
        match frame {
            Some(Ok(Message::Text(text))) => self.core.handle_text(&text),
            Some(Ok(Message::Binary(bytes))) => self.core.handle_binary(&bytes),
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
            Some(Ok(Message::Close(_))) | None => {
                info!("channel closed by peer");
                self.link_down();
            }
            Some(Err(e)) => {
                warn!("channel read failed: {e}");
                self.link_down();
            }
        }
    }

    /// Channel failure: drop the link, surface the transition, arm exactly
    /// one reconnect attempt.
    fn link_down(&mut self) {
        self.link = None;
        self.core.set_state(ConnectionState::Disconnected);
        if self.endpoint.is_some() {
            self.arm_reconnect();
        }
    }

    fn arm_reconnect(&mut self) {
        debug!("reconnect in {:?}", self.config.reconnect_delay);
        self.reconnect = Some(ReconnectTimer {
            generation: self.generation,
            sleep: Box::pin(tokio::time::sleep(self.config.reconnect_delay)),
        });
    }

    async fn handle_reconnect_due(&mut self) {
        let Some(timer) = self.reconnect.take() else {
            return;
        };
        if timer.generation != self.generation {
            debug!("stale reconnect timer discarded");
            return;
        }
        self.dial().await;
    }

    async fn close_link(&mut self) {
        if let Some(mut link) = self.link.take() {
            let _ = link.sink.send(Message::Close(None)).await;
        }
    }
}

async fn next_frame(
    link: &mut Option<Link>,
) -> Option<Result<Message, tokio_tungstenite::tungstenite::Error>> {
    match link {
        Some(link) => link.stream.next().await,
        None => std::future::pending().await,
    }
}

async fn pending_reconnect(timer: &mut Option<ReconnectTimer>) {
    match timer {
        Some(timer) => timer.sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

/// Decode/dispatch core. Recognized frames update the cache and fan out to
/// observers; everything else is logged and dropped.
struct Core {
    state: ConnectionState,
    cache: StateCache,
    observers: Registry,
}

impl Core {
    fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            cache: StateCache::new(),
            observers: Registry::default(),
        }
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        self.state = next;
        self.observers.notify_state(next);
    }

    fn handle_text(&mut self, text: &str) {
        self.dispatch(decode_frame(text));
    }

    fn handle_binary(&mut self, bytes: &[u8]) {
        self.dispatch(decode_binary(bytes));
    }

    fn dispatch(&mut self, decoded: Result<InboundEvent, DecodeError>) {
        match decoded {
            Ok(event) => {
                self.cache.apply(&event);
                self.observers.notify_event(&event);
            }
            Err(e) => debug!("dropping frame: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Debug, PartialEq)]
    enum Note {
        State(ConnectionState),
        Event(InboundEvent),
    }

    #[derive(Clone, Default)]
    struct Recorder {
        notes: Arc<Mutex<Vec<Note>>>,
    }

    impl Recorder {
        fn notes(&self) -> Vec<Note> {
            self.notes.lock().unwrap().clone()
        }

        fn event_count(&self) -> usize {
            self.notes()
                .iter()
                .filter(|n| matches!(n, Note::Event(_)))
                .count()
        }
    }

    impl TelemetryObserver for Recorder {
        fn on_connection_state(&mut self, state: ConnectionState) {
            self.notes.lock().unwrap().push(Note::State(state));
        }

        fn on_event(&mut self, event: &InboundEvent) {
            self.notes.lock().unwrap().push(Note::Event(event.clone()));
        }
    }

    fn core_with_recorder() -> (Core, Recorder) {
        let mut core = Core::new();
        let recorder = Recorder::default();
        core.observers
            .insert(SubscriptionId(1), Box::new(recorder.clone()));
        (core, recorder)
    }

    #[test]
    fn stats_frame_updates_snapshot_and_notifies_once() {
        let (mut core, recorder) = core_with_recorder();
        core.handle_text(r#"{"event":"system_stats","data":{"cpu":42.5,"ram":63.0,"network":"online"}}"#);

        let snap = core.cache.snapshot().unwrap();
        assert_eq!(snap.cpu, 42.5);
        assert_eq!(snap.ram, 63.0);
        assert_eq!(snap.network, "online");

        // Exactly one notification, carrying the decoded values.
        let notes = recorder.notes();
        assert_eq!(notes.len(), 1);
        match &notes[0] {
            Note::Event(InboundEvent::SystemStats(s)) => {
                assert_eq!(s.cpu, 42.5);
                assert_eq!(s.ram, 63.0);
            }
            other => panic!("wrong notification: {other:?}"),
        }
    }

    #[test]
    fn unknown_or_malformed_frames_are_silent_no_ops() {
        let (mut core, recorder) = core_with_recorder();
        core.handle_text(r#"{"event":"warp_drive","data":{}}"#);
        core.handle_text(r#"{"data":{"cpu":1.0}}"#);
        core.handle_text("not json");
        core.handle_text(r#"{"event":"system_stats","data":{"cpu":42.5}}"#);
        core.handle_binary(&[0xff, 0xfe]);

        assert!(core.cache.snapshot().is_none());
        assert!(recorder.notes().is_empty());
    }

    #[test]
    fn binary_utf8_frames_decode() {
        let (mut core, recorder) = core_with_recorder();
        core.handle_binary(br#"{"event":"log_line","message":"from bytes"}"#);
        let notes = recorder.notes();
        assert_eq!(notes.len(), 1);
        assert!(matches!(
            &notes[0],
            Note::Event(InboundEvent::LogLine(l)) if l.message == "from bytes"
        ));
        assert_eq!(core.cache.logs().count(), 1);
    }

    #[test]
    fn log_ring_caps_at_capacity() {
        let (mut core, recorder) = core_with_recorder();
        for i in 0..=crate::state::LOG_CAPACITY {
            core.handle_text(&format!(r#"{{"event":"log_line","message":"line {i}"}}"#));
        }
        assert_eq!(core.cache.logs().count(), crate::state::LOG_CAPACITY);
        assert_eq!(core.cache.logs().next().unwrap().message, "line 1");
        assert_eq!(recorder.event_count(), crate::state::LOG_CAPACITY + 1);
    }

    #[test]
    fn repeated_state_set_notifies_once() {
        let (mut core, recorder) = core_with_recorder();
        core.set_state(ConnectionState::Connecting);
        core.set_state(ConnectionState::Connected);
        core.set_state(ConnectionState::Connected);
        assert_eq!(
            recorder.notes(),
            vec![
                Note::State(ConnectionState::Connecting),
                Note::State(ConnectionState::Connected),
            ]
        );
    }

    #[test]
    fn every_subscriber_sees_events_until_removed() {
        let (mut core, first) = core_with_recorder();
        let second = Recorder::default();
        core.observers
            .insert(SubscriptionId(2), Box::new(second.clone()));

        core.handle_text(r#"{"event":"log_line","message":"one"}"#);
        core.observers.remove(SubscriptionId(1));
        core.handle_text(r#"{"event":"log_line","message":"two"}"#);

        assert_eq!(first.event_count(), 1);
        assert_eq!(second.event_count(), 2);
    }

    #[tokio::test]
    async fn failed_dial_arms_reconnect_timer() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let mut driver = Driver::new(
            ClientConfig {
                reconnect_delay: Duration::from_millis(50),
            },
            rx,
        );
        // Nothing listens on port 9; the dial fails fast.
        driver
            .handle_connect(Url::parse("ws://127.0.0.1:9/ws").unwrap())
            .await;

        assert_eq!(driver.core.state, ConnectionState::Disconnected);
        let timer = driver.reconnect.as_ref().expect("reconnect armed");
        assert_eq!(timer.generation, driver.generation);
    }

    #[tokio::test]
    async fn disconnect_cancels_pending_reconnect() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let mut driver = Driver::new(
            ClientConfig {
                reconnect_delay: Duration::from_secs(5),
            },
            rx,
        );
        driver
            .handle_connect(Url::parse("ws://127.0.0.1:9/ws").unwrap())
            .await;
        assert!(driver.reconnect.is_some());

        driver.handle_disconnect().await;
        assert!(driver.reconnect.is_none());
        assert!(driver.endpoint.is_none());
    }

    #[tokio::test]
    async fn stale_timer_does_not_redial() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let mut driver = Driver::new(ClientConfig::default(), rx);
        driver.endpoint = Some(Url::parse("ws://127.0.0.1:9/ws").unwrap());
        driver.generation = 3;
        driver.arm_reconnect();
        driver.generation = 4;

        driver.handle_reconnect_due().await;
        // A real dial to the dead port would have re-armed the timer.
        assert!(driver.reconnect.is_none());
        assert_eq!(driver.core.state, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn send_while_disconnected_is_a_soft_failure() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let mut driver = Driver::new(ClientConfig::default(), rx);
        driver
            .handle_send(OutboundCommand::new("switch_ai_model").with("model", "groq"))
            .await;
        assert_eq!(driver.core.state, ConnectionState::Disconnected);
    }
}
