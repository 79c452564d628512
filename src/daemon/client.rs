// src/daemon/client.rs

//! Client side of the daemon call interface
//!
//! [`CallBridge`] turns the asynchronous transport into blocking calls for
//! front-ends: each call runs a private single-threaded wait loop that also
//! delivers signals to registered handlers while the reply is outstanding.
//! [`DaemonClient`] adds a typed method per daemon operation on top.
//!
//! # Example
//!
//! ```ignore
//! use dnfdaemon::daemon::{ClientConfig, DaemonClient};
//!
//! let client = DaemonClient::connect(ClientConfig::default())?;
//! client.on_signal(|event| println!("{}", event.name()));
//! client.subscribe()?;
//!
//! if client.lock()? {
//!     client.install("nginx")?;
//!     client.run_transaction()?;
//!     client.unlock()?;
//! }
//! ```

use super::dispatch::MethodCall;
use super::routes::CallResponse;
use super::socket::DEFAULT_SOCKET_PATH;
use super::{DaemonEvent, ProblemDocument};
use crate::engine::Repository;
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use http_body_util::{BodyExt, BodyStream, Full};
use hyper::body::{Bytes, Incoming};
use hyper::client::conn::http1::{self, SendRequest};
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixStream;
use tracing::{debug, warn};

/// Default bounded wait for a reply
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Stream of signals from the daemon
pub type EventStream = BoxStream<'static, Result<DaemonEvent>>;

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub socket_path: PathBuf,
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Asynchronous call interface to the daemon
#[async_trait]
pub trait Transport: Send + Sync {
    /// Submit one call and wait for its reply
    async fn call(&self, call: &MethodCall) -> Result<Value>;

    /// Open the signal stream
    async fn events(&self) -> Result<EventStream>;
}

fn http_error(e: hyper::Error) -> Error {
    Error::Service(format!("HTTP error: {}", e))
}

/// HTTP/1.1 over the daemon's Unix socket
#[derive(Debug, Clone)]
pub struct HttpTransport {
    socket_path: PathBuf,
}

impl HttpTransport {
    pub fn new<P: AsRef<Path>>(socket_path: P) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Open a fresh connection and send one request on it
    async fn send(
        &self,
        request: Request<Full<Bytes>>,
    ) -> Result<(SendRequest<Full<Bytes>>, Response<Incoming>)> {
        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            Error::Service(format!(
                "Cannot connect to {}: {}",
                self.socket_path.display(),
                e
            ))
        })?;
        let (mut sender, conn) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(http_error)?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("Connection to daemon closed: {}", e);
            }
        });

        let response = sender.send_request(request).await.map_err(http_error)?;
        Ok((sender, response))
    }
}

fn build_request(method: &str, uri: &str, body: Bytes) -> Result<Request<Full<Bytes>>> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("host", "localhost")
        .header("content-type", "application/json")
        .body(Full::new(body))
        .map_err(|e| Error::Service(format!("Invalid request: {}", e)))
}

/// Typed error for a non-success reply
fn problem_error(status: u16, body: &[u8]) -> Error {
    match serde_json::from_slice::<ProblemDocument>(body) {
        Ok(problem) => problem.into_error(),
        Err(_) => Error::Service(format!(
            "Request failed with status {}: {}",
            status,
            String::from_utf8_lossy(body)
        )),
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call(&self, call: &MethodCall) -> Result<Value> {
        let body = serde_json::to_vec(call)?;
        let (_sender, response) = self
            .send(build_request("POST", "/v1/call", Bytes::from(body))?)
            .await?;

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(http_error)?
            .to_bytes();

        if status.is_success() {
            let reply: CallResponse = serde_json::from_slice(&bytes)?;
            Ok(reply.result)
        } else {
            Err(problem_error(status.as_u16(), &bytes))
        }
    }

    async fn events(&self) -> Result<EventStream> {
        let (sender, response) = self
            .send(build_request("GET", "/v1/events", Bytes::new())?)
            .await?;

        let status = response.status();
        if !status.is_success() {
            let bytes = response
                .into_body()
                .collect()
                .await
                .map_err(http_error)?
                .to_bytes();
            return Err(problem_error(status.as_u16(), &bytes));
        }

        let state = EventReader {
            _sender: sender,
            body: BodyStream::new(response.into_body()),
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
        };
        let stream = stream::unfold(state, |mut state| async move {
            let item = state.next().await?;
            Some((item, state))
        });
        Ok(stream.boxed())
    }
}

/// State of an open SSE response
struct EventReader {
    /// Keeps the connection open for as long as the stream is read
    _sender: SendRequest<Full<Bytes>>,
    body: BodyStream<Incoming>,
    decoder: SseDecoder,
    pending: VecDeque<Result<DaemonEvent>>,
}

impl EventReader {
    async fn next(&mut self) -> Option<Result<DaemonEvent>> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Some(item);
            }
            match self.body.next().await? {
                Ok(frame) => {
                    if let Ok(data) = frame.into_data() {
                        for (name, payload) in self.decoder.push(&data) {
                            if let Some(item) = decode_signal(&name, &payload) {
                                self.pending.push_back(item);
                            }
                        }
                    }
                }
                Err(e) => return Some(Err(http_error(e))),
            }
        }
    }
}

/// Map one SSE event onto a signal; stream bookkeeping events yield `None`
fn decode_signal(name: &str, payload: &str) -> Option<Result<DaemonEvent>> {
    match name {
        "connected" => {
            debug!("Event stream connected");
            None
        }
        "warning" => {
            warn!("Daemon dropped signals: {}", payload);
            None
        }
        _ => Some(serde_json::from_str(payload).map_err(Error::from)),
    }
}

/// Incremental `text/event-stream` parser
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Feed raw bytes; returns every `(event, data)` pair completed by them
    pub fn push(&mut self, chunk: &[u8]) -> Vec<(String, String)> {
        self.buf.extend_from_slice(chunk);
        let mut done = Vec::new();

        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data.is_empty() {
                    let name = self.event.take().unwrap_or_else(|| "message".to_string());
                    done.push((name, self.data.join("\n")));
                }
                self.event = None;
                self.data.clear();
            } else if line.starts_with(':') {
                // comment / keepalive
            } else {
                let (field, value) = match line.split_once(':') {
                    Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                    None => (line, ""),
                };
                match field {
                    "event" => self.event = Some(value.to_string()),
                    "data" => self.data.push(value.to_string()),
                    _ => {}
                }
            }
        }

        done
    }
}

/// Signal handler registered on a bridge
pub type SignalHandler = Box<dyn FnMut(&DaemonEvent)>;

/// Blocking calls over an asynchronous [`Transport`]
///
/// Not thread-safe; one bridge serves one logical thread of control. A call
/// made while another is waiting (for example from inside a signal handler)
/// fails with [`Error::ReentrantCall`].
pub struct CallBridge {
    transport: Arc<dyn Transport>,
    runtime: tokio::runtime::Runtime,
    timeout: Duration,
    handlers: RefCell<Vec<SignalHandler>>,
    events: RefCell<Option<EventStream>>,
    in_wait: Cell<bool>,
}

/// Clears the wait flag when a wait ends, also on error
struct WaitGuard<'a>(&'a Cell<bool>);

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl CallBridge {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            transport,
            runtime,
            timeout,
            handlers: RefCell::new(Vec::new()),
            events: RefCell::new(None),
            in_wait: Cell::new(false),
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Register a handler for every signal
    pub fn on_signal<F>(&self, handler: F)
    where
        F: FnMut(&DaemonEvent) + 'static,
    {
        self.handlers.borrow_mut().push(Box::new(handler));
    }

    fn enter_wait(&self) -> Result<WaitGuard<'_>> {
        if self.in_wait.replace(true) {
            return Err(Error::ReentrantCall);
        }
        Ok(WaitGuard(&self.in_wait))
    }

    /// Open the signal stream; signals are delivered during later waits
    pub fn subscribe(&self) -> Result<()> {
        let _wait = self.enter_wait()?;
        let stream = self.runtime.block_on(self.transport.events())?;
        *self.events.borrow_mut() = Some(stream);
        Ok(())
    }

    pub fn is_subscribed(&self) -> bool {
        self.events.borrow().is_some()
    }

    /// Make one call, blocking until reply, error or timeout
    pub fn call(&self, call: MethodCall) -> Result<Value> {
        let _wait = self.enter_wait()?;
        debug!("Calling {}", call.name());
        self.runtime.block_on(self.wait(Some(call), self.timeout))
    }

    /// Deliver signals for `duration` without making a call
    pub fn process_events(&self, duration: Duration) -> Result<()> {
        let _wait = self.enter_wait()?;
        match self.runtime.block_on(self.wait(None, duration)) {
            Err(Error::Timeout { .. }) => Ok(()),
            other => other.map(|_| ()),
        }
    }

    async fn wait(&self, call: Option<MethodCall>, timeout: Duration) -> Result<Value> {
        let mut events = self.events.borrow_mut().take();
        let reply = async {
            match &call {
                Some(call) => self.transport.call(call).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(reply);
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let result = loop {
            tokio::select! {
                result = &mut reply => break result,
                _ = &mut deadline => {
                    break Err(Error::Timeout {
                        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    });
                }
                event = next_event(&mut events) => match event {
                    Some(Ok(event)) => self.dispatch_signal(&event),
                    Some(Err(e)) => {
                        warn!("Event stream failed: {}", e);
                        events = None;
                    }
                    None => {
                        debug!("Event stream closed");
                        events = None;
                    }
                },
            }
        };

        *self.events.borrow_mut() = events;
        result
    }

    fn dispatch_signal(&self, event: &DaemonEvent) {
        let mut handlers = std::mem::take(&mut *self.handlers.borrow_mut());
        for handler in handlers.iter_mut() {
            handler(event);
        }
        // keep handlers registered from inside a handler
        let mut current = self.handlers.borrow_mut();
        handlers.append(&mut current);
        *current = handlers;
    }
}

async fn next_event(events: &mut Option<EventStream>) -> Option<Result<DaemonEvent>> {
    match events {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

/// Decode a structured result sent as JSON text
///
/// The literal `"null"` decodes to `None`.
pub fn decode_text<T: DeserializeOwned>(value: Value) -> Result<Option<T>> {
    match value {
        Value::String(text) if text == "null" => Ok(None),
        Value::String(text) => Ok(Some(serde_json::from_str(&text)?)),
        Value::Null => Ok(None),
        other => Err(Error::Service(format!(
            "expected JSON text, got {}",
            other
        ))),
    }
}

/// Resolved transaction: `(rc, [(action, [(id, size, [replaced])])])`
pub type TransactionResult = (i64, Vec<(String, Vec<(String, u64, Vec<String>)>)>);

/// A category and its groups as returned by `GetGroups`
pub type GroupTree = Vec<(
    (String, String, String),
    Vec<(String, String, String, bool)>,
)>;

/// Typed client for every daemon operation
pub struct DaemonClient {
    bridge: CallBridge,
}

impl DaemonClient {
    /// Client over an arbitrary transport
    pub fn with_transport(transport: Arc<dyn Transport>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            bridge: CallBridge::new(transport, timeout)?,
        })
    }

    /// Connect to the daemon socket and check that it answers
    pub fn connect(config: ClientConfig) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(&config.socket_path));
        let client = Self::with_transport(transport, config.timeout)?;
        let version = client.get_version()?;
        debug!("Connected to daemon API version {}", version);
        Ok(client)
    }

    pub fn bridge(&self) -> &CallBridge {
        &self.bridge
    }

    pub fn on_signal<F>(&self, handler: F)
    where
        F: FnMut(&DaemonEvent) + 'static,
    {
        self.bridge.on_signal(handler);
    }

    pub fn subscribe(&self) -> Result<()> {
        self.bridge.subscribe()
    }

    pub fn process_events(&self, duration: Duration) -> Result<()> {
        self.bridge.process_events(duration)
    }

    fn call_as<T: DeserializeOwned>(&self, call: MethodCall) -> Result<T> {
        Ok(serde_json::from_value(self.bridge.call(call)?)?)
    }

    fn call_text<T: DeserializeOwned>(&self, call: MethodCall) -> Result<Option<T>> {
        decode_text(self.bridge.call(call)?)
    }

    pub fn get_version(&self) -> Result<i64> {
        self.call_as(MethodCall::GetVersion)
    }

    /// Try to take the session lock; false if someone holds it
    pub fn lock(&self) -> Result<bool> {
        self.call_as(MethodCall::Lock)
    }

    pub fn unlock(&self) -> Result<bool> {
        self.call_as(MethodCall::Unlock)
    }

    /// Ask the daemon to exit; false while a transaction is running
    pub fn exit(&self) -> Result<bool> {
        self.call_as(MethodCall::Exit)
    }

    pub fn set_watchdog_state(&self, state: bool) -> Result<bool> {
        self.call_as(MethodCall::SetWatchdogState { state })
    }

    pub fn get_repositories(&self, filter: &str) -> Result<Vec<String>> {
        self.call_as(MethodCall::GetRepositories {
            filter: filter.to_string(),
        })
    }

    pub fn get_repo(&self, repo_id: &str) -> Result<Option<Repository>> {
        self.call_text(MethodCall::GetRepo {
            repo_id: repo_id.to_string(),
        })
    }

    pub fn set_enabled_repos(&self, repo_ids: &[&str]) -> Result<()> {
        self.bridge.call(MethodCall::SetEnabledRepos {
            repo_ids: repo_ids.iter().map(|s| s.to_string()).collect(),
        })?;
        Ok(())
    }

    pub fn get_config(&self, setting: &str) -> Result<Option<Value>> {
        self.call_text(MethodCall::GetConfig {
            setting: setting.to_string(),
        })
    }

    pub fn set_config(&self, setting: &str, value: &Value) -> Result<bool> {
        self.call_as(MethodCall::SetConfig {
            setting: setting.to_string(),
            value: value.to_string(),
        })
    }

    pub fn get_packages(&self, pkg_filter: &str) -> Result<Vec<String>> {
        self.call_as(MethodCall::GetPackages {
            pkg_filter: pkg_filter.to_string(),
        })
    }

    /// Rows of `[id, field values...]`
    pub fn get_packages_with_attributes(
        &self,
        pkg_filter: &str,
        fields: &[&str],
    ) -> Result<Vec<Vec<Value>>> {
        Ok(self
            .call_text(MethodCall::GetPackageWithAttributes {
                pkg_filter: pkg_filter.to_string(),
                fields: fields.iter().map(|s| s.to_string()).collect(),
            })?
            .unwrap_or_default())
    }

    pub fn get_packages_by_name(&self, name: &str, newest_only: bool) -> Result<Vec<String>> {
        self.call_as(MethodCall::GetPackagesByName {
            name: name.to_string(),
            newest_only,
        })
    }

    pub fn get_attribute(&self, id: &str, attr: &str) -> Result<Option<Value>> {
        self.call_text(MethodCall::GetAttribute {
            id: id.to_string(),
            attr: attr.to_string(),
        })
    }

    pub fn get_update_info(&self, id: &str) -> Result<Option<Value>> {
        self.call_text(MethodCall::GetUpdateInfo { id: id.to_string() })
    }

    pub fn search(
        &self,
        fields: &[&str],
        keys: &[&str],
        match_all: bool,
        newest_only: bool,
        tags: bool,
    ) -> Result<Vec<String>> {
        self.call_as(MethodCall::Search {
            fields: fields.iter().map(|s| s.to_string()).collect(),
            keys: keys.iter().map(|s| s.to_string()).collect(),
            match_all,
            newest_only,
            tags,
        })
    }

    pub fn get_groups(&self) -> Result<GroupTree> {
        Ok(self.call_text(MethodCall::GetGroups)?.unwrap_or_default())
    }

    pub fn get_group_packages(&self, grp_id: &str, grp_flt: &str) -> Result<Vec<String>> {
        self.call_as(MethodCall::GetGroupPackages {
            grp_id: grp_id.to_string(),
            grp_flt: grp_flt.to_string(),
        })
    }

    fn transaction_result(&self, call: MethodCall) -> Result<TransactionResult> {
        self.call_text(call)?
            .ok_or_else(|| Error::Service("empty transaction result".to_string()))
    }

    pub fn install(&self, cmds: &str) -> Result<TransactionResult> {
        self.transaction_result(MethodCall::Install {
            cmds: cmds.to_string(),
        })
    }

    pub fn remove(&self, cmds: &str) -> Result<TransactionResult> {
        self.transaction_result(MethodCall::Remove {
            cmds: cmds.to_string(),
        })
    }

    pub fn update(&self, cmds: &str) -> Result<TransactionResult> {
        self.transaction_result(MethodCall::Update {
            cmds: cmds.to_string(),
        })
    }

    pub fn reinstall(&self, cmds: &str) -> Result<TransactionResult> {
        self.transaction_result(MethodCall::Reinstall {
            cmds: cmds.to_string(),
        })
    }

    pub fn downgrade(&self, cmds: &str) -> Result<TransactionResult> {
        self.transaction_result(MethodCall::Downgrade {
            cmds: cmds.to_string(),
        })
    }

    /// Queue one package; returns the queued ids
    pub fn add_transaction(&self, id: &str, action: &str) -> Result<Vec<String>> {
        self.call_as(MethodCall::AddTransaction {
            id: id.to_string(),
            action: action.to_string(),
        })
    }

    pub fn clear_transaction(&self) -> Result<()> {
        self.bridge.call(MethodCall::ClearTransaction)?;
        Ok(())
    }

    pub fn get_transaction(&self) -> Result<Vec<String>> {
        self.call_as(MethodCall::GetTransaction)
    }

    pub fn build_transaction(&self) -> Result<TransactionResult> {
        self.transaction_result(MethodCall::BuildTransaction)
    }

    pub fn run_transaction(&self) -> Result<i64> {
        self.call_as(MethodCall::RunTransaction)
    }

    /// `(tid, end time)` pairs for transactions in the day window
    pub fn get_history_by_days(&self, start_days: u32, end_days: u32) -> Result<Vec<(i64, String)>> {
        Ok(self
            .call_text(MethodCall::GetHistoryByDays {
                start_days,
                end_days,
            })?
            .unwrap_or_default())
    }

    pub fn history_search(&self, pattern: &[&str]) -> Result<Vec<(i64, String)>> {
        Ok(self
            .call_text(MethodCall::HistorySearch {
                pattern: pattern.iter().map(|s| s.to_string()).collect(),
            })?
            .unwrap_or_default())
    }

    /// `(id, state, still installed)` for a history transaction
    pub fn get_history_packages(&self, tid: i64) -> Result<Vec<(String, String, bool)>> {
        Ok(self
            .call_text(MethodCall::GetHistoryPackages { tid })?
            .unwrap_or_default())
    }

    pub fn confirm_gpg_import(&self, hexkeyid: &str, confirmed: bool) -> Result<()> {
        self.bridge.call(MethodCall::ConfirmGpgImport {
            hexkeyid: hexkeyid.to_string(),
            confirmed,
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TransactionStage;
    use serde_json::json;
    use std::rc::Rc;

    /// Scripted transport: replies by method name, emits fixed signals
    struct ScriptedTransport {
        signals: Vec<DaemonEvent>,
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn call(&self, call: &MethodCall) -> Result<Value> {
            match call {
                MethodCall::GetVersion => Ok(json!(902)),
                MethodCall::Lock => {
                    // leave time for signals to arrive first
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(json!(true))
                }
                MethodCall::Unlock => Err(Error::from_wire(
                    "org.baseurl.DnfSystem.AccessDeniedError",
                    "Session is not authorized",
                )),
                MethodCall::GetRepo { .. } => Ok(json!("null")),
                MethodCall::BuildTransaction => Ok(json!(
                    r#"[1, [["install", [["bar,0,3.0,1,noarch,fedora", 2048, []]]]]]"#
                )),
                MethodCall::Exit => std::future::pending().await,
                other => Err(Error::from_wire(
                    "org.example.Unexpected",
                    &format!("no script for {}", other.name()),
                )),
            }
        }

        async fn events(&self) -> Result<EventStream> {
            let signals: Vec<Result<DaemonEvent>> = self.signals.iter().cloned().map(Ok).collect();
            Ok(stream::iter(signals).chain(stream::pending()).boxed())
        }
    }

    fn stage(event: TransactionStage) -> DaemonEvent {
        DaemonEvent::TransactionEvent { event, data: None }
    }

    fn client(signals: Vec<DaemonEvent>, timeout: Duration) -> DaemonClient {
        DaemonClient::with_transport(Arc::new(ScriptedTransport { signals }), timeout).unwrap()
    }

    #[test]
    fn test_typed_results() {
        let client = client(vec![], DEFAULT_TIMEOUT);
        assert_eq!(client.get_version().unwrap(), 902);
        assert!(client.get_repo("missing").unwrap().is_none());

        let (rc, output) = client.build_transaction().unwrap();
        assert_eq!(rc, 1);
        assert_eq!(output[0].0, "install");
        assert_eq!(output[0].1[0].1, 2048);
    }

    #[test]
    fn test_timeout_is_distinct_from_transport_error() {
        let client = client(vec![], Duration::from_millis(50));
        match client.exit() {
            Err(Error::Timeout { timeout_ms }) => assert_eq!(timeout_ms, 50),
            other => panic!("expected timeout, got {other:?}"),
        }
        // the bridge is usable again after a timeout
        assert_eq!(client.get_version().unwrap(), 902);
    }

    #[test]
    fn test_wire_errors_are_typed() {
        let client = client(vec![], DEFAULT_TIMEOUT);
        assert!(matches!(client.unlock(), Err(Error::AccessDenied(_))));

        match client.get_groups() {
            Err(Error::Service(msg)) => {
                assert!(msg.contains("org.example.Unexpected"));
                assert!(msg.contains("no script for GetGroups"));
            }
            other => panic!("expected service error, got {other:?}"),
        }
    }

    #[test]
    fn test_signals_delivered_during_wait() {
        let signals = vec![stage(TransactionStage::StartRun), stage(TransactionStage::EndRun)];
        let client = client(signals.clone(), DEFAULT_TIMEOUT);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        client.on_signal(move |event| sink.borrow_mut().push(event.clone()));

        client.subscribe().unwrap();
        assert!(client.lock().unwrap());
        assert_eq!(*seen.borrow(), signals);
    }

    #[test]
    fn test_nested_call_fails_fast() {
        let client = Rc::new(client(
            vec![stage(TransactionStage::StartBuild)],
            DEFAULT_TIMEOUT,
        ));
        let nested = Rc::new(RefCell::new(None));

        let weak = Rc::downgrade(&client);
        let slot = nested.clone();
        client.on_signal(move |_| {
            if let Some(client) = weak.upgrade() {
                *slot.borrow_mut() = Some(client.get_version());
            }
        });

        client.subscribe().unwrap();
        assert!(client.lock().unwrap());
        assert!(matches!(
            nested.borrow_mut().take(),
            Some(Err(Error::ReentrantCall))
        ));
        assert_eq!(client.get_version().unwrap(), 902);
    }

    #[test]
    fn test_sse_decoder_split_chunks() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"event: connected\ndata: {\"status\"").is_empty());
        let done = decoder.push(b": \"connected\"}\n\n:keepalive\n\nevent: GPGImport\r\n");
        assert_eq!(
            done,
            vec![(
                "connected".to_string(),
                r#"{"status": "connected"}"#.to_string()
            )]
        );

        let done = decoder.push(b"data: {\"a\":1}\r\n\r\n");
        assert_eq!(done, vec![("GPGImport".to_string(), r#"{"a":1}"#.to_string())]);
    }

    #[test]
    fn test_decode_signal() {
        assert!(decode_signal("connected", "{}").is_none());
        assert!(decode_signal("warning", r#"{"lagged": 3}"#).is_none());

        let json = serde_json::to_string(&stage(TransactionStage::Fail)).unwrap();
        let event = decode_signal("TransactionEvent", &json).unwrap().unwrap();
        assert_eq!(event, stage(TransactionStage::Fail));
    }

    #[test]
    fn test_decode_text_sentinel() {
        assert_eq!(decode_text::<Vec<i64>>(json!("null")).unwrap(), None);
        assert_eq!(decode_text::<Vec<i64>>(json!("[1,2]")).unwrap(), Some(vec![1, 2]));
        assert!(decode_text::<Vec<i64>>(json!(5)).is_err());
    }
}
