//! Tests for the caller, gateway, and router with mock transports.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::time::Duration;

use crossrpc::CallResult;
use crossrpc::Command;
use crossrpc::Request;
use crossrpc::Status;
use serde_json::json;
use tokio::sync::mpsc;

use crate::caller;
use crate::caller::Caller;
use crate::config::RouterConfig;
use crate::discovery::HostEnvironment;
use crate::discovery::LifecycleEvent;
use crate::endpoint::Endpoint;
use crate::endpoint::ProcessId;
use crate::executor::ExecContext;
use crate::executor::current_context;
use crate::gateway::Gateway;
use crate::gateway::LocalDispatcher;
use crate::router::Router;
use crate::transport;
use crate::transport::CallbackHandle;
use crate::transport::Extras;
use crate::transport::Transport;

/// Answers `NoResponder` for the first `silent_for` calls, then a success result.
struct StartingTransport {
    silent_for: u32,
    calls: AtomicU32,
}

impl StartingTransport {
    fn new(silent_for: u32) -> Self {
        Self { silent_for, calls: AtomicU32::new(0) }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Transport for StartingTransport {
    async fn call(&self, endpoint: &Endpoint, _method: &str, _arg: &str, _extras: Extras) -> transport::Result<Extras> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.silent_for {
            return Err(transport::Error::NoResponder(endpoint.to_string()));
        }
        let raw = crossrpc::encode_result(&CallResult::success_with(json!({ "attempt": n })))
            .map_err(|e| transport::Error::Io(e.to_string()))?;
        Ok(Extras::with_result(raw))
    }
}

/// Always answers with a business error.
#[derive(Default)]
struct RejectingTransport {
    calls: AtomicU32,
}

#[async_trait::async_trait]
impl Transport for RejectingTransport {
    async fn call(&self, _endpoint: &Endpoint, _method: &str, _arg: &str, _extras: Extras) -> transport::Result<Extras> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let raw = crossrpc::encode_result(&CallResult::error(Status::Business, "wrong password"))
            .map_err(|e| transport::Error::Io(e.to_string()))?;
        Ok(Extras::with_result(raw))
    }
}

/// Fails with a non-retryable transport error.
#[derive(Default)]
struct BrokenTransport {
    calls: AtomicU32,
}

#[async_trait::async_trait]
impl Transport for BrokenTransport {
    async fn call(&self, _endpoint: &Endpoint, _method: &str, _arg: &str, _extras: Extras) -> transport::Result<Extras> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(transport::Error::Io("binder died".into()))
    }
}

/// Routes every call straight into one gateway.
struct GatewayTransport(Arc<Gateway>);

#[async_trait::async_trait]
impl Transport for GatewayTransport {
    async fn call(&self, _endpoint: &Endpoint, method: &str, arg: &str, extras: Extras) -> transport::Result<Extras> {
        Ok(self.0.handle(method, arg, extras).await)
    }
}

/// Records what reached it. `sleep_ms` in the params stalls the action.
#[derive(Default)]
struct RecordingDispatcher {
    components: Vec<String>,
    actions: Mutex<Vec<(String, Option<ExecContext>)>>,
    cancelled: Mutex<Vec<String>>,
    timed_out: Mutex<Vec<String>>,
}

impl RecordingDispatcher {
    fn with_components(names: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            components: names.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        })
    }

    fn actions(&self) -> Vec<(String, Option<ExecContext>)> {
        self.actions.lock().unwrap().clone()
    }

    fn timed_out(&self) -> Vec<String> {
        self.timed_out.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl LocalDispatcher for RecordingDispatcher {
    async fn run_action(&self, request: &Request) -> CallResult {
        self.actions.lock().unwrap().push((request.call_id.clone(), current_context()));
        if let Some(ms) = request.params.get("sleep_ms").and_then(|v| v.as_u64()) {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        CallResult::success_with(json!({ "action": request.action_name }))
    }

    fn component_names(&self) -> Vec<String> {
        self.components.clone()
    }

    fn cancel(&self, call_id: &str) {
        self.cancelled.lock().unwrap().push(call_id.to_string());
    }

    fn timeout(&self, call_id: &str) {
        self.timed_out.lock().unwrap().push(call_id.to_string());
    }
}

fn caller_over(transport: Arc<dyn Transport>) -> Caller {
    Caller::new(transport, Arc::new(RouterConfig::default()))
}

fn login(call_id: &str) -> Request {
    Request::new("Login", "authenticate", call_id).param("user", "u")
}

fn encoded(request: &Request) -> Extras {
    Extras::with_request(crossrpc::encode_request(request).unwrap())
}

// --- Caller retry ---

#[tokio::test(start_paused = true)]
async fn test_retry_gives_up_after_max_attempts() {
    let transport = Arc::new(StartingTransport::new(u32::MAX));
    let caller = caller_over(transport.clone());

    let started = tokio::time::Instant::now();
    let err = caller.send(&"app.b".into(), &login("c1")).await.unwrap_err();
    let elapsed = started.elapsed();

    assert_eq!(transport.calls(), 5);
    assert_eq!(err, caller::Error::Unreachable { process: "app.b".into(), attempts: 5 });
    // Four sleeps between five attempts.
    assert!(elapsed >= Duration::from_millis(200), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(250), "elapsed {:?}", elapsed);
    assert_eq!(err.into_result().status(), Status::Unreachable);
}

#[tokio::test(start_paused = true)]
async fn test_retry_absorbs_startup_race() {
    let transport = Arc::new(StartingTransport::new(2));
    let caller = caller_over(transport.clone());

    let reply = caller.send(&"app.b".into(), &login("c1")).await.unwrap();
    let result = caller::result_from_extras(&reply);

    assert_eq!(transport.calls(), 3);
    assert!(result.is_success());
    assert_eq!(result.data(), Some(&json!({ "attempt": 3 })));
}

#[tokio::test]
async fn test_error_reply_is_not_retried() {
    let transport = Arc::new(RejectingTransport::default());
    let caller = caller_over(transport.clone());

    let reply = caller.send(&"app.b".into(), &login("c1")).await.unwrap();
    let result = caller::result_from_extras(&reply);

    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    assert_eq!(result.status(), Status::Business);
    assert_eq!(result.error_message(), Some("wrong password"));
}

#[tokio::test]
async fn test_transport_failure_is_not_retried() {
    let transport = Arc::new(BrokenTransport::default());
    let caller = caller_over(transport.clone());

    let err = caller.send(&"app.b".into(), &login("c1")).await.unwrap_err();

    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    assert!(matches!(err, caller::Error::Transport(transport::Error::Io(_))));
}

#[test]
fn test_reply_without_result_is_malformed() {
    let result = caller::result_from_extras(&Extras::default());
    assert_eq!(result.status(), Status::MalformedEnvelope);

    let result = caller::result_from_extras(&Extras::with_result("not json".into()));
    assert_eq!(result.status(), Status::MalformedEnvelope);
}

// --- Gateway ---

#[tokio::test]
async fn test_gateway_ignores_malformed_envelopes() {
    let dispatcher = RecordingDispatcher::with_components(&["A"]);
    let gateway = Gateway::new(dispatcher.clone(), 4);

    assert!(gateway.handle("m", "{}", Extras::default()).await.is_empty());
    assert!(gateway.handle("m", "{}", Extras::with_request("{not json".into())).await.is_empty());

    let missing_component = Request::new("", "authenticate", "c1");
    assert!(gateway.handle("m", "{}", encoded(&missing_component)).await.is_empty());

    let mut unknown = Request::command(Command::Cancel, "c1");
    unknown.action_name = "reboot".into();
    assert!(gateway.handle("m", "{}", encoded(&unknown)).await.is_empty());

    assert!(dispatcher.actions().is_empty());
}

#[tokio::test]
async fn test_gateway_picks_execution_context() {
    let dispatcher = RecordingDispatcher::with_components(&["Login"]);
    let gateway = Gateway::new(dispatcher.clone(), 4);

    let reply = gateway.handle("m", "{}", encoded(&login("c1").main_thread_sync(true))).await;
    assert!(caller::result_from_extras(&reply).is_success());
    let reply = gateway.handle("m", "{}", encoded(&login("c2"))).await;
    assert!(caller::result_from_extras(&reply).is_success());

    assert_eq!(
        dispatcher.actions(),
        vec![
            ("c1".to_string(), Some(ExecContext::Primary)),
            ("c2".to_string(), Some(ExecContext::Worker)),
        ]
    );
}

#[tokio::test]
async fn test_gateway_lists_components_in_order() {
    let gateway = Gateway::new(RecordingDispatcher::with_components(&["B", "A", "C"]), 4);
    let request = Request::command(Command::ListComponents, "p:1:x");

    let reply = gateway.handle("m", "{}", encoded(&request)).await;
    assert_eq!(reply.component_list, Some(vec!["B".to_string(), "A".to_string(), "C".to_string()]));
    assert!(reply.result.is_none());
}

#[tokio::test]
async fn test_gateway_cancel_unknown_id_is_noop() {
    let dispatcher = RecordingDispatcher::with_components(&[]);
    let gateway = Gateway::new(dispatcher.clone(), 4);

    let reply = gateway.handle("m", "{}", encoded(&Request::command(Command::Cancel, "nobody"))).await;
    assert!(reply.is_empty());
    assert_eq!(*dispatcher.cancelled.lock().unwrap(), vec!["nobody".to_string()]);
    assert!(dispatcher.actions().is_empty());
}

#[tokio::test]
async fn test_gateway_answers_through_callback() {
    let dispatcher = RecordingDispatcher::with_components(&["Login"]);
    let gateway = Gateway::new(dispatcher.clone(), 4);

    let (handle, rx) = CallbackHandle::oneshot();
    let mut extras = encoded(&login("c9").main_thread_sync(true));
    extras.callback = Some(handle);

    let inline = gateway.handle("m", "{}", extras).await;
    assert!(inline.is_empty());

    let delivered = rx.await.unwrap();
    let result = caller::result_from_extras(&delivered);
    assert_eq!(result.data(), Some(&json!({ "action": "authenticate" })));
    assert_eq!(dispatcher.actions(), vec![("c9".to_string(), Some(ExecContext::Primary))]);
}

// --- Router ---

fn router_over(transport: Arc<dyn Transport>) -> Router {
    Router::builder("app.a").transport(transport).build().unwrap()
}

#[tokio::test]
async fn test_router_requires_transport() {
    assert!(matches!(
        Router::builder("app.a").build(),
        Err(crate::router::Error::MissingTransport)
    ));
}

#[tokio::test]
async fn test_router_rejects_invalid_request_without_sending() {
    let transport = Arc::new(BrokenTransport::default());
    let router = router_over(transport.clone());

    let result = router.call(&"app.b".into(), Request::new("Login", "authenticate", "")).await;

    assert_eq!(result.status(), Status::IllegalArgument);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_router_call_unreachable() {
    let router = router_over(Arc::new(StartingTransport::new(u32::MAX)));
    let result = router.call(&"app.b".into(), login("c1")).await;
    assert_eq!(result.code(), -4);
}

#[tokio::test]
async fn test_router_correlated_call() {
    let dispatcher = RecordingDispatcher::with_components(&["Login"]);
    let router = router_over(Arc::new(GatewayTransport(Arc::new(Gateway::new(dispatcher.clone(), 4)))));

    let result = router.call(&"app.b".into(), login("c1").main_thread_sync(true)).await;

    assert!(result.is_success());
    assert_eq!(dispatcher.actions(), vec![("c1".to_string(), Some(ExecContext::Primary))]);
    assert_eq!(router.correlator().pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_router_correlated_timeout_notifies_destination() {
    let dispatcher = RecordingDispatcher::with_components(&["Login"]);
    let router = router_over(Arc::new(GatewayTransport(Arc::new(Gateway::new(dispatcher.clone(), 4)))));
    let request = login("c1").param("sleep_ms", 60_000).main_thread_sync(true);

    let started = tokio::time::Instant::now();
    let result = router.call(&"app.b".into(), request).await;

    assert_eq!(result.status(), Status::Timeout);
    assert!(started.elapsed() >= router.config().sync_timeout());
    assert!(started.elapsed() < Duration::from_secs(60));
    assert_eq!(router.correlator().pending_count(), 0);

    for _ in 0..10 {
        if !dispatcher.timed_out().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(dispatcher.timed_out(), vec!["c1".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_router_inline_timeout() {
    let dispatcher = RecordingDispatcher::with_components(&["Login"]);
    let router = router_over(Arc::new(GatewayTransport(Arc::new(Gateway::new(dispatcher.clone(), 4)))));

    let result = router.call(&"app.b".into(), login("c2").param("sleep_ms", 60_000)).await;

    assert_eq!(result.status(), Status::Timeout);
    assert!(result.error_message().unwrap().contains("c2"));
}

#[tokio::test]
async fn test_router_call_async_reports_send_failure() {
    let router = router_over(Arc::new(BrokenTransport::default()));
    let (tx, rx) = tokio::sync::oneshot::channel();

    router.call_async(&"app.b".into(), login("c1"), move |result| {
        let _ = tx.send(result);
    });

    assert_eq!(rx.await.unwrap().status(), Status::Unreachable);
}

#[tokio::test]
async fn test_router_invoke_unknown_component() {
    let router = router_over(Arc::new(BrokenTransport::default()));
    let result = router.invoke("Nowhere", "run", Default::default(), false).await;
    assert_eq!(result.status(), Status::NoComponentFound);
}

#[tokio::test]
async fn test_router_call_ids_are_unique() {
    let router = router_over(Arc::new(BrokenTransport::default()));
    let a = router.next_call_id();
    let b = router.next_call_id();
    assert_ne!(a, b);
    assert!(a.starts_with("app.a:"));
    assert_eq!(router.process(), &ProcessId::from("app.a"));
}

#[tokio::test]
async fn test_router_call_async_reports_dropped_callback() {
    let router = router_over(Arc::new(CallbackDroppingTransport));
    let (tx, rx) = tokio::sync::oneshot::channel();

    router.call_async(&"app.b".into(), login("c1"), move |result| {
        let _ = tx.send(result);
    });

    assert_eq!(rx.await.unwrap().status(), Status::Unreachable);
}

#[tokio::test]
async fn test_router_correlated_call_reports_dropped_callback() {
    let router = router_over(Arc::new(CallbackDroppingTransport));
    let started = tokio::time::Instant::now();

    let result = router.call(&"app.b".into(), login("c1").main_thread_sync(true)).await;

    assert_eq!(result.status(), Status::Unreachable);
    assert!(started.elapsed() < router.config().sync_timeout());
}

#[tokio::test(start_paused = true)]
async fn test_router_call_async_times_out() {
    let transport = Arc::new(CallbackHoardingTransport::default());
    let router = router_over(transport.clone());
    let (tx, rx) = tokio::sync::oneshot::channel();

    let started = tokio::time::Instant::now();
    router.call_async(&"app.b".into(), login("c1"), move |result| {
        let _ = tx.send(result);
    });
    let result = rx.await.unwrap();

    assert_eq!(result.status(), Status::Timeout);
    assert!(started.elapsed() >= router.config().sync_timeout());
    assert_eq!(transport.held.lock().unwrap().len(), 1);
}

/// Accepts the callback and drops it, as a process dying mid-call would.
struct CallbackDroppingTransport;

#[async_trait::async_trait]
impl Transport for CallbackDroppingTransport {
    async fn call(&self, _endpoint: &Endpoint, _method: &str, _arg: &str, mut extras: Extras) -> transport::Result<Extras> {
        drop(extras.callback.take());
        Ok(Extras::default())
    }
}

/// Accepts the callback and never uses it. Timeout commands are answered empty.
#[derive(Default)]
struct CallbackHoardingTransport {
    held: Mutex<Vec<CallbackHandle>>,
}

#[async_trait::async_trait]
impl Transport for CallbackHoardingTransport {
    async fn call(&self, _endpoint: &Endpoint, _method: &str, _arg: &str, mut extras: Extras) -> transport::Result<Extras> {
        if let Some(callback) = extras.callback.take() {
            self.held.lock().unwrap().push(callback);
        }
        Ok(Extras::default())
    }
}

// --- Discovery ---

/// A sibling that is host and transport at once, with scriptable wake and answer behaviour.
struct ScriptedSibling {
    process: ProcessId,
    wake_delay: Duration,
    wakes: AtomicBool,
    answers: AtomicBool,
    components: Mutex<Vec<String>>,
}

impl ScriptedSibling {
    fn new(process: &str, components: &[&str], wake_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            process: process.into(),
            wake_delay,
            wakes: AtomicBool::new(true),
            answers: AtomicBool::new(true),
            components: Mutex::new(components.iter().map(|s| s.to_string()).collect()),
        })
    }
}

#[async_trait::async_trait]
impl HostEnvironment for ScriptedSibling {
    async fn scan(&self, _marker: &str) -> Vec<ProcessId> {
        vec![self.process.clone()]
    }

    async fn wake(&self, _process: &ProcessId) -> bool {
        tokio::time::sleep(self.wake_delay).await;
        self.wakes.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Transport for ScriptedSibling {
    async fn call(&self, endpoint: &Endpoint, _method: &str, _arg: &str, _extras: Extras) -> transport::Result<Extras> {
        if !self.answers.load(Ordering::SeqCst) {
            return Err(transport::Error::NoResponder(endpoint.to_string()));
        }
        Ok(Extras::with_component_list(self.components.lock().unwrap().clone()))
    }
}

fn router_with_sibling(sibling: &Arc<ScriptedSibling>) -> Router {
    Router::builder("app.a")
        .transport(sibling.clone())
        .host(sibling.clone())
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_removal_wins_over_earlier_restart() {
    let sibling = ScriptedSibling::new("app.b", &["Login"], Duration::from_millis(20));
    let router = router_with_sibling(&sibling);
    let (tx, rx) = mpsc::unbounded_channel();
    assert_eq!(router.enable_remote(rx).await, 1);

    tx.send(LifecycleEvent::Restarted("app.b".into())).unwrap();
    tx.send(LifecycleEvent::Removed("app.b".into())).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(router.resolve("Login"), None);
    assert!(router.registry().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_readd_after_removal_is_registered() {
    let sibling = ScriptedSibling::new("app.b", &["Login"], Duration::from_millis(20));
    let router = router_with_sibling(&sibling);
    let (tx, rx) = mpsc::unbounded_channel();
    router.enable_remote(rx).await;

    tx.send(LifecycleEvent::Removed("app.b".into())).unwrap();
    tx.send(LifecycleEvent::Added("app.b".into())).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(router.resolve("Login"), Some(ProcessId::from("app.b")));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_in_flight_probes() {
    let sibling = ScriptedSibling::new("app.b", &["Login"], Duration::from_millis(20));
    let router = router_with_sibling(&sibling);
    let (tx, rx) = mpsc::unbounded_channel();
    router.enable_remote(rx).await;
    router.registry().clear();

    tx.send(LifecycleEvent::Changed("app.b".into())).unwrap();
    // The probe is now waiting on wake.
    tokio::time::sleep(Duration::from_millis(5)).await;
    router.shutdown();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(router.registry().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_changed_event_reprobes_process() {
    let sibling = ScriptedSibling::new("app.b", &["Login"], Duration::ZERO);
    let router = router_with_sibling(&sibling);
    let (tx, rx) = mpsc::unbounded_channel();
    router.enable_remote(rx).await;

    *sibling.components.lock().unwrap() = vec!["Login".into(), "Logout".into()];
    tx.send(LifecycleEvent::Changed("app.b".into())).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(router.resolve("Logout"), Some(ProcessId::from("app.b")));
}

#[tokio::test(start_paused = true)]
async fn test_refused_wake_removes_stale_entry() {
    let sibling = ScriptedSibling::new("app.b", &["Login"], Duration::ZERO);
    let router = router_with_sibling(&sibling);
    let (tx, rx) = mpsc::unbounded_channel();
    router.enable_remote(rx).await;
    assert_eq!(router.resolve("Login"), Some(ProcessId::from("app.b")));

    sibling.wakes.store(false, Ordering::SeqCst);
    tx.send(LifecycleEvent::Restarted("app.b".into())).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(router.resolve("Login"), None);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_sibling_removes_stale_entry() {
    let sibling = ScriptedSibling::new("app.b", &["Login"], Duration::ZERO);
    let router = router_with_sibling(&sibling);
    assert_eq!(router.refresh().await, 1);

    sibling.answers.store(false, Ordering::SeqCst);
    let discovery = router.discovery().unwrap();
    let err = discovery.probe(&"app.b".into()).await.unwrap_err();

    assert!(matches!(err, crate::discovery::Error::Call(caller::Error::Unreachable { attempts: 5, .. })));
    assert_eq!(router.resolve("Login"), None);
}
