//! Sets up two processes on a local device and exercises every call path between them.
//!
//! Run with `RUST_LOG=debug` to see the transport and gateway traffic.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use crossrpc::CallResult;
use crossrpc::Params;
use crossrpc::Request;
use crossrpc::Status;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crossrun::Gateway;
use crossrun::LocalDevice;
use crossrun::LocalDispatcher;
use crossrun::ProcessId;
use crossrun::Router;
use crossrun::RouterConfig;
use crossrun::executor::current_context;

/// The account process: hosts `Login` and `Profile`.
struct Accounts;

#[async_trait::async_trait]
impl LocalDispatcher for Accounts {
    async fn run_action(&self, request: &Request) -> CallResult {
        info!(call_id = %request.call_id, context = ?current_context(), "{}", request.label());
        match (request.component_name.as_str(), request.action_name.as_str()) {
            ("Login", "authenticate") => match request.params.get("user").and_then(|v| v.as_str()) {
                Some(user) => CallResult::success_with(json!({ "token": format!("tok-{}", user) })),
                None => CallResult::error(Status::IllegalArgument, "user is required"),
            },
            ("Profile", "slow") => {
                tokio::time::sleep(Duration::from_secs(2)).await;
                CallResult::success()
            }
            ("Profile", "show") => CallResult::success_with(json!({ "name": "demo" })),
            _ => CallResult::error(Status::NoComponentFound, request.label()),
        }
    }

    fn component_names(&self) -> Vec<String> {
        vec!["Login".into(), "Profile".into()]
    }

    fn cancel(&self, call_id: &str) {
        info!(%call_id, "caller cancelled");
    }

    fn timeout(&self, call_id: &str) {
        info!(%call_id, "caller timed out");
    }
}

/// The calling process hosts nothing anyone asks for.
struct Shell;

#[async_trait::async_trait]
impl LocalDispatcher for Shell {
    async fn run_action(&self, request: &Request) -> CallResult {
        CallResult::error(Status::NoComponentFound, request.label())
    }

    fn component_names(&self) -> Vec<String> {
        vec!["Shell".into()]
    }

    fn cancel(&self, _call_id: &str) {}

    fn timeout(&self, _call_id: &str) {}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::var("CROSSRUN_CONFIG") {
        Ok(raw) => RouterConfig::from_json(&raw).context("CROSSRUN_CONFIG")?,
        Err(_) => RouterConfig {
            sync_timeout_ms: 1000,
            ..RouterConfig::default()
        },
    };

    let device = Arc::new(LocalDevice::new());
    device.install("app.shell", Arc::new(Gateway::new(Arc::new(Shell), config.worker_limit)));
    device.install("app.accounts", Arc::new(Gateway::new(Arc::new(Accounts), config.worker_limit)));

    let router = Router::builder("app.shell")
        .config(config)
        .transport(device.clone())
        .host(device.clone())
        .build()?;

    let stored = router.enable_remote(device.subscribe()).await;
    info!(stored, processes = ?router.registry().processes(), "discovery done");

    let accounts = ProcessId::from("app.accounts");

    let mut params = Params::new();
    params.insert("user".into(), json!("alice"));
    let result = router.invoke("Login", "authenticate", params, true).await;
    info!(code = result.code(), data = ?result.data(), "blocking call on the primary executor");

    let (tx, rx) = tokio::sync::oneshot::channel();
    let request = Request::new("Profile", "show", router.next_call_id());
    router.call_async(&accounts, request, move |result| {
        let _ = tx.send(result);
    });
    let result = rx.await.context("async callback dropped")?;
    info!(code = result.code(), data = ?result.data(), "async call");

    let request = Request::new("Profile", "slow", router.next_call_id()).main_thread_sync(true);
    let result = router.call(&accounts, request).await;
    info!(code = result.code(), message = ?result.error_message(), "bounded call");

    let call_id = router.next_call_id();
    router.cancel(&accounts, &call_id).await?;
    info!(%call_id, "cancel delivered");

    device.uninstall(&accounts);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let result = router.invoke("Login", "authenticate", Params::new(), false).await;
    info!(code = result.code(), "call after uninstall");

    router.shutdown();
    Ok(())
}
