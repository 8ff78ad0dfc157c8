//! Scripted transport mock and test harness for the resilience core.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use uplink_client::{
    CapabilityRegistry, ClientConfig, ConnectionManager, ConnectionState, TelemetryDispatcher,
};
use uplink_protocol::messages::InvokeResult;
use uplink_transport::{
    BackoffConfig, CapabilityHandler, HandlerFuture, RegisterError, RetryPolicy, Transport,
    TransportError, TransportEvent,
};

/// Scripted outcome for an `open` or `send` call.
#[derive(Clone, Copy, Debug)]
pub enum Behavior {
    Ok,
    Fail,
    /// Never settles. Models a hung transport call.
    Hang,
}

/// Scripted outcome for a `register_capability` call.
#[derive(Clone, Copy, Debug)]
pub enum RegisterOutcome {
    Ok,
    Already,
    Fail,
}

/// Transport double driven by per-call scripts. An exhausted script
/// defaults to `Ok`.
pub struct MockTransport {
    open_script: std::sync::Mutex<VecDeque<Behavior>>,
    pub open_calls: AtomicUsize,
    opens_in_flight: AtomicUsize,
    pub max_concurrent_opens: AtomicUsize,
    send_script: std::sync::Mutex<VecDeque<Behavior>>,
    pub send_calls: AtomicUsize,
    register_script: std::sync::Mutex<VecDeque<RegisterOutcome>>,
    pub registered: std::sync::Mutex<Vec<String>>,
    pub close_calls: AtomicUsize,
    pub policies: std::sync::Mutex<Vec<RetryPolicy>>,
    events_tx: mpsc::Sender<TransportEvent>,
    events_rx: tokio::sync::Mutex<Option<mpsc::Receiver<TransportEvent>>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::channel(16);
        Arc::new(Self {
            open_script: std::sync::Mutex::new(VecDeque::new()),
            open_calls: AtomicUsize::new(0),
            opens_in_flight: AtomicUsize::new(0),
            max_concurrent_opens: AtomicUsize::new(0),
            send_script: std::sync::Mutex::new(VecDeque::new()),
            send_calls: AtomicUsize::new(0),
            register_script: std::sync::Mutex::new(VecDeque::new()),
            registered: std::sync::Mutex::new(Vec::new()),
            close_calls: AtomicUsize::new(0),
            policies: std::sync::Mutex::new(Vec::new()),
            events_tx,
            events_rx: tokio::sync::Mutex::new(Some(events_rx)),
        })
    }

    pub fn script_opens(&self, behaviors: &[Behavior]) {
        self.open_script.lock().unwrap().extend(behaviors);
    }

    pub fn script_sends(&self, behaviors: &[Behavior]) {
        self.send_script.lock().unwrap().extend(behaviors);
    }

    pub fn script_registers(&self, outcomes: &[RegisterOutcome]) {
        self.register_script.lock().unwrap().extend(outcomes);
    }

    /// Injects a transport notification, as the real transport would on a
    /// dead socket.
    pub async fn emit(&self, event: TransportEvent) {
        let _ = self.events_tx.send(event).await;
    }

    pub fn last_policy_is_no_retry(&self) -> bool {
        matches!(
            self.policies.lock().unwrap().last(),
            Some(RetryPolicy::NoRetry)
        )
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self) -> Result<(), TransportError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.opens_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent_opens
            .fetch_max(in_flight, Ordering::SeqCst);

        let behavior = self
            .open_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Behavior::Ok);
        let result = match behavior {
            Behavior::Ok => Ok(()),
            Behavior::Fail => Err(TransportError::Handshake("scripted open failure".into())),
            Behavior::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        };
        self.opens_in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
    }

    async fn send(&self, _body: String) -> Result<String, TransportError> {
        let n = self.send_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let behavior = self
            .send_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Behavior::Ok);
        match behavior {
            Behavior::Ok => Ok(format!("mock-ack-{n}")),
            Behavior::Fail => Err(TransportError::Endpoint {
                code: 500,
                message: "scripted send failure".into(),
            }),
            Behavior::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }

    fn set_retry_policy(&self, policy: RetryPolicy) {
        self.policies.lock().unwrap().push(policy);
    }

    async fn register_capability(
        &self,
        name: &str,
        _handler: CapabilityHandler,
    ) -> Result<(), RegisterError> {
        self.registered.lock().unwrap().push(name.to_string());
        let outcome = self
            .register_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(RegisterOutcome::Ok);
        match outcome {
            RegisterOutcome::Ok => Ok(()),
            RegisterOutcome::Already => Err(RegisterError::AlreadyRegistered(name.into())),
            RegisterOutcome::Fail => Err(RegisterError::Failed("scripted refusal".into())),
        }
    }

    async fn take_events(&self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.events_rx.lock().await.take()
    }
}

pub struct Harness {
    pub transport: Arc<MockTransport>,
    pub registry: Arc<CapabilityRegistry>,
    pub manager: Arc<ConnectionManager>,
    pub dispatcher: Arc<TelemetryDispatcher>,
}

pub fn echo_handler() -> CapabilityHandler {
    Arc::new(|req| -> HandlerFuture { Box::pin(async move { Ok(InvokeResult::ok(req.payload)) }) })
}

pub fn fast_config() -> ClientConfig {
    ClientConfig {
        telemetry_interval: Duration::from_millis(100),
        send_timeout: Duration::from_millis(500),
        backoff: BackoffConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            backoff_factor: 2.0,
            max_attempts: 2,
        },
    }
}

/// Builds a wired core over a fresh mock, with a `ping` capability and the
/// event pump running.
pub async fn harness() -> Harness {
    let transport = MockTransport::new();
    let registry = Arc::new(CapabilityRegistry::new());
    registry.insert("ping", echo_handler());

    let config = fast_config();
    let manager = Arc::new(ConnectionManager::new(
        transport.clone(),
        registry.clone(),
        &config,
    ));
    manager.start().await;
    let dispatcher = Arc::new(TelemetryDispatcher::new(
        transport.clone(),
        manager.clone(),
        &config,
    ));

    Harness {
        transport,
        registry,
        manager,
        dispatcher,
    }
}

/// Waits until the manager reports the given state.
pub async fn wait_for_state(manager: &ConnectionManager, target: ConnectionState) {
    let mut rx = manager.watch_state();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|state| *state == target))
        .await
        .expect("timed out waiting for state")
        .expect("state watch closed");
}

/// Polls until the condition holds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}
