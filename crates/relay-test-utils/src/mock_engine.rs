//! Mock media engine for relay session testing.
//!
//! Provides an in-memory [`MediaEngine`] that can be configured to:
//! - Fail any engine operation on demand
//! - Hold any engine operation in flight until released (race tests)
//! - Simulate the engine closing a transport on its own
//!
//! Every handle it creates is retained so tests can assert exactly how many
//! times each resource was closed or resumed.
//!
//! # Example
//!
//! ```rust,ignore
//! use relay_test_utils::{MockMediaEngine, MockOperation};
//!
//! let engine = MockMediaEngine::new();
//! engine.set_failure(MockOperation::Produce, true);
//!
//! // Build a RelayService with Arc::new(engine.clone()) and run the test...
//! assert_eq!(engine.transports().len(), 1);
//! ```

use async_trait::async_trait;
use relay_session::config::NetworkConfig;
use relay_session::engine::{
    EngineConsumer, EngineProducer, EngineTransport, MediaEngine, MediaKind,
    TransportCloseNotifier,
};
use relay_session::EngineError;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Engine operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    CreateTransport,
    Connect,
    Produce,
    Consume,
    Resume,
    Close,
}

/// Holds one engine call in flight until released.
#[derive(Debug, Clone, Default)]
pub struct OperationGate {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl OperationGate {
    /// Wait until a call is parked at the gate.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    /// Let the parked call continue.
    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[derive(Debug, Default)]
struct EngineState {
    next_id: AtomicU64,
    failures: Mutex<HashSet<MockOperation>>,
    gate: Mutex<Option<(MockOperation, OperationGate)>>,
    last_network: Mutex<Option<NetworkConfig>>,
    transports: Mutex<Vec<Arc<MockTransport>>>,
    producers: Mutex<Vec<Arc<MockProducer>>>,
    consumers: Mutex<Vec<Arc<MockConsumer>>>,
}

impl EngineState {
    fn next_id(&self, prefix: &str) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{prefix}-{n}")
    }

    /// Park at the gate if it was armed for `operation`.
    async fn pass_gate(&self, operation: MockOperation) {
        let gate = {
            let mut armed = self.gate.lock().unwrap();
            match armed.take() {
                Some((held, gate)) if held == operation => Some(gate),
                other => {
                    *armed = other;
                    None
                }
            }
        };
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
    }

    fn check(&self, operation: MockOperation) -> Result<(), EngineError> {
        if self.failures.lock().unwrap().contains(&operation) {
            Err(EngineError::new(format!("mock {operation:?} failure")))
        } else {
            Ok(())
        }
    }
}

/// In-memory media engine.
#[derive(Debug, Clone, Default)]
pub struct MockMediaEngine {
    state: Arc<EngineState>,
}

impl MockMediaEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `operation` fail (or succeed again) on every subsequent call.
    pub fn set_failure(&self, operation: MockOperation, fail: bool) {
        let mut failures = self.state.failures.lock().unwrap();
        if fail {
            failures.insert(operation);
        } else {
            failures.remove(&operation);
        }
    }

    /// Park the next call of `operation` until the returned gate is released.
    ///
    /// Only one gate is armed at a time; arming another replaces it.
    #[must_use]
    pub fn hold_operation(&self, operation: MockOperation) -> OperationGate {
        let gate = OperationGate::default();
        *self.state.gate.lock().unwrap() = Some((operation, gate.clone()));
        gate
    }

    /// Network config passed to the most recent `create_transport`.
    #[must_use]
    pub fn last_network(&self) -> Option<NetworkConfig> {
        self.state.last_network.lock().unwrap().clone()
    }

    /// Every transport created so far, in creation order.
    #[must_use]
    pub fn transports(&self) -> Vec<Arc<MockTransport>> {
        self.state.transports.lock().unwrap().clone()
    }

    /// Every producer created so far, in creation order.
    #[must_use]
    pub fn producers(&self) -> Vec<Arc<MockProducer>> {
        self.state.producers.lock().unwrap().clone()
    }

    /// Every consumer created so far, in creation order.
    #[must_use]
    pub fn consumers(&self) -> Vec<Arc<MockConsumer>> {
        self.state.consumers.lock().unwrap().clone()
    }

    #[must_use]
    pub fn transport(&self, id: &str) -> Option<Arc<MockTransport>> {
        self.transports().into_iter().find(|t| t.id == id)
    }

    #[must_use]
    pub fn producer(&self, id: &str) -> Option<Arc<MockProducer>> {
        self.producers().into_iter().find(|p| p.id == id)
    }

    #[must_use]
    pub fn consumer(&self, id: &str) -> Option<Arc<MockConsumer>> {
        self.consumers().into_iter().find(|c| c.id == id)
    }

    /// Resources of any type not yet closed.
    #[must_use]
    pub fn open_resource_count(&self) -> usize {
        self.transports().iter().filter(|t| !t.is_closed()).count()
            + self.producers().iter().filter(|p| !p.is_closed()).count()
            + self.consumers().iter().filter(|c| !c.is_closed()).count()
    }
}

#[async_trait]
impl MediaEngine for MockMediaEngine {
    async fn create_transport(
        &self,
        network: &NetworkConfig,
        on_close: TransportCloseNotifier,
    ) -> Result<Arc<dyn EngineTransport>, EngineError> {
        self.state.pass_gate(MockOperation::CreateTransport).await;
        self.state.check(MockOperation::CreateTransport)?;
        *self.state.last_network.lock().unwrap() = Some(network.clone());

        let transport = Arc::new(MockTransport {
            id: self.state.next_id("transport"),
            listen_ip: network.listen_ip.to_string(),
            port: network.rtc_min_port,
            notifier: on_close,
            engine: Arc::clone(&self.state),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            close_count: AtomicU32::new(0),
        });
        self.state
            .transports
            .lock()
            .unwrap()
            .push(Arc::clone(&transport));
        Ok(transport)
    }
}

/// Transport created by [`MockMediaEngine`].
pub struct MockTransport {
    id: String,
    listen_ip: String,
    port: u16,
    notifier: TransportCloseNotifier,
    engine: Arc<EngineState>,
    connected: AtomicBool,
    closed: AtomicBool,
    close_count: AtomicU32,
}

impl MockTransport {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn owner(&self) -> &str {
        self.notifier.peer_id()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of times `close` was called.
    #[must_use]
    pub fn close_count(&self) -> u32 {
        self.close_count.load(Ordering::SeqCst)
    }

    /// Close the transport from the engine side (e.g. ICE failure).
    pub fn simulate_close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.notifier.notify(&self.id);
        }
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("id", &self.id)
            .field("owner", &self.owner())
            .field("connected", &self.is_connected())
            .field("closed", &self.is_closed())
            .field("close_count", &self.close_count())
            .finish()
    }
}

#[async_trait]
impl EngineTransport for MockTransport {
    fn id(&self) -> &str {
        &self.id
    }

    fn ice_parameters(&self) -> Value {
        json!({
            "usernameFragment": format!("ufrag-{}", self.id),
            "password": "mock-password",
            "iceLite": true,
        })
    }

    fn ice_candidates(&self) -> Value {
        json!([{
            "foundation": "udpcandidate",
            "protocol": "udp",
            "ip": self.listen_ip,
            "port": self.port,
            "type": "host",
        }])
    }

    fn dtls_parameters(&self) -> Value {
        json!({
            "role": "auto",
            "fingerprints": [{ "algorithm": "sha-256", "value": "00:11:22" }],
        })
    }

    async fn connect(&self, _dtls_parameters: Value) -> Result<(), EngineError> {
        self.engine.pass_gate(MockOperation::Connect).await;
        self.engine.check(MockOperation::Connect)?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn produce(
        &self,
        kind: MediaKind,
        _rtp_parameters: Value,
    ) -> Result<Arc<dyn EngineProducer>, EngineError> {
        self.engine.pass_gate(MockOperation::Produce).await;
        self.engine.check(MockOperation::Produce)?;
        let producer = Arc::new(MockProducer {
            id: self.engine.next_id("producer"),
            kind,
            transport_id: self.id.clone(),
            close_count: AtomicU32::new(0),
        });
        self.engine
            .producers
            .lock()
            .unwrap()
            .push(Arc::clone(&producer));
        Ok(producer)
    }

    async fn consume(
        &self,
        producer_id: &str,
        _rtp_capabilities: Value,
        paused: bool,
    ) -> Result<Arc<dyn EngineConsumer>, EngineError> {
        self.engine.pass_gate(MockOperation::Consume).await;
        self.engine.check(MockOperation::Consume)?;
        let kind = self
            .engine
            .producers
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.id == producer_id)
            .map_or(MediaKind::Video, |p| p.kind);
        let consumer = Arc::new(MockConsumer {
            id: self.engine.next_id("consumer"),
            producer_id: producer_id.to_string(),
            kind,
            transport_id: self.id.clone(),
            engine: Arc::clone(&self.engine),
            paused: AtomicBool::new(paused),
            resume_count: AtomicU32::new(0),
            close_count: AtomicU32::new(0),
        });
        self.engine
            .consumers
            .lock()
            .unwrap()
            .push(Arc::clone(&consumer));
        Ok(consumer)
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        self.engine.check(MockOperation::Close)?;
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.notifier.notify(&self.id);
        }
        Ok(())
    }
}

/// Producer created by [`MockTransport`].
#[derive(Debug)]
pub struct MockProducer {
    id: String,
    kind: MediaKind,
    transport_id: String,
    close_count: AtomicU32,
}

impl MockProducer {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn transport_id(&self) -> &str {
        &self.transport_id
    }

    #[must_use]
    pub fn close_count(&self) -> u32 {
        self.close_count.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.close_count() > 0
    }
}

#[async_trait]
impl EngineProducer for MockProducer {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Consumer created by [`MockTransport`].
pub struct MockConsumer {
    id: String,
    producer_id: String,
    kind: MediaKind,
    transport_id: String,
    engine: Arc<EngineState>,
    paused: AtomicBool,
    resume_count: AtomicU32,
    close_count: AtomicU32,
}

impl MockConsumer {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn transport_id(&self) -> &str {
        &self.transport_id
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn resume_count(&self) -> u32 {
        self.resume_count.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn close_count(&self) -> u32 {
        self.close_count.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.close_count() > 0
    }
}

impl std::fmt::Debug for MockConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockConsumer")
            .field("id", &self.id)
            .field("producer_id", &self.producer_id)
            .field("kind", &self.kind)
            .field("paused", &self.is_paused())
            .field("close_count", &self.close_count())
            .finish()
    }
}

#[async_trait]
impl EngineConsumer for MockConsumer {
    fn id(&self) -> &str {
        &self.id
    }

    fn producer_id(&self) -> &str {
        &self.producer_id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn rtp_parameters(&self) -> Value {
        json!({
            "mid": self.id,
            "codecs": [{ "mimeType": format!("{}/mock", self.kind), "payloadType": 100 }],
        })
    }

    async fn resume(&self) -> Result<(), EngineError> {
        self.engine.pass_gate(MockOperation::Resume).await;
        self.engine.check(MockOperation::Resume)?;
        self.resume_count.fetch_add(1, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_failure_injection() {
        let engine = MockMediaEngine::new();
        engine.set_failure(MockOperation::CreateTransport, true);

        let (tx, _rx) = mpsc::unbounded_channel();
        let notifier = TransportCloseNotifier::new("peer-1".to_string(), tx);
        let result = engine
            .create_transport(&NetworkConfig::default(), notifier.clone())
            .await;
        assert!(result.is_err());

        engine.set_failure(MockOperation::CreateTransport, false);
        let transport = engine
            .create_transport(&NetworkConfig::default(), notifier)
            .await
            .unwrap();
        assert_eq!(transport.id(), "transport-1");
        assert_eq!(engine.transports().len(), 1);
    }

    #[tokio::test]
    async fn test_gate_holds_only_the_chosen_operation() {
        let engine = MockMediaEngine::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let notifier = TransportCloseNotifier::new("peer-1".to_string(), tx);
        let gate = engine.hold_operation(MockOperation::Produce);

        // Not held: the gate is armed for produce.
        let transport = engine
            .create_transport(&NetworkConfig::default(), notifier)
            .await
            .unwrap();

        let producing = tokio::spawn({
            let transport = Arc::clone(&transport);
            async move { transport.produce(MediaKind::Audio, json!({})).await }
        });
        gate.wait_entered().await;
        assert!(engine.producers().is_empty());

        gate.release();
        producing.await.unwrap().unwrap();
        assert_eq!(engine.producers().len(), 1);
    }

    #[tokio::test]
    async fn test_close_notifies_once() {
        let engine = MockMediaEngine::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let notifier = TransportCloseNotifier::new("peer-1".to_string(), tx);
        let transport = engine
            .create_transport(&NetworkConfig::default(), notifier)
            .await
            .unwrap();

        transport.close().await.unwrap();
        transport.close().await.unwrap();

        let mock = engine.transport(transport.id()).unwrap();
        assert_eq!(mock.close_count(), 2);
        assert_eq!(rx.recv().await.unwrap().transport_id, "transport-1");
        assert!(rx.try_recv().is_err());
    }
}
