//! Shared participants and engine wiring for the engine integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use txweave_core::{BranchCall, BranchOp, Gid, GlobalStatus, RawResponse, RetryPolicy, TransportError};
use txweave_engine::{Engine, EngineConfig, SchedulerConfig};
use txweave_infra::{InMemoryTransStore, InProcessTransport, TransStore};

pub type Reply = Result<RawResponse, TransportError>;

pub fn ok() -> Reply {
    Ok(RawResponse::success())
}

pub fn fail() -> Reply {
    Ok(RawResponse::failure())
}

pub fn ongoing() -> Reply {
    Ok(RawResponse::ongoing())
}

pub fn unreachable() -> Reply {
    Err(TransportError::Connect("connection refused".into()))
}

/// In-process participants answering from per-endpoint scripts.
///
/// Each endpoint pops its next scripted reply; once the script is exhausted
/// it keeps answering with its fallback (success unless set otherwise).
#[derive(Clone, Default)]
pub struct Participants {
    transport: InProcessTransport,
    calls: Arc<Mutex<Vec<(String, BranchOp)>>>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl Participants {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transport(&self) -> InProcessTransport {
        self.transport.clone()
    }

    pub fn script(&self, endpoint: &str, replies: Vec<Reply>) -> &Self {
        self.script_with_fallback(endpoint, replies, ok)
    }

    pub fn always(&self, endpoint: &str, reply: fn() -> Reply) -> &Self {
        self.script_with_fallback(endpoint, Vec::new(), reply)
    }

    pub fn script_with_fallback(
        &self,
        endpoint: &str,
        replies: Vec<Reply>,
        fallback: fn() -> Reply,
    ) -> &Self {
        let queue = Arc::new(Mutex::new(VecDeque::from(replies)));
        let calls = self.calls.clone();
        self.transport.route(endpoint, move |call: BranchCall| {
            let queue = queue.clone();
            let calls = calls.clone();
            async move {
                calls.lock().unwrap().push((call.endpoint.clone(), call.op));
                let next = queue.lock().unwrap().pop_front();
                next.unwrap_or_else(fallback)
            }
        });
        self
    }

    /// Answer success after `delay`, tracking how many slow calls overlap.
    pub fn slow(&self, endpoint: &str, delay: Duration) -> &Self {
        let calls = self.calls.clone();
        let in_flight = self.in_flight.clone();
        let peak = self.peak.clone();
        self.transport.route(endpoint, move |call: BranchCall| {
            let calls = calls.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                calls.lock().unwrap().push((call.endpoint.clone(), call.op));
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                ok()
            }
        });
        self
    }

    /// Most slow calls seen running at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Endpoints in the order they were called.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(endpoint, _)| endpoint.clone())
            .collect()
    }

    pub fn ops(&self) -> Vec<(String, BranchOp)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, endpoint: &str) -> usize {
        self.calls().iter().filter(|e| *e == endpoint).count()
    }

    pub fn call_counts(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for endpoint in self.calls() {
            *counts.entry(endpoint).or_insert(0) += 1;
        }
        counts
    }
}

pub fn fast_config() -> EngineConfig {
    EngineConfig::default()
        .with_retry(RetryPolicy::fixed(Duration::from_millis(10)))
        .with_request_timeout(Duration::from_secs(2))
        .with_wait_timeout(Duration::from_secs(5))
        .with_wait_poll_interval(Duration::from_millis(5))
}

pub fn scheduler_config() -> SchedulerConfig {
    SchedulerConfig::default()
        .with_name("test-scheduler")
        .with_poll_interval(Duration::from_millis(10))
}

pub fn engine(participants: &Participants) -> Engine {
    engine_with(participants, fast_config())
}

pub fn engine_with(participants: &Participants, config: EngineConfig) -> Engine {
    let store: Arc<dyn TransStore> = InMemoryTransStore::arc();
    Engine::new(store, Arc::new(participants.transport()), config).expect("valid engine config")
}

pub fn gid(name: &str) -> Gid {
    Gid::new(name).unwrap()
}

/// Poll until the transaction reaches `status`.
pub async fn wait_for_status(engine: &Engine, gid: &Gid, status: GlobalStatus) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let current = engine.query(gid).await.unwrap().transaction.status;
        if current == status {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "{gid} stayed {current}, expected {status}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
