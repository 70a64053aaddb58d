//! The async crawl driver.
//!
//! The driver owns the orchestrator and is the only place that touches it,
//! so task state is never shared between workers. Fetches run concurrently
//! in a `JoinSet`; each completion is fed back to the orchestrator and the
//! resulting actions are applied before the next completion is taken.
//! A fetch task that panics is reported to the orchestrator as a transient
//! failure of its request, so only that node's round is affected.

use crate::error::CrawlError;
use crate::fetcher::Fetcher;
use crate::orchestrator::{Action, Orchestrator};
use crate::records::{Record, RecordSink};
use crate::request::FetchRequest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinSet};
use tracing::{debug, error, info};
use ttr_core::{Edge, FetchError};
use uuid::Uuid;

/// Default bound on fetches in flight.
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 8;

type Outcome = Result<Vec<Edge>, FetchError>;

/// Fetches in flight, with the request each task is serving.
#[derive(Default)]
struct InFlight {
    tasks: JoinSet<Outcome>,
    requests: HashMap<Id, FetchRequest>,
}

impl InFlight {
    /// Waits for the next fetch to finish. A task that did not run to
    /// completion yields a transient failure for its request.
    async fn next(&mut self) -> Option<(Option<FetchRequest>, Outcome)> {
        let joined = self.tasks.join_next_with_id().await?;
        Some(match joined {
            Ok((id, outcome)) => (self.requests.remove(&id), outcome),
            Err(e) => {
                error!("Fetch task failed: {}", e);
                let failure = FetchError::Transient(format!("fetch task failed: {}", e));
                (self.requests.remove(&e.id()), Err(failure))
            }
        })
    }
}
type Observer = Box<dyn FnMut(&CrawlSummary) + Send>;

/// Counters for one crawl run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub fetches: usize,
    pub failed_fetches: usize,
    pub confirmed_edges: usize,
    pub snapshots: usize,
    pub tasks_finished: usize,
    pub nodes_resolved: usize,
    pub nodes_fused: usize,
}

impl CrawlSummary {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            fetches: 0,
            failed_fetches: 0,
            confirmed_edges: 0,
            snapshots: 0,
            tasks_finished: 0,
            nodes_resolved: 0,
            nodes_fused: 0,
        }
    }

    fn observe(&mut self, record: &Record) {
        match record {
            Record::ConfirmedEdge { .. } => self.confirmed_edges += 1,
            Record::Importance { .. } => self.snapshots += 1,
            Record::Finished {
                resolved, fused, ..
            } => {
                self.tasks_finished += 1;
                self.nodes_resolved += resolved;
                self.nodes_fused += fused;
            }
        }
    }
}

/// Runs accepted jobs to completion against a fetcher.
pub struct Crawler<F> {
    fetcher: Arc<F>,
    orchestrator: Orchestrator,
    limit: Arc<Semaphore>,
    run_id: Uuid,
    observer: Option<Observer>,
}

impl<F: Fetcher + 'static> Crawler<F> {
    pub fn new(fetcher: F, orchestrator: Orchestrator) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            orchestrator,
            limit: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT_REQUESTS)),
            run_id: Uuid::new_v4(),
            observer: None,
        }
    }

    pub fn with_max_concurrent_requests(mut self, max: usize) -> Self {
        self.limit = Arc::new(Semaphore::new(max.max(1)));
        self
    }

    /// Called with the running totals after every fetch completes.
    pub fn with_observer(mut self, observer: impl FnMut(&CrawlSummary) + Send + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Crawls until no fetch is in flight, writing every record to `sink`.
    pub async fn run<S: RecordSink>(mut self, sink: &mut S) -> Result<CrawlSummary, CrawlError> {
        info!("Starting crawl {}", self.run_id);
        let mut summary = CrawlSummary::new(self.run_id);
        let mut in_flight = InFlight::default();

        let actions = self.orchestrator.bootstrap();
        self.apply(actions, &mut in_flight, sink, &mut summary)?;

        while let Some((request, outcome)) = in_flight.next().await {
            let Some(request) = request else {
                error!("Dropping the outcome of an untracked fetch task");
                continue;
            };
            summary.fetches += 1;
            if outcome.is_err() {
                summary.failed_fetches += 1;
            }

            let actions = self.orchestrator.on_outcome(request, outcome);
            self.apply(actions, &mut in_flight, sink, &mut summary)?;
            if let Some(observer) = self.observer.as_mut() {
                observer(&summary);
            }
        }

        sink.flush()?;
        info!(
            "Crawl {} done: {} fetches, {} edges, {} tasks",
            self.run_id, summary.fetches, summary.confirmed_edges, summary.tasks_finished
        );
        Ok(summary)
    }

    fn apply<S: RecordSink>(
        &self,
        actions: Vec<Action>,
        in_flight: &mut InFlight,
        sink: &mut S,
        summary: &mut CrawlSummary,
    ) -> Result<(), CrawlError> {
        for action in actions {
            match action {
                Action::Dispatch { request, delay } => self.spawn(request, delay, in_flight),
                Action::Emit(record) => {
                    summary.observe(&record);
                    sink.write(&record)?;
                }
            }
        }
        Ok(())
    }

    fn spawn(&self, request: FetchRequest, delay: std::time::Duration, in_flight: &mut InFlight) {
        let fetcher = Arc::clone(&self.fetcher);
        let limit = Arc::clone(&self.limit);
        let task = request.clone();
        let handle = in_flight.tasks.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match limit.acquire_owned().await {
                Ok(_permit) => {
                    debug!("Dispatching {}", task);
                    fetcher.fetch(&task).await
                }
                Err(_) => Err(FetchError::Transient("request limiter closed".to_string())),
            }
        });
        in_flight.requests.insert(handle.id(), request);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::MemorySink;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use ttr_core::{Address, JobSpec, TxType, TxTypeList};

    const A: &str = "0xaaaa000000000000000000000000000000000001";
    const B: &str = "0xbbbb000000000000000000000000000000000002";
    const C: &str = "0xcccc000000000000000000000000000000000003";
    const D: &str = "0xdddd000000000000000000000000000000000004";

    type Script = HashMap<(Address, TxType), VecDeque<Result<Vec<Edge>, FetchError>>>;

    /// Answers from a per node and type queue; an exhausted queue answers
    /// with no edges.
    #[derive(Default)]
    struct ScriptedFetcher {
        script: Mutex<Script>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedFetcher {
        fn answer(self, node: &str, tx_type: TxType, outcome: Result<Vec<Edge>, FetchError>) -> Self {
            self.script
                .lock()
                .unwrap()
                .entry((Address::new(node), tx_type))
                .or_default()
                .push_back(outcome);
            self
        }
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Edge>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let next = self
                .script
                .lock()
                .unwrap()
                .get_mut(&(request.node.clone(), request.tx_type))
                .and_then(VecDeque::pop_front);
            let edges = next.unwrap_or(Ok(Vec::new()))?;
            Ok(edges
                .into_iter()
                .filter(|edge| request.range.contains(edge.block_number))
                .collect())
        }
    }

    fn edge(hash: &str, from: &str, to: &str, value: f64) -> Edge {
        Edge::new(hash, TxType::External, from, to, value).at_block(150, 1_500)
    }

    fn job(strategy: &str) -> JobSpec {
        let mut spec = JobSpec::for_source(A);
        spec.strategy = Some(strategy.to_string());
        spec.start_block = Some(100);
        spec.end_block = Some(200);
        spec
    }

    fn orchestrator(specs: Vec<JobSpec>) -> Orchestrator {
        let mut orchestrator = Orchestrator::new().with_rate_limit_delay(Duration::from_millis(1));
        orchestrator.accept(specs).unwrap();
        orchestrator
    }

    #[tokio::test]
    async fn test_crawl_runs_to_completion() {
        let fetcher = ScriptedFetcher::default()
            .answer(A, TxType::External, Ok(vec![edge("0x1", A, B, 10.0), edge("0x2", A, C, 30.0)]))
            .answer(C, TxType::External, Ok(vec![edge("0x3", C, B, 1.0)]));

        let mut sink = MemorySink::new();
        let summary = Crawler::new(fetcher, orchestrator(vec![job("base")]))
            .run(&mut sink)
            .await
            .unwrap();

        assert_eq!(summary.tasks_finished, 1);
        assert_eq!(summary.confirmed_edges, 3);
        assert_eq!(summary.nodes_fused, 0);
        assert_eq!(sink.finished().count(), 1);

        let last = sink.snapshots().last().unwrap();
        assert_eq!(last[0].0, Address::new(A));
        assert!((last[0].1 - 0.7).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_failures_recover_or_fuse() {
        let fetcher = ScriptedFetcher::default()
            .answer(A, TxType::External, Err(FetchError::RateLimited("rate limit".into())))
            .answer(A, TxType::External, Err(FetchError::QueryTooLarge("query timeout".into())))
            .answer(A, TxType::External, Ok(vec![edge("0x1", A, D, 1.0)]))
            .answer(A, TxType::External, Ok(vec![edge("0x1", A, D, 1.0)]))
            .answer(D, TxType::External, Err(FetchError::Transient("busy".into())))
            .answer(D, TxType::External, Err(FetchError::Transient("busy".into())))
            .answer(D, TxType::External, Err(FetchError::Transient("busy".into())));

        let mut sink = MemorySink::new();
        let summary = Crawler::new(fetcher, orchestrator(vec![job("base")]))
            .run(&mut sink)
            .await
            .unwrap();

        assert_eq!(summary.nodes_resolved, 1);
        assert_eq!(summary.nodes_fused, 1);
        assert_eq!(summary.confirmed_edges, 1);
        assert!(sink.confirmed_edges().all(|edge| edge.from != Address::new(D)));
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let types = "external,internal,erc20,erc721";
        let specs: Vec<JobSpec> = (0..4)
            .map(|_| {
                let mut spec = job("weight");
                spec.tx_types = Some(TxTypeList::Joined(types.to_string()));
                spec
            })
            .collect();

        let fetcher = Arc::new(ScriptedFetcher::default());
        let mut sink = MemorySink::new();
        let summary = Crawler::new(Arc::clone(&fetcher), orchestrator(specs))
            .with_max_concurrent_requests(3)
            .run(&mut sink)
            .await
            .unwrap();

        assert_eq!(summary.tasks_finished, 4);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 16);
        assert!(fetcher.max_in_flight.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_observer_sees_every_fetch() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);

        let mut sink = MemorySink::new();
        let summary = Crawler::new(ScriptedFetcher::default(), orchestrator(vec![job("time")]))
            .with_observer(move |summary| counter.store(summary.fetches, Ordering::SeqCst))
            .run(&mut sink)
            .await
            .unwrap();

        assert_eq!(summary.fetches, 1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    /// Panics whenever it is asked about `node`.
    struct PanickingFetcher {
        inner: ScriptedFetcher,
        node: Address,
    }

    #[async_trait]
    impl Fetcher for PanickingFetcher {
        async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Edge>, FetchError> {
            if request.node == self.node {
                panic!("fetcher bug for {}", request.node);
            }
            self.inner.fetch(request).await
        }
    }

    #[tokio::test]
    async fn test_panicking_fetch_only_fuses_its_node() {
        let fetcher = PanickingFetcher {
            inner: ScriptedFetcher::default()
                .answer(A, TxType::External, Ok(vec![edge("0x1", A, B, 10.0), edge("0x2", A, D, 30.0)])),
            node: Address::new(D),
        };

        let mut sink = MemorySink::new();
        let summary = Crawler::new(fetcher, orchestrator(vec![job("base")]))
            .run(&mut sink)
            .await
            .unwrap();

        assert_eq!(summary.tasks_finished, 1);
        assert_eq!(summary.nodes_fused, 1);
        assert_eq!(summary.nodes_resolved, 2);
        // The first attempt and two retries.
        assert_eq!(summary.failed_fetches, 3);
        assert_eq!(summary.confirmed_edges, 2);
    }
}
