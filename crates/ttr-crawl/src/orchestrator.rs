//! Crawl orchestration.
//!
//! The orchestrator turns jobs into fetch requests and decides what
//! happens when each fetch resolves. It never performs I/O: every reaction
//! is a list of [`Action`]s for the driver to carry out, which keeps the
//! recovery logic deterministic for a given sequence of outcomes.
//!
//! | outcome                          | reaction                                  |
//! |----------------------------------|-------------------------------------------|
//! | edges, full page, auto-paginate  | await one more, fetch the rest of range   |
//! | edges                            | resolve; push once the round is complete  |
//! | oversized / query too large      | await one more, fetch both half-ranges    |
//! | rate limited                     | same request again after a delay          |
//! | transient / malformed            | retry until the budget runs out           |
//! | unsplittable or budget exhausted | mark the round failed and resolve         |
//!
//! A failed round is fused instead of pushed, so none of its edges are
//! confirmed.

use crate::error::CrawlError;
use crate::records::{JobInfo, Record};
use crate::request::FetchRequest;
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use ttr_core::{Address, Edge, EdgeKey, FetchError, JobSpec, StrategyKind, TxType};
use ttr_graph::{ExplorationTask, FrontierItem, PriceOracle, TaskId};

/// Default pause before re-sending a rate-limited fetch.
const DEFAULT_RATE_LIMIT_DELAY: Duration = Duration::from_millis(250);

/// What the driver should do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Issue a fetch, after `delay` if it is non-zero.
    Dispatch {
        request: FetchRequest,
        delay: Duration,
    },
    /// Hand a record to the sink.
    Emit(Record),
}

impl Action {
    fn dispatch(request: FetchRequest) -> Self {
        Action::Dispatch {
            request,
            delay: Duration::ZERO,
        }
    }
}

/// Fetch results collected for the node a task is resolving.
#[derive(Debug)]
struct NodeRound {
    node: Address,
    /// Edges per transaction type, in the job's type order.
    edges: Vec<(TxType, Vec<Edge>)>,
    seen: HashSet<EdgeKey>,
    failed: bool,
}

impl NodeRound {
    fn new(node: Address, tx_types: &[TxType]) -> Self {
        Self {
            node,
            edges: tx_types.iter().map(|t| (*t, Vec::new())).collect(),
            seen: HashSet::new(),
            failed: false,
        }
    }

    /// Adds edges, dropping ones already seen for this node.
    fn collect(&mut self, tx_type: TxType, edges: Vec<Edge>) {
        let Some((_, bucket)) = self.edges.iter_mut().find(|(t, _)| *t == tx_type) else {
            warn!("Dropping {} edges of unrequested type {}", edges.len(), tx_type);
            return;
        };
        for edge in edges {
            if self.seen.insert(edge.key()) {
                bucket.push(edge);
            }
        }
    }

    /// The assembled edge set. Within a type, edges are ordered by block
    /// and identity so that split fetches completing in any order give the
    /// same push.
    fn into_edges(self) -> Vec<Edge> {
        self.edges
            .into_iter()
            .flat_map(|(_, mut edges)| {
                edges.sort_by(|a, b| {
                    a.block_number
                        .cmp(&b.block_number)
                        .then_with(|| a.key().cmp(&b.key()))
                });
                edges
            })
            .collect()
    }
}

/// A task in the Job Map together with its crawl bookkeeping.
struct TaskEntry {
    task: ExplorationTask,
    info: JobInfo,
    round: Option<NodeRound>,
}

/// Result of handling one outcome for a task.
struct Reaction {
    actions: Vec<Action>,
    finished: bool,
}

impl Reaction {
    fn continuing(actions: Vec<Action>) -> Self {
        Self {
            actions,
            finished: false,
        }
    }
}

impl TaskEntry {
    /// Opens a round for `item` and dispatches one fetch per type.
    fn start_round(&mut self, item: FrontierItem) -> Vec<Action> {
        let job = self.task.job();
        info!(
            "Task {} expanding {} (residual {:.6})",
            self.info.task, item.node, item.residual
        );

        let actions = job
            .tx_types
            .iter()
            .map(|tx_type| {
                Action::dispatch(FetchRequest::new(
                    self.info.task,
                    item.node.clone(),
                    *tx_type,
                    job.range,
                    item.residual,
                ))
            })
            .collect();
        self.round = Some(NodeRound::new(item.node, &job.tx_types));
        self.task.await_all();
        actions
    }

    /// Whether the round is already going to be fused, so further work on
    /// its fetches would be discarded.
    fn round_failed(&self) -> bool {
        self.round.as_ref().is_some_and(|round| round.failed)
    }

    fn on_edges(&mut self, request: FetchRequest, edges: Vec<Edge>) -> Reaction {
        debug!("{} returned {} edges", request, edges.len());
        if self.round_failed() {
            debug!("Discarding {} edges of a failed round", edges.len());
            return self.resolve_one();
        }
        let job = self.task.job();
        let (page_threshold, auto_paginate) = (job.page_threshold, job.auto_paginate);

        let mut actions = Vec::new();
        if edges.len() >= page_threshold {
            let last_block = edges.iter().map(|e| e.block_number).max().unwrap_or(0);
            match request.range.advance_to(last_block) {
                Some(rest) if auto_paginate => {
                    info!("Paginating {} from block {}", request, rest.start);
                    self.task.await_more(1);
                    actions.push(Action::dispatch(request.with_range(rest)));
                }
                Some(_) => warn!(
                    "{} returned a full page and auto-pagination is off; results may be truncated",
                    request
                ),
                None => warn!(
                    "{} returned a full page within one block; results may be truncated",
                    request
                ),
            }
        }

        if let Some(round) = self.round.as_mut() {
            round.collect(request.tx_type, edges);
        }
        let mut reaction = self.resolve_one();
        actions.append(&mut reaction.actions);
        reaction.actions = actions;
        reaction
    }

    fn on_failure(
        &mut self,
        request: FetchRequest,
        failure: FetchError,
        rate_limit_delay: Duration,
    ) -> Reaction {
        if self.round_failed() {
            debug!("Not recovering {} for a failed round: {}", request, failure);
            return self.resolve_one();
        }

        if failure.needs_split() {
            return match request.range.bisect() {
                Some((lower, upper)) => {
                    info!("Splitting {} after: {}", request, failure);
                    self.task.await_more(1);
                    Reaction::continuing(vec![
                        Action::dispatch(request.with_range(lower)),
                        Action::dispatch(request.with_range(upper)),
                    ])
                }
                None => self.fail_permanently(request, failure),
            };
        }

        if !failure.counts_against_budget() {
            warn!("Rate limited on {}, retrying in {:?}", request, rate_limit_delay);
            return Reaction::continuing(vec![Action::Dispatch {
                request,
                delay: rate_limit_delay,
            }]);
        }

        if request.retry < self.task.job().max_retry {
            warn!(
                "Retrying {} ({}/{}) after: {}",
                request,
                request.retry + 1,
                self.task.job().max_retry,
                failure
            );
            return Reaction::continuing(vec![Action::dispatch(request.retried())]);
        }
        self.fail_permanently(request, failure)
    }

    fn fail_permanently(&mut self, request: FetchRequest, failure: FetchError) -> Reaction {
        error!("Giving up on {}: {}", request, failure);
        if let Some(round) = self.round.as_mut() {
            round.failed = true;
        }
        self.resolve_one()
    }

    /// Records one terminal fetch outcome and settles the round when it
    /// was the last one outstanding.
    fn resolve_one(&mut self) -> Reaction {
        match self.task.resolve() {
            Ok(0) => self.settle_round(),
            Ok(_) => Reaction::continuing(Vec::new()),
            Err(e) => {
                warn!("{}", e);
                Reaction::continuing(Vec::new())
            }
        }
    }

    fn settle_round(&mut self) -> Reaction {
        let Some(round) = self.round.take() else {
            return Reaction::continuing(Vec::new());
        };

        let mut actions = Vec::new();
        let next = if round.failed {
            error!("Task {} fusing {}", self.info.task, round.node);
            self.task.fuse(&round.node)
        } else {
            let node = round.node.clone();
            match self.task.push(&node, round.into_edges()) {
                Ok(confirmed) => {
                    debug!("Task {} settled {} with {} edges", self.info.task, node, confirmed.len());
                    actions.extend(confirmed.into_iter().map(|edge| {
                        Action::Emit(Record::ConfirmedEdge {
                            job: self.info.clone(),
                            edge,
                        })
                    }));
                    if !self.task.is_locked() {
                        actions.push(Action::Emit(self.snapshot()));
                    }
                }
                Err(e) => error!("{}", e),
            }
            self.task.pop()
        };

        match next {
            Some(item) => {
                actions.extend(self.start_round(item));
                Reaction::continuing(actions)
            }
            None => {
                let strategy = self.task.strategy();
                let fused = strategy.fused_count();
                let resolved = strategy.selected_count() - fused;
                info!(
                    "Task {} finished: {} resolved, {} fused",
                    self.info.task, resolved, fused
                );
                actions.push(Action::Emit(Record::Finished {
                    job: self.info.clone(),
                    resolved,
                    fused,
                    settled_mass: strategy.settled_mass(),
                }));
                Reaction {
                    actions,
                    finished: true,
                }
            }
        }
    }

    fn snapshot(&self) -> Record {
        Record::Importance {
            job: self.info.clone(),
            importance: self.task.strategy().ranked(),
            emitted_at: Utc::now(),
        }
    }
}

/// Owns the Job Map and reacts to fetch outcomes.
pub struct Orchestrator {
    tasks: BTreeMap<TaskId, TaskEntry>,
    next_id: TaskId,
    oracle: Option<Arc<dyn PriceOracle>>,
    rate_limit_delay: Duration,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Orchestrator {
    pub fn new() -> Self {
        Self {
            tasks: BTreeMap::new(),
            next_id: 0,
            oracle: None,
            rate_limit_delay: DEFAULT_RATE_LIMIT_DELAY,
        }
    }

    /// Price source for jobs using the price strategy.
    pub fn with_price_oracle(mut self, oracle: Arc<dyn PriceOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn with_rate_limit_delay(mut self, delay: Duration) -> Self {
        self.rate_limit_delay = delay;
        self
    }

    /// Validates every job, then creates one task per job.
    ///
    /// Nothing is added unless all jobs are valid.
    pub fn accept(&mut self, specs: Vec<JobSpec>) -> Result<Vec<TaskId>, CrawlError> {
        let jobs = specs
            .into_iter()
            .enumerate()
            .map(|(index, spec)| {
                let job = spec
                    .validate()
                    .map_err(|source| CrawlError::Job { index, source })?;
                if job.strategy == StrategyKind::Price && self.oracle.is_none() {
                    return Err(CrawlError::MissingPriceOracle(job.source));
                }
                Ok(job)
            })
            .collect::<Result<Vec<_>, CrawlError>>()?;

        let mut ids = Vec::with_capacity(jobs.len());
        for job in jobs {
            let id = self.next_id;
            self.next_id += 1;

            let info = JobInfo::new(id, job.clone());
            let mut task = ExplorationTask::new(id, job);
            if let Some(oracle) = &self.oracle {
                task = task.with_price_oracle(Arc::clone(oracle));
            }
            info!(
                "Accepted task {} for {} ({})",
                id,
                info.job.source,
                info.job.strategy.as_str()
            );
            self.tasks.insert(
                id,
                TaskEntry {
                    task,
                    info,
                    round: None,
                },
            );
            ids.push(id);
        }
        Ok(ids)
    }

    /// Seeds every task that has not started yet and returns the first
    /// round of fetches.
    pub fn bootstrap(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        for entry in self.tasks.values_mut() {
            if entry.round.is_some() || entry.task.strategy().selected_count() > 0 {
                continue;
            }
            let seed = entry.task.seed();
            actions.extend(entry.start_round(seed));
        }
        actions
    }

    /// Reacts to one resolved fetch.
    pub fn on_outcome(
        &mut self,
        request: FetchRequest,
        outcome: Result<Vec<Edge>, FetchError>,
    ) -> Vec<Action> {
        let task_id = request.task;
        let Some(entry) = self.tasks.get_mut(&task_id) else {
            warn!("Ignoring outcome for unknown task: {}", request);
            return Vec::new();
        };
        let current = entry.round.as_ref().map(|round| &round.node);
        if current != Some(&request.node) {
            warn!("Ignoring outcome for a node no longer being resolved: {}", request);
            return Vec::new();
        }

        let reaction = match outcome {
            Ok(edges) => entry.on_edges(request, edges),
            Err(failure) => entry.on_failure(request, failure, self.rate_limit_delay),
        };
        if reaction.finished {
            self.tasks.remove(&task_id);
        }
        reaction.actions
    }

    /// Whether any task is still exploring.
    pub fn is_idle(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn active_tasks(&self) -> usize {
        self.tasks.len()
    }

    pub fn task(&self, id: TaskId) -> Option<&ExplorationTask> {
        self.tasks.get(&id).map(|entry| &entry.task)
    }
}
