//! Distributed execution over task, result and cache channels.
//!
//! A pool either owns a [`Broker`] (optionally exposed to remote workers
//! by a [`Manager`]) or connects to a remote manager. In both cases it
//! may run worker threads of its own.

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::broker::Broker;
use crate::channel::Channels;
use crate::error::{ParallelError, Result};
use crate::executor::CancelToken;
use crate::protocol::{CacheKey, JobId, TaskEnvelope};
use crate::remote::{Manager, RemoteChannels};
use crate::task::{FunctionRegistry, Task, TaskFailure, TaskOutcome};
use crate::worker::{Supervisor, SupervisorStats};

/// Settings of the distributed mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributedConfig {
    /// Worker threads started in this process.
    pub workers: usize,
    /// Address to accept remote workers on (own broker only).
    pub listen: Option<String>,
    /// Address of a remote manager to use instead of an own broker.
    pub connect: Option<String>,
    /// Secret every connection must present.
    pub secret: String,
    /// Bound on connecting and on each request, in milliseconds.
    pub connect_timeout_ms: u64,
    /// How long an idle worker waits for a task before re-checking for
    /// shutdown, in milliseconds.
    pub poll_interval_ms: u64,
    /// Longest time without any result before the remaining tasks of a
    /// job are failed, in milliseconds.
    pub result_timeout_ms: u64,
}

impl Default for DistributedConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism().map_or(1, usize::from),
            listen: None,
            connect: None,
            secret: String::new(),
            connect_timeout_ms: 5_000,
            poll_interval_ms: 100,
            result_timeout_ms: 600_000,
        }
    }
}

impl DistributedConfig {
    /// Check the settings without opening anything.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(ParallelError::InvalidConfig(msg.to_string()));
        if self.secret.is_empty() {
            return invalid("distributed mode needs a non-empty secret");
        }
        if self.listen.is_some() && self.connect.is_some() {
            return invalid("listen and connect are mutually exclusive");
        }
        if self.workers == 0 && self.listen.is_none() && self.connect.is_none() {
            return invalid("no workers and no remote workers can attach");
        }
        if self.connect_timeout_ms == 0 || self.poll_interval_ms == 0 || self.result_timeout_ms == 0
        {
            return invalid("timeouts must be positive");
        }
        Ok(())
    }

    fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Settings of a standalone manager process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Address to accept workers and clients on.
    pub listen: String,
    /// Secret every connection must present.
    pub secret: String,
    /// Worker threads started next to the manager.
    pub workers: usize,
    /// Idle worker poll interval, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:7878".into(),
            secret: String::new(),
            workers: 0,
            poll_interval_ms: 100,
        }
    }
}

impl ManagerConfig {
    /// Check the settings without binding anything.
    pub fn validate(&self) -> Result<()> {
        self.to_distributed().validate()?;
        if self.listen.is_empty() {
            return Err(ParallelError::InvalidConfig("listen address is empty".into()));
        }
        Ok(())
    }

    fn to_distributed(&self) -> DistributedConfig {
        DistributedConfig {
            workers: self.workers,
            listen: Some(self.listen.clone()),
            connect: None,
            secret: self.secret.clone(),
            poll_interval_ms: self.poll_interval_ms,
            ..DistributedConfig::default()
        }
    }
}

/// Distributed executor backend.
pub struct DistributedPool {
    channels: Channels,
    // Workers stop before the manager and broker go away.
    supervisor: Option<Supervisor>,
    manager: Option<Manager>,
    broker: Option<Arc<Broker>>,
    poll_interval: Duration,
    result_timeout: Duration,
}

impl DistributedPool {
    /// Start a pool as `config` describes.
    ///
    /// With `connect` set the pool talks to that manager; otherwise it owns
    /// a broker and, with `listen` set, serves it to remote workers.
    pub fn start(config: &DistributedConfig, registry: Arc<FunctionRegistry>) -> Result<Self> {
        config.validate()?;
        let poll = config.poll_interval();

        let (channels, manager, broker) = match &config.connect {
            Some(addr) => {
                let remote = RemoteChannels::connect(addr, &config.secret, config.connect_timeout())?;
                (Channels::from_shared(Arc::new(remote)), None, None)
            }
            None => {
                let broker = Broker::new()?;
                let manager = match &config.listen {
                    Some(addr) => Some(Manager::start(addr, config.secret.clone(), broker.clone())?),
                    None => None,
                };
                (Channels::from_shared(broker.clone()), manager, Some(broker))
            }
        };

        let supervisor = if config.workers == 0 {
            None
        } else {
            let supervisor = match (&config.connect, &broker) {
                (Some(addr), _) => {
                    let (addr, secret, timeout) =
                        (addr.clone(), config.secret.clone(), config.connect_timeout());
                    Supervisor::start(config.workers, registry, poll, move || {
                        let remote = RemoteChannels::connect(&addr, &secret, timeout)?;
                        Ok(Channels::from_shared(Arc::new(remote)))
                    })?
                }
                (None, Some(broker)) => Supervisor::start(config.workers, registry, poll, || {
                    Ok(Channels::from_shared(broker.clone()))
                })?,
                (None, None) => return Err(ParallelError::InvalidConfig("no broker".into())),
            };
            Some(supervisor)
        };

        info!(
            workers = config.workers,
            listen = ?manager.as_ref().map(Manager::local_addr),
            connect = ?config.connect,
            "distributed pool started"
        );
        Ok(Self {
            channels,
            supervisor,
            manager,
            broker,
            poll_interval: poll,
            result_timeout: Duration::from_millis(config.result_timeout_ms),
        })
    }

    /// Start a manager with its own broker and optional local workers.
    pub fn serve(config: &ManagerConfig, registry: Arc<FunctionRegistry>) -> Result<Self> {
        config.validate()?;
        Self::start(&config.to_distributed(), registry)
    }

    /// Address remote workers connect to, if this pool serves them.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.manager.as_ref().map(Manager::local_addr)
    }

    /// Counters of this process's workers.
    pub fn worker_stats(&self) -> Option<SupervisorStats> {
        self.supervisor.as_ref().map(Supervisor::stats)
    }

    /// The owned broker, when not connected to a remote manager.
    pub fn broker(&self) -> Option<&Arc<Broker>> {
        self.broker.as_ref()
    }

    /// Serialize `shared` once, queue one task per argument and return the
    /// outcomes as they arrive.
    pub(crate) fn run<T: Task>(
        &self,
        shared: &T::Shared,
        args: Vec<T::Args>,
        cancel: CancelToken,
    ) -> Result<JobResults<T::Output>> {
        let payload = Arc::new(serde_json::to_vec(shared)?);
        let key = CacheKey::for_payload(&payload);
        let bytes = payload.len();
        self.channels.cache.insert(&key, payload)?;

        let job = JobId::new();
        let total = args.len();
        let mut results = JobResults {
            channels: self.channels.clone(),
            job,
            key: Some(key.clone()),
            seen: vec![false; total],
            remaining: total,
            abandoned: VecDeque::new(),
            poll_interval: self.poll_interval,
            result_timeout: self.result_timeout,
            last_progress: Instant::now(),
            cancel,
            _output: PhantomData,
        };

        for (index, arg) in args.into_iter().enumerate() {
            let task = TaskEnvelope {
                job,
                index,
                function: T::NAME.to_string(),
                args: serde_json::to_value(arg)?,
                cache_key: key.clone(),
            };
            // On error, dropping `results` drains the job and releases the key.
            self.channels.tasks.push_task(task)?;
        }
        debug!(job = %job.0, tasks = total, payload_bytes = bytes, function = T::NAME, "job submitted");
        results.last_progress = Instant::now();
        Ok(results)
    }
}

impl std::fmt::Debug for DistributedPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedPool")
            .field("supervisor", &self.supervisor)
            .field("manager", &self.manager)
            .field("own_broker", &self.broker.is_some())
            .finish()
    }
}

/// Outcomes of one distributed job, in completion order.
pub(crate) struct JobResults<O> {
    channels: Channels,
    job: JobId,
    key: Option<CacheKey>,
    seen: Vec<bool>,
    remaining: usize,
    abandoned: VecDeque<(usize, TaskFailure)>,
    poll_interval: Duration,
    result_timeout: Duration,
    last_progress: Instant,
    cancel: CancelToken,
    _output: PhantomData<fn() -> O>,
}

impl<O> JobResults<O> {
    /// Fail every task still missing, after which the job yields nothing
    /// but those failures.
    fn abandon(&mut self, reason: String) {
        warn!(job = %self.job.0, missing = self.remaining, %reason, "abandoning job");
        let failure = TaskFailure::new(reason);
        for (index, seen) in self.seen.iter_mut().enumerate() {
            if !*seen {
                *seen = true;
                self.abandoned.push_back((index, failure.clone()));
            }
        }
        self.remaining = 0;
        if let Err(e) = self.channels.tasks.drain_job(self.job) {
            debug!(error = %e, "drain after abandon failed");
        }
    }
}

impl<O: DeserializeOwned> Iterator for JobResults<O> {
    type Item = (usize, TaskOutcome<O>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((index, failure)) = self.abandoned.pop_front() {
                return Some((index, Err(failure)));
            }
            if self.remaining == 0 || self.cancel.is_cancelled() {
                return None;
            }
            match self.channels.results.pop_result(self.job, self.poll_interval) {
                Ok(Some(result)) => {
                    let index = result.index;
                    if self.seen.get(index) != Some(&false) {
                        debug!(index, "ignoring duplicate or foreign result");
                        continue;
                    }
                    self.seen[index] = true;
                    self.remaining -= 1;
                    self.last_progress = Instant::now();
                    let outcome = result.outcome.and_then(|value| {
                        serde_json::from_value(value)
                            .map_err(|e| TaskFailure::new(format!("cannot decode result: {e}")))
                    });
                    return Some((index, outcome));
                }
                Ok(None) => {
                    if self.last_progress.elapsed() >= self.result_timeout {
                        let waited = self.result_timeout;
                        self.abandon(format!("no result within {waited:?}"));
                    }
                }
                Err(e) => self.abandon(format!("result channel failed: {e}")),
            }
        }
    }
}

impl<O> Drop for JobResults<O> {
    fn drop(&mut self) {
        if self.remaining > 0 {
            match self.channels.tasks.drain_job(self.job) {
                Ok(removed) => debug!(job = %self.job.0, removed, "drained unfinished job"),
                Err(e) => debug!(job = %self.job.0, error = %e, "drain failed"),
            }
        }
        if let Some(key) = self.key.take() {
            if let Err(e) = self.channels.cache.release(&key) {
                debug!(%key, error = %e, "cache release failed");
            }
        }
    }
}
