//! In-process task queue, result queues and content cache.
//!
//! One broker thread owns all queue and cache state and serves requests
//! sent over std channels; callers never share the state itself. Local
//! workers talk to the broker directly; remote workers reach it through
//! [`Manager`](crate::Manager).
//!
//! A timed pop parks a waiter in the broker. When the caller's timeout
//! expires it sends `CancelWait` and then reads the definitive answer, so
//! an item handed out concurrently with the timeout is never lost.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::debug;

use crate::channel::{ContentCache, ResultChannel, TaskChannel};
use crate::error::{ParallelError, Result};
use crate::protocol::{CacheKey, JobId, ResultEnvelope, TaskEnvelope};

type Waiter<T> = (u64, Sender<Option<T>>);

/// Drained jobs remembered for discarding late results; the oldest are
/// forgotten first.
const DRAINED_JOBS: usize = 1024;

enum Request {
    PushTask(TaskEnvelope),
    PopTask(Waiter<TaskEnvelope>),
    DrainJob(JobId, Sender<usize>),
    PushResult(ResultEnvelope),
    PopResult(JobId, Waiter<ResultEnvelope>),
    CancelWait(u64),
    CacheInsert(CacheKey, Arc<Vec<u8>>),
    CacheFetch(CacheKey, Sender<Option<Arc<Vec<u8>>>>),
    CacheRelease(CacheKey),
    Stats(Sender<BrokerStats>),
    Close,
}

/// Counters describing a broker's queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BrokerStats {
    /// Tasks waiting for a worker.
    pub queued_tasks: usize,
    /// Results waiting for their job's consumer.
    pub pending_results: usize,
    /// Distinct payloads in the cache.
    pub cached_payloads: usize,
    /// Number of cache fetches served.
    pub cache_fetches: u64,
    /// Drained jobs whose late results are still discarded.
    pub drained_jobs: usize,
}

/// Handle to the broker thread.
pub struct Broker {
    requests: Sender<Request>,
    next_waiter: AtomicU64,
    thread: Option<JoinHandle<()>>,
}

impl Broker {
    /// Start a broker thread with empty queues.
    pub fn new() -> Result<Arc<Self>> {
        let (requests, inbox) = mpsc::channel();
        let thread = std::thread::Builder::new()
            .name("millpath-broker".into())
            .spawn(move || State::default().serve(inbox))?;
        Ok(Arc::new(Self {
            requests,
            next_waiter: AtomicU64::new(0),
            thread: Some(thread),
        }))
    }

    /// Snapshot of the queue sizes.
    pub fn stats(&self) -> Result<BrokerStats> {
        self.ask(Request::Stats)
    }

    fn send(&self, request: Request) -> Result<()> {
        self.requests
            .send(request)
            .map_err(|_| ParallelError::ManagerGone)
    }

    fn ask<R>(&self, request: impl FnOnce(Sender<R>) -> Request) -> Result<R> {
        let (reply, answer) = mpsc::channel();
        self.send(request(reply))?;
        answer.recv().map_err(|_| ParallelError::ManagerGone)
    }

    fn wait<T>(
        &self,
        timeout: Duration,
        request: impl FnOnce(Waiter<T>) -> Request,
    ) -> Result<Option<T>> {
        let id = self.next_waiter.fetch_add(1, Ordering::Relaxed);
        let (reply, answer) = mpsc::channel();
        self.send(request((id, reply)))?;
        match answer.recv_timeout(timeout) {
            Ok(item) => Ok(item),
            Err(RecvTimeoutError::Disconnected) => Err(ParallelError::ManagerGone),
            Err(RecvTimeoutError::Timeout) => {
                self.send(Request::CancelWait(id))?;
                answer.recv().map_err(|_| ParallelError::ManagerGone)
            }
        }
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        let _ = self.requests.send(Request::Close);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Broker")
    }
}

impl TaskChannel for Broker {
    fn push_task(&self, task: TaskEnvelope) -> Result<()> {
        self.send(Request::PushTask(task))
    }

    fn pop_task(&self, timeout: Duration) -> Result<Option<TaskEnvelope>> {
        self.wait(timeout, Request::PopTask)
    }

    fn drain_job(&self, job: JobId) -> Result<usize> {
        self.ask(|reply| Request::DrainJob(job, reply))
    }
}

impl ResultChannel for Broker {
    fn push_result(&self, result: ResultEnvelope) -> Result<()> {
        self.send(Request::PushResult(result))
    }

    fn pop_result(&self, job: JobId, timeout: Duration) -> Result<Option<ResultEnvelope>> {
        self.wait(timeout, |waiter| Request::PopResult(job, waiter))
    }
}

impl ContentCache for Broker {
    fn insert(&self, key: &CacheKey, payload: Arc<Vec<u8>>) -> Result<()> {
        self.send(Request::CacheInsert(key.clone(), payload))
    }

    fn fetch(&self, key: &CacheKey) -> Result<Option<Arc<Vec<u8>>>> {
        self.ask(|reply| Request::CacheFetch(key.clone(), reply))
    }

    fn release(&self, key: &CacheKey) -> Result<()> {
        self.send(Request::CacheRelease(key.clone()))
    }
}

struct CacheEntry {
    payload: Arc<Vec<u8>>,
    refs: usize,
}

#[derive(Default)]
struct State {
    tasks: VecDeque<TaskEnvelope>,
    task_waiters: VecDeque<Waiter<TaskEnvelope>>,
    results: HashMap<JobId, VecDeque<ResultEnvelope>>,
    result_waiters: HashMap<JobId, VecDeque<Waiter<ResultEnvelope>>>,
    drained: HashSet<JobId>,
    drained_order: VecDeque<JobId>,
    cache: HashMap<CacheKey, CacheEntry>,
    cache_fetches: u64,
}

impl State {
    fn serve(mut self, inbox: Receiver<Request>) {
        debug!("broker started");
        while let Ok(request) = inbox.recv() {
            if !self.handle(request) {
                break;
            }
        }
        // Dropping the state disconnects every parked waiter.
        debug!("broker stopped");
    }

    fn handle(&mut self, request: Request) -> bool {
        match request {
            Request::PushTask(task) => {
                if let Some(task) = hand_off(&mut self.task_waiters, task) {
                    self.tasks.push_back(task);
                }
            }
            Request::PopTask((id, reply)) => match self.tasks.pop_front() {
                Some(task) => {
                    if let Err(mpsc::SendError(Some(task))) = reply.send(Some(task)) {
                        self.tasks.push_front(task);
                    }
                }
                None => self.task_waiters.push_back((id, reply)),
            },
            Request::DrainJob(job, reply) => {
                let before = self.tasks.len();
                self.tasks.retain(|task| task.job != job);
                let removed = before - self.tasks.len();
                self.results.remove(&job);
                for (_, waiter) in self.result_waiters.remove(&job).into_iter().flatten() {
                    let _ = waiter.send(None);
                }
                self.remember_drained(job);
                debug!(removed, job = %job.0, "drained job");
                let _ = reply.send(removed);
            }
            Request::PushResult(result) => {
                // Late results of a drained job have no consumer.
                if self.drained.contains(&result.job) {
                    return true;
                }
                let job = result.job;
                let leftover = match self.result_waiters.get_mut(&job) {
                    Some(waiters) => hand_off(waiters, result),
                    None => Some(result),
                };
                if self.result_waiters.get(&job).is_some_and(VecDeque::is_empty) {
                    self.result_waiters.remove(&job);
                }
                if let Some(result) = leftover {
                    self.results.entry(job).or_default().push_back(result);
                }
            }
            Request::PopResult(job, (id, reply)) => match self.take_result(job) {
                Some(result) => {
                    if let Err(mpsc::SendError(Some(result))) = reply.send(Some(result)) {
                        self.results.entry(job).or_default().push_front(result);
                    }
                }
                None => self
                    .result_waiters
                    .entry(job)
                    .or_default()
                    .push_back((id, reply)),
            },
            Request::CancelWait(id) => self.cancel_wait(id),
            Request::CacheInsert(key, payload) => {
                self.cache
                    .entry(key)
                    .and_modify(|entry| entry.refs += 1)
                    .or_insert(CacheEntry { payload, refs: 1 });
            }
            Request::CacheFetch(key, reply) => {
                self.cache_fetches += 1;
                let _ = reply.send(self.cache.get(&key).map(|entry| entry.payload.clone()));
            }
            Request::CacheRelease(key) => {
                if let Some(entry) = self.cache.get_mut(&key) {
                    entry.refs -= 1;
                    if entry.refs == 0 {
                        self.cache.remove(&key);
                    }
                }
            }
            Request::Stats(reply) => {
                let _ = reply.send(BrokerStats {
                    queued_tasks: self.tasks.len(),
                    pending_results: self.results.values().map(VecDeque::len).sum(),
                    cached_payloads: self.cache.len(),
                    cache_fetches: self.cache_fetches,
                    drained_jobs: self.drained.len(),
                });
            }
            Request::Close => return false,
        }
        true
    }

    fn remember_drained(&mut self, job: JobId) {
        if !self.drained.insert(job) {
            return;
        }
        self.drained_order.push_back(job);
        while self.drained_order.len() > DRAINED_JOBS {
            if let Some(old) = self.drained_order.pop_front() {
                self.drained.remove(&old);
            }
        }
    }

    fn take_result(&mut self, job: JobId) -> Option<ResultEnvelope> {
        let queue = self.results.get_mut(&job)?;
        let result = queue.pop_front();
        if queue.is_empty() {
            self.results.remove(&job);
        }
        result
    }

    /// Answer a timed-out waiter with `None`, unless it was already served.
    fn cancel_wait(&mut self, id: u64) {
        if let Some(pos) = self.task_waiters.iter().position(|(w, _)| *w == id) {
            if let Some((_, reply)) = self.task_waiters.remove(pos) {
                let _ = reply.send(None);
            }
            return;
        }
        for waiters in self.result_waiters.values_mut() {
            if let Some(pos) = waiters.iter().position(|(w, _)| *w == id) {
                if let Some((_, reply)) = waiters.remove(pos) {
                    let _ = reply.send(None);
                }
                break;
            }
        }
        self.result_waiters.retain(|_, waiters| !waiters.is_empty());
    }
}

/// Give `item` to the oldest live waiter; returns it if nobody took it.
fn hand_off<T>(waiters: &mut VecDeque<Waiter<T>>, mut item: T) -> Option<T> {
    while let Some((_, reply)) = waiters.pop_front() {
        match reply.send(Some(item)) {
            Ok(()) => return None,
            Err(mpsc::SendError(back)) => item = back?,
        }
    }
    Some(item)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn task(job: JobId, index: usize) -> TaskEnvelope {
        TaskEnvelope {
            job,
            index,
            function: "f".into(),
            args: serde_json::json!(index),
            cache_key: CacheKey::for_payload(b""),
        }
    }

    #[test]
    fn test_tasks_are_fifo() {
        let broker = Broker::new().unwrap();
        let job = JobId::new();
        for i in 0..3 {
            broker.push_task(task(job, i)).unwrap();
        }
        let popped: Vec<usize> = (0..3)
            .map(|_| broker.pop_task(Duration::from_secs(1)).unwrap().unwrap().index)
            .collect();
        assert_eq!(popped, vec![0, 1, 2]);
        assert!(broker.pop_task(Duration::from_millis(10)).unwrap().is_none());
    }

    #[test]
    fn test_pop_wakes_on_push() {
        let broker = Broker::new().unwrap();
        let job = JobId::new();
        let waiter = {
            let broker = broker.clone();
            thread::spawn(move || broker.pop_task(Duration::from_secs(10)).unwrap())
        };
        thread::sleep(Duration::from_millis(20));
        broker.push_task(task(job, 4)).unwrap();
        assert_eq!(waiter.join().unwrap().unwrap().index, 4);
    }

    #[test]
    fn test_timed_out_waiter_does_not_swallow_tasks() {
        let broker = Broker::new().unwrap();
        let job = JobId::new();
        for _ in 0..20 {
            assert!(broker.pop_task(Duration::ZERO).unwrap().is_none());
        }
        broker.push_task(task(job, 1)).unwrap();
        assert_eq!(broker.stats().unwrap().queued_tasks, 1);
        assert_eq!(broker.pop_task(Duration::ZERO).unwrap().unwrap().index, 1);
    }

    #[test]
    fn test_drain_removes_only_that_job() {
        let broker = Broker::new().unwrap();
        let (a, b) = (JobId::new(), JobId::new());
        broker.push_task(task(a, 0)).unwrap();
        broker.push_task(task(b, 0)).unwrap();
        broker.push_task(task(a, 1)).unwrap();
        assert_eq!(broker.drain_job(a).unwrap(), 2);
        assert_eq!(broker.stats().unwrap().queued_tasks, 1);

        // Results arriving after the drain are discarded.
        broker
            .push_result(ResultEnvelope {
                job: a,
                index: 0,
                outcome: Ok(serde_json::json!(1)),
            })
            .unwrap();
        assert_eq!(broker.stats().unwrap().pending_results, 0);
    }

    #[test]
    fn test_drained_jobs_are_bounded() {
        let broker = Broker::new().unwrap();
        let jobs: Vec<JobId> = (0..DRAINED_JOBS + 50).map(|_| JobId::new()).collect();
        for &job in &jobs {
            broker.drain_job(job).unwrap();
        }
        broker.drain_job(jobs[jobs.len() - 1]).unwrap();
        assert_eq!(broker.stats().unwrap().drained_jobs, DRAINED_JOBS);

        let late = |job| ResultEnvelope {
            job,
            index: 0,
            outcome: Ok(serde_json::json!(0)),
        };
        // Recent drains still swallow late results; forgotten ones queue them.
        broker.push_result(late(jobs[jobs.len() - 1])).unwrap();
        assert_eq!(broker.stats().unwrap().pending_results, 0);
        broker.push_result(late(jobs[0])).unwrap();
        assert_eq!(broker.stats().unwrap().pending_results, 1);
    }

    #[test]
    fn test_results_are_per_job() {
        let broker = Broker::new().unwrap();
        let (a, b) = (JobId::new(), JobId::new());
        broker
            .push_result(ResultEnvelope {
                job: b,
                index: 3,
                outcome: Ok(serde_json::json!(9)),
            })
            .unwrap();
        assert!(broker.pop_result(a, Duration::from_millis(5)).unwrap().is_none());
        let got = broker.pop_result(b, Duration::from_secs(1)).unwrap().unwrap();
        assert_eq!(got.index, 3);
    }

    #[test]
    fn test_cache_reference_counting() {
        let broker = Broker::new().unwrap();
        let key = CacheKey::for_payload(b"model");
        let payload = Arc::new(b"model".to_vec());
        broker.insert(&key, payload.clone()).unwrap();
        broker.insert(&key, payload).unwrap();
        broker.release(&key).unwrap();
        assert!(broker.fetch(&key).unwrap().is_some());
        broker.release(&key).unwrap();
        assert!(broker.fetch(&key).unwrap().is_none());
        assert_eq!(broker.stats().unwrap().cache_fetches, 2);
    }
}
