//! Watch-stream adapter.
//!
//! Turns the raw `kube` watcher stream into [`JobEvent`]s and hands them to
//! one worker task per job, so callbacks for the same job run in order while
//! different jobs proceed concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, ResourceExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::job::{JobEvent, JobExt};
use crate::tracker::Tracker;
use crate::Result;

#[async_trait]
pub trait JobEventHandler: Send + Sync + 'static {
    async fn handle_event(&self, event: JobEvent);
}

#[async_trait]
impl JobEventHandler for Tracker {
    async fn handle_event(&self, event: JobEvent) {
        self.handle(event).await;
    }
}

/// Last-seen copy of every job, used to pair updates with their previous
/// state and to notice jobs that vanished while the watch was down.
#[derive(Default)]
pub struct EventCache {
    jobs: HashMap<String, Job>,
}

impl EventCache {
    pub fn apply(&mut self, event: watcher::Event<Job>) -> Vec<JobEvent> {
        match event {
            watcher::Event::Applied(job) => match self.jobs.insert(job.key(), job.clone()) {
                Some(old) => vec![JobEvent::Updated { old, new: job }],
                None => vec![JobEvent::Added(job)],
            },
            watcher::Event::Deleted(job) => {
                self.jobs.remove(&job.key());
                vec![JobEvent::Deleted(job)]
            }
            watcher::Event::Restarted(jobs) => {
                let mut events = Vec::new();
                let mut fresh = HashMap::with_capacity(jobs.len());
                for job in jobs {
                    let key = job.key();
                    match self.jobs.remove(&key) {
                        None => events.push(JobEvent::Added(job.clone())),
                        Some(old) if old.resource_version() != job.resource_version() => {
                            events.push(JobEvent::Updated {
                                old,
                                new: job.clone(),
                            })
                        }
                        Some(_) => {}
                    }
                    fresh.insert(key, job);
                }
                events.extend(self.jobs.drain().map(|(_, gone)| JobEvent::Deleted(gone)));
                self.jobs = fresh;
                events
            }
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Routes events to per-job workers over unbounded ordered channels.
pub struct Dispatcher<H: JobEventHandler> {
    handler: Arc<H>,
    workers: HashMap<String, mpsc::UnboundedSender<JobEvent>>,
}

impl<H: JobEventHandler> Dispatcher<H> {
    pub fn new(handler: Arc<H>) -> Self {
        Self {
            handler,
            workers: HashMap::new(),
        }
    }

    pub fn dispatch(&mut self, event: JobEvent) {
        let key = event.job().key();
        let is_delete = matches!(event, JobEvent::Deleted(_));

        let alive = self
            .workers
            .get(&key)
            .map(|sender| !sender.is_closed())
            .unwrap_or(false);
        if !alive {
            let sender = self.spawn_worker(key.clone());
            self.workers.insert(key.clone(), sender);
        }
        if let Some(sender) = self.workers.get(&key) {
            if sender.send(event).is_err() {
                warn!(job = %key, "Job worker is gone, dropping event");
            }
        }

        // Dropping the sender lets the worker drain its queue and exit.
        if is_delete {
            self.workers.remove(&key);
        }
    }

    pub fn active_workers(&self) -> usize {
        self.workers.len()
    }

    fn spawn_worker(&self, key: String) -> mpsc::UnboundedSender<JobEvent> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handler = self.handler.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                handler.handle_event(event).await;
            }
            debug!(job = %key, "Job worker finished");
        });
        tx
    }
}

/// Watches Jobs in `namespace` (all namespaces when empty) until `cancel`
/// fires. Stream errors are logged; the watcher retries with backoff.
pub async fn run(
    client: Client,
    namespace: &str,
    tracker: Arc<Tracker>,
    cancel: CancellationToken,
) -> Result<()> {
    let api: Api<Job> = if namespace.is_empty() {
        Api::all(client)
    } else {
        Api::namespaced(client, namespace)
    };

    let mut stream = watcher(api, watcher::Config::default())
        .default_backoff()
        .boxed();
    let mut cache = EventCache::default();
    let mut dispatcher = Dispatcher::new(tracker);
    info!(namespace = %namespace, "Watching jobs");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Job watcher stopped");
                return Ok(());
            }
            next = stream.next() => match next {
                Some(Ok(event)) => {
                    for job_event in cache.apply(event) {
                        dispatcher.dispatch(job_event);
                    }
                }
                Some(Err(e)) => warn!(error = %e, "Job watch error"),
                None => {
                    warn!("Job watch stream ended");
                    return Ok(());
                }
            }
        }
    }
}
