//! Watch-event controller that keeps the aggregation services in sync with
//! the registered extension services.
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::{resource::ApiService, service::ApiServiceManager};

/// A watch event for the registered extension services.
pub enum Event {
    /// A service was added or modified.
    Applied(ApiService),
    /// A service was deleted.
    Deleted(ApiService),
    /// The watch (re)started; the full current set is supplied for
    /// reconciliation.
    Restarted(Vec<ApiService>),
}

enum Job {
    Apply(ApiService),
    Remove(String),
}

/// Drives one or more [`ApiServiceManager`]s (typically the v2 and v3
/// services) from a stream of [`Event`]s.
///
/// Work for each service name is queued to one dedicated worker task, so a
/// slow spec download for one service never delays event delivery for the
/// others while events for the same service are still processed in watch
/// order.
pub struct Controller {
    shared: Arc<Shared>,
    // one queue per service name, kept for the controller's lifetime
    workers: Mutex<HashMap<String, mpsc::UnboundedSender<Job>>>,
}

struct Shared {
    managers: Vec<Arc<dyn ApiServiceManager>>,
    known: Mutex<HashSet<String>>,
}

impl Controller {
    pub fn new(managers: Vec<Arc<dyn ApiServiceManager>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                managers,
                known: Mutex::new(HashSet::new()),
            }),
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Consume `events` until the stream ends.
    ///
    /// The loop itself only enqueues; all manager calls happen on the
    /// per-name workers.
    pub async fn run(self: Arc<Self>, events: impl Stream<Item = Event>) {
        futures::pin_mut!(events);
        while let Some(event) = events.next().await {
            match event {
                Event::Applied(svc) => self.enqueue(svc.name().to_string(), Job::Apply(svc)),
                Event::Deleted(svc) => {
                    let name = svc.name().to_string();
                    self.enqueue(name.clone(), Job::Remove(name));
                }
                Event::Restarted(services) => self.reconcile(services),
            }
        }
    }

    fn enqueue(&self, name: String, job: Job) {
        let mut workers = self.workers.lock();
        let sender = workers.entry(name).or_insert_with(|| {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let shared = self.shared.clone();
            tokio::spawn(async move {
                while let Some(job) = rx.recv().await {
                    shared.process(job).await;
                }
            });
            tx
        });
        // the worker only exits once its sender is dropped
        let _ = sender.send(job);
    }

    /// Bring the managers in line with `services`: refresh what is current,
    /// drop everything else this controller has ever touched.
    ///
    /// Staleness is computed from the worker set (a superset of the
    /// registered names, so an apply still sitting in a queue is covered)
    /// and the removals go through the same queues, preserving per-name
    /// ordering.
    fn reconcile(&self, services: Vec<ApiService>) {
        let current: HashSet<String> = services.iter().map(|s| s.name().to_string()).collect();
        let mut stale: HashSet<String> = self
            .workers
            .lock()
            .keys()
            .filter(|name| !current.contains(*name))
            .cloned()
            .collect();
        stale.extend(
            self.shared
                .known
                .lock()
                .iter()
                .filter(|name| !current.contains(*name))
                .cloned(),
        );
        for name in stale {
            self.enqueue(name.clone(), Job::Remove(name));
        }
        for svc in services {
            self.enqueue(svc.name().to_string(), Job::Apply(svc));
        }
    }
}

impl Shared {
    async fn process(&self, job: Job) {
        match job {
            Job::Apply(svc) => {
                if !svc.is_available() {
                    debug!(service = %svc.name(), "api service not available, removing");
                    self.remove(svc.name()).await;
                    return;
                }
                self.known.lock().insert(svc.name().to_string());
                for manager in &self.managers {
                    if let Err(error) = manager.add_update_api_service(&svc).await {
                        debug!(service = %svc.name(), %error, "failed to refresh openapi spec");
                    }
                }
            }
            Job::Remove(name) => self.remove(&name).await,
        }
    }

    /// Deregister `name` from every manager.
    ///
    /// Deletes are honored regardless of what this controller previously
    /// observed: a restarted controller must still propagate the removal of
    /// a service it never saw registered.
    async fn remove(&self, name: &str) {
        if self.known.lock().remove(name) {
            info!(service = %name, "removing api service");
        }
        for manager in &self.managers {
            manager.remove_api_service(name).await;
        }
    }
}
