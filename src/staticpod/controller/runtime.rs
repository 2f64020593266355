/*
 * Copyright (C) 2024 The Nanocloud Authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use crate::staticpod::controller::installer::InstallerController;
use crate::staticpod::k8s::client::WatchEvent;
use crate::staticpod::k8s::pod::Pod;
use crate::staticpod::logger::LogEntry;
use crate::staticpod::observability::tracing::{current_context, with_span, with_span_sync};
use crate::staticpod::operator::types::OperatorStatus;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

const COMPONENT: &str = "installer-runtime";

/// Every trigger maps onto this key, so bursts collapse into one pass.
pub const WORK_QUEUE_KEY: &str = "key";

const BACKOFF_INITIAL_MS: u64 = 200;
const BACKOFF_MAX_MS: u64 = 10_000;

/// Delay before retry number `failures + 1`.
pub fn backoff_for(failures: u32) -> Duration {
    let millis = BACKOFF_INITIAL_MS.saturating_mul(1u64 << failures.min(32));
    Duration::from_millis(millis.min(BACKOFF_MAX_MS))
}

/// Single-key work queue. Adding while a key is already pending is a no-op;
/// failed passes are re-added after an exponential backoff.
#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<WorkQueueInner>,
}

struct WorkQueueInner {
    dirty: AtomicBool,
    notify: Notify,
    failures: AtomicU32,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(WorkQueueInner {
                dirty: AtomicBool::new(false),
                notify: Notify::new(),
                failures: AtomicU32::new(0),
            }),
        }
    }

    pub fn add(&self) {
        if !self.inner.dirty.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_one();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.inner.dirty.load(Ordering::SeqCst)
    }

    /// Waits for the key. Returns `None` once `shutdown` fires.
    pub async fn next(&self, shutdown: &CancellationToken) -> Option<&'static str> {
        loop {
            if self.inner.dirty.swap(false, Ordering::SeqCst) {
                return Some(WORK_QUEUE_KEY);
            }
            tokio::select! {
                _ = shutdown.cancelled() => return None,
                _ = self.inner.notify.notified() => {}
            }
        }
    }

    /// Schedules the key after the current backoff and grows the backoff.
    pub fn add_rate_limited(&self, shutdown: &CancellationToken) -> Duration {
        let failures = self.inner.failures.fetch_add(1, Ordering::SeqCst);
        let delay = backoff_for(failures);
        let queue = self.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = sleep(delay) => queue.add(),
            }
        });
        delay
    }

    /// Resets the backoff after a successful pass.
    pub fn forget(&self) {
        self.inner.failures.store(0, Ordering::SeqCst);
    }

    pub fn requeues(&self) -> u32 {
        self.inner.failures.load(Ordering::SeqCst)
    }
}

fn forward<T, F>(
    mut events: broadcast::Receiver<T>,
    queue: WorkQueue,
    shutdown: CancellationToken,
    relevant: F,
) -> JoinHandle<()>
where
    T: Clone + Send + 'static,
    F: Fn(&T) -> bool + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                event = events.recv() => match event {
                    Ok(event) => {
                        if relevant(&event) {
                            queue.add();
                        }
                    }
                    // Missed events still mean something changed.
                    Err(RecvError::Lagged(_)) => queue.add(),
                    Err(RecvError::Closed) => return,
                }
            }
        }
    })
}

/// Turns operator status changes and pod changes in `namespace` into queue
/// triggers.
pub fn watch_sources(
    queue: &WorkQueue,
    operator_events: broadcast::Receiver<WatchEvent<OperatorStatus>>,
    pod_events: broadcast::Receiver<WatchEvent<Pod>>,
    namespace: &str,
    shutdown: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    let namespace = namespace.to_string();
    vec![
        forward(operator_events, queue.clone(), shutdown.clone(), |_| true),
        forward(
            pod_events,
            queue.clone(),
            shutdown.clone(),
            move |event: &WatchEvent<Pod>| event.object.namespace() == namespace,
        ),
    ]
}

/// Drains `queue` with a single worker until `shutdown` fires. Passes run on
/// the blocking pool since the controller talks to its stores synchronously.
pub async fn run_worker(
    controller: Arc<InstallerController>,
    queue: WorkQueue,
    shutdown: CancellationToken,
) {
    let namespace = controller.config().target_namespace.clone();
    LogEntry::info(COMPONENT, "Starting installer controller worker")
        .namespace(&namespace)
        .emit();

    while let Some(key) = queue.next(&shutdown).await {
        let controller = controller.clone();
        let result = with_span(COMPONENT, "reconcile", async move {
            let parent = current_context();
            tokio::task::spawn_blocking(move || {
                with_span_sync(COMPONENT, "pass", parent, || controller.sync())
            })
            .await
        })
        .await;

        match result {
            Ok(Ok(())) => queue.forget(),
            Ok(Err(err)) if err.is_requeue() => {
                queue.add_rate_limited(&shutdown);
            }
            Ok(Err(err)) => {
                let delay = queue.add_rate_limited(&shutdown);
                LogEntry::warn(COMPONENT, "Sync failed; requeueing")
                    .text("key", key)
                    .failure(&err)
                    .millis("retry_after_ms", delay.as_millis())
                    .emit();
            }
            Err(join_err) => {
                queue.add_rate_limited(&shutdown);
                LogEntry::error(COMPONENT, "Sync task aborted")
                    .text("key", key)
                    .failure(&join_err)
                    .emit();
            }
        }
    }

    LogEntry::info(COMPONENT, "Stopped installer controller worker")
        .namespace(&namespace)
        .emit();
}

/// Starts the event forwarders and the worker, and queues an initial pass.
pub fn spawn(
    controller: Arc<InstallerController>,
    operator_events: broadcast::Receiver<WatchEvent<OperatorStatus>>,
    pod_events: broadcast::Receiver<WatchEvent<Pod>>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let queue = WorkQueue::new();
    let namespace = controller.config().target_namespace.clone();
    let watchers = watch_sources(&queue, operator_events, pod_events, &namespace, &shutdown);
    queue.add();
    tokio::spawn(async move {
        run_worker(controller, queue, shutdown).await;
        for watcher in watchers {
            let _ = watcher.await;
        }
    })
}
