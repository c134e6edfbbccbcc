// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print request queue.
//
// A bounded channel feeds a fixed pool of workers that each run one request
// at a time through the orchestrator. With a single worker, requests reach
// the printer in submission order.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use waybill_core::error::{Result, WaybillError};
use waybill_core::types::LabelRequest;

use crate::orchestrator::{Orchestrator, PrintOptions, ResultSink};

struct QueuedRequest {
    request: LabelRequest,
    options: PrintOptions,
    sink: Arc<dyn ResultSink>,
}

pub struct PrintQueue {
    sender: mpsc::Sender<QueuedRequest>,
    workers: Vec<JoinHandle<()>>,
}

impl PrintQueue {
    /// Spawn `worker_count` workers draining a queue of `capacity` requests.
    pub fn start(orchestrator: Arc<Orchestrator>, worker_count: usize, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<QueuedRequest>(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..worker_count.max(1))
            .map(|worker| {
                let orchestrator = Arc::clone(&orchestrator);
                let receiver = Arc::clone(&receiver);
                tokio::spawn(async move {
                    loop {
                        let next = receiver.lock().await.recv().await;
                        let Some(job) = next else { break };
                        debug!(worker, request = %job.request.describe(), "worker picked up request");
                        orchestrator
                            .run(&job.request, &job.options, job.sink.as_ref())
                            .await;
                    }
                    debug!(worker, "print worker stopped");
                })
            })
            .collect::<Vec<_>>();

        info!(workers = workers.len(), capacity, "print queue started");
        Self { sender, workers }
    }

    /// Enqueue a request; waits while the queue is full.
    pub async fn submit(
        &self,
        request: LabelRequest,
        options: PrintOptions,
        sink: Arc<dyn ResultSink>,
    ) -> Result<()> {
        self.sender
            .send(QueuedRequest {
                request,
                options,
                sink,
            })
            .await
            .map_err(|_| WaybillError::QueueClosed)
    }

    /// Stop accepting requests, finish the queued ones, then stop the workers.
    pub async fn shutdown(self) {
        let Self { sender, workers } = self;
        drop(sender);
        for worker in workers {
            if let Err(err) = worker.await {
                warn!(error = %err, "print worker ended abnormally");
            }
        }
        info!("print queue drained");
    }
}
