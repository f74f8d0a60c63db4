use super::evaluator::{Evaluation, Evaluator};
use crate::error::{AfResult, ArrayForgeError};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

struct Job {
    position: usize,
    params: Vec<f64>,
    n_evals: Option<usize>,
}

type JobResult = (usize, AfResult<Evaluation>);

/// Fixed set of long-lived threads sharing one job queue and one result
/// channel. Each batch is a join barrier.
pub struct WorkerPool {
    jobs: Option<Sender<Job>>,
    results: Receiver<JobResult>,
    handles: Vec<JoinHandle<()>>,
}

fn worker_loop(id: usize, evaluator: Arc<Evaluator>, jobs: Arc<Mutex<Receiver<Job>>>, results: Sender<JobResult>) {
    loop {
        let job = {
            let queue = jobs.lock().unwrap_or_else(|e| e.into_inner());
            queue.recv()
        };
        let Ok(job) = job else {
            debug!("Worker thread {} shutting down", id);
            break;
        };

        let outcome = evaluator.evaluate(&job.params, job.n_evals);
        if results.send((job.position, outcome)).is_err() {
            break;
        }
    }
}

impl WorkerPool {
    pub fn new(n_threads: usize, evaluator: Arc<Evaluator>) -> AfResult<Self> {
        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let (result_tx, result_rx) = mpsc::channel::<JobResult>();
        let job_rx = Arc::new(Mutex::new(job_rx));

        let mut handles = Vec::with_capacity(n_threads);
        for id in 0..n_threads.max(1) {
            let evaluator = Arc::clone(&evaluator);
            let jobs = Arc::clone(&job_rx);
            let results = result_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("arrayforge-worker-{}", id))
                .spawn(move || worker_loop(id, evaluator, jobs, results))?;
            handles.push(handle);
        }

        Ok(Self {
            jobs: Some(job_tx),
            results: result_rx,
            handles,
        })
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Evaluates every vector and returns the evaluations in input order.
    /// All submitted work completes before the first error is returned.
    pub fn run_batch(&self, batch: &[Vec<f64>], n_evals: Option<usize>) -> AfResult<Vec<Evaluation>> {
        let sender = self.jobs.as_ref().ok_or_else(|| {
            ArrayForgeError::Simulation("Worker pool has been shut down".to_string())
        })?;

        for (position, params) in batch.iter().enumerate() {
            sender
                .send(Job {
                    position,
                    params: params.clone(),
                    n_evals,
                })
                .map_err(|_| ArrayForgeError::Simulation("Worker pool is not running".to_string()))?;
        }

        let mut slots: Vec<Option<Evaluation>> = vec![None; batch.len()];
        let mut first_error = None;
        for _ in 0..batch.len() {
            let (position, outcome) = self.results.recv().map_err(|_| {
                ArrayForgeError::Simulation("All worker threads exited".to_string())
            })?;
            match outcome {
                Ok(evaluation) => slots[position] = Some(evaluation),
                Err(e) => {
                    error!("Evaluation of candidate {} failed: {}", position, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        slots
            .into_iter()
            .map(|s| {
                s.ok_or_else(|| {
                    ArrayForgeError::Simulation("Missing evaluation in batch".to_string())
                })
            })
            .collect()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.jobs.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}
