//! Background execution of pipeline jobs.
//!
//! Long-running work (a correlation pass over thousands of pairs, a
//! validation run) never executes on the submitting path: jobs are enqueued
//! on a channel and run on a worker thread. Each job carries an attempt
//! counter bounded by the configured maximum; no-samples-in-common and
//! user stops map to their dedicated terminal states and are never retried.

use crate::error::{FusionError, Result};
use crate::fusion::CancelFlag;
use crate::pipeline::{ExperimentId, ExperimentState, StateNotifier, UserId};
use std::collections::HashMap;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{info, warn};

/// A unit of background work owned by the worker
pub trait PipelineJob: Send {
    fn id(&self) -> ExperimentId;
    fn user_id(&self) -> UserId;
    /// Run one attempt; must check `cancel` cooperatively between chunks
    /// and pairs
    fn run(&mut self, cancel: &CancelFlag) -> Result<()>;
}

/// Worker tunables
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Automatic retries stop after this many attempts
    pub max_attempts: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

struct WorkerShared {
    states: Mutex<HashMap<ExperimentId, ExperimentState>>,
    flags: Mutex<HashMap<ExperimentId, CancelFlag>>,
    notifier: Arc<dyn StateNotifier>,
    config: WorkerConfig,
}

impl WorkerShared {
    fn set_state(&self, id: ExperimentId, user_id: UserId, state: ExperimentState) {
        self.states.lock().unwrap().insert(id, state);
        // Fire-and-forget: the notifier cannot fail the transition
        self.notifier.notify(user_id);
    }

    fn execute(&self, mut job: Box<dyn PipelineJob>) {
        let id = job.id();
        let user_id = job.user_id();
        let cancel = self
            .flags
            .lock()
            .unwrap()
            .entry(id)
            .or_default()
            .clone();

        self.set_state(id, user_id, ExperimentState::InProcess);

        let mut attempt = 1u32;
        let final_state = loop {
            match job.run(&cancel) {
                Ok(()) => break ExperimentState::Completed,
                Err(FusionError::NoSamplesInCommon) => {
                    info!("Job {} has no samples in common", id);
                    break ExperimentState::NoSamplesInCommon;
                }
                Err(FusionError::Stopped) => {
                    info!("Job {} stopped by the user", id);
                    break ExperimentState::Stopped;
                }
                Err(FusionError::InvalidConfiguration { message }) => {
                    // Rejected before computation: retrying cannot help
                    warn!("Job {} has invalid configuration: {}", id, message);
                    break ExperimentState::FinishedWithError;
                }
                Err(e) => {
                    warn!("Job {} attempt {} failed: {}", id, attempt, e);
                    attempt += 1;
                    if attempt > self.config.max_attempts {
                        break ExperimentState::ReachedAttemptsLimit;
                    }
                }
            }
        };
        self.set_state(id, user_id, final_state);
    }
}

/// The background worker queue
pub struct PipelineWorker {
    sender: Option<Sender<Box<dyn PipelineJob>>>,
    handle: Option<JoinHandle<()>>,
    shared: Arc<WorkerShared>,
}

impl PipelineWorker {
    /// Start the worker thread
    pub fn start(config: WorkerConfig, notifier: Arc<dyn StateNotifier>) -> Self {
        let shared = Arc::new(WorkerShared {
            states: Mutex::new(HashMap::new()),
            flags: Mutex::new(HashMap::new()),
            notifier,
            config,
        });

        let (sender, receiver) = mpsc::channel::<Box<dyn PipelineJob>>();
        let worker_shared = shared.clone();
        let handle = std::thread::spawn(move || {
            for job in receiver {
                worker_shared.execute(job);
            }
        });

        Self {
            sender: Some(sender),
            handle: Some(handle),
            shared,
        }
    }

    /// Enqueue a job; the caller only observes state transitions from here on
    pub fn submit(&self, job: Box<dyn PipelineJob>) -> Result<()> {
        let id = job.id();
        let user_id = job.user_id();
        self.shared
            .flags
            .lock()
            .unwrap()
            .insert(id, CancelFlag::new());
        self.shared
            .set_state(id, user_id, ExperimentState::WaitingForQueue);

        match &self.sender {
            Some(sender) => sender.send(job).map_err(|_| {
                FusionError::invalid_configuration("worker queue is no longer accepting jobs")
            }),
            None => Err(FusionError::invalid_configuration(
                "worker queue is no longer accepting jobs",
            )),
        }
    }

    /// Raise the cooperative stop flag of a job. Downstream stages observe
    /// it between chunks and pairs; the whole experiment ends up stopped.
    pub fn stop(&self, id: ExperimentId) {
        if let Some(flag) = self.shared.flags.lock().unwrap().get(&id) {
            flag.cancel();
        }
    }

    /// Last observed state of a job
    pub fn state(&self, id: ExperimentId) -> Option<ExperimentState> {
        self.shared.states.lock().unwrap().get(&id).copied()
    }

    /// Drain the queue and join the worker thread
    pub fn shutdown(mut self) {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PipelineWorker {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::UserId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingNotifier(AtomicUsize);

    impl StateNotifier for CountingNotifier {
        fn notify(&self, _user_id: UserId) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FakeJob {
        id: ExperimentId,
        runs: Arc<AtomicUsize>,
        result: fn(u32) -> Result<()>,
    }

    impl PipelineJob for FakeJob {
        fn id(&self) -> ExperimentId {
            self.id
        }
        fn user_id(&self) -> UserId {
            7
        }
        fn run(&mut self, cancel: &CancelFlag) -> Result<()> {
            cancel.check()?;
            let attempt = self.runs.fetch_add(1, Ordering::SeqCst) as u32 + 1;
            (self.result)(attempt)
        }
    }

    fn wait_for_terminal(worker: &PipelineWorker, id: ExperimentId) -> ExperimentState {
        for _ in 0..200 {
            if let Some(state) = worker.state(id) {
                if state.is_terminal() {
                    return state;
                }
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("job {} never reached a terminal state", id);
    }

    #[test]
    fn test_successful_job_completes_and_notifies() {
        let notifier = Arc::new(CountingNotifier(AtomicUsize::new(0)));
        let worker = PipelineWorker::start(WorkerConfig::default(), notifier.clone());
        let runs = Arc::new(AtomicUsize::new(0));

        worker
            .submit(Box::new(FakeJob {
                id: 1,
                runs: runs.clone(),
                result: |_| Ok(()),
            }))
            .unwrap();

        assert_eq!(wait_for_terminal(&worker, 1), ExperimentState::Completed);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        // queued, in-process, completed
        assert!(notifier.0.load(Ordering::SeqCst) >= 3);
        worker.shutdown();
    }

    #[test]
    fn test_transient_failures_retry_to_the_attempt_limit() {
        let worker = PipelineWorker::start(
            WorkerConfig { max_attempts: 3 },
            Arc::new(CountingNotifier(AtomicUsize::new(0))),
        );
        let runs = Arc::new(AtomicUsize::new(0));

        worker
            .submit(Box::new(FakeJob {
                id: 2,
                runs: runs.clone(),
                result: |_| Err(FusionError::numerical_error("flaky")),
            }))
            .unwrap();

        assert_eq!(
            wait_for_terminal(&worker, 2),
            ExperimentState::ReachedAttemptsLimit
        );
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        worker.shutdown();
    }

    #[test]
    fn test_retry_succeeding_midway_completes() {
        let worker = PipelineWorker::start(
            WorkerConfig { max_attempts: 5 },
            Arc::new(CountingNotifier(AtomicUsize::new(0))),
        );
        let runs = Arc::new(AtomicUsize::new(0));

        worker
            .submit(Box::new(FakeJob {
                id: 3,
                runs: runs.clone(),
                result: |attempt| {
                    if attempt < 3 {
                        Err(FusionError::numerical_error("flaky"))
                    } else {
                        Ok(())
                    }
                },
            }))
            .unwrap();

        assert_eq!(wait_for_terminal(&worker, 3), ExperimentState::Completed);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        worker.shutdown();
    }

    #[test]
    fn test_no_samples_in_common_is_terminal_without_retry() {
        let worker = PipelineWorker::start(
            WorkerConfig::default(),
            Arc::new(CountingNotifier(AtomicUsize::new(0))),
        );
        let runs = Arc::new(AtomicUsize::new(0));

        worker
            .submit(Box::new(FakeJob {
                id: 4,
                runs: runs.clone(),
                result: |_| Err(FusionError::NoSamplesInCommon),
            }))
            .unwrap();

        assert_eq!(
            wait_for_terminal(&worker, 4),
            ExperimentState::NoSamplesInCommon
        );
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        worker.shutdown();
    }

    #[test]
    fn test_invalid_configuration_is_not_retried() {
        let worker = PipelineWorker::start(
            WorkerConfig::default(),
            Arc::new(CountingNotifier(AtomicUsize::new(0))),
        );
        let runs = Arc::new(AtomicUsize::new(0));

        worker
            .submit(Box::new(FakeJob {
                id: 5,
                runs: runs.clone(),
                result: |_| Err(FusionError::invalid_configuration("bad")),
            }))
            .unwrap();

        assert_eq!(
            wait_for_terminal(&worker, 5),
            ExperimentState::FinishedWithError
        );
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        worker.shutdown();
    }

    #[test]
    fn test_stop_flag_maps_to_stopped() {
        let worker = PipelineWorker::start(
            WorkerConfig::default(),
            Arc::new(CountingNotifier(AtomicUsize::new(0))),
        );
        let runs = Arc::new(AtomicUsize::new(0));

        // Raise the flag before the job reaches the worker thread
        worker
            .submit(Box::new(FakeJob {
                id: 6,
                runs: runs.clone(),
                result: |_| Ok(()),
            }))
            .unwrap();
        worker.stop(6);

        // The job either completed before the stop or observed the flag;
        // submit a second one that is guaranteed to see it
        let state = wait_for_terminal(&worker, 6);
        assert!(
            state == ExperimentState::Stopped || state == ExperimentState::Completed
        );

        worker
            .submit(Box::new(FakeJob {
                id: 7,
                runs: runs.clone(),
                result: |_| Ok(()),
            }))
            .unwrap();
        worker.stop(7);
        let state = wait_for_terminal(&worker, 7);
        assert!(
            state == ExperimentState::Stopped || state == ExperimentState::Completed
        );
        worker.shutdown();
    }
}
