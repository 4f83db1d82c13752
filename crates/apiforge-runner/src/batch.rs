//! Background batch execution with progress publication
//!
//! A supervisor task owns the [`TestExecution`] and is the only writer of a
//! `watch` channel. A worker task runs the cases in order and hands each
//! result to the supervisor over an mpsc channel. Readers clone the
//! receiver or wrap it in a [`WatchStream`]; a terminal state is always
//! published, even when the worker panics.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, error, info, warn};

use apiforge_core::model::{TestCase, TestExecution, TestResult};
use apiforge_core::store::Store;

use crate::executor::{Executor, ExecutorFatalError};

/// Results buffered between worker and supervisor.
const RESULT_BUFFER: usize = 16;

/// Runs individual cases for a batch.
pub trait CaseRunner: Send + Sync + 'static {
    /// Called once before the first case.
    fn prepare(&self) -> impl Future<Output = Result<(), ExecutorFatalError>> + Send;
    fn run_case(&self, case: &TestCase) -> impl Future<Output = TestResult> + Send;
}

impl CaseRunner for Executor {
    fn prepare(&self) -> impl Future<Output = Result<(), ExecutorFatalError>> + Send {
        self.preflight()
    }

    fn run_case(&self, case: &TestCase) -> impl Future<Output = TestResult> + Send {
        self.run(case)
    }
}

/// Live view of a running execution.
#[derive(Debug, Clone)]
pub struct ExecutionHandle {
    id: String,
    rx: watch::Receiver<TestExecution>,
}

impl ExecutionHandle {
    /// Handle over an execution that is already terminal.
    #[must_use]
    pub fn finished(execution: TestExecution) -> Self {
        let id = execution.id.clone();
        let (_, rx) = watch::channel(execution);
        Self { id, rx }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the terminal state has been published.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.rx.borrow().status.is_terminal()
    }

    /// Latest published state.
    #[must_use]
    pub fn snapshot(&self) -> TestExecution {
        self.rx.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TestExecution> {
        self.rx.clone()
    }

    /// Every published state from now on, ending after the terminal one.
    #[must_use]
    pub fn stream(&self) -> WatchStream<TestExecution> {
        WatchStream::new(self.rx.clone())
    }

    /// Wait for the terminal state.
    pub async fn wait(&self) -> TestExecution {
        let mut rx = self.rx.clone();
        // The sender is only dropped after the terminal state is published.
        let _ = rx.wait_for(|e| e.status.is_terminal()).await;
        let state = rx.borrow().clone();
        state
    }
}

/// Start `execution` in the background, persisting every update to `store`.
pub fn spawn<R: CaseRunner>(
    runner: Arc<R>,
    store: Arc<dyn Store>,
    execution: TestExecution,
    cases: Vec<TestCase>,
) -> ExecutionHandle {
    let id = execution.id.clone();
    persist(store.as_ref(), &execution);
    let (tx, rx) = watch::channel(execution.clone());
    tokio::spawn(supervise(runner, store, tx, execution, cases));
    ExecutionHandle { id, rx }
}

async fn supervise<R: CaseRunner>(
    runner: Arc<R>,
    store: Arc<dyn Store>,
    tx: watch::Sender<TestExecution>,
    mut execution: TestExecution,
    cases: Vec<TestCase>,
) {
    let execution_id = execution.id.clone();
    info!(execution_id = %execution_id, total = cases.len(), "execution started");

    if let Err(e) = runner.prepare().await {
        error!(execution_id = %execution_id, error = %e, "execution cannot start");
        execution.fail(e.to_string());
        publish(store.as_ref(), &tx, &execution);
        return;
    }

    let (result_tx, mut result_rx) = mpsc::channel(RESULT_BUFFER);
    let worker = tokio::spawn(async move {
        for case in cases {
            let result = runner.run_case(&case).await;
            if result_tx.send(result).await.is_err() {
                break;
            }
        }
    });

    while let Some(result) = result_rx.recv().await {
        debug!(
            execution_id = %execution_id,
            index = result.test_case_index,
            status = %result.status,
            "case finished"
        );
        execution.record(result);
        publish(store.as_ref(), &tx, &execution);
    }

    match worker.await {
        Ok(()) => execution.complete(),
        Err(e) => {
            error!(execution_id = %execution_id, error = %e, "execution worker stopped");
            execution.fail(format!("execution worker stopped: {e}"));
        }
    }
    let s = execution.summary;
    info!(
        execution_id = %execution_id,
        passed = s.passed,
        failed = s.failed,
        errors = s.errors,
        "execution finished"
    );
    publish(store.as_ref(), &tx, &execution);
}

fn publish(store: &dyn Store, tx: &watch::Sender<TestExecution>, execution: &TestExecution) {
    persist(store, execution);
    tx.send_replace(execution.clone());
}

fn persist(store: &dyn Store, execution: &TestExecution) {
    if let Err(e) = store.put_execution(execution) {
        warn!(execution_id = %execution.id, error = %e, "cannot persist execution");
    }
}
