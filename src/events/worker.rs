//! Background dispatcher task.
//!
//! Runs a dispatch pass whenever the bus is poked and, failing that, every
//! `dispatch_sweep_interval`. The pass itself is blocking SQLite work and is
//! moved off the async workers with `spawn_blocking`.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::core_state::CoreState;
use crate::error::CoreError;

/// Handle for the dispatcher task. Dropping it requests shutdown without
/// waiting; `shutdown().await` waits for the current pass to finish.
pub struct DispatcherHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl DispatcherHandle {
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "event dispatcher did not stop cleanly");
            }
        }
    }
}

impl Drop for DispatcherHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Spawn the dispatcher on the current tokio runtime. One per `CoreState`.
pub fn start_dispatcher(core: Arc<CoreState>) -> Result<DispatcherHandle, CoreError> {
    let mut wake = core
        .events()
        .take_receiver()
        .ok_or_else(|| CoreError::Conflict("event dispatcher already started".into()))?;
    let sweep = core.config().dispatch_sweep_interval;
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        tracing::info!(sweep_secs = sweep.as_secs(), "event dispatcher started");
        loop {
            let pass = Arc::clone(&core);
            match tokio::task::spawn_blocking(move || pass.dispatch_pending()).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "dispatch pass failed"),
                Err(e) => tracing::error!(error = %e, "dispatch pass panicked"),
            }

            tokio::select! {
                _ = &mut shutdown_rx => break,
                woke = wake.recv() => {
                    if woke.is_none() {
                        break;
                    }
                    // Coalesce notifications that piled up during the pass.
                    while wake.try_recv().is_ok() {}
                }
                () = tokio::time::sleep(sweep) => {}
            }
        }
        tracing::info!("event dispatcher stopped");
    });

    Ok(DispatcherHandle {
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Fixture;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn submission_is_processed_in_background() {
        let fx = Fixture::with_open_visit();
        let core = Arc::clone(&fx.core);
        let handle = start_dispatcher(Arc::clone(&core)).unwrap();

        let ctx = fx.patient_ctx();
        fx.answer_required(&ctx);
        core.submit_visit(&ctx, fx.visit_id).unwrap();

        let mut tagged = false;
        for _ in 0..200 {
            let tags = core.case_tags(&fx.cc_ctx(), fx.case_id).unwrap();
            if tags.iter().any(|t| t.tag == "insured") {
                tagged = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(tagged, "dispatcher never tagged the case");
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn second_dispatcher_is_refused() {
        let fx = Fixture::new();
        let first = start_dispatcher(Arc::clone(&fx.core)).unwrap();
        let err = start_dispatcher(Arc::clone(&fx.core)).err().unwrap();
        assert_eq!(err.code(), "conflict");
        first.shutdown().await;
    }
}
