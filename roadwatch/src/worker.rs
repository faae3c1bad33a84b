//! Detection worker task.
//!
use std::future::Future;

use anyhow::Result;
use common::protocol::{WorkerCommand, WorkerEvent};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
};

use crate::nn::InferModel;

pub type CommandSender = mpsc::Sender<WorkerCommand>;
pub type EventReceiver = mpsc::UnboundedReceiver<WorkerEvent>;

/// Capacity of the command channel.
///
/// Keeping it at one queued command makes `try_send` on the capture side
/// fail while an inference is outstanding, so frames are skipped instead of
/// piling up behind a slow model.
pub const COMMAND_QUEUE_DEPTH: usize = 1;

enum WorkerState<M> {
    Unloaded,
    Loading(JoinHandle<Result<M>>),
    Ready(M),
}

/// Spawn the detection worker.
///
/// The worker owns the model for its whole lifetime. It accepts `load` and
/// `detect` commands and emits `modelLoaded` and `predictions` events.
/// `detect` commands received before the model is ready are dropped without
/// an error. A failed load is logged and leaves the worker unloaded, so a
/// later `load` retries.
pub fn spawn_detection_worker<M, F, Fut>(loader: F) -> (CommandSender, EventReceiver)
where
    M: InferModel + Send + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<M>> + Send + 'static,
{
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    tokio::spawn(run_worker(cmd_rx, event_tx, loader));

    (cmd_tx, event_rx)
}

async fn run_worker<M, F, Fut>(
    mut cmd_rx: mpsc::Receiver<WorkerCommand>,
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
    mut loader: F,
) where
    M: InferModel + Send + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<M>> + Send + 'static,
{
    let mut state = WorkerState::Unloaded;

    loop {
        state = match state {
            WorkerState::Unloaded => match cmd_rx.recv().await {
                None => return,
                Some(WorkerCommand::Load) => {
                    log::info!("Loading detection model");
                    WorkerState::Loading(tokio::spawn(loader()))
                }
                Some(WorkerCommand::Detect { .. }) => {
                    log::debug!("Dropping detect command, model not loaded");
                    WorkerState::Unloaded
                }
            },
            WorkerState::Loading(mut load_handle) => {
                tokio::select! {
                    result = &mut load_handle => match result {
                        Ok(Ok(model)) => {
                            log::info!("Detection model ready");
                            if event_tx.send(WorkerEvent::ModelLoaded).is_err() {
                                return;
                            }
                            WorkerState::Ready(model)
                        }
                        Ok(Err(err)) => {
                            log::error!("Model load failed: {err:#}");
                            WorkerState::Unloaded
                        }
                        Err(err) => {
                            log::error!("Model loader task failed: {err}");
                            WorkerState::Unloaded
                        }
                    },
                    cmd = cmd_rx.recv() => match cmd {
                        None => {
                            load_handle.abort();
                            return;
                        }
                        Some(WorkerCommand::Detect { .. }) => {
                            log::debug!("Dropping detect command, model still loading");
                            WorkerState::Loading(load_handle)
                        }
                        Some(WorkerCommand::Load) => {
                            log::debug!("Load already in progress");
                            WorkerState::Loading(load_handle)
                        }
                    },
                }
            }
            WorkerState::Ready(model) => match cmd_rx.recv().await {
                None => return,
                Some(WorkerCommand::Detect { image_data }) => {
                    match model.run(&image_data) {
                        Ok(predictions) => {
                            if event_tx
                                .send(WorkerEvent::Predictions { predictions })
                                .is_err()
                            {
                                return;
                            }
                        }
                        Err(err) => log::error!("Inference failed: {err:#}"),
                    }
                    WorkerState::Ready(model)
                }
                Some(WorkerCommand::Load) => {
                    log::debug!("Model already loaded");
                    WorkerState::Ready(model)
                }
            },
        };
    }
}
