use crate::status::model::{ProgressCommand, SharedStatus};
use crate::status::StatusApi;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Fetches the progress sub-resource on a fixed interval while a task is
/// active. Driven by the commands the status model returns.
pub struct ProgressPoller<A: StatusApi> {
    api: Arc<A>,
    model: SharedStatus,
    interval: Duration,
    parent: CancellationToken,
    current: Option<CancellationToken>,
}

impl<A: StatusApi> ProgressPoller<A> {
    pub fn new(api: Arc<A>, model: SharedStatus, interval: Duration, parent: CancellationToken) -> Self {
        Self {
            api,
            model,
            interval,
            parent,
            current: None,
        }
    }

    pub fn apply(&mut self, command: ProgressCommand) {
        match command {
            ProgressCommand::Start { epoch } => {
                self.stop();
                let token = self.parent.child_token();
                debug!("status: progress polling started epoch={}", epoch);
                tokio::spawn(run(
                    Arc::clone(&self.api),
                    Arc::clone(&self.model),
                    epoch,
                    self.interval,
                    token.clone(),
                ));
                self.current = Some(token);
            }
            ProgressCommand::Stop => self.stop(),
            ProgressCommand::Keep => {}
        }
    }

    pub fn stop(&mut self) {
        if let Some(token) = self.current.take() {
            debug!("status: progress polling stopped");
            token.cancel();
        }
    }
}

impl<A: StatusApi> Drop for ProgressPoller<A> {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run<A: StatusApi>(
    api: Arc<A>,
    model: SharedStatus,
    epoch: u64,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        // A reset or a stop may have ended this epoch since the last tick.
        if !model.read().await.wants_progress(epoch) {
            break;
        }
        match api.progress_state().await {
            Ok(progress) => {
                if cancel.is_cancelled() || !model.write().await.on_progress(epoch, progress) {
                    break;
                }
            }
            Err(err) => debug!("status: progress fetch failed err={}", err),
        }
    }
}
