use crate::status::model::SharedStatus;
use crate::status::poller::ProgressPoller;
use crate::status::{refresh_backup_names, PushEvent, StatusApi, StatusSettings};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

enum StreamEnd {
    Cancelled,
    Closed,
    Failed(String),
}

/// Push loop: keeps one event stream open. When it drops, the status shows a
/// per-second reconnect countdown and the stream is reopened afterwards.
pub async fn run<A: StatusApi>(
    api: Arc<A>,
    model: SharedStatus,
    settings: StatusSettings,
    cancel: CancellationToken,
) {
    let mut poller = ProgressPoller::new(
        Arc::clone(&api),
        Arc::clone(&model),
        settings.progress_interval,
        cancel.clone(),
    );
    info!("status: push transport started");

    'outer: while !cancel.is_cancelled() {
        let generation = {
            let mut model = model.write().await;
            model.on_connecting();
            model.generation()
        };

        let end = match api.subscribe().await {
            Ok(mut stream) => {
                model.write().await.on_connected();
                debug!("status: push stream open");
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break StreamEnd::Cancelled,
                        item = stream.next() => match item {
                            Some(Ok(PushEvent::ServerStatus(state))) => {
                                let command = model.write().await.on_server_state(generation, state);
                                if let Some(command) = command {
                                    poller.apply(command);
                                }
                                refresh_backup_names(api.as_ref(), &model).await;
                            }
                            Some(Ok(PushEvent::Progress(progress))) => {
                                model.write().await.on_pushed_progress(progress);
                            }
                            Some(Err(err)) => break StreamEnd::Failed(err.to_string()),
                            None => break StreamEnd::Closed,
                        }
                    }
                }
            }
            Err(err) => {
                model.write().await.on_failure();
                StreamEnd::Failed(err.to_string())
            }
        };

        match end {
            StreamEnd::Cancelled => break,
            StreamEnd::Closed => warn!("status: push stream closed"),
            StreamEnd::Failed(err) => warn!("status: push stream failed err={}", err),
        }

        for seconds_left in (1..=settings.reconnect_delay.as_secs().max(1)).rev() {
            model.write().await.on_reconnecting(seconds_left);
            tokio::select! {
                _ = cancel.cancelled() => break 'outer,
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            }
        }
    }

    poller.stop();
    model.write().await.on_disconnected();
    info!("status: push transport stopped");
}
