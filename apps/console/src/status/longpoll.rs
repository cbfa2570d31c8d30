use crate::status::backoff::Backoff;
use crate::status::model::SharedStatus;
use crate::status::poller::ProgressPoller;
use crate::status::{refresh_backup_names, StatusApi, StatusSettings};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Long-poll loop. At most one request is in flight; each answer schedules
/// the next. Failures back off but polling never stops until cancelled.
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
    let mut backoff = Backoff::new(settings.retry_delay, settings.retry_max_delay);
    info!("status: long-poll transport started");

    while !cancel.is_cancelled() {
        let (cursor, generation) = {
            let model = model.read().await;
            (model.last_event_id(), model.generation())
        };
        let result = api.server_state(cursor, settings.longpoll_hold).await;
        if cancel.is_cancelled() {
            break;
        }
        match result {
            Ok(state) => {
                backoff.reset();
                let event_id = state.last_event_id;
                let command = model.write().await.on_server_state(generation, state);
                match command {
                    Some(command) => poller.apply(command),
                    None => debug!("status: dropped stale state event_id={}", event_id),
                }
                refresh_backup_names(api.as_ref(), &model).await;
            }
            Err(err) => {
                let status = model.write().await.on_failure();
                let delay = backoff.next_delay();
                if err.is_transient() {
                    warn!(
                        "status: poll failed err={} status={:?} retry_in_ms={}",
                        err,
                        status,
                        delay.as_millis()
                    );
                } else {
                    // Polling never stops, even on non-transient errors.
                    error!(
                        "status: poll rejected err={} status={:?} retry_in_ms={}",
                        err,
                        status,
                        delay.as_millis()
                    );
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    poller.stop();
    model.write().await.on_disconnected();
    info!("status: long-poll transport stopped");
}
