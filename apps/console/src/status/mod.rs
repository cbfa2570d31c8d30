//! Live server status: transports, progress sub-polling and the derived model.

pub mod backoff;
pub mod longpoll;
pub mod model;
pub mod poller;
pub mod progress;
pub mod push;
pub mod text;

use crate::config::{ConsoleConfig, TransportKind};
use crate::errors::Result;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub use model::{
    ConnectionStatus, ProgressCommand, ProgressPoll, QueuedTask, ScheduledRun, ServerState,
    SharedStatus, StatusModel, StatusSnapshot,
};
pub use progress::{calculate_progress, Phase, ProgressState};
pub use text::{enrich_schedule, status_text, ScheduledBackup};

/// One frame of the push stream.
#[derive(Debug, Clone)]
pub enum PushEvent {
    ServerStatus(ServerState),
    Progress(ProgressState),
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl PushEvent {
    /// Decodes a `{"type": ..., "data": ...}` frame. Unknown frame types are
    /// `Ok(None)`.
    pub fn from_json(text: &str) -> Result<Option<Self>> {
        let frame: RawFrame = serde_json::from_str(text)?;
        let event = match frame.kind.as_str() {
            "serverstatus" => Some(PushEvent::ServerStatus(serde_json::from_value(frame.data)?)),
            "progress" => Some(PushEvent::Progress(serde_json::from_value(frame.data)?)),
            other => {
                debug!("status: ignoring push frame type={}", other);
                None
            }
        };
        Ok(event)
    }
}

pub type PushStream = BoxStream<'static, Result<PushEvent>>;

/// Server endpoints the reconciler depends on.
#[async_trait]
pub trait StatusApi: Send + Sync + 'static {
    /// Server state. With a cursor the server may hold the request for up
    /// to `hold` until something newer than the cursor happens.
    async fn server_state(&self, last_event_id: Option<i64>, hold: Duration) -> Result<ServerState>;
    async fn progress_state(&self) -> Result<ProgressState>;
    /// Backup id to display name.
    async fn backup_names(&self) -> Result<HashMap<String, String>>;
    async fn subscribe(&self) -> Result<PushStream>;
}

#[derive(Debug, Clone)]
pub struct StatusSettings {
    pub transport: TransportKind,
    pub longpoll_hold: Duration,
    pub failure_threshold: u32,
    pub retry_delay: Duration,
    pub retry_max_delay: Duration,
    pub reconnect_delay: Duration,
    pub progress_interval: Duration,
}

impl From<&ConsoleConfig> for StatusSettings {
    fn from(config: &ConsoleConfig) -> Self {
        Self {
            transport: config.transport,
            longpoll_hold: config.longpoll_hold(),
            failure_threshold: config.failure_threshold,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            retry_max_delay: Duration::from_millis(config.retry_max_delay_ms),
            reconnect_delay: config.reconnect_delay(),
            progress_interval: config.progress_interval(),
        }
    }
}

pub(crate) async fn refresh_backup_names<A: StatusApi>(api: &A, model: &SharedStatus) {
    let Some(update_id) = model.read().await.stale_backup_names() else {
        return;
    };
    match api.backup_names().await {
        Ok(names) => model.write().await.set_backup_names(update_id, names),
        Err(err) => debug!("status: backup list refresh failed err={}", err),
    }
}

/// Running reconciler.
pub struct StatusHandle {
    model: SharedStatus,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl StatusHandle {
    pub fn model(&self) -> SharedStatus {
        Arc::clone(&self.model)
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        self.model.read().await.snapshot()
    }

    /// Ignores responses still in flight and stops progress polling. The
    /// poller checks the model before every fetch, so none is issued after
    /// this returns.
    pub async fn reset(&self) {
        if self.model.write().await.reset() == ProgressCommand::Stop {
            debug!("status: reset stopped progress polling");
        }
    }

    /// Cancels the transport and the progress poller. Requests already sent
    /// are not awaited; their answers are discarded.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub async fn join(self) {
        self.stop();
        let _ = self.task.await;
    }
}

/// Starts the transport selected in `settings`.
pub fn spawn<A: StatusApi>(api: Arc<A>, settings: StatusSettings) -> StatusHandle {
    let model = StatusModel::shared(settings.failure_threshold);
    let cancel = CancellationToken::new();
    info!("status: starting transport={:?}", settings.transport);
    let task = match settings.transport {
        TransportKind::LongPoll => tokio::spawn(longpoll::run(
            api,
            Arc::clone(&model),
            settings,
            cancel.clone(),
        )),
        TransportKind::Push => tokio::spawn(push::run(api, Arc::clone(&model), settings, cancel.clone())),
    };
    StatusHandle {
        model,
        cancel,
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ConsoleError;
    use futures_util::{stream, StreamExt};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    type Scripted<T> = Mutex<VecDeque<(Duration, Result<T>)>>;

    /// Answers from a script; once it runs dry every call hangs.
    #[derive(Default)]
    struct FakeApi {
        states: Scripted<ServerState>,
        streams: Mutex<VecDeque<Result<Vec<PushEvent>>>>,
        cursors: Mutex<Vec<Option<i64>>>,
        progress_calls: AtomicUsize,
        name_calls: AtomicUsize,
    }

    impl FakeApi {
        fn with_states(states: Vec<(u64, Result<ServerState>)>) -> Arc<Self> {
            let script = states
                .into_iter()
                .map(|(secs, result)| (Duration::from_secs(secs), result))
                .collect();
            Arc::new(Self {
                states: Mutex::new(script),
                ..Self::default()
            })
        }

        fn progress_calls(&self) -> usize {
            self.progress_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StatusApi for FakeApi {
        async fn server_state(&self, last_event_id: Option<i64>, _hold: Duration) -> Result<ServerState> {
            self.cursors.lock().unwrap().push(last_event_id);
            let next = self.states.lock().unwrap().pop_front();
            match next {
                Some((delay, result)) => {
                    tokio::time::sleep(delay).await;
                    result
                }
                None => std::future::pending().await,
            }
        }

        async fn progress_state(&self) -> Result<ProgressState> {
            self.progress_calls.fetch_add(1, Ordering::SeqCst);
            Ok(ProgressState {
                phase: Phase::BackupProcessingFiles,
                processed_file_size: 25,
                total_file_size: 100,
                ..ProgressState::default()
            })
        }

        async fn backup_names(&self) -> Result<HashMap<String, String>> {
            self.name_calls.fetch_add(1, Ordering::SeqCst);
            Ok(HashMap::from([("1".to_string(), "Laptop".to_string())]))
        }

        async fn subscribe(&self) -> Result<PushStream> {
            let next = self.streams.lock().unwrap().pop_front();
            match next {
                Some(Ok(events)) => Ok(stream::iter(events.into_iter().map(Ok)).boxed()),
                Some(Err(err)) => Err(err),
                None => Ok(stream::pending::<Result<PushEvent>>().boxed()),
            }
        }
    }

    fn settings(transport: TransportKind) -> StatusSettings {
        StatusSettings::from(&ConsoleConfig {
            transport,
            ..ConsoleConfig::default()
        })
    }

    fn state(event: i64, active: bool) -> ServerState {
        ServerState {
            program_state: "Running".into(),
            last_event_id: event,
            last_data_update_id: 1,
            active_task: active.then(|| QueuedTask {
                task_id: 1,
                backup_id: Some("1".into()),
            }),
            ..ServerState::default()
        }
    }

    fn failure() -> Result<ServerState> {
        Err(ConsoleError::Transport("connection refused".into()))
    }

    async fn wait(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_failures_disconnect_but_keep_polling() {
        let api = FakeApi::with_states(vec![(0, failure()), (0, failure()), (0, failure()), (0, failure())]);
        let handle = spawn(Arc::clone(&api), settings(TransportKind::LongPoll));

        wait(120_000).await;
        let snapshot = handle.snapshot().await;
        assert_eq!(snapshot.connection, ConnectionStatus::Disconnected);
        assert_eq!(snapshot.consecutive_failures, 4);
        assert!(snapshot.server_state.is_none());
        // A fifth request is pending: the loop never gives up.
        assert_eq!(api.cursors.lock().unwrap().len(), 5);
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn last_state_survives_failures() {
        let api = FakeApi::with_states(vec![
            (0, Ok(state(7, false))),
            (0, failure()),
            (0, failure()),
            (0, failure()),
            (0, failure()),
        ]);
        let handle = spawn(Arc::clone(&api), settings(TransportKind::LongPoll));

        wait(120_000).await;
        let snapshot = handle.snapshot().await;
        assert_eq!(snapshot.connection, ConnectionStatus::Disconnected);
        assert_eq!(snapshot.server_state.map(|s| s.last_event_id), Some(7));
        let cursors = api.cursors.lock().unwrap().clone();
        assert_eq!(cursors[0], None);
        assert!(cursors[1..].iter().all(|c| *c == Some(7)));
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn progress_is_polled_only_while_a_task_runs() {
        let api = FakeApi::with_states(vec![(0, Ok(state(1, true))), (3, Ok(state(2, false)))]);
        let handle = spawn(Arc::clone(&api), settings(TransportKind::LongPoll));

        wait(2_500).await;
        let running = handle.snapshot().await;
        assert!(running.progress_polling);
        assert_eq!(running.progress_fraction, 0.25);
        assert!(api.progress_calls() >= 3);

        wait(1_000).await;
        let after_stop = api.progress_calls();
        wait(10_000).await;
        assert_eq!(api.progress_calls(), after_stop);
        let idle = handle.snapshot().await;
        assert!(!idle.progress_polling);
        assert!(idle.progress.is_none());
        assert_eq!(api.name_calls.load(Ordering::SeqCst), 1);
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reset_stops_progress_fetches_at_once() {
        let api = FakeApi::with_states(vec![(0, Ok(state(1, true)))]);
        let handle = spawn(Arc::clone(&api), settings(TransportKind::LongPoll));

        wait(2_500).await;
        assert!(handle.snapshot().await.progress_polling);
        let before_reset = api.progress_calls();
        assert!(before_reset >= 2);

        handle.reset().await;
        wait(10_000).await;
        assert_eq!(api.progress_calls(), before_reset);
        let snapshot = handle.snapshot().await;
        assert!(!snapshot.progress_polling);
        assert!(snapshot.progress.is_none());
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn push_drop_counts_down_then_reconnects() {
        let api = Arc::new(FakeApi::default());
        api.streams
            .lock()
            .unwrap()
            .push_back(Ok(vec![PushEvent::ServerStatus(state(3, false))]));
        let handle = spawn(Arc::clone(&api), settings(TransportKind::Push));

        wait(500).await;
        let dropped = handle.snapshot().await;
        assert_eq!(dropped.connection, ConnectionStatus::Reconnecting { seconds_left: 5 });
        assert_eq!(dropped.server_state.map(|s| s.last_event_id), Some(3));

        wait(2_000).await;
        assert_eq!(
            handle.snapshot().await.connection,
            ConnectionStatus::Reconnecting { seconds_left: 3 }
        );

        wait(3_500).await;
        assert_eq!(handle.snapshot().await.connection, ConnectionStatus::Connected);
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_the_transport() {
        let api = Arc::new(FakeApi::default());
        let handle = spawn(Arc::clone(&api), settings(TransportKind::Push));
        wait(100).await;
        assert_eq!(handle.snapshot().await.connection, ConnectionStatus::Connected);
        handle.stop();
        wait(100).await;
        assert!(handle.task.is_finished());
        assert_eq!(handle.snapshot().await.connection, ConnectionStatus::Disconnected);
    }

    #[test]
    fn push_frames_decode() {
        let event = PushEvent::from_json(r#"{"type":"serverstatus","data":{"LastEventID":4}}"#)
            .unwrap()
            .unwrap();
        assert!(matches!(event, PushEvent::ServerStatus(ref s) if s.last_event_id == 4));
        assert!(PushEvent::from_json(r#"{"type":"taskqueue","data":[]}"#).unwrap().is_none());
        assert!(PushEvent::from_json("not json").is_err());
    }
}
