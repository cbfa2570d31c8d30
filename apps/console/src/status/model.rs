use crate::status::progress::{progress_or_indeterminate, ProgressState};
use crate::status::text::{enrich_schedule, status_text, ScheduledBackup};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// `ActiveTask` / `SchedulerQueueIds` entry: task id and backup id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedTask {
    #[serde(rename = "Item1")]
    pub task_id: i64,
    #[serde(rename = "Item2", default)]
    pub backup_id: Option<String>,
}

/// `ProposedSchedule` entry: backup id and the next run time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledRun {
    #[serde(rename = "Item1")]
    pub backup_id: String,
    #[serde(rename = "Item2")]
    pub time: String,
}

/// Server status snapshot, replaced wholesale on every update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ServerState {
    pub program_state: String,
    #[serde(rename = "LastEventID")]
    pub last_event_id: i64,
    #[serde(rename = "LastDataUpdateID")]
    pub last_data_update_id: i64,
    #[serde(rename = "LastNotificationUpdateID")]
    pub last_notification_update_id: i64,
    pub active_task: Option<QueuedTask>,
    pub scheduler_queue_ids: Vec<QueuedTask>,
    pub proposed_schedule: Vec<ScheduledRun>,
    pub estimated_pause_end: Option<String>,
    pub has_warning: bool,
    pub has_error: bool,
    pub suggested_status_icon: Option<String>,
}

impl ServerState {
    pub fn is_paused(&self) -> bool {
        self.program_state.eq_ignore_ascii_case("paused")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    /// Push stream dropped; a reconnect is attempted when the countdown ends.
    Reconnecting { seconds_left: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressPoll {
    Idle,
    Polling,
}

/// What the progress sub-poller must do after a server-state update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressCommand {
    Start { epoch: u64 },
    Stop,
    Keep,
}

/// What consumers read.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub connection: ConnectionStatus,
    pub server_state: Option<ServerState>,
    pub progress: Option<ProgressState>,
    /// `-1` while indeterminate or idle.
    pub progress_fraction: f64,
    pub progress_polling: bool,
    pub status_text: String,
    pub schedule: Vec<ScheduledBackup>,
    pub consecutive_failures: u32,
}

/// Transport-agnostic reconciler state. Pure: transports feed events in and
/// act on the returned commands.
#[derive(Debug)]
pub struct StatusModel {
    connection: ConnectionStatus,
    server_state: Option<ServerState>,
    progress: Option<ProgressState>,
    failures: u32,
    threshold: u32,
    poll: ProgressPoll,
    /// Bumped on reset; updates tagged with an older generation are dropped.
    generation: u64,
    /// Bumped whenever progress polling starts or stops.
    progress_epoch: u64,
    backup_names: HashMap<String, String>,
    names_for_update: Option<i64>,
    schedule: Vec<ScheduledBackup>,
}

pub type SharedStatus = Arc<RwLock<StatusModel>>;

impl StatusModel {
    pub fn new(failure_threshold: u32) -> Self {
        Self {
            connection: ConnectionStatus::Connecting,
            server_state: None,
            progress: None,
            failures: 0,
            threshold: failure_threshold.max(1),
            poll: ProgressPoll::Idle,
            generation: 0,
            progress_epoch: 0,
            backup_names: HashMap::new(),
            names_for_update: None,
            schedule: Vec::new(),
        }
    }

    pub fn shared(failure_threshold: u32) -> SharedStatus {
        Arc::new(RwLock::new(Self::new(failure_threshold)))
    }

    pub fn connection(&self) -> ConnectionStatus {
        self.connection
    }

    pub fn server_state(&self) -> Option<&ServerState> {
        self.server_state.as_ref()
    }

    pub fn progress(&self) -> Option<&ProgressState> {
        self.progress.as_ref()
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Cursor for the next long-poll; `None` before the first state arrived.
    pub fn last_event_id(&self) -> Option<i64> {
        self.server_state.as_ref().map(|s| s.last_event_id)
    }

    /// Applies a fresh server state. Returns `None` when the update belongs to
    /// an older generation, else the progress poller command.
    pub fn on_server_state(&mut self, generation: u64, state: ServerState) -> Option<ProgressCommand> {
        if generation != self.generation {
            return None;
        }
        self.failures = 0;
        self.connection = ConnectionStatus::Connected;
        let active = state.active_task.is_some();
        self.server_state = Some(state);
        self.refresh_schedule();

        let command = match (self.poll, active) {
            (ProgressPoll::Idle, true) => {
                self.poll = ProgressPoll::Polling;
                self.progress_epoch += 1;
                ProgressCommand::Start {
                    epoch: self.progress_epoch,
                }
            }
            (ProgressPoll::Polling, false) => {
                self.poll = ProgressPoll::Idle;
                self.progress_epoch += 1;
                self.progress = None;
                ProgressCommand::Stop
            }
            _ => ProgressCommand::Keep,
        };
        Some(command)
    }

    /// Counts a transport failure. The last state is kept; the status turns
    /// `Disconnected` once the threshold is reached.
    pub fn on_failure(&mut self) -> ConnectionStatus {
        self.failures = self.failures.saturating_add(1);
        if self.failures >= self.threshold {
            self.connection = ConnectionStatus::Disconnected;
        }
        self.connection
    }

    /// Whether polling for `epoch` is still wanted.
    pub fn wants_progress(&self, epoch: u64) -> bool {
        self.poll == ProgressPoll::Polling && epoch == self.progress_epoch
    }

    /// Applies a progress reading. Returns false when polling for `epoch`
    /// has ended and the poller should stop.
    pub fn on_progress(&mut self, epoch: u64, progress: ProgressState) -> bool {
        if !self.wants_progress(epoch) {
            return false;
        }
        self.progress = Some(progress);
        true
    }

    /// Progress pushed by the server outside any polling epoch.
    pub fn on_pushed_progress(&mut self, progress: ProgressState) {
        self.progress = Some(progress);
    }

    /// Push stream opened.
    pub fn on_connected(&mut self) {
        self.failures = 0;
        self.connection = ConnectionStatus::Connected;
    }

    pub fn on_reconnecting(&mut self, seconds_left: u64) {
        self.connection = ConnectionStatus::Reconnecting { seconds_left };
    }

    /// Transport stopped.
    pub fn on_disconnected(&mut self) {
        self.connection = ConnectionStatus::Disconnected;
    }

    pub fn on_connecting(&mut self) {
        if !matches!(self.connection, ConnectionStatus::Disconnected) {
            self.connection = ConnectionStatus::Connecting;
        }
    }

    /// Starts over: pending responses are ignored, progress polling stops.
    /// The last server state is kept for display.
    pub fn reset(&mut self) -> ProgressCommand {
        self.generation += 1;
        self.failures = 0;
        self.connection = ConnectionStatus::Connecting;
        self.progress = None;
        self.progress_epoch += 1;
        match std::mem::replace(&mut self.poll, ProgressPoll::Idle) {
            ProgressPoll::Polling => ProgressCommand::Stop,
            ProgressPoll::Idle => ProgressCommand::Keep,
        }
    }

    /// Data update id the backup name lookup must be refreshed for, if stale.
    pub fn stale_backup_names(&self) -> Option<i64> {
        let current = self.server_state.as_ref()?.last_data_update_id;
        (self.names_for_update != Some(current)).then_some(current)
    }

    pub fn set_backup_names(&mut self, data_update_id: i64, names: HashMap<String, String>) {
        self.backup_names = names;
        self.names_for_update = Some(data_update_id);
        self.refresh_schedule();
    }

    fn refresh_schedule(&mut self) {
        self.schedule = match &self.server_state {
            Some(state) => enrich_schedule(&state.proposed_schedule, &self.backup_names),
            None => Vec::new(),
        };
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            connection: self.connection,
            server_state: self.server_state.clone(),
            progress: self.progress.clone(),
            progress_fraction: self
                .progress
                .as_ref()
                .map(progress_or_indeterminate)
                .unwrap_or(-1.0),
            progress_polling: self.poll == ProgressPoll::Polling,
            status_text: status_text(self.server_state.as_ref(), self.progress.as_ref(), &self.schedule),
            schedule: self.schedule.clone(),
            consecutive_failures: self.failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle(event: i64) -> ServerState {
        ServerState {
            program_state: "Running".into(),
            last_event_id: event,
            ..ServerState::default()
        }
    }

    fn busy(event: i64) -> ServerState {
        ServerState {
            active_task: Some(QueuedTask {
                task_id: 9,
                backup_id: Some("1".into()),
            }),
            ..idle(event)
        }
    }

    #[test]
    fn failures_disconnect_after_threshold_and_keep_state() {
        let mut model = StatusModel::new(3);
        assert_eq!(model.connection(), ConnectionStatus::Connecting);
        model.on_server_state(0, idle(5));
        assert_eq!(model.connection(), ConnectionStatus::Connected);

        assert_eq!(model.on_failure(), ConnectionStatus::Connected);
        assert_eq!(model.on_failure(), ConnectionStatus::Connected);
        assert_eq!(model.on_failure(), ConnectionStatus::Disconnected);
        assert_eq!(model.on_failure(), ConnectionStatus::Disconnected);
        assert_eq!(model.server_state().map(|s| s.last_event_id), Some(5));

        model.on_server_state(0, idle(6));
        assert_eq!(model.connection(), ConnectionStatus::Connected);
        assert_eq!(model.failures(), 0);
    }

    #[test]
    fn progress_polling_follows_active_task() {
        let mut model = StatusModel::new(3);
        let start = model.on_server_state(0, busy(1)).unwrap();
        let epoch = match start {
            ProgressCommand::Start { epoch } => epoch,
            other => panic!("expected start, got {:?}", other),
        };
        assert_eq!(model.on_server_state(0, busy(2)), Some(ProgressCommand::Keep));
        assert!(model.on_progress(epoch, ProgressState::default()));

        assert_eq!(model.on_server_state(0, idle(3)), Some(ProgressCommand::Stop));
        assert!(model.progress().is_none());
        assert!(!model.on_progress(epoch, ProgressState::default()));
        assert!(model.progress().is_none());
        assert_eq!(model.on_server_state(0, idle(4)), Some(ProgressCommand::Keep));
    }

    #[test]
    fn stale_generation_is_ignored() {
        let mut model = StatusModel::new(3);
        model.on_server_state(0, busy(1));
        assert_eq!(model.reset(), ProgressCommand::Stop);
        assert_eq!(model.on_server_state(0, idle(50)), None);
        assert_eq!(model.last_event_id(), Some(1));
        assert!(model.on_server_state(1, idle(51)).is_some());
    }

    #[test]
    fn backup_names_refresh_on_data_update() {
        let mut model = StatusModel::new(3);
        assert_eq!(model.stale_backup_names(), None);
        let mut state = idle(1);
        state.last_data_update_id = 7;
        state.proposed_schedule = vec![ScheduledRun {
            backup_id: "2".into(),
            time: "2026-10-20T01:00:00Z".into(),
        }];
        model.on_server_state(0, state.clone());
        assert_eq!(model.stale_backup_names(), Some(7));
        model.set_backup_names(7, HashMap::from([("2".to_string(), "Documents".to_string())]));
        assert_eq!(model.stale_backup_names(), None);
        assert_eq!(model.snapshot().schedule[0].name.as_deref(), Some("Documents"));

        state.last_data_update_id = 8;
        model.on_server_state(0, state);
        assert_eq!(model.stale_backup_names(), Some(8));
    }

    #[test]
    fn server_state_json_shape() {
        let state: ServerState = serde_json::from_str(
            r#"{"ProgramState":"Running","LastEventID":12,"LastDataUpdateID":3,
                "ActiveTask":{"Item1":4,"Item2":"1"},"SchedulerQueueIds":[],
                "ProposedSchedule":[{"Item1":"1","Item2":"2026-10-20T00:00:00Z"}],
                "EstimatedPauseEnd":"0001-01-01T00:00:00","HasWarning":false,"HasError":false}"#,
        )
        .unwrap();
        assert_eq!(state.last_event_id, 12);
        assert_eq!(state.active_task.as_ref().map(|t| t.task_id), Some(4));
        assert_eq!(state.proposed_schedule.len(), 1);
    }

    #[test]
    fn snapshot_reports_indeterminate_progress_when_idle() {
        let model = StatusModel::new(3);
        let snapshot = model.snapshot();
        assert_eq!(snapshot.progress_fraction, -1.0);
        assert!(!snapshot.progress_polling);
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["connection"]["state"], "connecting");
    }
}
