use crate::status::model::{ScheduledRun, ServerState};
use crate::status::progress::{Phase, ProgressState};
use human_bytes::human_bytes;
use serde::Serialize;
use std::collections::HashMap;

/// A proposed run joined with the local backup list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledBackup {
    pub backup_id: String,
    /// `None` when the backup is not (yet) known locally.
    pub name: Option<String>,
    pub time: String,
}

pub fn enrich_schedule(
    schedule: &[ScheduledRun],
    backup_names: &HashMap<String, String>,
) -> Vec<ScheduledBackup> {
    schedule
        .iter()
        .map(|run| ScheduledBackup {
            backup_id: run.backup_id.clone(),
            name: backup_names.get(&run.backup_id).cloned(),
            time: run.time.clone(),
        })
        .collect()
}

fn phase_text(phase: &Phase) -> Option<&'static str> {
    let text = match phase {
        Phase::BackupBegin => "Starting backup ...",
        Phase::BackupPreBackupVerify => "Verifying backend data ...",
        Phase::BackupPostBackupTest => "Verifying remote data ...",
        Phase::BackupPreviousBackupFinalize => "Completing previous backup ...",
        Phase::BackupFinalize => "Completing backup ...",
        Phase::BackupWaitForUpload => "Waiting for upload to finish ...",
        Phase::BackupDelete => "Deleting unwanted files ...",
        Phase::BackupCompact => "Compacting remote data ...",
        Phase::BackupVerificationUpload => "Uploading verification file ...",
        Phase::BackupPostBackupVerify => "Verifying backend data ...",
        Phase::BackupComplete => "Backup complete!",
        Phase::RestoreBegin => "Starting restore ...",
        Phase::RestoreRecreateDatabase => "Rebuilding local database ...",
        Phase::RestorePreRestoreVerify => "Verifying remote data ...",
        Phase::RestoreCreateFileList => "Building list of files to restore ...",
        Phase::RestoreCreateTargetFolders => "Creating target folders ...",
        Phase::RestoreScanForExistingFiles => "Scanning existing files ...",
        Phase::RestoreScanForLocalBlocks => "Scanning for local blocks ...",
        Phase::RestorePatchWithLocalBlocks => "Patching files with local blocks ...",
        Phase::RestoreDownloadingRemoteFiles => "Downloading files ...",
        Phase::RestorePostRestoreVerify => "Verifying restored files ...",
        Phase::RestoreCleanupTempFiles => "Removing temporary files ...",
        Phase::RestoreComplete => "Restore complete!",
        Phase::RecreateRunning => "Recreating database ...",
        Phase::VacuumRunning => "Vacuuming database ...",
        Phase::RepairRunning => "Repairing database ...",
        Phase::VerifyRunning => "Verifying files ...",
        Phase::BugReportRunning => "Creating bug report ...",
        Phase::DeleteListing => "Listing remote files ...",
        Phase::DeleteDeleting => "Deleting remote files ...",
        Phase::PurgeFilesBegin => "Listing remote files for purge ...",
        Phase::PurgeFilesProcess => "Purging files ...",
        Phase::PurgeFilesCompact => "Compacting remote data ...",
        Phase::PurgeFilesComplete => "Purging files complete!",
        Phase::Error => "Error!",
        Phase::BackupProcessingFiles | Phase::Unknown(_) => return None,
    };
    Some(text)
}

fn processing_text(progress: &ProgressState) -> String {
    if progress.still_counting {
        return format!(
            "Counting ({} files found, {})",
            progress.total_file_count,
            human_bytes(progress.total_file_size as f64)
        );
    }
    let files_left = progress
        .total_file_count
        .saturating_sub(progress.processed_file_count);
    let bytes_left = progress
        .total_file_size
        .saturating_sub(progress.processed_file_size);
    let mut text = format!(
        "{} files ({}) to go",
        files_left,
        human_bytes(bytes_left as f64)
    );
    if progress.backend_speed > 0 {
        text.push_str(&format!(" at {}/s", human_bytes(progress.backend_speed as f64)));
    }
    text
}

/// One-line description of what the server is doing.
pub fn status_text(
    server: Option<&ServerState>,
    progress: Option<&ProgressState>,
    schedule: &[ScheduledBackup],
) -> String {
    let paused = server.map(ServerState::is_paused).unwrap_or(false);
    let active = server.and_then(|s| s.active_task.as_ref()).is_some();

    if active {
        let running = match progress {
            Some(progress) if progress.phase == Phase::BackupProcessingFiles => processing_text(progress),
            Some(progress) => phase_text(&progress.phase)
                .map(str::to_string)
                .unwrap_or_else(|| "Running ...".to_string()),
            None => "Running ...".to_string(),
        };
        return if paused {
            format!("Paused: {}", running)
        } else {
            running
        };
    }

    if paused {
        return match server.and_then(|s| s.estimated_pause_end.as_deref()) {
            Some(end) if !end.is_empty() => format!("Paused until {}", end),
            _ => "Paused".to_string(),
        };
    }

    match schedule.first() {
        Some(next) => {
            let name = next.name.as_deref().unwrap_or(&next.backup_id);
            format!("Next scheduled task: {} at {}", name, next.time)
        }
        None => "No scheduled tasks".to_string(),
    }
}
