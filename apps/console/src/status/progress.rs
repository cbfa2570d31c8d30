use serde::{Deserialize, Serialize};
use std::fmt;

/// Task phase reported by the server. Unrecognized names are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Phase {
    BackupBegin,
    BackupPreBackupVerify,
    BackupPostBackupTest,
    BackupPreviousBackupFinalize,
    BackupProcessingFiles,
    BackupFinalize,
    BackupWaitForUpload,
    BackupDelete,
    BackupCompact,
    BackupVerificationUpload,
    BackupPostBackupVerify,
    BackupComplete,
    RestoreBegin,
    RestoreRecreateDatabase,
    RestorePreRestoreVerify,
    RestoreCreateFileList,
    RestoreCreateTargetFolders,
    RestoreScanForExistingFiles,
    RestoreScanForLocalBlocks,
    RestorePatchWithLocalBlocks,
    RestoreDownloadingRemoteFiles,
    RestorePostRestoreVerify,
    RestoreCleanupTempFiles,
    RestoreComplete,
    RecreateRunning,
    VacuumRunning,
    RepairRunning,
    VerifyRunning,
    BugReportRunning,
    DeleteListing,
    DeleteDeleting,
    PurgeFilesBegin,
    PurgeFilesProcess,
    PurgeFilesCompact,
    PurgeFilesComplete,
    Error,
    Unknown(String),
}

const PHASE_NAMES: &[(Phase, &str)] = &[
    (Phase::BackupBegin, "Backup_Begin"),
    (Phase::BackupPreBackupVerify, "Backup_PreBackupVerify"),
    (Phase::BackupPostBackupTest, "Backup_PostBackupTest"),
    (Phase::BackupPreviousBackupFinalize, "Backup_PreviousBackupFinalize"),
    (Phase::BackupProcessingFiles, "Backup_ProcessingFiles"),
    (Phase::BackupFinalize, "Backup_Finalize"),
    (Phase::BackupWaitForUpload, "Backup_WaitForUpload"),
    (Phase::BackupDelete, "Backup_Delete"),
    (Phase::BackupCompact, "Backup_Compact"),
    (Phase::BackupVerificationUpload, "Backup_VerificationUpload"),
    (Phase::BackupPostBackupVerify, "Backup_PostBackupVerify"),
    (Phase::BackupComplete, "Backup_Complete"),
    (Phase::RestoreBegin, "Restore_Begin"),
    (Phase::RestoreRecreateDatabase, "Restore_RecreateDatabase"),
    (Phase::RestorePreRestoreVerify, "Restore_PreRestoreVerify"),
    (Phase::RestoreCreateFileList, "Restore_CreateFileList"),
    (Phase::RestoreCreateTargetFolders, "Restore_CreateTargetFolders"),
    (Phase::RestoreScanForExistingFiles, "Restore_ScanForExistingFiles"),
    (Phase::RestoreScanForLocalBlocks, "Restore_ScanForLocalBlocks"),
    (Phase::RestorePatchWithLocalBlocks, "Restore_PatchWithLocalBlocks"),
    (Phase::RestoreDownloadingRemoteFiles, "Restore_DownloadingRemoteFiles"),
    (Phase::RestorePostRestoreVerify, "Restore_PostRestoreVerify"),
    (Phase::RestoreCleanupTempFiles, "Restore_CleanupTempFiles"),
    (Phase::RestoreComplete, "Restore_Complete"),
    (Phase::RecreateRunning, "Recreate_Running"),
    (Phase::VacuumRunning, "Vacuum_Running"),
    (Phase::RepairRunning, "Repair_Running"),
    (Phase::VerifyRunning, "Verify_Running"),
    (Phase::BugReportRunning, "BugReport_Running"),
    (Phase::DeleteListing, "Delete_Listing"),
    (Phase::DeleteDeleting, "Delete_Deleting"),
    (Phase::PurgeFilesBegin, "PurgeFiles_Begin"),
    (Phase::PurgeFilesProcess, "PurgeFiles_Process"),
    (Phase::PurgeFilesCompact, "PurgeFiles_Compact"),
    (Phase::PurgeFilesComplete, "PurgeFiles_Complete"),
    (Phase::Error, "Error"),
];

impl Phase {
    pub fn parse(name: &str) -> Self {
        PHASE_NAMES
            .iter()
            .find(|(_, known)| *known == name)
            .map(|(phase, _)| phase.clone())
            .unwrap_or_else(|| Phase::Unknown(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Phase::Unknown(name) => name,
            known => PHASE_NAMES
                .iter()
                .find(|(phase, _)| phase == known)
                .map(|(_, name)| *name)
                .unwrap_or_default(),
        }
    }
}

impl Default for Phase {
    fn default() -> Self {
        Phase::Unknown(String::new())
    }
}

impl From<String> for Phase {
    fn from(name: String) -> Self {
        Phase::parse(&name)
    }
}

impl From<Phase> for String {
    fn from(phase: Phase) -> Self {
        phase.as_str().to_string()
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress sub-resource of the active task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ProgressState {
    #[serde(rename = "BackupID")]
    pub backup_id: Option<String>,
    #[serde(rename = "TaskID")]
    pub task_id: i64,
    pub phase: Phase,
    pub overall_progress: f64,
    pub processed_file_count: u64,
    pub processed_file_size: u64,
    pub total_file_count: u64,
    pub total_file_size: u64,
    pub still_counting: bool,
    pub current_filename: Option<String>,
    pub current_filesize: u64,
    pub current_fileoffset: u64,
    pub backend_action: Option<String>,
    pub backend_speed: i64,
    pub backend_is_blocking: bool,
}

const PROCESSING_CAP: f64 = 0.9;

/// Fraction done in `[0, 1]`, or `None` when it cannot be estimated and a
/// spinner should be shown instead of a bar.
///
/// Known phases map to disjoint bands so the bar never moves backwards when
/// the task advances: counting 0, file processing up to 0.9, finalizing 0.9,
/// cleanup 0.95, verification 0.98, done 1.
pub fn calculate_progress(progress: &ProgressState) -> Option<f64> {
    let fraction = match progress.phase {
        Phase::BackupBegin | Phase::BackupPreBackupVerify => 0.0,
        Phase::BackupProcessingFiles => {
            if progress.still_counting || progress.total_file_size == 0 {
                0.0
            } else {
                let done = progress.processed_file_size as f64 / progress.total_file_size as f64;
                done.min(PROCESSING_CAP)
            }
        }
        Phase::BackupFinalize | Phase::BackupWaitForUpload | Phase::BackupPreviousBackupFinalize => {
            PROCESSING_CAP
        }
        Phase::BackupDelete | Phase::BackupCompact => 0.95,
        Phase::BackupVerificationUpload
        | Phase::BackupPostBackupVerify
        | Phase::BackupPostBackupTest => 0.98,
        Phase::BackupComplete | Phase::RestoreComplete => 1.0,
        _ => {
            let reported = progress.overall_progress;
            return (reported.is_finite() && (0.0..=1.0).contains(&reported)).then_some(reported);
        }
    };
    Some(fraction.clamp(0.0, 1.0))
}

/// `calculate_progress` as served to the UI: `-1` means indeterminate.
pub fn progress_or_indeterminate(progress: &ProgressState) -> f64 {
    calculate_progress(progress).unwrap_or(-1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(phase: Phase) -> ProgressState {
        ProgressState {
            phase,
            ..ProgressState::default()
        }
    }

    #[test]
    fn processing_files_follows_bytes() {
        let mut progress = state(Phase::BackupProcessingFiles);
        progress.still_counting = true;
        progress.processed_file_size = 50;
        progress.total_file_size = 100;
        assert_eq!(calculate_progress(&progress), Some(0.0));

        progress.still_counting = false;
        assert_eq!(calculate_progress(&progress), Some(0.5));

        progress.processed_file_size = 99;
        assert_eq!(calculate_progress(&progress), Some(0.9));
    }

    #[test]
    fn fixed_bands_per_phase() {
        assert_eq!(calculate_progress(&state(Phase::BackupBegin)), Some(0.0));
        assert_eq!(calculate_progress(&state(Phase::BackupWaitForUpload)), Some(0.9));
        assert_eq!(calculate_progress(&state(Phase::BackupCompact)), Some(0.95));
        assert_eq!(calculate_progress(&state(Phase::BackupPostBackupVerify)), Some(0.98));
        assert_eq!(calculate_progress(&state(Phase::BackupComplete)), Some(1.0));
    }

    #[test]
    fn other_phases_use_reported_progress_or_spinner() {
        let mut restore = state(Phase::RestoreDownloadingRemoteFiles);
        restore.overall_progress = 0.4;
        assert_eq!(calculate_progress(&restore), Some(0.4));

        let mut unknown = state(Phase::parse("Something_New"));
        unknown.overall_progress = -1.0;
        assert_eq!(calculate_progress(&unknown), None);
        assert_eq!(progress_or_indeterminate(&unknown), -1.0);
    }

    #[test]
    fn phase_names_round_trip_through_json() {
        let progress: ProgressState = serde_json::from_str(
            r#"{"BackupID":"3","TaskID":7,"Phase":"Backup_ProcessingFiles","StillCounting":false,
                "ProcessedFileSize":50,"TotalFileSize":100,"OverallProgress":0}"#,
        )
        .unwrap();
        assert_eq!(progress.phase, Phase::BackupProcessingFiles);
        assert_eq!(progress.backup_id.as_deref(), Some("3"));
        let json = serde_json::to_value(&progress).unwrap();
        assert_eq!(json["Phase"], "Backup_ProcessingFiles");
        assert_eq!(Phase::parse("Odd").as_str(), "Odd");
    }
}
