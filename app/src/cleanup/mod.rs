//! 清理模块 - 找出长时间未被读取的模型文件，并可选地删除它们
//!
//! 选择依据是最后访问时间；文件系统不提供访问时间时退回到修改时间。

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Local};
use storage::{FileRecord, LocalStorage, TreeIndex};
use utils::error::{Error, Result};

use crate::mirror::{format_bytes, DeletionManifest, FailureKind, FileFailure};


const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// 清理参数
#[derive(Debug, Clone)]
pub struct CleanupParams {
    /// 要检查的目录
    pub folder: PathBuf,
    /// 超过多少天未使用视为闲置
    pub days: u64,
    /// 为 false 时只列出候选文件
    pub delete: bool,
    /// 删除清单目录；None 表示不写清单
    pub manifest_dir: Option<PathBuf>,
}

/// 闲置文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnusedFile {
    pub record: FileRecord,
    pub last_used: SystemTime,
}

/// 清理报告
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    pub scanned_files: usize,
    pub candidates: Vec<UnusedFile>,
    /// 是否执行了删除
    pub deleted: bool,
    pub removed_files: usize,
    pub removed_bytes: u64,
    pub failures: Vec<FileFailure>,
    pub manifest_path: Option<PathBuf>,
    pub total_time: Duration,
}

impl CleanupReport {
    pub fn candidate_bytes(&self) -> u64 {
        self.candidates.iter().map(|f| f.record.size_bytes).sum()
    }
}

/// 文件最后一次被使用的时间
pub fn last_used(record: &FileRecord) -> SystemTime {
    record.accessed_time.unwrap_or(record.modified_time)
}

/// 计算截止时间；天数过大时退回到 UNIX_EPOCH
pub fn cutoff_for(now: SystemTime, days: u64) -> SystemTime {
    now.checked_sub(Duration::from_secs(days.saturating_mul(SECS_PER_DAY)))
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

/// 选出最后使用时间早于截止时间的文件，按相对路径排序；符号链接从不入选
pub fn find_unused(index: &TreeIndex, cutoff: SystemTime) -> Vec<UnusedFile> {
    index
        .records()
        .filter(|record| !record.is_symlink)
        .filter_map(|record| {
            let last_used = last_used(record);
            (last_used < cutoff).then(|| UnusedFile {
                record: record.clone(),
                last_used,
            })
        })
        .collect()
}

/// 列出（并可选地删除）闲置文件
pub async fn remove_unused(params: CleanupParams) -> Result<CleanupReport> {
    let start_time = Instant::now();
    log::info!(
        "Looking for files unused for {} days under {}",
        params.days,
        params.folder.display()
    );

    // 只清理真正位于该目录下的文件，不进入链接
    let storage = LocalStorage::new(&params.folder).follow_links(false);
    storage
        .check_root()
        .map_err(|e| Error::with_source("Cleanup folder cannot be enumerated", Box::new(e)))?;

    let index = tokio::task::spawn_blocking(move || storage.walk_files())
        .await
        .map_err(|e| Error::with_source("Enumeration task failed", Box::new(e)))?
        .map_err(|e| Error::with_source("Failed to enumerate cleanup folder", Box::new(e)))?;

    let cutoff = cutoff_for(SystemTime::now(), params.days);
    let mut report = CleanupReport {
        scanned_files: index.len(),
        candidates: find_unused(&index, cutoff),
        ..Default::default()
    };

    log::info!(
        "Found {} unused files ({}) out of {}",
        report.candidates.len(),
        format_bytes(report.candidate_bytes()),
        report.scanned_files
    );

    if params.delete && !report.candidates.is_empty() {
        let folder = params.folder.clone();
        let manifest_dir = params.manifest_dir.clone();
        let candidates = report.candidates.clone();
        let outcome = tokio::task::spawn_blocking(move || delete_candidates(&folder, manifest_dir.as_deref(), &candidates))
            .await
            .map_err(|e| Error::with_source("Deletion task failed", Box::new(e)))?;

        report.deleted = true;
        report.manifest_path = outcome.manifest_path;
        report.removed_files = outcome.removed_files;
        report.removed_bytes = outcome.removed_bytes;
        report.failures = outcome.failures;
    }

    report.total_time = start_time.elapsed();
    Ok(report)
}

#[derive(Default)]
struct DeletionOutcome {
    manifest_path: Option<PathBuf>,
    removed_files: usize,
    removed_bytes: u64,
    failures: Vec<FileFailure>,
}

fn delete_candidates(folder: &Path, manifest_dir: Option<&Path>, candidates: &[UnusedFile]) -> DeletionOutcome {
    let mut outcome = DeletionOutcome::default();

    if let Some(dir) = manifest_dir {
        let mut manifest = DeletionManifest::new("remove-unused", None, folder);
        for candidate in candidates {
            manifest.push_record(&candidate.record);
        }

        match manifest.write_to(dir) {
            Ok(path) => outcome.manifest_path = Some(path),
            Err(e) => {
                log::error!("Failed to write deletion manifest, nothing is removed: {}", e);
                let blocked = std::io::Error::new(
                    e.kind(),
                    format!("deletion manifest could not be written: {}", e),
                );
                outcome.failures = candidates
                    .iter()
                    .map(|c| FileFailure::new(&c.record.relative_path, FailureKind::Deletion, &blocked))
                    .collect();
                return outcome;
            }
        }
    }

    for candidate in candidates {
        let path = folder.join(&candidate.record.relative_path);
        match storage::remove_file(&path) {
            Ok(()) => {
                log::info!("Removed {}", path.display());
                outcome.removed_files += 1;
                outcome.removed_bytes += candidate.record.size_bytes;
            }
            Err(e) => {
                log::warn!("Failed to remove {}: {}", path.display(), e);
                outcome
                    .failures
                    .push(FileFailure::new(&candidate.record.relative_path, FailureKind::Deletion, &e));
            }
        }
    }

    outcome
}

impl fmt::Display for CleanupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for candidate in &self.candidates {
            let last_used: DateTime<Local> = candidate.last_used.into();
            writeln!(
                f,
                "{}  {:>12}  {}",
                last_used.format("%Y-%m-%d %H:%M"),
                format_bytes(candidate.record.size_bytes),
                candidate.record.relative_path
            )?;
        }

        writeln!(f, "==================================================================")?;
        writeln!(f, "   Scanned files  :    {}", self.scanned_files)?;
        writeln!(
            f,
            "   Unused files   :    {} ({})",
            self.candidates.len(),
            format_bytes(self.candidate_bytes())
        )?;
        if self.deleted {
            if let Some(manifest) = &self.manifest_path {
                writeln!(f, "   Manifest       :    {}", manifest.display())?;
            }
            writeln!(
                f,
                "   Removed        :    {} ({})",
                self.removed_files,
                format_bytes(self.removed_bytes)
            )?;
            writeln!(f, "   Failed         :    {}", self.failures.len())?;
            for failure in &self.failures {
                writeln!(f, "   {}", failure)?;
            }
        }
        write!(f, "==================================================================")
    }
}
