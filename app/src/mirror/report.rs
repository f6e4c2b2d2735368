use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use super::progress::format_bytes;

/// 单文件失败的类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// 复制失败（权限、磁盘已满、路径过长……）
    Transfer,
    /// 删除失败
    Deletion,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Transfer => write!(f, "transfer"),
            FailureKind::Deletion => write!(f, "deletion"),
        }
    }
}

/// 单个文件的失败记录，只在本地恢复，绝不丢弃
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub relative_path: String,
    pub kind: FailureKind,
    pub error_kind: io::ErrorKind,
    pub message: String,
}

impl FileFailure {
    pub fn new(relative_path: impl Into<String>, kind: FailureKind, error: &io::Error) -> Self {
        Self {
            relative_path: relative_path.into(),
            kind,
            error_kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for FileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.relative_path, self.message)
    }
}

/// 执行报告 - 计划数、成功数、失败列表
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    pub planned_copies: usize,
    pub planned_deletions: usize,

    pub copied_files: usize,
    pub copied_bytes: u64,
    pub skipped_files: usize,
    pub skipped_bytes: u64,
    pub deleted_files: usize,
    pub deleted_bytes: u64,
    pub pruned_dirs: usize,

    pub failures: Vec<FileFailure>,
    /// 运行被取消，部分操作没有执行
    pub cancelled: bool,
    /// 删除前写入的清单文件
    pub manifest_path: Option<PathBuf>,
    pub total_time: Duration,
}

impl ExecutionReport {
    pub fn failed_copies(&self) -> usize {
        self.count_failures(FailureKind::Transfer)
    }

    pub fn failed_deletions(&self) -> usize {
        self.count_failures(FailureKind::Deletion)
    }

    /// 计划了但既未成功也未失败（被取消）的操作数
    pub fn not_attempted(&self) -> usize {
        let planned = self.planned_copies + self.planned_deletions;
        let finished = self.copied_files + self.deleted_files + self.failures.len();
        planned.saturating_sub(finished)
    }

    /// 没有失败且没有被取消
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }

    fn count_failures(&self, kind: FailureKind) -> usize {
        self.failures.iter().filter(|f| f.kind == kind).count()
    }
}

impl fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "==================================================================")?;
        writeln!(f, "                         Mirror Statistics                        ")?;
        writeln!(f, "==================================================================")?;
        writeln!(f, "   Total time :    {:.2}s", self.total_time.as_secs_f64())?;
        if let Some(manifest) = &self.manifest_path {
            writeln!(f, "   Manifest   :    {}", manifest.display())?;
        }
        writeln!(f)?;
        writeln!(f, "                  Planned    Succeeded       Failed        Bytes")?;
        writeln!(
            f,
            "   Copied  : {:>12} {:>12} {:>12} {:>12}",
            self.planned_copies,
            self.copied_files,
            self.failed_copies(),
            format_bytes(self.copied_bytes)
        )?;
        writeln!(
            f,
            "   Deleted : {:>12} {:>12} {:>12} {:>12}",
            self.planned_deletions,
            self.deleted_files,
            self.failed_deletions(),
            format_bytes(self.deleted_bytes)
        )?;
        writeln!(
            f,
            "   Skipped : {:>12} {:>12} {:>12} {:>12}",
            self.skipped_files,
            "-",
            "-",
            format_bytes(self.skipped_bytes)
        )?;
        if self.pruned_dirs > 0 {
            writeln!(f, "   Pruned empty directories: {}", self.pruned_dirs)?;
        }
        if self.cancelled {
            writeln!(f, "   Cancelled: {} operations not attempted", self.not_attempted())?;
        }
        if !self.failures.is_empty() {
            writeln!(f, " --------------------------- Failures ---------------------------")?;
            for failure in &self.failures {
                writeln!(f, "   {}", failure)?;
            }
        }
        write!(f, "==================================================================")
    }
}
