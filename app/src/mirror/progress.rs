use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// 进度汇报器 - 一次镜像调用独占的线程安全计数器
///
/// 由调用方创建并通过 `Arc` 共享给所有工作线程，不使用任何全局状态。
#[derive(Debug)]
pub struct ProgressReporter {
    bytes_done: AtomicU64,
    bytes_total: u64,
    files_done: AtomicU64,
    files_total: u64,
}

/// 某一时刻的进度快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub bytes_done: u64,
    pub bytes_total: u64,
    pub files_done: u64,
    pub files_total: u64,
}

impl ProgressReporter {
    pub fn new(bytes_total: u64, files_total: u64) -> Self {
        Self {
            bytes_done: AtomicU64::new(0),
            bytes_total,
            files_done: AtomicU64::new(0),
            files_total,
        }
    }

    pub fn add_bytes(&self, bytes: u64) {
        self.bytes_done.fetch_add(bytes, Ordering::Relaxed);
    }

    /// 撤销失败复制已经计入的字节数
    pub fn rollback_bytes(&self, bytes: u64) {
        let _ = self
            .bytes_done
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |done| {
                Some(done.saturating_sub(bytes))
            });
    }

    /// 一个文件操作结束（无论成功或失败）
    pub fn file_finished(&self) {
        self.files_done.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            bytes_done: self.bytes_done.load(Ordering::Relaxed),
            bytes_total: self.bytes_total,
            files_done: self.files_done.load(Ordering::Relaxed),
            files_total: self.files_total,
        }
    }
}

impl ProgressSnapshot {
    pub fn percent(&self) -> f64 {
        if self.bytes_total == 0 {
            100.0
        } else {
            self.bytes_done as f64 * 100.0 / self.bytes_total as f64
        }
    }
}

impl fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} / {} ({:.1}%), {} / {} files",
            format_bytes(self.bytes_done),
            format_bytes(self.bytes_total),
            self.percent(),
            self.files_done,
            self.files_total
        )
    }
}

/// 格式化字节大小
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{:.0} {}", size, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}
