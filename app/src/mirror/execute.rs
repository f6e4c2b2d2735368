use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use storage::{canonicalize_existing_prefix, FileRecord, FileTransfer, LocalStorage};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{interval, Interval, MissedTickBehavior};

use super::manifest::DeletionManifest;
use super::plan::ReconciliationPlan;
use super::progress::ProgressReporter;
use super::report::{ExecutionReport, FailureKind, FileFailure};

// ============================================================================
// 类型定义
// ============================================================================

/// 取消标志 - 置位后不再启动新的文件操作，进行中的复制会被中止
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 执行选项
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// 同时进行的文件操作数上限
    pub concurrency: usize,
    /// 删除后清理变空的目录
    pub prune_empty_dirs: bool,
    /// 进度输出间隔
    pub progress_interval: Duration,
    /// 删除清单目录；None 表示不写清单
    pub manifest_dir: Option<PathBuf>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            prune_empty_dirs: true,
            progress_interval: Duration::from_secs(5),
            manifest_dir: None,
        }
    }
}

#[derive(Debug, Clone)]
enum Operation {
    Copy(FileRecord),
    Delete(FileRecord),
}

/// 执行消息 - 工作线程发回唯一的收集器
#[derive(Debug)]
enum MirrorMessage {
    Copied { relative_path: String, bytes: u64 },
    Deleted { relative_path: String, bytes: u64 },
    Failed(FileFailure),
    Complete,
}

/// 工作线程共享的只读上下文
struct WorkerContext {
    source_root: PathBuf,
    destination_root: PathBuf,
    /// 解析链接后的目标根目录
    canonical_destination: PathBuf,
    transfer: Arc<dyn FileTransfer>,
    progress: Arc<ProgressReporter>,
    cancel: CancelFlag,
    /// 有进行中的复制因取消而中止
    aborted: AtomicBool,
}

// ============================================================================
// 执行
// ============================================================================

/// 执行对账计划
///
/// 先删除后复制，每个阶段内的文件操作在有界的工作池中并行执行。单个文件的失败
/// 只记录到报告中，不会中断其余文件。
pub async fn execute(
    plan: &ReconciliationPlan, source_root: &Path, destination_root: &Path,
    transfer: Arc<dyn FileTransfer>, options: &ExecuteOptions, cancel: &CancelFlag,
) -> ExecutionReport {
    let start_time = Instant::now();

    let mut report = ExecutionReport {
        planned_copies: plan.to_copy.len(),
        planned_deletions: plan.to_delete.len(),
        skipped_files: plan.to_skip.len(),
        skipped_bytes: plan.bytes_to_skip(),
        ..Default::default()
    };

    let progress = Arc::new(ProgressReporter::new(
        plan.bytes_to_copy(),
        (plan.to_copy.len() + plan.to_delete.len()) as u64,
    ));

    // 删除前必须先落盘删除清单；写不出清单就不删除
    let mut deletions = Vec::new();
    if !plan.to_delete.is_empty() {
        match write_manifest(plan, source_root, destination_root, options) {
            Ok(manifest_path) => {
                report.manifest_path = manifest_path;
                deletions = plan.to_delete.values().cloned().map(Operation::Delete).collect();
            }
            Err(e) => {
                log::error!("Failed to write deletion manifest, skipping all deletions: {}", e);
                let blocked = io::Error::new(
                    e.kind(),
                    format!("deletion manifest could not be written: {}", e),
                );
                for record in plan.to_delete.values() {
                    report
                        .failures
                        .push(FileFailure::new(&record.relative_path, FailureKind::Deletion, &blocked));
                    progress.file_finished();
                }
            }
        }
    }
    let copies: Vec<Operation> = plan.to_copy.values().cloned().map(Operation::Copy).collect();

    let context = Arc::new(WorkerContext {
        source_root: source_root.to_path_buf(),
        destination_root: destination_root.to_path_buf(),
        canonical_destination: canonicalize_existing_prefix(destination_root),
        transfer,
        progress: Arc::clone(&progress),
        cancel: cancel.clone(),
        aborted: AtomicBool::new(false),
    });

    let mut timer = interval(options.progress_interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // 删除阶段 -> 清理空目录 -> 复制阶段；复制开始前目标中不再有挡路的旧目录
    let mut deleted_paths = Vec::new();
    let mut stopped = run_phase(
        deletions,
        &context,
        options.concurrency,
        &mut timer,
        &mut report,
        &mut deleted_paths,
    )
    .await;

    if options.prune_empty_dirs && !deleted_paths.is_empty() {
        let destination = LocalStorage::new(destination_root);
        let deleted = std::mem::take(&mut deleted_paths);
        let pruned = tokio::task::spawn_blocking(move || {
            destination.prune_empty_dirs(deleted.iter().map(String::as_str))
        })
        .await;
        match pruned {
            Ok(count) => report.pruned_dirs = count,
            Err(e) => log::error!("Pruning empty directories failed: {}", e),
        }
    }

    if !stopped {
        stopped = run_phase(
            copies,
            &context,
            options.concurrency,
            &mut timer,
            &mut report,
            &mut deleted_paths,
        )
        .await;
    }
    // 取消只在确实有操作被跳过或被中止时才算数
    let cancelled = stopped || context.aborted.load(Ordering::SeqCst);
    if cancelled {
        log::warn!("Mirror cancelled, no further operations are started");
    }
    print_progress(&progress);

    // 失败列表按路径排序，保证输出稳定
    report.failures.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    report.cancelled = cancelled;
    report.total_time = start_time.elapsed();

    report
}

/// 运行一个阶段并收集结果；返回是否因取消而提前停止
async fn run_phase(
    operations: Vec<Operation>, context: &Arc<WorkerContext>, concurrency: usize, timer: &mut Interval,
    report: &mut ExecutionReport, deleted_paths: &mut Vec<String>,
) -> bool {
    if operations.is_empty() {
        return false;
    }

    // 创建队列通道
    let (tx, mut rx) = mpsc::channel::<MirrorMessage>(1000);
    let dispatcher = tokio::spawn(dispatch(operations, Arc::clone(context), concurrency, tx));

    loop {
        tokio::select! {
            message = rx.recv() => {
                match message {
                    Some(MirrorMessage::Copied { relative_path, bytes }) => {
                        log::debug!("Copied {} ({} bytes)", relative_path, bytes);
                        report.copied_files += 1;
                        report.copied_bytes += bytes;
                    }
                    Some(MirrorMessage::Deleted { relative_path, bytes }) => {
                        log::debug!("Deleted {}", relative_path);
                        report.deleted_files += 1;
                        report.deleted_bytes += bytes;
                        deleted_paths.push(relative_path);
                    }
                    Some(MirrorMessage::Failed(failure)) => {
                        log::warn!("Mirror failure: {}", failure);
                        report.failures.push(failure);
                    }
                    Some(MirrorMessage::Complete) => {
                        break;
                    }
                    None => {
                        log::warn!("Channel closed unexpectedly");
                        break;
                    }
                }
            }
            _ = timer.tick() => {
                print_progress(&context.progress);
            }
        }
    }

    match dispatcher.await {
        Ok(stopped) => stopped,
        Err(e) => {
            log::error!("Mirror dispatcher task failed: {}", e);
            context.cancel.is_cancelled()
        }
    }
}

/// 在有界的工作池中分发一个阶段的文件操作；返回是否因取消而提前停止
async fn dispatch(
    operations: Vec<Operation>, context: Arc<WorkerContext>, concurrency: usize,
    tx: mpsc::Sender<MirrorMessage>,
) -> bool {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut jobs = JoinSet::new();
    let mut stopped = false;

    for operation in operations {
        let permit = match Arc::clone(&semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        if context.cancel.is_cancelled() {
            stopped = true;
            break;
        }

        let context = Arc::clone(&context);
        let tx = tx.clone();
        jobs.spawn_blocking(move || {
            let _permit = permit;
            let message = context.run(operation);
            let _ = tx.blocking_send(message);
        });
    }

    // 阶段内的操作全部结束后才返回
    while let Some(result) = jobs.join_next().await {
        if let Err(e) = result {
            log::error!("Mirror worker failed: {}", e);
        }
    }

    let _ = tx.send(MirrorMessage::Complete).await;
    stopped
}

impl WorkerContext {
    fn run(&self, operation: Operation) -> MirrorMessage {
        match operation {
            Operation::Copy(record) => self.copy(record),
            Operation::Delete(record) => self.delete(record),
        }
    }

    fn copy(&self, record: FileRecord) -> MirrorMessage {
        let source = self.source_root.join(&record.relative_path);
        let destination = self.destination_root.join(&record.relative_path);
        log::debug!("Copying: {} -> {}", source.display(), destination.display());

        let mut counted = 0u64;
        let result = self.check_inside_destination(&destination).and_then(|()| {
            self.transfer.copy(&source, &destination, &mut |bytes| {
                if self.cancel.is_cancelled() {
                    self.aborted.store(true, Ordering::SeqCst);
                    return Err(io::Error::new(io::ErrorKind::Interrupted, "mirror cancelled"));
                }
                self.progress.add_bytes(bytes);
                counted += bytes;
                Ok(())
            })
        });
        self.progress.file_finished();

        match result {
            Ok(bytes) => MirrorMessage::Copied {
                relative_path: record.relative_path,
                bytes,
            },
            Err(e) => {
                self.progress.rollback_bytes(counted);
                MirrorMessage::Failed(FileFailure::new(record.relative_path, FailureKind::Transfer, &e))
            }
        }
    }

    fn delete(&self, record: FileRecord) -> MirrorMessage {
        let path = self.destination_root.join(&record.relative_path);
        let result = self
            .check_inside_destination(&path)
            .and_then(|()| self.transfer.remove(&path));
        self.progress.file_finished();

        match result {
            Ok(()) => MirrorMessage::Deleted {
                relative_path: record.relative_path,
                bytes: record.size_bytes,
            },
            Err(e) => MirrorMessage::Failed(FileFailure::new(record.relative_path, FailureKind::Deletion, &e)),
        }
    }
}

impl WorkerContext {
    /// 目标路径的父目录解析所有链接后必须仍在目标根目录之内
    fn check_inside_destination(&self, path: &Path) -> io::Result<()> {
        let parent = path.parent().unwrap_or(path);
        if canonicalize_existing_prefix(parent).starts_with(&self.canonical_destination) {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{} resolves outside the destination root", path.display()),
            ))
        }
    }
}

fn write_manifest(
    plan: &ReconciliationPlan, source_root: &Path, destination_root: &Path, options: &ExecuteOptions,
) -> io::Result<Option<PathBuf>> {
    let Some(dir) = &options.manifest_dir else {
        return Ok(None);
    };

    let mut manifest = DeletionManifest::new("mirror", Some(source_root), destination_root);
    for record in plan.to_delete.values() {
        manifest.push_record(record);
    }

    manifest.write_to(dir).map(Some)
}

fn print_progress(progress: &ProgressReporter) {
    let now = chrono::Local::now();
    println!(
        "[{}] Mirror progress: {}",
        now.format("%Y-%m-%d %H:%M:%S"),
        progress.snapshot()
    );
}
