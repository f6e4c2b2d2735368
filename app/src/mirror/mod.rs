//! 镜像模块 - 让目标目录树成为源目录树的精确副本
//!
//! 三个阶段严格串行：枚举两棵树、计算对账计划、执行计划。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use storage::{canonicalize_existing_prefix, FileTransfer, LocalStorage, LocalTransfer, TreeIndex};
use utils::app_config::MirrorConfig;
use utils::error::{Error, Result};

mod execute;
mod manifest;
mod plan;
mod progress;
mod report;

#[cfg(test)]
mod tests;

pub use execute::{execute, CancelFlag, ExecuteOptions};
pub use manifest::{DeletionManifest, ManifestEntry};
pub use plan::{reconcile, ReconciliationPlan};
pub use progress::{format_bytes, ProgressReporter, ProgressSnapshot};
pub use report::{ExecutionReport, FailureKind, FileFailure};

/// 镜像参数
#[derive(Debug, Clone)]
pub struct MirrorParams {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// 只计算并输出计划，不修改目标目录
    pub dry_run: bool,
    pub options: ExecuteOptions,
}

/// 镜像结果；dry run 时没有执行报告
#[derive(Debug, Clone)]
pub struct MirrorOutcome {
    pub plan: ReconciliationPlan,
    pub report: Option<ExecutionReport>,
}

impl ExecuteOptions {
    /// 根据配置构建执行选项，空的 manifest_dir 使用日志目录下的 manifests/
    pub fn from_config(config: &MirrorConfig) -> Result<Self> {
        let manifest_dir = if config.manifest_dir.trim().is_empty() {
            utils::logger::log_dir()?.join("manifests")
        } else {
            PathBuf::from(&config.manifest_dir)
        };

        Ok(Self {
            concurrency: config.concurrency.max(1),
            prune_empty_dirs: config.prune_empty_dirs,
            progress_interval: Duration::from_secs(config.progress_interval_secs.max(1)),
            manifest_dir: Some(manifest_dir),
        })
    }
}

/// 主镜像函数 - 入口点
pub async fn mirror(params: MirrorParams, cancel: CancelFlag) -> Result<MirrorOutcome> {
    mirror_with(params, Arc::new(LocalTransfer), cancel).await
}

/// 使用指定的传输实现执行镜像
pub async fn mirror_with(
    params: MirrorParams, transfer: Arc<dyn FileTransfer>, cancel: CancelFlag,
) -> Result<MirrorOutcome> {
    log::info!(
        "Starting mirror: {} -> {} (dry run: {})",
        params.source.display(),
        params.destination.display(),
        params.dry_run
    );

    // 源树跟随链接；目标树是要修改的一方，链接只作为条目出现，从不进入
    let source = LocalStorage::new(&params.source);
    let destination = LocalStorage::new(&params.destination).follow_links(false);

    source
        .check_root()
        .map_err(|e| Error::with_source("Source root cannot be enumerated", Box::new(e)))?;
    check_distinct_roots(&params.source, &params.destination)?;
    if !params.dry_run {
        destination
            .ensure_root()
            .map_err(|e| Error::with_source("Destination root cannot be created", Box::new(e)))?;
    }

    // 两棵树并行枚举，对账必须等两者都完成
    let dry_run = params.dry_run;
    let source_task = tokio::task::spawn_blocking(move || source.walk_files());
    let destination_task = tokio::task::spawn_blocking(move || {
        if dry_run && !destination.root().exists() {
            Ok(TreeIndex::default())
        } else {
            destination.walk_files()
        }
    });
    let (source_index, destination_index) = tokio::join!(source_task, destination_task);

    let source_index = source_index
        .map_err(|e| Error::with_source("Source enumeration task failed", Box::new(e)))?
        .map_err(|e| Error::with_source("Failed to enumerate source tree", Box::new(e)))?;
    let destination_index = destination_index
        .map_err(|e| Error::with_source("Destination enumeration task failed", Box::new(e)))?
        .map_err(|e| Error::with_source("Failed to enumerate destination tree", Box::new(e)))?;

    log::info!(
        "Indexed {} source files ({}) and {} destination files ({})",
        source_index.len(),
        format_bytes(source_index.total_bytes()),
        destination_index.len(),
        format_bytes(destination_index.total_bytes())
    );

    let plan = reconcile(&source_index, &destination_index);
    log::info!(
        "Mirror plan: {} to copy ({}), {} to skip, {} to delete",
        plan.to_copy.len(),
        format_bytes(plan.bytes_to_copy()),
        plan.to_skip.len(),
        plan.to_delete.len()
    );

    if params.dry_run {
        for path in plan.to_copy.keys() {
            log::debug!("Would copy {}", path);
        }
        for path in plan.to_delete.keys() {
            log::debug!("Would delete {}", path);
        }
        return Ok(MirrorOutcome { plan, report: None });
    }

    let report = execute(
        &plan,
        &params.source,
        &params.destination,
        transfer,
        &params.options,
        &cancel,
    )
    .await;

    log::info!(
        "Mirror finished: {} copied, {} deleted, {} skipped, {} failed{}",
        report.copied_files,
        report.deleted_files,
        report.skipped_files,
        report.failures.len(),
        if report.cancelled { " (cancelled)" } else { "" }
    );

    Ok(MirrorOutcome {
        plan,
        report: Some(report),
    })
}

/// 源目录和目标目录不能相同，也不能互相嵌套
fn check_distinct_roots(source: &Path, destination: &Path) -> Result<()> {
    let source = canonicalize_existing_prefix(source);
    let destination = canonicalize_existing_prefix(destination);

    if source.starts_with(&destination) || destination.starts_with(&source) {
        return Err(Error::new(format!(
            "Source {} and destination {} must not overlap",
            source.display(),
            destination.display()
        )));
    }

    Ok(())
}
