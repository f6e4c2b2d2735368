use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use storage::{ChunkCallback, FileRecord, FileTransfer, LocalTransfer, TreeIndex};
use tempfile::tempdir;

use super::*;

fn at(secs: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
}

fn index(records: &[(&str, u64, u64)]) -> TreeIndex {
    records
        .iter()
        .map(|(path, size, mtime)| FileRecord::new(*path, *size, at(*mtime)))
        .collect()
}

fn keys(map: &std::collections::BTreeMap<String, FileRecord>) -> BTreeSet<String> {
    map.keys().cloned().collect()
}

fn quiet_options() -> ExecuteOptions {
    ExecuteOptions {
        concurrency: 3,
        prune_empty_dirs: true,
        progress_interval: Duration::from_secs(3600),
        manifest_dir: None,
    }
}

/// 复制完成后立即置位取消标志
struct CancellingTransfer {
    cancel: CancelFlag,
}

impl FileTransfer for CancellingTransfer {
    fn copy(&self, source: &Path, destination: &Path, on_chunk: &mut ChunkCallback<'_>) -> io::Result<u64> {
        let copied = LocalTransfer.copy(source, destination, on_chunk);
        self.cancel.cancel();
        copied
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        LocalTransfer.remove(path)
    }
}

/// 对指定相对路径后缀的复制强制失败
struct FailingTransfer {
    fail_suffix: &'static str,
}

impl FileTransfer for FailingTransfer {
    fn copy(&self, source: &Path, destination: &Path, on_chunk: &mut ChunkCallback<'_>) -> io::Result<u64> {
        if destination.ends_with(self.fail_suffix) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "forced failure"));
        }
        LocalTransfer.copy(source, destination, on_chunk)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        LocalTransfer.remove(path)
    }
}

// ============================================================================
// 对账
// ============================================================================

#[test]
fn test_reconcile_example_scenario() {
    let source = index(&[("a.txt", 10, 1), ("b.txt", 20, 2)]);
    let destination = index(&[("a.txt", 10, 1), ("c.txt", 5, 3)]);

    let plan = reconcile(&source, &destination);

    assert_eq!(plan.to_copy.keys().collect::<Vec<_>>(), vec!["b.txt"]);
    assert_eq!(plan.to_skip.keys().collect::<Vec<_>>(), vec!["a.txt"]);
    assert_eq!(plan.to_delete.keys().collect::<Vec<_>>(), vec!["c.txt"]);
    assert_eq!(plan.bytes_to_copy(), 20);
    assert_eq!(plan.bytes_to_delete(), 5);
}

#[test]
fn test_reconcile_copies_on_any_difference() {
    let source = index(&[("size.bin", 11, 1), ("mtime.bin", 10, 2), ("same.bin", 10, 1)]);
    let destination = index(&[("size.bin", 10, 1), ("mtime.bin", 10, 1), ("same.bin", 10, 1)]);

    let plan = reconcile(&source, &destination);

    assert_eq!(
        keys(&plan.to_copy),
        BTreeSet::from(["mtime.bin".to_string(), "size.bin".to_string()])
    );
    assert_eq!(keys(&plan.to_skip), BTreeSet::from(["same.bin".to_string()]));
    assert!(plan.to_delete.is_empty());
}

#[test]
fn test_reconcile_uses_exact_mtime_without_tolerance() {
    let t = at(1_700_000_000);
    let source: TreeIndex = vec![FileRecord::new("m.bin", 1, t + Duration::from_nanos(1))]
        .into_iter()
        .collect();
    let destination: TreeIndex = vec![FileRecord::new("m.bin", 1, t)].into_iter().collect();

    let plan = reconcile(&source, &destination);

    assert!(plan.to_copy.contains_key("m.bin"));
}

#[test]
fn test_reconcile_identical_trees_is_noop() {
    let tree = index(&[("a", 1, 1), ("dir/b", 2, 2)]);

    let plan = reconcile(&tree, &tree.clone());

    assert!(plan.is_noop());
    assert_eq!(plan.to_skip.len(), 2);
}

#[test]
fn test_reconcile_partition_property() {
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for _ in 0..200 {
        let mut source = Vec::new();
        let mut destination = Vec::new();
        for i in 0..rng.random_range(0..40) {
            let path = format!("dir{}/file{}.bin", i % 5, i);
            let size = rng.random_range(0..4u64);
            let mtime = rng.random_range(0..4u64);
            match rng.random_range(0..4) {
                0 => source.push(FileRecord::new(path.clone(), size, at(mtime))),
                1 => destination.push(FileRecord::new(path.clone(), size, at(mtime))),
                2 => {
                    source.push(FileRecord::new(path.clone(), size, at(mtime)));
                    destination.push(FileRecord::new(path.clone(), size, at(mtime)));
                }
                _ => {
                    source.push(FileRecord::new(path.clone(), size, at(mtime)));
                    destination.push(FileRecord::new(path.clone(), size + 1, at(mtime)));
                }
            }
        }
        let source: TreeIndex = source.into_iter().collect();
        let destination: TreeIndex = destination.into_iter().collect();

        let plan = reconcile(&source, &destination);

        let source_paths: BTreeSet<String> = source.paths().map(String::from).collect();
        let destination_paths: BTreeSet<String> = destination.paths().map(String::from).collect();
        let copy = keys(&plan.to_copy);
        let skip = keys(&plan.to_skip);
        let delete = keys(&plan.to_delete);

        assert_eq!(copy.union(&skip).cloned().collect::<BTreeSet<_>>(), source_paths);
        assert_eq!(
            delete,
            destination_paths.difference(&source_paths).cloned().collect::<BTreeSet<_>>()
        );
        assert!(copy.is_disjoint(&skip));
        assert!(copy.is_disjoint(&delete));
        assert!(skip.is_disjoint(&delete));
    }
}

// ============================================================================
// 执行
// ============================================================================

fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (path, contents) in files {
        let full = root.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, contents).unwrap();
    }
}

fn plan_for(source: &Path, destination: &Path) -> ReconciliationPlan {
    let source_index = storage::LocalStorage::new(source).walk_files().unwrap();
    let destination_index = storage::LocalStorage::new(destination)
        .follow_links(false)
        .walk_files()
        .unwrap();
    reconcile(&source_index, &destination_index)
}

#[tokio::test]
async fn test_execute_isolates_single_failure() {
    let src = tempdir().unwrap();
    let dst = tempdir().unwrap();
    write_tree(
        src.path(),
        &[("ok1.bin", "one"), ("nested/bad.bin", "two"), ("nested/ok2.bin", "three")],
    );
    write_tree(dst.path(), &[("stale.bin", "old")]);

    let plan = plan_for(src.path(), dst.path());
    let transfer = Arc::new(FailingTransfer { fail_suffix: "nested/bad.bin" });
    let report = execute(&plan, src.path(), dst.path(), transfer, &quiet_options(), &CancelFlag::new()).await;

    assert_eq!(report.copied_files, 2);
    assert_eq!(report.copied_bytes, 8);
    assert_eq!(report.deleted_files, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].relative_path, "nested/bad.bin");
    assert_eq!(report.failures[0].kind, FailureKind::Transfer);
    assert_eq!(report.failures[0].error_kind, io::ErrorKind::PermissionDenied);
    assert!(!report.is_clean());

    assert_eq!(fs::read_to_string(dst.path().join("ok1.bin")).unwrap(), "one");
    assert_eq!(fs::read_to_string(dst.path().join("nested/ok2.bin")).unwrap(), "three");
    assert!(!dst.path().join("nested/bad.bin").exists());
    assert!(!dst.path().join("stale.bin").exists());
}

#[tokio::test]
async fn test_execute_cancelled_before_start_touches_nothing() {
    let src = tempdir().unwrap();
    let dst = tempdir().unwrap();
    write_tree(src.path(), &[("a.bin", "a"), ("b.bin", "b")]);
    write_tree(dst.path(), &[("c.bin", "c")]);

    let plan = plan_for(src.path(), dst.path());
    let cancel = CancelFlag::new();
    cancel.cancel();
    let report = execute(&plan, src.path(), dst.path(), Arc::new(LocalTransfer), &quiet_options(), &cancel).await;

    assert!(report.cancelled);
    assert_eq!(report.copied_files + report.deleted_files, 0);
    assert_eq!(report.not_attempted(), 3);
    assert!(dst.path().join("c.bin").exists());
    assert!(!dst.path().join("a.bin").exists());
}

#[tokio::test]
async fn test_execute_cancel_after_last_operation_is_not_cancelled() {
    let src = tempdir().unwrap();
    let dst = tempdir().unwrap();
    write_tree(src.path(), &[("only.bin", "1")]);

    let plan = plan_for(src.path(), dst.path());
    let cancel = CancelFlag::new();
    let transfer = Arc::new(CancellingTransfer { cancel: cancel.clone() });
    let report = execute(&plan, src.path(), dst.path(), transfer, &quiet_options(), &cancel).await;

    assert!(cancel.is_cancelled());
    assert!(!report.cancelled);
    assert!(report.is_clean());
    assert_eq!(report.copied_files, 1);
}

#[tokio::test]
async fn test_execute_cancel_mid_run_stops_remaining_copies() {
    let src = tempdir().unwrap();
    let dst = tempdir().unwrap();
    write_tree(src.path(), &[("a.bin", "a"), ("b.bin", "b"), ("c.bin", "c")]);

    let plan = plan_for(src.path(), dst.path());
    let cancel = CancelFlag::new();
    let transfer = Arc::new(CancellingTransfer { cancel: cancel.clone() });
    let options = ExecuteOptions {
        concurrency: 1,
        ..quiet_options()
    };
    let report = execute(&plan, src.path(), dst.path(), transfer, &options, &cancel).await;

    assert!(report.cancelled);
    assert_eq!(report.copied_files, 1);
    assert_eq!(report.not_attempted(), 2);
}

#[tokio::test]
async fn test_execute_file_replaces_directory_in_one_pass() {
    let src = tempdir().unwrap();
    let dst = tempdir().unwrap();
    write_tree(src.path(), &[("x", "now a file"), ("y/new.bin", "now a dir")]);
    write_tree(dst.path(), &[("x/old.bin", "old"), ("x/deeper/older.bin", "older"), ("y", "was a file")]);

    let plan = plan_for(src.path(), dst.path());
    let report = execute(&plan, src.path(), dst.path(), Arc::new(LocalTransfer), &quiet_options(), &CancelFlag::new()).await;

    assert!(report.is_clean(), "{:?}", report.failures);
    assert!(dst.path().join("x").is_file());
    assert_eq!(fs::read_to_string(dst.path().join("x")).unwrap(), "now a file");
    assert_eq!(fs::read_to_string(dst.path().join("y/new.bin")).unwrap(), "now a dir");
}

#[tokio::test]
async fn test_execute_file_replaces_directory_without_pruning() {
    let src = tempdir().unwrap();
    let dst = tempdir().unwrap();
    write_tree(src.path(), &[("x", "now a file")]);
    write_tree(dst.path(), &[("x/old.bin", "old")]);

    let plan = plan_for(src.path(), dst.path());
    let options = ExecuteOptions {
        prune_empty_dirs: false,
        ..quiet_options()
    };
    let report = execute(&plan, src.path(), dst.path(), Arc::new(LocalTransfer), &options, &CancelFlag::new()).await;

    assert!(report.is_clean(), "{:?}", report.failures);
    assert!(dst.path().join("x").is_file());
}

#[cfg(unix)]
#[tokio::test]
async fn test_execute_never_writes_through_destination_link() {
    let src = tempdir().unwrap();
    let dst = tempdir().unwrap();
    let outside = tempdir().unwrap();
    let blocker = tempdir().unwrap();
    let not_a_dir = blocker.path().join("file");
    fs::write(&not_a_dir, "x").unwrap();
    write_tree(src.path(), &[("sub/a.bin", "a")]);
    std::os::unix::fs::symlink(outside.path(), dst.path().join("sub")).unwrap();

    // 清单写不出时链接不会被删除，复制也不能穿过它
    let plan = plan_for(src.path(), dst.path());
    assert_eq!(keys(&plan.to_delete), BTreeSet::from(["sub".to_string()]));
    let options = ExecuteOptions {
        manifest_dir: Some(not_a_dir.join("manifests")),
        ..quiet_options()
    };
    let report = execute(&plan, src.path(), dst.path(), Arc::new(LocalTransfer), &options, &CancelFlag::new()).await;

    assert_eq!(report.copied_files, 0);
    let copy_failure = report
        .failures
        .iter()
        .find(|f| f.kind == FailureKind::Transfer)
        .unwrap();
    assert_eq!(copy_failure.relative_path, "sub/a.bin");
    assert_eq!(copy_failure.error_kind, io::ErrorKind::PermissionDenied);
    assert!(!outside.path().join("a.bin").exists());
}

#[tokio::test]
async fn test_execute_writes_manifest_before_deleting() {
    let src = tempdir().unwrap();
    let dst = tempdir().unwrap();
    let logs = tempdir().unwrap();
    write_tree(src.path(), &[("keep.bin", "k")]);
    write_tree(dst.path(), &[("keep.bin", "k"), ("old/gone.bin", "gone!")]);

    let plan = plan_for(src.path(), dst.path());
    let options = ExecuteOptions {
        manifest_dir: Some(logs.path().join("manifests")),
        ..quiet_options()
    };
    let report = execute(&plan, src.path(), dst.path(), Arc::new(LocalTransfer), &options, &CancelFlag::new()).await;

    let manifest_path = report.manifest_path.clone().unwrap();
    let manifest = DeletionManifest::read_from(&manifest_path).unwrap();
    assert_eq!(manifest.operation, "mirror");
    assert_eq!(manifest.entries.len(), 1);
    assert_eq!(manifest.entries[0].relative_path, "old/gone.bin");
    assert_eq!(manifest.entries[0].size_bytes, 5);

    assert_eq!(report.deleted_files, 1);
    assert_eq!(report.deleted_bytes, 5);
    assert_eq!(report.pruned_dirs, 1);
    assert!(!dst.path().join("old").exists());
}

#[tokio::test]
async fn test_execute_without_manifest_keeps_destination_files() {
    let src = tempdir().unwrap();
    let dst = tempdir().unwrap();
    let blocker = tempdir().unwrap();
    let not_a_dir = blocker.path().join("file");
    fs::write(&not_a_dir, "x").unwrap();
    write_tree(src.path(), &[("new.bin", "new")]);
    write_tree(dst.path(), &[("extra.bin", "extra")]);

    let plan = plan_for(src.path(), dst.path());
    let options = ExecuteOptions {
        manifest_dir: Some(not_a_dir.join("manifests")),
        ..quiet_options()
    };
    let report = execute(&plan, src.path(), dst.path(), Arc::new(LocalTransfer), &options, &CancelFlag::new()).await;

    assert_eq!(report.copied_files, 1);
    assert_eq!(report.deleted_files, 0);
    assert_eq!(report.failed_deletions(), 1);
    assert_eq!(report.failures[0].relative_path, "extra.bin");
    assert!(dst.path().join("extra.bin").exists());
    assert!(dst.path().join("new.bin").exists());
}

#[tokio::test]
async fn test_execute_empty_plan() {
    let src = tempdir().unwrap();
    let dst = tempdir().unwrap();

    let report = execute(
        &ReconciliationPlan::default(),
        src.path(),
        dst.path(),
        Arc::new(LocalTransfer),
        &quiet_options(),
        &CancelFlag::new(),
    )
    .await;

    assert!(report.is_clean());
    assert_eq!(report.not_attempted(), 0);
    assert!(report.manifest_path.is_none());
}

#[test]
fn test_report_summary_lists_failures() {
    let report = ExecutionReport {
        planned_copies: 2,
        copied_files: 1,
        copied_bytes: 2048,
        skipped_files: 7,
        skipped_bytes: 1024,
        failures: vec![FileFailure::new(
            "loras/x.safetensors",
            FailureKind::Transfer,
            &io::Error::new(io::ErrorKind::Other, "disk full"),
        )],
        ..Default::default()
    };

    let text = report.to_string();
    assert!(text.contains("Mirror Statistics"));
    let skipped_row = text.lines().find(|l| l.trim_start().starts_with("Skipped")).unwrap();
    assert_eq!(
        skipped_row.split_whitespace().collect::<Vec<_>>(),
        vec!["Skipped", ":", "7", "-", "-", "1.00", "KiB"]
    );
    assert!(text.contains("2.00 KiB"));
    assert!(text.contains("[transfer] loras/x.safetensors: disk full"));
    assert_eq!(report.failed_copies(), 1);
    assert_eq!(report.not_attempted(), 0);
}

#[test]
fn test_distinct_roots_rejects_nesting() {
    let dir = tempdir().unwrap();
    let inner = dir.path().join("inner");
    fs::create_dir_all(&inner).unwrap();

    assert!(super::check_distinct_roots(dir.path(), &inner).is_err());
    assert!(super::check_distinct_roots(&inner, dir.path()).is_err());
    assert!(super::check_distinct_roots(dir.path(), dir.path()).is_err());
    assert!(super::check_distinct_roots(&inner, &dir.path().join("sibling/new")).is_ok());
}
