use std::path::PathBuf;
use std::time::Duration;

use app::cleanup::{remove_unused, CleanupParams};
use app::download::{download, DownloadOutcome, DownloadParams};
use app::mirror::{format_bytes, mirror, CancelFlag, ExecuteOptions, MirrorParams};
use storage::resolve_local_path;
use utils::app_config::AppConfig;
use utils::error::{Error, Result};

/// 命令行参数优先，否则使用配置中的默认路径
fn path_or_default(arg: Option<String>, default: &str, key: &str) -> Result<PathBuf> {
    let raw = match arg {
        Some(path) => path,
        None if !default.trim().is_empty() => default.to_string(),
        None => {
            return Err(Error::new(format!(
                "No path given and `{}` is not configured",
                key
            )))
        }
    };

    resolve_local_path(&raw).map_err(|e| Error::with_source(format!("Invalid path {}", raw), Box::new(e)))
}

pub async fn mirror_cmd(
    source: Option<String>, destination: Option<String>, dry_run: bool, concurrency: Option<usize>,
    no_prune: bool,
) -> Result<()> {
    let config = AppConfig::fetch()?;

    let source = path_or_default(source, &config.mirror.from_path, "mirror.from_path")?;
    let destination = path_or_default(destination, &config.mirror.to_path, "mirror.to_path")?;

    let mut options = ExecuteOptions::from_config(&config.mirror)?;
    if let Some(concurrency) = concurrency {
        options.concurrency = concurrency.max(1);
    }
    if no_prune {
        options.prune_empty_dirs = false;
    }

    // Ctrl-C 只停止启动新的操作，已完成的部分保留
    let cancel = CancelFlag::new();
    let handler = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Interrupt received, finishing in-flight operations");
                cancel.cancel();
            }
        })
    };

    let params = MirrorParams {
        source,
        destination,
        dry_run,
        options,
    };
    let outcome = mirror(params, cancel).await;
    handler.abort();
    let outcome = outcome?;

    match outcome.report {
        Some(report) => println!("{}", report),
        None => {
            println!("Dry run, nothing was changed.");
            println!("{}", outcome.plan);
        }
    }

    Ok(())
}

pub async fn download_cmd(url: String, folder: Option<String>, filename: Option<String>) -> Result<()> {
    let config = AppConfig::fetch()?;

    let params = DownloadParams {
        url,
        folder,
        filename,
        models_root: PathBuf::from(&config.models.root),
        allowed_folders: config.models.allowed_folders,
        progress_interval: Duration::from_secs(config.mirror.progress_interval_secs.max(1)),
    };

    match download(params).await? {
        DownloadOutcome::Downloaded { path, bytes } => {
            println!("Downloaded {} ({})", path.display(), format_bytes(bytes));
        }
        DownloadOutcome::AlreadyPresent { path, .. } => {
            println!("Already up to date: {}", path.display());
        }
    }

    Ok(())
}

pub async fn remove_unused_cmd(folder: Option<String>, days: Option<u64>, delete: bool) -> Result<()> {
    let config = AppConfig::fetch()?;

    let folder = path_or_default(folder, &config.models.root, "models.root")?;
    let manifest_dir = ExecuteOptions::from_config(&config.mirror)?.manifest_dir;

    let params = CleanupParams {
        folder,
        days: days.unwrap_or(config.cleanup.days),
        delete,
        manifest_dir,
    };

    let report = remove_unused(params).await?;
    println!("{}", report);

    Ok(())
}
