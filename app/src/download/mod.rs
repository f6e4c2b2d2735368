//! 下载模块 - 把远程模型文件下载到模型仓库的指定子目录

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use url::Url;
use utils::error::{Error, Result};

use crate::mirror::{format_bytes, ProgressReporter};


/// 未完成下载的临时文件前缀
pub const INCOMPLETE_PREFIX: &str = "_incomplete_";

/// URL 没有文件名时使用的默认名
pub const DEFAULT_FILENAME: &str = "downloaded.file";

const CHUNK_SIZE: usize = 1024 * 1024;

/// 下载参数
#[derive(Debug, Clone)]
pub struct DownloadParams {
    pub url: String,
    /// 模型子目录；缺省时取 URL 路径的倒数第二段
    pub folder: Option<String>,
    /// 目标文件名；缺省时取 URL 路径的最后一段
    pub filename: Option<String>,
    pub models_root: PathBuf,
    pub allowed_folders: Vec<String>,
    pub progress_interval: Duration,
}

/// 解析后的下载目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    pub url: Url,
    pub folder: String,
    pub filename: String,
    pub path: PathBuf,
}

impl DownloadTarget {
    pub fn incomplete_path(&self) -> PathBuf {
        self.path.with_file_name(format!("{}{}", INCOMPLETE_PREFIX, self.filename))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Downloaded { path: PathBuf, bytes: u64 },
    /// 目标文件已存在且大小与服务器一致
    AlreadyPresent { path: PathBuf, bytes: u64 },
}

impl DownloadOutcome {
    pub fn path(&self) -> &Path {
        match self {
            DownloadOutcome::Downloaded { path, .. } | DownloadOutcome::AlreadyPresent { path, .. } => path,
        }
    }
}

/// 根据 URL 和参数计算目标路径，并校验目录和文件名
pub fn resolve_target(params: &DownloadParams) -> Result<DownloadTarget> {
    let url = Url::parse(&params.url)
        .map_err(|e| Error::with_source(format!("Invalid URL: {}", params.url), Box::new(e)))?;

    let segments: Vec<&str> = url.path_segments().map(|s| s.collect()).unwrap_or_default();

    let folder = match &params.folder {
        Some(folder) => folder.clone(),
        None => match segments.len().checked_sub(2).map(|i| segments[i]) {
            Some(folder) if !folder.is_empty() => folder.to_string(),
            _ => {
                return Err(Error::new(format!(
                    "Cannot infer the model folder from {}, pass it explicitly",
                    url
                )))
            }
        },
    };

    if !params.allowed_folders.iter().any(|allowed| allowed == &folder) {
        return Err(Error::new(format!(
            "Invalid folder: {}. Available folders: {}",
            folder,
            params.allowed_folders.join(", ")
        )));
    }

    let filename = match &params.filename {
        Some(filename) => filename.clone(),
        None => segments
            .last()
            .filter(|name| !name.is_empty())
            .map(|name| name.to_string())
            .unwrap_or_else(|| DEFAULT_FILENAME.to_string()),
    };

    if filename.is_empty() || filename == "." || filename == ".." || filename.contains(['/', '\\']) {
        return Err(Error::new(format!("Invalid file name: {:?}", filename)));
    }

    let path = params.models_root.join(&folder).join(&filename);

    Ok(DownloadTarget {
        url,
        folder,
        filename,
        path,
    })
}

/// 下载文件；目标已存在且大小与 Content-Length 一致时跳过
pub async fn download(params: DownloadParams) -> Result<DownloadOutcome> {
    let target = resolve_target(&params)?;
    log::info!("Downloading {} -> {}", target.url, target.path.display());

    let interval = params.progress_interval;
    tokio::task::spawn_blocking(move || fetch(&target, interval))
        .await
        .map_err(|e| Error::with_source("Download task failed", Box::new(e)))?
}

fn fetch(target: &DownloadTarget, interval: Duration) -> Result<DownloadOutcome> {
    let folder = target.path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(folder)
        .map_err(|e| Error::with_source(format!("Failed to create {}", folder.display()), Box::new(e)))?;

    let response = ureq::get(target.url.as_str())
        .call()
        .map_err(|e| Error::with_source(format!("Request to {} failed", target.url), Box::new(e)))?;

    let total_size = response
        .header("Content-Length")
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(0);

    if total_size > 0 {
        if let Ok(metadata) = fs::metadata(&target.path) {
            if metadata.is_file() && metadata.len() == total_size {
                log::info!(
                    "{} already exists with the expected size, skipping download",
                    target.path.display()
                );
                return Ok(DownloadOutcome::AlreadyPresent {
                    path: target.path.clone(),
                    bytes: total_size,
                });
            }
        }
    }

    let incomplete = target.incomplete_path();
    let written = match stream_to_file(response.into_reader(), &incomplete, total_size, &target.filename, interval) {
        Ok(written) => written,
        Err(e) => {
            let _ = fs::remove_file(&incomplete);
            return Err(Error::with_source(
                format!("Failed to download {}", target.url),
                Box::new(e),
            ));
        }
    };

    fs::rename(&incomplete, &target.path).map_err(|e| {
        Error::with_source(
            format!("Failed to move download into {}", target.path.display()),
            Box::new(e),
        )
    })?;

    log::info!("Downloaded {} ({})", target.path.display(), format_bytes(written));

    Ok(DownloadOutcome::Downloaded {
        path: target.path.clone(),
        bytes: written,
    })
}

fn stream_to_file(
    mut reader: impl Read, path: &Path, total_size: u64, label: &str, interval: Duration,
) -> std::io::Result<u64> {
    let mut file = File::create(path)?;
    let progress = ProgressReporter::new(total_size, 1);
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut written = 0u64;
    let mut last_report = Instant::now();

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        file.write_all(&buffer[..n])?;
        written += n as u64;
        progress.add_bytes(n as u64);

        if last_report.elapsed() >= interval {
            print_progress(label, &progress, total_size);
            last_report = Instant::now();
        }
    }

    file.sync_all()?;
    progress.file_finished();
    print_progress(label, &progress, total_size);

    Ok(written)
}

fn print_progress(label: &str, progress: &ProgressReporter, total_size: u64) {
    let now = chrono::Local::now();
    let snapshot = progress.snapshot();
    if total_size > 0 {
        println!("[{}] {}: {}", now.format("%Y-%m-%d %H:%M:%S"), label, snapshot);
    } else {
        println!(
            "[{}] {}: {} downloaded",
            now.format("%Y-%m-%d %H:%M:%S"),
            label,
            format_bytes(snapshot.bytes_done)
        );
    }
}
