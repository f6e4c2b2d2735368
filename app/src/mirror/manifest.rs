use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use storage::FileRecord;

/// 删除清单 - 在真正删除之前写入磁盘，作为外部审计记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionManifest {
    pub operation: String,
    pub source_root: Option<String>,
    pub target_root: String,
    pub created_at: DateTime<Utc>,
    pub entries: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestEntry {
    pub relative_path: String,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
}

impl DeletionManifest {
    pub fn new(operation: &str, source_root: Option<&Path>, target_root: &Path) -> Self {
        Self {
            operation: operation.to_string(),
            source_root: source_root.map(|p| p.to_string_lossy().into_owned()),
            target_root: target_root.to_string_lossy().into_owned(),
            created_at: Utc::now(),
            entries: Vec::new(),
        }
    }

    pub fn push_record(&mut self, record: &FileRecord) {
        self.entries.push(ManifestEntry {
            relative_path: record.relative_path.clone(),
            size_bytes: record.size_bytes,
            modified: DateTime::<Utc>::from(record.modified_time),
        });
    }

    /// 写入 `<dir>/<operation>-<时间戳>.json`，返回文件路径；不会覆盖已有清单
    pub fn write_to(&self, dir: &Path) -> io::Result<PathBuf> {
        fs::create_dir_all(dir)?;

        let stamp = Local::now().format("%Y%m%d-%H%M%S%.3f");
        let mut attempt = 0;
        let (path, file) = loop {
            let name = if attempt == 0 {
                format!("{}-{}.json", self.operation, stamp)
            } else {
                format!("{}-{}-{}.json", self.operation, stamp, attempt)
            };
            let path = dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => break (path, file),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e),
            }
        };

        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;

        log::info!(
            "Wrote deletion manifest with {} entries to {}",
            self.entries.len(),
            path.display()
        );

        Ok(path)
    }

    pub fn read_from(path: &Path) -> io::Result<Self> {
        let contents = fs::read(path)?;
        Ok(serde_json::from_slice(&contents)?)
    }
}
