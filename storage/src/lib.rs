pub mod common;
pub mod error;
pub mod file;
pub mod transfer;

pub use common::*;
pub use error::{FileSystemError, Result};
pub use file::*;
pub use transfer::*;

use std::path::{Path, PathBuf};

/// 解析本地路径，支持相对路径和绝对路径
pub fn resolve_local_path(path: &str) -> Result<PathBuf> {
    let path_obj = Path::new(path);

    if path_obj.is_absolute() {
        Ok(path_obj.to_path_buf())
    } else {
        std::env::current_dir()
            .map(|dir| dir.join(path_obj))
            .map_err(|source| FileSystemError::Unavailable {
                path: path_obj.to_path_buf(),
                source,
            })
    }
}

/// 规范化路径中已存在的最长前缀，再拼回尚不存在的部分
///
/// 用于判断一个（可能尚未创建的）路径在解析所有符号链接后实际落在哪里。
pub fn canonicalize_existing_prefix(path: &Path) -> PathBuf {
    let mut missing = Vec::new();
    let mut current = path;

    loop {
        if let Ok(canonical) = std::fs::canonicalize(current) {
            return missing.iter().rev().fold(canonical, |acc, part| acc.join(part));
        }
        match (current.parent(), current.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                current = parent;
            }
            _ => return path.to_path_buf(),
        }
    }
}
