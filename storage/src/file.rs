use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::common::{get_relative_path, FileRecord, TreeIndex};
use crate::error::{FileSystemError, Result};

/// 本地存储 - 以某个根目录为基准的文件树
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
    follow_links: bool,
}

impl LocalStorage {
    /// 默认跟随符号链接
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            follow_links: true,
        }
    }

    /// 是否跟随根目录以下的符号链接
    ///
    /// 不跟随时，每个链接（无论指向文件还是目录）都作为一个 `is_symlink` 条目产出，
    /// 从不进入链接指向的目录。要修改的树（镜像目标、清理目录）必须这样遍历。
    pub fn follow_links(mut self, follow: bool) -> Self {
        self.follow_links = follow;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get full path for a relative key
    pub fn full_path(&self, relative_path: &str) -> PathBuf {
        self.root.join(relative_path)
    }

    /// 检查根目录存在且是目录
    pub fn check_root(&self) -> Result<()> {
        let metadata = fs::metadata(&self.root).map_err(|source| FileSystemError::Unavailable {
            path: self.root.clone(),
            source,
        })?;

        if !metadata.is_dir() {
            return Err(FileSystemError::NotADirectory(self.root.clone()));
        }

        Ok(())
    }

    /// 确保根目录存在（不存在则创建）
    pub fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|source| FileSystemError::Unavailable {
            path: self.root.clone(),
            source,
        })?;

        self.check_root()
    }

    /// 惰性遍历根目录下的所有普通文件
    ///
    /// 跟随符号链接时，每个目录按规范路径只访问一次，因此循环链接不会导致无限递归。
    /// 根目录本身总是被解析。同一目录下的条目按文件名排序。
    pub fn walk(&self) -> Result<FileWalker> {
        self.check_root()?;

        let inner = WalkDir::new(&self.root)
            .follow_links(self.follow_links)
            .sort_by_file_name()
            .max_open(100)
            .into_iter();

        Ok(FileWalker {
            root: self.root.clone(),
            inner,
            visited: HashSet::new(),
        })
    }

    /// 遍历并构建完整的 TreeIndex；任何致命错误都会使整个遍历失败
    pub fn walk_files(&self) -> Result<TreeIndex> {
        let index = self.walk()?.collect::<Result<TreeIndex>>()?;
        log::debug!("Indexed {} files under {}", index.len(), self.root.display());

        Ok(index)
    }

    /// 自底向上删除因删除文件而变空的目录，返回删除的目录数
    ///
    /// 只使用 `remove_dir`，它拒绝删除非空目录；根目录本身永远保留。
    pub fn prune_empty_dirs<'a, I>(&self, relative_paths: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut candidates: Vec<PathBuf> = relative_paths
            .into_iter()
            .filter_map(|p| self.full_path(p).parent().map(Path::to_path_buf))
            .filter(|dir| dir.starts_with(&self.root) && dir != &self.root)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        // deepest first
        candidates.sort_by_key(|dir| std::cmp::Reverse(dir.components().count()));

        let mut removed = 0;
        for dir in candidates {
            let mut current = Some(dir.as_path());
            while let Some(dir) = current {
                if dir == self.root || !dir.starts_with(&self.root) {
                    break;
                }
                match fs::remove_dir(dir) {
                    Ok(()) => {
                        log::debug!("Pruned empty directory {}", dir.display());
                        removed += 1;
                    }
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(_) => break,
                }
                current = dir.parent();
            }
        }

        removed
    }
}

/// 文件遍历器 - 逐个产出 FileRecord
pub struct FileWalker {
    root: PathBuf,
    inner: walkdir::IntoIter,
    visited: HashSet<PathBuf>,
}

impl FileWalker {
    fn on_walk_error(&self, err: walkdir::Error) -> Option<FileSystemError> {
        if let Some(ancestor) = err.loop_ancestor() {
            log::warn!(
                "Skipping symlink loop at {:?} (points to {})",
                err.path(),
                ancestor.display()
            );
            return None;
        }

        // dangling links and files removed mid-walk are not fatal
        let vanished = err
            .io_error()
            .map(|e| e.kind() == io::ErrorKind::NotFound)
            .unwrap_or(false);
        if vanished && err.depth() > 0 {
            log::warn!("Skipping vanished entry {:?}", err.path());
            return None;
        }

        let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| self.root.clone());
        Some(FileSystemError::Walk { path, source: err })
    }

    /// 为文件或链接条目构建记录；返回 None 表示条目在遍历途中消失
    fn record_for(&self, entry: &walkdir::DirEntry, is_symlink: bool) -> Option<Result<FileRecord>> {
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) => return self.on_walk_error(err).map(Err),
        };

        let modified_time = match metadata.modified() {
            Ok(t) => t,
            Err(source) => {
                return Some(Err(FileSystemError::Metadata {
                    path: entry.path().to_path_buf(),
                    source,
                }))
            }
        };

        Some(Ok(FileRecord {
            relative_path: get_relative_path(entry.path(), &self.root),
            size_bytes: metadata.len(),
            modified_time,
            accessed_time: metadata.accessed().ok(),
            is_symlink,
        }))
    }
}

impl Iterator for FileWalker {
    type Item = Result<FileRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(err) => match self.on_walk_error(err) {
                    Some(fatal) => return Some(Err(fatal)),
                    None => continue,
                },
            };

            let file_type = entry.file_type();

            if file_type.is_dir() {
                let identity = fs::canonicalize(entry.path()).unwrap_or_else(|_| entry.path().to_path_buf());
                if !self.visited.insert(identity) {
                    log::debug!("Skipping already visited directory {}", entry.path().display());
                    self.inner.skip_current_dir();
                }
                continue;
            }

            // 只有不跟随链接时才会看到链接本身
            let is_symlink = file_type.is_symlink();

            if !is_symlink && !file_type.is_file() {
                log::debug!("Skipping non-regular entry {}", entry.path().display());
                continue;
            }

            match self.record_for(&entry, is_symlink) {
                Some(item) => return Some(item),
                None => continue,
            }
        }
    }
}
