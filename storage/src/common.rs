use std::collections::btree_map;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::SystemTime;

/// 枚举时发现的单个普通文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// 相对于树根的路径，统一使用正斜杠
    pub relative_path: String,
    pub size_bytes: u64,
    pub modified_time: SystemTime,
    /// 最后访问时间（文件系统不支持时为None）
    pub accessed_time: Option<SystemTime>,
    /// 不跟随链接遍历时，符号链接本身作为一个条目出现
    pub is_symlink: bool,
}

impl FileRecord {
    pub fn new(relative_path: impl Into<String>, size_bytes: u64, modified_time: SystemTime) -> Self {
        Self {
            relative_path: relative_path.into(),
            size_bytes,
            modified_time,
            accessed_time: None,
            is_symlink: false,
        }
    }

    /// 大小和修改时间是否都与另一条记录完全相同（且同为普通文件或同为链接）
    pub fn same_content_signal(&self, other: &FileRecord) -> bool {
        self.size_bytes == other.size_bytes
            && self.modified_time == other.modified_time
            && self.is_symlink == other.is_symlink
    }
}

/// 一棵目录树的文件索引：relative_path -> FileRecord
///
/// 只能通过 `FromIterator` 一次性构建，构建后不可修改。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeIndex {
    entries: BTreeMap<String, FileRecord>,
}

impl TreeIndex {
    pub fn get(&self, relative_path: &str) -> Option<&FileRecord> {
        self.entries.get(relative_path)
    }

    pub fn contains(&self, relative_path: &str) -> bool {
        self.entries.contains_key(relative_path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn records(&self) -> btree_map::Values<'_, String, FileRecord> {
        self.entries.values()
    }

    pub fn total_bytes(&self) -> u64 {
        self.entries.values().map(|r| r.size_bytes).sum()
    }
}

impl FromIterator<FileRecord> for TreeIndex {
    fn from_iter<I: IntoIterator<Item = FileRecord>>(iter: I) -> Self {
        let entries = iter
            .into_iter()
            .map(|record| (record.relative_path.clone(), record))
            .collect();

        Self { entries }
    }
}

impl<'a> IntoIterator for &'a TreeIndex {
    type Item = (&'a String, &'a FileRecord);
    type IntoIter = btree_map::Iter<'a, String, FileRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// 计算相对路径，并把路径分隔符标准化为正斜杠
pub fn get_relative_path(full_path: &Path, root: &Path) -> String {
    let relative = full_path.strip_prefix(root).unwrap_or(full_path);

    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
