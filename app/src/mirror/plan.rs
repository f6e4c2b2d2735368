use std::collections::BTreeMap;
use std::fmt;

use storage::{FileRecord, TreeIndex};

use super::progress::format_bytes;

/// 对账计划 - 由源索引和目标索引推导出的三个互不相交的路径集合
///
/// 每个集合都是 相对路径 -> FileRecord 的映射：`to_copy`/`to_skip` 保存源文件记录，
/// `to_delete` 保存目标文件记录。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationPlan {
    pub to_copy: BTreeMap<String, FileRecord>,
    pub to_skip: BTreeMap<String, FileRecord>,
    pub to_delete: BTreeMap<String, FileRecord>,
}

/// 比较两棵树，决定每个路径是复制、跳过还是删除
///
/// 纯函数，不做任何IO。大小或修改时间（精确相等，无容差）任一不同即复制。
pub fn reconcile(source: &TreeIndex, destination: &TreeIndex) -> ReconciliationPlan {
    let mut plan = ReconciliationPlan::default();

    for (path, record) in source {
        match destination.get(path) {
            Some(existing) if existing.same_content_signal(record) => {
                plan.to_skip.insert(path.clone(), record.clone());
            }
            _ => {
                plan.to_copy.insert(path.clone(), record.clone());
            }
        }
    }

    for (path, record) in destination {
        if !source.contains(path) {
            plan.to_delete.insert(path.clone(), record.clone());
        }
    }

    plan
}

impl ReconciliationPlan {
    pub fn bytes_to_copy(&self) -> u64 {
        self.to_copy.values().map(|r| r.size_bytes).sum()
    }

    pub fn bytes_to_skip(&self) -> u64 {
        self.to_skip.values().map(|r| r.size_bytes).sum()
    }

    pub fn bytes_to_delete(&self) -> u64 {
        self.to_delete.values().map(|r| r.size_bytes).sum()
    }

    /// 没有任何需要执行的操作
    pub fn is_noop(&self) -> bool {
        self.to_copy.is_empty() && self.to_delete.is_empty()
    }
}

impl fmt::Display for ReconciliationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "   Copy   : {:>8} files  {:>12}", self.to_copy.len(), format_bytes(self.bytes_to_copy()))?;
        writeln!(f, "   Skip   : {:>8} files  {:>12}", self.to_skip.len(), format_bytes(self.bytes_to_skip()))?;
        write!(f, "   Delete : {:>8} files  {:>12}", self.to_delete.len(), format_bytes(self.bytes_to_delete()))
    }
}
