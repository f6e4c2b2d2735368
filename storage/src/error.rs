use std::io;
use std::path::PathBuf;

/// 文件系统错误 - 根目录不可用或遍历失败，对整个调用是致命的
#[derive(Debug, thiserror::Error)]
pub enum FileSystemError {
    #[error("{path} is not accessible: {source}")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("Failed to enumerate {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Failed to read metadata of {path}: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, FileSystemError>;
