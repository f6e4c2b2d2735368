pub mod cleanup;
pub mod download;
pub mod mirror;

/// 公共API的prelude模块
/// 用户可以通过 `use app::prelude::*` 来导入最常用的类型
pub mod prelude {
    pub use crate::cleanup::{remove_unused, CleanupParams, CleanupReport};
    pub use crate::download::{download, DownloadOutcome, DownloadParams};
    pub use crate::mirror::{mirror, CancelFlag, ExecuteOptions, ExecutionReport, MirrorOutcome, MirrorParams};
}
