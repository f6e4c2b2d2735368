use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;

use filetime::FileTime;

/// 每次读写的块大小（1 MiB）
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// 传输中临时文件的前缀；中断遗留的临时文件会在下一次镜像时作为多余文件被删除
pub const TEMP_PREFIX: &str = ".modelsync-";

/// 进度回调：参数为刚写入的字节数
pub type ChunkCallback<'a> = dyn FnMut(u64) -> io::Result<()> + 'a;

/// 单文件传输能力 - 镜像引擎只通过该接口修改目标树
pub trait FileTransfer: Send + Sync {
    /// 复制一个文件，每写入一块数据就调用一次 `on_chunk`，返回写入的总字节数
    ///
    /// `on_chunk` 返回错误时复制中止，目标文件保持原样。
    fn copy(&self, source: &Path, destination: &Path, on_chunk: &mut ChunkCallback<'_>) -> io::Result<u64>;

    /// 删除一个文件；文件已不存在视为成功
    fn remove(&self, path: &Path) -> io::Result<()>;
}

/// 本地文件系统上的传输实现
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTransfer;

impl FileTransfer for LocalTransfer {
    fn copy(&self, source: &Path, destination: &Path, on_chunk: &mut ChunkCallback<'_>) -> io::Result<u64> {
        copy_file(source, destination, on_chunk)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        remove_file(path)
    }
}

/// 原子地复制文件
///
/// 数据先写入目标目录下的临时文件，设置与源文件相同的权限和修改时间后再
/// 重命名到目标路径。失败时临时文件随 `NamedTempFile` 一起被删除，目标路径
/// 要么保持原样，要么是完整的新文件。
pub fn copy_file(source: &Path, destination: &Path, on_chunk: &mut ChunkCallback<'_>) -> io::Result<u64> {
    let mut reader = File::open(source)?;
    let metadata = reader.metadata()?;

    let parent = destination.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no parent directory", destination.display()),
        )
    })?;
    fs::create_dir_all(parent)?;

    let mut temp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(".tmp")
        .tempfile_in(parent)?;

    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut written = 0u64;
    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        temp.write_all(&buffer[..n])?;
        written += n as u64;
        on_chunk(n as u64)?;
    }
    temp.as_file().sync_all()?;

    fs::set_permissions(temp.path(), metadata.permissions())?;
    filetime::set_file_mtime(temp.path(), FileTime::from_last_modification_time(&metadata))?;

    // 文件取代同名的空目录；非空目录让 remove_dir 报错
    if fs::symlink_metadata(destination).map(|m| m.is_dir()).unwrap_or(false) {
        fs::remove_dir(destination)?;
    }
    temp.persist(destination).map_err(|e| e.error)?;

    Ok(written)
}

/// 删除文件，NotFound 视为成功
pub fn remove_file(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
