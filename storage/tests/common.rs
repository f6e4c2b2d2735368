use std::fs;
use tempfile::TempDir;

/// 创建测试用的临时目录结构
pub fn create_test_structure() -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();

    fs::create_dir_all(root.join("checkpoints/sdxl")).unwrap();
    fs::create_dir_all(root.join("loras")).unwrap();
    fs::create_dir_all(root.join("empty_dir")).unwrap();
    fs::create_dir_all(root.join("deep/nested/structure/here")).unwrap();

    fs::write(root.join("README.txt"), b"content1").unwrap();
    fs::write(root.join("checkpoints/base.ckpt"), b"content22").unwrap();
    fs::write(root.join("checkpoints/sdxl/model.safetensors"), b"content333").unwrap();
    fs::write(root.join("loras/style.safetensors"), b"content4444").unwrap();
    fs::write(root.join("deep/nested/structure/here/file7.txt"), b"content7").unwrap();

    // 空文件
    fs::write(root.join("empty_file.txt"), b"").unwrap();

    // 二进制文件
    fs::write(root.join("binary.dat"), vec![0u8; 1024]).unwrap();

    temp_dir
}
