use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::TempPath;

/// Creates files holding secret values; removes them all when dropped.
pub struct TempFactory {
    dir: PathBuf,
    files: Vec<TempPath>,
}

impl TempFactory {
    /// Files go to `/dev/shm` when it exists, so secrets stay off disk.
    pub fn new() -> Self {
        let shm = Path::new("/dev/shm");
        let dir = if shm.is_dir() {
            shm.to_path_buf()
        } else {
            std::env::temp_dir()
        };
        Self::in_dir(dir)
    }

    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            files: Vec::new(),
        }
    }

    /// Write `contents` to a new owner-only file and return its path.
    pub fn push(&mut self, contents: &[u8]) -> io::Result<PathBuf> {
        let mut file = tempfile::Builder::new()
            .prefix(".secretless")
            .tempfile_in(&self.dir)?;
        file.write_all(contents)?;
        file.flush()?;

        let path = file.into_temp_path();
        let location = path.to_path_buf();
        self.files.push(path);
        Ok(location)
    }
}

impl Default for TempFactory {
    fn default() -> Self {
        Self::new()
    }
}
