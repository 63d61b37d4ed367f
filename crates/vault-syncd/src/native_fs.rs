//! Native filesystem implementation using tokio::fs.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;
use vault_sync::filter::{PathFilter, SYNC_DIR};
use vault_sync::fs::{FileStat, FsError, LocalEntry, LocalFileStore, Result, WriteOptions};

/// The vault directory on disk.
pub struct NativeFs {
    base_path: PathBuf,
}

impl NativeFs {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn full_path(&self, path: &str) -> PathBuf {
        let mut full = self.base_path.clone();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            full.push(segment);
        }
        full
    }
}

fn map_err(path: &str, e: io::Error) -> FsError {
    match e.kind() {
        io::ErrorKind::NotFound => FsError::NotFound(path.to_string()),
        io::ErrorKind::IsADirectory => FsError::IsDirectory(path.to_string()),
        _ => FsError::Io(format!("{}: {}", path, e)),
    }
}

fn millis(time: io::Result<SystemTime>) -> Option<u64> {
    time.ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
}

fn to_stat(metadata: &std::fs::Metadata) -> FileStat {
    let mtime = millis(metadata.modified()).unwrap_or(0);
    FileStat {
        size: metadata.len(),
        mtime,
        ctime: millis(metadata.created()).unwrap_or(mtime),
    }
}

#[async_trait]
impl LocalFileStore for NativeFs {
    async fn list(&self, filter: &PathFilter) -> Result<Vec<LocalEntry>> {
        let mut entries = Vec::new();
        // (directory on disk, vault-relative prefix)
        let mut pending = vec![(self.base_path.clone(), String::new())];

        while let Some((dir_path, prefix)) = pending.pop() {
            let mut dir = fs::read_dir(&dir_path)
                .await
                .map_err(|e| map_err(&prefix, e))?;

            while let Some(entry) = dir.next_entry().await.map_err(|e| map_err(&prefix, e))? {
                let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                let relative = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{}/{}", prefix, name)
                };
                let file_type = entry.file_type().await.map_err(|e| map_err(&relative, e))?;

                if file_type.is_symlink() {
                    continue;
                }
                if file_type.is_dir() {
                    let hidden = name.starts_with('.') && !filter.include_hidden;
                    if relative != SYNC_DIR && !hidden {
                        pending.push((entry.path(), relative));
                    }
                    continue;
                }
                if !filter.matches(&relative) {
                    continue;
                }

                let metadata = match entry.metadata().await {
                    Ok(metadata) => metadata,
                    // Removed between read_dir and stat
                    Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(map_err(&relative, e)),
                };
                let stat = to_stat(&metadata);
                entries.push(LocalEntry {
                    path: relative,
                    size: stat.size,
                    mtime: stat.mtime,
                    ctime: stat.ctime,
                });
            }
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn read_binary(&self, path: &str) -> Result<Vec<u8>> {
        fs::read(self.full_path(path))
            .await
            .map_err(|e| map_err(path, e))
    }

    async fn write_binary(&self, path: &str, content: &[u8], options: WriteOptions) -> Result<()> {
        let full_path = self.full_path(path);
        let Some(file_name) = full_path.file_name().and_then(|n| n.to_str()) else {
            return Err(FsError::Io(format!("{}: invalid file name", path)));
        };
        // Hidden temp name so scans and the watcher filter skip it
        let tmp_path = full_path.with_file_name(format!(".{}.vault-sync-tmp", file_name));

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| map_err(path, e))?;
        }

        fs::write(&tmp_path, content)
            .await
            .map_err(|e| map_err(path, e))?;

        if let Some(mtime) = options.mtime {
            let file = fs::OpenOptions::new()
                .write(true)
                .open(&tmp_path)
                .await
                .map_err(|e| map_err(path, e))?
                .into_std()
                .await;
            let times = std::fs::FileTimes::new()
                .set_modified(UNIX_EPOCH + Duration::from_millis(mtime));
            // Creation time is not settable portably; it stays at write time
            tokio::task::spawn_blocking(move || file.set_times(times))
                .await
                .map_err(|e| FsError::Io(format!("{}: {}", path, e)))?
                .map_err(|e| map_err(path, e))?;
        }

        fs::rename(&tmp_path, &full_path)
            .await
            .map_err(|e| map_err(path, e))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full_path = self.full_path(path);
        let metadata = fs::metadata(&full_path)
            .await
            .map_err(|e| map_err(path, e))?;

        if metadata.is_dir() {
            return Err(FsError::IsDirectory(path.to_string()));
        }
        fs::remove_file(&full_path)
            .await
            .map_err(|e| map_err(path, e))
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        let metadata = fs::metadata(self.full_path(path))
            .await
            .map_err(|e| map_err(path, e))?;

        if metadata.is_dir() {
            return Err(FsError::IsDirectory(path.to_string()));
        }
        Ok(to_stat(&metadata))
    }
}
