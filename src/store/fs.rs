//! Filesystem object store with per-path version retention.
//!
//! Objects live under `{root}/objects/{key}` and versions under
//! `{root}/versions/{key}/{version_id}`. Writes are atomic (tmp file +
//! rename) and each overwrite records the new content as a version,
//! pruning the oldest past the retention bound.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use super::{MemoryFile, ObjectMeta, ObjectStore, VersionInfo, WriteReceipt};

pub struct FsStore {
    objects_dir: PathBuf,
    versions_dir: PathBuf,
    max_versions: usize,
    /// Orders version ids created within the same millisecond.
    version_seq: AtomicU64,
}

impl FsStore {
    /// Open (or create) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>, max_versions: usize) -> Result<Self> {
        let root = root.as_ref();
        let objects_dir = root.join("objects");
        let versions_dir = root.join("versions");
        std::fs::create_dir_all(&objects_dir)
            .with_context(|| format!("failed to create {}", objects_dir.display()))?;
        std::fs::create_dir_all(&versions_dir)
            .with_context(|| format!("failed to create {}", versions_dir.display()))?;
        Ok(Self {
            objects_dir,
            versions_dir,
            max_versions: max_versions.max(1),
            version_seq: AtomicU64::new(0),
        })
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        Ok(self.objects_dir.join(validate_key(key)?))
    }

    fn version_dir(&self, key: &str) -> Result<PathBuf> {
        Ok(self.versions_dir.join(validate_key(key)?))
    }

    /// Record `content` as a new version of `key` and prune past retention.
    fn record_version(&self, key: &str, content: &str) -> Result<String> {
        let dir = self.version_dir(key)?;
        std::fs::create_dir_all(&dir)?;

        // Millisecond timestamp, then a process-wide sequence so ids
        // created within the same millisecond still sort by write order.
        let version_id = format!(
            "{:013}-{:06x}-{:08x}",
            Utc::now().timestamp_millis(),
            self.version_seq.fetch_add(1, Ordering::Relaxed) & 0xff_ffff,
            content_fingerprint(content)
        );
        std::fs::write(dir.join(&version_id), content)?;

        // Version ids sort lexicographically by epoch-ms, so the oldest
        // come first.
        let mut ids: Vec<String> = std::fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        ids.sort();
        while ids.len() > self.max_versions {
            let oldest = ids.remove(0);
            let _ = std::fs::remove_file(dir.join(oldest));
        }

        Ok(version_id)
    }

    fn latest_version_id(&self, key: &str) -> Option<String> {
        let dir = self.version_dir(key).ok()?;
        let mut ids: Vec<String> = std::fs::read_dir(dir)
            .ok()?
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        ids.sort();
        ids.pop()
    }

    /// Collect every stored key (slash-delimited, relative to `objects/`).
    fn walk_keys(&self) -> Result<Vec<(String, u64, String)>> {
        let mut out = Vec::new();
        walk(&self.objects_dir, &self.objects_dir, &mut out)?;
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}

#[async_trait]
impl ObjectStore for FsStore {
    async fn read(&self, path: &str) -> Result<Option<MemoryFile>> {
        let file_path = self.object_path(path)?;
        if !file_path.is_file() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&file_path)
            .with_context(|| format!("failed to read {path}"))?;
        let meta = std::fs::metadata(&file_path)?;
        Ok(Some(MemoryFile {
            path: path.to_string(),
            size: content.len() as u64,
            updated_at: mtime_rfc3339(&meta),
            version_id: self.latest_version_id(path),
            content,
        }))
    }

    async fn write(&self, path: &str, content: &str) -> Result<WriteReceipt> {
        let file_path = self.object_path(path)?;
        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory for {path}"))?;
        }

        // Atomic replace: write a sibling tmp file, then rename over.
        let tmp = file_path.with_extension("mnemo-tmp");
        std::fs::write(&tmp, content).with_context(|| format!("failed to write {path}"))?;
        std::fs::rename(&tmp, &file_path)
            .with_context(|| format!("failed to commit write of {path}"))?;

        let version_id = self.record_version(path, content)?;
        tracing::debug!(path = %path, version = %version_id, bytes = content.len(), "object written");
        Ok(WriteReceipt {
            version_id: Some(version_id),
        })
    }

    async fn list(&self, prefix: &str, recursive: bool) -> Result<Vec<ObjectMeta>> {
        let keys = self.walk_keys()?;
        let mut out: Vec<ObjectMeta> = Vec::new();
        let mut seen_dirs: Vec<String> = Vec::new();

        for (key, size, updated_at) in keys {
            let Some(rest) = key.strip_prefix(prefix) else {
                continue;
            };
            if recursive {
                out.push(ObjectMeta {
                    path: key,
                    size,
                    updated_at,
                });
            } else if let Some(slash) = rest.find('/') {
                // Collapse nested keys into one synthetic row per
                // first-level sub-prefix.
                let dir = format!("{prefix}{}/", &rest[..slash]);
                if !seen_dirs.contains(&dir) {
                    seen_dirs.push(dir.clone());
                    out.push(ObjectMeta {
                        path: dir,
                        size: 0,
                        updated_at,
                    });
                }
            } else {
                out.push(ObjectMeta {
                    path: key,
                    size,
                    updated_at,
                });
            }
        }
        Ok(out)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let file_path = self.object_path(path)?;
        if !file_path.is_file() {
            bail!("not found: {path}");
        }
        std::fs::remove_file(&file_path).with_context(|| format!("failed to delete {path}"))?;
        tracing::debug!(path = %path, "object deleted");
        Ok(())
    }

    async fn get_versions(&self, path: &str, limit: usize) -> Result<Vec<VersionInfo>> {
        let dir = self.version_dir(path)?;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut entries: Vec<VersionInfo> = std::fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let version_id = e.file_name().into_string().ok()?;
                let meta = e.metadata().ok()?;
                Some(VersionInfo {
                    timestamp: mtime_rfc3339(&meta),
                    size: meta.len(),
                    version_id,
                })
            })
            .collect();
        // Newest first.
        entries.sort_by(|a, b| b.version_id.cmp(&a.version_id));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn get_version(&self, path: &str, version_id: &str) -> Result<Option<String>> {
        // Version ids are generated names; reject anything path-like.
        if version_id.contains('/') || version_id.contains("..") {
            return Ok(None);
        }
        let file = self.version_dir(path)?.join(version_id);
        if !file.is_file() {
            return Ok(None);
        }
        Ok(Some(std::fs::read_to_string(file)?))
    }
}

/// Reject keys that would escape the store root.
fn validate_key(key: &str) -> Result<&str> {
    if key.is_empty() {
        bail!("empty object key");
    }
    if key.starts_with('/') {
        bail!("object key must be relative: {key}");
    }
    if key.split('/').any(|part| part.is_empty() || part == "." || part == "..") {
        bail!("invalid object key: {key}");
    }
    Ok(key)
}

fn mtime_rfc3339(meta: &std::fs::Metadata) -> String {
    meta.modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// FNV-1a over the content bytes; enough to disambiguate version ids
/// created within the same millisecond.
fn content_fingerprint(content: &str) -> u32 {
    let mut hash: u32 = 0x811c9dc5;
    for byte in content.as_bytes() {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(0x01000193);
    }
    hash
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<(String, u64, String)>) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk(root, &path, out)?;
        } else if path.is_file() {
            let key = path
                .strip_prefix(root)
                .expect("walked path is under root")
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let meta = entry.metadata()?;
            out.push((key, meta.len(), mtime_rfc3339(&meta)));
        }
    }
    Ok(())
}
