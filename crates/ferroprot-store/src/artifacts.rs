//! Artifact storage for run directories.
//!
//! Writes go to a uniquely named sibling temp file which is then renamed over the
//! target, so a reader sees either the previous document or the new one, never a
//! partial write. Reads are bounded and confined to the run directory.

use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::events::RunEvent;
use crate::run_id::normalize_run_id;

/// Upper bound for documents the pipeline itself reads back.
pub const INTERNAL_READ_LIMIT: u64 = 256 * 1024 * 1024;

pub const EVENTS_FILE: &str = "events.jsonl";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactEntry {
    pub path: String,
    pub is_dir: bool,
    pub size: Option<u64>,
}

/// A window of an artifact returned by [`ArtifactStore::read_window`].
#[derive(Debug, Clone)]
pub struct ArtifactChunk {
    pub path: String,
    pub size: u64,
    pub offset: u64,
    pub data: Vec<u8>,
    pub truncated: bool,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_dir(&self, run_id: &str) -> Result<PathBuf> {
        let id = normalize_run_id(run_id)?;
        Ok(self.root.join(id))
    }

    pub fn run_exists(&self, run_id: &str) -> bool {
        self.run_dir(run_id).map(|d| d.is_dir()).unwrap_or(false)
    }

    /// Resolve `rel` inside the run directory. Absolute paths, `..` components and
    /// symlinks pointing outside the run directory are rejected.
    pub fn resolve(&self, run_id: &str, rel: &str) -> Result<PathBuf> {
        let run_dir = self.run_dir(run_id)?;
        let rel_path = Path::new(rel);
        let mut out = run_dir.clone();
        for comp in rel_path.components() {
            match comp {
                Component::Normal(part) => out.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(StoreError::PathEscape(rel.to_string()));
                }
            }
        }

        if out.exists() && run_dir.exists() {
            let real_run = run_dir
                .canonicalize()
                .map_err(|e| StoreError::io(&run_dir, e))?;
            let real = out.canonicalize().map_err(|e| StoreError::io(&out, e))?;
            if !real.starts_with(&real_run) {
                return Err(StoreError::PathEscape(rel.to_string()));
            }
        }
        Ok(out)
    }

    pub fn exists(&self, run_id: &str, rel: &str) -> bool {
        self.resolve(run_id, rel).map(|p| p.is_file()).unwrap_or(false)
    }

    pub fn ensure_run_dir(&self, run_id: &str) -> Result<PathBuf> {
        let dir = self.run_dir(run_id)?;
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        Ok(dir)
    }

    // ── Writes ───────────────────────────────────────────────────────────────

    pub fn write(&self, run_id: &str, rel: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.resolve(run_id, rel)?;
        let parent = path
            .parent()
            .ok_or_else(|| StoreError::PathEscape(rel.to_string()))?;
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StoreError::PathEscape(rel.to_string()))?;
        let tmp = parent.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4().simple()));

        let written = (|| -> std::io::Result<()> {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(bytes)?;
            f.sync_all()?;
            fs::rename(&tmp, &path)
        })();
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::io(&path, e));
        }

        debug!(run_id, path = rel, bytes = bytes.len(), "Artifact written");
        Ok(path)
    }

    pub fn write_text(&self, run_id: &str, rel: &str, text: &str) -> Result<PathBuf> {
        self.write(run_id, rel, text.as_bytes())
    }

    pub fn write_json<T: Serialize + ?Sized>(&self, run_id: &str, rel: &str, value: &T) -> Result<PathBuf> {
        let mut bytes = serde_json::to_vec_pretty(value)?;
        bytes.push(b'\n');
        self.write(run_id, rel, &bytes)
    }

    /// Append one event as a JSON line to `events.jsonl`.
    pub fn append_event(&self, run_id: &str, event: &RunEvent) -> Result<()> {
        let path = self.resolve(run_id, EVENTS_FILE)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StoreError::io(&path, e))?;
        f.write_all(&line).map_err(|e| StoreError::io(&path, e))?;
        Ok(())
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    /// Read a whole artifact, failing with `ArtifactTooLarge` beyond `max_bytes`.
    pub fn read(&self, run_id: &str, rel: &str, max_bytes: u64) -> Result<Vec<u8>> {
        let path = self.resolve(run_id, rel)?;
        let meta = match fs::metadata(&path) {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Err(StoreError::NotFound(rel.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(rel.to_string()))
            }
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        if meta.len() > max_bytes {
            return Err(StoreError::ArtifactTooLarge {
                path: rel.to_string(),
                size: meta.len(),
                limit: max_bytes,
            });
        }
        fs::read(&path).map_err(|e| StoreError::io(&path, e))
    }

    pub fn read_text(&self, run_id: &str, rel: &str) -> Result<String> {
        let bytes = self.read(run_id, rel, INTERNAL_READ_LIMIT)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn read_json<T: DeserializeOwned>(&self, run_id: &str, rel: &str) -> Result<T> {
        let bytes = self.read(run_id, rel, INTERNAL_READ_LIMIT)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Read a JSON document if present and well-formed; `None` otherwise.
    pub fn read_json_opt<T: DeserializeOwned>(&self, run_id: &str, rel: &str) -> Option<T> {
        match self.read_json(run_id, rel) {
            Ok(v) => Some(v),
            Err(StoreError::NotFound(_)) => None,
            Err(e) => {
                debug!(run_id, path = rel, error = %e, "Ignoring unreadable artifact");
                None
            }
        }
    }

    /// Read at most `max_bytes` starting at `offset`.
    pub fn read_window(&self, run_id: &str, rel: &str, offset: u64, max_bytes: u64) -> Result<ArtifactChunk> {
        let path = self.resolve(run_id, rel)?;
        if !path.is_file() {
            return Err(StoreError::NotFound(rel.to_string()));
        }
        let mut f = fs::File::open(&path).map_err(|e| StoreError::io(&path, e))?;
        let size = f.metadata().map_err(|e| StoreError::io(&path, e))?.len();
        let offset = offset.min(size);
        f.seek(SeekFrom::Start(offset)).map_err(|e| StoreError::io(&path, e))?;

        let mut data = Vec::new();
        f.take(max_bytes)
            .read_to_end(&mut data)
            .map_err(|e| StoreError::io(&path, e))?;
        let truncated = offset + (data.len() as u64) < size;
        Ok(ArtifactChunk { path: rel.to_string(), size, offset, data, truncated })
    }

    /// List files and directories under `prefix` (relative to the run directory),
    /// depth-first in name order, at most `max_depth` levels and `limit` entries.
    pub fn list_artifacts(
        &self,
        run_id: &str,
        prefix: Option<&str>,
        max_depth: usize,
        limit: usize,
    ) -> Result<Vec<ArtifactEntry>> {
        let run_dir = self.run_dir(run_id)?;
        if !run_dir.is_dir() {
            return Err(StoreError::NotFound(run_id.to_string()));
        }
        let start = match prefix.map(str::trim).filter(|p| !p.is_empty()) {
            Some(p) => self.resolve(run_id, p)?,
            None => run_dir.clone(),
        };

        let mut out = Vec::new();
        if start.is_file() {
            out.push(entry_for(&run_dir, &start)?);
            return Ok(out);
        }
        walk(&run_dir, &start, 1, max_depth, limit, &mut out)?;
        Ok(out)
    }

    /// Run ids present under the root (directories only), unordered.
    pub fn run_ids(&self) -> Result<Vec<String>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        let entries = fs::read_dir(&self.root).map_err(|e| StoreError::io(&self.root, e))?;
        for entry in entries.flatten() {
            if entry.path().is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if normalize_run_id(name).is_ok() {
                        ids.push(name.to_string());
                    }
                }
            }
        }
        Ok(ids)
    }
}

fn entry_for(run_dir: &Path, path: &Path) -> Result<ArtifactEntry> {
    let rel = path
        .strip_prefix(run_dir)
        .map_err(|_| StoreError::PathEscape(path.display().to_string()))?;
    let rel = rel
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect::<Vec<_>>()
        .join("/");
    let meta = fs::symlink_metadata(path).map_err(|e| StoreError::io(path, e))?;
    Ok(ArtifactEntry {
        path: rel,
        is_dir: meta.is_dir(),
        size: meta.is_file().then(|| meta.len()),
    })
}

fn walk(
    run_dir: &Path,
    dir: &Path,
    depth: usize,
    max_depth: usize,
    limit: usize,
    out: &mut Vec<ArtifactEntry>,
) -> Result<()> {
    if depth > max_depth || out.len() >= limit {
        return Ok(());
    }
    let mut children: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| StoreError::io(dir, e))?
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            !p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.') && n.ends_with(".tmp"))
        })
        .collect();
    children.sort();

    for child in children {
        if out.len() >= limit {
            break;
        }
        let entry = entry_for(run_dir, &child)?;
        let descend = entry.is_dir;
        out.push(entry);
        if descend {
            walk(run_dir, &child, depth + 1, max_depth, limit, out)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn store() -> (tempfile::TempDir, ArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn test_write_creates_parents_and_reads_back() {
        let (_d, s) = store();
        s.write_json("r1", "tiers/30/fixed_positions.json", &json!({"A": [1, 2]})).unwrap();
        let v: serde_json::Value = s.read_json("r1", "tiers/30/fixed_positions.json").unwrap();
        assert_eq!(v, json!({"A": [1, 2]}));
        assert!(s.exists("r1", "tiers/30/fixed_positions.json"));
    }

    #[test]
    fn test_overwrite_leaves_no_temp_files() {
        let (_d, s) = store();
        s.write_text("r1", "a.txt", "one").unwrap();
        s.write_text("r1", "a.txt", "two").unwrap();
        assert_eq!(s.read_text("r1", "a.txt").unwrap(), "two");
        let names: Vec<_> = fs::read_dir(s.run_dir("r1").unwrap())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["a.txt".to_string()]);
    }

    #[test]
    fn test_path_escape_rejected() {
        let (_d, s) = store();
        assert!(matches!(s.write_text("r1", "../x.txt", "x"), Err(StoreError::PathEscape(_))));
        assert!(matches!(s.read("r1", "/etc/passwd", 10), Err(StoreError::PathEscape(_))));
        assert!(matches!(s.resolve("r1", "a/../../b"), Err(StoreError::PathEscape(_))));
        assert!(matches!(s.resolve("../r1", "a"), Err(StoreError::InvalidRunId(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_rejected() {
        let (d, s) = store();
        let outside = d.path().join("outside.txt");
        fs::write(&outside, "secret").unwrap();
        let run = s.ensure_run_dir("r1").unwrap();
        std::os::unix::fs::symlink(&outside, run.join("link.txt")).unwrap();
        assert!(matches!(s.read("r1", "link.txt", 100), Err(StoreError::PathEscape(_))));
    }

    #[test]
    fn test_read_over_limit_is_an_error() {
        let (_d, s) = store();
        s.write("r1", "big.bin", &[7u8; 32]).unwrap();
        match s.read("r1", "big.bin", 31) {
            Err(StoreError::ArtifactTooLarge { size, limit, .. }) => {
                assert_eq!(size, 32);
                assert_eq!(limit, 31);
            }
            other => panic!("expected ArtifactTooLarge, got {other:?}"),
        }
        assert_eq!(s.read("r1", "big.bin", 32).unwrap().len(), 32);
        assert!(matches!(s.read("r1", "missing", 1), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_read_window_reports_truncation() {
        let (_d, s) = store();
        s.write_text("r1", "log.txt", "0123456789").unwrap();
        let c = s.read_window("r1", "log.txt", 2, 4).unwrap();
        assert_eq!(c.data, b"2345");
        assert!(c.truncated);
        assert_eq!(c.size, 10);
        let tail = s.read_window("r1", "log.txt", 6, 100).unwrap();
        assert_eq!(tail.data, b"6789");
        assert!(!tail.truncated);
    }

    #[test]
    fn test_append_event_is_line_delimited() {
        let (_d, s) = store();
        for i in 0..3 {
            let ev = RunEvent::new("r1", EventKind::Warning, None, format!("w{i}"));
            s.append_event("r1", &ev).unwrap();
        }
        let text = s.read_text("r1", EVENTS_FILE).unwrap();
        assert_eq!(text.lines().count(), 3);
        for line in text.lines() {
            let _: RunEvent = serde_json::from_str(line).unwrap();
        }
    }

    #[test]
    fn test_list_artifacts_depth_and_limit() {
        let (_d, s) = store();
        s.write_text("r1", "status.json", "{}").unwrap();
        s.write_text("r1", "tiers/30/designs.fasta", ">a\nM\n").unwrap();
        s.write_text("r1", "tiers/30/af2/d1/metrics.json", "{}").unwrap();

        let shallow = s.list_artifacts("r1", None, 1, 100).unwrap();
        let paths: Vec<_> = shallow.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["status.json", "tiers"]);

        let tier = s.list_artifacts("r1", Some("tiers/30"), 4, 100).unwrap();
        let paths: Vec<_> = tier.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "tiers/30/af2",
                "tiers/30/af2/d1",
                "tiers/30/af2/d1/metrics.json",
                "tiers/30/designs.fasta"
            ]
        );

        let limited = s.list_artifacts("r1", None, 10, 2).unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn test_run_ids_lists_directories() {
        let (d, s) = store();
        s.ensure_run_dir("a").unwrap();
        s.ensure_run_dir("b").unwrap();
        fs::write(d.path().join("stray.txt"), "x").unwrap();
        let mut ids = s.run_ids().unwrap();
        ids.sort();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }
}
