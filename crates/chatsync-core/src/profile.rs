//! Profile-directory walking.
//!
//! The client keeps one file per conversation under
//! `<profile>/chatsync/<bucket>/<id>.dat`. [`ProfileWalker`] finds those
//! files, decodes each one independently and collects the results. A file
//! that cannot be read is recorded as [`DecodeStatus::Unreadable`]; it never
//! aborts the walk.

use crate::decoder::{DecodeStatus, Decoder};
use crate::error::{Error, Result, ScanStop, ScanWarning};
use crate::model::{ConversationModel, MessageEvent};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;

/// Which files the walker picks up
#[derive(Debug, Clone)]
pub struct WalkerConfig {
    /// Accepted file extensions, lowercase, without the dot
    pub extensions: Vec<String>,
    /// Deepest directory level searched below the root
    pub max_depth: usize,
    /// Whether dot-files are considered
    pub include_hidden: bool,
    /// Whether symbolic links are followed
    pub follow_links: bool,
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["dat".to_string()],
            max_depth: 2,
            include_hidden: false,
            follow_links: false,
        }
    }
}

impl WalkerConfig {
    /// Creates a new walker config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the accepted extensions
    pub fn extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.into().trim_start_matches('.').to_lowercase())
            .collect();
        self
    }

    /// Sets the search depth
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Sets whether dot-files are considered
    pub fn include_hidden(mut self, include: bool) -> Self {
        self.include_hidden = include;
        self
    }

    /// Sets whether symbolic links are followed
    pub fn follow_links(mut self, follow: bool) -> Self {
        self.follow_links = follow;
        self
    }

    fn accepts(&self, path: &Path) -> bool {
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with('.'))
            .unwrap_or(false);
        if hidden && !self.include_hidden {
            return false;
        }
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
    }
}

/// Outcome for one file
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    /// Path of the file
    pub path: PathBuf,
    /// Short content digest, absent if the file could not be read
    pub digest: Option<String>,
    /// Completeness of the decode
    pub status: DecodeStatus,
    /// Recovered conversation (empty when unreadable)
    #[serde(flatten)]
    pub model: ConversationModel,
    /// Where scanning stopped early
    pub stops: Vec<ScanStop>,
    /// Structural oddities that did not stop scanning
    pub warnings: Vec<ScanWarning>,
    /// Why the file is unreadable
    pub error: Option<String>,
}

impl FileReport {
    fn unreadable(path: PathBuf, digest: Option<String>, error: impl ToString) -> Self {
        Self {
            path,
            digest,
            status: DecodeStatus::Unreadable,
            model: ConversationModel::default(),
            stops: Vec::new(),
            warnings: Vec::new(),
            error: Some(error.to_string()),
        }
    }

    /// Conversation start time
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.model.timestamp()
    }

    /// Participants
    pub fn participants(&self) -> &[String] {
        self.model.participants()
    }

    /// Events in stream order
    pub fn conversation(&self) -> &[MessageEvent] {
        self.model.conversation()
    }
}

/// Outcome for a whole directory
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileReport {
    /// Directory that was walked
    pub root: PathBuf,
    /// One entry per candidate file, sorted by path
    pub files: Vec<FileReport>,
    /// True if the walk was cancelled before all files were decoded
    pub cancelled: bool,
}

impl ProfileReport {
    /// Number of files with the given status
    pub fn count(&self, status: DecodeStatus) -> usize {
        self.files.iter().filter(|f| f.status == status).count()
    }

    /// Files that yielded at least some data
    pub fn decoded(&self) -> impl Iterator<Item = &FileReport> + '_ {
        self.files
            .iter()
            .filter(|f| f.status != DecodeStatus::Unreadable)
    }
}

/// Walks a profile directory and decodes every candidate file
#[derive(Debug, Clone, Default)]
pub struct ProfileWalker {
    decoder: Decoder,
    config: WalkerConfig,
    cancel: Option<Arc<AtomicBool>>,
}

impl ProfileWalker {
    /// Creates a walker with default decoder and file selection
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses the given decoder
    pub fn with_decoder(mut self, decoder: Decoder) -> Self {
        self.decoder = decoder;
        self
    }

    /// Uses the given file selection
    pub fn with_config(mut self, config: WalkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Checks the flag between files and stops once it is set
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Candidate files below `root`, sorted by path
    pub fn candidates(&self, root: &Path) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = WalkDir::new(root)
            .min_depth(1)
            .max_depth(self.config.max_depth)
            .follow_links(self.config.follow_links)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping directory entry: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| {
                let keep = self.config.accepts(path);
                if !keep {
                    trace!("Skipping {}", path.display());
                }
                keep
            })
            .collect();
        paths.sort();
        paths
    }

    /// Decode a single file into a report entry
    pub fn decode_one(&self, path: &Path) -> FileReport {
        let decoded = match self.decoder.decode_file(path) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Error processing {}: {}", path.display(), e);
                return FileReport::unreadable(path.to_path_buf(), None, e);
            }
        };

        if decoded.chunk_count == 0 {
            debug!("No blocks in {}", path.display());
            let mut report = FileReport::unreadable(
                path.to_path_buf(),
                Some(decoded.digest),
                Error::no_chunks_found(path),
            );
            report.stops = decoded.diagnostics.stops;
            report.warnings = decoded.diagnostics.warnings;
            return report;
        }

        FileReport {
            path: path.to_path_buf(),
            digest: Some(decoded.digest),
            status: decoded.status,
            model: decoded.model,
            stops: decoded.diagnostics.stops,
            warnings: decoded.diagnostics.warnings,
            error: None,
        }
    }

    /// Decode every candidate file below `root`.
    ///
    /// Fails only if `root` is not a directory.
    pub fn walk(&self, root: impl AsRef<Path>) -> Result<ProfileReport> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(Error::not_a_directory(root));
        }

        info!("Scanning directory: {}", root.display());
        let mut report = ProfileReport {
            root: root.to_path_buf(),
            ..Default::default()
        };

        for path in self.candidates(root) {
            if self
                .cancel
                .as_ref()
                .is_some_and(|flag| flag.load(Ordering::Relaxed))
            {
                info!("Walk cancelled after {} files", report.files.len());
                report.cancelled = true;
                break;
            }
            debug!("Processing {}", path.display());
            report.files.push(self.decode_one(&path));
        }

        info!(
            "Processed {} files: {} complete, {} partial, {} unreadable",
            report.files.len(),
            report.count(DecodeStatus::Complete),
            report.count(DecodeStatus::Partial),
            report.count(DecodeStatus::Unreadable)
        );
        Ok(report)
    }
}

/// Walk `root` with default settings
pub fn scan_profile_dir(root: impl AsRef<Path>) -> Result<ProfileReport> {
    ProfileWalker::new().walk(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::ChatsyncWriter;
    use std::fs;
    use tempfile::TempDir;

    fn sample_file() -> Vec<u8> {
        let mut writer = ChatsyncWriter::new();
        writer.participants(["alice", "bob"]);
        writer.posted("alice", "hi", None);
        writer.finish().unwrap()
    }

    #[test]
    fn test_accepts() {
        let config = WalkerConfig::default();
        assert!(config.accepts(Path::new("/p/chatsync/ab/x.dat")));
        assert!(config.accepts(Path::new("/p/chatsync/ab/x.DAT")));
        assert!(!config.accepts(Path::new("/p/chatsync/ab/x.txt")));
        assert!(!config.accepts(Path::new("/p/chatsync/ab/.x.dat")));
        assert!(WalkerConfig::new()
            .extensions(Vec::<String>::new())
            .accepts(Path::new("/p/any")));
        assert!(WalkerConfig::new()
            .extensions([".BIN"])
            .accepts(Path::new("/p/a.bin")));
    }

    #[test]
    fn test_walk_mixed_directory() {
        let dir = TempDir::new().unwrap();
        let bucket = dir.path().join("0a");
        fs::create_dir(&bucket).unwrap();

        let good = sample_file();
        fs::write(bucket.join("a.dat"), &good).unwrap();
        fs::write(bucket.join("b.dat"), &good[..good.len() - 3]).unwrap();
        fs::write(bucket.join("c.dat"), b"not a chatsync file").unwrap();
        fs::write(bucket.join("notes.txt"), b"ignored").unwrap();

        let report = ProfileWalker::new().walk(dir.path()).unwrap();
        assert_eq!(report.files.len(), 3);
        assert!(!report.cancelled);

        assert_eq!(report.files[0].status, DecodeStatus::Complete);
        assert_eq!(report.files[0].participants(), &["alice", "bob"]);
        assert_eq!(report.files[0].conversation().len(), 1);
        assert!(report.files[0].warnings.is_empty());

        assert_eq!(report.files[1].status, DecodeStatus::Partial);
        assert_eq!(report.files[1].participants(), &["alice", "bob"]);

        assert_eq!(report.files[2].status, DecodeStatus::Unreadable);
        assert!(report.files[2].error.is_some());

        assert_eq!(report.decoded().count(), 2);
    }

    #[test]
    fn test_depth_limit_matches_bucket_layout() {
        let dir = TempDir::new().unwrap();
        let deep = dir.path().join("a").join("b");
        fs::create_dir_all(&deep).unwrap();
        fs::write(deep.join("too-deep.dat"), sample_file()).unwrap();
        fs::write(dir.path().join("a").join("ok.dat"), sample_file()).unwrap();

        let walker = ProfileWalker::new();
        let candidates = walker.candidates(dir.path());
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].ends_with("ok.dat"));
    }

    #[test]
    fn test_cancel_flag_stops_between_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.dat"), sample_file()).unwrap();
        fs::write(dir.path().join("b.dat"), sample_file()).unwrap();

        let flag = Arc::new(AtomicBool::new(true));
        let report = ProfileWalker::new()
            .with_cancel_flag(flag)
            .walk(dir.path())
            .unwrap();
        assert!(report.cancelled);
        assert!(report.files.is_empty());
    }

    #[test]
    fn test_walk_rejects_non_directory() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("x.dat");
        fs::write(&file, b"").unwrap();
        assert!(matches!(
            ProfileWalker::new().walk(&file),
            Err(Error::NotADirectory { .. })
        ));
    }

    #[test]
    fn test_report_serializes_flat_model() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.dat"), sample_file()).unwrap();
        let report = scan_profile_dir(dir.path()).unwrap();
        let json = serde_json::to_value(&report).unwrap();

        let file = &json["files"][0];
        assert_eq!(file["status"], "complete");
        assert_eq!(file["participants"][1], "bob");
        assert_eq!(file["conversation"][0]["type"], "posted");
        assert_eq!(file["warnings"], serde_json::json!([]));
    }

    #[test]
    fn test_warnings_reported() {
        let dir = TempDir::new().unwrap();
        let mut data = sample_file();
        // padding of the first block header
        data[32 + 12] = 0xFF;
        fs::write(dir.path().join("a.dat"), &data).unwrap();

        let report = scan_profile_dir(dir.path()).unwrap();
        assert_eq!(report.files[0].status, DecodeStatus::Complete);
        assert_eq!(
            report.files[0].warnings,
            vec![ScanWarning::BlockPadding { offset: 32 }]
        );
    }
}
