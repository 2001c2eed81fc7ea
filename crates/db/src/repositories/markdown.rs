use std::ffi::OsString;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use fs2::FileExt;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use siteguard_core::domain::{MemoryCategory, MemoryEntry, MemoryScope};
use siteguard_core::errors::StoreError;
use siteguard_core::memory::{AppendOutcome, MemoryStore};

pub const MEMORY_LOG_TITLE: &str = "# Memory Log";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";
const RECORD_PREFIX: &str = "- [";

struct ScopeFile {
    path: PathBuf,
    writer: Mutex<()>,
}

impl ScopeFile {
    fn new(path: PathBuf) -> Self {
        Self { path, writer: Mutex::new(()) }
    }
}

/// Append-only Markdown memory log, one file per scope.
///
/// Records look like `- [YYYY-MM-DD HH:MM] [category] content`. Records
/// without a category tag are read as [`MemoryCategory::Other`]; lines that
/// start like a record but do not parse (a `- [ ]` checklist item, a bad
/// timestamp) are skipped. Existing lines are never rewritten.
///
/// Appends take the in-process scope mutex and then an advisory lock on a
/// `<file>.lock` sidecar, so separate processes sharing the files also
/// serialise their duplicate check and append.
pub struct MarkdownMemoryStore {
    user: ScopeFile,
    organization: ScopeFile,
}

impl MarkdownMemoryStore {
    pub fn new(user_path: impl Into<PathBuf>, organization_path: impl Into<PathBuf>) -> Self {
        Self {
            user: ScopeFile::new(user_path.into()),
            organization: ScopeFile::new(organization_path.into()),
        }
    }

    pub fn path(&self, scope: MemoryScope) -> &Path {
        &self.file(scope).path
    }

    fn file(&self, scope: MemoryScope) -> &ScopeFile {
        match scope {
            MemoryScope::User => &self.user,
            MemoryScope::Organization => &self.organization,
        }
    }
}

#[async_trait]
impl MemoryStore for MarkdownMemoryStore {
    async fn read(&self, scope: MemoryScope) -> Result<Vec<MemoryEntry>, StoreError> {
        let file = self.file(scope);
        let _guard = file.writer.lock().await;
        load(&file.path, scope).await
    }

    async fn append_unique(&self, entry: MemoryEntry) -> Result<AppendOutcome, StoreError> {
        let file = self.file(entry.scope);
        let _guard = file.writer.lock().await;
        let _lock = lock_exclusive(&file.path).await?;

        let existing = load(&file.path, entry.scope).await?;
        if existing.iter().any(|known| known.normalized_key == entry.normalized_key) {
            return Ok(AppendOutcome::Duplicate);
        }

        write_record(&file.path, &entry).await?;
        Ok(AppendOutcome::Appended)
    }
}

async fn load(path: &Path, scope: MemoryScope) -> Result<Vec<MemoryEntry>, StoreError> {
    let text = match fs::read_to_string(path).await {
        Ok(text) => text,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(StoreError::Io { path: path.to_path_buf(), source }),
    };

    let mut entries = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if !line.starts_with(RECORD_PREFIX) {
            continue;
        }
        match parse_record(line, scope) {
            Ok(entry) => entries.push(entry),
            Err(reason) => warn!(
                event_name = "memory.record.skipped",
                path = %path.display(),
                line = index + 1,
                reason = %reason,
                "skipping unreadable memory record"
            ),
        }
    }
    Ok(entries)
}

fn parse_record(line: &str, scope: MemoryScope) -> Result<MemoryEntry, String> {
    let rest = &line[RECORD_PREFIX.len()..];
    let (stamp, rest) =
        rest.split_once(']').ok_or_else(|| "missing `]` after the timestamp".to_string())?;
    let created_at = NaiveDateTime::parse_from_str(stamp.trim(), TIMESTAMP_FORMAT)
        .map_err(|error| format!("invalid timestamp `{stamp}`: {error}"))?
        .and_utc();

    let rest = rest.trim_start();
    let (category, content) = match rest.strip_prefix('[').and_then(|tagged| tagged.split_once(']')) {
        Some((tag, content)) => (MemoryCategory::parse(tag), content),
        None => (MemoryCategory::Other, rest),
    };

    let content = content.trim();
    if content.is_empty() {
        return Err("record has no content".to_string());
    }
    Ok(MemoryEntry::new(content, category, scope, created_at))
}

fn format_record(entry: &MemoryEntry) -> String {
    let content = entry.content.lines().map(str::trim).collect::<Vec<_>>().join(" ");
    format!("- [{}] [{}] {}\n", entry.created_at.format(TIMESTAMP_FORMAT), entry.category, content)
}

fn header(now: DateTime<Utc>) -> String {
    format!("{MEMORY_LOG_TITLE}\n\nGenerated: {}\n\n", now.to_rfc3339())
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".lock");
    path.with_file_name(name)
}

/// Blocks (off the runtime) until the sidecar lock is held. Dropping the
/// returned file releases it.
async fn lock_exclusive(path: &Path) -> Result<std::fs::File, StoreError> {
    let lock_path = lock_path(path);
    let io = |source: io::Error| StoreError::Io { path: lock_path.clone(), source };

    if let Some(parent) = lock_path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await.map_err(io)?;
    }

    let target = lock_path.clone();
    tokio::task::spawn_blocking(move || {
        let file = std::fs::OpenOptions::new().create(true).truncate(false).write(true).open(&target)?;
        file.lock_exclusive()?;
        Ok(file)
    })
    .await
    .map_err(|error| io(io::Error::new(ErrorKind::Other, error)))?
    .map_err(io)
}

async fn write_record(path: &Path, entry: &MemoryEntry) -> Result<(), StoreError> {
    let io = |source: io::Error| StoreError::Io { path: path.to_path_buf(), source };

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await.map_err(io)?;
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path).await.map_err(io)?;
    let mut payload = String::new();
    if file.metadata().await.map_err(io)?.len() == 0 {
        debug!(event_name = "memory.store.created", path = %path.display(), "creating memory log");
        payload.push_str(&header(Utc::now()));
    }
    payload.push_str(&format_record(entry));

    file.write_all(payload.as_bytes()).await.map_err(io)?;
    file.flush().await.map_err(io)
}
