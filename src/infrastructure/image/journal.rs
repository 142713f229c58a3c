//! Append-only journal for the disk cache.
//!
//! Every write start, commit, read and removal is recorded as one JSON line,
//! so entry sizes and LRU order survive restarts without rescanning the data
//! files. Replaying a journal that ends in a torn line keeps everything
//! before it.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::domain::entities::CacheKey;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub(super) enum JournalRecord {
    Dirty { key: String },
    Clean { key: String, len: u64 },
    Remove { key: String },
    Read { key: String },
}

impl JournalRecord {
    pub(super) fn dirty(key: &CacheKey) -> Self {
        Self::Dirty {
            key: key.to_string(),
        }
    }

    pub(super) fn clean(key: &CacheKey, len: u64) -> Self {
        Self::Clean {
            key: key.to_string(),
            len,
        }
    }

    pub(super) fn remove(key: &CacheKey) -> Self {
        Self::Remove {
            key: key.to_string(),
        }
    }

    pub(super) fn read(key: &CacheKey) -> Self {
        Self::Read {
            key: key.to_string(),
        }
    }

    fn key(&self) -> &str {
        match self {
            Self::Dirty { key }
            | Self::Clean { key, .. }
            | Self::Remove { key }
            | Self::Read { key } => key,
        }
    }

    pub(super) const fn is_redundant(&self) -> bool {
        !matches!(self, Self::Clean { .. })
    }
}

/// State rebuilt from the journal, least recently used entry first.
pub(super) struct Replay {
    pub entries: LruCache<CacheKey, u64>,
    /// Keys whose last record is `Dirty`: writes cut off by a crash.
    pub dirty: HashSet<CacheKey>,
    pub records: usize,
    pub torn_tail: bool,
}

impl Replay {
    pub(super) fn empty() -> Self {
        Self {
            entries: LruCache::unbounded(),
            dirty: HashSet::new(),
            records: 0,
            torn_tail: false,
        }
    }
}

fn invalid(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

pub(super) async fn replay(path: &Path) -> io::Result<Replay> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Replay::empty()),
        Err(err) => return Err(err),
    };

    let mut replay = Replay::empty();
    let unterminated = !content.is_empty() && !content.ends_with('\n');
    let lines: Vec<&str> = content.lines().collect();

    for (index, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: JournalRecord = match serde_json::from_str(line) {
            Ok(record) => record,
            Err(_) if unterminated && index + 1 == lines.len() => {
                replay.torn_tail = true;
                break;
            }
            Err(err) => return Err(invalid(format!("invalid journal line {}: {err}", index + 1))),
        };
        let key = CacheKey::parse(record.key())
            .ok_or_else(|| invalid(format!("invalid key on journal line {}", index + 1)))?;

        match record {
            JournalRecord::Dirty { .. } => {
                replay.dirty.insert(key);
            }
            JournalRecord::Clean { len, .. } => {
                replay.dirty.remove(&key);
                replay.entries.put(key, len);
            }
            JournalRecord::Remove { .. } => {
                replay.dirty.remove(&key);
                replay.entries.pop(&key);
            }
            JournalRecord::Read { .. } => {
                replay.entries.get(&key);
            }
        }
        replay.records += 1;
    }

    Ok(replay)
}

/// Append handle on the journal file.
pub(super) struct Journal {
    path: PathBuf,
    file: File,
}

impl Journal {
    pub(super) async fn open(path: PathBuf) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self { path, file })
    }

    pub(super) async fn append(&mut self, record: &JournalRecord) -> io::Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        self.file.write_all(line.as_bytes()).await?;
        self.file.flush().await
    }

    pub(super) async fn sync(&mut self) -> io::Result<()> {
        self.file.flush().await?;
        self.file.sync_data().await
    }

    /// Replaces the journal with one `Clean` record per entry, oldest first,
    /// so replaying it restores the same LRU order.
    pub(super) async fn rewrite(&mut self, entries: &LruCache<CacheKey, u64>) -> io::Result<()> {
        let mut body = String::new();
        for (key, len) in entries.iter().rev() {
            body.push_str(&serde_json::to_string(&JournalRecord::clean(key, *len))?);
            body.push('\n');
        }

        let mut tmp_name = self.path.clone().into_os_string();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let mut tmp = File::create(&tmp_path).await?;
        tmp.write_all(body.as_bytes()).await?;
        tmp.sync_all().await?;
        drop(tmp);
        fs::rename(&tmp_path, &self.path).await?;

        self.file = OpenOptions::new().append(true).open(&self.path).await?;
        Ok(())
    }
}
