// Persistent channel record database
//
// Keeps every known channel record in memory and mirrors it to a text file
// (one record per line) after each mutation. Default location is
// ~/.local/share/chansync/channels.lst

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{ChannelManifest, MetadataStore};
use crate::error::{ImportError, StoreError};
use crate::types::{ChannelRecord, ContentId, PublicKey};

/// Channel database backed by a text file
pub struct FileStore {
    state_file: PathBuf,
    personal_key: PublicKey,
    // Keyed by public key: at most one record per channel owner
    records: RwLock<HashMap<PublicKey, ChannelRecord>>,
}

impl FileStore {
    /// Format version
    const FORMAT_VERSION: &'static str = "v1";

    /// Open or create the database at `state_file`
    pub async fn open(state_file: impl Into<PathBuf>, personal_key: PublicKey) -> Result<Self, StoreError> {
        let state_file = state_file.into();
        if let Some(parent) = state_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let records = match tokio::fs::read_to_string(&state_file).await {
            Ok(text) => Self::parse(&state_file, &text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        info!(
            path = %state_file.display(),
            channels = records.len(),
            "Opened channel database"
        );

        Ok(Self {
            state_file,
            personal_key,
            records: RwLock::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.state_file
    }

    /// Parse the database text, skipping malformed lines
    fn parse(path: &Path, text: &str) -> HashMap<PublicKey, ChannelRecord> {
        let mut records = HashMap::new();

        for (index, line) in text.lines().enumerate() {
            let line = line.trim();

            // Skip comments and blank lines
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match Self::parse_line(line) {
                Some(record) => {
                    records.insert(record.public_key.clone(), record);
                }
                None => {
                    let err = StoreError::Corrupt {
                        path: path.to_path_buf(),
                        line: index + 1,
                        reason: "unparseable record".to_string(),
                    };
                    warn!("{}, skipping", err);
                }
            }
        }

        records
    }

    // Parse: <public_key> <content_id|-> <remote_version> <local_version> <subscribed> <title>
    fn parse_line(line: &str) -> Option<ChannelRecord> {
        let parts: Vec<&str> = line.splitn(6, ' ').collect();
        if parts.len() != 6 {
            return None;
        }

        let public_key: PublicKey = parts[0].parse().ok()?;
        let content_id = if parts[1] == "-" {
            None
        } else {
            Some(parts[1].parse::<ContentId>().ok()?)
        };
        let remote_version: u64 = parts[2].parse().ok()?;
        let local_version: u64 = parts[3].parse().ok()?;
        let subscribed = match parts[4] {
            "1" => true,
            "0" => false,
            _ => return None,
        };

        let title = unquote_title(parts[5])?;

        Some(ChannelRecord {
            public_key,
            content_id,
            title,
            remote_version,
            local_version,
            subscribed,
        })
    }

    fn render(&self, records: &HashMap<PublicKey, ChannelRecord>) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# chansync channels {}", Self::FORMAT_VERSION);
        let _ = writeln!(out, "# personal: {}", self.personal_key);
        let _ = writeln!(out, "# saved: {}", chrono::Utc::now().to_rfc3339());

        // Sorted for deterministic output
        let mut entries: Vec<&ChannelRecord> = records.values().collect();
        entries.sort_by(|a, b| a.public_key.cmp(&b.public_key));

        for record in entries {
            let content_id = record
                .content_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string());
            let title = quote_title(&record.title);
            let _ = writeln!(
                out,
                "{} {} {} {} {} {}",
                record.public_key,
                content_id,
                record.remote_version,
                record.local_version,
                if record.subscribed { 1 } else { 0 },
                title
            );
        }

        out
    }

    /// Save all records (atomic write)
    async fn save(&self, records: &HashMap<PublicKey, ChannelRecord>) -> Result<(), StoreError> {
        let temp_file = self.state_file.with_extension("tmp");
        tokio::fs::write(&temp_file, self.render(records)).await?;
        tokio::fs::rename(&temp_file, &self.state_file).await?;
        Ok(())
    }

    /// Write `next` to disk, then make it the cached state. On failure the
    /// cache keeps what is on disk.
    async fn commit(
        &self,
        records: &mut HashMap<PublicKey, ChannelRecord>,
        next: HashMap<PublicKey, ChannelRecord>,
    ) -> Result<(), StoreError> {
        self.save(&next).await?;
        *records = next;
        Ok(())
    }

    /// Insert or replace a record
    pub async fn upsert(&self, record: ChannelRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        debug!(public_key = %record.public_key, "Storing channel record");
        let mut next = records.clone();
        next.insert(record.public_key.clone(), record);
        self.commit(&mut records, next).await
    }

    pub async fn get(&self, public_key: &PublicKey) -> Option<ChannelRecord> {
        self.records.read().await.get(public_key).cloned()
    }

    pub async fn set_subscribed(&self, public_key: &PublicKey, subscribed: bool) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let mut next = records.clone();
        next.get_mut(public_key)
            .ok_or_else(|| StoreError::UnknownChannel(public_key.clone()))?
            .subscribed = subscribed;
        self.commit(&mut records, next).await
    }

    /// Delete a record; returns whether it existed
    pub async fn remove(&self, public_key: &PublicKey) -> Result<bool, StoreError> {
        let mut records = self.records.write().await;
        let mut next = records.clone();
        let existed = next.remove(public_key).is_some();
        if existed {
            self.commit(&mut records, next).await?;
        }
        Ok(existed)
    }
}

/// Quote a title for the database line, escaping anything that would break
/// the one-record-per-line layout
fn quote_title(title: &str) -> String {
    let plain = !title.is_empty()
        && !title
            .chars()
            .any(|c| c.is_whitespace() || c == '"' || c == '\\' || c.is_control());
    if plain {
        return title.to_string();
    }

    let mut out = String::with_capacity(title.len() + 2);
    out.push('"');
    for c in title.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{{{:x}}}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn unquote_title(raw: &str) -> Option<String> {
    if !(raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"')) {
        return Some(raw.to_string());
    }

    let mut out = String::with_capacity(raw.len());
    let mut chars = raw[1..raw.len() - 1].chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            '"' => out.push('"'),
            '\\' => out.push('\\'),
            'u' => {
                if chars.next()? != '{' {
                    return None;
                }
                let hex: String = chars.by_ref().take_while(|&c| c != '}').collect();
                out.push(char::from_u32(u32::from_str_radix(&hex, 16).ok()?)?);
            }
            _ => return None,
        }
    }
    Some(out)
}

#[async_trait]
impl MetadataStore for FileStore {
    fn personal_key(&self) -> &PublicKey {
        &self.personal_key
    }

    async fn updated_subscribed_channels(&self) -> Result<Vec<ChannelRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| r.subscribed && r.update_available() && !r.is_personal(&self.personal_key))
            .cloned()
            .collect())
    }

    async fn personal_channel(&self) -> Result<Option<ChannelRecord>, StoreError> {
        Ok(self.records.read().await.get(&self.personal_key).cloned())
    }

    async fn all_channels(&self) -> Result<Vec<ChannelRecord>, StoreError> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn process_channel_dir(
        &self,
        content_id: &ContentId,
        directory: &Path,
    ) -> Result<ChannelRecord, ImportError> {
        let manifest = ChannelManifest::load(directory).await?;
        if manifest.content_id != *content_id {
            return Err(ImportError::ContentMismatch {
                content_id: *content_id,
                claimed: manifest.content_id,
            });
        }

        let mut records = self.records.write().await;
        let mut record = records
            .get(&manifest.public_key)
            .cloned()
            .ok_or(ImportError::UnknownChannel {
                content_id: *content_id,
            })?;

        match record.content_id {
            Some(current) if current == *content_id => {}
            Some(current) => {
                return Err(ImportError::Superseded {
                    public_key: record.public_key.clone(),
                    expected: current,
                    found: *content_id,
                });
            }
            None => {
                return Err(ImportError::UnknownChannel {
                    content_id: *content_id,
                });
            }
        }

        record.local_version = record.local_version.max(manifest.version);
        if record.local_version > record.remote_version {
            // The archive is newer than the gossip we have seen so far
            record.remote_version = record.local_version;
        }
        let mut next = records.clone();
        next.insert(record.public_key.clone(), record.clone());
        self.commit(&mut records, next).await?;
        Ok(record)
    }
}
