//! Durable "the server was started at T from channel C" marker.
//!
//! The marker is a single JSON object on disk:
//!
//! ```json
//! {"instance": "minecraft", "start_at": "2024-05-01T12:34:56.789012", "channel_id": 123}
//! ```
//!
//! A missing file means there is no tracked session.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{NaiveDateTime, SubsecRound};
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;

const START_AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";
// `%.f` also accepts a missing fractional part.
const START_AT_PARSE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

const KEY_INSTANCE: &str = "instance";
const KEY_START_AT: &str = "start_at";
const KEY_CHANNEL_ID: &str = "channel_id";

/// One field of a persisted record: parsed, or kept exactly as found on disk.
#[derive(Debug, Clone, PartialEq)]
pub enum Field<T> {
    Parsed(T),
    Raw(Value),
}

impl<T> Field<T> {
    pub fn parsed(&self) -> Option<&T> {
        match self {
            Self::Parsed(v) => Some(v),
            Self::Raw(_) => None,
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, Self::Raw(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StartLogRecord {
    pub instance_name: Field<String>,
    pub start_at: Field<NaiveDateTime>,
    pub channel_id: Field<u64>,
}

impl StartLogRecord {
    pub fn new(instance_name: impl Into<String>, start_at: NaiveDateTime, channel_id: u64) -> Self {
        Self {
            instance_name: Field::Parsed(instance_name.into()),
            start_at: Field::Parsed(start_at),
            channel_id: Field::Parsed(channel_id),
        }
    }

    /// True when at least one field could not be parsed.
    pub fn is_partial(&self) -> bool {
        self.instance_name.is_raw() || self.start_at.is_raw() || self.channel_id.is_raw()
    }

    pub fn start_at(&self) -> Option<NaiveDateTime> {
        self.start_at.parsed().copied()
    }

    pub fn channel_id(&self) -> Option<u64> {
        self.channel_id.parsed().copied()
    }

    fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert(
            KEY_INSTANCE.to_string(),
            match &self.instance_name {
                Field::Parsed(name) => Value::String(name.clone()),
                Field::Raw(v) => v.clone(),
            },
        );
        obj.insert(
            KEY_START_AT.to_string(),
            match &self.start_at {
                Field::Parsed(at) => Value::String(at.format(START_AT_FORMAT).to_string()),
                Field::Raw(v) => v.clone(),
            },
        );
        obj.insert(
            KEY_CHANNEL_ID.to_string(),
            match &self.channel_id {
                Field::Parsed(id) => Value::from(*id),
                Field::Raw(v) => v.clone(),
            },
        );
        Value::Object(obj)
    }

    fn from_json(mut obj: Map<String, Value>) -> Self {
        let mut take = |key: &str| obj.remove(key).unwrap_or(Value::Null);

        let instance_name = match take(KEY_INSTANCE) {
            Value::String(s) => Field::Parsed(s),
            other => Field::Raw(other),
        };

        let start_at = match take(KEY_START_AT) {
            Value::String(s) => match NaiveDateTime::parse_from_str(&s, START_AT_PARSE_FORMAT) {
                Ok(at) => Field::Parsed(at),
                Err(_) => Field::Raw(Value::String(s)),
            },
            other => Field::Raw(other),
        };

        let channel_id = match take(KEY_CHANNEL_ID) {
            Value::Number(n) => match n.as_u64() {
                Some(id) => Field::Parsed(id),
                None => Field::Raw(Value::Number(n)),
            },
            Value::String(s) => match s.trim().parse::<u64>() {
                Ok(id) => Field::Parsed(id),
                Err(_) => Field::Raw(Value::String(s)),
            },
            other => Field::Raw(other),
        };

        Self {
            instance_name,
            start_at,
            channel_id,
        }
    }
}

/// Single-slot store for the start marker.
#[derive(Debug, Clone)]
pub struct StartLogStore {
    path: PathBuf,
    instance_name: String,
}

impl StartLogStore {
    pub fn new(path: impl Into<PathBuf>, instance_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            instance_name: instance_name.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records a start at the current local time, replacing any previous record.
    pub async fn write(&self, channel_id: u64) -> anyhow::Result<StartLogRecord> {
        let now = chrono::Local::now().naive_local().trunc_subsecs(6);
        let record = StartLogRecord::new(self.instance_name.clone(), now, channel_id);
        self.write_record(&record).await?;
        Ok(record)
    }

    pub async fn write_record(&self, record: &StartLogRecord) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create directory {}", parent.display()))?;
        }

        let data = serde_json::to_vec(&record.to_json()).context("serialize start log")?;
        let tmp = self.path.with_extension("json.tmp");

        let mut f = tokio::fs::File::create(&tmp)
            .await
            .with_context(|| format!("create {}", tmp.display()))?;
        f.write_all(&data)
            .await
            .with_context(|| format!("write {}", tmp.display()))?;
        f.flush()
            .await
            .with_context(|| format!("flush {}", tmp.display()))?;
        drop(f);

        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("persist start log {}", self.path.display()))?;

        tracing::debug!(path = %self.path.display(), "wrote start log");
        Ok(())
    }

    /// Returns the current record, or `None` when the slot is empty.
    pub async fn read(&self) -> anyhow::Result<Option<StartLogRecord>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(v) => v,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("read start log {}", self.path.display()));
            }
        };
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        let obj = serde_json::from_slice::<Map<String, Value>>(&raw)
            .with_context(|| format!("start log {} is not a JSON object", self.path.display()))?;
        let record = StartLogRecord::from_json(obj);
        if record.is_partial() {
            tracing::warn!(path = %self.path.display(), ?record, "start log partially parsed");
        }
        Ok(Some(record))
    }

    /// Removes the record. No-op when it does not exist.
    pub async fn delete(&self) -> anyhow::Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "deleted start log");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("delete start log {}", self.path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> StartLogStore {
        StartLogStore::new(dir.path().join("server_start_log.json"), "minecraft")
    }

    #[tokio::test]
    async fn missing_file_is_no_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = StartLogStore::new(dir.path().join("not/yet/created.json"), "minecraft");
        assert!(store.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let written = store.write(987_654_321_012_345_678).await.unwrap();
        let read = store.read().await.unwrap().unwrap();

        assert_eq!(read, written);
        assert!(!read.is_partial());
        assert_eq!(read.instance_name.parsed().map(String::as_str), Some("minecraft"));
        assert_eq!(read.channel_id(), Some(987_654_321_012_345_678));

        let drift = chrono::Local::now().naive_local() - read.start_at().unwrap();
        assert!(drift >= chrono::TimeDelta::zero());
        assert!(drift < chrono::TimeDelta::seconds(5));
    }

    #[tokio::test]
    async fn write_overwrites_previous_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.write(1).await.unwrap();
        store.write(2).await.unwrap();
        assert_eq!(store.read().await.unwrap().unwrap().channel_id(), Some(2));
        assert!(!dir.path().join("server_start_log.json.tmp").exists());
    }

    #[tokio::test]
    async fn write_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = StartLogStore::new(dir.path().join("state/marker.json"), "minecraft");
        store.write(7).await.unwrap();
        assert!(dir.path().join("state/marker.json").exists());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.delete().await.unwrap();
        store.write(1).await.unwrap();
        store.delete().await.unwrap();
        store.delete().await.unwrap();
        assert!(store.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_format_is_flat_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let at = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_micro_opt(12, 34, 56, 789_012)
            .unwrap();
        store
            .write_record(&StartLogRecord::new("minecraft", at, 42))
            .await
            .unwrap();

        let raw = std::fs::read(store.path()).unwrap();
        let v: Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(v["instance"], "minecraft");
        assert_eq!(v["start_at"], "2024-05-01T12:34:56.789012");
        assert_eq!(v["channel_id"], 42);
    }

    #[tokio::test]
    async fn accepts_timestamp_without_fraction() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(
            store.path(),
            br#"{"instance":"minecraft","start_at":"2024-05-01T12:00:00","channel_id":5}"#,
        )
        .unwrap();

        let rec = store.read().await.unwrap().unwrap();
        let expected = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        assert_eq!(rec.start_at(), Some(expected));
        assert!(!rec.is_partial());
    }

    #[tokio::test]
    async fn unparsable_fields_are_kept_raw() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(
            store.path(),
            br#"{"instance":"minecraft","start_at":"yesterday","channel_id":"not-a-channel"}"#,
        )
        .unwrap();

        let rec = store.read().await.unwrap().unwrap();
        assert!(rec.is_partial());
        assert_eq!(rec.instance_name.parsed().map(String::as_str), Some("minecraft"));
        assert_eq!(rec.start_at, Field::Raw(Value::String("yesterday".to_string())));
        assert_eq!(rec.channel_id, Field::Raw(Value::String("not-a-channel".to_string())));
        assert_eq!(rec.start_at(), None);
    }

    #[tokio::test]
    async fn channel_id_as_string_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(
            store.path(),
            br#"{"instance":"minecraft","start_at":"2024-05-01T12:00:00.5","channel_id":"77"}"#,
        )
        .unwrap();

        let rec = store.read().await.unwrap().unwrap();
        assert_eq!(rec.channel_id(), Some(77));
    }

    #[tokio::test]
    async fn missing_fields_are_raw_null() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), br#"{"start_at":"2024-05-01T12:00:00"}"#).unwrap();

        let rec = store.read().await.unwrap().unwrap();
        assert_eq!(rec.instance_name, Field::Raw(Value::Null));
        assert_eq!(rec.channel_id, Field::Raw(Value::Null));
        assert!(rec.start_at().is_some());
    }

    #[tokio::test]
    async fn empty_file_is_no_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), b"\n").unwrap();
        assert!(store.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn non_object_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), b"[1,2,3]").unwrap();
        let err = store.read().await.unwrap_err();
        assert!(err.to_string().contains("not a JSON object"));
    }
}
