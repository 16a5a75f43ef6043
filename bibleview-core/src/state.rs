//! Persisted page state.
//!
//! Payloads are decoded field by field: a malformed field is dropped and the
//! rest of the payload is still used. Only input that is not a JSON object at
//! all is rejected.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::{serde_as, DefaultOnError};
use tracing::warn;

use crate::{BookCategory, StateError};

/// Payloads written before versioning carry no `version` field and decode as 0.
pub const STATE_VERSION: u32 = 1;

#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageStatePayload {
    #[serde(default)]
    #[serde_as(deserialize_as = "DefaultOnError")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde_as(deserialize_as = "DefaultOnError")]
    pub document: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde_as(deserialize_as = "DefaultOnError")]
    pub key: Option<String>,
}

impl PageStatePayload {
    pub fn new(document: Option<String>, key: Option<String>) -> Self {
        Self {
            version: STATE_VERSION,
            document,
            key,
        }
    }

    pub fn empty() -> Self {
        Self::new(None, None)
    }

    pub fn document(&self) -> Option<&str> {
        self.document.as_deref().filter(|document| !document.is_empty())
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref().filter(|key| !key.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.document().is_none()
    }

    pub fn decode(json: &str) -> Result<Self, StateError> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, StateError> {
        if !value.is_object() {
            return Err(StateError::NotAnObject);
        }
        let payload: Self = serde_json::from_value(value)?;
        if payload.version > STATE_VERSION {
            warn!(
                version = payload.version,
                supported = STATE_VERSION,
                "page state written by a newer version, decoding known fields only"
            );
        }
        Ok(payload)
    }

    pub fn encode(&self) -> Result<String, StateError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// State of every page slot plus which one is shown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionState {
    pub version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<BookCategory>,
    pub pages: BTreeMap<BookCategory, PageStatePayload>,
}

impl SessionState {
    pub fn new(active: Option<BookCategory>) -> Self {
        Self {
            version: STATE_VERSION,
            active,
            pages: BTreeMap::new(),
        }
    }

    pub fn decode(json: &str) -> Result<Self, StateError> {
        let value: Value = serde_json::from_str(json)?;
        let Value::Object(mut object) = value else {
            return Err(StateError::NotAnObject);
        };

        let version = object
            .get("version")
            .and_then(Value::as_u64)
            .and_then(|version| u32::try_from(version).ok())
            .unwrap_or(0);
        if version > STATE_VERSION {
            warn!(version, supported = STATE_VERSION, "session state written by a newer version");
        }

        let active = match object.remove("active") {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|err| warn!(%value, error = %err, "dropping unknown active page"))
                .ok(),
            None => None,
        };

        let mut pages = BTreeMap::new();
        match object.remove("pages") {
            Some(Value::Object(entries)) => {
                for (name, entry) in entries {
                    let category = match name.parse::<BookCategory>() {
                        Ok(category) => category,
                        Err(err) => {
                            warn!(error = %err, "dropping page state");
                            continue;
                        }
                    };
                    match PageStatePayload::from_value(entry) {
                        Ok(payload) => {
                            pages.insert(category, payload);
                        }
                        Err(err) => warn!(%category, error = %err, "dropping page state"),
                    }
                }
            }
            Some(other) => warn!(%other, "session pages are not an object"),
            None => {}
        }

        Ok(Self {
            version,
            active,
            pages,
        })
    }

    pub fn encode(&self) -> Result<String, StateError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub trait StateStore: Send + Sync {
    fn load(&self) -> Result<Option<SessionState>>;
    fn save(&self, state: &SessionState) -> Result<()>;
}

pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create state directory at {:?}", root))?;
        Ok(Self {
            path: root.join("session.json"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<Option<SessionState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let mut file = File::open(&self.path)
            .with_context(|| format!("failed to open state file {:?}", self.path))?;
        let mut buf = String::new();
        file.read_to_string(&mut buf)?;
        let state = SessionState::decode(&buf)
            .with_context(|| format!("failed to decode state file {:?}", self.path))?;
        Ok(Some(state))
    }

    fn save(&self, state: &SessionState) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        let payload = state.encode()?;
        let mut file = File::create(&tmp)
            .with_context(|| format!("failed to open temp state file {:?}", tmp))?;
        file.write_all(payload.as_bytes())?;
        file.flush()?;
        fs::rename(tmp, &self.path)?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStateStore {
    inner: Mutex<Option<SessionState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<Option<SessionState>> {
        Ok(self.inner.lock().clone())
    }

    fn save(&self, state: &SessionState) -> Result<()> {
        *self.inner.lock() = Some(state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn payload_reads_legacy_shape() {
        let payload = PageStatePayload::decode(r#"{"document":"KJV","key":"Gen.1"}"#).unwrap();
        assert_eq!(payload.version, 0);
        assert_eq!(payload.document(), Some("KJV"));
        assert_eq!(payload.key(), Some("Gen.1"));
    }

    #[test]
    fn malformed_fields_are_skipped_individually() {
        let payload =
            PageStatePayload::decode(r#"{"version":"two","document":"KJV","key":42}"#).unwrap();
        assert_eq!(payload.version, 0);
        assert_eq!(payload.document(), Some("KJV"));
        assert_eq!(payload.key(), None);

        let payload = PageStatePayload::decode(r#"{"document":["KJV"],"key":"Gen.1"}"#).unwrap();
        assert!(payload.is_empty());
        assert_eq!(payload.key(), Some("Gen.1"));
    }

    #[test]
    fn empty_strings_count_as_absent() {
        let payload = PageStatePayload::decode(r#"{"document":"","key":""}"#).unwrap();
        assert_eq!(payload.document(), None);
        assert_eq!(payload.key(), None);
    }

    #[test]
    fn non_objects_are_rejected() {
        assert!(matches!(
            PageStatePayload::decode("[1, 2]"),
            Err(StateError::NotAnObject)
        ));
        assert!(matches!(
            PageStatePayload::decode("{not json"),
            Err(StateError::Json(_))
        ));
    }

    #[test]
    fn encode_omits_missing_fields() {
        assert_eq!(PageStatePayload::empty().encode().unwrap(), r#"{"version":1}"#);
        let payload = PageStatePayload::new(Some("KJV".into()), Some("Gen.1".into()));
        assert_eq!(
            payload.encode().unwrap(),
            r#"{"version":1,"document":"KJV","key":"Gen.1"}"#
        );
    }

    #[test]
    fn session_decode_keeps_valid_pages() {
        let json = r#"{
            "version": 1,
            "active": "atlas",
            "pages": {
                "bible": {"document": "KJV", "key": "Gen.1"},
                "unknown": {"document": "X"},
                "dictionary": "garbage",
                "commentary": {"document": "MHC", "key": 7}
            }
        }"#;
        let state = SessionState::decode(json).unwrap();
        assert_eq!(state.active, None);
        assert_eq!(state.pages.len(), 2);
        assert_eq!(state.pages[&BookCategory::Bible].key(), Some("Gen.1"));
        assert_eq!(state.pages[&BookCategory::Commentary].document(), Some("MHC"));
        assert_eq!(state.pages[&BookCategory::Commentary].key(), None);
    }

    #[test]
    fn file_state_store_round_trips_session() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("state")).unwrap();
        assert!(store.load().unwrap().is_none());

        let mut state = SessionState::new(Some(BookCategory::GeneralBook));
        state.pages.insert(
            BookCategory::GeneralBook,
            PageStatePayload::new(Some("Pilgrim".into()), Some("Part1".into())),
        );
        store.save(&state).unwrap();

        let restored = store.load().unwrap().unwrap();
        assert_eq!(restored, state);
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn file_state_store_reports_corrupt_file() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path().to_path_buf()).unwrap();
        std::fs::write(store.path(), b"\"just a string\"").unwrap();
        assert!(store.load().is_err());
    }
}
