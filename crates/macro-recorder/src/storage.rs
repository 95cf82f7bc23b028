//! Macro storage - one pretty-printed JSON file per macro

use crate::codec;
use crate::events::EventSequence;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// A named, stored macro
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Macro {
    pub name: String,
    /// Trigger identifier, e.g. `f9`
    #[serde(default, alias = "hotkey", skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    #[serde(default = "default_speed")]
    pub speed: f64,
    #[serde(default = "Utc::now")]
    pub recorded_at: DateTime<Utc>,
    pub events: EventSequence,
}

fn default_speed() -> f64 {
    1.0
}

impl Macro {
    pub fn new(name: impl Into<String>, events: EventSequence) -> Self {
        Self {
            name: name.into(),
            trigger: None,
            speed: 1.0,
            recorded_at: Utc::now(),
            events,
        }
    }

    pub fn with_trigger(mut self, trigger: impl Into<String>) -> Self {
        self.trigger = Some(trigger.into());
        self
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }
}

pub struct MacroStorage {
    dir: PathBuf,
}

impl MacroStorage {
    /// Storage under `$HOME/.macro-recorder`
    pub fn new() -> Result<Self> {
        let home = std::env::var("HOME").context("HOME not set")?;
        Self::with_dir(PathBuf::from(home).join(".macro-recorder"))
    }

    pub fn with_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating storage dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn save(&self, m: &Macro) -> Result<PathBuf> {
        if m.name.trim().is_empty() {
            bail!("macro name is empty");
        }
        let path = self.path_for(&m.name);
        let json = serde_json::to_string_pretty(m)?;
        fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }

    pub fn load(&self, name: &str) -> Result<Macro> {
        let path = self.path_for(name);
        let text = fs::read_to_string(&path)
            .with_context(|| format!("macro {:?} not found at {}", name, path.display()))?;
        let m = serde_json::from_str(&text)
            .with_context(|| format!("reading {}", path.display()))?;
        Ok(m)
    }

    /// Names of all stored macros, sorted
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                match self.read_name(&path) {
                    Ok(name) => names.push(name),
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable macro"),
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Every stored macro that loads cleanly
    pub fn load_all(&self) -> Result<Vec<Macro>> {
        Ok(self
            .list()?
            .iter()
            .filter_map(|name| self.load(name).ok())
            .collect())
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        let path = self.path_for(name);
        fs::remove_file(&path).with_context(|| format!("deleting {}", path.display()))?;
        Ok(())
    }

    /// Read a bare event array, as written by [`MacroStorage::export_events`]
    pub fn import_events(path: impl AsRef<Path>) -> Result<EventSequence> {
        let path = path.as_ref();
        let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let events = codec::decode_slice(&bytes)
            .with_context(|| format!("decoding {}", path.display()))?;
        Ok(events)
    }

    pub fn export_events(m: &Macro, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, codec::encode_pretty(&m.events))
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize(name)))
    }

    fn read_name(&self, path: &Path) -> Result<String> {
        #[derive(Deserialize)]
        struct Header {
            name: String,
        }
        let header: Header = serde_json::from_str(&fs::read_to_string(path)?)?;
        Ok(header.name)
    }
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Event, EventKind, Key};

    fn sample() -> EventSequence {
        EventSequence::new(vec![
            Event::new(0.0, EventKind::KeyDown { key: Key::Char('x') }),
            Event::new(0.25, EventKind::KeyUp { key: Key::Char('x') }),
        ])
    }

    #[test]
    fn save_load_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = MacroStorage::with_dir(dir.path()).unwrap();
        let m = Macro::new("open editor", sample())
            .with_trigger("f9")
            .with_speed(2.0);
        let path = storage.save(&m).unwrap();
        assert!(path.ends_with("open_editor.json"));

        assert_eq!(storage.load("open editor").unwrap(), m);
        assert_eq!(storage.list().unwrap(), vec!["open editor".to_string()]);

        storage.delete("open editor").unwrap();
        assert!(storage.list().unwrap().is_empty());
        assert!(storage.load("open editor").is_err());
    }

    #[test]
    fn accepts_legacy_fields() {
        let dir = tempfile::tempdir().unwrap();
        let storage = MacroStorage::with_dir(dir.path()).unwrap();
        fs::write(
            dir.path().join("old.json"),
            r#"{"name": "old", "hotkey": "f2",
                "events": [{"timestamp": 0, "type": "key_press", "data": {"key": "a"}}]}"#,
        )
        .unwrap();
        let m = storage.load("old").unwrap();
        assert_eq!(m.trigger.as_deref(), Some("f2"));
        assert_eq!(m.speed, 1.0);
        assert_eq!(m.events.len(), 1);
    }

    #[test]
    fn malformed_events_fail_load() {
        let dir = tempfile::tempdir().unwrap();
        let storage = MacroStorage::with_dir(dir.path()).unwrap();
        fs::write(
            dir.path().join("bad.json"),
            r#"{"name": "bad", "events": [{"type": "key_press", "data": {"key": "a"}}]}"#,
        )
        .unwrap();
        let err = storage.load("bad").unwrap_err();
        assert!(format!("{:#}", err).contains("timestamp"), "{:#}", err);
    }

    #[test]
    fn import_export() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("export.json");
        let m = Macro::new("m", sample());
        MacroStorage::export_events(&m, &file).unwrap();
        assert_eq!(MacroStorage::import_events(&file).unwrap(), sample());
    }
}
