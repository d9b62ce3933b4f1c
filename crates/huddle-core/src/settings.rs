use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capabilities::Capability;
use crate::errors::HuddleError;
use crate::lock;
use huddle_media::{MediaConfig, Resolution};

/// Client tuning. Every field has a default, so partial JSON is accepted.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub privilege_request_timeout_ms: u64,
    pub reconnect_timeout_ms: u64,
    /// Speaking this long with a raised hand lowers it.
    pub hand_raise_auto_lower_ms: u64,
    pub chat_history_limit: usize,
    pub caption_history_limit: usize,
    /// Capabilities the server policy has not mentioned yet. Missing = enabled.
    pub default_capabilities: HashMap<Capability, bool>,
    pub media: MediaConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            privilege_request_timeout_ms: 30_000,
            reconnect_timeout_ms: 60_000,
            hand_raise_auto_lower_ms: 3_000,
            chat_history_limit: 500,
            caption_history_limit: 200,
            default_capabilities: HashMap::new(),
            media: MediaConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_json_str(json: &str) -> Result<Self, HuddleError> {
        serde_json::from_str(json).map_err(|e| HuddleError::Config(e.to_string()))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, HuddleError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| HuddleError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&contents)
    }

    pub fn privilege_request_timeout(&self) -> Duration {
        Duration::from_millis(self.privilege_request_timeout_ms)
    }

    pub fn reconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.reconnect_timeout_ms)
    }

    pub fn hand_raise_auto_lower(&self) -> Duration {
        Duration::from_millis(self.hand_raise_auto_lower_ms)
    }
}

/// Local preferences kept between sessions.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub display_name: Option<String>,
    /// Language the local user speaks, for live transcription.
    pub spoken_language: Option<String>,
    /// Caption translation target. `None` shows captions untranslated.
    pub caption_language: Option<String>,
    pub audio_on_join: bool,
    pub video_on_join: bool,
    /// Resolution requested for remote video by default.
    pub preferred_resolution: Resolution,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            display_name: None,
            spoken_language: None,
            caption_language: None,
            audio_on_join: true,
            video_on_join: false,
            preferred_resolution: Resolution::default(),
        }
    }
}

/// Settings persisted as JSON under a data directory.
pub struct SettingsStore {
    settings: Mutex<Settings>,
    file_path: PathBuf,
}

impl SettingsStore {
    const FILE_NAME: &'static str = "settings.json";

    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let file_path = data_dir.as_ref().join(Self::FILE_NAME);
        let settings = Self::load(&file_path);
        Self {
            settings: Mutex::new(settings),
            file_path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    pub fn get(&self) -> Settings {
        lock(&self.settings).clone()
    }

    /// Apply `change` and write the result. A failed write is logged and the
    /// in-memory value is kept.
    pub fn update(&self, change: impl FnOnce(&mut Settings)) -> Settings {
        let updated = {
            let mut settings = lock(&self.settings);
            change(&mut settings);
            if let Some(name) = &settings.display_name {
                if name.trim().is_empty() {
                    settings.display_name = None;
                }
            }
            settings.clone()
        };
        if let Err(e) = self.write(&updated) {
            tracing::warn!(path = %self.file_path.display(), "settings not saved: {e}");
        }
        updated
    }

    // Written to a sibling file first so a crash never leaves half a file.
    fn write(&self, settings: &Settings) -> std::io::Result<()> {
        if let Some(parent) = self.file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(settings)?;
        let staging = self.file_path.with_extension("json.tmp");
        std::fs::write(&staging, json)?;
        std::fs::rename(&staging, &self.file_path)
    }

    fn load(path: &Path) -> Settings {
        let contents = match std::fs::read(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Settings::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), "cannot read settings: {e}");
                return Settings::default();
            }
        };
        serde_json::from_slice(&contents).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), "corrupt settings, using defaults: {e}");
            Settings::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = temp_dir();
        let store = SettingsStore::new(dir.path());
        let s = store.get();
        assert_eq!(s, Settings::default());
        assert!(s.audio_on_join);
        assert!(!s.video_on_join);
        assert_eq!(s.preferred_resolution, Resolution::P360);
        assert!(!store.path().exists());
    }

    #[test]
    fn update_persists_across_stores() {
        let dir = temp_dir();
        let nested = dir.path().join("huddle");
        {
            let store = SettingsStore::new(&nested);
            let s = store.update(|s| {
                s.display_name = Some("Ada".into());
                s.caption_language = Some("fr".into());
                s.preferred_resolution = Resolution::P720;
                s.video_on_join = true;
            });
            assert_eq!(s.display_name.as_deref(), Some("Ada"));
        }
        let s = SettingsStore::new(&nested).get();
        assert_eq!(s.display_name.as_deref(), Some("Ada"));
        assert_eq!(s.caption_language.as_deref(), Some("fr"));
        assert_eq!(s.preferred_resolution, Resolution::P720);
        assert!(s.video_on_join);
        assert!(!nested.join("settings.json.tmp").exists());
    }

    #[test]
    fn blank_display_name_is_cleared() {
        let dir = temp_dir();
        let store = SettingsStore::new(dir.path());
        let s = store.update(|s| s.display_name = Some("   ".into()));
        assert_eq!(s.display_name, None);
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = temp_dir();
        fs::write(dir.path().join("settings.json"), "not json!!!").unwrap();
        assert_eq!(SettingsStore::new(dir.path()).get(), Settings::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = temp_dir();
        fs::write(
            dir.path().join("settings.json"),
            r#"{"display_name":"Eve","audio_on_join":false}"#,
        )
        .unwrap();
        let s = SettingsStore::new(dir.path()).get();
        assert_eq!(s.display_name.as_deref(), Some("Eve"));
        assert!(!s.audio_on_join);
        assert_eq!(s.preferred_resolution, Resolution::P360);
    }

    #[test]
    fn config_defaults() {
        let c = ClientConfig::default();
        assert_eq!(c.privilege_request_timeout(), Duration::from_secs(30));
        assert_eq!(c.reconnect_timeout(), Duration::from_secs(60));
        assert_eq!(c.hand_raise_auto_lower(), Duration::from_secs(3));
        assert_eq!(c.chat_history_limit, 500);
    }

    #[test]
    fn config_partial_json() {
        let c = ClientConfig::from_json_str(
            r#"{"reconnect_timeout_ms": 5000,
                "default_capabilities": {"QAndA": false},
                "media": {"max_subscriptions": 2}}"#,
        )
        .unwrap();
        assert_eq!(c.reconnect_timeout_ms, 5000);
        assert_eq!(c.default_capabilities.get(&Capability::QAndA), Some(&false));
        assert_eq!(c.media.max_subscriptions, 2);
        assert_eq!(c.media.video_queue_depth, 4);
        assert_eq!(c.chat_history_limit, 500);
    }

    #[test]
    fn config_errors_map_to_config_variant() {
        assert!(matches!(
            ClientConfig::from_json_str("{"),
            Err(HuddleError::Config(_))
        ));
        let dir = temp_dir();
        assert!(matches!(
            ClientConfig::from_json_file(dir.path().join("missing.json")),
            Err(HuddleError::Config(_))
        ));
        let path = dir.path().join("huddle.json");
        fs::write(&path, r#"{"chat_history_limit": 10}"#).unwrap();
        assert_eq!(ClientConfig::from_json_file(&path).unwrap().chat_history_limit, 10);
    }
}
