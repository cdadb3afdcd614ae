//! Profile store: named watermark profiles and global settings persisted to one file

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, WatermarkError};

pub mod profiles;
pub use profiles::*;

/// Store file used when none is given
pub const DEFAULT_STORE_FILE: &str = "watermarker.toml";

/// Level used when the store does not say otherwise
pub const DEFAULT_LOG_LEVEL: &str = "warn";

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Global settings kept alongside the profiles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Profile used when a run does not name one
    pub default_profile: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_profile: DEFAULT_NAME.to_string(),
            log_level: default_log_level(),
        }
    }
}

/// On-disk layout of the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreData {
    pub settings: Settings,

    #[serde(default)]
    pub profiles: Vec<Profile>,
}

impl Default for StoreData {
    fn default() -> Self {
        Self {
            settings: Settings::default(),
            profiles: vec![Profile::default()],
        }
    }
}

/// Serialization format, chosen from the store file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFormat {
    Toml,
    Yaml,
    Json,
}

impl StoreFormat {
    /// Pick the format from a path's extension
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let extension = path
            .as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("");

        match extension.to_lowercase().as_str() {
            "toml" => Ok(Self::Toml),
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            _ => Err(WatermarkError::config(
                "Unsupported store file format. Use .toml, .yaml or .json",
            )),
        }
    }

    fn parse(self, content: &str) -> Result<StoreData> {
        match self {
            Self::Toml => toml::from_str(content).map_err(Into::into),
            Self::Yaml => serde_yaml::from_str(content).map_err(Into::into),
            Self::Json => serde_json::from_str(content).map_err(Into::into),
        }
    }

    fn render(self, data: &StoreData) -> Result<String> {
        match self {
            Self::Toml => toml::to_string_pretty(data).map_err(Into::into),
            Self::Yaml => serde_yaml::to_string(data).map_err(Into::into),
            Self::Json => serde_json::to_string_pretty(data).map_err(Into::into),
        }
    }
}

/// The default profile together with whether it had to be synthesised
#[derive(Debug, Clone)]
pub struct DefaultProfile {
    pub profile: Profile,
    /// The store named a default that it does not contain
    pub load_failed: bool,
}

/// File-backed store of watermark profiles
#[derive(Debug, Clone)]
pub struct ProfileStore {
    path: PathBuf,
    format: StoreFormat,
    data: StoreData,
    /// The file did not exist and has not been written yet
    is_new: bool,
}

impl ProfileStore {
    /// Open the store at `path`, creating it with a default profile when absent
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut store = Self::load(path)?;
        store.initialise()?;
        Ok(store)
    }

    /// Read the store without writing or logging anything.
    ///
    /// A missing file yields an unsaved store holding the default profile;
    /// [`initialise`](Self::initialise) writes it. Lets the caller read the
    /// log level before logging is set up.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let format = StoreFormat::from_path(&path)?;

        if !path.exists() {
            return Ok(Self {
                path,
                format,
                data: StoreData::default(),
                is_new: true,
            });
        }

        let content = std::fs::read_to_string(&path).map_err(|e| {
            WatermarkError::config(format!("Failed to read store file {:?}: {}", path, e))
        })?;
        let data = format.parse(&content)?;

        let store = Self {
            path,
            format,
            data,
            is_new: false,
        };
        store.validate()?;
        Ok(store)
    }

    /// Write a new store to disk and warn about profiles that can't be used
    pub fn initialise(&mut self) -> Result<()> {
        if self.is_new {
            warn!("Initialising profile store at {:?}", self.path);
            self.save()?;
            self.is_new = false;
        } else {
            debug!(
                "Loaded {} profiles from {:?}",
                self.data.profiles.len(),
                self.path
            );
        }

        for profile in &self.data.profiles {
            if let Err(e) = profile.validate() {
                warn!("{}", e);
            }
        }
        Ok(())
    }

    /// Whether the store file has yet to be created
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Build an in-memory store that will be written to `path` on save
    pub fn with_data<P: AsRef<Path>>(path: P, data: StoreData) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let format = StoreFormat::from_path(&path)?;
        let is_new = !path.exists();
        let store = Self {
            path,
            format,
            data,
            is_new,
        };
        store.validate()?;
        Ok(store)
    }

    /// Write the store, replacing the file atomically
    pub fn save(&self) -> Result<()> {
        let content = self.format.render(&self.data)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, content).map_err(|e| {
            WatermarkError::config(format!("Failed to write store file {:?}: {}", tmp, e))
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            WatermarkError::config(format!("Failed to replace store file {:?}: {}", self.path, e))
        })?;

        debug!("Saved profile store to {:?}", self.path);
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &Settings {
        &self.data.settings
    }

    /// All profiles, in insertion order
    pub fn profiles(&self) -> &[Profile] {
        &self.data.profiles
    }

    /// Names of all profiles, in insertion order
    pub fn profile_names(&self) -> Vec<&str> {
        self.data.profiles.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn profile(&self, name: &str) -> Option<&Profile> {
        self.data.profiles.iter().find(|p| p.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.profile(name).is_some()
    }

    /// Get a copy of a profile by name
    pub fn load_profile(&self, name: &str) -> Result<Profile> {
        info!("Loading profile '{}'", name);
        self.profile(name).cloned().ok_or_else(|| {
            warn!("Couldn't find profile '{}' in the store", name);
            WatermarkError::profile_not_found(name)
        })
    }

    /// Add a new profile; the name must be free
    pub fn create(&mut self, profile: Profile) -> Result<()> {
        profile.validate()?;
        if self.contains(&profile.name) {
            return Err(WatermarkError::profile_exists(&profile.name));
        }
        info!("Creating profile '{}'", profile.name);
        self.data.profiles.push(profile);
        Ok(())
    }

    /// Replace an existing profile
    pub fn update(&mut self, profile: Profile) -> Result<()> {
        profile.validate()?;
        let slot = self
            .data
            .profiles
            .iter_mut()
            .find(|p| p.name == profile.name)
            .ok_or_else(|| WatermarkError::profile_not_found(&profile.name))?;
        info!("Updating profile '{}'", profile.name);
        *slot = profile;
        Ok(())
    }

    /// Insert or replace a profile
    pub fn upsert(&mut self, profile: Profile) -> Result<()> {
        if self.contains(&profile.name) {
            self.update(profile)
        } else {
            self.create(profile)
        }
    }

    /// Remove the named profiles, returning how many were deleted.
    ///
    /// The current default profile cannot be removed.
    pub fn remove<S: AsRef<str>>(&mut self, names: &[S]) -> Result<usize> {
        let default = self.data.settings.default_profile.clone();
        if names.iter().any(|n| n.as_ref() == default) {
            return Err(WatermarkError::config(format!(
                "Cannot delete '{}' while it is the default profile. Set another default first",
                default
            )));
        }

        for name in names {
            let name = name.as_ref();
            if !self.contains(name) {
                warn!("Profile '{}' does not exist, skipping", name);
            }
        }

        let before = self.data.profiles.len();
        self.data
            .profiles
            .retain(|p| !names.iter().any(|n| n.as_ref() == p.name));
        let removed = before - self.data.profiles.len();

        warn!("Deleted {} profile(s)", removed);
        Ok(removed)
    }

    pub fn default_profile_name(&self) -> &str {
        &self.data.settings.default_profile
    }

    /// Make an existing profile the default
    pub fn set_default_profile(&mut self, name: &str) -> Result<()> {
        if !self.contains(name) {
            return Err(WatermarkError::profile_not_found(name));
        }
        info!("Updating default profile to '{}'", name);
        self.data.settings.default_profile = name.to_string();
        Ok(())
    }

    /// The default profile, falling back to built-in values when it is missing
    pub fn load_default(&self) -> DefaultProfile {
        let name = self.default_profile_name();
        match self.profile(name) {
            Some(profile) => DefaultProfile {
                profile: profile.clone(),
                load_failed: false,
            },
            None => {
                warn!(
                    "Default profile '{}' is missing from the store, using built-in values",
                    name
                );
                DefaultProfile {
                    profile: Profile::named(name),
                    load_failed: true,
                }
            }
        }
    }

    pub fn log_level(&self) -> &str {
        &self.data.settings.log_level
    }

    pub fn set_log_level(&mut self, level: &str) -> Result<()> {
        let level = level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(WatermarkError::config(format!(
                "Unknown log level '{}'. Use one of: {}",
                level,
                LOG_LEVELS.join(", ")
            )));
        }
        info!("Updating log level to '{}'", level);
        self.data.settings.log_level = level;
        Ok(())
    }

    /// Check store consistency: unique profile names and a known log level.
    ///
    /// Profile values are checked by [`Profile::validate`] when a profile is
    /// created, updated or used.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for profile in &self.data.profiles {
            if !seen.insert(profile.name.as_str()) {
                return Err(WatermarkError::config(format!(
                    "Duplicate profile name '{}' in {:?}",
                    profile.name, self.path
                )));
            }
        }

        if !LOG_LEVELS.contains(&self.data.settings.log_level.to_lowercase().as_str()) {
            return Err(WatermarkError::config(format!(
                "Unknown log level '{}' in {:?}",
                self.data.settings.log_level, self.path
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_in(dir: &Path, file: &str) -> ProfileStore {
        ProfileStore::open(dir.join(file)).unwrap()
    }

    #[test]
    fn test_open_initialises_missing_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("watermarker.toml");
        let store = ProfileStore::open(&path).unwrap();

        assert!(path.exists());
        assert_eq!(store.profile_names(), vec![DEFAULT_NAME]);
        assert_eq!(store.default_profile_name(), DEFAULT_NAME);
        assert_eq!(store.log_level(), DEFAULT_LOG_LEVEL);
    }

    #[test]
    fn test_load_defers_creating_the_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.yaml");

        let mut store = ProfileStore::load(&path).unwrap();
        assert!(store.is_new());
        assert!(!path.exists());
        assert_eq!(store.log_level(), DEFAULT_LOG_LEVEL);

        store.initialise().unwrap();
        assert!(!store.is_new());
        assert!(path.exists());
        assert!(!ProfileStore::load(&path).unwrap().is_new());
    }

    #[test]
    fn test_invalid_profile_does_not_block_the_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.toml");
        std::fs::write(
            &path,
            r#"
[settings]
default_profile = "Default"

[[profiles]]
name = "Default"

[[profiles]]
name = "broken"
margin = 0.9
"#,
        )
        .unwrap();

        // Still opens, so the entry can be fixed or deleted
        let mut store = ProfileStore::open(&path).unwrap();
        assert!(store.validate().is_ok());
        let broken = store.load_profile("broken").unwrap();
        assert!(matches!(
            broken.validate().unwrap_err(),
            WatermarkError::InvalidProfile { .. }
        ));

        assert_eq!(store.remove(&["broken"]).unwrap(), 1);
    }

    #[test]
    fn test_store_formats_round_trip() {
        let dir = tempdir().unwrap();
        for file in ["store.toml", "store.yaml", "store.json"] {
            let mut store = store_in(dir.path(), file);
            store
                .create(Profile::named("web").text("(c) web").opacity(90))
                .unwrap();
            store.set_default_profile("web").unwrap();
            store.save().unwrap();

            let reopened = store_in(dir.path(), file);
            assert_eq!(reopened.profile_names(), vec![DEFAULT_NAME, "web"]);
            assert_eq!(reopened.default_profile_name(), "web");
            assert_eq!(reopened.load_profile("web").unwrap().opacity, 90);
        }
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempdir().unwrap();
        assert!(ProfileStore::open(dir.path().join("store.ini")).is_err());
    }

    #[test]
    fn test_create_rejects_duplicates_and_invalid() {
        let dir = tempdir().unwrap();
        let mut store = store_in(dir.path(), "s.toml");

        let err = store.create(Profile::default()).unwrap_err();
        assert!(matches!(err, WatermarkError::ProfileExists { .. }));

        let err = store.create(Profile::named("bad").margin(0.7)).unwrap_err();
        assert!(matches!(err, WatermarkError::InvalidProfile { .. }));
        assert!(!store.contains("bad"));
    }

    #[test]
    fn test_update_and_upsert() {
        let dir = tempdir().unwrap();
        let mut store = store_in(dir.path(), "s.toml");

        let err = store.update(Profile::named("ghost")).unwrap_err();
        assert!(matches!(err, WatermarkError::ProfileNotFound { .. }));

        store.update(Profile::default().text("changed")).unwrap();
        assert_eq!(store.load_profile(DEFAULT_NAME).unwrap().text, "changed");

        store.upsert(Profile::named("new")).unwrap();
        store.upsert(Profile::named("new").opacity(10)).unwrap();
        assert_eq!(store.profiles().len(), 2);
        assert_eq!(store.load_profile("new").unwrap().opacity, 10);
    }

    #[test]
    fn test_remove_profiles() {
        let dir = tempdir().unwrap();
        let mut store = store_in(dir.path(), "s.toml");
        store.create(Profile::named("a")).unwrap();
        store.create(Profile::named("b")).unwrap();

        let removed = store.remove(&["a", "missing"]).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.profile_names(), vec![DEFAULT_NAME, "b"]);

        // Default profile is protected
        assert!(store.remove(&[DEFAULT_NAME]).is_err());
        assert!(store.contains(DEFAULT_NAME));

        store.set_default_profile("b").unwrap();
        assert_eq!(store.remove(&[DEFAULT_NAME]).unwrap(), 1);
    }

    #[test]
    fn test_set_default_requires_existing_profile() {
        let dir = tempdir().unwrap();
        let mut store = store_in(dir.path(), "s.toml");
        assert!(store.set_default_profile("nope").is_err());
        assert_eq!(store.default_profile_name(), DEFAULT_NAME);
    }

    #[test]
    fn test_load_default_falls_back() {
        let dir = tempdir().unwrap();
        let data = StoreData {
            settings: Settings {
                default_profile: "gone".to_string(),
                log_level: "info".to_string(),
            },
            profiles: vec![],
        };
        let store = ProfileStore::with_data(dir.path().join("s.json"), data).unwrap();

        let default = store.load_default();
        assert!(default.load_failed);
        assert_eq!(default.profile.name, "gone");
        assert_eq!(default.profile.text, DEFAULT_TEXT);
    }

    #[test]
    fn test_log_level() {
        let dir = tempdir().unwrap();
        let mut store = store_in(dir.path(), "s.toml");
        store.set_log_level("DEBUG").unwrap();
        assert_eq!(store.log_level(), "debug");
        assert!(store.set_log_level("loud").is_err());
    }

    #[test]
    fn test_duplicate_names_rejected_on_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dup.toml");
        std::fs::write(
            &path,
            r#"
[settings]
default_profile = "Default"

[[profiles]]
name = "Default"

[[profiles]]
name = "Default"
"#,
        )
        .unwrap();

        let err = ProfileStore::open(&path).unwrap_err();
        assert!(err.to_string().contains("Duplicate profile name"));
    }

    #[test]
    fn test_save_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path(), "s.toml");
        store.save().unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries.len(), 1);
    }
}
