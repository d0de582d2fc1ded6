use std::{fs, io::ErrorKind, path::PathBuf};

use color_eyre::Result;
use eyre::{eyre, WrapErr};
use log::debug;
use serde::{de::DeserializeOwned, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageKey {
    Devices,
    Settings,
    DarkMode,
}

impl StorageKey {
    pub fn file_name(&self) -> &'static str {
        match self {
            StorageKey::Devices => "devices.json",
            StorageKey::Settings => "settings.json",
            StorageKey::DarkMode => "dark_mode.json",
        }
    }
}

/// Directory of JSON blobs, one file per key.
#[derive(Clone, Debug)]
pub struct Storage {
    dir: PathBuf,
}

impl Storage {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .wrap_err_with(|| format!("Could not create storage directory {}", dir.display()))?;

        Ok(Storage { dir })
    }

    fn path(&self, key: StorageKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// Reads the blob stored under `key`, `None` if nothing was stored yet.
    pub fn load<T: DeserializeOwned>(&self, key: StorageKey) -> Result<Option<T>> {
        let path = self.path(key);

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).wrap_err_with(|| format!("Could not read {}", path.display())),
        };

        let de = &mut serde_json::Deserializer::from_str(&content);
        let value = serde_path_to_error::deserialize(de)
            .map_err(|e| eyre!("Invalid {} at {}: {}", path.display(), e.path(), e.inner()))?;

        Ok(Some(value))
    }

    /// Writes the blob through a temporary file so a crash never leaves a
    /// half-written file behind.
    pub fn save<T: Serialize + ?Sized>(&self, key: StorageKey, value: &T) -> Result<()> {
        let path = self.path(key);
        let tmp = path.with_extension("json.tmp");

        let json = serde_json::to_string_pretty(value)?;
        fs::write(&tmp, json).wrap_err_with(|| format!("Could not write {}", tmp.display()))?;
        fs::rename(&tmp, &path).wrap_err_with(|| format!("Could not replace {}", path.display()))?;

        debug!("Saved {}", path.display());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();

        let value: Option<bool> = storage.load(StorageKey::DarkMode).unwrap();
        assert_eq!(value, None);
    }

    #[test]
    fn saved_values_load_back() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path().join("nested")).unwrap();

        storage.save(StorageKey::DarkMode, &true).unwrap();
        assert_eq!(storage.load::<bool>(StorageKey::DarkMode).unwrap(), Some(true));
        assert!(!dir.path().join("nested/dark_mode.json.tmp").exists());
    }

    #[test]
    fn parse_errors_name_the_json_path() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        fs::write(dir.path().join("settings.json"), r#"{"items":[1,"x"]}"#).unwrap();

        #[derive(serde::Deserialize, Debug)]
        #[allow(dead_code)]
        struct Items {
            items: Vec<u32>,
        }

        let err = storage.load::<Items>(StorageKey::Settings).unwrap_err();
        assert!(err.to_string().contains("items[1]"), "{}", err);
    }
}
