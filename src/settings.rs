//! Machine-specific settings: where things live on disk and which toolkit
//! revisions to use.
//!
//! ```json
//! {
//!   "work_dir": "/work/tts",
//!   "trainer_exe": { "path": "/u/me/bin/launcher.sh", "hash_overwrite": "LAUNCHER" },
//!   "repositories": {
//!     "trainer": { "url": "https://github.com/example/trainer", "revision": "240f119b" },
//!     "network_lib": {
//!       "url": "https://github.com/example/network_lib",
//!       "revision": "79876b18",
//!       "checkout_folder_name": "network_lib"
//!     }
//!   },
//!   "corpora": {
//!     "train-clean-100": {
//!       "corpus_file": "/corpora/train-clean-100.xml.gz",
//!       "audio": { "ogg": "/corpora/train-clean-100/ogg" }
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::blueprint::Blueprint;
use crate::dataset::{CorpusEntry, CorpusRegistry};
use crate::error::{KumitateError, SettingsError};
use crate::pin::{RepositoryPin, Toolchain, executable};
use crate::plan::DirectoryEngine;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutableSettings {
    pub path: Utf8PathBuf,
    #[serde(default)]
    pub hash_overwrite: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositorySettings {
    pub url: String,
    pub revision: String,
    #[serde(default)]
    pub checkout_folder_name: Option<String>,
    #[serde(default)]
    pub hash_overwrite: Option<String>,
}

impl RepositorySettings {
    fn pin(&self) -> Result<RepositoryPin, KumitateError> {
        let mut pin = RepositoryPin::new(self.url.as_str(), &self.revision)?;
        if let Some(folder) = &self.checkout_folder_name {
            pin = pin.checkout_folder(folder.as_str());
        }
        if let Some(key) = &self.hash_overwrite {
            pin = pin.hash_overwrite(key.as_str());
        }
        Ok(pin)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Repositories {
    pub trainer: RepositorySettings,
    pub network_lib: RepositorySettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Base directory handed to the execution engine.
    pub work_dir: Utf8PathBuf,
    pub trainer_exe: ExecutableSettings,
    pub repositories: Repositories,
    #[serde(default)]
    pub corpora: BTreeMap<String, CorpusEntry>,
}

impl Settings {
    pub fn from_file(path: impl AsRef<Utf8Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let settings = Self::from_json(&text)?;
        tracing::debug!("Loaded settings from {path}");
        Ok(settings)
    }

    pub fn from_json(text: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Pin the configured toolkits into `blueprint`.
    pub fn toolchain(&self, blueprint: &mut Blueprint) -> Result<Toolchain, KumitateError> {
        let mut trainer_exe = executable(self.trainer_exe.path.as_str())?;
        if let Some(key) = &self.trainer_exe.hash_overwrite {
            trainer_exe = trainer_exe.with_hash_overwrite(key.as_str());
        }

        let trainer = blueprint.clone_repository(&self.repositories.trainer.pin()?)?;
        let network_lib = blueprint.clone_repository(&self.repositories.network_lib.pin()?)?;

        Ok(Toolchain {
            trainer_exe,
            trainer_root: trainer.repository(),
            network_lib_root: network_lib.repository(),
        })
    }

    /// Engine writing plans below `work_dir`.
    pub fn engine(&self) -> DirectoryEngine {
        DirectoryEngine::new(self.work_dir.clone())
    }

    pub fn corpus_registry(&self) -> CorpusRegistry {
        CorpusRegistry::new(self.corpora.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{AudioFormat, CorpusLibrary};
    use crate::plan::Engine;

    const SETTINGS: &str = r#"{
        "work_dir": "/work/tts",
        "trainer_exe": { "path": "/u/me/bin/launcher.sh", "hash_overwrite": "LAUNCHER" },
        "repositories": {
            "trainer": { "url": "https://github.com/example/trainer", "revision": "240f119b" },
            "network_lib": {
                "url": "https://github.com/example/network_lib",
                "revision": "79876b18",
                "checkout_folder_name": "network_lib"
            }
        },
        "corpora": {
            "train-clean-100": {
                "corpus_file": "/corpora/train-clean-100.xml.gz",
                "audio": { "ogg": "/corpora/train-clean-100/ogg" }
            }
        }
    }"#;

    #[test]
    fn test_toolchain() {
        let settings = Settings::from_json(SETTINGS).unwrap();
        let mut blueprint = Blueprint::new();
        let toolchain = settings.toolchain(&mut blueprint).unwrap();

        assert_eq!(blueprint.len(), 2);
        assert_eq!(toolchain.trainer_exe.hash_overwrite(), Some("LAUNCHER"));
        assert!(!toolchain.trainer_root.is_external());

        let again = settings.toolchain(&mut blueprint).unwrap();
        assert_eq!(again, toolchain);
        assert_eq!(blueprint.len(), 2);
    }

    #[test]
    fn test_corpora() {
        let settings = Settings::from_json(SETTINGS).unwrap();
        let corpus = settings
            .corpus_registry()
            .corpus("train-clean-100", AudioFormat::Ogg)
            .unwrap();
        assert_eq!(corpus.audio_dir.name().as_str(), "/corpora/train-clean-100/ogg");
    }

    #[test]
    fn test_bad_revision() {
        let settings = Settings::from_json(&SETTINGS.replace("240f119b", "a..b")).unwrap();
        let mut blueprint = Blueprint::new();
        assert!(matches!(
            settings.toolchain(&mut blueprint),
            Err(KumitateError::Pin(_))
        ));
    }

    #[test]
    fn test_engine_writes_below_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        let work_dir = Utf8PathBuf::from_path_buf(dir.path().join("work")).unwrap();
        let text = SETTINGS.replace("/work/tts", work_dir.as_str());
        let settings = Settings::from_json(&text).unwrap();

        let mut blueprint = Blueprint::new();
        settings.toolchain(&mut blueprint).unwrap();
        let plan = blueprint.finish().unwrap();

        settings.engine().submit(&plan).unwrap();

        assert!(work_dir.join("outputs.json").is_file());
        for job in plan.jobs() {
            assert!(work_dir.join(job.directory()).join("config.json").is_file());
        }
    }

    #[test]
    fn test_unknown_field() {
        let text = SETTINGS.replace("\"work_dir\"", "\"workdir\"");
        assert!(matches!(Settings::from_json(&text), Err(SettingsError::Json(_))));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, SETTINGS).unwrap();

        let path = Utf8PathBuf::from_path_buf(path).unwrap();
        assert_eq!(
            Settings::from_file(&path).unwrap().work_dir,
            Utf8PathBuf::from("/work/tts")
        );
        assert!(matches!(
            Settings::from_file(dir.path().join("missing.json").to_str().unwrap()),
            Err(SettingsError::Io(_))
        ));
    }
}
