//! Binding store: per (car, track) profile persistence

use incar_telemetry::{CatalogSnapshot, SessionIdentity};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{ProfileStoreError, ProfileStoreResult};
use crate::model::{Profile, ProfileKey};
use crate::storage::FileStorage;
use crate::validation::{ValidationReport, validate_profile};

/// Current record format
pub const SCHEMA_VERSION: u32 = 1;

/// Binding store configuration
#[derive(Debug, Clone)]
pub struct ProfileRepositoryConfig {
    /// Base directory for profile storage
    pub profiles_dir: PathBuf,
}

impl ProfileRepositoryConfig {
    /// Create a new configuration with the specified profiles directory
    pub fn new(profiles_dir: impl Into<PathBuf>) -> Self {
        Self {
            profiles_dir: profiles_dir.into(),
        }
    }
}

/// On-disk envelope around a profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileRecord {
    /// Format version
    pub schema_version: u32,
    /// Car the record is stored under
    pub car_name: String,
    /// Track the record is stored under
    pub track_name: String,
    /// RFC 3339 save time
    pub saved_at: String,
    /// Profile body
    pub profile: Profile,
}

/// Header fields read when listing, without decoding the body
#[derive(Debug, Deserialize)]
struct RecordHeader {
    car_name: String,
    track_name: String,
    #[serde(default)]
    saved_at: String,
}

/// A listed profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredProfile {
    /// Key the record is stored under
    pub key: ProfileKey,
    /// Record file
    pub path: PathBuf,
    /// RFC 3339 save time
    pub saved_at: String,
}

/// Result of a successful save
#[derive(Debug, Clone)]
pub struct SaveOutcome {
    /// Key the profile was saved under
    pub key: ProfileKey,
    /// Record file
    pub path: PathBuf,
    /// Non-fatal validation findings
    pub report: ValidationReport,
}

/// File-backed binding store.
///
/// Saves and loads of the same key are mutually exclusive; different keys
/// proceed concurrently. Loaded profiles are cached.
#[derive(Debug)]
pub struct BindingStore {
    storage: FileStorage,
    key_locks: Mutex<HashMap<ProfileKey, Arc<RwLock<()>>>>,
    cache: RwLock<HashMap<ProfileKey, Profile>>,
}

impl BindingStore {
    /// Create a binding store, creating the profiles directory if needed
    pub async fn new(config: ProfileRepositoryConfig) -> ProfileStoreResult<Self> {
        let storage = FileStorage::new(&config.profiles_dir).await?;
        Ok(Self {
            storage,
            key_locks: Mutex::new(HashMap::new()),
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Directory records are stored in
    pub fn profiles_dir(&self) -> &Path {
        self.storage.base_dir()
    }

    /// File path for a key
    pub fn path_for(&self, key: &ProfileKey) -> PathBuf {
        self.storage
            .base_dir()
            .join(format!("{}.json", key.file_stem()))
    }

    fn key_lock(&self, key: &ProfileKey) -> Arc<RwLock<()>> {
        let mut locks = self.key_locks.lock();
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    /// Find the profile saved under exactly this session's (car, track).
    ///
    /// Returns `Ok(None)` when no profile exists.
    ///
    /// # Errors
    ///
    /// `ProfileCorrupt` when the record cannot be decoded; the caller falls
    /// back to defaults. The unreadable file is copied aside first.
    pub async fn match_session(&self, session: &SessionIdentity) -> ProfileStoreResult<Option<Profile>> {
        self.load(&ProfileKey::from(session)).await
    }

    /// Load a profile by key
    pub async fn load(&self, key: &ProfileKey) -> ProfileStoreResult<Option<Profile>> {
        let lock = self.key_lock(key);
        let _guard = lock.read().await;

        if let Some(profile) = self.cache.read().await.get(key) {
            debug!(profile = %key, "Profile found in cache");
            return Ok(Some(profile.clone()));
        }

        let path = self.path_for(key);
        let Some(json) = self.storage.read_optional(&path).await? else {
            debug!(profile = %key, "No profile stored");
            return Ok(None);
        };

        let profile = match decode_record(&json, key) {
            Ok(profile) => profile,
            Err(reason) => {
                warn!(profile = %key, path = ?path, %reason, "Profile record is corrupt");
                if let Err(e) = self.storage.preserve_corrupt(&path).await {
                    warn!(error = %e, "Could not preserve corrupt record");
                }
                return Err(ProfileStoreError::corrupt(path, reason));
            }
        };

        self.cache.write().await.insert(key.clone(), profile.clone());
        info!(profile = %key, bindings = profile.bindings.len(), combos = profile.combos.len(), "Profile loaded");
        Ok(Some(profile))
    }

    /// Persist `profile` under the current session's (car, track),
    /// overwriting any earlier record for that key.
    ///
    /// # Error Recovery
    ///
    /// - Validation runs first; nothing is written for a rejected profile
    /// - Uses atomic write operations (write to temp, then rename)
    /// - Cache is only updated after a successful disk write
    pub async fn save(
        &self,
        profile: &Profile,
        session: &SessionIdentity,
        catalog: &CatalogSnapshot,
    ) -> ProfileStoreResult<SaveOutcome> {
        let key = ProfileKey::from(session);
        let mut profile = profile.clone();
        profile.rekey(&key);

        let report = validate_profile(&profile, catalog)?;

        let record = ProfileRecord {
            schema_version: SCHEMA_VERSION,
            car_name: key.car_name.clone(),
            track_name: key.track_name.clone(),
            saved_at: chrono::Utc::now().to_rfc3339(),
            profile,
        };
        let json = serde_json::to_string_pretty(&record)?;

        let lock = self.key_lock(&key);
        let _guard = lock.write().await;

        let path = self.path_for(&key);
        self.storage.write_atomic(&path, &json).await?;
        self.cache
            .write()
            .await
            .insert(key.clone(), record.profile);

        info!(profile = %key, path = ?path, "Profile saved");
        Ok(SaveOutcome { key, path, report })
    }

    /// Remove a stored profile. Never called automatically.
    pub async fn delete(&self, key: &ProfileKey) -> ProfileStoreResult<bool> {
        let lock = self.key_lock(key);
        let _guard = lock.write().await;

        let existed = self.storage.delete(&self.path_for(key)).await?;
        self.cache.write().await.remove(key);
        if existed {
            info!(profile = %key, "Profile deleted");
        }
        Ok(existed)
    }

    /// Enumerate stored profiles; unreadable files are skipped with a warning
    pub async fn list(&self) -> ProfileStoreResult<Vec<StoredProfile>> {
        let mut out = Vec::new();
        for path in self.storage.list_profile_files().await? {
            let Some(json) = self.storage.read_optional(&path).await? else {
                continue;
            };
            match serde_json::from_str::<RecordHeader>(&json) {
                Ok(header) => out.push(StoredProfile {
                    key: ProfileKey::new(&header.car_name, &header.track_name),
                    path,
                    saved_at: header.saved_at,
                }),
                Err(e) => warn!(path = ?path, error = %e, "Skipping unreadable profile"),
            }
        }
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }

    /// Clear the in-memory cache
    pub async fn clear_cache(&self) {
        self.cache.write().await.clear();
    }
}

fn decode_record(json: &str, key: &ProfileKey) -> Result<Profile, String> {
    let record: ProfileRecord = serde_json::from_str(json).map_err(|e| e.to_string())?;
    if record.schema_version != SCHEMA_VERSION {
        return Err(format!(
            "unsupported schema version {}",
            record.schema_version
        ));
    }
    let stored = ProfileKey::new(&record.car_name, &record.track_name);
    if stored != *key || record.profile.key() != *key {
        return Err(format!("record identity {stored} does not match {key}"));
    }
    Ok(record.profile)
}
