//! Client-side persistence of the onboarding session.
//!
//! Three keys survive a reload: the per-sub-step form payloads, the
//! completed step keys and the owner/plan record. They are written and
//! cleared together.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use onboard_core::error::CoreError;
use onboard_core::plan::{PlanType, StepPosition};
use onboard_core::session::{OnboardingSession, OwnerIdentity, PendingSync};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

pub const FORM_DATA_KEY: &str = "onboardingFormData";
pub const COMPLETED_STEPS_KEY: &str = "completedOnboardingSteps";
pub const USER_DATA_KEY: &str = "onboardingUserData";

const ALL_KEYS: [&str; 3] = [FORM_DATA_KEY, COMPLETED_STEPS_KEY, USER_DATA_KEY];

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed stored value under '{key}': {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid storage key '{0}'")]
    InvalidKey(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

// ---------------------------------------------------------------------------
// Key-value backends
// ---------------------------------------------------------------------------

/// String key-value storage surviving process restarts.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: String) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// In-memory store, for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// One JSON file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        // Write-then-rename so a crash never leaves a truncated file.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Session store
// ---------------------------------------------------------------------------

/// Record stored under [`USER_DATA_KEY`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedUserData {
    pub session_id: Uuid,
    pub plan_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<OwnerIdentity>,
    pub started_at: DateTime<Utc>,
    /// Sections and completions the backend has not confirmed yet.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unsynced: Vec<String>,
}

/// Persists an [`OnboardingSession`] under the three storage keys.
#[derive(Clone)]
pub struct SessionStore {
    kv: Arc<dyn KeyValueStore>,
}

impl SessionStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub async fn save(&self, session: &OnboardingSession) -> Result<(), StoreError> {
        let user = PersistedUserData {
            session_id: session.id,
            plan_type: session.plan_type.as_str().to_string(),
            owner: session.owner.clone(),
            started_at: session.started_at,
            unsynced: session.unsynced().iter().map(ToString::to_string).collect(),
        };
        let completed: Vec<String> = session.completed().iter().map(|p| p.key()).collect();

        self.put(FORM_DATA_KEY, session.form_data()).await?;
        self.put(COMPLETED_STEPS_KEY, &completed).await?;
        self.put(USER_DATA_KEY, &user).await?;
        tracing::debug!(
            session_id = %session.id,
            completed = completed.len(),
            unsynced = user.unsynced.len(),
            "Session persisted",
        );
        Ok(())
    }

    /// Rebuild the stored session, or `None` when nothing is stored.
    ///
    /// The session resumes at its first incomplete sub-step. An unknown
    /// stored plan type is an error rather than a silent default.
    pub async fn load(&self) -> Result<Option<OnboardingSession>, StoreError> {
        let Some(user) = self.fetch::<PersistedUserData>(USER_DATA_KEY).await? else {
            return Ok(None);
        };
        let plan: PlanType = user.plan_type.parse()?;

        let form_data: BTreeMap<String, Value> =
            self.fetch(FORM_DATA_KEY).await?.unwrap_or_default();
        let keys: Vec<String> = self.fetch(COMPLETED_STEPS_KEY).await?.unwrap_or_default();

        let completed: BTreeSet<StepPosition> = keys
            .iter()
            .filter_map(|key| match key.parse::<StepPosition>() {
                Ok(position) => Some(position),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Ignoring malformed stored step key");
                    None
                }
            })
            .collect();

        let unsynced: Vec<PendingSync> = user
            .unsynced
            .iter()
            .filter_map(|key| match key.parse::<PendingSync>() {
                Ok(item) => Some(item),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Ignoring malformed unsynced entry");
                    None
                }
            })
            .collect();

        let session = OnboardingSession::restore(
            user.session_id,
            plan,
            user.owner,
            completed,
            form_data,
            user.started_at,
        )
        .with_unsynced(unsynced);
        tracing::info!(
            session_id = %session.id,
            plan = %plan,
            step_key = %session.step_key(),
            "Session restored",
        );
        Ok(Some(session))
    }

    /// Remove all three keys.
    pub async fn clear(&self) -> Result<(), StoreError> {
        for key in ALL_KEYS {
            self.kv.remove(key).await?;
        }
        tracing::debug!("Session storage cleared");
        Ok(())
    }

    async fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(value).map_err(|source| StoreError::Malformed {
            key: key.to_string(),
            source,
        })?;
        self.kv.set(key, encoded).await
    }

    async fn fetch<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let Some(raw) = self.kv.get(key).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StoreError::Malformed {
                key: key.to_string(),
                source,
            })
    }
}
