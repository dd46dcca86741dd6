//! Token storage and management
//!
//! Credentials live in one of two tiers: a durable tier that survives
//! restarts and an ephemeral tier scoped to the running process. Exactly one
//! tier holds each value at a time; readers check durable first and never
//! merge the two.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};

use super::UserRecord;

const ACCESS_TOKEN_KEY: &str = "access_token";
const REFRESH_TOKEN_KEY: &str = "refresh_token";
const USER_KEY: &str = "user";
const SESSION_KEYS: [&str; 3] = [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY];

/// Which tier a session is persisted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    Durable,
    Ephemeral,
}

impl Persistence {
    pub fn from_durable(persist_durable: bool) -> Self {
        if persist_durable {
            Self::Durable
        } else {
            Self::Ephemeral
        }
    }

    pub fn is_durable(self) -> bool {
        self == Self::Durable
    }
}

/// Key/value backend for one persistence tier
pub trait Tier: Send {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: String) -> Result<()>;
    fn remove(&mut self, key: &str) -> Result<()>;
}

/// Process-lifetime tier.
#[derive(Debug, Default)]
pub struct MemoryTier {
    values: HashMap<String, String>,
}

impl Tier for MemoryTier {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) -> Result<()> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.values.remove(key);
        Ok(())
    }
}

/// Durable tier backed by a TOML file. The whole map is rewritten on change.
#[derive(Debug)]
pub struct FileTier {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl FileTier {
    pub fn open(path: PathBuf) -> Result<Self> {
        let values = if path.exists() {
            let content = fs::read_to_string(&path).context("Failed to read session file")?;
            toml::from_str(&content).context("Failed to parse session file")?
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, values })
    }

    fn flush(&self) -> Result<()> {
        if self.values.is_empty() {
            if self.path.exists() {
                fs::remove_file(&self.path).context("Failed to remove session file")?;
            }
            return Ok(());
        }

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).context("Failed to create session directory")?;
        }
        let content =
            toml::to_string_pretty(&self.values).context("Failed to serialize session")?;
        fs::write(&self.path, content).context("Failed to write session file")?;

        // Session file holds bearer credentials
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&self.path, perms).context("Failed to set session permissions")?;
        }

        Ok(())
    }
}

impl Tier for FileTier {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) -> Result<()> {
        if self.values.get(key) == Some(&value) {
            return Ok(());
        }
        self.values.insert(key.to_string(), value);
        self.flush()
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        if self.values.remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }
}

struct Tiers {
    durable: Box<dyn Tier>,
    ephemeral: Box<dyn Tier>,
}

impl Tiers {
    fn read(&self, key: &str) -> Option<String> {
        self.durable.get(key).or_else(|| self.ephemeral.get(key))
    }

    fn write(&mut self, key: &str, value: String, persistence: Persistence) -> Result<()> {
        let (target, other) = match persistence {
            Persistence::Durable => (&mut self.durable, &mut self.ephemeral),
            Persistence::Ephemeral => (&mut self.ephemeral, &mut self.durable),
        };
        other.remove(key)?;
        target.set(key, value)
    }

    fn erase(&mut self, key: &str) -> Result<()> {
        self.durable.remove(key)?;
        self.ephemeral.remove(key)
    }
}

/// Single source of truth for the current session's credentials and user.
pub struct TokenStore {
    tiers: Mutex<Tiers>,
}

impl TokenStore {
    pub fn new(durable: Box<dyn Tier>, ephemeral: Box<dyn Tier>) -> Self {
        Self {
            tiers: Mutex::new(Tiers { durable, ephemeral }),
        }
    }

    /// Durable tier on disk, ephemeral tier in memory.
    pub fn open(session_path: PathBuf) -> Result<Self> {
        Ok(Self::new(
            Box::new(FileTier::open(session_path)?),
            Box::<MemoryTier>::default(),
        ))
    }

    /// Both tiers in memory.
    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self::new(Box::<MemoryTier>::default(), Box::<MemoryTier>::default())
    }

    fn lock(&self) -> MutexGuard<'_, Tiers> {
        self.tiers.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn save_token(&self, token: &str, persist_durable: bool) -> Result<()> {
        self.lock().write(
            ACCESS_TOKEN_KEY,
            token.to_string(),
            Persistence::from_durable(persist_durable),
        )
    }

    pub fn save_refresh_token(&self, token: &str, persist_durable: bool) -> Result<()> {
        self.lock().write(
            REFRESH_TOKEN_KEY,
            token.to_string(),
            Persistence::from_durable(persist_durable),
        )
    }

    pub fn save_user(&self, user: &UserRecord, persist_durable: bool) -> Result<()> {
        let encoded = serde_json::to_string(user).context("Failed to serialize user record")?;
        self.lock()
            .write(USER_KEY, encoded, Persistence::from_durable(persist_durable))
    }

    /// Store everything a successful login returns in one tier.
    ///
    /// A missing refresh token clears any left over from a previous session.
    pub fn save_session(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
        user: Option<&UserRecord>,
        persistence: Persistence,
    ) -> Result<()> {
        let durable = persistence.is_durable();
        self.save_token(access_token, durable)?;
        match refresh_token {
            Some(rt) => self.save_refresh_token(rt, durable)?,
            None => self.lock().erase(REFRESH_TOKEN_KEY)?,
        }
        match user {
            Some(user) => self.save_user(user, durable)?,
            None => self.lock().erase(USER_KEY)?,
        }
        Ok(())
    }

    pub fn token(&self) -> Option<String> {
        self.lock().read(ACCESS_TOKEN_KEY)
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.lock().read(REFRESH_TOKEN_KEY)
    }

    pub fn user(&self) -> Option<UserRecord> {
        let raw = self.lock().read(USER_KEY)?;
        match serde_json::from_str(&raw) {
            Ok(user) => Some(user),
            Err(e) => {
                tracing::warn!("Stored user record is unreadable: {}", e);
                None
            }
        }
    }

    /// Tier holding the access token, or the refresh token if there is none.
    pub fn persistence(&self) -> Option<Persistence> {
        let tiers = self.lock();
        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY] {
            if tiers.durable.get(key).is_some() {
                return Some(Persistence::Durable);
            }
            if tiers.ephemeral.get(key).is_some() {
                return Some(Persistence::Ephemeral);
            }
        }
        None
    }

    /// Remove both tokens from both tiers.
    pub fn clear_tokens(&self) -> Result<()> {
        let mut tiers = self.lock();
        tiers.erase(ACCESS_TOKEN_KEY)?;
        tiers.erase(REFRESH_TOKEN_KEY)
    }

    /// Remove tokens and the user record from both tiers. Returns whether
    /// anything was stored.
    pub fn clear(&self) -> Result<bool> {
        let mut tiers = self.lock();
        let present = SESSION_KEYS.iter().any(|key| tiers.read(key).is_some());
        for key in SESSION_KEYS {
            tiers.erase(key)?;
        }
        Ok(present)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_session_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("edu-portal-test-{}-{}", name, std::process::id()))
            .join("session.toml")
    }

    #[test]
    fn test_durable_save_clears_ephemeral_copy() {
        let store = TokenStore::in_memory();
        store.save_token("old", false).unwrap();
        store.save_token("t", true).unwrap();

        assert_eq!(store.token().as_deref(), Some("t"));
        assert_eq!(store.lock().ephemeral.get(ACCESS_TOKEN_KEY), None);
        assert_eq!(store.persistence(), Some(Persistence::Durable));
    }

    #[test]
    fn test_ephemeral_save_clears_durable_copy() {
        let store = TokenStore::in_memory();
        store.save_token("old", true).unwrap();
        store.save_token("t", false).unwrap();

        assert_eq!(store.token().as_deref(), Some("t"));
        assert_eq!(store.lock().durable.get(ACCESS_TOKEN_KEY), None);
        assert_eq!(store.persistence(), Some(Persistence::Ephemeral));
    }

    #[test]
    fn test_refresh_token_tiers() {
        let store = TokenStore::in_memory();
        store.save_refresh_token("r1", true).unwrap();
        store.save_refresh_token("r2", false).unwrap();
        assert_eq!(store.refresh_token().as_deref(), Some("r2"));
        assert_eq!(store.lock().durable.get(REFRESH_TOKEN_KEY), None);
    }

    #[test]
    fn test_clear_tokens_empties_both_tiers() {
        let store = TokenStore::in_memory();
        store.save_token("t", true).unwrap();
        store.save_refresh_token("r", false).unwrap();
        store.clear_tokens().unwrap();

        assert_eq!(store.token(), None);
        assert_eq!(store.refresh_token(), None);
        assert_eq!(store.persistence(), None);
    }

    #[test]
    fn test_save_session_replaces_previous() {
        let store = TokenStore::in_memory();
        let user = UserRecord {
            email: Some("a@b.com".into()),
            ..Default::default()
        };
        store
            .save_session("T1", Some("R1"), Some(&user), Persistence::Durable)
            .unwrap();
        store
            .save_session("T2", None, None, Persistence::Ephemeral)
            .unwrap();

        assert_eq!(store.token().as_deref(), Some("T2"));
        assert_eq!(store.refresh_token(), None);
        assert_eq!(store.user(), None);
        assert_eq!(store.persistence(), Some(Persistence::Ephemeral));
    }

    #[test]
    fn test_file_tier_survives_reopen() {
        let path = temp_session_path("reopen");
        let _ = fs::remove_file(&path);

        let store = TokenStore::open(path.clone()).unwrap();
        store.save_token("durable", true).unwrap();
        store.save_refresh_token("session-only", false).unwrap();
        drop(store);

        let reopened = TokenStore::open(path.clone()).unwrap();
        assert_eq!(reopened.token().as_deref(), Some("durable"));
        assert_eq!(reopened.refresh_token(), None);

        assert!(reopened.clear().unwrap());
        assert!(!path.exists());
        assert!(!reopened.clear().unwrap());
    }
}
