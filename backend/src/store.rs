//! Persistence for the two collections the service owns.
//!
//! - **plays** - device id → day of last play (`plays.json`, an object)
//! - **coupons** - the coupon inventory in stored order (`coupons.json`, an array)
//!
//! Loads never fail: a missing, empty or unreadable document yields an empty
//! collection. A malformed entry inside a readable document only drops that
//! entry. Saves rewrite the whole document and report errors to the caller.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use coupon_core::{Coupon, Plays};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;

pub const PLAYS_FILE: &str = "plays.json";
pub const COUPONS_FILE: &str = "coupons.json";

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CouponStore: Send + Sync {
    async fn load_plays(&self) -> Plays;

    async fn save_plays(&self, plays: &Plays) -> Result<()>;

    /// Coupons in stored order; allocation depends on it.
    async fn load_coupons(&self) -> Vec<Coupon>;

    async fn save_coupons(&self, coupons: &[Coupon]) -> Result<()>;
}

/// Keeps both collections in process memory. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    plays: RwLock<Plays>,
    coupons: RwLock<Vec<Coupon>>,
}

impl MemoryStore {
    pub fn with_coupons(coupons: Vec<Coupon>) -> Self {
        Self {
            plays: RwLock::new(Plays::new()),
            coupons: RwLock::new(coupons),
        }
    }
}

#[async_trait]
impl CouponStore for MemoryStore {
    async fn load_plays(&self) -> Plays {
        self.plays.read().await.clone()
    }

    async fn save_plays(&self, plays: &Plays) -> Result<()> {
        *self.plays.write().await = plays.clone();
        Ok(())
    }

    async fn load_coupons(&self) -> Vec<Coupon> {
        self.coupons.read().await.clone()
    }

    async fn save_coupons(&self, coupons: &[Coupon]) -> Result<()> {
        *self.coupons.write().await = coupons.to_vec();
        Ok(())
    }
}

/// Pretty-printed JSON documents in a data directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    plays_path: PathBuf,
    coupons_path: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            plays_path: dir.join(PLAYS_FILE),
            coupons_path: dir.join(COUPONS_FILE),
        }
    }

    pub fn plays_path(&self) -> &Path {
        &self.plays_path
    }

    pub fn coupons_path(&self) -> &Path {
        &self.coupons_path
    }
}

#[async_trait]
impl CouponStore for JsonFileStore {
    async fn load_plays(&self) -> Plays {
        let raw: BTreeMap<String, Value> = read_or_default(&self.plays_path).await;
        plays_from_entries(raw)
    }

    async fn save_plays(&self, plays: &Plays) -> Result<()> {
        write_pretty(&self.plays_path, plays).await
    }

    async fn load_coupons(&self) -> Vec<Coupon> {
        read_or_default(&self.coupons_path).await
    }

    async fn save_coupons(&self, coupons: &[Coupon]) -> Result<()> {
        write_pretty(&self.coupons_path, coupons).await
    }
}

/// Keeps every device whose entry is a day string. `null` entries mean "never
/// played" and are dropped quietly; anything else is dropped with a warning.
fn plays_from_entries(raw: BTreeMap<String, Value>) -> Plays {
    raw.into_iter()
        .filter_map(|(device_id, day)| match day {
            Value::String(day) => Some((device_id, day)),
            Value::Null => None,
            other => {
                tracing::warn!(
                    device_id = %device_id,
                    entry = %other,
                    "dropping malformed play entry"
                );
                None
            }
        })
        .collect()
}

async fn read_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no document yet, starting empty");
            return T::default();
        }
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "unreadable document, starting empty"
            );
            return T::default();
        }
    };

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return T::default();
    }

    match serde_json::from_slice::<Option<T>>(&bytes) {
        Ok(value) => value.unwrap_or_default(),
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "corrupt document, starting empty"
            );
            T::default()
        }
    }
}

/// Writes to a sibling temp file and renames it into place.
async fn write_pretty<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json)
        .await
        .with_context(|| format!("writing {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}
