//! Cached profile of the last authenticated user.
//!
//! Purely cosmetic: lets a front end greet a returning user before the auth
//! check completes. Never consulted for authorization.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};

use crate::api::UserProfile;

const CACHE_FILE: &str = "last_user.json";

/// Last known profile, or `None` when there is no usable cache. Read
/// failures count as no cache; a greeting is not worth an error.
pub fn load_cached() -> Option<UserProfile> {
    let path = cache_path().ok()?;
    load_cached_from(&path)
}

pub fn load_cached_from(path: &Path) -> Option<UserProfile> {
    let content = fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

pub fn store(profile: &UserProfile) -> Result<()> {
    store_at(&cache_path()?, profile)
}

pub fn store_at(path: &Path, profile: &UserProfile) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(profile)?)?;
    Ok(())
}

pub fn clear() -> Result<()> {
    clear_at(&cache_path()?)
}

pub fn clear_at(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path)?;
    }
    Ok(())
}

fn cache_path() -> Result<PathBuf> {
    let config_dir =
        dirs::config_dir().ok_or_else(|| anyhow!("could not determine config directory"))?;
    Ok(config_dir.join("aurora").join(CACHE_FILE))
}
