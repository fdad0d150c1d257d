//! Session id persisted between invocations, so a still-valid session skips
//! the login sequence.

use std::fs;
use std::path::PathBuf;

use log::{debug, warn};

pub fn default_path() -> PathBuf {
    std::env::temp_dir().join(".sessid")
}

#[derive(Debug, Clone)]
pub struct SessionCache {
    path: PathBuf,
}

impl SessionCache {
    pub fn new(path: impl Into<PathBuf>) -> SessionCache {
        SessionCache { path: path.into() }
    }

    /// A missing or unreadable file just means there is no cached session.
    pub fn load(&self) -> Option<String> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => {
                debug!("Getting sessid from {}", self.path.display());
                let token = raw.trim();
                if token.is_empty() {
                    None
                } else {
                    Some(token.to_string())
                }
            }
            Err(err) => {
                debug!("Sessid file {} not readable: {err}", self.path.display());
                None
            }
        }
    }

    pub fn save(&self, token: &str) {
        debug!("Storing sessid {token} in {}", self.path.display());
        if let Err(err) = fs::write(&self.path, token) {
            warn!("Could not store sessid in {}: {err}", self.path.display());
        }
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        SessionCache::new(default_path())
    }
}
