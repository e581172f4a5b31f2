use crate::error::{RelayError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const RELAY_DIR: &str = ".relay";
pub const CONFIG_FILE: &str = ".relay/config.yaml";
pub const JOURNAL_FILE: &str = ".relay/tasks.redb";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn relay_dir(root: &Path) -> PathBuf {
    root.join(RELAY_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn journal_path(root: &Path) -> PathBuf {
    root.join(JOURNAL_FILE)
}

// ---------------------------------------------------------------------------
// Identifier validation
// ---------------------------------------------------------------------------

static ID_RE: OnceLock<Regex> = OnceLock::new();

fn id_re() -> &'static Regex {
    ID_RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9][a-z0-9\-]*[a-z0-9]$|^[a-z0-9]$").expect("id regex is valid")
    })
}

/// Worker and reviewer ids are lowercase slugs: `backend-dev`, `qa1`.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > 64 || !id_re().is_match(id) {
        return Err(RelayError::InvalidConfig(format!(
            "'{id}' is not a valid id (lowercase letters, digits and dashes)"
        )));
    }
    Ok(())
}
