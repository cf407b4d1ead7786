use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;

const DEFAULT_PROJECT_TTL_SECS: u64 = 9000;
const DEFAULT_FILE_TTL_SECS: u64 = 9000;
const DEFAULT_FORM_TTL_SECS: u64 = 12000;
const DEFAULT_MERGED_TTL_SECS: u64 = 9000;

/// Everything the sync run needs from the environment. Credentials are
/// required; the drive settings are optional because a download-only run has
/// no use for them.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub portal_domain: String,
    /// Overrides the `https://{domain}.stemportal.com` base url.
    pub portal_url: Option<String>,
    pub username: String,
    pub password: String,
    pub drive_url: Option<String>,
    pub drive_token: Option<String>,
    pub file_root: PathBuf,
    pub cache_dir: PathBuf,
    pub drive_root: String,
    pub project_ttl: Duration,
    pub file_ttl: Duration,
    pub form_ttl: Duration,
    pub merged_ttl: Duration,
    pub patch_team_files: bool,
}

impl SyncConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let portal_domain =
            std::env::var("FAIRSYNC_PORTAL_DOMAIN").context("FAIRSYNC_PORTAL_DOMAIN is not set")?;
        let username = std::env::var("FAIRSYNC_USERNAME").context("FAIRSYNC_USERNAME is not set")?;
        let password = std::env::var("FAIRSYNC_PASSWORD").context("FAIRSYNC_PASSWORD is not set")?;
        if username.len() < 6 {
            anyhow::bail!("FAIRSYNC_USERNAME does not look like a valid portal username");
        }
        if password.len() < 6 {
            anyhow::bail!("FAIRSYNC_PASSWORD does not look like a valid portal password");
        }

        let home = dirs::home_dir().context("home directory is unavailable")?;
        let file_root = std::env::var("FAIRSYNC_FILE_ROOT")
            .ok()
            .map(|value| expand_with_home(&value, &home))
            .unwrap_or_else(|| PathBuf::from("files").join(&portal_domain));
        let cache_dir = std::env::var("FAIRSYNC_CACHE_DIR")
            .ok()
            .map(|value| expand_with_home(&value, &home))
            .unwrap_or_else(|| PathBuf::from("caches"));
        let drive_root = std::env::var("FAIRSYNC_DRIVE_ROOT")
            .unwrap_or_else(|_| format!("/Automation/{portal_domain}"));

        Ok(Self {
            portal_url: std::env::var("FAIRSYNC_PORTAL_URL").ok(),
            drive_url: std::env::var("FAIRSYNC_DRIVE_URL").ok(),
            drive_token: std::env::var("FAIRSYNC_DRIVE_TOKEN").ok(),
            portal_domain,
            username,
            password,
            file_root,
            cache_dir,
            drive_root,
            project_ttl: Duration::from_secs(read_u64_env(
                "FAIRSYNC_PROJECT_TTL_SECS",
                DEFAULT_PROJECT_TTL_SECS,
            )),
            file_ttl: Duration::from_secs(read_u64_env(
                "FAIRSYNC_FILE_TTL_SECS",
                DEFAULT_FILE_TTL_SECS,
            )),
            form_ttl: Duration::from_secs(read_u64_env(
                "FAIRSYNC_FORM_TTL_SECS",
                DEFAULT_FORM_TTL_SECS,
            )),
            merged_ttl: Duration::from_secs(read_u64_env(
                "FAIRSYNC_MERGED_TTL_SECS",
                DEFAULT_MERGED_TTL_SECS,
            )),
            patch_team_files: read_bool_env("FAIRSYNC_PATCH_TEAM_FILES", false),
        })
    }
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn read_u64_env(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

fn read_bool_env(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}
