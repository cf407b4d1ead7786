use fairsync::config::SyncConfig;
use fairsync::sync::cache::CacheStore;
use fairsync::sync::engine::{SourceTtls, SyncEngine, SyncOptions};
use fairsync::sync::tree::RemoteTreeCache;
use fairsync_core::{DriveClient, PortalClient};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CliArgs {
    download: bool,
    upload: bool,
    refresh: bool,
    force: bool,
    help: bool,
}

impl Default for CliArgs {
    fn default() -> Self {
        Self {
            download: true,
            upload: true,
            refresh: false,
            force: false,
            help: false,
        }
    }
}

fn parse_cli_args<I>(args: I) -> anyhow::Result<CliArgs>
where
    I: IntoIterator<Item = String>,
{
    let mut parsed = CliArgs::default();
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "--no-download" => parsed.download = false,
            "--no-upload" => parsed.upload = false,
            "--refresh" => parsed.refresh = true,
            "--force" => parsed.force = true,
            "--help" | "-h" => parsed.help = true,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(parsed)
}

fn print_usage() {
    println!("Usage: fairsync [--no-download] [--no-upload] [--refresh] [--force]");
    println!("  --no-download   Skip syncing portal files to the local mirror");
    println!("  --no-upload     Skip pushing local files to the drive");
    println!("  --refresh       Ignore cached source data and refetch every tab");
    println!("  --force         Re-download files even when a local copy exists");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = parse_cli_args(std::env::args())?;
    if args.help {
        print_usage();
        return Ok(());
    }

    let config = SyncConfig::from_env()?;
    let mut portal = match &config.portal_url {
        Some(url) => PortalClient::with_base_url(url, &config.username, &config.password)?,
        None => PortalClient::for_domain(&config.portal_domain, &config.username, &config.password)?,
    };
    if !portal.login().await? {
        anyhow::bail!("portal rejected the configured credentials");
    }

    let tree = match (&config.drive_url, &config.drive_token) {
        (Some(url), Some(token)) => Some(RemoteTreeCache::new(DriveClient::new(url, token)?)),
        _ => None,
    };
    if args.upload && tree.is_none() {
        anyhow::bail!("upload requested but FAIRSYNC_DRIVE_URL/FAIRSYNC_DRIVE_TOKEN are not set");
    }

    let cache = CacheStore::new(&config.cache_dir);
    let options = SyncOptions {
        download: args.download,
        upload: args.upload,
        refresh: args.refresh,
        force: args.force,
    };
    let mut engine = SyncEngine::new(
        portal,
        tree,
        cache,
        config.file_root.clone(),
        config.drive_root.clone(),
        options,
    )
    .with_ttls(SourceTtls {
        project: config.project_ttl,
        file: config.file_ttl,
        form: config.form_ttl,
        merged: config.merged_ttl,
    })
    .with_team_patch(config.patch_team_files);

    let records = engine.run().await?;
    tracing::info!(entities = records.len(), "sync cycle complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cli_args_defaults_to_both_phases() {
        let args = parse_cli_args(vec!["fairsync".to_string()]).unwrap();
        assert!(args.download);
        assert!(args.upload);
        assert!(!args.refresh);
        assert!(!args.force);
    }

    #[test]
    fn parse_cli_args_disables_phases() {
        let args = parse_cli_args(vec![
            "fairsync".to_string(),
            "--no-download".to_string(),
            "--no-upload".to_string(),
        ])
        .unwrap();
        assert!(!args.download);
        assert!(!args.upload);
    }

    #[test]
    fn parse_cli_args_sets_refresh_and_force() {
        let args = parse_cli_args(vec![
            "fairsync".to_string(),
            "--refresh".to_string(),
            "--force".to_string(),
        ])
        .unwrap();
        assert!(args.refresh);
        assert!(args.force);
    }

    #[test]
    fn parse_cli_args_rejects_unknown_flags() {
        assert!(parse_cli_args(vec!["fairsync".to_string(), "--bogus".to_string()]).is_err());
    }
}
