use crate::services::{object_store::S3Config, reconciler::ReconcilerConfig};
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use std::env;

/// Centralized application configuration.
/// Built once at startup from CLI arguments and environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub store: StoreSettings,
    /// CDN cache purging; disabled when `None`.
    pub purge: Option<PurgeSettings>,
    pub reconciler: ReconcilerConfig,
}

#[derive(Debug, Clone)]
pub enum StoreSettings {
    Memory,
    S3(S3Config),
}

#[derive(Clone)]
pub struct PurgeSettings {
    pub zone_id: String,
    pub api_token: String,
    pub public_domain: String,
}

impl std::fmt::Debug for PurgeSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PurgeSettings")
            .field("zone_id", &self.zone_id)
            .field("api_token", &"<redacted>")
            .field("public_domain", &self.public_domain)
            .finish()
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    S3,
    Memory,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP API (default)
    Serve,
    /// Apply the database schema and exit
    Migrate,
    /// Recompute every user's home directory size once and exit
    Reconcile,
    /// Run the periodic job scheduler
    Cron,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Per-user static site storage over S3")]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Host to bind to (overrides HOME_STORAGE_HOST)
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Port to bind to (overrides HOME_STORAGE_PORT)
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Database URL (overrides HOME_STORAGE_DATABASE_URL)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Object store backend (overrides HOME_STORAGE_STORE)
    #[arg(long, value_enum, global = true)]
    pub store: Option<StoreBackend>,

    /// Users per reconciliation batch
    #[arg(long, global = true)]
    pub batch_size: Option<usize>,

    /// Reconciliation batches processed concurrently
    #[arg(long, global = true)]
    pub concurrent_batches: Option<usize>,
}

impl AppConfig {
    /// Parse CLI args and the process environment into AppConfig and the
    /// subcommand to run.
    pub fn from_env_and_args() -> Result<(Self, Command)> {
        Self::from_sources(Args::parse(), |name| env::var(name).ok())
    }

    /// Merge `args` over variables looked up through `var`, over defaults.
    pub fn from_sources(args: Args, var: impl Fn(&str) -> Option<String>) -> Result<(Self, Command)> {
        let var = |name: &str| var(name).filter(|v| !v.trim().is_empty());

        // --- Environment fallback ---
        let env_host = var("HOME_STORAGE_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let env_port = match var("HOME_STORAGE_PORT") {
            Some(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing HOME_STORAGE_PORT value `{}`", value))?,
            None => 3000,
        };
        let env_db = var("HOME_STORAGE_DATABASE_URL")
            .unwrap_or_else(|| "sqlite://./data/home_storage.db".into());
        let env_store = match var("HOME_STORAGE_STORE").as_deref() {
            None | Some("s3") => StoreBackend::S3,
            Some("memory") => StoreBackend::Memory,
            Some(other) => bail!("HOME_STORAGE_STORE must be `s3` or `memory`, got `{}`", other),
        };

        // --- Merge ---
        let store = match args.store.unwrap_or(env_store) {
            StoreBackend::Memory => StoreSettings::Memory,
            StoreBackend::S3 => StoreSettings::S3(s3_from_env(&var)?),
        };

        let purge = match (var("CLOUDFLARE_ZONE_ID"), var("CLOUDFLARE_USER_API_TOKEN")) {
            (Some(zone_id), Some(api_token)) => Some(PurgeSettings {
                zone_id,
                api_token,
                public_domain: var("PUBLIC_DOMAIN")
                    .context("PUBLIC_DOMAIN is required when CDN purging is configured")?,
            }),
            _ => None,
        };

        let defaults = ReconcilerConfig::default();
        let reconciler = ReconcilerConfig {
            batch_size: args.batch_size.unwrap_or(defaults.batch_size).max(1),
            concurrent_batches: args
                .concurrent_batches
                .unwrap_or(defaults.concurrent_batches)
                .max(1),
        };

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            store,
            purge,
            reconciler,
        };

        Ok((cfg, args.command.unwrap_or(Command::Serve)))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn s3_from_env(var: &impl Fn(&str) -> Option<String>) -> Result<S3Config> {
    let required = |name: &str| {
        var(name).with_context(|| format!("{} must be set for the s3 store backend", name))
    };

    let endpoint = match (var("S3_ENDPOINT"), var("R2_ACCOUNT_ID")) {
        (Some(endpoint), _) => endpoint.trim_end_matches('/').to_string(),
        (None, Some(account)) => format!("https://{}.r2.cloudflarestorage.com", account),
        (None, None) => bail!("either S3_ENDPOINT or R2_ACCOUNT_ID must be set for the s3 store backend"),
    };

    Ok(S3Config {
        bucket: required("S3_BUCKET_NAME")?,
        endpoint,
        region: var("S3_REGION").unwrap_or_else(|| "auto".into()),
        access_key_id: required("AWS_ACCESS_KEY_ID")?,
        secret_access_key: required("AWS_SECRET_ACCESS_KEY")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn parse(argv: &[&str], vars: &[(&str, &str)]) -> Result<(AppConfig, Command)> {
        let env: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let args = Args::try_parse_from(argv)?;
        AppConfig::from_sources(args, |name| env.get(name).cloned())
    }

    #[test]
    fn defaults_with_memory_store() {
        let (cfg, command) = parse(&["home-storage", "--store", "memory"], &[]).unwrap();
        assert_eq!(command, Command::Serve);
        assert_eq!(cfg.addr(), "0.0.0.0:3000");
        assert_eq!(cfg.database_url, "sqlite://./data/home_storage.db");
        assert!(matches!(cfg.store, StoreSettings::Memory));
        assert!(cfg.purge.is_none());
        assert_eq!(cfg.reconciler.batch_size, 10);
        assert_eq!(cfg.reconciler.concurrent_batches, 3);
    }

    #[test]
    fn flags_override_environment() {
        let (cfg, command) = parse(
            &["home-storage", "reconcile", "--port", "8080", "--batch-size", "4"],
            &[
                ("HOME_STORAGE_PORT", "9000"),
                ("HOME_STORAGE_STORE", "memory"),
            ],
        )
        .unwrap();
        assert_eq!(command, Command::Reconcile);
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.reconciler.batch_size, 4);
    }

    #[test]
    fn bad_port_is_an_error() {
        let err = parse(&["home-storage"], &[("HOME_STORAGE_PORT", "http")]).unwrap_err();
        assert!(err.to_string().contains("HOME_STORAGE_PORT"));
    }

    #[test]
    fn s3_backend_needs_credentials() {
        let err = parse(&["home-storage"], &[("R2_ACCOUNT_ID", "acct")]).unwrap_err();
        assert!(err.to_string().contains("S3_BUCKET_NAME"));

        let (cfg, _) = parse(
            &["home-storage"],
            &[
                ("R2_ACCOUNT_ID", "acct"),
                ("S3_BUCKET_NAME", "sites"),
                ("AWS_ACCESS_KEY_ID", "id"),
                ("AWS_SECRET_ACCESS_KEY", "secret"),
            ],
        )
        .unwrap();
        match cfg.store {
            StoreSettings::S3(s3) => {
                assert_eq!(s3.endpoint, "https://acct.r2.cloudflarestorage.com");
                assert_eq!(s3.region, "auto");
            }
            StoreSettings::Memory => panic!("expected s3 settings"),
        }
    }

    #[test]
    fn purge_requires_a_public_domain() {
        let vars = [
            ("HOME_STORAGE_STORE", "memory"),
            ("CLOUDFLARE_ZONE_ID", "zone"),
            ("CLOUDFLARE_USER_API_TOKEN", "token"),
        ];
        assert!(parse(&["home-storage"], &vars).is_err());

        let mut vars = vars.to_vec();
        vars.push(("PUBLIC_DOMAIN", "example.site"));
        let (cfg, _) = parse(&["home-storage"], &vars).unwrap();
        assert_eq!(cfg.purge.unwrap().public_domain, "example.site");
    }
}
