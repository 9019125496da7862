//! Best-effort work that follows a successful file operation.
//!
//! Cache purges and edit bookkeeping never change the outcome of the primary
//! operation. Failures are reported through `tracing` and dropped.

use crate::{models::user::UserRef, services::user_repository::UserRepository};
use anyhow::{Context, bail};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::{future::Future, sync::Arc, time::Duration};
use tracing::{debug, warn};

const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Invalidates one public URL of a user's site at the CDN.
#[async_trait]
pub trait CachePurger: Send + Sync {
    async fn purge(&self, login_name: &str, path: &str) -> anyhow::Result<()>;
}

/// Records that a user's site content changed.
#[async_trait]
pub trait ActivityRecorder: Send + Sync {
    async fn record_site_edit(&self, user_id: i64) -> anyhow::Result<()>;
}

pub struct NoopPurger;

#[async_trait]
impl CachePurger for NoopPurger {
    async fn purge(&self, login_name: &str, path: &str) -> anyhow::Result<()> {
        debug!(login = login_name, path, "cache purge disabled");
        Ok(())
    }
}

pub struct CloudflarePurger {
    client: Client,
    api_base: String,
    zone_id: String,
    api_token: String,
    public_domain: String,
}

impl CloudflarePurger {
    pub fn new(zone_id: String, api_token: String, public_domain: String) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("building CDN purge client")?;
        Ok(Self {
            client,
            api_base: CLOUDFLARE_API_BASE.to_string(),
            zone_id,
            api_token,
            public_domain,
        })
    }

    /// Public URL a visitor uses for `path` on `login_name`'s site.
    pub fn public_url(&self, login_name: &str, path: &str) -> String {
        format!(
            "https://{}.{}/{}",
            login_name,
            self.public_domain,
            path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl CachePurger for CloudflarePurger {
    async fn purge(&self, login_name: &str, path: &str) -> anyhow::Result<()> {
        let url = format!("{}/zones/{}/purge_cache", self.api_base, self.zone_id);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&json!({ "files": [self.public_url(login_name, path)] }))
            .send()
            .await
            .context("CDN purge request failed")?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("CDN purge failed: HTTP {} - {}", status, body);
        }
        Ok(())
    }
}

#[async_trait]
impl ActivityRecorder for UserRepository {
    async fn record_site_edit(&self, user_id: i64) -> anyhow::Result<()> {
        UserRepository::record_site_edit(self, user_id)
            .await
            .context("recording site edit")
    }
}

/// Fire-and-forget executor for post-operation side effects.
#[derive(Clone)]
pub struct SideEffects {
    purger: Arc<dyn CachePurger>,
    activity: Arc<dyn ActivityRecorder>,
}

impl SideEffects {
    pub fn new(purger: Arc<dyn CachePurger>, activity: Arc<dyn ActivityRecorder>) -> Self {
        Self { purger, activity }
    }

    /// Await `effect`; log and swallow its error.
    pub async fn best_effort<F>(&self, name: &'static str, user: &UserRef, effect: F)
    where
        F: Future<Output = anyhow::Result<()>>,
    {
        if let Err(err) = effect.await {
            warn!(effect = name, login = %user.login_name, error = %err, "side effect failed");
        }
    }

    /// Purge each relative path of the user's site.
    pub async fn purge_paths(&self, user: &UserRef, paths: &[String]) {
        for path in paths {
            self.best_effort("cache_purge", user, self.purger.purge(&user.login_name, path))
                .await;
        }
    }

    pub async fn record_edit(&self, user: &UserRef) {
        self.best_effort("site_edit", user, self.activity.record_site_edit(user.id))
            .await;
    }

    /// Purges followed by edit bookkeeping, the usual tail of a mutation.
    pub async fn after_mutation(&self, user: &UserRef, paths: &[String]) {
        self.purge_paths(user, paths).await;
        self.record_edit(user).await;
    }
}
