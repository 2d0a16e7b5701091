use std::{path::Path, time::Duration};

use anyhow::Context;
use lodestone_instance::{InstanceGateway, InstanceStatus};

use crate::GceError;
use crate::token::{ServiceAccountKey, TokenSource};

pub const COMPUTE_BASE_URL: &str = "https://compute.googleapis.com/compute/v1";

/// Fully-qualified location of one Compute Engine instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRef {
    pub project: String,
    pub zone: String,
    pub name: String,
}

impl InstanceRef {
    pub fn url(&self, base: &str) -> String {
        format!(
            "{}/projects/{}/zones/{}/instances/{}",
            base.trim_end_matches('/'),
            self.project,
            self.zone,
            self.name
        )
    }

    pub fn action_url(&self, base: &str, action: &str) -> String {
        format!("{}/{action}", self.url(base))
    }
}

#[derive(Debug, serde::Deserialize)]
struct InstanceResource {
    status: InstanceStatus,
}

pub(crate) fn parse_instance_status(body: &[u8]) -> anyhow::Result<InstanceStatus> {
    let res: InstanceResource =
        serde_json::from_slice(body).context("parse compute instance resource")?;
    Ok(res.status)
}

/// Compute Engine instances API for a single instance.
#[derive(Debug)]
pub struct ComputeInstance {
    target: InstanceRef,
    base_url: String,
    http: reqwest::Client,
    tokens: TokenSource,
}

impl ComputeInstance {
    pub fn new(target: InstanceRef, key: ServiceAccountKey) -> anyhow::Result<Self> {
        Self::with_base_url(target, key, COMPUTE_BASE_URL)
    }

    pub(crate) fn with_base_url(
        target: InstanceRef,
        key: ServiceAccountKey,
        base_url: &str,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("lodestone/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .context("build http client")?;
        let tokens = TokenSource::new(key, http.clone())?;
        tracing::info!(
            project = %target.project,
            zone = %target.zone,
            instance = %target.name,
            account = %tokens.client_email(),
            %base_url,
            "compute gateway ready"
        );
        Ok(Self {
            target,
            base_url: base_url.to_string(),
            http,
            tokens,
        })
    }

    pub fn from_credentials_file(target: InstanceRef, path: &Path) -> anyhow::Result<Self> {
        let key = ServiceAccountKey::from_file(path)?;
        Self::new(target, key)
    }

    async fn send(&self, req: reqwest::RequestBuilder, what: &str) -> anyhow::Result<Vec<u8>> {
        let token = self.tokens.access_token().await?;
        let resp = req
            .bearer_auth(token)
            .send()
            .await
            .with_context(|| format!("request compute {what}"))?;

        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .with_context(|| format!("read compute {what} response"))?;
        if !status.is_success() {
            return Err(GceError::Api {
                action: what.to_string(),
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            }
            .into());
        }
        Ok(body.to_vec())
    }

    async fn post_action(&self, action: &str) -> anyhow::Result<()> {
        let url = self.target.action_url(&self.base_url, action);
        tracing::debug!(%url, "compute instance action");
        self.send(self.http.post(url).header("content-length", "0"), action)
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl InstanceGateway for ComputeInstance {
    fn instance_name(&self) -> &str {
        &self.target.name
    }

    async fn start(&self) -> anyhow::Result<()> {
        self.post_action("start").await
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.post_action("stop").await
    }

    async fn get(&self) -> anyhow::Result<InstanceStatus> {
        let url = self.target.url(&self.base_url);
        let body = self.send(self.http.get(url), "get").await?;
        parse_instance_status(&body)
    }
}
