//! Build index (shaman) client.
//!
//! `GET {base}/{branch}/latest/{os_type}/{os_version}` returns the build
//! sources for the newest build of a branch, one per distro flavor. The
//! first source that lists the wanted architecture is turned into a
//! [`BuildRecord`].

use crate::defaults::UpstreamConfig;
use crate::error::{BuildNotFoundDetails, Error, Result};
use crate::registry::BuildRecord;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildQuery {
    pub branch: String,
    pub os_type: String,
    pub os_version: String,
    pub arch: String,
}

impl BuildQuery {
    /// Query for `branch`, taking anything not overridden from config.
    pub fn new(branch: &str, config: &UpstreamConfig) -> Self {
        Self {
            branch: branch.to_string(),
            os_type: config.os_type.clone(),
            os_version: config.os_version.clone(),
            arch: config.arch.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuildSource {
    #[serde(default)]
    pub archs: Vec<String>,
    pub extra: BuildSourceExtra,
    pub chacra_url: String,
    pub sha1: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuildSourceExtra {
    pub version: String,
}

/// URL of the latest-build endpoint for a query.
pub fn build_url(base_url: &str, query: &BuildQuery) -> String {
    format!(
        "{}/{}/latest/{}/{}",
        base_url.trim_end_matches('/'),
        query.branch.to_lowercase(),
        query.os_type,
        query.os_version
    )
}

/// Package repo URL for a chacra build location.
pub fn repo_url(chacra_url: &str) -> String {
    if chacra_url.ends_with('/') {
        format!("{}repo", chacra_url)
    } else {
        format!("{}/repo", chacra_url)
    }
}

/// Pick the first source built for `query.arch`.
pub fn select_build(
    sources: &[BuildSource],
    query: &BuildQuery,
    image_repository: &str,
) -> Result<BuildRecord> {
    let source = sources
        .iter()
        .find(|s| s.archs.iter().any(|a| a == &query.arch))
        .ok_or_else(|| {
            Error::upstream_build_not_found(BuildNotFoundDetails {
                branch: query.branch.clone(),
                os_type: query.os_type.clone(),
                os_version: query.os_version.clone(),
                arch: query.arch.clone(),
            })
        })?;

    Ok(BuildRecord::new(
        source.extra.version.clone(),
        repo_url(&source.chacra_url),
        format!("{}:{}", image_repository, source.sha1),
    ))
}

pub struct UpstreamClient {
    client: Client,
    base_url: String,
    image_repository: String,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(format!("buildreg/{}", VERSION))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                Error::internal_io(e.to_string(), Some("create HTTP client".to_string()))
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            image_repository: config.image_repository.clone(),
        })
    }

    /// Latest published build for a branch / OS / arch combination.
    pub fn latest_build(&self, query: &BuildQuery) -> Result<BuildRecord> {
        let url = build_url(&self.base_url, query);
        log_status!("upstream", "Querying {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| Error::upstream_request_failed(&url, None, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(Error::upstream_request_failed(
                &url,
                Some(status.as_u16()),
                body.chars().take(500).collect::<String>(),
            ));
        }

        let sources: Vec<BuildSource> = response.json().map_err(|e| {
            Error::internal_json(e.to_string(), Some("parse build index response".to_string()))
        })?;

        let record = select_build(&sources, query, &self.image_repository)?;
        log_status!("upstream", "Upstream repo for {} is {}", query.branch, record.artifact_location);
        log_status!("upstream", "Upstream image for {} is {}", query.branch, record.image_reference);
        log_status!("upstream", "Upstream version for {} is {}", query.branch, record.version);
        Ok(record)
    }
}
