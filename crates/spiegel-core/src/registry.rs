//! Provider registry client.
//!
//! Talks to the public registry protocol (`/v1/providers/...`) and turns the
//! published version list into the set of targets a mirror should hold.

use std::time::Duration;

use reqwest::Client;
use semver::Version;
use serde::de::DeserializeOwned;
use spiegel_schema::{
    DownloadDescriptor, PackageIdentity, PackageTarget, Platform, ProviderVersions,
};
use tracing::{debug, warn};

use crate::constraint::VersionConstraint;
use crate::error::MirrorError;

/// Deadline for a whole registry API call.
const API_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Longest a transfer may sit idle. Archive downloads have no total deadline.
const READ_TIMEOUT: Duration = Duration::from_secs(120);

/// HTTP client for one or more registries.
///
/// By default requests go to `https://{identity.hostname}`. An endpoint
/// override sends every request to a fixed base URL instead, which is how
/// tests and private registry proxies are wired in.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    http: Client,
    endpoint: Option<String>,
    api_timeout: Duration,
}

impl RegistryClient {
    pub fn new(http: Client) -> Self {
        Self {
            http,
            endpoint: None,
            api_timeout: API_TIMEOUT,
        }
    }

    /// Build a client with the crate user agent, a connect timeout and an
    /// idle-read timeout.
    pub fn with_defaults() -> Result<Self, MirrorError> {
        let http = Client::builder()
            .user_agent(crate::USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(READ_TIMEOUT)
            .build()
            .map_err(|e| MirrorError::registry_with("building HTTP client", e))?;
        Ok(Self::new(http))
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into().trim_end_matches('/').to_string());
        self
    }

    /// Override the deadline applied to registry API calls.
    #[must_use]
    pub fn with_api_timeout(mut self, timeout: Duration) -> Self {
        self.api_timeout = timeout;
        self
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    pub fn resolve_identity(&self, reference: &str) -> Result<PackageIdentity, MirrorError> {
        Ok(PackageIdentity::parse(reference)?)
    }

    fn base_url(&self, identity: &PackageIdentity) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("https://{}", identity.hostname),
        }
    }

    pub async fn fetch_versions(
        &self,
        identity: &PackageIdentity,
    ) -> Result<ProviderVersions, MirrorError> {
        let url = format!(
            "{}/v1/providers/{}/{}/versions",
            self.base_url(identity),
            identity.owner,
            identity.name
        );
        let versions: ProviderVersions = self.get_json(&url).await?;

        for warning in versions.warnings.iter().flatten() {
            warn!(package = %identity, warning, "Registry warning");
        }
        debug!(package = %identity, count = versions.versions.len(), "Fetched version list");
        Ok(versions)
    }

    pub async fn download_descriptor(
        &self,
        target: &PackageTarget,
    ) -> Result<DownloadDescriptor, MirrorError> {
        let identity = &target.identity;
        let url = format!(
            "{}/v1/providers/{}/{}/{}/download/{}/{}",
            self.base_url(identity),
            identity.owner,
            identity.name,
            target.version,
            target.platform.os,
            target.platform.arch
        );
        self.get_json(&url).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, MirrorError> {
        let response = self
            .http
            .get(url)
            .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
            .timeout(self.api_timeout)
            .send()
            .await
            .map_err(|e| MirrorError::registry_with(format!("GET {url}"), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MirrorError::registry(format!("GET {url}: HTTP {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| MirrorError::registry_with(format!("reading body of {url}"), e))?;
        serde_json::from_slice(&body)
            .map_err(|e| MirrorError::registry_with(format!("decoding body of {url}"), e))
    }
}

/// Select the targets to mirror from a registry version list.
///
/// A version is wanted when it is valid semver, satisfies `constraint`, and is
/// not in `skip`. Each requested platform the version does not publish is
/// skipped with a warning. Versions are emitted in their normalized form.
pub fn filter_wanted(
    identity: &PackageIdentity,
    metadata: &ProviderVersions,
    constraint: &VersionConstraint,
    skip: &[Version],
    platforms: &[Platform],
) -> Vec<PackageTarget> {
    let mut wanted = Vec::new();

    for published in &metadata.versions {
        let version = match Version::parse(&published.version) {
            Ok(v) => v,
            Err(e) => {
                warn!(package = %identity, version = %published.version, error = %e, "Skipping unparseable version");
                continue;
            }
        };
        if !constraint.matches(&version) || skip.contains(&version) {
            continue;
        }

        for platform in platforms {
            if published.has_platform(platform) {
                wanted.push(PackageTarget::new(
                    identity.clone(),
                    version.to_string(),
                    platform.clone(),
                ));
            } else {
                warn!(
                    package = %identity,
                    %version,
                    %platform,
                    "Platform not published for version, skipping"
                );
            }
        }
    }

    wanted
}

#[cfg(test)]
mod tests {
    use super::*;
    use spiegel_schema::ProviderVersion;

    fn identity() -> PackageIdentity {
        PackageIdentity::parse("hashicorp/aws").unwrap()
    }

    fn published(version: &str, platforms: &[(&str, &str)]) -> ProviderVersion {
        ProviderVersion {
            version: version.to_string(),
            protocols: vec!["5.0".into()],
            platforms: platforms
                .iter()
                .map(|(os, arch)| Platform::new(*os, *arch))
                .collect(),
        }
    }

    fn metadata() -> ProviderVersions {
        ProviderVersions {
            id: None,
            versions: vec![
                published("5.0.0", &[("linux", "amd64"), ("darwin", "arm64")]),
                published("5.1.0", &[("linux", "amd64"), ("darwin", "arm64")]),
                published("5.2.0", &[("linux", "amd64")]),
            ],
            warnings: None,
        }
    }

    #[test]
    fn filters_by_constraint() {
        let constraint = VersionConstraint::parse(">=5.0.0 <5.2.0").unwrap();
        let wanted = filter_wanted(
            &identity(),
            &metadata(),
            &constraint,
            &[],
            &[Platform::new("linux", "amd64")],
        );
        let versions: Vec<_> = wanted.iter().map(|t| t.version.as_str()).collect();
        assert_eq!(versions, vec!["5.0.0", "5.1.0"]);
    }

    #[test]
    fn pre_releases_inside_the_range_are_wanted() {
        let mut meta = metadata();
        meta.versions.push(published("5.2.0-rc1", &[("linux", "amd64")]));
        let constraint = VersionConstraint::parse(">=5.0.0 <5.2.0").unwrap();
        let wanted = filter_wanted(
            &identity(),
            &meta,
            &constraint,
            &[],
            &[Platform::new("linux", "amd64")],
        );
        let versions: Vec<_> = wanted.iter().map(|t| t.version.as_str()).collect();
        assert_eq!(versions, vec!["5.0.0", "5.1.0", "5.2.0-rc1"]);
    }

    #[test]
    fn skip_list_and_missing_platforms() {
        let wanted = filter_wanted(
            &identity(),
            &metadata(),
            &VersionConstraint::any(),
            &[Version::parse("5.1.0").unwrap()],
            &[Platform::new("linux", "amd64"), Platform::new("darwin", "arm64")],
        );
        let names: Vec<_> = wanted.iter().map(ToString::to_string).collect();
        assert_eq!(
            names,
            vec![
                "registry.terraform.io/hashicorp/aws 5.0.0 linux_amd64",
                "registry.terraform.io/hashicorp/aws 5.0.0 darwin_arm64",
                "registry.terraform.io/hashicorp/aws 5.2.0 linux_amd64",
            ]
        );
    }

    #[test]
    fn invalid_versions_are_ignored() {
        let mut meta = metadata();
        meta.versions.push(published("not-a-version", &[("linux", "amd64")]));
        let wanted = filter_wanted(
            &identity(),
            &meta,
            &VersionConstraint::any(),
            &[],
            &[Platform::new("linux", "amd64")],
        );
        assert_eq!(wanted.len(), 3);
    }

    #[tokio::test]
    async fn fetches_version_list() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/providers/hashicorp/aws/versions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"versions":[{"version":"5.0.0","platforms":[{"os":"linux","arch":"amd64"}]}]}"#,
            )
            .create_async()
            .await;

        let client = RegistryClient::new(Client::new()).with_endpoint(server.url());
        let versions = client.fetch_versions(&identity()).await.unwrap();

        assert_eq!(versions.versions.len(), 1);
        assert_eq!(versions.versions[0].version, "5.0.0");
        mock.assert_async().await;
    }

    /// Serves `parts` with a pause before each one.
    fn trickle(
        parts: &'static [&'static [u8]],
    ) -> impl Fn(&mut dyn std::io::Write) -> std::io::Result<()> + Send + Sync + 'static {
        move |w| {
            for part in parts {
                std::thread::sleep(Duration::from_millis(150));
                w.write_all(part)?;
                w.flush()?;
            }
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn api_deadline_applies_to_registry_calls_only() {
        const ARCHIVE: [&[u8]; 3] = [b"zip-", b"archive-", b"bytes"];
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/providers/hashicorp/aws/versions")
            .with_status(200)
            .with_chunked_body(trickle(&[b"{\"versions\":", b"[]", b"}"]))
            .create_async()
            .await;
        server
            .mock("GET", "/dl/aws.zip")
            .with_status(200)
            .with_chunked_body(trickle(&ARCHIVE))
            .create_async()
            .await;

        let client = RegistryClient::with_defaults()
            .unwrap()
            .with_endpoint(server.url())
            .with_api_timeout(Duration::from_millis(200));

        let err = client.fetch_versions(&identity()).await.unwrap_err();
        assert!(matches!(err, MirrorError::Registry { .. }), "{err}");

        let digest = spiegel_schema::Sha256Digest::new(crate::test_support::sha256_hex(
            b"zip-archive-bytes",
        ))
        .unwrap();
        let url = format!("{}/dl/aws.zip", server.url());
        let body = crate::io::download::download_verified(client.http(), &url, &digest)
            .await
            .unwrap();
        assert_eq!(body, b"zip-archive-bytes");
    }

    #[tokio::test]
    async fn non_success_is_registry_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/providers/hashicorp/aws/versions")
            .with_status(404)
            .create_async()
            .await;

        let client = RegistryClient::new(Client::new()).with_endpoint(server.url());
        let err = client.fetch_versions(&identity()).await.unwrap_err();
        assert!(matches!(err, MirrorError::Registry { .. }));
    }

    #[tokio::test]
    async fn malformed_body_is_registry_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/providers/hashicorp/aws/versions")
            .with_status(200)
            .with_body("{not json")
            .create_async()
            .await;

        let client = RegistryClient::new(Client::new()).with_endpoint(server.url());
        assert!(client.fetch_versions(&identity()).await.is_err());
    }

    #[tokio::test]
    async fn fetches_download_descriptor() {
        let mut server = mockito::Server::new_async().await;
        let body = format!(
            r#"{{"os":"linux","arch":"amd64","filename":"terraform-provider-aws_5.0.0_linux_amd64.zip",
                "download_url":"{}/files/aws.zip","shasum":"{}"}}"#,
            server.url(),
            "a".repeat(64)
        );
        server
            .mock("GET", "/v1/providers/hashicorp/aws/5.0.0/download/linux/amd64")
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;

        let client = RegistryClient::new(Client::new()).with_endpoint(server.url());
        let target =
            PackageTarget::new(identity(), "5.0.0", Platform::new("linux", "amd64"));
        let descriptor = client.download_descriptor(&target).await.unwrap();
        assert_eq!(descriptor.filename, target.filename());
        assert!(descriptor.download_url.ends_with("/files/aws.zip"));
    }

    #[test]
    fn resolve_identity_rejects_bad_reference() {
        let client = RegistryClient::new(Client::new());
        assert!(matches!(
            client.resolve_identity("a//b"),
            Err(MirrorError::ReferenceParse(_))
        ));
        assert_eq!(
            client.resolve_identity("aws").unwrap().base_path(),
            "registry.terraform.io/hashicorp/aws"
        );
    }
}
