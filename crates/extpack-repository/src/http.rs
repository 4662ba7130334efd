use std::io::Read;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use extpack_core::{Extension, ExtensionError, ExtensionResult, RepositoryId};
use extpack_security::{sha256_hex, SignatureVerifier};
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use semver::Version;

use crate::index::{sort_newest_first, verify_descriptor, INDEX_DIR, PUBLIC_KEY_FILE};

const VERSIONS_FILE: &str = "versions";
const NAMES_FILE: &str = "names";

/// The filesystem index layout served over HTTP(S). `index/<id>/versions`
/// lists one version per line and `index/names` lists every id.
#[derive(Debug, Clone)]
pub struct HttpRepository {
    id: RepositoryId,
    base_url: String,
    client: Client,
    verifier: SignatureVerifier,
    fingerprint: String,
}

impl HttpRepository {
    pub fn open(
        name: impl Into<String>,
        base_url: &str,
        timeout: Duration,
        expected_fingerprint: Option<&str>,
    ) -> Result<Self> {
        let name = name.into();
        let base_url = base_url.trim_end_matches('/').to_string();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed building HTTP client")?;

        let key_url = join_url(&base_url, PUBLIC_KEY_FILE);
        let key_raw = fetch_bytes(&client, &key_url)?
            .ok_or_else(|| anyhow!("repository key not found: {key_url}"))?;
        let fingerprint = sha256_hex(&key_raw);
        if let Some(expected) = expected_fingerprint {
            if !fingerprint.eq_ignore_ascii_case(expected.trim()) {
                return Err(anyhow!(
                    "repository-fingerprint-mismatch: '{name}' key fingerprint is {fingerprint}, expected {expected}"
                ));
            }
        }
        let key_hex = String::from_utf8(key_raw)
            .with_context(|| format!("repository key is not valid UTF-8: {key_url}"))?;
        let verifier = SignatureVerifier::from_hex(&key_hex)
            .with_context(|| format!("invalid repository key: {key_url}"))?;

        Ok(Self {
            id: RepositoryId::remote(name),
            base_url,
            client,
            verifier,
            fingerprint,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn load_versions(&self, id: &str) -> Result<Vec<Extension>> {
        let list_url = join_url(&self.base_url, &format!("{INDEX_DIR}/{id}/{VERSIONS_FILE}"));
        let Some(listing) = fetch_text(&self.client, &list_url)? else {
            return Ok(Vec::new());
        };

        let mut manifests = Vec::new();
        for line in listing.lines().map(str::trim).filter(|line| !line.is_empty()) {
            let version = Version::parse(line)
                .with_context(|| format!("invalid version '{line}' listed in {list_url}"))?;
            let descriptor_url =
                join_url(&self.base_url, &format!("{INDEX_DIR}/{id}/{version}.toml"));
            let descriptor_bytes = fetch_bytes(&self.client, &descriptor_url)?
                .ok_or_else(|| anyhow!("listed descriptor is missing: {descriptor_url}"))?;
            let signature_url = format!("{descriptor_url}.sig");
            let signature_hex = fetch_text(&self.client, &signature_url)?
                .ok_or_else(|| anyhow!("descriptor signature is missing: {signature_url}"))?;

            manifests.push(verify_descriptor(
                &self.verifier,
                descriptor_bytes,
                &signature_hex,
                id,
                Some(&version),
                &descriptor_url,
            )?);
        }

        sort_newest_first(&mut manifests);
        Ok(manifests
            .into_iter()
            .map(|manifest| manifest.into_extension(self.id.clone()))
            .collect())
    }

    fn load_names(&self, needle: &str) -> Result<Vec<String>> {
        let names_url = join_url(&self.base_url, &format!("{INDEX_DIR}/{NAMES_FILE}"));
        let Some(listing) = fetch_text(&self.client, &names_url)? else {
            return Ok(Vec::new());
        };
        let mut names: Vec<String> = listing
            .lines()
            .map(str::trim)
            .filter(|name| !name.is_empty() && name.contains(needle))
            .map(ToOwned::to_owned)
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

impl crate::Repository for HttpRepository {
    fn id(&self) -> &RepositoryId {
        &self.id
    }

    fn versions(&self, id: &str) -> ExtensionResult<Vec<Extension>> {
        self.load_versions(id)
            .map_err(|err| ExtensionError::collect_from(self.id.to_string(), &err))
    }

    fn search(&self, needle: &str) -> ExtensionResult<Vec<String>> {
        self.load_names(needle)
            .map_err(|err| ExtensionError::collect_from(self.id.to_string(), &err))
    }

    fn open_artifact(&self, extension: &Extension) -> ExtensionResult<Box<dyn Read + Send>> {
        let artifact = extension.artifact.as_ref().ok_or_else(|| {
            ExtensionError::collect(
                self.id.to_string(),
                format!("extension '{}' has no artifact", extension.id),
            )
        })?;
        let url = join_url(&self.base_url, &artifact.url);
        let response = send(&self.client, &url)
            .and_then(|response| {
                response.ok_or_else(|| anyhow!("artifact not found: {url}"))
            })
            .map_err(|err| ExtensionError::collect_from(self.id.to_string(), &err))?;
        Ok(Box::new(response))
    }
}

/// Absolute `http(s)://` references pass through; anything else is joined
/// onto `base_url`.
pub(crate) fn join_url(base_url: &str, reference: &str) -> String {
    if reference.starts_with("http://") || reference.starts_with("https://") {
        return reference.to_string();
    }
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        reference.trim_start_matches('/')
    )
}

fn send(client: &Client, url: &str) -> Result<Option<Response>> {
    let response = client
        .get(url)
        .send()
        .with_context(|| format!("request failed: {url}"))?;
    if response.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    let response = response
        .error_for_status()
        .with_context(|| format!("request rejected: {url}"))?;
    Ok(Some(response))
}

fn fetch_bytes(client: &Client, url: &str) -> Result<Option<Vec<u8>>> {
    let Some(response) = send(client, url)? else {
        return Ok(None);
    };
    let bytes = response
        .bytes()
        .with_context(|| format!("failed reading response body: {url}"))?;
    Ok(Some(bytes.to_vec()))
}

fn fetch_text(client: &Client, url: &str) -> Result<Option<String>> {
    let Some(response) = send(client, url)? else {
        return Ok(None);
    };
    let text = response
        .text()
        .with_context(|| format!("failed reading response body: {url}"))?;
    Ok(Some(text))
}
