// klep-net/src/http.rs
use std::sync::Arc;
use std::time::Duration;

use klep_common::config::Config;
use klep_common::error::{KlepError, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use tracing::{debug, error};

use crate::validation::repository_location;

const CONNECT_TIMEOUT_SECS: u64 = 10;
const USER_AGENT_STRING: &str = "klep package manager (Rust; +https://github.com/alexykn/klep)";

/// Fetches single files from a repository host's raw-content endpoint.
#[derive(Debug, Clone)]
pub struct RawDocumentFetcher {
    client: Client,
    template: String,
}

impl RawDocumentFetcher {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            client: build_http_client(config.query_timeout, config.github_api_token.as_deref())?,
            template: config.raw_url_template.clone(),
        })
    }

    /// Body of `file` at `git_ref`, or `None` when the host has no such file.
    pub fn fetch(&self, address: &str, git_ref: &str, file: &str) -> Result<Option<String>> {
        let url = raw_document_url(&self.template, address, git_ref, file)?;
        debug!("Fetching raw document {}", url);

        let response = self.client.get(&url).send().map_err(|e| {
            debug!("HTTP request failed for {url}: {e}");
            KlepError::repository(address, format!("request for {file} at {git_ref} failed: {e}"))
        })?;
        let status = response.status();
        debug!("Received HTTP status: {} for {}", status, url);

        match status {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => response.text().map(Some).map_err(|e| KlepError::Http(Arc::new(e))),
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => Err(KlepError::repository(
                address,
                format!("access to {file} at {git_ref} was denied ({status})"),
            )),
            _ => {
                error!("HTTP error {} for URL {}", status, url);
                Err(KlepError::repository(
                    address,
                    format!("HTTP error {status} fetching {file} at {git_ref}"),
                ))
            }
        }
    }
}

/// Expands a raw-content URL template. Recognised placeholders are
/// `{host}`, `{repo}` (repository path without `.git`), `{ref}` and `{file}`.
pub fn raw_document_url(template: &str, address: &str, git_ref: &str, file: &str) -> Result<String> {
    let location = repository_location(address)?;
    Ok(template
        .replace("{host}", &location.host)
        .replace("{repo}", &location.path)
        .replace("{ref}", git_ref)
        .replace("{file}", file))
}

fn build_http_client(timeout: Duration, token: Option<&str>) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_STRING));
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    if let Some(token) = token {
        let value = HeaderValue::from_str(&format!("token {token}"))
            .map_err(|e| KlepError::Config(format!("KLEP_GITHUB_TOKEN is not a valid header: {e}")))?;
        headers.insert(AUTHORIZATION, value);
    }
    Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS).min(timeout))
        .default_headers(headers)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(|e| KlepError::Http(Arc::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_the_default_template() {
        let url = raw_document_url(
            "https://raw.githubusercontent.com/{repo}/{ref}/{file}",
            "https://github.com/acme/lib.git",
            "v1.2.0",
            "klep.lock",
        )
        .unwrap();
        assert_eq!(url, "https://raw.githubusercontent.com/acme/lib/v1.2.0/klep.lock");
    }

    #[test]
    fn expands_host_placeholders() {
        let url = raw_document_url(
            "https://{host}/{repo}/-/raw/{ref}/{file}",
            "git@gitlab.com:group/tool.git",
            "main",
            "klep.json",
        )
        .unwrap();
        assert_eq!(url, "https://gitlab.com/group/tool/-/raw/main/klep.json");
    }

    #[test]
    fn rejects_unusable_addresses() {
        assert!(raw_document_url("{repo}", "ftp://example.com/x", "main", "klep.json").is_err());
    }
}
