// klep-net/src/validation.rs
use klep_common::error::{KlepError, Result};
use url::Url;

const ALLOWED_SCHEMES: [&str; 5] = ["https", "http", "ssh", "git", "file"];

/// Host and repository path of an address, the path without `.git`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryLocation {
    pub host: String,
    pub path: String,
}

/// Validates a repository address. Accepts URLs with a git-capable scheme
/// and scp-like `user@host:owner/repo` addresses.
pub fn validate_url(url_str: &str) -> Result<()> {
    if let Some((host, path)) = split_scp_like(url_str) {
        if host.is_empty() || path.is_empty() {
            return Err(KlepError::Argument(format!(
                "Repository address '{url_str}' is missing a host or a path"
            )));
        }
        return Ok(());
    }
    let url = Url::parse(url_str)
        .map_err(|e| KlepError::Argument(format!("Failed to parse URL '{url_str}': {e}")))?;
    if ALLOWED_SCHEMES.contains(&url.scheme()) {
        Ok(())
    } else {
        Err(KlepError::Argument(format!(
            "Invalid URL scheme for '{}': must be one of {}, but got '{}'",
            url_str,
            ALLOWED_SCHEMES.join(", "),
            url.scheme()
        )))
    }
}

/// Splits a remote address into host and repository path.
pub fn repository_location(url_str: &str) -> Result<RepositoryLocation> {
    validate_url(url_str)?;
    let (host, path) = match split_scp_like(url_str) {
        Some((host, path)) => (host.to_string(), path.to_string()),
        None => {
            let url = Url::parse(url_str)
                .map_err(|e| KlepError::Argument(format!("Failed to parse URL '{url_str}': {e}")))?;
            let host = url.host_str().unwrap_or_default().to_string();
            (host, url.path().to_string())
        }
    };
    let path = path
        .trim_matches('/')
        .trim_end_matches(".git")
        .to_string();
    if path.is_empty() {
        return Err(KlepError::Argument(format!(
            "Repository address '{url_str}' has no repository path"
        )));
    }
    Ok(RepositoryLocation { host, path })
}

// `git@github.com:owner/repo.git`: no scheme, a colon before the first slash.
fn split_scp_like(address: &str) -> Option<(&str, &str)> {
    if address.contains("://") {
        return None;
    }
    let (authority, path) = address.split_once(':')?;
    if authority.contains('/') {
        return None;
    }
    let host = authority.rsplit('@').next().unwrap_or(authority);
    Some((host, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_git_capable_schemes() {
        assert!(validate_url("https://github.com/acme/lib.git").is_ok());
        assert!(validate_url("ssh://git@github.com/acme/lib").is_ok());
        assert!(validate_url("file:///srv/repos/lib").is_ok());
        assert!(validate_url("git@github.com:acme/lib.git").is_ok());
        assert!(matches!(
            validate_url("ftp://example.com/lib"),
            Err(KlepError::Argument(_))
        ));
        assert!(validate_url("not a url").is_err());
    }

    #[test]
    fn locations_strip_the_git_suffix() {
        let https = repository_location("https://github.com/acme/lib.git").unwrap();
        assert_eq!(https.host, "github.com");
        assert_eq!(https.path, "acme/lib");

        let scp = repository_location("git@gitlab.com:group/sub/tool.git").unwrap();
        assert_eq!(scp.host, "gitlab.com");
        assert_eq!(scp.path, "group/sub/tool");
    }
}
