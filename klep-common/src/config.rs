// klep-common/src/config.rs
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use tracing::debug;

use super::error::{KlepError, Result};

pub const MANIFEST_FILENAME: &str = "klep.json";
pub const SNAPSHOT_FILENAME: &str = "klep.lock";

const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_EXPANSIONS: usize = 100_000;
const DEFAULT_FAST_AGGRESSIVENESS: u32 = 4;
// GitHub-style raw content layout; {repo} is the address without scheme and `.git`.
const DEFAULT_RAW_URL_TEMPLATE: &str = "https://raw.githubusercontent.com/{repo}/{ref}/{file}";

#[derive(Debug, Clone)]
pub struct Config {
    pub project_root: PathBuf,
    pub query_timeout: Duration,
    pub max_concurrent_queries: usize,
    pub max_expansions: usize,
    pub fast_aggressiveness: u32,
    pub raw_url_template: String,
    pub github_api_token: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        debug!("Loading klep configuration");

        let project_root = match env::var("KLEP_ROOT").ok().filter(|s| !s.is_empty()) {
            Some(root) => PathBuf::from(root),
            None => env::current_dir()?,
        };
        debug!("Effective project root: {}", project_root.display());

        let query_timeout = match env::var("KLEP_QUERY_TIMEOUT").ok() {
            Some(raw) => humantime::parse_duration(&raw).map_err(|e| {
                KlepError::Config(format!("KLEP_QUERY_TIMEOUT '{raw}' is not a duration: {e}"))
            })?,
            None => DEFAULT_QUERY_TIMEOUT,
        };

        let max_concurrent_queries = parse_env_number("KLEP_MAX_CONCURRENT_QUERIES")?
            .unwrap_or_else(|| (num_cpus::get() * 2).clamp(2, 16));
        let max_expansions =
            parse_env_number("KLEP_MAX_EXPANSIONS")?.unwrap_or(DEFAULT_MAX_EXPANSIONS);
        let fast_aggressiveness = parse_env_number("KLEP_FAST_AGGRESSIVENESS")?
            .map(|n| n as u32)
            .unwrap_or(DEFAULT_FAST_AGGRESSIVENESS);

        let raw_url_template = env::var("KLEP_RAW_URL_TEMPLATE")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_RAW_URL_TEMPLATE.to_string());
        let github_api_token = env::var("KLEP_GITHUB_TOKEN").ok();

        let config = Self {
            project_root,
            query_timeout,
            max_concurrent_queries,
            max_expansions,
            fast_aggressiveness,
            raw_url_template,
            github_api_token,
        };
        config.validate()?;
        debug!("Configuration loaded successfully.");
        Ok(config)
    }

    /// Configuration rooted at `project_root` with every other knob at its default.
    pub fn for_project(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            max_concurrent_queries: 8,
            max_expansions: DEFAULT_MAX_EXPANSIONS,
            fast_aggressiveness: DEFAULT_FAST_AGGRESSIVENESS,
            raw_url_template: DEFAULT_RAW_URL_TEMPLATE.to_string(),
            github_api_token: None,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.max_concurrent_queries == 0 {
            return Err(KlepError::Config(
                "KLEP_MAX_CONCURRENT_QUERIES must be at least 1".to_string(),
            ));
        }
        if self.fast_aggressiveness == 0 {
            return Err(KlepError::Config(
                "KLEP_FAST_AGGRESSIVENESS must be at least 1".to_string(),
            ));
        }
        if !self.raw_url_template.contains("{ref}") || !self.raw_url_template.contains("{file}") {
            return Err(KlepError::Config(format!(
                "KLEP_RAW_URL_TEMPLATE '{}' must contain {{ref}} and {{file}}",
                self.raw_url_template
            )));
        }
        Ok(())
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.project_root.join(MANIFEST_FILENAME)
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.project_root.join(SNAPSHOT_FILENAME)
    }

    pub fn logs_dir(&self) -> PathBuf {
        project_dirs().map_or_else(
            || self.project_root.join(".klep").join("logs"),
            |dirs| dirs.data_local_dir().join("logs"),
        )
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "klep")
}

fn parse_env_number(key: &str) -> Result<Option<usize>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|e| KlepError::Config(format!("{key} '{raw}' is not a number: {e}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_paths_hang_off_the_root() {
        let config = Config::for_project("/work/app");
        assert_eq!(config.manifest_path(), PathBuf::from("/work/app/klep.json"));
        assert_eq!(config.snapshot_path(), PathBuf::from("/work/app/klep.lock"));
        assert_eq!(config.query_timeout, Duration::from_secs(10));
    }

    #[test]
    fn template_without_placeholders_is_rejected() {
        let mut config = Config::for_project("/work/app");
        config.raw_url_template = "https://example.com/static".to_string();
        assert!(matches!(config.validate(), Err(KlepError::Config(_))));
    }

    #[test]
    fn zero_fan_out_is_rejected() {
        let mut config = Config::for_project("/work/app");
        config.max_concurrent_queries = 0;
        assert!(config.validate().is_err());
    }
}
