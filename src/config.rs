use anyhow::{Context, Result};
use log::debug;
use reqwest::{
    Client,
    header::{ACCEPT, HeaderMap, HeaderValue},
};
use std::path::PathBuf;

use crate::runtime::Runtime;

pub const DEFAULT_DETAILS_URL: &str = "https://search.apps.ubuntu.com/api/v1/package/";
pub const DEFAULT_BULK_URL: &str = "https://search.apps.ubuntu.com/api/v1/click-metadata";
pub const DEFAULT_SYSTEM_IMAGE_URL: &str = "https://system-image.ubuntu.com";
pub const DEFAULT_HOME_ROOT: &str = "/home";
pub const USER_AGENT: &str = "snapcore";

/// Settings as given on the command line or in the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOptions {
    pub apps_root: Option<PathBuf>,
    pub home_root: Option<PathBuf>,
    pub details_url: Option<String>,
    pub bulk_url: Option<String>,
    pub system_image_url: Option<String>,
    pub channel: Option<String>,
    pub system_image_root: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemImageConfig {
    pub root: PathBuf,
    pub server: String,
    /// Falls back to the active slot's channel when unset
    pub channel: Option<String>,
}

/// Resolved paths and endpoints. Built once and passed down; nothing reads
/// the environment afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    pub apps_root: PathBuf,
    pub home_root: PathBuf,
    pub details_url: String,
    pub bulk_url: String,
    pub system_image: Option<SystemImageConfig>,
    pub client: Client,
}

impl Config {
    pub fn new<R: Runtime>(runtime: &R, options: ConfigOptions) -> Result<Self> {
        let apps_root = match options.apps_root {
            Some(root) => root,
            None => default_apps_root(runtime)?,
        };
        let system_image = options.system_image_root.map(|root| SystemImageConfig {
            root,
            server: options
                .system_image_url
                .unwrap_or_else(|| DEFAULT_SYSTEM_IMAGE_URL.to_string()),
            channel: options.channel,
        });

        let config = Self {
            apps_root,
            home_root: options
                .home_root
                .unwrap_or_else(|| PathBuf::from(DEFAULT_HOME_ROOT)),
            details_url: options
                .details_url
                .unwrap_or_else(|| DEFAULT_DETAILS_URL.to_string()),
            bulk_url: options
                .bulk_url
                .unwrap_or_else(|| DEFAULT_BULK_URL.to_string()),
            system_image,
            client: build_client()?,
        };
        debug!("Using apps root {:?}", config.apps_root);
        Ok(config)
    }
}

/// `/apps` for root, `~/.snapcore/apps` otherwise.
pub fn default_apps_root<R: Runtime>(runtime: &R) -> Result<PathBuf> {
    if runtime.is_privileged() {
        Ok(PathBuf::from("/apps"))
    } else {
        let home_dir = runtime
            .home_dir()
            .context("Could not find home directory")?;
        Ok(home_dir.join(".snapcore").join("apps"))
    }
}

/// Architecture name the catalog uses for this host.
pub fn architecture() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "i386",
        "arm" => "armhf",
        other => other,
    }
}

pub fn build_client() -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(
        "x-ubuntu-architecture",
        HeaderValue::from_static(architecture()),
    );

    Client::builder()
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .build()
        .context("Failed to build HTTP client")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;
    use mockito::Server;

    #[test]
    fn test_default_apps_root_unprivileged() {
        let mut runtime = MockRuntime::new();
        runtime.expect_is_privileged().returning(|| false);
        runtime
            .expect_home_dir()
            .returning(|| Some(PathBuf::from("/home/user")));

        assert_eq!(
            default_apps_root(&runtime).unwrap(),
            PathBuf::from("/home/user/.snapcore/apps")
        );
    }

    #[test]
    fn test_default_apps_root_privileged() {
        let mut runtime = MockRuntime::new();
        runtime.expect_is_privileged().returning(|| true);

        assert_eq!(default_apps_root(&runtime).unwrap(), PathBuf::from("/apps"));
    }

    #[test]
    fn test_default_apps_root_without_home() {
        let mut runtime = MockRuntime::new();
        runtime.expect_is_privileged().returning(|| false);
        runtime.expect_home_dir().returning(|| None);

        assert!(default_apps_root(&runtime).is_err());
    }

    #[test]
    fn test_config_defaults() {
        // An explicit root means the runtime is never consulted
        let runtime = MockRuntime::new();
        let config = Config::new(
            &runtime,
            ConfigOptions {
                apps_root: Some(PathBuf::from("/tmp/apps")),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(config.apps_root, PathBuf::from("/tmp/apps"));
        assert_eq!(config.home_root, PathBuf::from(DEFAULT_HOME_ROOT));
        assert_eq!(config.details_url, DEFAULT_DETAILS_URL);
        assert_eq!(config.bulk_url, DEFAULT_BULK_URL);
        assert_eq!(config.system_image, None);
    }

    #[test]
    fn test_system_image_needs_root() {
        let runtime = MockRuntime::new();
        let config = Config::new(
            &runtime,
            ConfigOptions {
                apps_root: Some(PathBuf::from("/tmp/apps")),
                system_image_root: Some(PathBuf::from("/writable/system-image")),
                channel: Some("stable".into()),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(
            config.system_image,
            Some(SystemImageConfig {
                root: PathBuf::from("/writable/system-image"),
                server: DEFAULT_SYSTEM_IMAGE_URL.to_string(),
                channel: Some("stable".into()),
            })
        );
    }

    #[tokio::test]
    async fn test_client_sends_catalog_headers() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/")
            .match_header("user-agent", USER_AGENT)
            .match_header("accept", "application/json")
            .match_header("x-ubuntu-architecture", architecture())
            .create_async()
            .await;

        let client = build_client().unwrap();
        let _ = client.get(server.url()).send().await;

        mock.assert_async().await;
    }
}
