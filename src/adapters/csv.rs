use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};
use url::Url;

use crate::adapters::{AdapterError, SourceAdapter, SourceType};

/// Cohort probed by [`CsvAdapter::validate_connection`] unless overridden.
pub const DEFAULT_PROBE_COHORT: &str = "2";

/// Built-in cohort -> filename table.
pub fn default_cohort_files() -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            "1".to_string(),
            "Weekly Engagement Survey Breakdown (4).csv".to_string(),
        ),
        (
            "2".to_string(),
            "Cohort 2 Weekly Engagement Survey Raw Dataset.csv".to_string(),
        ),
    ])
}

/// Where the `/data/cohort-{id}/{file}` locators are resolved.
#[derive(Debug, Clone)]
enum CsvLocation {
    /// Locators are joined onto this origin and fetched over HTTP.
    Http(Url),
    /// Locators are resolved below this directory on the local filesystem.
    Dir(PathBuf),
}

/// A source adapter that serves cohort datasets stored as CSV files.
///
/// Each cohort maps to one file through a static table. The resource for a
/// cohort lives at `/data/cohort-{cohort}/{filename}` below an HTTP origin or
/// a local directory.
pub struct CsvAdapter {
    location: CsvLocation,
    cohorts: BTreeMap<String, String>,
    probe_cohort: String,
    client: reqwest::Client,
}

impl CsvAdapter {
    /// Create an adapter that fetches files from an HTTP origin.
    ///
    /// # Errors
    ///
    /// Returns `AdapterError::Config` if `base_url` is not an absolute
    /// `http`/`https` URL.
    pub fn http(base_url: &str) -> Result<Self, AdapterError> {
        let base = Url::parse(base_url)
            .map_err(|e| AdapterError::Config(format!("Invalid base URL {base_url}: {e}")))?;
        if !matches!(base.scheme(), "http" | "https") || base.cannot_be_a_base() {
            return Err(AdapterError::Config(format!(
                "Base URL must be http or https: {base_url}"
            )));
        }
        Ok(Self::with_location(CsvLocation::Http(base)))
    }

    /// Create an adapter that reads files below a local directory.
    ///
    /// # Errors
    ///
    /// Returns `AdapterError::Config` if `root` does not exist or is not a directory.
    pub fn local(root: PathBuf) -> Result<Self, AdapterError> {
        if !root.exists() {
            return Err(AdapterError::Config(format!(
                "Root path does not exist: {}",
                root.display()
            )));
        }
        if !root.is_dir() {
            return Err(AdapterError::Config(format!(
                "Root path is not a directory: {}",
                root.display()
            )));
        }
        Ok(Self::with_location(CsvLocation::Dir(root)))
    }

    fn with_location(location: CsvLocation) -> Self {
        Self {
            location,
            cohorts: default_cohort_files(),
            probe_cohort: DEFAULT_PROBE_COHORT.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Replace the cohort -> filename table.
    pub fn with_cohorts(mut self, cohorts: BTreeMap<String, String>) -> Self {
        self.cohorts = cohorts;
        self
    }

    /// Use another cohort's file for connection probes.
    pub fn with_probe_cohort(mut self, cohort: impl Into<String>) -> Self {
        self.probe_cohort = cohort.into();
        self
    }

    /// The `/data/cohort-{cohort}/{filename}` locator for a cohort.
    pub fn locator(&self, cohort: &str) -> Result<String, AdapterError> {
        let filename = self.cohorts.get(cohort).ok_or_else(|| AdapterError::NotFound {
            cohort: cohort.to_string(),
        })?;
        Ok(format!("/data/cohort-{cohort}/{filename}"))
    }

    fn fetch_error(cohort: &str, status: Option<u16>, reason: impl Into<String>) -> AdapterError {
        AdapterError::Fetch {
            cohort: cohort.to_string(),
            status,
            reason: reason.into(),
        }
    }

    async fn fetch_http(&self, base: &Url, cohort: &str, locator: &str) -> Result<String, AdapterError> {
        let url = base
            .join(locator)
            .map_err(|e| Self::fetch_error(cohort, None, format!("invalid locator {locator}: {e}")))?;

        debug!(cohort = %cohort, url = %url, "Fetching CSV over HTTP");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Self::fetch_error(cohort, None, format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::fetch_error(
                cohort,
                Some(status.as_u16()),
                status.canonical_reason().unwrap_or("Unknown status"),
            ));
        }

        response
            .text()
            .await
            .map_err(|e| Self::fetch_error(cohort, Some(status.as_u16()), format!("failed to read body: {e}")))
    }

    async fn read_local(&self, root: &Path, cohort: &str, locator: &str) -> Result<String, AdapterError> {
        let path = root.join(locator.trim_start_matches('/'));
        debug!(cohort = %cohort, path = %path.display(), "Reading CSV from disk");
        tokio::fs::read_to_string(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => Self::fetch_error(cohort, Some(404), "Not Found"),
            _ => Self::fetch_error(cohort, None, e.to_string()),
        })
    }
}

#[async_trait]
impl SourceAdapter for CsvAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::Csv
    }

    async fn load_cohort_data(&self, cohort: &str) -> Result<String, AdapterError> {
        let locator = self.locator(cohort)?;
        let result = match &self.location {
            CsvLocation::Http(base) => self.fetch_http(base, cohort, &locator).await,
            CsvLocation::Dir(root) => self.read_local(root, cohort, &locator).await,
        };
        if let Err(e) = &result {
            warn!(cohort = %cohort, locator = %locator, error = %e, "CSV load failed");
        }
        result
    }

    async fn validate_connection(&self) -> bool {
        let Ok(locator) = self.locator(&self.probe_cohort) else {
            return false;
        };
        match &self.location {
            CsvLocation::Http(base) => {
                let Ok(url) = base.join(&locator) else {
                    return false;
                };
                match self.client.head(url).send().await {
                    Ok(response) => response.status().is_success(),
                    Err(_) => false,
                }
            }
            CsvLocation::Dir(root) => {
                let path = root.join(locator.trim_start_matches('/'));
                tokio::fs::metadata(&path)
                    .await
                    .map(|meta| meta.is_file())
                    .unwrap_or(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticServer;
    use axum::http::Method;

    const COHORT_2_PATH: &str =
        "/data/cohort-2/Cohort%202%20Weekly%20Engagement%20Survey%20Raw%20Dataset.csv";

    #[test]
    fn locator_follows_cohort_layout() {
        let adapter = CsvAdapter::http("http://localhost:3000/").unwrap();
        assert_eq!(
            adapter.locator("2").unwrap(),
            "/data/cohort-2/Cohort 2 Weekly Engagement Survey Raw Dataset.csv"
        );
        assert_eq!(
            adapter.locator("1").unwrap(),
            "/data/cohort-1/Weekly Engagement Survey Breakdown (4).csv"
        );
    }

    #[test]
    fn rejects_non_http_base() {
        assert!(matches!(
            CsvAdapter::http("ftp://example.com/"),
            Err(AdapterError::Config(_))
        ));
        assert!(matches!(CsvAdapter::http("not a url"), Err(AdapterError::Config(_))));
    }

    #[test]
    fn rejects_missing_root() {
        let result = CsvAdapter::local(PathBuf::from("/definitely/not/here"));
        assert!(matches!(result, Err(AdapterError::Config(_))));
    }

    #[tokio::test]
    async fn unmapped_cohort_is_not_found_without_io() {
        let server = StaticServer::spawn(&[]).await;
        let adapter = CsvAdapter::http(server.base_url().as_str()).unwrap();

        let err = adapter.load_cohort_data("9").await.unwrap_err();
        assert_eq!(err, AdapterError::NotFound { cohort: "9".to_string() });
        assert!(server.requests().is_empty());
    }

    #[tokio::test]
    async fn missing_file_over_http_is_fetch_error_with_status_text() {
        let server = StaticServer::spawn(&[]).await;
        let adapter = CsvAdapter::http(server.base_url().as_str()).unwrap();

        let err = adapter.load_cohort_data("2").await.unwrap_err();
        match &err {
            AdapterError::Fetch { cohort, status, reason } => {
                assert_eq!(cohort, "2");
                assert_eq!(*status, Some(404));
                assert_eq!(reason, "Not Found");
            }
            other => panic!("expected fetch error, got {other:?}"),
        }
        assert!(err.to_string().contains("cohort 2"));
        assert!(err.to_string().contains("Not Found"));
        assert_eq!(server.requests(), vec![(Method::GET, COHORT_2_PATH.to_string())]);
    }

    #[tokio::test]
    async fn loads_body_over_http() {
        let server = StaticServer::spawn(&[(COHORT_2_PATH, "Name,Week\nada,1\n")]).await;
        let adapter = CsvAdapter::http(server.base_url().as_str()).unwrap();

        let body = adapter.load_cohort_data("2").await.unwrap();
        assert_eq!(body, "Name,Week\nada,1\n");
    }

    #[tokio::test]
    async fn probe_uses_head_against_probe_cohort() {
        let server = StaticServer::spawn(&[(COHORT_2_PATH, "Name\n")]).await;
        let adapter = CsvAdapter::http(server.base_url().as_str()).unwrap();

        assert!(adapter.validate_connection().await);
        assert_eq!(server.requests(), vec![(Method::HEAD, COHORT_2_PATH.to_string())]);

        let adapter = CsvAdapter::http(server.base_url().as_str())
            .unwrap()
            .with_probe_cohort("1");
        assert!(!adapter.validate_connection().await);
    }

    #[tokio::test]
    async fn probe_against_unreachable_host_is_false() {
        let adapter = CsvAdapter::http(crate::testing::closed_port_url().as_str()).unwrap();
        assert!(!adapter.validate_connection().await);
    }

    #[tokio::test]
    async fn reads_from_local_directory() {
        let dir = tempfile::tempdir().unwrap();
        let cohort_dir = dir.path().join("data/cohort-2");
        std::fs::create_dir_all(&cohort_dir).unwrap();
        std::fs::write(
            cohort_dir.join("Cohort 2 Weekly Engagement Survey Raw Dataset.csv"),
            "Name,Week\nada,1\n",
        )
        .unwrap();

        let adapter = CsvAdapter::local(dir.path().to_path_buf()).unwrap();
        assert!(adapter.validate_connection().await);
        assert_eq!(adapter.load_cohort_data("2").await.unwrap(), "Name,Week\nada,1\n");

        let err = adapter.load_cohort_data("1").await.unwrap_err();
        assert!(matches!(err, AdapterError::Fetch { status: Some(404), .. }));
    }

    #[tokio::test]
    async fn custom_cohort_table_replaces_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = CsvAdapter::local(dir.path().to_path_buf())
            .unwrap()
            .with_cohorts(BTreeMap::from([("3".to_string(), "three.csv".to_string())]));

        assert_eq!(adapter.locator("3").unwrap(), "/data/cohort-3/three.csv");
        assert!(matches!(
            adapter.load_cohort_data("2").await,
            Err(AdapterError::NotFound { .. })
        ));
        // Probe cohort "2" is no longer mapped.
        assert!(!adapter.validate_connection().await);
    }
}
