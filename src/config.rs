//! Exporter configuration
//!
//! Options are plain data; hosts populate them from their own flag surface.
//! `from_env` mirrors that surface for environment-driven deployments.

use std::path::PathBuf;

/// Options for an exporter.
#[derive(Debug, Clone, Default)]
pub struct ExporterOpts {
    /// Project to which data is sent; written requests target
    /// `projects/<project_id>`. Required.
    pub project_id: String,
    /// Test endpoint to send data to instead of the production API.
    /// Disables authentication and TLS.
    pub test_endpoint: Option<String>,
    /// Credentials file for authentication with the backend API.
    pub credentials_file: Option<PathBuf>,
}

impl ExporterOpts {
    /// Build options from environment variables:
    ///
    /// - `FANLINE_PROJECT_ID`: target project (required downstream)
    /// - `FANLINE_TEST_ENDPOINT`: plaintext test endpoint override
    /// - `FANLINE_CREDENTIALS_FILE`: credentials path
    pub fn from_env() -> Self {
        let non_empty = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };

        Self {
            project_id: non_empty("FANLINE_PROJECT_ID").unwrap_or_default(),
            test_endpoint: non_empty("FANLINE_TEST_ENDPOINT"),
            credentials_file: non_empty("FANLINE_CREDENTIALS_FILE").map(PathBuf::from),
        }
    }
}
