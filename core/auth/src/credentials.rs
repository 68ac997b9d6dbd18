//! Secrets file loading and validation.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use integrator_common::{extract_folder_id, Error, Result};

/// Microsoft Graph v1.0 endpoint.
pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";
/// File name looked up in the downloads directory when no path is given.
pub const DEFAULT_SECRETS_FILE: &str = "OneDriveConfig.json";

/// Secrets file as written on disk. Every field is optional here so that
/// validation can name exactly what is missing.
#[derive(Debug, Default, Deserialize)]
struct RawSecrets {
    #[serde(rename = "CLIENT_ID")]
    client_id: Option<String>,
    #[serde(rename = "AUTHORITY")]
    authority: Option<String>,
    #[serde(rename = "SCOPES")]
    scopes: Option<Vec<String>>,
    #[serde(rename = "BASE_FOLDER_URL")]
    base_folder_url: Option<String>,
    #[serde(rename = "GRAPH_API_BASE_URL")]
    graph_base_url: Option<String>,
}

/// Public-client identity and API settings. Immutable after load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    client_id: String,
    authority: String,
    scopes: Vec<String>,
    base_folder_url: Option<String>,
    graph_base_url: String,
}

impl Credentials {
    /// Load and validate a secrets file.
    ///
    /// # Errors
    /// - `Error::Config` if the file is missing, unreadable, not JSON, or
    ///   lacks a required field
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Cannot read secrets file {}: {}",
                path.display(),
                e
            ))
        })?;

        Self::from_json(&contents).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{} in {}", msg, path.display())),
            other => other,
        })
    }

    /// Parse and validate secrets from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawSecrets = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Malformed secrets file: {}", e)))?;
        Self::validate(raw)
    }

    fn validate(raw: RawSecrets) -> Result<Self> {
        let client_id = required(raw.client_id, "CLIENT_ID")?;

        let authority = required(raw.authority, "AUTHORITY")?;
        let parsed = Url::parse(&authority)
            .map_err(|e| Error::Config(format!("AUTHORITY is not a valid URL: {}", e)))?;
        if parsed.scheme() != "https" && parsed.scheme() != "http" {
            return Err(Error::Config(format!(
                "AUTHORITY must be an http(s) URL, got scheme '{}'",
                parsed.scheme()
            )));
        }

        let scopes = raw
            .scopes
            .ok_or_else(|| Error::Config("Missing required field SCOPES".to_string()))?;
        if scopes.is_empty() {
            return Err(Error::Config("SCOPES must not be empty".to_string()));
        }
        if scopes.iter().any(|s| s.trim().is_empty()) {
            return Err(Error::Config("SCOPES contains an empty scope".to_string()));
        }

        let base_folder_url = raw.base_folder_url.filter(|u| !u.trim().is_empty());

        let graph_base_url = raw
            .graph_base_url
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_GRAPH_BASE_URL.to_string());
        Url::parse(&graph_base_url)
            .map_err(|e| Error::Config(format!("GRAPH_API_BASE_URL is not a valid URL: {}", e)))?;

        Ok(Self {
            client_id,
            authority: authority.trim_end_matches('/').to_string(),
            scopes,
            base_folder_url,
            graph_base_url: graph_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Default secrets location: `<downloads>/OneDriveConfig.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::download_dir()
            .or_else(|| dirs::home_dir().map(|h| h.join("Downloads")))
            .map(|d| d.join(DEFAULT_SECRETS_FILE))
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Authority URL without trailing slash.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    pub fn base_folder_url(&self) -> Option<&str> {
        self.base_folder_url.as_deref()
    }

    /// Graph API base URL without trailing slash.
    pub fn graph_base_url(&self) -> &str {
        &self.graph_base_url
    }

    /// Folder id encoded in `BASE_FOLDER_URL`, if one was configured.
    ///
    /// # Errors
    /// - `Error::Config` if the URL carries no `id` parameter
    pub fn base_folder_id(&self) -> Result<Option<String>> {
        self.base_folder_url
            .as_deref()
            .map(extract_folder_id)
            .transpose()
    }

    pub fn authorize_endpoint(&self) -> String {
        format!("{}/oauth2/v2.0/authorize", self.authority)
    }

    pub fn token_endpoint(&self) -> String {
        format!("{}/oauth2/v2.0/token", self.authority)
    }

    pub fn device_code_endpoint(&self) -> String {
        format!("{}/oauth2/v2.0/devicecode", self.authority)
    }
}

fn required(value: Option<String>, field: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        Some(_) => Err(Error::Config(format!("Field {} must not be empty", field))),
        None => Err(Error::Config(format!("Missing required field {}", field))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const VALID: &str = r#"{
        "CLIENT_ID": "84ff9f0b-8484-4cf3-a033-d68d325a0254",
        "AUTHORITY": "https://login.microsoftonline.com/common/",
        "SCOPES": ["Files.ReadWrite.All"],
        "BASE_FOLDER_URL": "https://onedrive.live.com/?id=66899B659FC7C342%21171081&cid=66899B659FC7C342"
    }"#;

    fn write_secrets(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_valid() {
        let file = write_secrets(VALID);
        let creds = Credentials::load(file.path()).unwrap();

        assert_eq!(creds.client_id(), "84ff9f0b-8484-4cf3-a033-d68d325a0254");
        assert_eq!(creds.authority(), "https://login.microsoftonline.com/common");
        assert_eq!(creds.scopes(), &["Files.ReadWrite.All".to_string()]);
        assert_eq!(creds.graph_base_url(), DEFAULT_GRAPH_BASE_URL);
        assert_eq!(
            creds.base_folder_id().unwrap().as_deref(),
            Some("66899B659FC7C342!171081")
        );
        assert_eq!(
            creds.token_endpoint(),
            "https://login.microsoftonline.com/common/oauth2/v2.0/token"
        );
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Credentials::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_malformed_json() {
        let file = write_secrets("{ \"CLIENT_ID\": ");
        assert!(matches!(
            Credentials::load(file.path()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_missing_required_fields() {
        let cases = [
            (r#"{"AUTHORITY": "https://a", "SCOPES": ["x"]}"#, "CLIENT_ID"),
            (r#"{"CLIENT_ID": "c", "SCOPES": ["x"]}"#, "AUTHORITY"),
            (r#"{"CLIENT_ID": "c", "AUTHORITY": "https://a"}"#, "SCOPES"),
            (r#"{"CLIENT_ID": " ", "AUTHORITY": "https://a", "SCOPES": ["x"]}"#, "CLIENT_ID"),
        ];

        for (json, field) in cases {
            match Credentials::from_json(json) {
                Err(Error::Config(msg)) => assert!(msg.contains(field), "{}: {}", field, msg),
                other => panic!("expected config error for {}, got {:?}", field, other),
            }
        }
    }

    #[test]
    fn test_invalid_field_shapes() {
        // SCOPES must be an array of strings
        assert!(matches!(
            Credentials::from_json(r#"{"CLIENT_ID": "c", "AUTHORITY": "https://a", "SCOPES": "x"}"#),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Credentials::from_json(r#"{"CLIENT_ID": "c", "AUTHORITY": "https://a", "SCOPES": []}"#),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Credentials::from_json(r#"{"CLIENT_ID": "c", "AUTHORITY": "login", "SCOPES": ["x"]}"#),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Credentials::from_json(r#"["CLIENT_ID"]"#),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_optional_fields() {
        let creds = Credentials::from_json(
            r#"{"CLIENT_ID": "c", "AUTHORITY": "https://a", "SCOPES": ["x"],
                "GRAPH_API_BASE_URL": "http://127.0.0.1:9000/v1.0/"}"#,
        )
        .unwrap();

        assert_eq!(creds.base_folder_url(), None);
        assert_eq!(creds.base_folder_id().unwrap(), None);
        assert_eq!(creds.graph_base_url(), "http://127.0.0.1:9000/v1.0");
    }

    #[test]
    fn test_base_folder_without_id() {
        let creds = Credentials::from_json(
            r#"{"CLIENT_ID": "c", "AUTHORITY": "https://a", "SCOPES": ["x"],
                "BASE_FOLDER_URL": "https://x/?cid=ABC"}"#,
        )
        .unwrap();

        assert!(matches!(creds.base_folder_id(), Err(Error::Config(_))));
    }
}
