//! Run configuration assembled once at startup.
//!
//! Nothing below the binary reads the process environment. The binary collects
//! raw values (flags, env, files) and this module turns them into validated,
//! explicit structs that are passed into constructors.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use adprompt_ai::PromptTemplate;
use adprompt_core::DomainError;

use crate::jobs::BatchConfig;
use crate::work_store::WorkTable;

/// Environment variable holding the delimited credential string.
pub const CREDENTIALS_ENV: &str = "GEMINI_COOKIES";

/// Required session credential.
pub const PRIMARY_CREDENTIAL: &str = "__Secure-1PSID";

/// Optional companion credential, sent when present.
pub const SECONDARY_CREDENTIAL: &str = "__Secure-1PSIDTS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("invalid {field}: {message}")]
    Invalid { field: &'static str, message: String },

    #[error("no session credentials: GEMINI_COOKIES is unset or empty and {path} could not be used ({reason})")]
    CredentialsUnavailable { path: PathBuf, reason: String },

    #[error("session credentials from {source_name} lack {key}")]
    MissingCredential {
        key: &'static str,
        source_name: String,
    },

    #[error("cannot read template file {path}: {source}")]
    TemplateFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Session credentials for the generation backend.
///
/// `Debug` never prints the values.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredentials {
    primary: String,
    secondary: Option<String>,
}

impl SessionCredentials {
    pub fn new(primary: impl Into<String>, secondary: Option<String>) -> Self {
        Self {
            primary: primary.into(),
            secondary,
        }
    }

    /// Pick the two known keys out of parsed entries.
    pub fn from_entries(
        entries: &BTreeMap<String, String>,
        source: &CredentialSource,
    ) -> Result<Self, ConfigError> {
        let primary = entries
            .get(PRIMARY_CREDENTIAL)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ConfigError::MissingCredential {
                key: PRIMARY_CREDENTIAL,
                source_name: source.to_string(),
            })?;
        let secondary = entries
            .get(SECONDARY_CREDENTIAL)
            .filter(|v| !v.is_empty())
            .cloned();
        Ok(Self::new(primary.clone(), secondary))
    }

    pub fn primary(&self) -> &str {
        &self.primary
    }

    pub fn secondary(&self) -> Option<&str> {
        self.secondary.as_deref()
    }

    /// Cookie header value carrying both credentials.
    pub fn cookie_header(&self) -> String {
        match &self.secondary {
            Some(ts) => format!("{PRIMARY_CREDENTIAL}={}; {SECONDARY_CREDENTIAL}={ts}", self.primary),
            None => format!("{PRIMARY_CREDENTIAL}={}", self.primary),
        }
    }

    /// Short preview safe for logs: at most the first 8 characters.
    pub fn redacted(&self) -> String {
        let head: String = self.primary.chars().take(8).collect();
        format!("{head}...")
    }
}

impl fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("primary", &self.redacted())
            .field("secondary", &self.secondary.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Where the credentials came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    Environment,
    File(PathBuf),
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Environment => write!(f, "${CREDENTIALS_ENV}"),
            CredentialSource::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Parse `KEY=value;KEY=value`.
///
/// Entries are trimmed, entries without `=` are ignored, and each entry is
/// split on its first `=` only, so values may contain `=`. Later duplicates win.
pub fn parse_credential_string(raw: &str) -> BTreeMap<String, String> {
    raw.split(';')
        .map(str::trim)
        .filter_map(|entry| entry.split_once('='))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// Resolve credentials: the environment string wins; the file is consulted
/// only when that string is absent or yields no entries.
pub fn load_credentials(
    env_value: Option<&str>,
    file: &Path,
) -> Result<(SessionCredentials, CredentialSource), ConfigError> {
    if let Some(raw) = env_value {
        let entries = parse_credential_string(raw);
        if !entries.is_empty() {
            let source = CredentialSource::Environment;
            let creds = SessionCredentials::from_entries(&entries, &source)?;
            return Ok((creds, source));
        }
    }

    let raw = std::fs::read_to_string(file).map_err(|e| ConfigError::CredentialsUnavailable {
        path: file.to_path_buf(),
        reason: e.to_string(),
    })?;
    let entries = parse_credential_string(raw.trim());
    let source = CredentialSource::File(file.to_path_buf());
    let creds = SessionCredentials::from_entries(&entries, &source)?;
    Ok((creds, source))
}

/// How to reach the generation backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub base_url: String,
    pub model: String,
    /// The collaborator's own per-call timeout; the job adds no other deadline.
    pub timeout: Duration,
}

impl BackendConfig {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self, ConfigError> {
        let base_url = base_url.into().trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ConfigError::Missing("backend url"));
        }
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                field: "backend url",
                message: format!("'{base_url}' is not an http(s) URL"),
            });
        }
        let model = model.into();
        if model.trim().is_empty() {
            return Err(ConfigError::Missing("model"));
        }
        if timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "backend timeout",
                message: "must be positive".to_string(),
            });
        }
        Ok(Self {
            base_url,
            model,
            timeout,
        })
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

/// Everything one job invocation needs.
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub database_url: String,
    /// How long to wait for the first database connection.
    pub database_connect_timeout: Duration,
    pub table: WorkTable,
    pub backend: BackendConfig,
    pub credentials: SessionCredentials,
    pub credential_source: CredentialSource,
    pub template: PromptTemplate,
    pub batch: BatchConfig,
    pub batch_limit: usize,
    pub record_cap: Option<usize>,
}

impl JobConfig {
    /// Checks that span several fields.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::Missing("database url"));
        }
        if self.database_connect_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "database connect timeout",
                message: "must be positive".to_string(),
            });
        }
        if self.batch.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "max attempts",
                message: "at least one attempt is required".to_string(),
            });
        }
        Ok(())
    }
}

/// Built-in template, or the one in `path` (which must contain `{title}`).
pub fn load_template(path: Option<&Path>, echo_marker: &str) -> Result<PromptTemplate, ConfigError> {
    let text = match path {
        Some(path) => std::fs::read_to_string(path).map_err(|source| ConfigError::TemplateFile {
            path: path.to_path_buf(),
            source,
        })?,
        None => PromptTemplate::default().text().to_string(),
    };
    Ok(PromptTemplate::new(text, echo_marker)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use adprompt_ai::DEFAULT_ECHO_MARKER;

    fn cookie_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn parses_delimited_entries() {
        let parsed = parse_credential_string(
            " __Secure-1PSID=abc==; junk ;__Secure-1PSIDTS = x; NID=1=2 ;;",
        );
        assert_eq!(parsed.get(PRIMARY_CREDENTIAL).map(String::as_str), Some("abc=="));
        assert_eq!(parsed.get("NID").map(String::as_str), Some("1=2"));
        assert_eq!(parsed.get("__Secure-1PSIDTS ").map(String::as_str), Some(" x"));
        assert!(!parsed.contains_key("junk"));
        assert_eq!(parsed.len(), 3);
    }

    #[test]
    fn environment_wins_over_file() {
        let file = cookie_file("__Secure-1PSID=from-file");
        let (creds, source) = load_credentials(
            Some("__Secure-1PSID=from-env;__Secure-1PSIDTS=ts"),
            file.path(),
        )
        .unwrap();
        assert_eq!(creds.primary(), "from-env");
        assert_eq!(creds.secondary(), Some("ts"));
        assert_eq!(source, CredentialSource::Environment);
    }

    #[test]
    fn env_without_entries_falls_back_to_file() {
        let file = cookie_file("  __Secure-1PSID=from-file\n");
        for env in [None, Some(""), Some("no entries here")] {
            let (creds, source) = load_credentials(env, file.path()).unwrap();
            assert_eq!(creds.primary(), "from-file");
            assert_eq!(creds.secondary(), None);
            assert_eq!(source, CredentialSource::File(file.path().to_path_buf()));
        }
    }

    #[test]
    fn missing_file_and_env_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_credentials(None, &dir.path().join("cookies.txt")).unwrap_err();
        assert!(matches!(err, ConfigError::CredentialsUnavailable { .. }));
    }

    #[test]
    fn primary_credential_is_required() {
        let file = cookie_file("__Secure-1PSIDTS=only-ts");
        let err = load_credentials(None, file.path()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingCredential { key: PRIMARY_CREDENTIAL, .. }
        ));
    }

    #[test]
    fn debug_output_never_leaks_values() {
        let creds = SessionCredentials::new("g.a000secretsecretsecret", Some("tsvalue".into()));
        let debug = format!("{creds:?}");
        assert!(!debug.contains("secretsecret"));
        assert!(!debug.contains("tsvalue"));
        assert_eq!(creds.redacted(), "g.a000se...");
        assert_eq!(
            creds.cookie_header(),
            "__Secure-1PSID=g.a000secretsecretsecret; __Secure-1PSIDTS=tsvalue"
        );
    }

    #[test]
    fn backend_config_normalises_and_validates() {
        let cfg = BackendConfig::new("http://localhost:8080/", "gemini-2.5-flash", Duration::from_secs(60)).unwrap();
        assert_eq!(cfg.endpoint("/generate"), "http://localhost:8080/generate");

        assert!(BackendConfig::new("", "m", Duration::from_secs(1)).is_err());
        assert!(BackendConfig::new("ftp://x", "m", Duration::from_secs(1)).is_err());
        assert!(BackendConfig::new("http://x", " ", Duration::from_secs(1)).is_err());
        assert!(BackendConfig::new("http://x", "m", Duration::ZERO).is_err());
    }

    #[test]
    fn template_file_must_contain_placeholder() {
        let good = cookie_file("Describe {title} as JSON");
        let template = load_template(Some(good.path()), "Describe").unwrap();
        assert_eq!(template.text(), "Describe {title} as JSON");

        let bad = cookie_file("no placeholder");
        assert!(matches!(
            load_template(Some(bad.path()), "no"),
            Err(ConfigError::Domain(_))
        ));

        let builtin = load_template(None, DEFAULT_ECHO_MARKER).unwrap();
        assert_eq!(builtin.echo_marker(), DEFAULT_ECHO_MARKER);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: every well-formed entry survives parsing with its value intact.
            #[test]
            fn well_formed_entries_round_trip(
                entries in proptest::collection::btree_map("[A-Za-z_][A-Za-z0-9_-]{0,12}", "[A-Za-z0-9=._-]{0,16}", 0..6)
            ) {
                let raw = entries
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join("; ");
                prop_assert_eq!(parse_credential_string(&raw), entries);
            }

            /// Property: parsing never panics and never yields a key containing ';'.
            #[test]
            fn arbitrary_input_is_tolerated(raw in ".*") {
                for key in parse_credential_string(&raw).keys() {
                    prop_assert!(!key.contains(';'));
                }
            }
        }
    }
}
