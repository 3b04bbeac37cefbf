//! Command-line and environment arguments.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use adprompt_ai::DEFAULT_ECHO_MARKER;
use adprompt_infra::config::{
    BackendConfig, ConfigError, JobConfig, load_credentials, load_template,
};
use adprompt_infra::jobs::{BackoffStrategy, BatchConfig, RetryPolicy};
use adprompt_infra::work_store::{ExhaustionPolicy, WorkTable, WorkTableOverrides};
use adprompt_observability::LogFormat;

/// Upper bound for growing retry delays.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Claim product records, generate a two-part video-ad prompt for each, and
/// store the validated JSON.
#[derive(Parser, Debug, Clone)]
#[command(name = "adprompt-job")]
#[command(version)]
pub struct Args {
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Give up on the database after this many seconds; the run then ends with nothing processed
    #[arg(long, default_value_t = 10)]
    pub db_connect_timeout_secs: u64,

    /// Credential file (`KEY=value;KEY=value`), used when GEMINI_COOKIES is unset or empty
    #[arg(long, env = "ADPROMPT_CREDENTIALS_FILE", default_value = "cookies.txt")]
    pub credentials_file: PathBuf,

    /// Base URL of the generation backend
    #[arg(long, env = "ADPROMPT_BACKEND_URL")]
    pub backend_url: Option<String>,

    /// Model requested from the backend
    #[arg(long, env = "ADPROMPT_MODEL", default_value = "gemini-2.5-flash")]
    pub model: String,

    /// Per-call timeout enforced by the backend client
    #[arg(long, default_value_t = 60)]
    pub backend_timeout_secs: u64,

    /// Records claimed per run
    #[arg(long, default_value_t = 30)]
    pub batch_limit: usize,

    /// Process at most this many of the claimed records
    #[arg(long)]
    pub record_cap: Option<usize>,

    /// Generation attempts per record
    #[arg(long, default_value_t = 4)]
    pub max_attempts: u32,

    /// Delay between attempts
    #[arg(long, default_value_t = 3)]
    pub retry_delay_secs: u64,

    /// How the retry delay grows: fixed, exponential or linear
    #[arg(long, default_value = "fixed")]
    pub retry_backoff: BackoffStrategy,

    /// Pause between records
    #[arg(long, default_value_t = 15)]
    pub pacing_secs: u64,

    /// What to do with records whose attempts ran out: leave-claimed, release or mark-failed
    #[arg(long, default_value = "leave-claimed")]
    pub on_exhausted: ExhaustionPolicy,

    #[arg(long)]
    pub table: Option<String>,
    #[arg(long)]
    pub id_column: Option<String>,
    #[arg(long)]
    pub title_column: Option<String>,
    #[arg(long)]
    pub payload_column: Option<String>,
    #[arg(long)]
    pub ready_column: Option<String>,
    #[arg(long)]
    pub claim_column: Option<String>,
    #[arg(long)]
    pub result_column: Option<String>,
    #[arg(long)]
    pub updated_at_column: Option<String>,

    /// Replace the built-in instruction template; must contain {title}
    #[arg(long)]
    pub template_file: Option<PathBuf>,

    /// Text whose presence in a response means the model echoed the instructions
    #[arg(long, default_value = DEFAULT_ECHO_MARKER)]
    pub echo_marker: String,

    /// Log format: json or pretty
    #[arg(long, env = "ADPROMPT_LOG_FORMAT", default_value = "json")]
    pub log_format: LogFormat,
}

impl Args {
    /// Validate everything and load credentials and template.
    ///
    /// `credentials_env` is the raw credential string from the environment, if any.
    pub fn into_config(self, credentials_env: Option<&str>) -> Result<JobConfig, ConfigError> {
        let database_url = self
            .database_url
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let backend = BackendConfig::new(
            self.backend_url.ok_or(ConfigError::Missing("backend url"))?,
            self.model,
            Duration::from_secs(self.backend_timeout_secs),
        )?;

        let table = WorkTable::with_overrides(WorkTableOverrides {
            table: self.table,
            id: self.id_column,
            title: self.title_column,
            payload: self.payload_column,
            ready: self.ready_column,
            claim: self.claim_column,
            result: self.result_column,
            updated_at: self.updated_at_column,
        })?;

        let template = load_template(self.template_file.as_deref(), &self.echo_marker)?;
        let (credentials, credential_source) =
            load_credentials(credentials_env, &self.credentials_file)?;

        let base_delay = Duration::from_secs(self.retry_delay_secs);
        let retry = match self.retry_backoff {
            BackoffStrategy::Fixed => RetryPolicy::fixed(self.max_attempts, base_delay),
            strategy => RetryPolicy {
                max_attempts: self.max_attempts,
                base_delay,
                max_delay: base_delay.max(MAX_RETRY_DELAY),
                strategy,
            },
        };

        let config = JobConfig {
            database_url,
            database_connect_timeout: Duration::from_secs(self.db_connect_timeout_secs),
            table,
            backend,
            credentials,
            credential_source,
            template,
            batch: BatchConfig {
                retry,
                pacing: Duration::from_secs(self.pacing_secs),
                on_exhausted: self.on_exhausted,
            },
            batch_limit: self.batch_limit,
            record_cap: self.record_cap,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use adprompt_infra::config::CredentialSource;

    fn base_args(extra: &[&str]) -> Args {
        let mut argv = vec![
            "adprompt-job",
            "--database-url",
            "postgres://localhost/catalog",
            "--backend-url",
            "http://localhost:8787",
            "--log-format",
            "pretty",
        ];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_match_the_documented_schedule() {
        let args = base_args(&[]);
        assert_eq!(args.batch_limit, 30);
        assert_eq!(args.record_cap, None);
        assert_eq!(args.max_attempts, 4);
        assert_eq!(args.retry_delay_secs, 3);
        assert_eq!(args.retry_backoff, BackoffStrategy::Fixed);
        assert_eq!(args.pacing_secs, 15);
        assert_eq!(args.on_exhausted, ExhaustionPolicy::LeaveClaimed);
        assert_eq!(args.echo_marker, DEFAULT_ECHO_MARKER);
        assert_eq!(args.log_format, LogFormat::Pretty);

        let config = args
            .into_config(Some("__Secure-1PSID=abc;__Secure-1PSIDTS=def"))
            .unwrap();
        assert_eq!(config.batch.retry, RetryPolicy::default());
        assert_eq!(config.batch.pacing, Duration::from_secs(15));
        assert_eq!(config.table, WorkTable::default());
        assert_eq!(config.credential_source, CredentialSource::Environment);
        assert_eq!(config.backend.timeout, Duration::from_secs(60));
        assert_eq!(config.database_connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn flags_override_policies_and_schema() {
        let args = base_args(&[
            "--record-cap",
            "2",
            "--on-exhausted",
            "mark-failed",
            "--retry-backoff",
            "exponential",
            "--table",
            "staging.products_ai",
            "--result-column",
            "prompt_v2",
        ]);
        let config = args.into_config(Some("__Secure-1PSID=abc")).unwrap();

        assert_eq!(config.record_cap, Some(2));
        assert_eq!(config.batch.on_exhausted, ExhaustionPolicy::MarkFailed);
        assert_eq!(config.batch.retry.strategy, BackoffStrategy::Exponential);
        assert_eq!(config.table.table(), "staging.products_ai");
        assert_eq!(config.table.result_column(), "prompt_v2");
    }

    #[test]
    fn unparseable_policy_is_rejected_by_the_parser() {
        let res = Args::try_parse_from([
            "adprompt-job",
            "--database-url",
            "postgres://x",
            "--on-exhausted",
            "forget",
        ]);
        assert!(res.is_err());
    }

    #[test]
    fn missing_backend_url_is_a_config_error() {
        let mut args = base_args(&[]);
        args.backend_url = None;
        let err = args.into_config(Some("__Secure-1PSID=abc")).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("backend url")));
    }

    #[test]
    fn missing_database_url_is_a_config_error() {
        let mut args = base_args(&[]);
        args.database_url = Some("  ".into());
        let err = args.into_config(Some("__Secure-1PSID=abc")).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DATABASE_URL")));
    }

    #[test]
    fn hostile_table_name_is_rejected() {
        let args = base_args(&["--table", "products; DROP TABLE x"]);
        assert!(matches!(
            args.into_config(Some("__Secure-1PSID=abc")),
            Err(ConfigError::Domain(_))
        ));
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let args = base_args(&["--max-attempts", "0"]);
        assert!(matches!(
            args.into_config(Some("__Secure-1PSID=abc")),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn credential_file_is_used_without_env() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"__Secure-1PSID=from-file").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let config = base_args(&["--credentials-file", path.as_str()])
            .into_config(None)
            .unwrap();
        assert_eq!(config.credentials.primary(), "from-file");
        assert!(matches!(config.credential_source, CredentialSource::File(_)));
    }
}
