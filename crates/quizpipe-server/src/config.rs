//! CLI and runtime configuration.
//!
//! Everything is resolved once at startup into an immutable [`Config`];
//! nothing downstream reads the environment or the secrets file again.

use anyhow::Context;
use clap::Parser;
use quizpipe_local::pipeline::SolverCfg;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "quizpipe",
    version,
    about = "HTTP front door for the quiz-solving pipeline"
)]
pub struct Cli {
    /// Address to listen on.
    #[arg(long, env = "QUIZPIPE_LISTEN", default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,

    /// JSON file mapping email -> secret.
    #[arg(long, env = "QUIZPIPE_SECRETS")]
    pub secrets: PathBuf,

    /// Maximum concurrent solver runs; requests beyond this are rejected
    /// with 429 rather than queued.
    #[arg(long, env = "QUIZPIPE_MAX_RUNS", default_value_t = 4)]
    pub max_runs: usize,

    /// Browser navigation timeout (ms).
    #[arg(long, default_value_t = 120_000)]
    pub nav_timeout_ms: u64,

    /// Per-asset download timeout (ms).
    #[arg(long, default_value_t = 60_000)]
    pub asset_timeout_ms: u64,

    /// Submission POST timeout (ms).
    #[arg(long, default_value_t = 60_000)]
    pub submit_timeout_ms: u64,

    /// Hard wall-clock deadline for a whole run (ms).
    #[arg(long, default_value_t = 160_000)]
    pub run_deadline_ms: u64,
}

/// Immutable runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    /// email -> secret, loaded once from the secrets file.
    pub secrets: BTreeMap<String, String>,
    pub max_runs: usize,
    pub solver: SolverCfg,
}

impl Config {
    pub fn from_cli(cli: &Cli) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(&cli.secrets)
            .with_context(|| format!("reading secrets file {}", cli.secrets.display()))?;
        let secrets: BTreeMap<String, String> = serde_json::from_str(&raw)
            .with_context(|| format!("parsing secrets file {}", cli.secrets.display()))?;
        anyhow::ensure!(!secrets.is_empty(), "secrets file has no entries");

        Ok(Self {
            listen: cli.listen,
            secrets,
            max_runs: cli.max_runs,
            solver: SolverCfg {
                nav_timeout_ms: cli.nav_timeout_ms,
                asset_timeout_ms: cli.asset_timeout_ms,
                submit_timeout_ms: cli.submit_timeout_ms,
                run_deadline_ms: cli.run_deadline_ms,
                ..SolverCfg::default()
            },
        })
    }

    pub fn secret_matches(&self, email: &str, secret: &str) -> bool {
        self.secrets.get(email).is_some_and(|s| s == secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cli_for(path: &std::path::Path) -> Cli {
        Cli::parse_from(["quizpipe", "--secrets", &path.to_string_lossy()])
    }

    #[test]
    fn loads_secrets_and_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, r#"{{"a@b.test": "s3cret"}}"#).unwrap();

        let config = Config::from_cli(&cli_for(f.path())).unwrap();
        assert_eq!(config.max_runs, 4);
        assert_eq!(config.solver.run_deadline_ms, 160_000);
        assert!(config.secret_matches("a@b.test", "s3cret"));
        assert!(!config.secret_matches("a@b.test", "wrong"));
        assert!(!config.secret_matches("nobody@b.test", "s3cret"));
    }

    #[test]
    fn malformed_secrets_file_is_an_error() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "not json").unwrap();
        assert!(Config::from_cli(&cli_for(f.path())).is_err());
    }

    #[test]
    fn empty_secrets_file_is_an_error() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "{{}}").unwrap();
        assert!(Config::from_cli(&cli_for(f.path())).is_err());
    }

    #[test]
    fn timeout_flags_flow_into_the_solver_config() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, r#"{{"a@b.test": "x"}}"#).unwrap();
        let cli = Cli::parse_from([
            "quizpipe",
            "--secrets",
            &f.path().to_string_lossy(),
            "--nav-timeout-ms",
            "5000",
            "--run-deadline-ms",
            "9000",
        ]);
        let config = Config::from_cli(&cli).unwrap();
        assert_eq!(config.solver.nav_timeout_ms, 5_000);
        assert_eq!(config.solver.run_deadline_ms, 9_000);
    }
}
