use clap::Parser;
use std::path::PathBuf;

const ABOUT: &str = r#"Carbon footprint tracking sidecar.

Reads one JSON request per line on stdin and writes one JSON response per
line on stdout. Logs go to stderr.
"#;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = ABOUT)]
pub struct Cli {
    /// Workspace directory to open at startup
    #[arg(long, env = "CARBOND_WORKSPACE")]
    pub workspace: Option<PathBuf>,
    /// Secret used to sign tokens. Generated per workspace when absent.
    #[arg(long, env = "CARBOND_TOKEN_SECRET", hide_env_values = true)]
    pub token_secret: Option<String>,
    /// Lifetime of access tokens, in seconds
    #[arg(long, env = "CARBOND_ACCESS_TTL_SECS", default_value_t = 300)]
    pub access_ttl_secs: i64,
    /// Lifetime of refresh tokens, in seconds
    #[arg(long, env = "CARBOND_REFRESH_TTL_SECS", default_value_t = 86_400)]
    pub refresh_ttl_secs: i64,
    /// Default number of personalized recommendations
    #[arg(long, default_value_t = 5)]
    pub recommendation_limit: usize,
    /// Do not seed the reference catalog into fresh workspaces
    #[arg(long)]
    pub no_seed: bool,
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, env = "CARBOND_LOG", default_value = "info")]
    pub log_level: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub token_secret: Option<String>,
    pub access_ttl_secs: i64,
    pub refresh_ttl_secs: i64,
    pub recommendation_limit: usize,
    pub seed_catalog: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            token_secret: None,
            access_ttl_secs: 300,
            refresh_ttl_secs: 86_400,
            recommendation_limit: 5,
            seed_catalog: true,
        }
    }
}

impl Cli {
    pub fn level_filter(&self) -> log::LevelFilter {
        self.log_level
            .parse::<log::LevelFilter>()
            .unwrap_or(log::LevelFilter::Info)
    }

    pub fn config(&self) -> Config {
        let defaults = Config::default();
        Config {
            token_secret: self
                .token_secret
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            access_ttl_secs: if self.access_ttl_secs > 0 {
                self.access_ttl_secs
            } else {
                defaults.access_ttl_secs
            },
            refresh_ttl_secs: if self.refresh_ttl_secs > 0 {
                self.refresh_ttl_secs
            } else {
                defaults.refresh_ttl_secs
            },
            recommendation_limit: self.recommendation_limit.max(1),
            seed_catalog: !self.no_seed,
        }
    }
}
