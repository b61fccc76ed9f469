use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use comfybot_comfyui::poller::PollConfig;
use comfybot_core::auth::AdminPolicy;
use comfybot_core::settings::{
    GenerationDefaults, GenerationLimits, ResourceCheckPolicy, DEFAULT_MAX_BATCH_SIZE,
    DEFAULT_MAX_CONCURRENT_JOBS, DEFAULT_MAX_IMAGE_DIMENSION, DEFAULT_MAX_IMAGE_PIXELS,
    DEFAULT_MAX_PENDING_PER_USER, DEFAULT_VRAM_THRESHOLD_GB,
};
use comfybot_pipeline::OrchestratorConfig;

/// A configuration variable that is present but unusable.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} is not a valid {expected}: '{value}'")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("{0} must not be empty")]
    Empty(&'static str),
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for a single local ComfyUI instance.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    /// Generations wait for their outcome, so this bounds queue wait plus
    /// backend time.
    pub request_timeout_secs: u64,
    pub database_url: String,
    /// One entry per ComfyUI backend.
    pub comfyui_urls: Vec<String>,
    pub poll: PollConfig,
    pub defaults: GenerationDefaults,
    pub limits: GenerationLimits,
    /// How often a running job's backend VRAM is re-checked. `None` turns
    /// the in-flight check off.
    pub vram_check_interval: Option<Duration>,
    pub max_concurrent_jobs: usize,
    pub max_pending_per_user: usize,
    pub workflows_path: PathBuf,
    pub image_output_path: PathBuf,
    pub canvas_path: PathBuf,
    pub preferences_file: PathBuf,
    pub admins_file: PathBuf,
    /// Model catalog document. The built-in single-model catalog is used
    /// when unset.
    pub models_file: Option<PathBuf>,
    pub default_model: Option<String>,
    pub admin_policy: AdminPolicy,
    pub log_format: LogFormat,
}

impl ServerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                 | Default                         |
    /// |-------------------------|---------------------------------|
    /// | `HOST`                  | `0.0.0.0`                       |
    /// | `PORT`                  | `3000`                          |
    /// | `CORS_ORIGINS`          | `http://localhost:5173`         |
    /// | `REQUEST_TIMEOUT_SECS`  | `600`                           |
    /// | `DATABASE_URL`          | `sqlite://` + `DB_PATH`         |
    /// | `DB_PATH`               | `data/stats.db`                 |
    /// | `COMFYUI_API_URL`       | `http://127.0.0.1:8188`         |
    /// | `API_TIMEOUT`           | `120` (seconds per job)         |
    /// | `POLL_MAX_ERRORS`       | `5`                             |
    /// | `MAX_BATCH_SIZE`        | `5`                             |
    /// | `MAX_CONCURRENT_JOBS`   | `2` (per backend)               |
    /// | `MAX_PENDING_PER_USER`  | `5`                             |
    /// | `VRAM_THRESHOLD_GB`     | `20`                            |
    /// | `VRAM_CHECK_INTERVAL`   | `1` (seconds, `0` disables)     |
    /// | `RESOURCE_CHECK_POLICY` | `fail_closed`                   |
    /// | `STATIC_WIDTH`          | `1024`                          |
    /// | `STATIC_HEIGHT`         | `1024`                          |
    /// | `MAX_IMAGE_DIMENSION`   | `3000`                          |
    /// | `MAX_IMAGE_PIXELS`      | `4194304`                       |
    /// | `WORKFLOWS_PATH`        | `workflows`                     |
    /// | `IMAGE_OUTPUT_PATH`     | `output`                        |
    /// | `CANVAS_PATH`           | `data/canvas`                   |
    /// | `PREFERENCES_FILE`      | `data/user_preferences.json`    |
    /// | `ADMINS_FILE`           | `data/admins.json`              |
    /// | `MODELS_FILE`           | unset                           |
    /// | `DEFAULT_MODEL`         | unset                           |
    /// | `ADMIN_ROLE_ID`         | unset                           |
    /// | `BOT_OWNER_ID`          | unset                           |
    /// | `LOG_FORMAT`            | `text` (`json` for JSON lines)  |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let host = var("HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = parse(&var, "PORT", "port number", 3000u16)?;
        let cors_origins = split_list(&var("CORS_ORIGINS").unwrap_or_else(|| "http://localhost:5173".into()));
        let request_timeout_secs = parse(&var, "REQUEST_TIMEOUT_SECS", "number of seconds", 600u64)?;

        let database_url = match var("DATABASE_URL") {
            Some(url) => url,
            None => format!("sqlite://{}", var("DB_PATH").unwrap_or_else(|| "data/stats.db".into())),
        };

        let comfyui_urls = split_list(&var("COMFYUI_API_URL").unwrap_or_else(|| "http://127.0.0.1:8188".into()));
        if comfyui_urls.is_empty() {
            return Err(ConfigError::Empty("COMFYUI_API_URL"));
        }

        let poll = PollConfig {
            timeout: Duration::from_secs(parse(&var, "API_TIMEOUT", "number of seconds", 120u64)?),
            max_consecutive_errors: parse(&var, "POLL_MAX_ERRORS", "count", 5u32)?,
            ..PollConfig::default()
        };

        let mut defaults = GenerationDefaults::default();
        defaults.width = parse(&var, "STATIC_WIDTH", "pixel count", defaults.width)?;
        defaults.height = parse(&var, "STATIC_HEIGHT", "pixel count", defaults.height)?;

        let check_policy = match var("RESOURCE_CHECK_POLICY") {
            Some(raw) => raw.parse::<ResourceCheckPolicy>().map_err(|_| ConfigError::Invalid {
                var: "RESOURCE_CHECK_POLICY",
                expected: "check policy (fail_closed or fail_open)",
                value: raw,
            })?,
            None => ResourceCheckPolicy::default(),
        };
        let limits = GenerationLimits {
            max_image_dimension: parse(&var, "MAX_IMAGE_DIMENSION", "pixel count", DEFAULT_MAX_IMAGE_DIMENSION)?,
            max_image_pixels: parse(&var, "MAX_IMAGE_PIXELS", "pixel count", DEFAULT_MAX_IMAGE_PIXELS)?,
            max_batch_size: parse(&var, "MAX_BATCH_SIZE", "count", DEFAULT_MAX_BATCH_SIZE)?,
            vram_threshold_gb: parse(&var, "VRAM_THRESHOLD_GB", "number of gigabytes", DEFAULT_VRAM_THRESHOLD_GB)?,
            check_policy,
        };

        let vram_check_interval = match parse(&var, "VRAM_CHECK_INTERVAL", "number of seconds", 1u64)? {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        let max_concurrent_jobs = parse(&var, "MAX_CONCURRENT_JOBS", "count", DEFAULT_MAX_CONCURRENT_JOBS)?;
        if max_concurrent_jobs == 0 {
            return Err(ConfigError::Invalid {
                var: "MAX_CONCURRENT_JOBS",
                expected: "positive count",
                value: "0".into(),
            });
        }

        let admin_policy = AdminPolicy {
            admin_role_id: parse_opt(&var, "ADMIN_ROLE_ID", "role id")?,
            bot_owner_id: parse_opt(&var, "BOT_OWNER_ID", "user id")?,
        };

        let log_format = match var("LOG_FORMAT").map(|v| v.to_ascii_lowercase()).as_deref() {
            None | Some("text") | Some("pretty") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "LOG_FORMAT",
                    expected: "log format (text or json)",
                    value: other.to_string(),
                })
            }
        };

        let path = |key: &str, default: &str| PathBuf::from(var(key).unwrap_or_else(|| default.into()));

        Ok(Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            database_url,
            comfyui_urls,
            poll,
            defaults,
            limits,
            vram_check_interval,
            max_concurrent_jobs,
            max_pending_per_user: parse(&var, "MAX_PENDING_PER_USER", "count", DEFAULT_MAX_PENDING_PER_USER)?,
            workflows_path: path("WORKFLOWS_PATH", "workflows"),
            image_output_path: path("IMAGE_OUTPUT_PATH", "output"),
            canvas_path: path("CANVAS_PATH", "data/canvas"),
            preferences_file: path("PREFERENCES_FILE", "data/user_preferences.json"),
            admins_file: path("ADMINS_FILE", "data/admins.json"),
            models_file: var("MODELS_FILE").map(PathBuf::from),
            default_model: var("DEFAULT_MODEL"),
            admin_policy,
            log_format,
        })
    }

    /// The orchestrator's slice of the configuration.
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            defaults: self.defaults.clone(),
            limits: self.limits.clone(),
            poll: self.poll.clone(),
            vram_check_interval: self.vram_check_interval,
            max_concurrent_jobs: self.max_concurrent_jobs,
            max_pending_per_user: self.max_pending_per_user,
            output_dir: self.image_output_path.clone(),
        }
    }
}

fn parse<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    expected: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    Ok(parse_opt(var, key, expected)?.unwrap_or(default))
}

fn parse_opt<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    expected: &'static str,
) -> Result<Option<T>, ConfigError> {
    var(key)
        .map(|raw| {
            raw.parse().map_err(|_| ConfigError::Invalid {
                var: key,
                expected,
                value: raw,
            })
        })
        .transpose()
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
