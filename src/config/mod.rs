use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub environment: Environment,
    pub api: ApiConfig,
    pub auth: AuthConfig,
    pub tasks: TaskConfig,
    pub filter: FilterConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Resource adapter used to mount endpoint handlers.
    pub resource_adapter: String,
    /// Include internal error details in 500 responses.
    pub display_errors: bool,
    pub enable_request_logging: bool,
    pub max_request_size_bytes: usize,
}

/// One row of the authentication handler table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthHandlerConfig {
    /// Authorization header prefixes; empty means catch-all.
    #[serde(default)]
    pub hints: Vec<String>,
    pub handler: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub handlers: Vec<AuthHandlerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Run deferred tasks in-process within the request.
    pub force_synchronous: bool,
    /// Run deferred tasks in-process when the queue rejects them.
    pub synchronous_fallback: bool,
    pub time_limit_secs: u64,
    pub soft_time_limit_secs: u64,
    pub enqueue_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Name of a registered filter used as the lowest-precedence layer.
    pub default_filter: Option<String>,
    /// Cache computed field values per object within a filter pass.
    pub model_caching_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub enable_cors: bool,
    pub cors_origins: Vec<String>,
    pub jwt_secret: String,
    pub jwt_expiry_hours: u64,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

const DEFAULT_TASK_TIME_LIMIT: u64 = 999_999;

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        let base = match env::var("DECLARATIVE_CONFIG_FILE") {
            Ok(path) => Self::from_file(&path).unwrap_or_else(|e| {
                tracing::warn!("Ignoring config file: {}", e);
                Self::preset(environment)
            }),
            Err(_) => Self::preset(environment),
        };

        base.with_env_overrides()
    }

    /// Load a YAML file; missing keys take development defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn preset(environment: Environment) -> Self {
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tasks.enqueue_attempts == 0 {
            return Err(ConfigError::Invalid("tasks.enqueue_attempts must be at least 1".into()));
        }
        if self.tasks.soft_time_limit_secs > self.tasks.time_limit_secs {
            return Err(ConfigError::Invalid(
                "tasks.soft_time_limit_secs exceeds tasks.time_limit_secs".into(),
            ));
        }
        if self.auth.handlers.iter().any(|h| h.handler.trim().is_empty()) {
            return Err(ConfigError::Invalid("authentication handler name is empty".into()));
        }
        Ok(())
    }

    fn with_env_overrides(mut self) -> Self {
        // Filter overrides
        if let Ok(v) = env::var("DECLARATIVE_ENDPOINT_DEFAULT_FILTERS") {
            self.filter.default_filter = Some(v).filter(|s| !s.trim().is_empty());
        }
        if let Ok(v) = env::var("DDA_FILTER_MODEL_CACHING_ENABLED") {
            self.filter.model_caching_enabled = parse_flag(&v).unwrap_or(self.filter.model_caching_enabled);
        }

        // Task overrides
        if let Ok(v) = env::var("DECLARATIVE_ENDPOINT_TASKS_FORCE_SYNCHRONOUS") {
            self.tasks.force_synchronous = parse_flag(&v).unwrap_or(self.tasks.force_synchronous);
        }
        if let Ok(v) = env::var("DECLARATIVE_ENDPOINT_TASKS_SYNCHRONOUS_FALLBACK") {
            self.tasks.synchronous_fallback = parse_flag(&v).unwrap_or(self.tasks.synchronous_fallback);
        }
        if let Ok(v) = env::var("DDA_DEFERRED_TASK_TIME_LIMIT") {
            self.tasks.time_limit_secs = v.parse().unwrap_or(self.tasks.time_limit_secs);
        }
        if let Ok(v) = env::var("DDA_DEFERRED_TASK_SOFT_TIME_LIMIT") {
            self.tasks.soft_time_limit_secs = v.parse().unwrap_or(self.tasks.soft_time_limit_secs);
        }
        if let Ok(v) = env::var("DDA_TASK_ENQUEUE_ATTEMPTS") {
            self.tasks.enqueue_attempts = v.parse().unwrap_or(self.tasks.enqueue_attempts);
        }

        // API overrides
        if let Ok(v) = env::var("DECLARATIVE_ENDPOINT_RESOURCE_ADAPTER") {
            self.api.resource_adapter = v;
        }
        if let Ok(v) = env::var("DECLARATIVE_DISPLAY_ERRORS") {
            self.api.display_errors = parse_flag(&v).unwrap_or(self.api.display_errors);
        }
        if let Ok(v) = env::var("API_MAX_REQUEST_SIZE_BYTES") {
            self.api.max_request_size_bytes = v.parse().unwrap_or(self.api.max_request_size_bytes);
        }

        // Auth overrides
        if let Ok(v) = env::var("DECLARATIVE_ENDPOINT_AUTHENTICATION_HANDLERS") {
            self.auth.handlers = parse_auth_handlers(&v);
        }

        // Security overrides
        if let Ok(v) = env::var("SECURITY_ENABLE_CORS") {
            self.security.enable_cors = parse_flag(&v).unwrap_or(self.security.enable_cors);
        }
        if let Ok(v) = env::var("SECURITY_CORS_ORIGINS") {
            self.security.cors_origins = v.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(v) = env::var("DDA_JWT_SECRET") {
            self.security.jwt_secret = v;
        }
        if let Ok(v) = env::var("DDA_JWT_EXPIRY_HOURS") {
            self.security.jwt_expiry_hours = v.parse().unwrap_or(self.security.jwt_expiry_hours);
        }

        self
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            api: ApiConfig {
                resource_adapter: "endpoint".to_string(),
                display_errors: true,
                enable_request_logging: true,
                max_request_size_bytes: 10 * 1024 * 1024, // 10MB
            },
            auth: AuthConfig {
                handlers: vec![AuthHandlerConfig {
                    hints: vec!["Bearer".to_string()],
                    handler: "jwt".to_string(),
                }],
            },
            tasks: TaskConfig {
                force_synchronous: false,
                synchronous_fallback: true,
                time_limit_secs: DEFAULT_TASK_TIME_LIMIT,
                soft_time_limit_secs: DEFAULT_TASK_TIME_LIMIT,
                enqueue_attempts: 3,
            },
            filter: FilterConfig {
                default_filter: None,
                model_caching_enabled: false,
            },
            security: SecurityConfig {
                enable_cors: true,
                cors_origins: vec!["http://localhost:3000".to_string(), "http://localhost:5173".to_string()],
                jwt_secret: "development-secret".to_string(),
                jwt_expiry_hours: 24 * 7, // 1 week
            },
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            api: ApiConfig {
                resource_adapter: "endpoint".to_string(),
                display_errors: false,
                enable_request_logging: true,
                max_request_size_bytes: 5 * 1024 * 1024, // 5MB
            },
            auth: AuthConfig {
                handlers: vec![AuthHandlerConfig {
                    hints: vec!["Bearer".to_string()],
                    handler: "jwt".to_string(),
                }],
            },
            tasks: TaskConfig {
                force_synchronous: false,
                synchronous_fallback: true,
                time_limit_secs: 3600,
                soft_time_limit_secs: 3000,
                enqueue_attempts: 3,
            },
            filter: FilterConfig {
                default_filter: None,
                model_caching_enabled: true,
            },
            security: SecurityConfig {
                enable_cors: true,
                cors_origins: vec!["https://staging.example.com".to_string()],
                jwt_secret: String::new(),
                jwt_expiry_hours: 24,
            },
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            api: ApiConfig {
                resource_adapter: "endpoint".to_string(),
                display_errors: false,
                enable_request_logging: false,
                max_request_size_bytes: 2 * 1024 * 1024, // 2MB
            },
            auth: AuthConfig {
                handlers: vec![AuthHandlerConfig {
                    hints: vec!["Bearer".to_string()],
                    handler: "jwt".to_string(),
                }],
            },
            tasks: TaskConfig {
                force_synchronous: false,
                synchronous_fallback: false,
                time_limit_secs: 600,
                soft_time_limit_secs: 540,
                enqueue_attempts: 3,
            },
            filter: FilterConfig {
                default_filter: None,
                model_caching_enabled: true,
            },
            security: SecurityConfig {
                enable_cors: true,
                cors_origins: vec!["https://app.example.com".to_string()],
                jwt_secret: String::new(),
                jwt_expiry_hours: 4,
            },
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::development()
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        AppConfig::development().api
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        AppConfig::development().auth
    }
}

impl Default for TaskConfig {
    fn default() -> Self {
        AppConfig::development().tasks
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        AppConfig::development().filter
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        AppConfig::development().security
    }
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Development
    }
}

/// Accepts `true/false`, `1/0`, `yes/no` and `on/off` in any case.
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse `Bearer|Token=jwt;*=none` into handler rows. `*` marks a catch-all.
pub fn parse_auth_handlers(value: &str) -> Vec<AuthHandlerConfig> {
    value
        .split(';')
        .filter_map(|entry| {
            let (hints, handler) = entry.split_once('=')?;
            let hints = hints
                .split('|')
                .map(str::trim)
                .filter(|h| !h.is_empty() && *h != "*")
                .map(str::to_string)
                .collect();
            Some(AuthHandlerConfig {
                hints,
                handler: handler.trim().to_string(),
            })
        })
        .collect()
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_development_config() {
        let config = AppConfig::development();
        assert!(!config.tasks.force_synchronous);
        assert!(config.tasks.synchronous_fallback);
        assert_eq!(config.tasks.time_limit_secs, 999_999);
        assert_eq!(config.api.resource_adapter, "endpoint");
    }

    #[test]
    fn test_default_production_config() {
        let config = AppConfig::production();
        assert!(!config.api.display_errors);
        assert!(!config.tasks.synchronous_fallback);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_flag_parsing() {
        assert_eq!(parse_flag("True"), Some(true));
        assert_eq!(parse_flag("off"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn test_auth_handler_parsing() {
        let handlers = parse_auth_handlers("Bearer|Token=jwt; *=none");
        assert_eq!(handlers.len(), 2);
        assert_eq!(handlers[0].hints, vec!["Bearer".to_string(), "Token".to_string()]);
        assert_eq!(handlers[0].handler, "jwt");
        assert!(handlers[1].hints.is_empty());
        assert_eq!(handlers[1].handler, "none");
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = AppConfig::from_yaml("tasks:\n  force_synchronous: true\n").unwrap();
        assert!(config.tasks.force_synchronous);
        assert_eq!(config.tasks.enqueue_attempts, 3);
        assert_eq!(config.api.resource_adapter, "endpoint");
    }

    #[test]
    fn test_invalid_yaml_config_is_rejected() {
        let err = AppConfig::from_yaml("tasks:\n  enqueue_attempts: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
