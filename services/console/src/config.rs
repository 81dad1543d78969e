use tracing::Level;
use viva_core::{SessionConfig, SessionMode};

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub api_key: String,
    pub mode: SessionMode,
    pub voice: String,
    pub temperature: f64,
    pub top_p: f64,
    pub score_tracking: bool,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| ConfigError::MissingVar("GEMINI_API_KEY".to_string()))?;

        let mode_str = std::env::var("SESSION_MODE").unwrap_or_else(|_| "live".to_string());
        let mode = match mode_str.to_lowercase().as_str() {
            "chat" => SessionMode::Chat,
            _ => SessionMode::Live,
        };

        let voice = std::env::var("SESSION_VOICE").unwrap_or_else(|_| "Aoede".to_string());
        let temperature = parse_f64_var("SESSION_TEMPERATURE", 0.5)?;
        let top_p = parse_f64_var("SESSION_TOP_P", 0.95)?;

        let score_tracking = std::env::var("SCORE_TRACKING")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            api_key,
            mode,
            voice,
            temperature,
            top_p,
            score_tracking,
            log_level,
        })
    }

    /// Binds this configuration to a concrete session instruction.
    pub fn session_config(&self, system_instruction: String) -> SessionConfig {
        SessionConfig {
            voice: self.voice.clone(),
            temperature: self.temperature,
            top_p: self.top_p,
            system_instruction,
            score_tracking: self.score_tracking,
        }
    }
}

fn parse_f64_var(var: &str, default: f64) -> Result<f64, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw
            .parse::<f64>()
            .map_err(|e| ConfigError::InvalidValue(var.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn clear_env_vars() {
        unsafe {
            env::remove_var("GEMINI_API_KEY");
            env::remove_var("SESSION_MODE");
            env::remove_var("SESSION_VOICE");
            env::remove_var("SESSION_TEMPERATURE");
            env::remove_var("SESSION_TOP_P");
            env::remove_var("SCORE_TRACKING");
            env::remove_var("RUST_LOG");
        }
    }

    #[test]
    fn test_config_error_display() {
        let missing_var = ConfigError::MissingVar("TEST_VAR".to_string());
        assert_eq!(
            format!("{}", missing_var),
            "Missing environment variable: TEST_VAR"
        );

        let invalid_value =
            ConfigError::InvalidValue("TEST_VAR".to_string(), "bad_value".to_string());
        assert_eq!(
            format!("{}", invalid_value),
            "Invalid value for environment variable TEST_VAR: bad_value"
        );
    }

    #[test]
    #[serial]
    fn test_config_from_env_minimal() {
        clear_env_vars();
        unsafe {
            env::set_var("GEMINI_API_KEY", "test-gemini-key");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.api_key, "test-gemini-key");
        assert_eq!(config.mode, SessionMode::Live);
        assert_eq!(config.voice, "Aoede");
        assert_eq!(config.temperature, 0.5);
        assert_eq!(config.top_p, 0.95);
        assert!(!config.score_tracking);
        assert_eq!(config.log_level, Level::INFO);
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        unsafe {
            env::set_var("GEMINI_API_KEY", "custom-key");
            env::set_var("SESSION_MODE", "chat");
            env::set_var("SESSION_VOICE", "Puck");
            env::set_var("SESSION_TEMPERATURE", "0.9");
            env::set_var("SESSION_TOP_P", "0.8");
            env::set_var("SCORE_TRACKING", "true");
            env::set_var("RUST_LOG", "debug");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.mode, SessionMode::Chat);
        assert_eq!(config.voice, "Puck");
        assert_eq!(config.temperature, 0.9);
        assert_eq!(config.top_p, 0.8);
        assert!(config.score_tracking);
        assert_eq!(config.log_level, Level::DEBUG);
    }

    #[test]
    #[serial]
    fn test_config_missing_api_key() {
        clear_env_vars();

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(var) => assert_eq!(var, "GEMINI_API_KEY"),
            _ => panic!("Expected MissingVar for GEMINI_API_KEY"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_temperature() {
        clear_env_vars();
        unsafe {
            env::set_var("GEMINI_API_KEY", "test-gemini-key");
            env::set_var("SESSION_TEMPERATURE", "warm");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "SESSION_TEMPERATURE"),
            _ => panic!("Expected InvalidValue for SESSION_TEMPERATURE"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_log_level() {
        clear_env_vars();
        unsafe {
            env::set_var("GEMINI_API_KEY", "test-gemini-key");
            env::set_var("RUST_LOG", "not-a-level");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "RUST_LOG"),
            _ => panic!("Expected InvalidValue for RUST_LOG"),
        }
    }

    #[test]
    #[serial]
    fn test_session_config_binding() {
        clear_env_vars();
        unsafe {
            env::set_var("GEMINI_API_KEY", "test-gemini-key");
            env::set_var("SCORE_TRACKING", "1");
        }

        let config = Config::from_env().unwrap();
        let session = config.session_config("Quiz the user.".to_string());
        assert_eq!(session.system_instruction, "Quiz the user.");
        assert!(session.score_tracking);
        assert_eq!(session.voice, "Aoede");
    }
}
