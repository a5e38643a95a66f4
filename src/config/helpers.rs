//! Typed environment parsing helpers shared by the config structs.

use crate::error::ConfigError;

/// Read an environment variable, treating empty/whitespace values as unset.
pub fn optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Read a required environment variable.
pub fn required_env(key: &str) -> Result<String, ConfigError> {
    optional_env(key).ok_or_else(|| ConfigError::MissingKey {
        key: key.to_string(),
    })
}

pub fn parse_string_env(key: &str, default: &str) -> String {
    optional_env(key).unwrap_or_else(|| default.to_string())
}

pub fn parse_bool_env(key: &str, default: bool) -> Result<bool, ConfigError> {
    match optional_env(key) {
        None => Ok(default),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected boolean, got '{other}'"),
            }),
        },
    }
}

pub fn parse_u64_env(key: &str, default: u64) -> Result<u64, ConfigError> {
    match optional_env(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected integer, got '{raw}'"),
        }),
    }
}

pub fn parse_usize_env(key: &str, default: usize) -> Result<usize, ConfigError> {
    match optional_env(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected integer, got '{raw}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_bool_env, parse_u64_env};

    #[test]
    fn bool_env_accepts_common_spellings() {
        // SAFETY: tests run single-threaded per process for env mutation.
        unsafe { std::env::set_var("KANCELARIA_TEST_BOOL", "Yes") };
        assert!(parse_bool_env("KANCELARIA_TEST_BOOL", false).unwrap());
        unsafe { std::env::set_var("KANCELARIA_TEST_BOOL", "off") };
        assert!(!parse_bool_env("KANCELARIA_TEST_BOOL", true).unwrap());
        unsafe { std::env::remove_var("KANCELARIA_TEST_BOOL") };
        assert!(parse_bool_env("KANCELARIA_TEST_BOOL", true).unwrap());
    }

    #[test]
    fn u64_env_rejects_garbage() {
        unsafe { std::env::set_var("KANCELARIA_TEST_U64", "soon") };
        assert!(parse_u64_env("KANCELARIA_TEST_U64", 5).is_err());
        unsafe { std::env::remove_var("KANCELARIA_TEST_U64") };
    }
}
