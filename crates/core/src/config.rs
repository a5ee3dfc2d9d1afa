//! Environment-variable helpers shared by every `*Config::from_env`.

use std::str::FromStr;

/// A configuration variable was missing or could not be parsed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Read `name`, falling back to `default` when unset.
pub fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Read a required variable.
pub fn env_required(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::Missing(name))
}

/// Read and parse `name`, falling back to `default` when unset.
pub fn env_parse<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => parse_value(name, &raw),
        Err(_) => Ok(default),
    }
}

/// Read a comma-separated list, dropping empty items.
pub fn env_list(name: &str) -> Vec<String> {
    std::env::var(name)
        .map(|raw| split_list(&raw))
        .unwrap_or_default()
}

fn parse_value<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_reports_name_and_value() {
        assert_matches!(
            parse_value::<u16>("PORT", "http"),
            Err(ConfigError::Invalid { name: "PORT", value, .. }) if value == "http"
        );
        assert_eq!(parse_value::<u64>("POLL", " 10 ").unwrap(), 10);
    }

    #[test]
    fn list_drops_blanks() {
        assert_eq!(split_list("AWS_KEY, ,GEO_USER,"), ["AWS_KEY", "GEO_USER"]);
        assert!(split_list("").is_empty());
    }
}
