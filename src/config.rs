use std::env;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_ADDR: &str = "127.0.0.1:3000";
pub const DEFAULT_INPUT_SHEET: &str = "INPUT";
pub const DEFAULT_TARGET_SHEET: &str = "ENTRIES";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Runtime settings of the web application
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Address the server listens on
    pub addr: SocketAddr,

    /// OAuth bearer token sent to the Google APIs
    pub access_token: String,

    /// Tab holding the header and hint rows
    pub input_sheet: String,

    /// Tab submissions are written to unless the request names another
    pub target_sheet: String,

    /// Key required for CSV uploads; uploads are disabled when unset
    pub admin_key: Option<String>,

    pub http_timeout: Duration,

    pub sheets_base: Option<String>,
    pub drive_base: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            access_token: String::new(),
            input_sheet: DEFAULT_INPUT_SHEET.to_string(),
            target_sheet: DEFAULT_TARGET_SHEET.to_string(),
            admin_key: None,
            http_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            sheets_base: None,
            drive_base: None,
        }
    }
}

impl Config {
    /// Read the configuration from the process environment
    ///
    /// # Returns
    /// * `Ok(Config)` - Settings with defaults filled in
    /// * `Err(ConfigError)` - The access token is missing or a value does not parse
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the configuration from any variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let addr_raw = var("SHEETFORMS_ADDR").unwrap_or_else(|| DEFAULT_ADDR.to_string());
        let addr = addr_raw.parse().map_err(|_| ConfigError::Invalid {
            name: "SHEETFORMS_ADDR",
            value: addr_raw.clone(),
        })?;

        let access_token =
            var("GOOGLE_ACCESS_TOKEN").ok_or(ConfigError::Missing("GOOGLE_ACCESS_TOKEN"))?;

        let http_timeout = match var("SHEETFORMS_HTTP_TIMEOUT_SECS") {
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "SHEETFORMS_HTTP_TIMEOUT_SECS",
                        value: raw,
                    });
                }
            },
            None => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };

        Ok(Self {
            addr,
            access_token,
            input_sheet: var("SHEETFORMS_INPUT_SHEET")
                .unwrap_or_else(|| DEFAULT_INPUT_SHEET.to_string()),
            target_sheet: var("SHEETFORMS_TARGET_SHEET")
                .unwrap_or_else(|| DEFAULT_TARGET_SHEET.to_string()),
            admin_key: var("SHEETFORMS_ADMIN_KEY"),
            http_timeout,
            sheets_base: var("SHEETS_API_BASE"),
            drive_base: var("DRIVE_API_BASE"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_only_token_is_set() {
        let config = Config::from_lookup(lookup(&[("GOOGLE_ACCESS_TOKEN", "tok")])).unwrap();
        assert_eq!(config.access_token, "tok");
        assert_eq!(config.addr.to_string(), DEFAULT_ADDR);
        assert_eq!(config.input_sheet, "INPUT");
        assert_eq!(config.target_sheet, "ENTRIES");
        assert_eq!(config.admin_key, None);
        assert_eq!(config.http_timeout, Duration::from_secs(30));
    }

    #[test]
    fn missing_token_is_an_error() {
        assert_eq!(
            Config::from_lookup(lookup(&[("GOOGLE_ACCESS_TOKEN", "  ")])),
            Err(ConfigError::Missing("GOOGLE_ACCESS_TOKEN"))
        );
    }

    #[test]
    fn overrides_and_bad_values() {
        let config = Config::from_lookup(lookup(&[
            ("GOOGLE_ACCESS_TOKEN", "tok"),
            ("SHEETFORMS_ADDR", "0.0.0.0:8080"),
            ("SHEETFORMS_TARGET_SHEET", "Responses"),
            ("SHEETFORMS_ADMIN_KEY", "s3cret"),
            ("SHEETFORMS_HTTP_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();
        assert_eq!(config.addr.port(), 8080);
        assert_eq!(config.target_sheet, "Responses");
        assert_eq!(config.admin_key.as_deref(), Some("s3cret"));
        assert_eq!(config.http_timeout, Duration::from_secs(5));

        let err = Config::from_lookup(lookup(&[
            ("GOOGLE_ACCESS_TOKEN", "tok"),
            ("SHEETFORMS_HTTP_TIMEOUT_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "SHEETFORMS_HTTP_TIMEOUT_SECS", .. }));
    }
}
