use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use sheetdesk_auth::AccessCodes;
use sheetdesk_lookup::LookupFields;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
    pub sheets_base_url: String,
    pub sheets_token: String,
    pub spreadsheet_id: String,
    pub records_table: String,
    pub auth_log_table: String,
    pub access_codes: AccessCodes,
    pub lookup_fields: LookupFields,
    pub store_timeout_ms: u64,
    pub store_retry_max_attempts: u32,
    pub store_retry_base_backoff_ms: u64,
    pub rate_limit_window_secs: u64,
    pub rate_limit_per_window: u32,
}

impl GatewayConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn store_retry_base_backoff(&self) -> Duration {
        Duration::from_millis(self.store_retry_base_backoff_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for StartupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for StartupError {}

impl GatewayConfig {
    pub fn load() -> Result<Self, StartupError> {
        let mut merged = HashMap::new();

        if let Ok(config_path) = std::env::var("SHEETDESK_CONFIG_PATH") {
            let config_path = config_path.trim();
            if !config_path.is_empty() {
                let file_kv = parse_env_file(config_path)?;
                merged.extend(file_kv);
            }
        }

        merged.extend(std::env::vars());

        Self::from_kv(&merged)
    }

    pub fn from_kv(kv: &HashMap<String, String>) -> Result<Self, StartupError> {
        let bind_addr = parse_socket_addr(
            kv.get("SHEETDESK_BIND_ADDR"),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080),
            "SHEETDESK_BIND_ADDR",
        )?;

        let sheets_base_url = kv
            .get("SHEETDESK_SHEETS_BASE_URL")
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .unwrap_or("https://sheets.googleapis.com")
            .to_string();

        let sheets_token = require_nonempty(kv, "SHEETDESK_SHEETS_TOKEN")?;
        let spreadsheet_id = require_nonempty(kv, "SHEETDESK_SPREADSHEET_ID")?;

        let records_table = kv
            .get("SHEETDESK_RECORDS_TABLE")
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .unwrap_or("records")
            .to_string();

        let auth_log_table = kv
            .get("SHEETDESK_AUTH_LOG_TABLE")
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .unwrap_or("auth_log")
            .to_string();

        let access_codes_raw = require_nonempty(kv, "SHEETDESK_ACCESS_CODES")?;
        let access_codes = AccessCodes::from_json(&access_codes_raw).map_err(|err| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("SHEETDESK_ACCESS_CODES: {}", err),
        })?;

        let defaults = LookupFields::default();
        let lookup_fields = LookupFields {
            name: field_name(kv, "SHEETDESK_LOOKUP_NAME_FIELD", &defaults.name),
            customer: field_name(kv, "SHEETDESK_LOOKUP_CUSTOMER_FIELD", &defaults.customer),
            secret: field_name(kv, "SHEETDESK_LOOKUP_SECRET_FIELD", &defaults.secret),
        };

        let store_timeout_ms = parse_u64(
            kv.get("SHEETDESK_STORE_TIMEOUT_MS"),
            2000,
            "SHEETDESK_STORE_TIMEOUT_MS",
        )?;
        if store_timeout_ms == 0 {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "SHEETDESK_STORE_TIMEOUT_MS must be >= 1".to_string(),
            });
        }

        let store_retry_max_attempts = parse_u32(
            kv.get("SHEETDESK_STORE_RETRY_MAX_ATTEMPTS"),
            2,
            "SHEETDESK_STORE_RETRY_MAX_ATTEMPTS",
        )?;
        if store_retry_max_attempts == 0 || store_retry_max_attempts > 10 {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "SHEETDESK_STORE_RETRY_MAX_ATTEMPTS must be between 1 and 10".to_string(),
            });
        }

        let store_retry_base_backoff_ms = parse_u64(
            kv.get("SHEETDESK_STORE_RETRY_BASE_BACKOFF_MS"),
            50,
            "SHEETDESK_STORE_RETRY_BASE_BACKOFF_MS",
        )?;

        let rate_limit_window_secs = parse_u64(
            kv.get("SHEETDESK_RATE_LIMIT_WINDOW_SECS"),
            60,
            "SHEETDESK_RATE_LIMIT_WINDOW_SECS",
        )?;

        let rate_limit_per_window = parse_u32(
            kv.get("SHEETDESK_RATE_LIMIT_PER_WINDOW"),
            30,
            "SHEETDESK_RATE_LIMIT_PER_WINDOW",
        )?;

        Ok(Self {
            bind_addr,
            sheets_base_url,
            sheets_token,
            spreadsheet_id,
            records_table,
            auth_log_table,
            access_codes,
            lookup_fields,
            store_timeout_ms,
            store_retry_max_attempts,
            store_retry_base_backoff_ms,
            rate_limit_window_secs,
            rate_limit_per_window,
        })
    }
}

fn field_name(kv: &HashMap<String, String>, key: &'static str, default: &str) -> String {
    kv.get(key)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .unwrap_or(default)
        .to_string()
}

fn parse_env_file(path: &str) -> Result<HashMap<String, String>, StartupError> {
    let contents = std::fs::read_to_string(path).map_err(|_| StartupError {
        code: "ERR_CONFIG_FILE_READ",
        message: format!("failed to read config file at {}", path),
    })?;

    let mut kv = HashMap::new();

    for (idx, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (key, value) = line.split_once('=').ok_or_else(|| StartupError {
            code: "ERR_CONFIG_FILE_PARSE",
            message: format!("invalid config line {} (expected KEY=VALUE)", idx + 1),
        })?;

        let key = key.trim();
        if key.is_empty() {
            return Err(StartupError {
                code: "ERR_CONFIG_FILE_PARSE",
                message: format!("invalid config line {} (empty key)", idx + 1),
            });
        }

        let value = strip_quotes(value.trim());
        kv.insert(key.to_string(), value);
    }

    Ok(kv)
}

fn strip_quotes(s: &str) -> String {
    let bytes = s.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return s[1..bytes.len() - 1].to_string();
        }
    }
    s.to_string()
}

fn require_nonempty(
    kv: &HashMap<String, String>,
    key: &'static str,
) -> Result<String, StartupError> {
    let Some(value) = kv.get(key) else {
        return Err(StartupError {
            code: "ERR_MISSING_CONFIG",
            message: format!("missing required config key {}", key),
        });
    };

    let value = value.trim();
    if value.is_empty() {
        return Err(StartupError {
            code: "ERR_MISSING_CONFIG",
            message: format!("missing required config key {}", key),
        });
    }

    Ok(value.to_string())
}

fn parse_socket_addr(
    value: Option<&String>,
    default: SocketAddr,
    key: &'static str,
) -> Result<SocketAddr, StartupError> {
    match value {
        None => Ok(default),
        Some(v) => v.parse::<SocketAddr>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be a valid host:port socket address", key),
        }),
    }
}

fn parse_u64(value: Option<&String>, default: u64, key: &'static str) -> Result<u64, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.parse::<u64>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be an integer", key),
        }),
    }
}

fn parse_u32(value: Option<&String>, default: u32, key: &'static str) -> Result<u32, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.parse::<u32>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be an integer", key),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_kv() -> HashMap<String, String> {
        let mut kv = HashMap::new();
        kv.insert("SHEETDESK_SHEETS_TOKEN".to_string(), "token".to_string());
        kv.insert("SHEETDESK_SPREADSHEET_ID".to_string(), "sheet-1".to_string());
        kv.insert(
            "SHEETDESK_ACCESS_CODES".to_string(),
            r#"{"batman": "user"}"#.to_string(),
        );
        kv
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let config = GatewayConfig::from_kv(&minimal_kv()).expect("config should load");
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.records_table, "records");
        assert_eq!(config.auth_log_table, "auth_log");
        assert_eq!(config.store_retry_max_attempts, 2);
        assert_eq!(config.lookup_fields, LookupFields::default());
    }

    #[test]
    fn missing_required_keys_fail_with_code() {
        let mut kv = minimal_kv();
        kv.remove("SHEETDESK_ACCESS_CODES");
        let err = GatewayConfig::from_kv(&kv).unwrap_err();
        assert_eq!(err.code, "ERR_MISSING_CONFIG");
    }

    #[test]
    fn invalid_access_codes_fail_with_code() {
        let mut kv = minimal_kv();
        kv.insert(
            "SHEETDESK_ACCESS_CODES".to_string(),
            r#"{"code": "owner"}"#.to_string(),
        );
        let err = GatewayConfig::from_kv(&kv).unwrap_err();
        assert_eq!(err.code, "ERR_INVALID_CONFIG");
        assert!(err.message.contains("SHEETDESK_ACCESS_CODES"));
    }

    #[test]
    fn retry_attempts_are_bounded() {
        let mut kv = minimal_kv();
        kv.insert(
            "SHEETDESK_STORE_RETRY_MAX_ATTEMPTS".to_string(),
            "11".to_string(),
        );
        let err = GatewayConfig::from_kv(&kv).unwrap_err();
        assert_eq!(err.code, "ERR_INVALID_CONFIG");
    }

    #[test]
    fn custom_lookup_fields_are_honored() {
        let mut kv = minimal_kv();
        kv.insert(
            "SHEETDESK_LOOKUP_NAME_FIELD".to_string(),
            "user".to_string(),
        );
        let config = GatewayConfig::from_kv(&kv).expect("config should load");
        assert_eq!(config.lookup_fields.name, "user");
        assert_eq!(config.lookup_fields.secret, "secret");
    }
}
