use std::env;
use tracing::warn;

pub const DEFAULT_SERVER_PORT: u16 = 3000;
pub const DEFAULT_AUDIT_LOG_TTL_DAYS: i64 = 90;
pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 300;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub supabase_service_role_key: String,
    pub server_port: u16,
    pub audit_log_ttl_days: i64,
    pub sweep_interval_seconds: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            supabase_service_role_key: env::var("SUPABASE_SERVICE_ROLE_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_SERVICE_ROLE_KEY not set, background sweeps disabled");
                    String::new()
                }),
            server_port: parse_or_default("SERVER_PORT", DEFAULT_SERVER_PORT),
            audit_log_ttl_days: parse_or_default("AUDIT_LOG_TTL_DAYS", DEFAULT_AUDIT_LOG_TTL_DAYS),
            sweep_interval_seconds: parse_or_default("SWEEP_INTERVAL_SECONDS", DEFAULT_SWEEP_INTERVAL_SECONDS),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }

    pub fn is_sweeper_configured(&self) -> bool {
        self.is_configured() && !self.supabase_service_role_key.is_empty()
    }
}

fn parse_or_default<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display + Copy,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "anon".to_string(),
            supabase_jwt_secret: "secret".to_string(),
            supabase_service_role_key: String::new(),
            server_port: DEFAULT_SERVER_PORT,
            audit_log_ttl_days: DEFAULT_AUDIT_LOG_TTL_DAYS,
            sweep_interval_seconds: DEFAULT_SWEEP_INTERVAL_SECONDS,
        }
    }

    #[test]
    fn sweeper_requires_service_role_key() {
        let mut config = base_config();
        assert!(config.is_configured());
        assert!(!config.is_sweeper_configured());

        config.supabase_service_role_key = "service".to_string();
        assert!(config.is_sweeper_configured());
    }

    #[test]
    fn missing_jwt_secret_is_not_configured() {
        let mut config = base_config();
        config.supabase_jwt_secret.clear();
        assert!(!config.is_configured());
    }

    #[test]
    fn invalid_numeric_env_falls_back_to_default() {
        env::set_var("MEDIBOOK_TEST_PORT", "not-a-port");
        assert_eq!(parse_or_default("MEDIBOOK_TEST_PORT", 3000u16), 3000);
        env::set_var("MEDIBOOK_TEST_PORT", "8080");
        assert_eq!(parse_or_default("MEDIBOOK_TEST_PORT", 3000u16), 8080);
        env::remove_var("MEDIBOOK_TEST_PORT");
    }
}
