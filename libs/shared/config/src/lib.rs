use std::env;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub supabase_service_role_key: String,
    pub port: u16,
    pub telehealth: TelehealthSettings,
}

/// Knobs for the session orchestrator, the waiting room and webhook ingestion
#[derive(Debug, Clone)]
pub struct TelehealthSettings {
    pub conferencing_webhook_secret: String,
    pub session_store_backend: SessionStoreBackend,
    pub waiting_room_abandonment_minutes: i64,
    pub wait_time_refresh_seconds: u64,
    pub lookup_retry_max_attempts: u32,
    pub lookup_retry_base_delay_ms: u64,
    pub lookup_retry_max_delay_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStoreBackend {
    Memory,
    Supabase,
}

impl SessionStoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStoreBackend::Memory => "memory",
            SessionStoreBackend::Supabase => "supabase",
        }
    }
}

impl FromStr for SessionStoreBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(SessionStoreBackend::Memory),
            "supabase" => Ok(SessionStoreBackend::Supabase),
            other => Err(format!("unknown session store backend '{}'", other)),
        }
    }
}

impl Default for TelehealthSettings {
    fn default() -> Self {
        Self {
            conferencing_webhook_secret: String::new(),
            session_store_backend: SessionStoreBackend::Memory,
            waiting_room_abandonment_minutes: 30,
            wait_time_refresh_seconds: 60,
            lookup_retry_max_attempts: 4,
            lookup_retry_base_delay_ms: 200,
            lookup_retry_max_delay_ms: 5_000,
        }
    }
}

impl TelehealthSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            conferencing_webhook_secret: env::var("CONFERENCING_WEBHOOK_SECRET")
                .unwrap_or_else(|_| {
                    warn!("CONFERENCING_WEBHOOK_SECRET not set, webhooks will be rejected");
                    String::new()
                }),
            session_store_backend: parse_or("SESSION_STORE_BACKEND", defaults.session_store_backend),
            waiting_room_abandonment_minutes: parse_or(
                "WAITING_ROOM_ABANDONMENT_MINUTES",
                defaults.waiting_room_abandonment_minutes,
            ),
            wait_time_refresh_seconds: parse_or(
                "WAIT_TIME_REFRESH_SECONDS",
                defaults.wait_time_refresh_seconds,
            ),
            lookup_retry_max_attempts: parse_or(
                "LOOKUP_RETRY_MAX_ATTEMPTS",
                defaults.lookup_retry_max_attempts,
            ),
            lookup_retry_base_delay_ms: parse_or(
                "LOOKUP_RETRY_BASE_DELAY_MS",
                defaults.lookup_retry_base_delay_ms,
            ),
            lookup_retry_max_delay_ms: parse_or(
                "LOOKUP_RETRY_MAX_DELAY_MS",
                defaults.lookup_retry_max_delay_ms,
            ),
        }
    }

    pub fn is_webhook_configured(&self) -> bool {
        !self.conferencing_webhook_secret.is_empty()
    }
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
                    warn!("SUPABASE_SERVICE_ROLE_KEY not set, using empty value");
                    String::new()
                }),
            port: parse_or("PORT", 3000),
            telehealth: TelehealthSettings::from_env(),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_jwt_secret.is_empty() && self.telehealth.is_webhook_configured()
    }

    pub fn is_supabase_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_service_role_key.is_empty()
    }
}

fn parse_or<T>(key: &str, default: T) -> T
where
    T: FromStr + Clone,
{
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} has an invalid value '{}', using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}
