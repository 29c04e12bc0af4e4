use std::time::Duration;

use super::parsing::{
    env_optional, env_or_default, parse_base_url, parse_bool, parse_cors_origins,
    parse_environment, parse_positive_u64, parse_u64,
};
use super::types::{
    ApiSettings, AssessmentSettings, ConfigError, CorsSettings, DeliverySettings,
    RuntimeSettings, ServerHost, ServerPort, ServerSettings, Settings, TelemetrySettings,
};

const DEFAULT_ASSESSMENT_API_URL: &str = "http://localhost:5000/api";

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("PICRETE_HOST", "0.0.0.0");
        let port = env_or_default("PICRETE_PORT", "8100");

        let environment =
            parse_environment(env_optional("PICRETE_ENV").or_else(|| env_optional("ENVIRONMENT")));
        let strict_config =
            env_optional("PICRETE_STRICT_CONFIG").map(|value| parse_bool(&value)).unwrap_or(false)
                || environment.is_production();

        let project_name = env_or_default("PROJECT_NAME", "Picrete Delivery");
        let version = env_or_default("VERSION", env!("CARGO_PKG_VERSION"));
        let api_v1_str = env_or_default("API_V1_STR", "/api/v1");

        let cors_origins = parse_cors_origins(env_optional("BACKEND_CORS_ORIGINS"))?;

        let explicit_base_url = env_optional("ASSESSMENT_API_URL");
        let base_url_explicit = explicit_base_url.is_some();
        let base_url = parse_base_url(
            "ASSESSMENT_API_URL",
            explicit_base_url.unwrap_or_else(|| DEFAULT_ASSESSMENT_API_URL.to_string()),
        )?;
        let request_timeout_seconds = parse_positive_u64(
            "ASSESSMENT_REQUEST_TIMEOUT_SECONDS",
            env_or_default("ASSESSMENT_REQUEST_TIMEOUT_SECONDS", "15"),
        )?;
        let connect_timeout_seconds = parse_positive_u64(
            "ASSESSMENT_CONNECT_TIMEOUT_SECONDS",
            env_or_default("ASSESSMENT_CONNECT_TIMEOUT_SECONDS", "5"),
        )?;

        let timer_tick_millis =
            parse_positive_u64("TIMER_TICK_MILLIS", env_or_default("TIMER_TICK_MILLIS", "1000"))?;
        let auto_save_interval_seconds = parse_positive_u64(
            "AUTO_SAVE_INTERVAL_SECONDS",
            env_or_default("AUTO_SAVE_INTERVAL_SECONDS", "30"),
        )?;
        let max_concurrent_sessions = parse_positive_u64(
            "MAX_CONCURRENT_SESSIONS",
            env_or_default("MAX_CONCURRENT_SESSIONS", "500"),
        )?;
        let completed_session_retention_seconds = parse_u64(
            "COMPLETED_SESSION_RETENTION_SECONDS",
            env_or_default("COMPLETED_SESSION_RETENTION_SECONDS", "300"),
        )?;

        let log_level = env_or_default("PICRETE_LOG_LEVEL", "info");
        let json = env_optional("PICRETE_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            server: ServerSettings {
                host: ServerHost::parse(host)?,
                port: ServerPort::parse(port)?,
            },
            runtime: RuntimeSettings { environment, strict_config },
            api: ApiSettings { project_name, version, api_v1_str },
            cors: CorsSettings { origins: cors_origins },
            assessment: AssessmentSettings {
                base_url,
                base_url_explicit,
                request_timeout_seconds,
                connect_timeout_seconds,
            },
            delivery: DeliverySettings {
                timer_tick_millis,
                auto_save_interval_seconds,
                max_concurrent_sessions,
                completed_session_retention_seconds,
            },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn server_host(&self) -> &str {
        &self.server.host.0
    }

    pub(crate) fn server_port(&self) -> u16 {
        self.server.port.0
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn cors(&self) -> &CorsSettings {
        &self.cors
    }

    pub(crate) fn assessment(&self) -> &AssessmentSettings {
        &self.assessment
    }

    pub(crate) fn delivery(&self) -> &DeliverySettings {
        &self.delivery
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.delivery.timer_tick_millis > self.delivery.auto_save_interval_seconds * 1000 {
            return Err(ConfigError::InvalidValue {
                field: "TIMER_TICK_MILLIS",
                value: self.delivery.timer_tick_millis.to_string(),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if !self.assessment.base_url_explicit {
            return Err(ConfigError::MissingSetting("ASSESSMENT_API_URL"));
        }

        Ok(())
    }
}

impl DeliverySettings {
    pub(crate) fn tick_period(&self) -> Duration {
        Duration::from_millis(self.timer_tick_millis)
    }

    pub(crate) fn auto_save_period(&self) -> Duration {
        Duration::from_secs(self.auto_save_interval_seconds)
    }

    pub(crate) fn completed_retention(&self) -> Duration {
        Duration::from_secs(self.completed_session_retention_seconds)
    }
}
