use std::env;

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub service_version: String,
    pub json_logs: bool,
    pub default_filter: String,
}

impl TelemetryConfig {
    pub fn from_env(default_service_name: &str, default_service_version: &str) -> Self {
        Self::from_lookup(default_service_name, default_service_version, |key| {
            env::var(key).ok()
        })
    }

    pub fn from_lookup<F>(
        default_service_name: &str,
        default_service_version: &str,
        lookup: F,
    ) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let service_name = lookup("OTEL_SERVICE_NAME")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| default_service_name.to_string());
        let service_version = lookup("OTEL_SERVICE_VERSION")
            .unwrap_or_else(|| default_service_version.to_string());
        let json_logs = lookup("LOG_FORMAT")
            .map(|v| !matches!(v.to_lowercase().as_str(), "text" | "pretty" | "plain"))
            .unwrap_or(true);
        let default_filter = lookup("LOG_LEVEL")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "info".to_string());

        Self {
            service_name,
            service_version,
            json_logs,
            default_filter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_to_json_logs() {
        let cfg = TelemetryConfig::from_lookup("gsm-amqp", "0.1.0", lookup(&[]));
        assert_eq!(cfg.service_name, "gsm-amqp");
        assert_eq!(cfg.service_version, "0.1.0");
        assert!(cfg.json_logs);
        assert_eq!(cfg.default_filter, "info");
    }

    #[test]
    fn text_format_disables_json() {
        let cfg = TelemetryConfig::from_lookup(
            "gsm-amqp",
            "0.1.0",
            lookup(&[
                ("LOG_FORMAT", "Pretty"),
                ("OTEL_SERVICE_NAME", "bridge"),
                ("LOG_LEVEL", "debug"),
            ]),
        );
        assert!(!cfg.json_logs);
        assert_eq!(cfg.service_name, "bridge");
        assert_eq!(cfg.default_filter, "debug");
    }
}
