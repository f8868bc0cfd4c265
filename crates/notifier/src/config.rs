use std::str::FromStr;
use std::time::Duration;

use regex::Regex;

use crate::correlator::PodWait;
use crate::notification::EventSwitches;
use crate::{Error, Result};

pub const DEFAULT_SLACK_API_URL: &str = "https://slack.com/api";
pub const DEFAULT_DOGSTATSD_ADDR: &str = "unix:///var/run/datadog/dsd.socket";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    #[default]
    Parallel,
    Sequential,
}

impl FromStr for DeliveryMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "parallel" => Ok(DeliveryMode::Parallel),
            "sequential" => Ok(DeliveryMode::Sequential),
            other => Err(Error::Config(format!(
                "NOTIFY_DELIVERY_MODE must be parallel or sequential, got {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub kube: KubeConfig,
    pub delivery: DeliveryConfig,
    pub pod_wait: PodWait,
    pub backends: Vec<BackendConfig>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: String,
}

#[derive(Debug, Clone)]
pub struct KubeConfig {
    /// Empty watches every namespace.
    pub namespace: String,
    pub cronjob_regex: Option<Regex>,
}

#[derive(Debug, Clone, Copy)]
pub struct DeliveryConfig {
    pub mode: DeliveryMode,
    pub notify_timeout: Duration,
    pub log_fetch_timeout: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            mode: DeliveryMode::Parallel,
            notify_timeout: Duration::from_secs(30),
            log_fetch_timeout: Duration::from_secs(30),
        }
    }
}

/// One entry of the backend registry. The router builds a backend per entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    Slack(SlackConfig),
    MsTeamsV2(MsTeamsConfig),
    Datadog(DatadogConfig),
}

impl BackendConfig {
    pub fn name(&self) -> &'static str {
        match self {
            BackendConfig::Slack(_) => "slack",
            BackendConfig::MsTeamsV2(_) => "msteamsv2",
            BackendConfig::Datadog(_) => "datadog",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlackConfig {
    pub token: String,
    pub channel: String,
    pub succeed_channel: String,
    pub failed_channel: String,
    pub username: String,
    pub api_url: String,
    pub switches: EventSwitches,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsTeamsConfig {
    pub webhook_url: String,
    pub switches: EventSwitches,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatadogConfig {
    pub agent_addr: String,
    pub tags: Vec<String>,
    pub namespace: String,
}

impl Default for DatadogConfig {
    fn default() -> Self {
        Self {
            agent_addr: DEFAULT_DOGSTATSD_ADDR.to_string(),
            tags: Vec::new(),
            namespace: String::new(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load environment variables from .env file if it exists
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; `load` passes the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let cronjob_regex = match env.non_empty("CRONJOB_REGEX") {
            Some(pattern) => Some(Regex::new(&pattern).map_err(|e| {
                Error::Config(format!("CRONJOB_REGEX is not a valid regex: {}", e))
            })?),
            None => None,
        };

        let delivery = DeliveryConfig {
            mode: match env.non_empty("NOTIFY_DELIVERY_MODE") {
                Some(mode) => mode.parse()?,
                None => DeliveryMode::default(),
            },
            notify_timeout: env.seconds("NOTIFY_TIMEOUT_SECS", 30)?,
            log_fetch_timeout: env.seconds("LOG_FETCH_TIMEOUT_SECS", 30)?,
        };

        let pod_wait = PodWait {
            poll_interval: env.seconds("POD_POLL_INTERVAL_SECS", 10)?,
            timeout: env.seconds("POD_WAIT_TIMEOUT_SECS", 20 * 60)?,
        };

        let mut backends = Vec::new();
        if env.flag("SLACK_ENABLE", true) {
            let slack = SlackConfig {
                token: env.string("SLACK_TOKEN", ""),
                channel: env.string("SLACK_CHANNEL", ""),
                succeed_channel: env.string("SLACK_SUCCEED_CHANNEL", ""),
                failed_channel: env.string("SLACK_FAILED_CHANNEL", ""),
                username: env.string("SLACK_USERNAME", ""),
                api_url: env.string("SLACK_API_URL", DEFAULT_SLACK_API_URL),
                switches: env.switches("SLACK"),
            };
            if slack.token.is_empty() {
                return Err(Error::Config(
                    "SLACK_TOKEN must be set when Slack is enabled".to_string(),
                ));
            }
            backends.push(BackendConfig::Slack(slack));
        }
        if env.flag("MSTEAMSV2_ENABLE", false) {
            let teams = MsTeamsConfig {
                webhook_url: env.string("MSTEAMSV2_WEBHOOK_URL", ""),
                switches: env.switches("MSTEAMSV2"),
            };
            if teams.webhook_url.is_empty() {
                return Err(Error::Config(
                    "MSTEAMSV2_WEBHOOK_URL must be set when Teams is enabled".to_string(),
                ));
            }
            backends.push(BackendConfig::MsTeamsV2(teams));
        }
        if env.flag("DATADOG_ENABLE", false) {
            backends.push(BackendConfig::Datadog(DatadogConfig {
                agent_addr: env.string("DD_AGENT_ADDR", DEFAULT_DOGSTATSD_ADDR),
                tags: env
                    .string("DD_TAGS", "")
                    .split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(String::from)
                    .collect(),
                namespace: env.string("DD_NAMESPACE", ""),
            }));
        }

        if backends.is_empty() {
            tracing::warn!("No notification backend is enabled; transitions will only be logged");
        }

        Ok(Config {
            server: ServerConfig {
                addr: env.string("SERVER_ADDR", "0.0.0.0:8080"),
            },
            kube: KubeConfig {
                namespace: env.string("KUBE_NAMESPACE", ""),
                cronjob_regex,
            },
            delivery,
            pod_wait,
            backends,
        })
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn non_empty(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.non_empty(key).unwrap_or_else(|| default.to_string())
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        match self.non_empty(key) {
            Some(v) => matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes"),
            None => default,
        }
    }

    // Only the literal "false" turns an event off.
    fn switch(&self, key: &str) -> bool {
        self.non_empty(key).as_deref() != Some("false")
    }

    fn switches(&self, prefix: &str) -> EventSwitches {
        EventSwitches {
            started: self.switch(&format!("{}_STARTED_NOTIFY", prefix)),
            succeeded: self.switch(&format!("{}_SUCCEEDED_NOTIFY", prefix)),
            failed: self.switch(&format!("{}_FAILED_NOTIFY", prefix)),
        }
    }

    fn seconds(&self, key: &str, default: u64) -> Result<Duration> {
        match self.non_empty(key) {
            Some(v) => v
                .trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| Error::Config(format!("{} must be a whole number of seconds, got {}", key, v))),
            None => Ok(Duration::from_secs(default)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_with_slack_token() {
        let config = load(&[("SLACK_TOKEN", "xoxb-1")]).unwrap();

        assert_eq!(config.server.addr, "0.0.0.0:8080");
        assert_eq!(config.kube.namespace, "");
        assert!(config.kube.cronjob_regex.is_none());
        assert_eq!(config.delivery.mode, DeliveryMode::Parallel);
        assert_eq!(config.delivery.notify_timeout, Duration::from_secs(30));
        assert_eq!(config.pod_wait.poll_interval, Duration::from_secs(10));
        assert_eq!(config.pod_wait.timeout, Duration::from_secs(1200));

        assert_eq!(config.backends.len(), 1);
        let BackendConfig::Slack(slack) = &config.backends[0] else {
            panic!("expected slack backend");
        };
        assert_eq!(slack.api_url, DEFAULT_SLACK_API_URL);
        assert_eq!(slack.switches, EventSwitches::default());
    }

    #[test]
    fn test_missing_slack_token_is_a_config_error() {
        assert!(matches!(load(&[]), Err(Error::Config(msg)) if msg.contains("SLACK_TOKEN")));
    }

    #[test]
    fn test_disabled_slack_needs_no_token() {
        let config = load(&[("SLACK_ENABLE", "false")]).unwrap();
        assert!(config.backends.is_empty());
    }

    #[test]
    fn test_only_literal_false_disables_an_event() {
        let config = load(&[
            ("SLACK_TOKEN", "xoxb-1"),
            ("SLACK_STARTED_NOTIFY", "false"),
            ("SLACK_SUCCEEDED_NOTIFY", "no"),
            ("SLACK_FAILED_NOTIFY", "FALSE"),
        ])
        .unwrap();

        let BackendConfig::Slack(slack) = &config.backends[0] else {
            panic!("expected slack backend");
        };
        assert!(!slack.switches.started);
        assert!(slack.switches.succeeded);
        assert!(slack.switches.failed);
    }

    #[test]
    fn test_all_backends_in_registry_order() {
        let config = load(&[
            ("SLACK_TOKEN", "xoxb-1"),
            ("MSTEAMSV2_ENABLE", "true"),
            ("MSTEAMSV2_WEBHOOK_URL", "https://example.webhook.office.com/x"),
            ("DATADOG_ENABLE", "true"),
            ("DD_TAGS", "env:prod, team:batch,"),
            ("DD_NAMESPACE", "prod."),
        ])
        .unwrap();

        let names: Vec<_> = config.backends.iter().map(BackendConfig::name).collect();
        assert_eq!(names, ["slack", "msteamsv2", "datadog"]);
        assert_eq!(
            config.backends[2],
            BackendConfig::Datadog(DatadogConfig {
                agent_addr: DEFAULT_DOGSTATSD_ADDR.to_string(),
                tags: vec!["env:prod".to_string(), "team:batch".to_string()],
                namespace: "prod.".to_string(),
            })
        );
    }

    #[test]
    fn test_teams_requires_webhook() {
        let result = load(&[("SLACK_ENABLE", "false"), ("MSTEAMSV2_ENABLE", "true")]);
        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("MSTEAMSV2_WEBHOOK_URL")));
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        assert!(matches!(
            load(&[("SLACK_ENABLE", "false"), ("CRONJOB_REGEX", "(")]),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            load(&[("SLACK_ENABLE", "false"), ("NOTIFY_TIMEOUT_SECS", "soon")]),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            load(&[("SLACK_ENABLE", "false"), ("NOTIFY_DELIVERY_MODE", "random")]),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("SLACK_ENABLE", "false"),
            ("KUBE_NAMESPACE", "batch"),
            ("CRONJOB_REGEX", "^nightly-"),
            ("NOTIFY_DELIVERY_MODE", "Sequential"),
            ("POD_POLL_INTERVAL_SECS", "1"),
            ("POD_WAIT_TIMEOUT_SECS", "5"),
            ("SERVER_ADDR", "127.0.0.1:9000"),
        ])
        .unwrap();

        assert_eq!(config.kube.namespace, "batch");
        assert!(config.kube.cronjob_regex.unwrap().is_match("nightly-backup"));
        assert_eq!(config.delivery.mode, DeliveryMode::Sequential);
        assert_eq!(config.pod_wait.poll_interval, Duration::from_secs(1));
        assert_eq!(config.pod_wait.timeout, Duration::from_secs(5));
        assert_eq!(config.server.addr, "127.0.0.1:9000");
    }
}
