//! Bridge configuration loaded from environment variables.
//!
//! | Variable | Required | Default |
//! |---|---|---|
//! | `KAFKA_URL` | yes | broker list, `;` or `,` separated |
//! | `KAFKA_REQUEST_TOPIC` | yes | |
//! | `KAFKA_RESPONSE_TOPIC` | yes | |
//! | `KAFKA_GROUP_ID` | yes | |
//! | `BRIDGE_REPLY_TIMEOUT_SECS` | no | 60 |
//! | `BRIDGE_MAX_PENDING` | no | unbounded |
//! | `BRIDGE_MAX_IN_FLIGHT` | no | 64 |
//! | `BRIDGE_DRAIN_TIMEOUT_SECS` | no | 30 |
//! | `BRIDGE_REPLY_FORMAT` | no | `tagged` |
//! | `METRICS_ADDR` | no | disabled |
//!
//! Every missing or malformed variable is collected, and all of them are
//! reported together in a single [`ConfigError::Invalid`].

use crate::correlator::{Correlator, DEFAULT_REPLY_TIMEOUT};
use crate::dispatch::{DEFAULT_DRAIN_TIMEOUT, DEFAULT_MAX_IN_FLIGHT, DispatchLoop, Handler, ShutdownMode};
use reply_bridge_core::{ReplyFormat, Transport};
use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// One or more variables are missing or malformed
    #[error("config validation failed:\n  {}", .0.join("\n  "))]
    Invalid(Vec<String>),
}

/// Settings shared by both ends of the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Kafka/Redpanda bootstrap servers
    pub brokers: Vec<String>,
    /// Topic requests are published to
    pub request_topic: String,
    /// Topic replies are published to
    pub response_topic: String,
    /// Consumer group of this process
    pub group_id: String,
    /// Default wait for a reply
    pub reply_timeout: Duration,
    /// Ceiling on outstanding requests (`None` = unbounded)
    pub max_pending: Option<usize>,
    /// Concurrent handler invocations on the receiving side
    pub max_in_flight: usize,
    /// How long shutdown waits for in-flight handlers
    pub drain_timeout: Duration,
    /// Reply payload wire format
    pub reply_format: ReplyFormat,
    /// Prometheus listener address (`None` = no listener)
    pub metrics_addr: Option<SocketAddr>,
}

impl BridgeConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] listing every missing or malformed variable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through `lookup`, which returns the value of a
    /// variable or `None` when it is unset.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] listing every missing or malformed variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut errors = Vec::new();
        let mut vars = Vars {
            lookup: &lookup,
            errors: &mut errors,
        };

        let brokers = vars.required("KAFKA_URL").map(|raw| {
            raw.split([';', ','])
                .map(str::trim)
                .filter(|broker| !broker.is_empty())
                .map(String::from)
                .collect::<Vec<_>>()
        });
        if brokers.as_ref().is_some_and(Vec::is_empty) {
            vars.errors.push("KAFKA_URL must list at least one broker".to_string());
        }

        let request_topic = vars.required("KAFKA_REQUEST_TOPIC");
        let response_topic = vars.required("KAFKA_RESPONSE_TOPIC");
        let group_id = vars.required("KAFKA_GROUP_ID");

        let reply_timeout = vars
            .parsed::<u64>("BRIDGE_REPLY_TIMEOUT_SECS")
            .map_or(DEFAULT_REPLY_TIMEOUT, Duration::from_secs);
        let max_pending = vars.parsed::<usize>("BRIDGE_MAX_PENDING");
        let max_in_flight = vars
            .parsed::<usize>("BRIDGE_MAX_IN_FLIGHT")
            .unwrap_or(DEFAULT_MAX_IN_FLIGHT);
        let drain_timeout = vars
            .parsed::<u64>("BRIDGE_DRAIN_TIMEOUT_SECS")
            .map_or(DEFAULT_DRAIN_TIMEOUT, Duration::from_secs);
        let reply_format = vars
            .parsed::<ReplyFormat>("BRIDGE_REPLY_FORMAT")
            .unwrap_or_default();
        let metrics_addr = vars.parsed::<SocketAddr>("METRICS_ADDR");

        if reply_timeout.is_zero() {
            errors.push("BRIDGE_REPLY_TIMEOUT_SECS must be greater than 0".to_string());
        }
        if max_pending == Some(0) {
            errors.push("BRIDGE_MAX_PENDING must be greater than 0".to_string());
        }
        if max_in_flight == 0 {
            errors.push("BRIDGE_MAX_IN_FLIGHT must be greater than 0".to_string());
        }

        match (brokers, request_topic, response_topic, group_id) {
            (Some(brokers), Some(request_topic), Some(response_topic), Some(group_id))
                if errors.is_empty() =>
            {
                Ok(Self {
                    brokers,
                    request_topic,
                    response_topic,
                    group_id,
                    reply_timeout,
                    max_pending,
                    max_in_flight,
                    drain_timeout,
                    reply_format,
                    metrics_addr,
                })
            },
            _ => Err(ConfigError::Invalid(errors)),
        }
    }

    /// Broker list in the comma-separated form Kafka clients expect.
    #[must_use]
    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }

    /// Shutdown mode of the dispatch loop.
    #[must_use]
    pub const fn shutdown_mode(&self) -> ShutdownMode {
        ShutdownMode::Drain(self.drain_timeout)
    }

    /// Build the sender-side correlator publishing to the request topic.
    #[must_use]
    pub fn correlator(&self, transport: Arc<dyn Transport>) -> Correlator {
        let correlator = Correlator::new(transport, self.request_topic.clone())
            .with_default_timeout(self.reply_timeout)
            .with_reply_format(self.reply_format);
        match self.max_pending {
            Some(limit) => correlator.with_max_pending(limit),
            None => correlator,
        }
    }

    /// Build the receiver-side dispatch loop replying on the response topic.
    #[must_use]
    pub fn dispatch_loop(&self, transport: Arc<dyn Transport>, handler: Arc<dyn Handler>) -> DispatchLoop {
        DispatchLoop::new(transport, self.response_topic.clone(), handler)
            .with_max_in_flight(self.max_in_flight.max(1))
            .with_reply_format(self.reply_format)
            .with_shutdown(self.shutdown_mode())
    }
}

struct Vars<'a, F> {
    lookup: &'a F,
    errors: &'a mut Vec<String>,
}

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|value| !value.trim().is_empty())
    }

    fn required(&mut self, name: &str) -> Option<String> {
        let value = self.get(name).map(|value| value.trim().to_string());
        if value.is_none() {
            self.errors.push(format!("{name} is required"));
        }
        value
    }

    fn parsed<T>(&mut self, name: &str) -> Option<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let raw = self.get(name)?;
        match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(e) => {
                self.errors.push(format!("{name}={raw:?} is invalid: {e}"));
                None
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    const REQUIRED: &[(&str, &str)] = &[
        ("KAFKA_URL", "broker-1:9092;broker-2:9092"),
        ("KAFKA_REQUEST_TOPIC", "payments.requests"),
        ("KAFKA_RESPONSE_TOPIC", "payments.replies"),
        ("KAFKA_GROUP_ID", "payments"),
    ];

    #[test]
    fn loads_required_variables_with_defaults() {
        let config = BridgeConfig::from_lookup(lookup(REQUIRED)).unwrap();

        assert_eq!(config.brokers, vec!["broker-1:9092", "broker-2:9092"]);
        assert_eq!(config.bootstrap_servers(), "broker-1:9092,broker-2:9092");
        assert_eq!(config.request_topic, "payments.requests");
        assert_eq!(config.response_topic, "payments.replies");
        assert_eq!(config.group_id, "payments");
        assert_eq!(config.reply_timeout, Duration::from_secs(60));
        assert_eq!(config.max_pending, None);
        assert_eq!(config.max_in_flight, 64);
        assert_eq!(config.shutdown_mode(), ShutdownMode::Drain(Duration::from_secs(30)));
        assert_eq!(config.reply_format, ReplyFormat::Tagged);
        assert_eq!(config.metrics_addr, None);
    }

    #[test]
    fn optional_variables_override_defaults() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([
            ("KAFKA_URL", "a:9092, b:9092"),
            ("BRIDGE_REPLY_TIMEOUT_SECS", "5"),
            ("BRIDGE_MAX_PENDING", "100"),
            ("BRIDGE_MAX_IN_FLIGHT", "8"),
            ("BRIDGE_DRAIN_TIMEOUT_SECS", "2"),
            ("BRIDGE_REPLY_FORMAT", "legacy"),
            ("METRICS_ADDR", "0.0.0.0:9090"),
        ]);
        let config = BridgeConfig::from_lookup(lookup(&vars)).unwrap();

        assert_eq!(config.brokers, vec!["a:9092", "b:9092"]);
        assert_eq!(config.reply_timeout, Duration::from_secs(5));
        assert_eq!(config.max_pending, Some(100));
        assert_eq!(config.max_in_flight, 8);
        assert_eq!(config.drain_timeout, Duration::from_secs(2));
        assert_eq!(config.reply_format, ReplyFormat::Legacy);
        assert_eq!(config.metrics_addr, Some("0.0.0.0:9090".parse().unwrap()));
    }

    #[test]
    fn reports_every_problem_at_once() {
        let err = BridgeConfig::from_lookup(lookup(&[
            ("KAFKA_URL", "localhost:9092"),
            ("BRIDGE_MAX_IN_FLIGHT", "lots"),
        ]))
        .unwrap_err();

        let ConfigError::Invalid(problems) = &err;
        assert_eq!(problems.len(), 4);
        assert!(problems.contains(&"KAFKA_REQUEST_TOPIC is required".to_string()));
        assert!(problems.contains(&"KAFKA_RESPONSE_TOPIC is required".to_string()));
        assert!(problems.contains(&"KAFKA_GROUP_ID is required".to_string()));
        assert!(problems.iter().any(|p| p.starts_with("BRIDGE_MAX_IN_FLIGHT")));

        let rendered = err.to_string();
        assert!(rendered.starts_with("config validation failed:\n  "));
    }

    #[test]
    fn rejects_zero_limits() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([("BRIDGE_MAX_PENDING", "0"), ("BRIDGE_REPLY_TIMEOUT_SECS", "0")]);

        let ConfigError::Invalid(problems) = BridgeConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert_eq!(problems.len(), 2);
    }

    #[test]
    fn blank_broker_list_is_rejected() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("KAFKA_URL", " ; , "));

        let ConfigError::Invalid(problems) = BridgeConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert_eq!(problems, vec!["KAFKA_URL must list at least one broker".to_string()]);
    }
}
