// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Utility functions for configuration parsing.

/// Splits a comma separated broker list into endpoints.
///
/// Whitespace around entries is trimmed and empty entries are skipped, so an empty or
/// whitespace-only string yields no brokers at all.
///
/// # Examples
///
/// ```
/// use syslog_bridge::util::parse_broker_list;
///
/// assert_eq!(
///     parse_broker_list("kafka-1:9092, kafka-2:9092"),
///     vec!["kafka-1:9092".to_string(), "kafka-2:9092".to_string()]
/// );
/// assert!(parse_broker_list("  ").is_empty());
/// ```
pub fn parse_broker_list(brokers: &str) -> Vec<String> {
    brokers
        .split(',')
        .map(str::trim)
        .filter(|broker| !broker.is_empty())
        .map(str::to_string)
        .collect()
}

/// Client identifier reported to the brokers when none is configured.
///
/// Uses the host name when the environment provides one, so brokers can tell instances apart,
/// and the process id otherwise.
pub fn default_client_id() -> String {
    match std::env::var("HOSTNAME") {
        Ok(host) if !host.trim().is_empty() => format!("syslog-bridge-{}", host.trim()),
        _ => format!("syslog-bridge-{}", std::process::id()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_broker_list_single() {
        assert_eq!(
            parse_broker_list("localhost:9092"),
            vec!["localhost:9092".to_string()]
        );
    }

    #[test]
    fn test_parse_broker_list_trims_and_skips_empty() {
        assert_eq!(
            parse_broker_list(" a:9092 ,, b:9092 ,"),
            vec!["a:9092".to_string(), "b:9092".to_string()]
        );
    }

    #[test]
    fn test_parse_broker_list_empty() {
        assert!(parse_broker_list("").is_empty());
        assert!(parse_broker_list(",, ,").is_empty());
    }

    #[test]
    fn test_default_client_id_prefix() {
        assert!(default_client_id().starts_with("syslog-bridge-"));
    }
}
