use std::collections::HashSet;
use std::path::Path;

use crate::config::schema::{Config, FailurePolicy, PriceSourceKind};
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.health.failure_threshold == 0 {
        return Err(ConfigError::Validation {
            message: "health.failure_threshold must be at least 1".to_string(),
        });
    }
    if config.health.window_size == 0 {
        return Err(ConfigError::Validation {
            message: "health.window_size must be at least 1".to_string(),
        });
    }

    if config.stream.keepalive_ms == 0 {
        return Err(ConfigError::Validation {
            message: "stream.keepalive_ms must be positive".to_string(),
        });
    }
    if config.stream.keepalive_ms >= config.stream.max_lifetime_ms {
        return Err(ConfigError::Validation {
            message: format!(
                "stream.keepalive_ms ({}) must be below stream.max_lifetime_ms ({})",
                config.stream.keepalive_ms, config.stream.max_lifetime_ms
            ),
        });
    }

    if config.pipeline.market_fan_out == 0 {
        return Err(ConfigError::Validation {
            message: "pipeline.market_fan_out must be at least 1".to_string(),
        });
    }
    if config.pipeline.failure_policy.extraction != FailurePolicy::Fatal {
        return Err(ConfigError::Validation {
            message: "pipeline.failure_policy.extraction must be 'fatal'".to_string(),
        });
    }

    let mut names = HashSet::new();
    for source in &config.price_sources {
        if !names.insert(source.name.as_str()) {
            return Err(ConfigError::InvalidSource {
                name: source.name.clone(),
                reason: "Duplicate price source name".to_string(),
            });
        }
        if source.kind == PriceSourceKind::Http
            && source.base_url.as_deref().map_or(true, |u| u.trim().is_empty())
        {
            return Err(ConfigError::InvalidSource {
                name: source.name.clone(),
                reason: "http sources require base_url".to_string(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_uses_defaults() {
        let config = load_config_from_str("{}").unwrap();
        assert_eq!(config.health.failure_threshold, 5);
        assert_eq!(config.health.cooldown_ms, 60_000);
        assert_eq!(config.stream.keepalive_ms, 10_000);
        assert_eq!(config.stream.max_lifetime_ms, 300_000);
        assert_eq!(config.price_sources.len(), 1);
        assert_eq!(config.price_sources[0].kind, PriceSourceKind::Catalog);
        assert_eq!(
            config.pipeline.failure_policy.contextual,
            FailurePolicy::Degrade
        );
    }

    #[test]
    fn test_full_config() {
        let json = r#"{
            "version": "1.0",
            "server": { "listen": "0.0.0.0:9000" },
            "database": { "path": ":memory:" },
            "jobs": { "max_concurrent_jobs": 2 },
            "health": { "failure_threshold": 3, "cooldown_ms": 1000 },
            "pipeline": {
                "market_fan_out": 8,
                "failure_policy": { "market": "fatal" }
            },
            "price_sources": [
                { "name": "catalog", "kind": "catalog" },
                { "name": "priceX", "kind": "http", "base_url": "http://localhost:9100" }
            ]
        }"#;
        let config = load_config_from_str(json).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:9000");
        assert_eq!(config.jobs.max_concurrent_jobs, 2);
        assert_eq!(config.health.failure_threshold, 3);
        assert_eq!(config.pipeline.market_fan_out, 8);
        assert_eq!(config.pipeline.failure_policy.market, FailurePolicy::Fatal);
        assert_eq!(config.price_sources.len(), 2);
    }

    #[test]
    fn test_schema_rejects_unknown_field() {
        let result = load_config_from_str(r#"{ "bogus": true }"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_schema_rejects_zero_threshold() {
        let result = load_config_from_str(r#"{ "health": { "failure_threshold": 0 } }"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_rejects_non_fatal_extraction() {
        let result = load_config_from_str(
            r#"{ "pipeline": { "failure_policy": { "extraction": "degrade" } } }"#,
        );
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_rejects_keepalive_over_lifetime() {
        let result = load_config_from_str(
            r#"{ "stream": { "keepalive_ms": 5000, "max_lifetime_ms": 1000 } }"#,
        );
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_rejects_http_source_without_url() {
        let result = load_config_from_str(
            r#"{ "price_sources": [ { "name": "x", "kind": "http" } ] }"#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidSource { .. })));
    }

    #[test]
    fn test_rejects_duplicate_source_names() {
        let result = load_config_from_str(
            r#"{ "price_sources": [
                { "name": "x", "kind": "catalog" },
                { "name": "x", "kind": "catalog" }
            ] }"#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidSource { .. })));
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config("/definitely/not/here.json");
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "logging": { "level": "debug", "json": true } }"#).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }
}
