//! Configuration validation.
//!
//! Semantic checks run after serde has accepted the syntax. All violations
//! are collected so a broken file is fixed in one pass.

use std::fmt;

use crate::config::schema::PipelineConfig;
use crate::pipeline::mint::check_suffix;

/// A single semantic violation in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn check_url(field: &str, value: &str, errors: &mut Vec<ValidationError>) {
    match url::Url::parse(value) {
        Ok(parsed) if parsed.scheme() == "http" || parsed.scheme() == "https" => {}
        Ok(parsed) => errors.push(ValidationError::new(
            field,
            format!("unsupported scheme '{}'", parsed.scheme()),
        )),
        Err(e) => errors.push(ValidationError::new(field, format!("invalid URL: {e}"))),
    }
}

/// Validate a parsed configuration, returning every violation found.
pub fn validate_config(config: &PipelineConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_url("rpc.url", &config.rpc.url, &mut errors);
    for (i, url) in config.rpc.failover_urls.iter().enumerate() {
        check_url(&format!("rpc.failover_urls[{i}]"), url, &mut errors);
    }
    if config.rpc.timeout_secs == 0 {
        errors.push(ValidationError::new("rpc.timeout_secs", "must be > 0"));
    }

    check_url("authority.base_url", &config.authority.base_url, &mut errors);
    if config.authority.timeout_secs == 0 {
        errors.push(ValidationError::new("authority.timeout_secs", "must be > 0"));
    }

    if config.retries.max_attempts == 0 {
        errors.push(ValidationError::new("retries.max_attempts", "must be >= 1"));
    }

    if config.prepare.max_state_age_ms == 0 {
        errors.push(ValidationError::new("prepare.max_state_age_ms", "must be > 0"));
    }
    if config.prepare.default_slippage_bps == 0 || config.prepare.default_slippage_bps >= 10_000 {
        errors.push(ValidationError::new(
            "prepare.default_slippage_bps",
            "must be between 1 and 9999",
        ));
    }

    if config.confirmation.poll_interval_ms == 0 {
        errors.push(ValidationError::new("confirmation.poll_interval_ms", "must be > 0"));
    }
    if config.confirmation.timeout_secs == 0 {
        errors.push(ValidationError::new("confirmation.timeout_secs", "must be > 0"));
    }

    if config.inflight.abandon_after_secs == 0 {
        errors.push(ValidationError::new("inflight.abandon_after_secs", "must be > 0"));
    }

    if config.ledger.unsubmitted_ttl_secs == 0 {
        errors.push(ValidationError::new("ledger.unsubmitted_ttl_secs", "must be > 0"));
    }
    if config.ledger.receipt_ttl_secs < config.ledger.unsubmitted_ttl_secs {
        errors.push(ValidationError::new(
            "ledger.receipt_ttl_secs",
            "must be >= ledger.unsubmitted_ttl_secs",
        ));
    }

    if let Some(suffix) = &config.mint.vanity_suffix {
        if let Err(e) = check_suffix(suffix) {
            errors.push(ValidationError::new("mint.vanity_suffix", e.to_string()));
        }
        if config.mint.pool_size == 0 {
            errors.push(ValidationError::new("mint.pool_size", "must be > 0"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&PipelineConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = PipelineConfig::default();
        config.rpc.failover_urls.push("ftp://mirror".to_string());
        config.confirmation.poll_interval_ms = 0;
        config.prepare.default_slippage_bps = 10_000;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "rpc.failover_urls[0]",
                "prepare.default_slippage_bps",
                "confirmation.poll_interval_ms"
            ]
        );
    }

    #[test]
    fn test_rejects_unreachable_vanity_suffix() {
        let mut config = PipelineConfig::default();
        config.mint.vanity_suffix = Some("p0mp".to_string());
        config.ledger.receipt_ttl_secs = 10;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["ledger.receipt_ttl_secs", "mint.vanity_suffix"]);
    }
}
