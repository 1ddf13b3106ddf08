//! Validation strategies for environment variable values.
//!
//! Strategies are keyed by `(variable type, provider)`. An exact pair wins
//! over the type's default, and a pair with no strategy at all passes on a
//! basic non-empty check. Empty values never reach a strategy.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use troupe_plugin_sdk::EnvVarType;

/// Result of validating one value.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub error: Option<String>,
    pub details: Option<String>,
}

impl ValidationOutcome {
    #[must_use]
    pub fn passed() -> Self {
        Self {
            valid: true,
            error: None,
            details: None,
        }
    }

    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(error.into()),
            details: None,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// A pluggable check. `Err` carries the reason a value is rejected; it
/// becomes a failed outcome, never a propagated error.
pub type Strategy = Arc<dyn Fn(&str) -> Result<(), String> + Send + Sync>;

/// Strategy lookup table with the built-in format checks preloaded.
pub struct StrategyRegistry {
    strategies: HashMap<(EnvVarType, Option<String>), Strategy>,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        let mut registry = Self {
            strategies: HashMap::new(),
        };
        registry.register(EnvVarType::ApiKey, Some("openai"), Arc::new(openai_key));
        registry.register(EnvVarType::ApiKey, Some("anthropic"), Arc::new(anthropic_key));
        registry.register(EnvVarType::Url, None, Arc::new(http_url));
        registry.register(EnvVarType::PrivateKey, None, Arc::new(|v: &str| hex_of_len(v, 64)));
        registry.register(EnvVarType::PublicKey, None, Arc::new(|v: &str| hex_of_len(v, 66)));
        registry
    }
}

impl StrategyRegistry {
    pub fn register(&mut self, var_type: EnvVarType, provider: Option<&str>, strategy: Strategy) {
        self.strategies
            .insert((var_type, provider.map(str::to_string)), strategy);
    }

    /// Validates a value. Empty and whitespace-only values fail before any
    /// strategy runs.
    #[must_use]
    pub fn validate(
        &self,
        var_type: EnvVarType,
        provider: Option<&str>,
        value: &str,
    ) -> ValidationOutcome {
        if value.trim().is_empty() {
            return ValidationOutcome::failed("empty value");
        }
        let strategy = provider
            .and_then(|p| self.strategies.get(&(var_type, Some(p.to_string()))))
            .or_else(|| self.strategies.get(&(var_type, None)));
        match strategy {
            Some(strategy) => match strategy(value) {
                Ok(()) => ValidationOutcome::passed(),
                Err(error) => ValidationOutcome::failed(error),
            },
            None => {
                debug!(var_type = ?var_type, provider, "no validation strategy, basic check only");
                ValidationOutcome::passed().with_details("only basic checks ran")
            }
        }
    }
}

// ── Built-in checks ───────────────────────────────────────────────

fn openai_key(value: &str) -> Result<(), String> {
    if !value.starts_with("sk-") {
        return Err("openai keys start with 'sk-'".into());
    }
    if value.len() <= 20 {
        return Err("key is too short".into());
    }
    Ok(())
}

fn anthropic_key(value: &str) -> Result<(), String> {
    if !value.starts_with("sk-ant-") {
        return Err("anthropic keys start with 'sk-ant-'".into());
    }
    Ok(())
}

fn http_url(value: &str) -> Result<(), String> {
    let rest = value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"))
        .ok_or_else(|| "url must start with http:// or https://".to_string())?;
    let host = rest.split(['/', '?', '#']).next().unwrap_or("");
    if host.is_empty() {
        return Err("url has no host".into());
    }
    Ok(())
}

fn hex_of_len(value: &str, expected: usize) -> Result<(), String> {
    if value.len() != expected {
        return Err(format!(
            "expected {expected} hex characters, got {}",
            value.len()
        ));
    }
    if hex::decode(value).is_err() {
        return Err("not a hex string".into());
    }
    Ok(())
}

// ================================================================
// Tests
// ================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_value_fails_before_strategies() {
        let registry = StrategyRegistry::default();
        for value in ["", "   ", "\t"] {
            let outcome = registry.validate(EnvVarType::ApiKey, Some("openai"), value);
            assert!(!outcome.valid);
            assert_eq!(outcome.error.as_deref(), Some("empty value"));
        }
    }

    #[test]
    fn openai_key_format() {
        let registry = StrategyRegistry::default();
        let good = registry.validate(
            EnvVarType::ApiKey,
            Some("openai"),
            "sk-0123456789abcdef0123456789",
        );
        assert!(good.valid);

        let bad_prefix = registry.validate(EnvVarType::ApiKey, Some("openai"), "pk-whatever-key");
        assert!(!bad_prefix.valid);

        let too_short = registry.validate(EnvVarType::ApiKey, Some("openai"), "sk-short");
        assert!(!too_short.valid);
    }

    #[test]
    fn anthropic_key_format() {
        let registry = StrategyRegistry::default();
        assert!(registry.validate(EnvVarType::ApiKey, Some("anthropic"), "sk-ant-abc123").valid);
        assert!(!registry.validate(EnvVarType::ApiKey, Some("anthropic"), "sk-abc123").valid);
    }

    #[test]
    fn url_format() {
        let registry = StrategyRegistry::default();
        assert!(registry.validate(EnvVarType::Url, None, "https://api.example.com/v1").valid);
        assert!(registry.validate(EnvVarType::Url, None, "http://localhost:8080").valid);
        assert!(!registry.validate(EnvVarType::Url, None, "ftp://example.com").valid);
        assert!(!registry.validate(EnvVarType::Url, None, "https:///no-host").valid);
    }

    #[test]
    fn key_material_length_checked() {
        let registry = StrategyRegistry::default();
        let priv_ok = "a".repeat(64);
        assert!(registry.validate(EnvVarType::PrivateKey, None, &priv_ok).valid);
        assert!(!registry.validate(EnvVarType::PrivateKey, None, "abc123").valid);

        let not_hex = "z".repeat(64);
        assert!(!registry.validate(EnvVarType::PrivateKey, None, &not_hex).valid);

        let pub_ok = "b".repeat(66);
        assert!(registry.validate(EnvVarType::PublicKey, None, &pub_ok).valid);
    }

    #[test]
    fn unknown_pair_passes_basic_check() {
        let registry = StrategyRegistry::default();
        let outcome = registry.validate(EnvVarType::Config, None, "anything");
        assert!(outcome.valid);
        assert_eq!(outcome.details.as_deref(), Some("only basic checks ran"));
    }

    #[test]
    fn unknown_provider_falls_back_to_type_default() {
        let registry = StrategyRegistry::default();
        // no (Url, "custom") entry; the Url default still applies
        assert!(!registry.validate(EnvVarType::Url, Some("custom"), "not a url").valid);
    }

    #[test]
    fn registered_strategy_wins_over_default() {
        let mut registry = StrategyRegistry::default();
        registry.register(
            EnvVarType::Url,
            Some("internal"),
            Arc::new(|v: &str| {
                if v.starts_with("internal://") {
                    Ok(())
                } else {
                    Err("expected internal:// scheme".into())
                }
            }),
        );
        assert!(registry.validate(EnvVarType::Url, Some("internal"), "internal://svc").valid);
        assert!(!registry.validate(EnvVarType::Url, None, "internal://svc").valid);
    }
}
