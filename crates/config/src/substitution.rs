use anyhow::{Context, Result};
use regex::Regex;
use std::env;
use tracing::{debug, warn};

const PLACEHOLDER_PATTERN: &str = r"\$\{(\w+)\}|\$(\w+)";

fn placeholder_regex() -> Result<Regex> {
    Regex::new(PLACEHOLDER_PATTERN).context("Invalid placeholder pattern")
}

/// Substitute environment variables in the format ${VAR_NAME} or $VAR_NAME
///
/// Unset variables keep their placeholder; YAML parsing or validation
/// reports them later.
pub fn substitute_env_vars(content: &str) -> Result<String> {
    let re = placeholder_regex()?;
    let mut missing_vars = Vec::new();

    let result = re.replace_all(content, |caps: &regex::Captures<'_>| {
        let placeholder = &caps[0];
        let Some(var_name) = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str()) else {
            return placeholder.to_string();
        };

        match env::var(var_name) {
            Ok(value) => {
                debug!(var = var_name, "Substituting environment variable");
                value
            }
            Err(_) => {
                warn!("Environment variable '{}' not set", var_name);
                missing_vars.push(var_name.to_string());
                placeholder.to_string()
            }
        }
    });
    let result = result.into_owned();

    if !missing_vars.is_empty() {
        debug!(
            "Environment variables not set (may use defaults or fail validation): {:?}",
            missing_vars
        );
    }

    Ok(result)
}

/// Check if a string contains unresolved environment variable placeholders
pub fn has_unresolved_env_vars(content: &str) -> bool {
    placeholder_regex()
        .map(|re| re.is_match(content))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitutes_both_forms() {
        env::set_var("RIDEPOOL_TEST_OSRM_HOST", "osrm.local");
        let out =
            substitute_env_vars("a: http://${RIDEPOOL_TEST_OSRM_HOST}/\nb: $RIDEPOOL_TEST_OSRM_HOST")
                .unwrap();
        assert_eq!(out, "a: http://osrm.local/\nb: osrm.local");
        assert!(!has_unresolved_env_vars(&out));
    }

    #[test]
    fn test_missing_variable_keeps_placeholder() {
        let out = substitute_env_vars("endpoint: ${RIDEPOOL_TEST_NEVER_SET}").unwrap();
        assert_eq!(out, "endpoint: ${RIDEPOOL_TEST_NEVER_SET}");
        assert!(has_unresolved_env_vars(&out));
    }
}
