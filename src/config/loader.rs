//! Configuration loader with TOML parsing and environment variable overrides

use super::schema::DeidConfig;
use super::secret::secret_string;
use crate::domain::errors::DeidError;
use crate::domain::result::Result;
use regex::Regex;
use std::fs;
use std::path::Path;

/// Loads configuration from a TOML file
///
/// This function:
/// 1. Reads the TOML file
/// 2. Substitutes `${VAR}` references outside comment lines
/// 3. Parses the TOML into [`DeidConfig`]
/// 4. Applies `DEID_*` environment variable overrides
/// 5. Validates the result
///
/// # Errors
///
/// Returns [`DeidError::Configuration`] if the file is missing or unreadable,
/// a referenced variable is unset, parsing fails, or validation fails.
///
/// # Examples
///
/// ```no_run
/// use deid_export::config::load_config;
///
/// let config = load_config("deid-export.toml").expect("Failed to load config");
/// println!("{}", config.datastore.base_url);
/// ```
pub fn load_config(path: impl AsRef<Path>) -> Result<DeidConfig> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(DeidError::Configuration(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }

    let contents = fs::read_to_string(path).map_err(|e| {
        DeidError::Configuration(format!(
            "Failed to read configuration file {}: {}",
            path.display(),
            e
        ))
    })?;

    let contents = substitute_env_vars(&contents)?;

    let mut config: DeidConfig = toml::from_str(&contents)
        .map_err(|e| DeidError::Configuration(format!("Failed to parse TOML: {}", e)))?;

    apply_env_overrides(&mut config);

    config.validate().map_err(|e| {
        DeidError::Configuration(format!("Configuration validation failed: {}", e))
    })?;

    Ok(config)
}

/// Substitutes environment variables in the format `${VAR_NAME}`
///
/// # Errors
///
/// Returns an error listing every referenced variable that is not set
fn substitute_env_vars(input: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")
        .map_err(|e| DeidError::Configuration(format!("Invalid substitution pattern: {e}")))?;
    let mut result = String::with_capacity(input.len());
    let mut missing_vars: Vec<String> = Vec::new();

    for line in input.lines() {
        if line.trim_start().starts_with('#') {
            result.push_str(line);
            result.push('\n');
            continue;
        }

        let mut processed_line = line.to_string();
        for cap in re.captures_iter(line) {
            let var_name = &cap[1];
            match std::env::var(var_name) {
                Ok(value) => {
                    processed_line = processed_line.replace(&format!("${{{var_name}}}"), &value);
                }
                Err(_) => {
                    if !missing_vars.iter().any(|v| v == var_name) {
                        missing_vars.push(var_name.to_string());
                    }
                }
            }
        }
        result.push_str(&processed_line);
        result.push('\n');
    }

    if !missing_vars.is_empty() {
        return Err(DeidError::Configuration(format!(
            "Missing required environment variables: {}",
            missing_vars.join(", ")
        )));
    }

    Ok(result)
}

/// Applies environment variable overrides using the `DEID_*` prefix
///
/// Variables follow `DEID_<SECTION>_<KEY>`, e.g. `DEID_DATASTORE_BASE_URL`.
/// Unparseable numeric or boolean values are ignored.
fn apply_env_overrides(config: &mut DeidConfig) {
    if let Ok(val) = std::env::var("DEID_APPLICATION_LOG_LEVEL") {
        config.application.log_level = val;
    }

    if let Ok(val) = std::env::var("DEID_DATASTORE_BASE_URL") {
        config.datastore.base_url = val;
    }
    if let Ok(val) = std::env::var("DEID_DATASTORE_API_KEY") {
        config.datastore.api_key = Some(secret_string(val));
    }
    if let Ok(val) = std::env::var("DEID_DATASTORE_TIMEOUT_SECONDS") {
        if let Ok(secs) = val.parse() {
            config.datastore.timeout_seconds = secs;
        }
    }
    if let Ok(val) = std::env::var("DEID_DATASTORE_RETRY_MAX_ATTEMPTS") {
        if let Ok(attempts) = val.parse() {
            config.datastore.retry.max_attempts = attempts;
        }
    }

    if let Ok(val) = std::env::var("DEID_EXPORT_OVERWRITE") {
        if let Ok(overwrite) = val.parse() {
            config.export.overwrite = overwrite;
        }
    }
    if let Ok(val) = std::env::var("DEID_EXPORT_MAX_WORKERS") {
        if let Ok(workers) = val.parse() {
            config.export.max_workers = workers;
        }
    }
    if let Ok(val) = std::env::var("DEID_EXPORT_SCRATCH_DIR") {
        config.export.scratch_dir = Some(val);
    }

    if let Ok(val) = std::env::var("DEID_CODEC_PROGRAM") {
        config.codec.program = val;
    }

    if let Ok(val) = std::env::var("DEID_MAPPING_SUBJECT_COLUMN") {
        config.mapping.subject_column = val;
    }

    if let Ok(val) = std::env::var("DEID_LOGGING_LOCAL_ENABLED") {
        if let Ok(enabled) = val.parse() {
            config.logging.local_enabled = enabled;
        }
    }
    if let Ok(val) = std::env::var("DEID_LOGGING_LOCAL_PATH") {
        config.logging.local_path = val;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitute_skips_comments() {
        let input = "# uses ${SURELY_UNSET_DEID_VAR}\nkey = \"value\"\n";
        let output = substitute_env_vars(input).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn test_substitute_reports_missing() {
        let err = substitute_env_vars("key = \"${SURELY_UNSET_DEID_VAR}\"").unwrap_err();
        assert!(err.to_string().contains("SURELY_UNSET_DEID_VAR"));
    }

    #[test]
    fn test_missing_file() {
        let err = load_config("/nonexistent/deid-export.toml").unwrap_err();
        assert!(matches!(err, DeidError::Configuration(_)));
    }
}
