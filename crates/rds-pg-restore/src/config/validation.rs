//! Configuration validation.

use crate::error::{Result, RestoreError};

use super::Config;

/// Validate required parameters and reject contradictory settings.
pub fn validate(config: &Config) -> Result<()> {
    if config.source.local_dir.is_none() && config.source.bucket_path.is_none() {
        return Err(RestoreError::Config(
            "an RDS export local path or remote bucket is required".to_string(),
        ));
    }
    if config.source.local_dir.is_some() && config.source.bucket_path.is_some() {
        return Err(RestoreError::Config(
            "local directory and remote bucket are mutually exclusive".to_string(),
        ));
    }
    if !config.source.is_local() {
        for (value, flag) in [
            (&config.source.aws_access_key, "aws_access_key"),
            (&config.source.aws_secret_key, "aws_secret_key"),
            (&config.source.aws_region, "aws_region"),
        ] {
            if value.as_deref().map_or(true, str::is_empty) {
                return Err(RestoreError::Config(format!(
                    "{} is required when using an S3 bucket",
                    flag
                )));
            }
        }
    }
    if config.target.host.is_empty() {
        return Err(RestoreError::Config(
            "target database host is required".to_string(),
        ));
    }
    if config.target.database.is_empty() {
        return Err(RestoreError::Config(
            "target database name is required".to_string(),
        ));
    }
    if config.target.port == 0 {
        return Err(RestoreError::Config(
            "target database port must not be 0".to_string(),
        ));
    }
    Ok(())
}
