use std::collections::HashSet;

use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Queue has at least one partition
/// - Transcode pool has at least one slot
/// - Ladder is non-empty with unique names and suffixes and even, non-zero
///   dimensions
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(invalid("server.port cannot be 0"));
    }

    if config.queue.partitions == 0 {
        return Err(invalid("queue.partitions cannot be 0"));
    }

    if config.transcode.max_concurrent_runs == 0 {
        return Err(invalid("transcode.max_concurrent_runs cannot be 0"));
    }

    let ladder = &config.transcode.ladder;
    if ladder.is_empty() {
        return Err(invalid("transcode.ladder cannot be empty"));
    }

    let mut names = HashSet::new();
    let mut suffixes = HashSet::new();
    for rung in ladder {
        if !names.insert(rung.name.as_str()) {
            return Err(invalid(format!(
                "transcode.ladder has duplicate rung name '{}'",
                rung.name
            )));
        }
        if !suffixes.insert(rung.suffix.as_str()) {
            return Err(invalid(format!(
                "transcode.ladder rung '{}' reuses suffix '{}'",
                rung.name, rung.suffix
            )));
        }
        if rung.width == 0 || rung.height == 0 {
            return Err(invalid(format!(
                "transcode.ladder rung '{}' has a zero dimension",
                rung.name
            )));
        }
        if rung.width % 2 != 0 || rung.height % 2 != 0 {
            return Err(invalid(format!(
                "transcode.ladder rung '{}' must have even dimensions, got {}x{}",
                rung.name, rung.width, rung.height
            )));
        }
    }

    Ok(())
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(message.into())
}
