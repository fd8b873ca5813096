use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] tickgate_core::ValidationError),

    #[error(transparent)]
    Configuration(#[from] tickgate_core::ConfigurationError),

    #[error("usage error: {0}")]
    Usage(String),

    #[error("command error: {0}")]
    Command(String),

    #[error(transparent)]
    Warehouse(#[from] tickgate_core::WarehouseError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// 2 for anything the user can fix in arguments or configuration,
    /// 1 otherwise.
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) | Self::Configuration(_) | Self::Usage(_) => 2,
            Self::Command(_) | Self::Warehouse(_) | Self::Serialization(_) | Self::Io(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_problems_exit_with_two() {
        let error = CliError::from(tickgate_core::ConfigurationError::invalid("worker_pool_size", "zero"));
        assert_eq!(error.exit_code(), 2);
        assert_eq!(CliError::Usage("backfill needs --start".into()).exit_code(), 2);
        assert_eq!(CliError::Command("boom".into()).exit_code(), 1);
    }
}
