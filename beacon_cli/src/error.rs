use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Could not read or write the settings file. {0}")]
    IoError(#[from] std::io::Error),
    #[error("The settings file is not valid YAML for beacon settings. {0}")]
    InvalidConfig(#[from] serde_yml::Error),
}
