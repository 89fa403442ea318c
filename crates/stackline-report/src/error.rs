use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to serialize report as JSON")]
    JsonSerialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize parameters of stack {stack} as YAML")]
    YamlSerialize {
        stack: String,
        #[source]
        source: serde_yaml::Error,
    },
}
