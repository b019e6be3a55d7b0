use crate::domain::finding::Finding;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// 輸入文件中的位置（文件名稱、行列、樹狀路徑）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub document: String,
    pub line: Option<usize>,
    pub column: Option<usize>,
    pub path: Option<String>,
}

impl SourceLocation {
    pub fn document(document: impl Into<String>) -> Self {
        Self {
            document: document.into(),
            line: None,
            column: None,
            path: None,
        }
    }

    pub fn at(mut self, line: usize, column: usize) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.document)?;
        if let (Some(line), Some(column)) = (self.line, self.column) {
            write!(f, ":{}:{}", line, column)?;
        }
        if let Some(path) = &self.path {
            write!(f, " ({})", path)?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum CompileError {
    #[error("Parse error at {location}: {message}")]
    ParseError {
        location: SourceLocation,
        message: String,
    },

    #[error("Missing variable '{key}' referenced at {path} (no value and no default)")]
    MissingVariable { key: String, path: String },

    #[error("Unknown environment '{name}' (known: {known})", known = .known.join(", "))]
    UnknownEnvironment { name: String, known: Vec<String> },

    #[error("Registry validation failed with {count} finding(s)", count = .findings.len())]
    RegistryViolation { findings: Vec<Finding> },

    #[error("Failed to write artifact {}: {source}", .path.display())]
    EmissionIoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Emitter '{emitter}' failed: {details}")]
    EmissionError { emitter: String, details: String },

    #[error("Compilation cancelled during {stage}")]
    Cancelled { stage: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("YAML serialization error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Archive error: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("Invalid pattern: {0}")]
    PatternError(#[from] regex::Error),

    #[error("Configuration error in {field}: {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Input,
    Environment,
    Registry,
    Output,
    Configuration,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl CompileError {
    pub fn parse(location: SourceLocation, message: impl Into<String>) -> Self {
        Self::ParseError {
            location,
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ParseError { .. } | Self::MissingVariable { .. } => ErrorCategory::Input,
            Self::UnknownEnvironment { .. } => ErrorCategory::Environment,
            Self::RegistryViolation { .. } => ErrorCategory::Registry,
            Self::EmissionIoError { .. } | Self::IoError(_) | Self::ZipError(_) => {
                ErrorCategory::Output
            }
            Self::ConfigValidationError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::MissingConfigError { .. } => ErrorCategory::Configuration,
            Self::EmissionError { .. }
            | Self::Cancelled { .. }
            | Self::SerializationError(_)
            | Self::YamlError(_)
            | Self::PatternError(_) => ErrorCategory::Internal,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Cancelled { .. } => ErrorSeverity::Medium,
            Self::ParseError { .. }
            | Self::MissingVariable { .. }
            | Self::UnknownEnvironment { .. }
            | Self::RegistryViolation { .. }
            | Self::ConfigValidationError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::MissingConfigError { .. } => ErrorSeverity::High,
            Self::EmissionIoError { .. }
            | Self::EmissionError { .. }
            | Self::IoError(_)
            | Self::SerializationError(_)
            | Self::YamlError(_)
            | Self::ZipError(_)
            | Self::PatternError(_) => ErrorSeverity::Critical,
        }
    }

    /// 依照嚴重程度決定程序退出碼
    pub fn exit_code(&self) -> i32 {
        match self.severity() {
            ErrorSeverity::Low => 0,
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        }
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            Self::ParseError { location, .. } => format!(
                "Fix the document at {} and make sure it is valid YAML",
                location
            ),
            Self::MissingVariable { key, .. } => format!(
                "Export {} (or pass --set {}=...) or add a default with ${{{}:-value}}",
                key, key, key
            ),
            Self::UnknownEnvironment { known, .. } => {
                format!("Use one of: {}", known.join(", "))
            }
            Self::RegistryViolation { .. } => {
                "Align the master definition with the service registry; every finding is listed above"
                    .to_string()
            }
            Self::EmissionIoError { path, .. } => format!(
                "Check that {} is writable; previously published output was left untouched",
                path.display()
            ),
            Self::Cancelled { .. } => "Re-run the compilation".to_string(),
            Self::ConfigValidationError { field, .. }
            | Self::InvalidConfigValueError { field, .. }
            | Self::MissingConfigError { field } => {
                format!("Review the `{}` setting in the run configuration", field)
            }
            Self::IoError(_) => "Check that the input paths exist and are readable".to_string(),
            _ => "Re-run with --verbose and report the failure".to_string(),
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            Self::RegistryViolation { findings } => {
                let mut lines = vec![format!(
                    "Registry validation failed ({} finding(s)):",
                    findings.len()
                )];
                lines.extend(findings.iter().map(|f| format!("  - {}", f)));
                lines.join("\n")
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::finding::FindingKind;

    #[test]
    fn test_location_display() {
        let location = SourceLocation::document("master.yaml")
            .at(3, 7)
            .with_path("services.core.api");
        assert_eq!(location.to_string(), "master.yaml:3:7 (services.core.api)");
    }

    #[test]
    fn test_registry_violation_lists_every_finding() {
        let err = CompileError::RegistryViolation {
            findings: vec![
                Finding::new(FindingKind::PortConflict, "svc_a")
                    .with_peers(vec!["svc_b".to_string()]),
                Finding::new(FindingKind::MissingRegistryEntry, "svc_c"),
            ],
        };
        let message = err.user_friendly_message();
        assert!(message.contains("2 finding(s)"));
        assert!(message.contains("svc_b"));
        assert!(message.contains("svc_c"));
        assert_eq!(err.exit_code(), 1);
        assert_eq!(err.category(), ErrorCategory::Registry);
    }

    #[test]
    fn test_unknown_environment_message() {
        let err = CompileError::UnknownEnvironment {
            name: "qa".to_string(),
            known: vec!["development".to_string(), "production".to_string()],
        };
        assert!(err.to_string().contains("development, production"));
    }
}
