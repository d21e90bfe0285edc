use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod codes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigInvalidJson,
    ConfigInvalidValue,

    ValidationMissingArgument,
    ValidationInvalidArgument,

    LockTimeout,
    LockReleaseFailed,

    RegistryInvalidFormat,
    VersionInvalid,

    UpstreamBuildNotFound,
    UpstreamRequestFailed,
    ImagePullFailed,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigInvalidJson => "config.invalid_json",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",

            ErrorCode::ValidationMissingArgument => "validation.missing_argument",
            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",

            ErrorCode::LockTimeout => "lock.timeout",
            ErrorCode::LockReleaseFailed => "lock.release_failed",

            ErrorCode::RegistryInvalidFormat => "registry.invalid_format",
            ErrorCode::VersionInvalid => "version.invalid",

            ErrorCode::UpstreamBuildNotFound => "upstream.build_not_found",
            ErrorCode::UpstreamRequestFailed => "upstream.request_failed",
            ErrorCode::ImagePullFailed => "image.pull_failed",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
    pub retryable: Option<bool>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidJsonDetails {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingArgumentDetails {
    pub args: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tried: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockTimeoutDetails {
    pub resource: String,
    pub marker: String,
    pub waited_secs: u64,
    pub timeout_secs: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockReleaseDetails {
    pub resource: String,
    pub marker: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryFormatDetails {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInvalidDetails {
    pub version: String,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildNotFoundDetails {
    pub branch: String,
    pub os_type: String,
    pub os_version: String,
    pub arch: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamRequestDetails {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePullDetails {
    pub image: String,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub stderr: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalJsonErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
            retryable: None,
        }
    }

    pub fn validation_missing_argument(args: Vec<String>) -> Self {
        Self::new(
            ErrorCode::ValidationMissingArgument,
            "Missing required argument",
            to_details(MissingArgumentDetails { args }),
        )
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        id: Option<String>,
        tried: Option<Vec<String>>,
    ) -> Self {
        Self::new(
            ErrorCode::ValidationInvalidArgument,
            "Invalid argument",
            to_details(InvalidArgumentDetails {
                field: field.into(),
                problem: problem.into(),
                id,
                tried,
            }),
        )
    }

    pub fn config_invalid_json(path: impl Into<String>, err: serde_json::Error) -> Self {
        Self::new(
            ErrorCode::ConfigInvalidJson,
            "Invalid JSON in configuration",
            to_details(ConfigInvalidJsonDetails {
                path: path.into(),
                error: err.to_string(),
            }),
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        Self::new(
            ErrorCode::ConfigInvalidValue,
            "Invalid configuration value",
            to_details(ConfigInvalidValueDetails {
                key: key.into(),
                value,
                problem: problem.into(),
            }),
        )
    }

    pub fn lock_timeout(details: LockTimeoutDetails) -> Self {
        let message = format!(
            "Timed out after {}s waiting for lock on {}",
            details.waited_secs, details.resource
        );
        let marker = details.marker.clone();
        let mut err = Self::new(ErrorCode::LockTimeout, message, to_details(details))
            .with_hint(format!(
                "If no other job is updating the registry, the marker is stale: remove {}",
                marker
            ))
            .with_hint("Run 'buildreg lock release' to clear a stale marker");
        err.retryable = Some(true);
        err
    }

    pub fn lock_release_failed(
        resource: impl Into<String>,
        marker: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let resource = resource.into();
        Self::new(
            ErrorCode::LockReleaseFailed,
            format!("Unable to release lock on {}", resource),
            to_details(LockReleaseDetails {
                resource,
                marker: marker.into(),
                error: error.into(),
            }),
        )
    }

    pub fn registry_invalid_format(path: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::RegistryInvalidFormat,
            "Registry file is not a valid build registry document",
            to_details(RegistryFormatDetails {
                path: path.into(),
                error: error.into(),
            }),
        )
        .with_hint("The file was left untouched; fix or remove it before retrying")
    }

    pub fn version_invalid(version: impl Into<String>, problem: impl Into<String>) -> Self {
        let version = version.into();
        Self::new(
            ErrorCode::VersionInvalid,
            format!("Cannot compare version '{}'", version),
            to_details(VersionInvalidDetails {
                version,
                problem: problem.into(),
            }),
        )
    }

    pub fn upstream_build_not_found(details: BuildNotFoundDetails) -> Self {
        let message = format!(
            "Could not find build source for {}-{}-{}-{}",
            details.branch, details.os_type, details.os_version, details.arch
        );
        Self::new(ErrorCode::UpstreamBuildNotFound, message, to_details(details))
    }

    pub fn upstream_request_failed(
        url: impl Into<String>,
        status: Option<u16>,
        error: impl Into<String>,
    ) -> Self {
        let mut err = Self::new(
            ErrorCode::UpstreamRequestFailed,
            "Build index request failed",
            to_details(UpstreamRequestDetails {
                url: url.into(),
                status,
                error: error.into(),
            }),
        );
        err.retryable = Some(true);
        err
    }

    pub fn image_pull_failed(message: impl Into<String>, details: ImagePullDetails) -> Self {
        Self::new(ErrorCode::ImagePullFailed, message, to_details(details))
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalIoError,
            "IO error",
            to_details(InternalIoErrorDetails {
                error: error.into(),
                context,
            }),
        )
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalJsonError,
            "JSON error",
            to_details(InternalJsonErrorDetails {
                error: error.into(),
                context,
            }),
        )
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalUnexpected,
            "Unexpected error",
            serde_json::json!({ "error": error.into() }),
        )
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::internal_unexpected(message)
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_timeout_names_the_resource_and_is_retryable() {
        let err = Error::lock_timeout(LockTimeoutDetails {
            resource: "/shared/upstream.yaml".to_string(),
            marker: "/shared/upstream.yaml.lock".to_string(),
            waited_secs: 600,
            timeout_secs: 600,
        });

        assert_eq!(err.code, ErrorCode::LockTimeout);
        assert!(err.message.contains("/shared/upstream.yaml"));
        assert_eq!(err.details["marker"], "/shared/upstream.yaml.lock");
        assert_eq!(err.details["timeoutSecs"], 600);
        assert_eq!(err.retryable, Some(true));
        assert_eq!(err.hints.len(), 2);
    }

    #[test]
    fn registry_format_error_carries_path() {
        let err = Error::registry_invalid_format("/tmp/upstream.yaml", "expected mapping");
        assert_eq!(err.code.as_str(), "registry.invalid_format");
        assert_eq!(err.details["path"], "/tmp/upstream.yaml");
        assert!(!err.hints.is_empty());
    }

    #[test]
    fn build_not_found_message_matches_query() {
        let err = Error::upstream_build_not_found(BuildNotFoundDetails {
            branch: "quincy".to_string(),
            os_type: "centos".to_string(),
            os_version: "9".to_string(),
            arch: "x86_64".to_string(),
        });
        assert_eq!(
            err.to_string(),
            "Could not find build source for quincy-centos-9-x86_64"
        );
    }
}
