use crate::path::HexPath;
use thiserror::Error;

/// A bound violated during input validation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("max_depth exceeded: {depth}>{max}")]
    DepthExceeded { depth: usize, max: usize },

    #[error("max_tree_size exceeded: {nodes}>{max}")]
    TreeTooLarge { nodes: usize, max: usize },

    #[error("max_children exceeded: {count}>{max} at {path}")]
    TooManyChildren {
        count: usize,
        max: usize,
        path: HexPath,
    },

    #[error("max_attribute_name exceeded: {length}>{max} at {path}")]
    AttributeNameTooLong {
        length: usize,
        max: usize,
        path: HexPath,
    },

    #[error("empty attribute name at {path}")]
    EmptyAttributeName { path: HexPath },

    #[error("max_attribute_value exceeded: {length}>{max} for '{name}' at {path}")]
    AttributeValueTooLong {
        name: String,
        length: usize,
        max: usize,
        path: HexPath,
    },

    #[error("max_text exceeded: {length}>{max} at {path}")]
    TextTooLong {
        length: usize,
        max: usize,
        path: HexPath,
    },

    #[error("max_json_size exceeded: {size}>{max}")]
    JsonTooLarge { size: usize, max: usize },

    #[error("malformed path '{path}'")]
    MalformedPath { path: HexPath },

    #[error("path '{child}' does not extend its parent '{parent}'")]
    OrphanPath { child: HexPath, parent: HexPath },

    #[error("duplicate sibling path '{path}'")]
    PathCollision { path: HexPath },
}

impl ValidationError {
    /// Name of the bound that was exceeded, for the wire error payload.
    pub fn bound(&self) -> &'static str {
        match self {
            ValidationError::DepthExceeded { .. } => "max_depth",
            ValidationError::TreeTooLarge { .. } => "max_tree_size",
            ValidationError::TooManyChildren { .. } => "max_children",
            ValidationError::AttributeNameTooLong { .. } => "max_attribute_name",
            ValidationError::EmptyAttributeName { .. } => "attribute_name",
            ValidationError::AttributeValueTooLong { .. } => "max_attribute_value",
            ValidationError::TextTooLong { .. } => "max_text",
            ValidationError::JsonTooLarge { .. } => "max_json_size",
            ValidationError::MalformedPath { .. }
            | ValidationError::OrphanPath { .. }
            | ValidationError::PathCollision { .. } => "path",
        }
    }
}

/// Engine-level error.
#[derive(Debug, Error)]
pub enum Error {
    /// Input exceeded a declared bound. Caller error, never retried.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// A template references a transform the current whitelist does not
    /// carry. Recoverable locally by refusing to predict.
    #[error("transform '{transform}' is not in whitelist version {version}")]
    VersionSkew { transform: String, version: u32 },

    /// An invariant broke past validation. Caller should drop the
    /// component's store.
    #[error("internal invariant violated: {0}")]
    Internal(String),

    /// Unknown component id or handle.
    #[error("not found: {0}")]
    NotFound(String),

    /// A produced output would itself violate bounds.
    #[error("output exceeds bounds: {0}")]
    Oversized(String),

    /// Malformed JSON crossing the host boundary.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Tag used in wire error objects.
    pub fn kind(&self) -> &'static str {
        match self {
            // Malformed input is a caller error, same as a bounds breach.
            Error::Validation(_) | Error::Serialization(_) => "validation",
            Error::VersionSkew { .. } => "version_skew",
            Error::Internal(_) => "internal",
            Error::NotFound(_) => "not_found",
            Error::Oversized(_) => "oversized",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Numeric error codes for the C ABI.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Success = 0,
    Validation = 1,
    VersionSkew = 2,
    Internal = 3,
    NotFound = 4,
    Oversized = 5,
    Serialization = 6,
}

impl From<&Error> for ErrorCode {
    fn from(err: &Error) -> Self {
        match err {
            Error::Validation(_) => ErrorCode::Validation,
            Error::VersionSkew { .. } => ErrorCode::VersionSkew,
            Error::Internal(_) => ErrorCode::Internal,
            Error::NotFound(_) => ErrorCode::NotFound,
            Error::Oversized(_) => ErrorCode::Oversized,
            Error::Serialization(_) => ErrorCode::Serialization,
        }
    }
}

/// FFI-safe status returned by `extern "C"` entry points that carry no
/// payload. `message` is null on success and must be released with
/// `minimact_free_string` otherwise.
#[repr(C)]
pub struct FfiResult {
    pub code: i32,
    pub message: *mut std::os::raw::c_char,
}

impl FfiResult {
    pub fn success() -> Self {
        Self {
            code: ErrorCode::Success as i32,
            message: std::ptr::null_mut(),
        }
    }

    pub fn error(err: &Error) -> Self {
        use std::ffi::CString;

        let message = CString::new(err.to_string())
            .unwrap_or_else(|_| CString::new("error message contained NUL").unwrap())
            .into_raw();
        Self {
            code: ErrorCode::from(err) as i32,
            message,
        }
    }

    pub fn error_str(msg: &str) -> Self {
        use std::ffi::CString;

        let message = CString::new(msg)
            .unwrap_or_else(|_| CString::new("error message contained NUL").unwrap())
            .into_raw();
        Self {
            code: ErrorCode::Internal as i32,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_message_matches_wire_format() {
        let err = ValidationError::DepthExceeded {
            depth: 101,
            max: 100,
        };
        assert_eq!(err.to_string(), "max_depth exceeded: 101>100");
        assert_eq!(err.bound(), "max_depth");
    }

    #[test]
    fn kinds_cover_the_wire_taxonomy() {
        let validation: Error = ValidationError::TreeTooLarge {
            nodes: 5,
            max: 4,
        }
        .into();
        assert_eq!(validation.kind(), "validation");
        assert_eq!(
            Error::VersionSkew {
                transform: "fixed2".to_string(),
                version: 1
            }
            .kind(),
            "version_skew"
        );
        assert_eq!(Error::Internal("boom".to_string()).kind(), "internal");
        assert_eq!(Error::NotFound("counter".to_string()).kind(), "not_found");
        assert_eq!(Error::Oversized("patches".to_string()).kind(), "oversized");
    }

    #[test]
    fn serde_errors_convert() {
        let parse_err = serde_json::from_str::<crate::vdom::VNode>("{").unwrap_err();
        let err: Error = parse_err.into();
        assert!(matches!(err, Error::Serialization(_)));
        assert_eq!(err.kind(), "validation");
    }
}
