use std::fmt;

use serde::{Deserialize, Serialize};

/// Base URI under which problem `type` identifiers are minted.
pub const PROBLEM_TYPE_BASE: &str =
    "https://openid.net/specs/openid-4-verifiable-presentations-1_0.html";

const INVALID_REQUEST: &str = "invalid_request";
const INVALID_SCOPE: &str = "invalid_scope";
const WALLET_UNAVAILABLE: &str = "wallet_unavailable";
const INVALID_PRESENTATION: &str = "invalid_presentation";

/// The four failure kinds surfaced by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProblemCode {
    InvalidRequest,
    InvalidScope,
    WalletUnavailable,
    InvalidPresentation,
}

impl ProblemCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProblemCode::InvalidRequest => INVALID_REQUEST,
            ProblemCode::InvalidScope => INVALID_SCOPE,
            ProblemCode::WalletUnavailable => WALLET_UNAVAILABLE,
            ProblemCode::InvalidPresentation => INVALID_PRESENTATION,
        }
    }

    /// HTTP status a facade should answer with.
    pub fn status(&self) -> u16 {
        match self {
            ProblemCode::InvalidRequest | ProblemCode::InvalidScope => 400,
            ProblemCode::WalletUnavailable => 503,
            ProblemCode::InvalidPresentation => 422,
        }
    }

    pub fn type_uri(&self) -> String {
        format!("{PROBLEM_TYPE_BASE}/error/{}", self.as_str())
    }
}

impl fmt::Display for ProblemCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

/// A single field-level complaint attached to a [ProblemDetails].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub field: String,
    pub message: String,
}

impl Violation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// RFC 7807 problem document.
///
/// See: <https://www.rfc-editor.org/rfc/rfc7807>
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub type_uri: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    pub violations: Vec<Violation>,
}

impl ProblemDetails {
    pub fn new(code: ProblemCode, detail: impl Into<String>) -> Self {
        Self {
            type_uri: code.type_uri(),
            title: code.as_str().to_owned(),
            status: code.status(),
            detail: detail.into(),
            violations: Vec::new(),
        }
    }

    /// The machine code carried in `title`.
    pub fn code(&self) -> &str {
        &self.title
    }
}

/// The single error kind returned by every simulator operation.
///
/// The attached cause is kept for diagnostics only; it never leaks into the
/// problem's `detail`.
#[derive(Debug, thiserror::Error)]
#[error("{}: {}", .problem.title, .problem.detail)]
pub struct ValidationError {
    problem: ProblemDetails,
    code: ProblemCode,
    cause: Option<anyhow::Error>,
}

impl ValidationError {
    pub fn new(code: ProblemCode, detail: impl Into<String>) -> Self {
        Self {
            problem: ProblemDetails::new(code, detail),
            code,
            cause: None,
        }
    }

    pub fn invalid_request(detail: impl Into<String>) -> Self {
        Self::new(ProblemCode::InvalidRequest, detail)
    }

    pub fn invalid_scope(detail: impl Into<String>) -> Self {
        Self::new(ProblemCode::InvalidScope, detail)
    }

    pub fn wallet_unavailable(detail: impl Into<String>) -> Self {
        Self::new(ProblemCode::WalletUnavailable, detail)
    }

    pub fn invalid_presentation(detail: impl Into<String>) -> Self {
        Self::new(ProblemCode::InvalidPresentation, detail)
    }

    pub fn with_violation(mut self, field: impl Into<String>, message: impl Into<String>) -> Self {
        self.problem.violations.push(Violation::new(field, message));
        self
    }

    pub fn with_cause(mut self, cause: impl Into<anyhow::Error>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn code(&self) -> ProblemCode {
        self.code
    }

    pub fn problem(&self) -> &ProblemDetails {
        &self.problem
    }

    pub fn into_problem(self) -> ProblemDetails {
        self.problem
    }

    pub fn cause(&self) -> Option<&anyhow::Error> {
        self.cause.as_ref()
    }
}

/// Maps lower-level `anyhow` failures onto a [ValidationError] in one step.
pub trait ProblemContext<T> {
    fn or_problem(self, code: ProblemCode, detail: &str) -> Result<T, ValidationError>;
}

impl<T, E> ProblemContext<T> for Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn or_problem(self, code: ProblemCode, detail: &str) -> Result<T, ValidationError> {
        self.map_err(|e| ValidationError::new(code, detail).with_cause(e))
    }
}
