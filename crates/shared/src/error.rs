use std::{
  backtrace::{Backtrace, BacktraceStatus},
  fmt::Display,
};

use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
};

/// Failure classes the pipeline distinguishes when deciding how to recover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
  /// Rate limit, 5xx, or network timeout from a remote service. Retried with
  /// bounded backoff before it ever reaches a caller.
  Transient,
  /// The LLM returned unparseable or schema-violating output after retries.
  /// Aborts the current episode, never half-persists.
  MalformedLlmOutput,
  /// A unique index collision (alias bucket, merge pair). Converted into a
  /// merge candidate or a winner re-read; not caller-visible.
  ConstraintViolation,
  /// An unexpected graph state (merge cycle, unknown entity type id).
  /// Aborts the current episode only.
  DataInvariant,
  /// Missing or invalid argument in a read API. Returned verbatim.
  UserInput,
  /// Anything else.
  Internal,
}

impl ErrorKind {
  const fn status_code(self) -> StatusCode {
    match self {
      Self::Transient => StatusCode::SERVICE_UNAVAILABLE,
      Self::UserInput => StatusCode::BAD_REQUEST,
      Self::MalformedLlmOutput => StatusCode::BAD_GATEWAY,
      Self::ConstraintViolation | Self::DataInvariant | Self::Internal => {
        StatusCode::INTERNAL_SERVER_ERROR
      }
    }
  }
}

#[derive(Debug)]
pub struct AppError {
  err: anyhow::Error,
  kind: ErrorKind,
}

impl AppError {
  pub fn new<E: Into<anyhow::Error>>(err: E) -> Self {
    Self {
      err: err.into(),
      kind: ErrorKind::Internal,
    }
  }

  pub fn with_kind<E: Into<anyhow::Error>>(kind: ErrorKind, err: E) -> Self {
    Self {
      err: err.into(),
      kind,
    }
  }

  pub fn transient<E: Into<anyhow::Error>>(err: E) -> Self {
    Self::with_kind(ErrorKind::Transient, err)
  }

  pub fn malformed_llm_output<E: Into<anyhow::Error>>(err: E) -> Self {
    Self::with_kind(ErrorKind::MalformedLlmOutput, err)
  }

  pub fn constraint_violation<E: Into<anyhow::Error>>(err: E) -> Self {
    Self::with_kind(ErrorKind::ConstraintViolation, err)
  }

  pub fn data_invariant<E: Into<anyhow::Error>>(err: E) -> Self {
    Self::with_kind(ErrorKind::DataInvariant, err)
  }

  pub fn user_input<E: Into<anyhow::Error>>(err: E) -> Self {
    Self::with_kind(ErrorKind::UserInput, err)
  }

  #[must_use]
  pub const fn kind(&self) -> ErrorKind {
    self.kind
  }

  #[must_use]
  pub const fn is_transient(&self) -> bool {
    matches!(self.kind, ErrorKind::Transient)
  }

  /// Get backtrace from anyhow (requires `RUST_BACKTRACE=1` to capture)
  pub fn backtrace(&self) -> &Backtrace {
    self.err.backtrace()
  }
}

impl IntoResponse for AppError {
  fn into_response(self) -> Response {
    let body = if cfg!(debug_assertions) {
      let bt = self.err.backtrace();
      if bt.status() == BacktraceStatus::Captured {
        format!("{}\nBacktrace:\n{}", self.err, bt)
      } else {
        format!(
          "{}\n(hint: set RUST_BACKTRACE=1 to enable backtrace)",
          self.err
        )
      }
    } else {
      self.err.to_string()
    };
    (self.kind.status_code(), body).into_response()
  }
}

impl Display for AppError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "[{}] {}", self.kind, self.err)
  }
}

impl<E> From<E> for AppError
where
  E: Into<anyhow::Error>,
{
  fn from(err: E) -> Self {
    Self::new(err)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn kind_maps_to_status() {
    assert_eq!(
      ErrorKind::UserInput.status_code(),
      StatusCode::BAD_REQUEST
    );
    assert_eq!(
      ErrorKind::Transient.status_code(),
      StatusCode::SERVICE_UNAVAILABLE
    );
    assert_eq!(
      ErrorKind::DataInvariant.status_code(),
      StatusCode::INTERNAL_SERVER_ERROR
    );
  }

  #[test]
  fn default_kind_is_internal() {
    let err = AppError::new(anyhow::anyhow!("boom"));
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert!(!err.is_transient());
  }

  #[test]
  fn display_includes_kind() {
    let err = AppError::user_input(anyhow::anyhow!("missing id"));
    assert_eq!(format!("{err}"), "[user_input] missing id");
  }
}
