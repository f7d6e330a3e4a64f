//! Error types for the Insight engine
//!
//! 모든 에러를 중앙에서 관리

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Insight 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // 설정 관련
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // 제출 관련
    // ========================================================================
    #[error("Too many tasks: registry holds the maximum of {max}")]
    CapacityExceeded { max: usize },

    #[error("Task service is shutting down")]
    ShuttingDown,

    // ========================================================================
    // 조회 관련
    // ========================================================================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Task {task_id} has not finished yet (status: {status})")]
    InvalidState { task_id: String, status: String },

    // ========================================================================
    // 실행 결과
    // ========================================================================
    #[error("Task execution failed: {message}")]
    ExecutionFailed {
        message: String,
        traceback: Option<String>,
    },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled")]
    Cancelled,

    // ========================================================================
    // 일반
    // ========================================================================
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// 재시도 가능한 에러인지 확인
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::CapacityExceeded { .. })
    }

    /// 사용자에게 보여줄 수 있는 에러인지 확인
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_)
                | Error::InvalidState { .. }
                | Error::InvalidInput(_)
                | Error::CapacityExceeded { .. }
                | Error::Cancelled
        )
    }

    /// HTTP status the API layer answers with for this error
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NotFound(_) => 404,
            Error::InvalidInput(_) => 400,
            Error::InvalidState { .. } => 202,
            Error::Cancelled => 410,
            Error::CapacityExceeded { .. } | Error::ShuttingDown => 503,
            Error::ExecutionFailed { .. } | Error::Timeout(_) => 500,
            Error::Config(_) | Error::Io(_) | Error::Json(_) | Error::Internal(_) => 500,
        }
    }

    /// Task-not-found 에러 생성 헬퍼
    pub fn task_not_found(task_id: impl std::fmt::Display) -> Self {
        Error::NotFound(format!("Task {} not found", task_id))
    }

    /// 실행 실패 에러 생성 헬퍼
    pub fn execution_failed(message: impl Into<String>, traceback: Option<String>) -> Self {
        Error::ExecutionFailed {
            message: message.into(),
            traceback,
        }
    }
}
