//! # insight-foundation
//!
//! Foundation layer for the Insight task engine:
//! - Error: 공통 에러 타입 (`Error`, `Result`)
//! - Config: 엔진 설정 (`EngineConfig`, `EngineSettings`)
//! - Storage: JsonStore (설정 파일 저장/로드)

pub mod config;
pub mod error;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config (설정)
// ============================================================================
pub use config::{EngineConfig, EngineSettings, ENGINE_CONFIG_FILE};

// ============================================================================
// Storage (저장소)
// ============================================================================
pub use storage::JsonStore;
