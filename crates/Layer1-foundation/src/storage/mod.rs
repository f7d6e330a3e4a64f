//! Storage module for the Insight engine
//!
//! - `json`: JSON - 설정 파일 저장/로드
//!
//! Task state itself is never persisted; the registry lives in memory only.

mod json;

pub use json::JsonStore;
