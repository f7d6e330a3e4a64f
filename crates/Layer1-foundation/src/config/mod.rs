//! Config - 엔진 설정 관리
//!
//! - `engine.rs` - 워커 풀, 레지스트리 용량, 타임아웃, 정리 주기

mod engine;

pub use engine::{EngineConfig, EngineSettings, ENGINE_CONFIG_FILE};
