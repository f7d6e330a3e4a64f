//! Engine Config - 태스크 엔진 설정
//!
//! 설정 파일(`engine.json`)은 부분 설정만 담을 수 있고, 글로벌 → 프로젝트 순으로
//! 병합한 뒤 기본값으로 채워 `EngineConfig`가 됩니다.

use crate::storage::JsonStore;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// 설정 파일명
pub const ENGINE_CONFIG_FILE: &str = "engine.json";

const DEFAULT_MAX_TASKS: usize = 1000;
const DEFAULT_TIMEOUT_SECS: u64 = 300;
const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 300;
const DEFAULT_RETENTION_SECS: u64 = 24 * 60 * 60;

fn default_max_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 2)
        .unwrap_or(4)
}

// ============================================================================
// EngineSettings (파일 표현)
// ============================================================================

/// 설정 파일에 저장되는 부분 설정
///
/// 지정하지 않은 필드는 하위 레이어(글로벌 설정 또는 기본값)를 그대로 사용합니다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSettings {
    /// 워커 수
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,

    /// 레지스트리 최대 태스크 수
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tasks: Option<usize>,

    /// 기본 실행 타임아웃 (초)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_timeout_secs: Option<u64>,

    /// 정리 주기 (초)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup_interval_secs: Option<u64>,

    /// 종료된 태스크 보관 기간 (초)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention_secs: Option<u64>,
}

impl EngineSettings {
    /// 글로벌 + 프로젝트 병합 로드
    pub fn load() -> Result<Self> {
        let mut settings = Self::default();

        // 1. 글로벌 설정
        if let Ok(global) = JsonStore::global() {
            settings.merge(Self::load_from(&global)?);
        }

        // 2. 프로젝트 설정
        if let Ok(project) = JsonStore::current_project() {
            settings.merge(Self::load_from(&project)?);
        }

        Ok(settings)
    }

    /// 특정 저장소에서 로드 (파일이 없으면 빈 설정)
    pub fn load_from(store: &JsonStore) -> Result<Self> {
        match store.load_optional::<EngineSettings>(ENGINE_CONFIG_FILE)? {
            Some(settings) => {
                debug!(
                    "Loaded engine settings from {}",
                    store.file_path(ENGINE_CONFIG_FILE).display()
                );
                Ok(settings)
            }
            None => Ok(Self::default()),
        }
    }

    /// 저장소에 저장
    pub fn save_to(&self, store: &JsonStore) -> Result<()> {
        store.save(ENGINE_CONFIG_FILE, self)
    }

    /// 다른 설정으로 덮어쓰기 (지정된 필드만)
    pub fn merge(&mut self, other: EngineSettings) {
        if other.max_workers.is_some() {
            self.max_workers = other.max_workers;
        }
        if other.max_tasks.is_some() {
            self.max_tasks = other.max_tasks;
        }
        if other.default_timeout_secs.is_some() {
            self.default_timeout_secs = other.default_timeout_secs;
        }
        if other.cleanup_interval_secs.is_some() {
            self.cleanup_interval_secs = other.cleanup_interval_secs;
        }
        if other.retention_secs.is_some() {
            self.retention_secs = other.retention_secs;
        }
    }

    /// 기본값으로 채우고 검증
    pub fn into_config(self) -> Result<EngineConfig> {
        let defaults = EngineConfig::default();
        let config = EngineConfig {
            max_workers: self.max_workers.unwrap_or(defaults.max_workers),
            max_tasks: self.max_tasks.unwrap_or(defaults.max_tasks),
            default_timeout: self
                .default_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.default_timeout),
            cleanup_interval: self
                .cleanup_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.cleanup_interval),
            retention: self
                .retention_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.retention),
        };
        config.validate()?;
        Ok(config)
    }
}

// ============================================================================
// EngineConfig (적용 설정)
// ============================================================================

/// Resolved engine configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Number of workers executing tasks concurrently
    pub max_workers: usize,

    /// Maximum number of tasks the registry holds (active + retained)
    pub max_tasks: usize,

    /// Timeout applied when a submission does not set one
    pub default_timeout: Duration,

    /// How often the sweeper runs
    pub cleanup_interval: Duration,

    /// How long terminal tasks stay queryable
    pub retention: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            max_tasks: DEFAULT_MAX_TASKS,
            default_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            cleanup_interval: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
            retention: Duration::from_secs(DEFAULT_RETENTION_SECS),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 글로벌 + 프로젝트 설정 파일에서 로드
    pub fn load() -> Result<Self> {
        EngineSettings::load()?.into_config()
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(Error::Config("maxWorkers must be at least 1".to_string()));
        }
        if self.max_tasks == 0 {
            return Err(Error::Config("maxTasks must be at least 1".to_string()));
        }
        if self.default_timeout.is_zero() {
            return Err(Error::Config("defaultTimeoutSecs must be positive".to_string()));
        }
        if self.cleanup_interval.is_zero() {
            return Err(Error::Config(
                "cleanupIntervalSecs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    // ========================================================================
    // Builder
    // ========================================================================

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_max_tasks(mut self, max_tasks: usize) -> Self {
        self.max_tasks = max_tasks;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }
}
