//! JSON 설정 파일 저장소
//!
//! 글로벌(`<config_dir>/insight/`)과 프로젝트(`./.insight/`) 두 위치만 사용합니다.

use crate::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::io::ErrorKind;
use std::path::PathBuf;

/// Directory name used under the user config dir and inside projects
pub const STORE_DIR_NAME: &str = "insight";

/// 설정 파일이 놓이는 디렉토리
#[derive(Debug, Clone)]
pub struct JsonStore {
    dir: PathBuf,
}

impl JsonStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// 글로벌 설정 디렉토리
    pub fn global() -> Result<Self> {
        dirs::config_dir()
            .map(|dir| Self::new(dir.join(STORE_DIR_NAME)))
            .ok_or_else(|| Error::Config("Cannot find config directory".to_string()))
    }

    /// `root` 아래 프로젝트 설정 디렉토리
    pub fn project(root: impl Into<PathBuf>) -> Self {
        Self::new(root.into().join(format!(".{}", STORE_DIR_NAME)))
    }

    /// 현재 작업 디렉토리 기준 프로젝트 설정
    pub fn current_project() -> Result<Self> {
        Ok(Self::project(std::env::current_dir()?))
    }

    pub fn file_path(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    /// 파일이 없으면 `None`
    pub fn load_optional<T: DeserializeOwned>(&self, filename: &str) -> Result<Option<T>> {
        let content = match std::fs::read_to_string(self.file_path(filename)) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// 디렉토리를 만들고 pretty JSON으로 저장
    pub fn save<T: Serialize>(&self, filename: &str, data: &T) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let content = serde_json::to_string_pretty(data)?;
        std::fs::write(self.file_path(filename), content)?;
        Ok(())
    }
}
