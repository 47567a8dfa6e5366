//! 模块发现
//!
//! 每个清单目录下，一个包占一个子目录，子目录内的 `module.json` 声明该包的模块树。
//! 发现结果在进入同步前统一校验：字段格式、同级编码重复、跨包模块编码重复、依赖存在。

use std::{
    collections::{HashMap, HashSet},
    fs,
    path::{Path, PathBuf},
};

use validator::Validate;

use crate::{
    error::{AppError, AppResult},
    models::manifest::ModuleDefinition,
};

/// 包内模块清单文件名
pub const MANIFEST_FILE: &str = "module.json";

/// 一个已解析的模块清单
#[derive(Debug, Clone)]
pub struct DiscoveredModule {
    pub package: String,
    pub path: PathBuf,
    pub definition: ModuleDefinition,
}

/// 扫描所有清单目录并返回校验通过的模块定义
///
/// 不存在的目录只记录警告；没有 `module.json` 的子目录会被跳过。
pub fn discover_modules<P: AsRef<Path>>(dirs: &[P]) -> AppResult<Vec<ModuleDefinition>> {
    let mut discovered = Vec::new();
    for dir in dirs {
        discovered.extend(scan_dir(dir.as_ref())?);
    }

    let definitions: Vec<ModuleDefinition> =
        discovered.into_iter().map(|m| m.definition).collect();
    validate_definitions(&definitions)?;

    tracing::debug!(count = definitions.len(), "Module manifests discovered");
    Ok(definitions)
}

/// 扫描单个清单目录，按包名排序
pub fn scan_dir(dir: &Path) -> AppResult<Vec<DiscoveredModule>> {
    if !dir.is_dir() {
        tracing::warn!(dir = %dir.display(), "Manifest directory not found, skipping");
        return Ok(Vec::new());
    }

    let entries = fs::read_dir(dir).map_err(|e| {
        AppError::Internal(format!("Failed to read manifest directory {}: {}", dir.display(), e))
    })?;

    let mut packages: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.join(MANIFEST_FILE).is_file())
        .collect();
    packages.sort();

    packages
        .into_iter()
        .map(|package_dir| {
            let package = package_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let path = package_dir.join(MANIFEST_FILE);
            let definition = load_manifest(&path)?;
            Ok(DiscoveredModule {
                package,
                path,
                definition,
            })
        })
        .collect()
}

/// 读取并解析单个 `module.json`
pub fn load_manifest(path: &Path) -> AppResult<ModuleDefinition> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Internal(format!("Failed to read {}: {}", path.display(), e)))?;

    serde_json::from_str(&raw)
        .map_err(|e| AppError::Validation(format!("Invalid module manifest {}: {}", path.display(), e)))
}

/// 校验一组模块定义
pub fn validate_definitions(definitions: &[ModuleDefinition]) -> AppResult<()> {
    let mut seen: HashMap<&str, usize> = HashMap::new();

    for def in definitions {
        def.validate().map_err(|e| {
            AppError::Validation(format!("Invalid module definition '{}': {}", def.code, e))
        })?;

        let duplicates = def.duplicate_codes();
        if !duplicates.is_empty() {
            return Err(AppError::Validation(format!(
                "Duplicate codes in module '{}': {}",
                def.code,
                duplicates.join(", ")
            )));
        }

        *seen.entry(def.code.as_str()).or_default() += 1;
    }

    if let Some((code, _)) = seen.iter().find(|(_, count)| **count > 1) {
        return Err(AppError::Validation(format!(
            "Module '{}' is declared by more than one package",
            code
        )));
    }

    let codes: HashSet<&str> = seen.keys().copied().collect();
    for def in definitions {
        if let Some(missing) = def
            .dependencies
            .iter()
            .find(|dep| !codes.contains(dep.as_str()))
        {
            return Err(AppError::Validation(format!(
                "Module '{}' depends on unknown module '{}'",
                def.code, missing
            )));
        }
    }

    Ok(())
}
