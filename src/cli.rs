//! 命令行参数解析
//!
//! `erp-access [serve]` 启动 HTTP 服务；
//! `erp-access sync [--scope platform|tenant|all] [--fresh] [--force] [--prune]` 同步模块清单。

use crate::models::{module::SyncScope, sync::SyncOptions};

/// 解析后的命令
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Serve,
    Sync(SyncArgs),
    Version,
    Help,
}

/// `sync` 子命令参数
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncArgs {
    pub scope: Option<SyncScope>,
    pub fresh: bool,
    pub force: bool,
    pub prune: bool,
}

impl From<&SyncArgs> for SyncOptions {
    fn from(args: &SyncArgs) -> Self {
        SyncOptions {
            scope: args.scope,
            fresh: args.fresh,
            force: args.force,
            prune: args.prune,
        }
    }
}

/// 参数错误
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CliError {
    #[error("unknown argument: {0}")]
    UnknownArgument(String),
    #[error("--scope requires a value (platform, tenant or all)")]
    MissingScope,
    #[error("invalid scope '{0}' (expected platform, tenant or all)")]
    InvalidScope(String),
}

/// 解析参数（不含程序名）
pub fn parse_args<I, T>(args: I) -> Result<Command, CliError>
where
    I: IntoIterator<Item = T>,
    T: Into<String>,
{
    let mut args = args.into_iter().map(Into::into);

    let Some(first) = args.next() else {
        return Ok(Command::Serve);
    };

    match first.as_str() {
        "serve" => match args.next() {
            None => Ok(Command::Serve),
            Some(extra) => Err(CliError::UnknownArgument(extra)),
        },
        "sync" => parse_sync(args).map(Command::Sync),
        "--version" | "-V" => Ok(Command::Version),
        "--help" | "-h" | "help" => Ok(Command::Help),
        _ => Err(CliError::UnknownArgument(first)),
    }
}

fn parse_sync(mut args: impl Iterator<Item = String>) -> Result<SyncArgs, CliError> {
    let mut sync = SyncArgs::default();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--fresh" => sync.fresh = true,
            "--force" => sync.force = true,
            "--prune" => sync.prune = true,
            "--scope" => {
                let value = args.next().ok_or(CliError::MissingScope)?;
                sync.scope = Some(parse_scope(&value)?);
            }
            other => match other.strip_prefix("--scope=") {
                Some(value) => sync.scope = Some(parse_scope(value)?),
                None => return Err(CliError::UnknownArgument(arg)),
            },
        }
    }

    Ok(sync)
}

fn parse_scope(value: &str) -> Result<SyncScope, CliError> {
    value
        .parse()
        .map_err(|_| CliError::InvalidScope(value.to_string()))
}

pub fn help_text() -> String {
    format!(
        r#"erp-access {}

Usage:
  erp-access [serve]                 Start the HTTP server
  erp-access sync [OPTIONS]          Sync module manifests into the hierarchy tables

Sync options:
  --scope <platform|tenant|all>      Scope to sync (auto-detected when omitted)
  --fresh                            Delete all non-core modules in scope first
  --force                            Skip the hierarchy schema check
  --prune                            Remove children no longer declared by their module

Options:
  -h, --help                         Print help
  -V, --version                      Print version

Configuration is read from ERP_* environment variables (and .env files)."#,
        env!("CARGO_PKG_VERSION")
    )
}
