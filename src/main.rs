//! ERP 访问控制服务主入口
//! `serve` 启动 HTTP 服务，`sync` 同步模块清单

use erp_access::{
    cli::{self, Command, SyncArgs},
    config::AppConfig,
    db,
    handlers::health,
    middleware::AppState,
    models::sync::{SyncOptions, SyncReport},
    repository::PgStore,
    routes,
    services::{RoleService, SyncService},
    telemetry,
};
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;

#[tokio::main]
async fn main() -> ExitCode {
    let command = match cli::parse_args(std::env::args().skip(1)) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!();
            eprintln!("{}", cli::help_text());
            return ExitCode::FAILURE;
        }
    };

    match command {
        Command::Version => {
            println!("erp-access {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        Command::Help => {
            println!("{}", cli::help_text());
            ExitCode::SUCCESS
        }
        Command::Serve => exit_code(serve().await),
        Command::Sync(args) => exit_code(sync(&args).await),
    }
}

fn exit_code(result: anyhow::Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// 加载 .env、配置与日志
fn bootstrap() -> anyhow::Result<AppConfig> {
    // 生产环境应该直接设置环境变量，不依赖 .env 文件
    if let Ok(env) = std::env::var("ERP_ENV") {
        dotenv::from_filename(format!(".env.{}", env)).ok();
    } else {
        dotenv::from_filename(".env.local").ok();
        dotenv::dotenv().ok();
    }

    let config = AppConfig::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    telemetry::init_telemetry(&config.logging);
    Ok(config)
}

async fn serve() -> anyhow::Result<()> {
    health::set_start_time();
    let config = bootstrap()?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "erp-access starting");

    // 1. 数据库连接池 + 迁移
    let pool = db::create_pool(&config.database).await?;
    db::run_migrations(&pool).await?;
    let store = PgStore::new(pool.clone());

    // 2. 确保受保护的超级管理员角色存在
    RoleService::new(store.clone())
        .ensure_super_admin_role(&config.authorization.super_admin_role)
        .await?;

    // 3. 应用状态与路由
    let state = Arc::new(AppState::new(config.clone(), store, Some(pool))?);
    let app = routes::create_router(state);

    // 4. 启动服务器
    let addr = &config.server.addr;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "Server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(config.server.graceful_shutdown_timeout_secs))
    .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn sync(args: &SyncArgs) -> anyhow::Result<()> {
    let config = bootstrap()?;

    let pool = db::create_pool(&config.database).await?;
    let store = PgStore::new(pool);

    let service = SyncService::new(store, config.tenancy.clone(), &config.modules.manifest_dirs);
    let report = service.sync(&SyncOptions::from(args)).await?;

    print_report(&report);
    Ok(())
}

fn print_report(report: &SyncReport) {
    println!("Module sync completed (scope: {})", report.scope);
    println!("{:<14} {:>8} {:>8} {:>8}", "level", "created", "updated", "removed");
    for (level, counts) in report.rows() {
        println!(
            "{:<14} {:>8} {:>8} {:>8}",
            level, counts.created, counts.updated, counts.removed
        );
    }
    if report.grants_removed > 0 {
        println!("Removed {} grant(s) pointing at deleted nodes", report.grants_removed);
    }
    if report.is_unchanged() {
        println!("Hierarchy already up to date");
    }
}

/// 优雅关闭信号处理
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl+C received, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Terminate signal received, starting graceful shutdown");
        },
    }

    // 超时后强制退出
    tokio::spawn(async move {
        tokio::time::sleep(tokio::time::Duration::from_secs(timeout_secs)).await;
        tracing::warn!("Graceful shutdown timeout reached, forcing exit");
        std::process::exit(1);
    });
}
