use anyhow::Context;
use delivery_sync::services::{LoggingCourierDispatcher, LoggingNotifier};
use delivery_sync::{BackgroundTasks, Config, SyncState, SyncStorage, init_logger_with_file, load_tenants};
use marketplace_client::{CredentialManager, HttpTokenExchange, MarketplaceClient};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. 环境 (dotenv, 日志)
    dotenv::dotenv().ok();
    let config = Config::from_env();
    init_logger_with_file(Some(&config.log_level), config.log_dir.as_deref());

    tracing::info!(work_dir = %config.work_dir, "Delivery sync starting...");

    // 2. 存储
    std::fs::create_dir_all(&config.work_dir)
        .with_context(|| format!("failed to create work dir {}", config.work_dir))?;
    let storage = SyncStorage::open(config.database_path()).context("failed to open storage")?;

    // 3. 平台客户端
    let marketplace = config.marketplace();
    let exchange = Arc::new(HttpTokenExchange::new(&marketplace)?);
    let credentials = Arc::new(CredentialManager::new(exchange));
    let api = Arc::new(MarketplaceClient::new(&marketplace, credentials.clone())?);

    let state = SyncState::new(
        config.clone(),
        storage,
        api,
        Arc::new(LoggingCourierDispatcher),
        Arc::new(LoggingNotifier),
    );

    // 4. 租户
    let tenants_path = config.tenants_path();
    let tenants = load_tenants(&tenants_path)
        .with_context(|| format!("failed to load tenants from {}", tenants_path.display()))?;
    for tenant in &tenants {
        credentials.register_tenant(&tenant.tenant_id, tenant.secrets());
        state.tenants.register(&tenant.tenant_id, &tenant.merchant_id);
        state.polling.start(&tenant.tenant_id, &tenant.merchant_id);
    }
    tracing::info!(tenants = tenants.len(), "Tenants registered");

    // 5. 后台任务
    let mut tasks = BackgroundTasks::new();
    state.start_background_tasks(&mut tasks);
    tasks.log_summary();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    state.polling.shutdown().await;
    tasks.shutdown().await;
    tracing::info!("Delivery sync stopped");
    Ok(())
}
