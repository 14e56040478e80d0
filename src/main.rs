// Copyright 2025 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use migration::{Migrator, MigratorTrait};
use rasterflow::application::usecases::task_service::TaskService;
use rasterflow::config::settings::Settings;
use rasterflow::engines::{ocr_from_settings, renderer_from_settings};
use rasterflow::infrastructure::database::connection;
use rasterflow::infrastructure::liveness::{ProcessLiveness, SlotRegistry};
use rasterflow::infrastructure::metrics::init_metrics;
use rasterflow::infrastructure::repositories::task_repo_impl::TaskRepositoryImpl;
use rasterflow::infrastructure::storage::LocalStorage;
use rasterflow::presentation::routes;
use rasterflow::utils::telemetry;
use rasterflow::workers::conversion_worker::ConversionDeps;
use rasterflow::workers::manager::WorkerManager;
use rasterflow::workers::watchdog_worker::WatchdogWorker;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// 关闭时等待执行槽走到检查点的宽限期
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// 主函数
///
/// 应用程序入口点，负责初始化所有组件并启动服务
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize logging
    telemetry::init_telemetry();
    info!("Starting rasterflow...");

    // 2. Load configuration
    let settings = Arc::new(Settings::new()?);
    info!("Configuration loaded");

    if settings.metrics.enabled {
        match settings.metrics.addr.parse::<SocketAddr>() {
            Ok(addr) => init_metrics(addr),
            Err(e) => warn!("Invalid metrics address {}: {}", settings.metrics.addr, e),
        }
    }

    // 3. Connect to database
    let db = Arc::new(connection::create_pool(&settings.database).await?);
    info!("Database connection established");

    info!("Running database migrations...");
    Migrator::up(db.as_ref(), None).await?;
    info!("Database migrations applied");

    // 4. Repositories and collaborators
    let task_repo = Arc::new(TaskRepositoryImpl::new(db.clone()));
    let storage = Arc::new(LocalStorage::new(settings.storage.local_path.clone()));
    let renderer = renderer_from_settings(&settings.rendering);
    let ocr = ocr_from_settings(&settings.rendering);
    info!(
        renderer = renderer.name(),
        ocr = ocr.name(),
        "Rendering collaborators ready"
    );

    // 5. Start worker slots and the watchdog
    let registry = SlotRegistry::new();
    let mut worker_manager = WorkerManager::new();
    worker_manager.start_workers(
        settings.worker.slots.max(1),
        ConversionDeps {
            repository: task_repo.clone(),
            storage: storage.clone(),
            renderer,
            ocr: Some(ocr),
            registry: registry.clone(),
            tile_edge: settings.worker.tile_edge(),
            poll_interval: settings.worker.poll_interval(),
        },
    );

    let watchdog = WatchdogWorker::new(
        task_repo.clone(),
        storage.clone(),
        Arc::new(ProcessLiveness::new(registry)),
        settings.watchdog.clone(),
        worker_manager.subscribe(),
    );
    worker_manager.spawn(Arc::new(watchdog));
    info!("Started {} background workers", worker_manager.len());

    // 6. Start HTTP server
    let service = Arc::new(TaskService::new(
        task_repo.clone(),
        storage.clone(),
        settings.submission.clone(),
    ));
    let app = routes::routes(service, settings.server.max_upload_bytes);

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            worker_manager.wait_for_shutdown(SHUTDOWN_GRACE).await;
        })
        .await?;

    info!("Server stopped");
    Ok(())
}
