use std::sync::Arc;

use microquiz_backend::config::Config;
use microquiz_backend::logging::init_tracing;
use microquiz_backend::services::push_provider::PushService;
use microquiz_backend::services::quiz_content::QuizBank;
use microquiz_backend::workers::WorkerManager;
use microquiz_backend::{build_router, build_state};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    let _log_guard = init_tracing(&config.log_level);

    let push = PushService::from_env();
    if !push.is_available() {
        tracing::warn!(provider = ?push.provider_type(), "push provider not configured, prompts will not be delivered");
    }
    let content = QuizBank::from_env();
    tracing::info!(quizzes = content.len(), "quiz bank loaded");

    let state = match build_state(&config.scheduler, Arc::new(push), Arc::new(content)).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "failed to initialize learning service");
            return;
        }
    };
    let learning = Arc::clone(state.learning());

    if let Err(e) = learning.start().await {
        tracing::error!(error = %e, "failed to start quiz scheduler");
        return;
    }

    let worker_manager = match WorkerManager::new(Arc::clone(&learning), config.scheduler.clone()).await {
        Ok(manager) => {
            if let Err(e) = manager.start().await {
                tracing::error!(error = %e, "failed to start workers");
            }
            Some(manager)
        }
        Err(e) => {
            tracing::warn!(error = %e, "worker manager not initialized");
            None
        }
    };

    let app = build_router(state);

    let addr = config.bind_addr();
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "bind listener failed");
            return;
        }
    };
    tracing::info!(%addr, "microquiz-backend listening");

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

    if let Err(e) = server.await {
        tracing::error!(error = %e, "server error");
    }

    tracing::info!("HTTP server stopped, initiating graceful shutdown sequence");

    if let Some(ref manager) = worker_manager {
        manager.stop().await;
    }
    learning.shutdown().await;

    tracing::info!("Graceful shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
