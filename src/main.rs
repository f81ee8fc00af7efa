use std::sync::Arc;

use anyhow::Context;
use tower_http::cors::CorsLayer;

use medictrack::config::AppConfig;
use medictrack::directory::Directory;
use medictrack::notify::{EmailNotifier, LogNotifier, Notifier};
use medictrack::onboarding::{
    AppState, AssignmentManager, ProgressionEngine, TemplateCatalog, api_routes,
};
use medictrack::store::{LibSqlStore, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let config = AppConfig::from_env().context("loading configuration")?;

    // Tracing goes to stderr, plus a daily-rotated file when a log dir is
    // configured. The appender guard must live for the whole run.
    let env_filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    let _file_guard = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "medictrack.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_target(false)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_target(false)
                .init();
            None
        }
    };

    eprintln!("MedicTrack v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API:      http://0.0.0.0:{}/api", config.port);
    eprintln!(
        "   WS:       ws://0.0.0.0:{}/ws/assignments/{{id}}",
        config.port
    );
    eprintln!("   Database: {}", config.db_path.display());

    let store: Arc<dyn Store> = Arc::new(
        LibSqlStore::new_local(&config.db_path)
            .await
            .with_context(|| format!("opening database at {}", config.db_path.display()))?,
    );
    store.run_migrations().await.context("running migrations")?;

    let directory = Arc::new(Directory::new(store.clone()));
    if let Some(admin) = &config.bootstrap_admin {
        let user = directory
            .ensure_bootstrap_admin(&admin.email, &admin.name)
            .await
            .context("ensuring bootstrap admin")?;
        tracing::info!(email = %user.email, "Bootstrap admin ready");
    }

    let notifier: Arc<dyn Notifier> = match config.smtp.clone() {
        Some(smtp) => {
            eprintln!("   SMTP:     {}:{}", smtp.host, smtp.port);
            Arc::new(EmailNotifier::new(smtp))
        }
        None => {
            eprintln!("   SMTP:     disabled (notifications logged only)");
            Arc::new(LogNotifier)
        }
    };

    let (events_tx, _) = tokio::sync::broadcast::channel(256);
    let catalog = Arc::new(TemplateCatalog::new(store.clone()));
    let assignments = Arc::new(AssignmentManager::new(
        store.clone(),
        directory.clone(),
        notifier.clone(),
        events_tx.clone(),
    ));
    let engine = Arc::new(ProgressionEngine::new(
        store.clone(),
        directory.clone(),
        notifier,
        events_tx.clone(),
    ));

    let state = AppState {
        store,
        directory,
        catalog,
        assignments,
        engine,
        events_tx,
    };
    let app = api_routes(state).layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .with_context(|| format!("binding port {}", config.port))?;
    tracing::info!(port = config.port, "MedicTrack API listening");
    axum::serve(listener, app).await.context("serving")?;

    Ok(())
}
