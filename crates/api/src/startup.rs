//! Process wiring: logging, database, backends, templates and stores.

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use comfybot_comfyui::api::ComfyUIApi;
use comfybot_comfyui::backend::GenerationBackend;
use comfybot_core::catalog::ModelCatalog;
use comfybot_db::stores::{AdminStore, CanvasStore, PreferenceStore};
use comfybot_db::DbPool;
use comfybot_events::EventBus;
use comfybot_pipeline::templates::TemplateLibrary;
use comfybot_pipeline::{Orchestrator, OrchestratorParts};

use crate::config::{LogFormat, ServerConfig};
use crate::state::AppState;

const DEFAULT_LOG_FILTER: &str = "comfybot_api=debug,comfybot_pipeline=debug,tower_http=debug";

/// Install the global tracing subscriber. `RUST_LOG` overrides the
/// default filter.
pub fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .init(),
    }
}

/// Connect, verify and migrate the stats database.
pub async fn open_database(database_url: &str) -> anyhow::Result<DbPool> {
    let pool = comfybot_db::create_pool(database_url)
        .await
        .with_context(|| format!("failed to open database {database_url}"))?;
    tracing::info!("Database connection pool created");

    comfybot_db::health_check(&pool)
        .await
        .context("database health check failed")?;
    comfybot_db::run_migrations(&pool)
        .await
        .context("failed to run database migrations")?;
    tracing::info!("Database migrations applied");
    Ok(pool)
}

/// One REST client per configured ComfyUI URL.
pub fn connect_backends(urls: &[String]) -> anyhow::Result<Vec<Arc<dyn GenerationBackend>>> {
    if urls.is_empty() {
        anyhow::bail!("no ComfyUI backend configured");
    }
    urls.iter()
        .map(|url| {
            let api = ComfyUIApi::new(url.as_str())
                .with_context(|| format!("failed to build HTTP client for {url}"))?;
            tracing::info!(%url, "ComfyUI backend configured");
            Ok(Arc::new(api) as Arc<dyn GenerationBackend>)
        })
        .collect()
}

/// The model catalog from `MODELS_FILE`, or the built-in single model.
pub async fn load_catalog(config: &ServerConfig) -> anyhow::Result<ModelCatalog> {
    let Some(path) = &config.models_file else {
        tracing::info!("No MODELS_FILE configured, using the built-in model");
        return Ok(ModelCatalog::builtin());
    };
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("cannot read model catalog {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("model catalog {} is not valid JSON", path.display()))?;
    let catalog = ModelCatalog::from_json_value(value, config.default_model.as_deref())?;
    tracing::info!(
        models = catalog.keys().count(),
        default_model = catalog.default_model(),
        "Model catalog loaded",
    );
    Ok(catalog)
}

/// Assemble the application state from configuration and the given
/// generation backends.
pub async fn build_state(
    config: ServerConfig,
    backends: Vec<Arc<dyn GenerationBackend>>,
) -> anyhow::Result<AppState> {
    let pool = open_database(&config.database_url).await?;

    let templates = TemplateLibrary::load_dir(&config.workflows_path).await?;
    if templates.is_empty() {
        tracing::warn!(dir = %config.workflows_path.display(), "No workflow templates found");
    }
    let catalog = load_catalog(&config).await?;

    let preferences = PreferenceStore::load(&config.preferences_file)
        .await
        .context("failed to load user preferences")?;
    let admins = AdminStore::load(&config.admins_file)
        .await
        .context("failed to load admin list")?;
    let canvas_store = CanvasStore::new(&config.canvas_path);

    let event_bus = Arc::new(EventBus::default());

    let orchestrator = Arc::new(Orchestrator::new(OrchestratorParts {
        config: config.orchestrator_config(),
        backends,
        templates,
        catalog,
        pool: pool.clone(),
        preferences,
        canvas_store,
        events: Arc::clone(&event_bus),
    }));

    Ok(AppState {
        orchestrator,
        pool,
        admins: Arc::new(admins),
        admin_policy: config.admin_policy,
        config: Arc::new(config),
        event_bus,
    })
}
