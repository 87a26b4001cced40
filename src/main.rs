use anyhow::Context;
use article_processor::api::{router, AppState};
use article_processor::{
    ArticleStore, HeuristicAnalyzer, HttpExtractor, PgArticleStore, ProcessEngine, Settings,
};
use clap::Parser;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let settings = Settings::parse();
    info!("Starting article processor");

    let store = PgArticleStore::connect(&settings.database_url)
        .await
        .context("failed to connect to Postgres; is the database running?")?;
    store
        .migrate()
        .await
        .context("failed to run database migrations")?;
    info!("Database connected and migrated");

    let store: Arc<dyn ArticleStore> = Arc::new(store);
    let extractor = Arc::new(HttpExtractor::new(settings.fetch_settings())?);
    let analyzer = Arc::new(HeuristicAnalyzer::new());
    let engine = ProcessEngine::new(store.clone(), extractor, analyzer);

    let app = router(AppState { engine, store });

    let listener = tokio::net::TcpListener::bind(&settings.bind)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind))?;
    info!("Control API listening on {}", settings.bind);
    axum::serve(listener, app).await?;

    Ok(())
}
