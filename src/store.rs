use crate::analyzer::Analysis;
use crate::state_machine;
use crate::types::{
    Article, FailedArticle, FailedPage, ProcessStage, ProcessStatus, ProcessorError, ProcessStats,
    Result,
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;

/// The narrow persistence contract the engine works against. The engine
/// never issues queries beyond these shapes; anything richer (ranking,
/// read/starred state) lives outside this crate.
#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Record a newly synced article. Existing ids are left untouched so a
    /// re-sync cannot clobber processing state.
    async fn insert(&self, article: &Article) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Article>>;

    /// Every article a run would pick up, oldest first, id as tie-break.
    async fn select_eligible(&self) -> Result<Vec<Article>>;

    /// Write the processing triple in one statement. `error` and `stage`
    /// are always written together with the status so a reader can never
    /// observe a failed status with a stale or missing reason.
    async fn update_status(
        &self,
        id: &str,
        status: ProcessStatus,
        error: Option<&str>,
        stage: Option<ProcessStage>,
    ) -> Result<()>;

    /// Persist the fetch stage's payload.
    async fn store_extracted(&self, id: &str, content: &str) -> Result<()>;

    /// Persist (or replace) the analysis stage's payload.
    async fn store_analysis(&self, id: &str, analysis: &Analysis) -> Result<()>;

    async fn count_by_status(&self) -> Result<ProcessStats>;

    /// Paginated triage listing of failed articles. Pages are 1-based.
    async fn list_failed(&self, page: u32, page_size: u32) -> Result<FailedPage>;

    /// Move every failed article back to the pending status of the stage
    /// that failed, clearing error and stage in the same statement.
    /// Returns how many articles were reset.
    async fn reset_failed(&self) -> Result<u64>;
}

/// Postgres-backed store.
pub struct PgArticleStore {
    db: PgPool,
}

impl PgArticleStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let db = PgPool::connect(database_url).await?;
        Ok(Self { db })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.db).await?;
        Ok(())
    }

    fn article_from_row(row: &PgRow) -> Result<Article> {
        let status: String = row.try_get("process_status")?;
        let stage: Option<String> = row.try_get("process_stage")?;
        Ok(Article {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            url: row.try_get("url")?,
            content_text: row.try_get("content_text")?,
            full_content: row.try_get("full_content")?,
            content_source: row.try_get("content_source")?,
            process_status: ProcessStatus::parse(&status)?,
            process_error: row.try_get("process_error")?,
            process_stage: stage.as_deref().map(ProcessStage::parse).transpose()?,
            synced_at: row.try_get("synced_at")?,
        })
    }
}

#[async_trait]
impl ArticleStore for PgArticleStore {
    async fn insert(&self, article: &Article) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO articles
                (id, title, url, content_text, full_content, content_source,
                 process_status, process_error, process_stage, synced_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&article.id)
        .bind(&article.title)
        .bind(&article.url)
        .bind(&article.content_text)
        .bind(&article.full_content)
        .bind(&article.content_source)
        .bind(article.process_status.as_str())
        .bind(&article.process_error)
        .bind(article.process_stage.map(|s| s.as_str()))
        .bind(article.synced_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Article>> {
        let row = sqlx::query("SELECT * FROM articles WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        row.map(|row| Self::article_from_row(&row)).transpose()
    }

    async fn select_eligible(&self) -> Result<Vec<Article>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM articles
            WHERE process_status IN ('synced', 'pending_fetch', 'pending_analysis')
            ORDER BY synced_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(Self::article_from_row).collect()
    }

    async fn update_status(
        &self,
        id: &str,
        status: ProcessStatus,
        error: Option<&str>,
        stage: Option<ProcessStage>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE articles
            SET process_status = $2, process_error = $3, process_stage = $4
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(error)
        .bind(stage.map(|s| s.as_str()))
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn store_extracted(&self, id: &str, content: &str) -> Result<()> {
        sqlx::query(
            "UPDATE articles SET full_content = $2, content_source = 'fetched' WHERE id = $1",
        )
        .bind(id)
        .bind(content)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn store_analysis(&self, id: &str, analysis: &Analysis) -> Result<()> {
        let key_points = serde_json::to_string(&analysis.key_points)?;
        let tags = serde_json::to_string(&analysis.tags)?;

        sqlx::query(
            r#"
            INSERT INTO article_analysis
                (article_id, summary, key_points, value_score, reading_time,
                 language, tags, model_used, analyzed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (article_id) DO UPDATE SET
                summary = EXCLUDED.summary,
                key_points = EXCLUDED.key_points,
                value_score = EXCLUDED.value_score,
                reading_time = EXCLUDED.reading_time,
                language = EXCLUDED.language,
                tags = EXCLUDED.tags,
                model_used = EXCLUDED.model_used,
                analyzed_at = EXCLUDED.analyzed_at
            "#,
        )
        .bind(id)
        .bind(&analysis.summary)
        .bind(key_points)
        .bind(analysis.value_score)
        .bind(analysis.reading_time as i32)
        .bind(&analysis.language)
        .bind(tags)
        .bind(&analysis.model_used)
        .bind(Utc::now())
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn count_by_status(&self) -> Result<ProcessStats> {
        let rows =
            sqlx::query("SELECT process_status, COUNT(*) AS count FROM articles GROUP BY process_status")
                .fetch_all(&self.db)
                .await?;

        let mut stats = ProcessStats::default();
        for row in rows {
            let status: String = row.try_get("process_status")?;
            let count: i64 = row.try_get("count")?;
            stats.record(ProcessStatus::parse(&status)?, count as u64);
        }
        Ok(stats)
    }

    async fn list_failed(&self, page: u32, page_size: u32) -> Result<FailedPage> {
        let page = page.max(1);
        let page_size = page_size.max(1);

        let total: i64 = sqlx::query("SELECT COUNT(*) AS count FROM articles WHERE process_status = 'failed'")
            .fetch_one(&self.db)
            .await?
            .try_get("count")?;

        let offset = (page as i64 - 1) * page_size as i64;
        let rows = sqlx::query(
            r#"
            SELECT id, title, url, process_stage, process_error FROM articles
            WHERE process_status = 'failed'
            ORDER BY synced_at ASC, id ASC
            OFFSET $1 LIMIT $2
            "#,
        )
        .bind(offset)
        .bind(page_size as i64)
        .fetch_all(&self.db)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let stage: Option<String> = row.try_get("process_stage")?;
            items.push(FailedArticle {
                article_id: row.try_get("id")?,
                title: row.try_get("title")?,
                url: row.try_get("url")?,
                stage: stage.as_deref().map(ProcessStage::parse).transpose()?,
                error: row.try_get("process_error")?,
            });
        }

        Ok(FailedPage {
            total: total as u64,
            page,
            page_size,
            items,
        })
    }

    async fn reset_failed(&self) -> Result<u64> {
        // One statement, so status/error/stage can never be seen half-cleared.
        let result = sqlx::query(
            r#"
            UPDATE articles
            SET process_status = CASE
                    WHEN process_stage = 'fetch' THEN 'pending_fetch'
                    ELSE 'pending_analysis'
                END,
                process_error = NULL,
                process_stage = NULL
            WHERE process_status = 'failed'
            "#,
        )
        .execute(&self.db)
        .await?;

        let count = result.rows_affected();
        if count > 0 {
            info!("Reset {} failed articles for retry", count);
        }
        Ok(count)
    }
}

/// In-memory store for tests and local development. Same contract, no
/// database required.
#[derive(Default)]
pub struct MemoryArticleStore {
    articles: RwLock<HashMap<String, Article>>,
    analyses: RwLock<HashMap<String, Analysis>>,
}

impl MemoryArticleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stored analysis payload for an article, if any.
    pub async fn analysis(&self, id: &str) -> Option<Analysis> {
        self.analyses.read().await.get(id).cloned()
    }
}

#[async_trait]
impl ArticleStore for MemoryArticleStore {
    async fn insert(&self, article: &Article) -> Result<()> {
        let mut articles = self.articles.write().await;
        articles
            .entry(article.id.clone())
            .or_insert_with(|| article.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Article>> {
        Ok(self.articles.read().await.get(id).cloned())
    }

    async fn select_eligible(&self) -> Result<Vec<Article>> {
        let articles = self.articles.read().await;
        let mut eligible: Vec<Article> = articles
            .values()
            .filter(|a| ProcessStatus::ELIGIBLE.contains(&a.process_status))
            .cloned()
            .collect();
        eligible.sort_by(|a, b| a.synced_at.cmp(&b.synced_at).then_with(|| a.id.cmp(&b.id)));
        Ok(eligible)
    }

    async fn update_status(
        &self,
        id: &str,
        status: ProcessStatus,
        error: Option<&str>,
        stage: Option<ProcessStage>,
    ) -> Result<()> {
        let mut articles = self.articles.write().await;
        let article = articles
            .get_mut(id)
            .ok_or_else(|| ProcessorError::General(format!("no such article: {id}")))?;
        article.process_status = status;
        article.process_error = error.map(|e| e.to_string());
        article.process_stage = stage;
        Ok(())
    }

    async fn store_extracted(&self, id: &str, content: &str) -> Result<()> {
        let mut articles = self.articles.write().await;
        let article = articles
            .get_mut(id)
            .ok_or_else(|| ProcessorError::General(format!("no such article: {id}")))?;
        article.full_content = Some(content.to_string());
        article.content_source = "fetched".to_string();
        Ok(())
    }

    async fn store_analysis(&self, id: &str, analysis: &Analysis) -> Result<()> {
        self.analyses
            .write()
            .await
            .insert(id.to_string(), analysis.clone());
        Ok(())
    }

    async fn count_by_status(&self) -> Result<ProcessStats> {
        let articles = self.articles.read().await;
        let mut stats = ProcessStats::default();
        for article in articles.values() {
            stats.record(article.process_status, 1);
        }
        Ok(stats)
    }

    async fn list_failed(&self, page: u32, page_size: u32) -> Result<FailedPage> {
        let page = page.max(1);
        let page_size = page_size.max(1);

        let articles = self.articles.read().await;
        let mut failed: Vec<&Article> = articles
            .values()
            .filter(|a| a.process_status == ProcessStatus::Failed)
            .collect();
        failed.sort_by(|a, b| a.synced_at.cmp(&b.synced_at).then_with(|| a.id.cmp(&b.id)));

        let total = failed.len() as u64;
        let items = failed
            .into_iter()
            .skip(((page - 1) * page_size) as usize)
            .take(page_size as usize)
            .map(|a| FailedArticle {
                article_id: a.id.clone(),
                title: a.title.clone(),
                url: a.url.clone(),
                stage: a.process_stage,
                error: a.process_error.clone(),
            })
            .collect();

        Ok(FailedPage {
            total,
            page,
            page_size,
            items,
        })
    }

    async fn reset_failed(&self) -> Result<u64> {
        let mut articles = self.articles.write().await;
        let mut count = 0;
        for article in articles.values_mut() {
            if article.process_status != ProcessStatus::Failed {
                continue;
            }
            let stage = article.process_stage.unwrap_or(ProcessStage::Analysis);
            article.process_status = state_machine::retry_target(stage);
            article.process_error = None;
            article.process_stage = None;
            count += 1;
        }
        Ok(count)
    }
}
