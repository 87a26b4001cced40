use crate::types::{Article, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Structured result of the analysis stage. The engine persists this
/// payload verbatim and never looks inside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub summary: String,
    pub key_points: Vec<String>,
    /// 1-10 editorial value estimate.
    pub value_score: f64,
    /// Estimated reading time in minutes.
    pub reading_time: u32,
    /// "zh" or "en".
    pub language: String,
    pub tags: Vec<String>,
    pub model_used: String,
}

/// Analysis collaborator. An LLM-backed provider implements this trait
/// outside this crate; the engine only interprets success or failure.
#[async_trait]
pub trait ContentAnalyzer: Send + Sync {
    async fn analyze(&self, article: &Article, content: &str) -> Result<Analysis>;

    fn analyzer_name(&self) -> String;
}

/// Deterministic built-in analyzer: extractive summary, capitalized-token
/// tags, length-based scoring. Good enough to keep the pipeline exercised
/// without any external provider.
pub struct HeuristicAnalyzer {
    words_per_minute: u32,
}

impl HeuristicAnalyzer {
    pub fn new() -> Self {
        Self {
            words_per_minute: 200,
        }
    }

    fn summarize(title: &str, content: &str) -> String {
        let sentences: Vec<&str> = content
            .split('.')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .take(2)
            .collect();

        if sentences.is_empty() {
            title.to_string()
        } else {
            format!("{}: {}.", title, sentences.join(". "))
        }
    }

    fn key_points(content: &str) -> Vec<String> {
        content
            .split(['.', '\n'])
            .map(str::trim)
            .filter(|s| s.chars().count() > 40)
            .take(3)
            .map(|s| s.to_string())
            .collect()
    }

    fn extract_tags(content: &str) -> Vec<String> {
        let mut tags: Vec<String> = content
            .split_whitespace()
            .filter_map(|word| {
                let clean = word.trim_matches(|c: char| !c.is_alphabetic());
                let mut chars = clean.chars();
                match chars.next() {
                    Some(first) if first.is_uppercase() && clean.chars().count() > 2 => {
                        Some(clean.to_string())
                    }
                    _ => None,
                }
            })
            .collect();

        tags.sort();
        tags.dedup();
        tags.truncate(5);
        tags
    }

    fn detect_language(content: &str) -> &'static str {
        let cjk = content
            .chars()
            .filter(|c| ('\u{4e00}'..='\u{9fff}').contains(c))
            .count();
        if cjk * 10 > content.chars().count() {
            "zh"
        } else {
            "en"
        }
    }
}

impl Default for HeuristicAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentAnalyzer for HeuristicAnalyzer {
    async fn analyze(&self, article: &Article, content: &str) -> Result<Analysis> {
        debug!("Analyzing article {} heuristically", article.id);

        let word_count = content.split_whitespace().count() as u32;
        let reading_time = (word_count / self.words_per_minute).max(1);

        // Longer, structured bodies score higher; capped well below what a
        // real reviewer would hand out.
        let value_score = (3.0 + (word_count as f64 / 400.0)).min(7.0);

        Ok(Analysis {
            summary: Self::summarize(&article.title, content),
            key_points: Self::key_points(content),
            value_score,
            reading_time,
            language: Self::detect_language(content).to_string(),
            tags: Self::extract_tags(content),
            model_used: self.analyzer_name(),
        })
    }

    fn analyzer_name(&self) -> String {
        "heuristic".to_string()
    }
}
