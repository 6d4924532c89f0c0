use std::time::Duration;

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::cache::{LookupOptions, SimilarEntry, SimilarOptions, VocabCache};
use crate::config::{Config, get_config_dir, render_config};
use crate::database::sqlite::Database;
use crate::database::sqlite::models::{
    Entry, NewLearningProfile, NewMembership, normalize_lemma,
};
use crate::ollama::OllamaClient;

/// Load the configuration from the config directory, falling back to defaults
#[inline]
pub fn load_config() -> Result<Config> {
    let config_dir = get_config_dir()?;
    Config::load(&config_dir).context("Failed to load configuration")
}

async fn open_database(config: &Config) -> Result<Database> {
    Database::initialize_from_config_dir(config.get_base_dir())
        .await
        .context("Failed to initialize database")
}

async fn open_cache(config: Config) -> Result<VocabCache> {
    VocabCache::open(config)
        .await
        .context("Failed to open vocabulary cache")
}

/// Changes requested on the command line; `None` leaves a setting alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigUpdate {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub embedding_model: Option<String>,
    pub generation_model: Option<String>,
    pub embedding_dimension: Option<u32>,
    pub similarity_threshold: Option<f32>,
    pub max_embedding_age_days: Option<u32>,
}

impl ConfigUpdate {
    #[inline]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply every requested change, stopping at the first invalid one.
    #[inline]
    pub fn apply(self, config: &mut Config) -> Result<()> {
        if let Some(host) = self.host {
            config.ollama.set_host(host)?;
        }
        if let Some(port) = self.port {
            config.ollama.set_port(port)?;
        }
        if let Some(model) = self.embedding_model {
            config.ollama.set_embedding_model(model)?;
        }
        if let Some(model) = self.generation_model {
            config.ollama.set_generation_model(model)?;
        }
        if let Some(dimension) = self.embedding_dimension {
            config.ollama.set_embedding_dimension(dimension)?;
        }
        if let Some(threshold) = self.similarity_threshold {
            config.cache.set_similarity_threshold(threshold)?;
        }
        if let Some(days) = self.max_embedding_age_days {
            config.cache.set_max_embedding_age_days(Some(days))?;
        }
        Ok(())
    }
}

/// Show the configuration, or apply changes and save it.
#[inline]
pub fn configure(update: ConfigUpdate, show: bool) -> Result<()> {
    let mut config = load_config()?;

    if show && update.is_empty() {
        return crate::config::show_config(&config);
    }

    update.apply(&mut config)?;
    config.save()?;

    println!(
        "{} Saved configuration to {}",
        style("✓").green(),
        style(config.config_file_path().display()).dim()
    );
    for line in render_config(&config) {
        println!("{line}");
    }
    Ok(())
}

/// Resolve a word, generating it if nothing suitable is cached.
#[inline]
pub async fn lookup_word(
    lemma: &str,
    language: &str,
    context: &str,
    target_language: Option<String>,
) -> Result<()> {
    let cache = open_cache(load_config()?).await?;
    let options = LookupOptions {
        target_language,
        semantic_reuse: None,
    };

    let entry = cache.lookup(lemma, language, context, &options).await?;
    if entry.key.lemma != normalize_lemma(lemma) {
        println!(
            "{}",
            style(format!("Reused cached entry for a similar word: {}", entry.key.lemma)).dim()
        );
    }
    for line in render_entry(&entry) {
        println!("{line}");
    }

    let stats = cache.coordinator().stats();
    info!(
        "Lookup finished: {} generations, {} refreshes started",
        stats.generations_started, stats.refreshes_started
    );

    // Let a scheduled embedding refresh land before exiting
    while cache.coordinator().refreshes_in_flight() > 0 {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    Ok(())
}

/// List cached entries related to a word. Never generates.
#[inline]
pub async fn similar_words(
    lemma: &str,
    language: &str,
    context: &str,
    top_k: usize,
    profile_id: Option<i64>,
) -> Result<()> {
    let cache = open_cache(load_config()?).await?;
    let options = SimilarOptions {
        top_k,
        profile_id,
        min_similarity: None,
    };

    let similar = cache.find_similar(lemma, language, context, &options).await?;
    if similar.is_empty() {
        println!("No related entries found for '{lemma}'.");
        return Ok(());
    }

    for line in render_similar(&similar) {
        println!("{line}");
    }
    Ok(())
}

/// Rebuild the vector index from the store.
#[inline]
pub async fn reindex() -> Result<()> {
    let cache = open_cache(load_config()?).await?;

    let bar = if console::user_attended_stderr() {
        ProgressBar::new_spinner().with_style(
            ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
                .context("Invalid progress template")?,
        )
    } else {
        ProgressBar::hidden()
    };
    bar.set_message("Rebuilding vector index");
    bar.enable_steady_tick(Duration::from_millis(100));

    let summary = cache.reindex().await;
    bar.finish_and_clear();
    let summary = summary?;

    println!(
        "{} Indexed {} entries with model {}",
        style("✓").green(),
        summary.indexed,
        style(cache.index().model()).cyan()
    );
    if summary.without_embedding > 0 {
        println!("  {} entries have no embedding yet", summary.without_embedding);
    }
    if summary.other_model > 0 {
        println!(
            "  {} entries were embedded with another model and will be regenerated on lookup",
            summary.other_model
        );
    }
    if summary.invalid > 0 {
        println!("  {} stored embeddings were invalid", style(summary.invalid).red());
    }
    Ok(())
}

/// Report Ollama health and index consistency, optionally repairing drift.
#[inline]
pub async fn check(repair: bool) -> Result<()> {
    let config = load_config()?;

    println!("{}", style("Ollama:").bold().yellow());
    let client = OllamaClient::from_config(&config.ollama)?;
    let wanted = [
        config.ollama.embedding_model.clone(),
        config.ollama.generation_model.clone(),
    ];
    let healthy = tokio::task::spawn_blocking(move || {
        let wanted: Vec<&str> = wanted.iter().map(String::as_str).collect();
        client.health_check(&wanted)
    })
    .await
    .context("Health check task failed")?;
    match healthy {
        Ok(()) => println!("  {} Connected, models available", style("✓").green()),
        Err(e) => println!("  {} {e:#}", style("✗").red()),
    }

    let cache = open_cache(config).await?;
    println!("{}", style("Index:").bold().yellow());
    let report = cache.check_consistency().await?;
    println!("  Stored entries: {}", report.store_entries);
    println!("  Indexed vectors: {}", report.indexed_vectors);
    println!("  {}", report.summary());

    if !report.is_consistent && repair {
        let summary = cache.reindex().await?;
        println!(
            "  {} Rebuilt index with {} vectors",
            style("✓").green(),
            summary.indexed
        );
    } else if !report.is_consistent {
        warn!("Index is inconsistent with the store");
        println!("  Run with --repair to rebuild the index.");
    }
    Ok(())
}

#[inline]
pub async fn list_languages() -> Result<()> {
    let database = open_database(&load_config()?).await?;
    let languages = database.list_languages().await?;

    println!("{}", style(format!("Languages ({} total):", languages.len())).bold());
    for language in languages {
        println!("  {}  {}", style(&language.code).cyan(), language.name);
    }
    Ok(())
}

#[inline]
pub async fn add_profile(user_id: i64, primary: &str, foreign: &str) -> Result<()> {
    let database = open_database(&load_config()?).await?;
    let profile = database
        .create_learning_profile(&NewLearningProfile {
            user_id,
            primary_language: primary.to_string(),
            foreign_language: foreign.to_string(),
        })
        .await?;

    println!(
        "{} Created learning profile {} ({} -> {}) for user {}",
        style("✓").green(),
        profile.id,
        profile.foreign_language,
        profile.primary_language,
        profile.user_id
    );
    Ok(())
}

/// Resolve a word for a profile and add it to the profile's dictionary.
/// Translations are produced in the profile's primary language.
#[inline]
pub async fn add_to_dictionary(
    profile_id: i64,
    lemma: &str,
    language: &str,
    context: &str,
    notes: Option<String>,
) -> Result<()> {
    let cache = open_cache(load_config()?).await?;
    let profile = cache.database().get_learning_profile(profile_id).await?;

    let options = LookupOptions {
        target_language: Some(profile.primary_language.clone()),
        semantic_reuse: None,
    };
    let entry = cache.lookup(lemma, language, context, &options).await?;

    let membership = cache
        .database()
        .add_to_dictionary(&NewMembership {
            learning_profile_id: profile.id,
            entry_id: entry.id,
            notes,
        })
        .await?;

    println!(
        "{} Added {} to dictionary of profile {} (membership {})",
        style("✓").green(),
        style(&entry.key).cyan(),
        profile.id,
        membership.id
    );
    Ok(())
}

#[inline]
pub async fn list_dictionary(profile_id: i64) -> Result<()> {
    let database = open_database(&load_config()?).await?;
    let profile = database.get_learning_profile(profile_id).await?;
    let entries = database.list_dictionary(profile.id).await?;

    if entries.is_empty() {
        println!("Dictionary of profile {} is empty.", profile.id);
        return Ok(());
    }

    println!(
        "{}",
        style(format!(
            "Dictionary of profile {} ({} words):",
            profile.id,
            entries.len()
        ))
        .bold()
    );
    for entry in &entries {
        println!();
        for line in render_entry(entry) {
            println!("{line}");
        }
    }
    Ok(())
}

/// Display lines for one entry.
#[inline]
pub fn render_entry(entry: &Entry) -> Vec<String> {
    let mut lines = vec![format!(
        "{} ({})",
        style(&entry.key.lemma).bold().cyan(),
        entry.key.language
    )];

    if !entry.context_text.is_empty() {
        lines.push(format!("  Context: {}", style(&entry.context_text).dim()));
    }

    let translations: Vec<&str> = entry.translations.iter().map(|t| t.text.as_str()).collect();
    lines.push(format!("  Translations: {}", translations.join(", ")));

    lines.push("  Definitions:".to_string());
    for (number, definition) in entry.definitions.iter().enumerate() {
        lines.push(format!("    {}. {}", number + 1, definition.text));
    }

    if !entry.examples.is_empty() {
        lines.push("  Examples:".to_string());
        for example in &entry.examples {
            lines.push(format!("    - {}", example.text));
        }
    }

    match &entry.embedding {
        Some(embedding) => lines.push(format!(
            "  Embedding: {} ({})",
            embedding.model,
            embedding.updated_at.format("%Y-%m-%d %H:%M:%S")
        )),
        None => lines.push("  Embedding: none".to_string()),
    }

    lines
}

#[inline]
pub fn render_similar(similar: &[SimilarEntry]) -> Vec<String> {
    similar
        .iter()
        .map(|s| {
            let translations: Vec<&str> =
                s.entry.translations.iter().map(|t| t.text.as_str()).collect();
            format!(
                "  {:.3}  {}  {}",
                s.similarity,
                style(&s.entry.key.lemma).cyan(),
                translations.join(", ")
            )
        })
        .collect()
}
