// TOML configuration: Ollama connection and cache policy

pub mod settings;


use anyhow::Result;
use console::style;

pub use settings::{CONFIG_DIR_ENV, CacheConfig, Config, ConfigError, OllamaConfig};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::config_dir()
}

/// Human-readable summary of the effective configuration.
#[inline]
pub fn render_config(config: &Config) -> Vec<String> {
    let ollama = &config.ollama;
    let cache = &config.cache;

    let url = match config.ollama_url() {
        Ok(url) => style(url.to_string()).cyan().to_string(),
        Err(e) => format!("{} ({})", style("Invalid").red(), e),
    };
    let max_age = cache
        .max_embedding_age_days
        .map_or_else(|| "never".to_string(), |days| format!("{days} days"));

    vec![
        style("Ollama Settings:").bold().yellow().to_string(),
        format!("  Ollama URL: {url}"),
        format!("  Embedding Model: {}", style(&ollama.embedding_model).cyan()),
        format!("  Embedding Dimension: {}", style(ollama.embedding_dimension).cyan()),
        format!("  Generation Model: {}", style(&ollama.generation_model).cyan()),
        format!("  Temperature: {}", style(ollama.temperature).cyan()),
        format!("  Batch Size: {}", style(ollama.batch_size).cyan()),
        String::new(),
        style("Cache Settings:").bold().yellow().to_string(),
        format!("  Similarity Threshold: {}", style(cache.similarity_threshold).cyan()),
        format!("  Related Threshold: {}", style(cache.related_threshold).cyan()),
        format!("  Neighbours Considered: {}", style(cache.neighbor_top_k).cyan()),
        format!("  Embedding Expiry: {}", style(max_age).cyan()),
        format!("  Semantic Reuse: {}", style(cache.semantic_reuse).cyan()),
        format!("  Embed Children: {}", style(cache.embed_children).cyan()),
        format!(
            "  Timeouts: generation {}s, embedding {}s",
            cache.generation_timeout_secs, cache.embedding_timeout_secs
        ),
        format!(
            "  Default Target Language: {}",
            style(&cache.default_target_language).cyan()
        ),
    ]
}

#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    for line in render_config(config) {
        eprintln!("{line}");
    }

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}
