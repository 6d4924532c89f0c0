use clap::{Parser, Subcommand};
use vocab_cache::Result;
use vocab_cache::commands::{
    ConfigUpdate, add_profile, add_to_dictionary, check, configure, list_dictionary,
    list_languages, lookup_word, reindex, similar_words,
};

#[derive(Parser)]
#[command(name = "vocab-cache")]
#[command(about = "A semantic vocabulary cache that reuses dictionary entries for similar words")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or change the configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
        /// Ollama host
        #[arg(long)]
        host: Option<String>,
        /// Ollama port
        #[arg(long)]
        port: Option<u16>,
        /// Model used for embeddings
        #[arg(long)]
        embedding_model: Option<String>,
        /// Model used to generate dictionary entries
        #[arg(long)]
        generation_model: Option<String>,
        /// Dimension of the embedding model's vectors
        #[arg(long)]
        embedding_dimension: Option<u32>,
        /// Minimum similarity for reusing an existing entry
        #[arg(long)]
        similarity_threshold: Option<f32>,
        /// Refresh embeddings older than this many days
        #[arg(long)]
        max_age_days: Option<u32>,
    },
    /// Look up a word, generating an entry if nothing suitable is cached
    Lookup {
        lemma: String,
        /// Language of the word, e.g. "en"
        #[arg(long, short)]
        language: String,
        /// Sentence the word was seen in
        #[arg(long, default_value = "")]
        context: String,
        /// Language to translate into
        #[arg(long)]
        target: Option<String>,
    },
    /// List cached entries related to a word
    Similar {
        lemma: String,
        #[arg(long, short)]
        language: String,
        #[arg(long, default_value = "")]
        context: String,
        #[arg(long, default_value_t = 10)]
        top_k: usize,
        /// Only search this learning profile's dictionary
        #[arg(long)]
        profile: Option<i64>,
    },
    /// Rebuild the vector index from the store
    Reindex,
    /// Check Ollama and index consistency
    Check {
        /// Rebuild the index if it has drifted from the store
        #[arg(long)]
        repair: bool,
    },
    /// List known languages
    Languages,
    /// Manage learning profiles
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },
    /// Manage a learning profile's dictionary
    Dictionary {
        #[command(subcommand)]
        command: DictionaryCommands,
    },
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// Create a learning profile
    Add {
        #[arg(long)]
        user: i64,
        /// Language the learner already speaks
        #[arg(long)]
        primary: String,
        /// Language being learned
        #[arg(long)]
        foreign: String,
    },
}

#[derive(Subcommand)]
enum DictionaryCommands {
    /// Look up a word and add it to a profile's dictionary
    Add {
        #[arg(long)]
        profile: i64,
        #[arg(long)]
        lemma: String,
        #[arg(long, short)]
        language: String,
        #[arg(long, default_value = "")]
        context: String,
        #[arg(long)]
        notes: Option<String>,
    },
    /// List a profile's dictionary
    List {
        #[arg(long)]
        profile: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config {
            show,
            host,
            port,
            embedding_model,
            generation_model,
            embedding_dimension,
            similarity_threshold,
            max_age_days,
        } => {
            let update = ConfigUpdate {
                host,
                port,
                embedding_model,
                generation_model,
                embedding_dimension,
                similarity_threshold,
                max_embedding_age_days: max_age_days,
            };
            configure(update, show)?;
        }
        Commands::Lookup {
            lemma,
            language,
            context,
            target,
        } => {
            lookup_word(&lemma, &language, &context, target).await?;
        }
        Commands::Similar {
            lemma,
            language,
            context,
            top_k,
            profile,
        } => {
            similar_words(&lemma, &language, &context, top_k, profile).await?;
        }
        Commands::Reindex => {
            reindex().await?;
        }
        Commands::Check { repair } => {
            check(repair).await?;
        }
        Commands::Languages => {
            list_languages().await?;
        }
        Commands::Profile {
            command:
                ProfileCommands::Add {
                    user,
                    primary,
                    foreign,
                },
        } => {
            add_profile(user, &primary, &foreign).await?;
        }
        Commands::Dictionary { command } => match command {
            DictionaryCommands::Add {
                profile,
                lemma,
                language,
                context,
                notes,
            } => {
                add_to_dictionary(profile, &lemma, &language, &context, notes).await?;
            }
            DictionaryCommands::List { profile } => {
                list_dictionary(profile).await?;
            }
        },
    }

    Ok(())
}
