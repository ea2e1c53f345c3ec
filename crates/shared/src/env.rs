use std::env;
use std::str::FromStr;
use std::sync::LazyLock;

fn required_env(key: &str) -> String {
  env::var(key).expect(&format!("env {key} must be set"))
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
  env::var(key)
    .ok()
    .and_then(|v| v.parse().ok())
    .unwrap_or(default)
}

pub struct AppEnv {
  pub database_url: String,
  pub openai_base_url: String,
  pub openai_api_key: String,

  /// Model used for entity/relationship extraction and resolution tiebreaks.
  pub extraction_model: String,
  pub embedding_model: String,
  /// Skip embedding maintenance entirely (useful for offline replays).
  pub skip_embeddings: bool,
  /// Pass-through reasoning effort hint for the extraction model.
  pub thinking_level: Option<String>,

  pub worker_count: usize,

  // LLM traffic shaping
  pub start_rpm: u32,
  pub max_rpm: u32,
  pub slow_start_until_rpm: u32,
  pub embedding_batch_size: usize,
  pub embedding_flush_ms: u64,

  // Merge engine thresholds
  pub merge_soft_threshold: f64,
  pub merge_auto_hard_confidence: f64,
  pub merge_auto_compound_confidence: f64,
}

impl AppEnv {
  fn new() -> Self {
    dotenvy::dotenv().ok();

    Self {
      database_url: required_env("DATABASE_URL"),
      openai_base_url: required_env("OPENAI_BASE_URL"),
      openai_api_key: required_env("OPENAI_API_KEY"),

      extraction_model: env_or("CORTEX_EXTRACTION_MODEL", "gpt-4o-mini".to_owned()),
      embedding_model: env_or("CORTEX_EMBEDDING_MODEL", "text-embedding-3-small".to_owned()),
      skip_embeddings: env_or("CORTEX_SKIP_EMBEDDINGS", false),
      thinking_level: env::var("CORTEX_THINKING_LEVEL").ok(),

      worker_count: env_or("CORTEX_WORKER_COUNT", 4),

      start_rpm: env_or("CORTEX_START_RPM", 60),
      max_rpm: env_or("CORTEX_MAX_RPM", 300),
      slow_start_until_rpm: env_or("CORTEX_SLOW_START_UNTIL_RPM", 120),
      embedding_batch_size: env_or("CORTEX_EMBEDDING_BATCH_SIZE", 100),
      embedding_flush_ms: env_or("CORTEX_EMBEDDING_FLUSH_MS", 500),

      merge_soft_threshold: env_or("CORTEX_MERGE_SOFT_THRESHOLD", 0.60),
      merge_auto_hard_confidence: env_or("CORTEX_MERGE_AUTO_HARD_CONFIDENCE", 0.95),
      merge_auto_compound_confidence: env_or("CORTEX_MERGE_AUTO_COMPOUND_CONFIDENCE", 0.90),
    }
  }
}

pub static APP_ENV: LazyLock<AppEnv> = LazyLock::new(AppEnv::new);
