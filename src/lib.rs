pub mod cache;
pub mod chunk;
pub mod cli;
pub mod commands;
pub mod config;
pub mod db;
pub mod derive;
pub mod digest;
pub mod indexer;
pub mod llm;
pub mod model;
pub mod per_channel;
pub mod progress;
pub mod publish;
pub mod report;
pub mod scheduler;
pub mod scoring;
pub mod source;
pub mod summarize;

use std::sync::Arc;

/// Shared state handed to every command.
pub struct Data {
    pub config: config::Config,
    pub db: db::Database,
}

impl Data {
    /// Opens the store and makes sure its schema exists.
    pub fn load(config: config::Config) -> anyhow::Result<Self> {
        let db = db::Database::new(&config)?;
        db.execute_init()?;
        Ok(Self { config, db })
    }

    pub fn discord(&self) -> anyhow::Result<source::DiscordSource> {
        let token = self.config.require_token()?;
        Ok(source::DiscordSource::new(
            token,
            self.config.indexer.page_size,
        ))
    }

    pub fn progress_log(&self) -> progress::ProgressLog {
        let run_id = progress::resolve_run_id(self.config.run_id.as_deref());
        progress::ProgressLog::open(&self.config.progress_log_path, run_id)
    }

    pub fn indexer(&self, source: source::DiscordSource) -> indexer::Indexer {
        indexer::Indexer::new(
            Arc::new(source),
            Arc::new(self.db.clone()),
            self.progress_log(),
            self.config.indexer.clone(),
        )
    }

    pub fn summarizer(&self) -> summarize::Summarizer {
        summarize::Summarizer::new(llm::LlmClient::from_config(&self.config))
    }
}
