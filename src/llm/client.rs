use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use std::time::Duration;

use crate::config::Config;

/// OpenAI-compatible chat endpoint used for digest summaries.
pub struct LlmClient {
    chat_client: Client<OpenAIConfig>,
    chat_model: String,
    timeout: Duration,
}

impl LlmClient {
    /// `None` when no `LLM_URL` is configured.
    pub fn from_config(config: &Config) -> Option<Self> {
        let url = config.llm_url.as_deref()?;
        let mut chat_config = OpenAIConfig::new().with_api_base(url);

        if let Some(key) = &config.llm_api_key {
            chat_config = chat_config.with_api_key(key);
        } else {
            chat_config = chat_config.with_api_key("unused");
        }

        Some(Self {
            chat_client: Client::with_config(chat_config),
            chat_model: config.llm_model.clone(),
            timeout: Duration::from_secs(config.llm_timeout_secs),
        })
    }

    pub fn model(&self) -> &str {
        &self.chat_model
    }

    pub async fn chat(&self, messages: Vec<ChatCompletionRequestMessage>) -> anyhow::Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.chat_model)
            .messages(messages)
            .temperature(0.2)
            .build()?;

        let response = tokio::time::timeout(self.timeout, self.chat_client.chat().create(request))
            .await
            .map_err(|_| anyhow::anyhow!("LLM request timed out after {:?}", self.timeout))??;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default();

        Ok(content)
    }

    pub async fn completion(&self, system: &str, prompt: &str) -> anyhow::Result<String> {
        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system)
                .build()?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt)
                .build()?
                .into(),
        ];
        self.chat(messages).await
    }
}
