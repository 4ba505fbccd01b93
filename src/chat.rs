//! # Text Chat Bridge
//!
//! A support-desk style chat: each user message becomes one stateless
//! request to a text-generation endpoint, with the persona preamble
//! prepended. The remote sees no history; only the local transcript grows.
//!
//! Failures never propagate to the caller. An empty answer and a failed
//! request each become a fixed fallback message in the transcript, and
//! nothing is retried.

use crate::config::ChatConfig;
use crate::genai::{Content, GenerateContentRequest, GenerateContentResponse};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

pub const WELCOME_MESSAGE: &str = "Olá! Sou o assistente virtual do Prosterite. Estou aqui para ajudar com seu tratamento, dúvidas sobre as gotas ou cápsulas, e suporte geral. Como posso ajudar?";
pub const EMPTY_REPLY_FALLBACK: &str = "Desculpe, não entendi.";
pub const CONNECTION_ERROR_MESSAGE: &str = "Erro de conexão.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub role: ChatRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Set on the inline bubble shown when the request failed.
    #[serde(default)]
    pub is_error: bool,
}

impl ChatMessage {
    fn new(role: ChatRole, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            text: text.into(),
            timestamp: Utc::now(),
            is_error: false,
        }
    }

    fn error(text: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::new(ChatRole::Model, text)
        }
    }
}

/// One prompt in, at most one text answer out.
pub trait TextGenerator: Send + Sync {
    /// `Ok(None)` means the remote answered without any text.
    fn generate<'a>(&'a self, model: &'a str, prompt: &'a str) -> BoxFuture<'a, Result<Option<String>>>;
}

/// `generateContent` over HTTPS.
pub struct GeminiTextClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl GeminiTextClient {
    pub fn new(config: &ChatConfig, api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn url(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, model)
    }

    async fn request(&self, model: &str, prompt: &str) -> Result<Option<String>> {
        let body = GenerateContentRequest {
            contents: vec![Content::user_text(prompt)],
        };
        let response = self
            .http
            .post(self.url(model))
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .context("sending generateContent request")?
            .error_for_status()
            .context("generateContent rejected the request")?;
        let parsed: GenerateContentResponse = response
            .json()
            .await
            .context("decoding generateContent response")?;
        Ok(parsed.text())
    }
}

impl TextGenerator for GeminiTextClient {
    fn generate<'a>(&'a self, model: &'a str, prompt: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(self.request(model, prompt))
    }
}

pub struct ChatSession<G> {
    generator: G,
    model: String,
    persona: String,
    messages: Vec<ChatMessage>,
}

impl<G: TextGenerator> ChatSession<G> {
    pub fn new(generator: G, config: &ChatConfig) -> Self {
        Self {
            generator,
            model: config.model.clone(),
            persona: config.persona.clone(),
            messages: vec![ChatMessage::new(ChatRole::Model, WELCOME_MESSAGE)],
        }
    }

    /// Persona preamble followed by the quoted user text.
    pub fn build_prompt(&self, user_text: &str) -> String {
        format!("{} O usuário disse: \"{}\"", self.persona, user_text)
    }

    /// Send one user message and append the reply. Blank input is ignored
    /// and returns `None`; otherwise returns the appended reply.
    pub async fn send(&mut self, text: &str) -> Option<&ChatMessage> {
        if text.trim().is_empty() {
            return None;
        }
        self.messages.push(ChatMessage::new(ChatRole::User, text));
        let prompt = self.build_prompt(text);

        let reply = match self.generator.generate(&self.model, &prompt).await {
            Ok(Some(answer)) if !answer.is_empty() => ChatMessage::new(ChatRole::Model, answer),
            Ok(_) => {
                debug!("Chat model returned no text");
                ChatMessage::new(ChatRole::Model, EMPTY_REPLY_FALLBACK)
            }
            Err(e) => {
                warn!("Chat request failed: {:#}", e);
                ChatMessage::error(CONNECTION_ERROR_MESSAGE)
            }
        };
        self.messages.push(reply);
        self.messages.last()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use std::sync::Mutex;

    /// Replays canned answers and records the prompts it saw.
    struct CannedGenerator {
        answers: Mutex<Vec<Result<Option<String>>>>,
        prompts: Mutex<Vec<(String, String)>>,
    }

    impl CannedGenerator {
        fn new(answers: Vec<Result<Option<String>>>) -> Self {
            Self {
                answers: Mutex::new(answers),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    impl TextGenerator for &CannedGenerator {
        fn generate<'a>(&'a self, model: &'a str, prompt: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
            self.prompts
                .lock()
                .unwrap()
                .push((model.to_string(), prompt.to_string()));
            let answer = self.answers.lock().unwrap().remove(0);
            Box::pin(async move { answer })
        }
    }

    #[tokio::test]
    async fn test_transcript_starts_with_welcome() {
        let generator = CannedGenerator::new(vec![]);
        let session = ChatSession::new(&generator, &AppConfig::default().chat);
        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.messages()[0].role, ChatRole::Model);
        assert_eq!(session.messages()[0].text, WELCOME_MESSAGE);
    }

    #[tokio::test]
    async fn test_reply_is_appended_after_user_message() {
        let generator = CannedGenerator::new(vec![Ok(Some("Claro! 😊".to_string()))]);
        let config = AppConfig::default().chat;
        let mut session = ChatSession::new(&generator, &config);

        let reply = session.send("Onde compro?").await.unwrap();
        assert_eq!(reply.text, "Claro! 😊");
        assert!(!reply.is_error);

        let messages = session.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].role, ChatRole::User);
        assert_eq!(messages[1].text, "Onde compro?");

        let prompts = generator.prompts.lock().unwrap();
        assert_eq!(prompts[0].0, config.model);
        assert!(prompts[0].1.starts_with(&config.persona));
        assert!(prompts[0].1.ends_with(" O usuário disse: \"Onde compro?\""));
    }

    #[tokio::test]
    async fn test_blank_input_is_ignored() {
        let generator = CannedGenerator::new(vec![]);
        let mut session = ChatSession::new(&generator, &AppConfig::default().chat);
        assert!(session.send("   ").await.is_none());
        assert_eq!(session.messages().len(), 1);
        assert!(generator.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_answer_falls_back() {
        let generator = CannedGenerator::new(vec![Ok(None), Ok(Some(String::new()))]);
        let mut session = ChatSession::new(&generator, &AppConfig::default().chat);

        assert_eq!(session.send("oi").await.unwrap().text, EMPTY_REPLY_FALLBACK);
        assert_eq!(session.send("oi?").await.unwrap().text, EMPTY_REPLY_FALLBACK);
    }

    #[tokio::test]
    async fn test_failure_becomes_error_bubble() {
        let generator = CannedGenerator::new(vec![Err(anyhow::anyhow!("timeout"))]);
        let mut session = ChatSession::new(&generator, &AppConfig::default().chat);

        let reply = session.send("oi").await.unwrap();
        assert_eq!(reply.text, CONNECTION_ERROR_MESSAGE);
        assert!(reply.is_error);
        assert_eq!(session.messages().len(), 3);
    }

    #[test]
    fn test_client_url() {
        let mut config = AppConfig::default().chat;
        config.endpoint = "https://example.test/v1beta/".to_string();
        let client = GeminiTextClient::new(&config, "k").unwrap();
        assert_eq!(
            client.url("gemini-3-flash-preview"),
            "https://example.test/v1beta/models/gemini-3-flash-preview:generateContent"
        );
    }
}
