use std::{path::Path, sync::LazyLock, time::Duration};

use async_trait::async_trait;
use indoc::formatdoc;
use minijinja::{context, Environment};
use regex::Regex;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use url::Url;

use crate::{
    email::Item, rate_limiters::RateLimiters, server_config::ClassifierConfig, HttpClient,
};

use super::classifier::{Classification, Classifier, ClassifierError, Decision};

static RE_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""label"\s*:\s*"([^"]*)""#).unwrap());
static RE_NOTIFY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""notify"\s*:\s*"?(true|false)"?"#).unwrap());
static RE_REASON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""reason"\s*:\s*"([^"]*)""#).unwrap());

fn system_prompt() -> String {
    formatdoc! {r#"
        You are an assistant that triages incoming email.
        Follow the instructions in the user message to decide on a short label for the email and whether its recipient should be notified by text message right away.
        You will only respond with a JSON object with the keys label, notify and reason. label is a string, notify is a boolean and reason is one short sentence. Do not provide any other text."#}
}

/// Chat-completion classifier for Mistral/OpenAI style endpoints.
pub struct MistralClassifier {
    http_client: HttpClient,
    endpoint: Url,
    api_key: String,
    model: String,
    temperature: f64,
    rate_limiters: RateLimiters,
}

impl MistralClassifier {
    pub fn new(
        http_client: HttpClient,
        config: &ClassifierConfig,
        rate_limiters: RateLimiters,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            http_client,
            endpoint: Url::parse(&config.endpoint)?,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            rate_limiters,
        })
    }

    async fn send_prompt(
        &self,
        prompt: String,
        timeout: Duration,
    ) -> Result<ChatApiResponse, ClassifierError> {
        let resp = self
            .http_client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .timeout(timeout)
            .json(&json!(
              {
                "model": &self.model,
                "temperature": self.temperature,
                "messages": [
                  {
                    "role": "system",
                    "content": system_prompt()
                  },
                  {
                    "role": "user",
                    "content": prompt
                  }
                ],
                "response_format": { "type": "json_object" }
              }
            ))
            .send()
            .await
            .map_err(|e| map_transport_error(e, timeout))?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            self.rate_limiters.trigger_backoff();
        }

        let body = resp
            .json::<serde_json::Value>()
            .await
            .map_err(|e| map_transport_error(e, timeout))?;

        let parsed = serde_json::from_value::<ChatApiResponseOrError>(body.clone())
            .map_err(|_| ClassifierError::MalformedResponse(body.to_string()))?;

        match parsed {
            ChatApiResponseOrError::Response(parsed) if status.is_success() => Ok(parsed),
            ChatApiResponseOrError::Response(_) => {
                Err(ClassifierError::Api(format!("{status}: {body}")))
            }
            ChatApiResponseOrError::Error(error) => {
                if error.message.to_lowercase().contains("rate limit") {
                    self.rate_limiters.trigger_backoff();
                }
                Err(ClassifierError::Api(error.message))
            }
        }
    }
}

#[async_trait]
impl Classifier for MistralClassifier {
    async fn ready(&self) {
        self.rate_limiters.acquire_one().await;
        tracing::debug!("Rate limiters: {}", self.rate_limiters.get_status());
    }

    async fn classify(
        &self,
        item: &Item,
        prompt_path: &Path,
        timeout: Duration,
    ) -> Result<Classification, ClassifierError> {
        let template = tokio::fs::read_to_string(prompt_path).await.map_err(|e| {
            ClassifierError::Prompt(format!("{}: {e}", prompt_path.display()))
        })?;
        let prompt = render_prompt(&template, item)?;

        let parsed = self.send_prompt(prompt, timeout).await?;

        let choice = parsed
            .choices
            .first()
            .ok_or_else(|| ClassifierError::MalformedResponse("no choices".to_string()))?;
        let decision = parse_decision(&choice.message.content)?;

        tracing::debug!(
            "Classified {} as {} (notify: {}, tokens: {})",
            item.id,
            decision.label,
            decision.notify,
            parsed.usage.total_tokens
        );

        Ok(Classification {
            decision,
            tokens: parsed.usage.total_tokens,
        })
    }
}

fn map_transport_error(e: reqwest::Error, timeout: Duration) -> ClassifierError {
    if e.is_timeout() {
        ClassifierError::Timeout(timeout)
    } else {
        ClassifierError::Transport(e)
    }
}

pub fn render_prompt(template: &str, item: &Item) -> Result<String, ClassifierError> {
    let msg = &item.message;
    Environment::new()
        .render_str(
            template,
            context! {
                id => &item.id,
                from => msg.from.as_deref().unwrap_or_default(),
                subject => msg.subject.as_deref().unwrap_or_default(),
                body => msg.body.as_deref().unwrap_or_default(),
            },
        )
        .map_err(|e| ClassifierError::Prompt(e.to_string()))
}

/// Reads the model's answer, tolerating answers that are almost JSON.
pub fn parse_decision(content: &str) -> Result<Decision, ClassifierError> {
    if let Ok(decision) = serde_json::from_str::<Decision>(content) {
        if !decision.label.trim().is_empty() {
            return Ok(decision);
        }
    }

    tracing::debug!("Could not parse JSON response, parsing manually...");
    let label = RE_LABEL
        .captures(content)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|label| !label.is_empty())
        .ok_or_else(|| ClassifierError::MalformedResponse(content.to_string()))?;
    let notify = RE_NOTIFY
        .captures(content)
        .and_then(|caps| caps.get(1))
        .is_some_and(|m| m.as_str() == "true");
    let reason = RE_REASON
        .captures(content)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string());

    Ok(Decision {
        label,
        notify,
        reason,
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PromptUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: i32,
    pub message: ChatMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatApiResponse {
    pub choices: Vec<ChatChoice>,
    pub usage: PromptUsage,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatApiError {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatApiResponseOrError {
    Response(ChatApiResponse),
    Error(ChatApiError),
}

#[cfg(test)]
mod tests {
    use axum::{http::StatusCode as AxumStatus, routing::post, Json, Router};
    use serde_json::Value;

    use super::*;
    use crate::email::SimplifiedMessage;

    fn item() -> Item {
        Item {
            id: "m1".to_string(),
            received_at: 0,
            message: SimplifiedMessage {
                from: Some("boss@example.com".to_string()),
                subject: Some("Server down".to_string()),
                body: Some("Production is on fire".to_string()),
            },
        }
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/v1/chat/completions")
    }

    fn classifier(endpoint: String) -> (MistralClassifier, RateLimiters) {
        let config = ClassifierConfig {
            endpoint,
            api_key: "test-key".to_string(),
            ..Default::default()
        };
        let limiters = RateLimiters::new(100, 1_000, 100);
        let classifier =
            MistralClassifier::new(HttpClient::new(), &config, limiters.clone()).unwrap();
        (classifier, limiters)
    }

    #[test]
    fn test_parse_strict_json() {
        let decision =
            parse_decision(r#"{"label": "urgent", "notify": true, "reason": "outage"}"#).unwrap();

        assert_eq!(
            decision,
            Decision {
                label: "urgent".to_string(),
                notify: true,
                reason: Some("outage".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_loose_json() {
        let content = "Sure! {\"label\": \"newsletter\", \"notify\": \"false\", \"reason\": \"weekly digest\",}";
        let decision = parse_decision(content).unwrap();

        assert_eq!(decision.label, "newsletter");
        assert!(!decision.notify);
        assert_eq!(decision.reason.as_deref(), Some("weekly digest"));
    }

    #[test]
    fn test_parse_without_label_is_malformed() {
        assert!(matches!(
            parse_decision(r#"{"notify": true}"#),
            Err(ClassifierError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_decision("I cannot help with that"),
            Err(ClassifierError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_render_prompt() {
        let rendered = render_prompt(
            "From {{ from }} about {{ subject }}: {{ body }}",
            &item(),
        )
        .unwrap();

        assert_eq!(
            rendered,
            "From boss@example.com about Server down: Production is on fire"
        );
    }

    #[test]
    fn test_render_prompt_rejects_bad_template() {
        assert!(matches!(
            render_prompt("{{ from ", &item()),
            Err(ClassifierError::Prompt(_))
        ));
    }

    #[tokio::test]
    async fn test_classify_reads_choice_and_usage() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|Json(req): Json<Value>| async move {
                let user_prompt = req["messages"][1]["content"].as_str().unwrap_or_default();
                let label = if user_prompt.contains("Server down") {
                    "urgent"
                } else {
                    "other"
                };
                Json(json!({
                    "choices": [{
                        "index": 0,
                        "message": {
                            "role": "assistant",
                            "content": format!(r#"{{"label": "{label}", "notify": true, "reason": "outage"}}"#)
                        },
                        "finish_reason": "stop"
                    }],
                    "usage": { "prompt_tokens": 90, "completion_tokens": 30, "total_tokens": 120 }
                }))
            }),
        );
        let (classifier, _) = classifier(serve(router).await);

        let dir = tempfile::tempdir().unwrap();
        let prompt_path = dir.path().join("prompt.txt");
        std::fs::write(&prompt_path, "Subject: {{ subject }}").unwrap();

        let classification = classifier
            .classify(&item(), &prompt_path, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(classification.decision.label, "urgent");
        assert!(classification.decision.notify);
        assert_eq!(classification.tokens, 120);
    }

    #[tokio::test]
    async fn test_rate_limit_error_triggers_backoff() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                (
                    AxumStatus::TOO_MANY_REQUESTS,
                    Json(json!({ "message": "Requests rate limit exceeded" })),
                )
            }),
        );
        let (classifier, limiters) = classifier(serve(router).await);

        let dir = tempfile::tempdir().unwrap();
        let prompt_path = dir.path().join("prompt.txt");
        std::fs::write(&prompt_path, "{{ body }}").unwrap();

        let result = classifier
            .classify(&item(), &prompt_path, Duration::from_secs(5))
            .await;

        assert!(matches!(result, Err(ClassifierError::Api(_))));
        assert!(limiters.in_backoff());
    }

    #[tokio::test]
    async fn test_missing_prompt_file() {
        let (classifier, _) = classifier("http://127.0.0.1:9/v1/chat/completions".to_string());

        let result = classifier
            .classify(
                &item(),
                Path::new("/nonexistent/prompt.txt"),
                Duration::from_secs(1),
            )
            .await;

        assert!(matches!(result, Err(ClassifierError::Prompt(_))));
    }
}
