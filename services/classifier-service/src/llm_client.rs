use models::{
    ClassifyRequest, Classification, ImportanceDistribution, KeyPointItem, KeyPointSet,
    INTERNAL_COMMUNICATIONS, NEWS, PROMOTIONAL, ROUTINE_WORK_UPDATES, URGENT_WORK_INFORMATION,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct LlmClient {
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    temperature: f32,
}

#[derive(Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

impl LlmClient {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
        }
    }

    /// Implements the `classify` contract of §4.F. Falls back to a
    /// regex-based heuristic classifier when no API key is configured or
    /// the LLM's response fails schema validation — the same
    /// degrade-gracefully posture the original task-extraction fallback
    /// took, adapted to this domain's required output shape.
    pub async fn classify(&self, request: &ClassifyRequest) -> Classification {
        if let Some(api_key) = &self.api_key {
            match self.classify_with_openai(request, api_key).await {
                Ok(classification) => return classification,
                Err(e) => {
                    warn!("OpenAI classification failed ({e}), using fallback heuristic");
                }
            }
        } else {
            warn!("No OPENAI_API_KEY configured, using fallback heuristic classifier");
        }
        self.fallback_classify(request)
    }

    async fn classify_with_openai(
        &self,
        request: &ClassifyRequest,
        api_key: &str,
    ) -> Result<Classification, Box<dyn std::error::Error + Send + Sync>> {
        let system_prompt = build_system_prompt(request);

        let openai_request = OpenAiRequest {
            model: "gpt-4o-mini".to_string(),
            messages: vec![
                OpenAiMessage {
                    role: "system".to_string(),
                    content: system_prompt,
                },
                OpenAiMessage {
                    role: "user".to_string(),
                    content: format!("Subject: {}\n\nBody:\n{}", request.subject, request.body_text),
                },
            ],
            temperature: 0.2,
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&openai_request)
            .send()
            .await?;

        if !response.status().is_success() {
            error!("OpenAI API error: {}", response.status());
            return Err(format!("openai returned {}", response.status()).into());
        }

        let parsed: OpenAiResponse = response.json().await?;
        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or("no choices in openai response")?;

        let classification: Classification = serde_json::from_str(&content)?;
        info!("Successfully parsed OpenAI classification response");
        Ok(validate_topic(classification, &request.candidate_categories))
    }

    fn fallback_classify(&self, request: &ClassifyRequest) -> Classification {
        let haystack = format!("{} {}", request.subject, request.body_text).to_lowercase();

        let distribution = fallback_distribution(&haystack);
        let topic = fallback_topic(&haystack, &request.candidate_categories);
        let short_summary = fallback_summary(&request.subject, &request.body_text);

        let keypoints = if request.is_reply {
            KeyPointSet::Grouped(vec![])
        } else {
            KeyPointSet::Flat(fallback_keypoints(&request.subject, &haystack))
        };

        Classification {
            topic,
            importance_distribution: distribution,
            suggested_answer: String::new(),
            bullet_summary: vec![short_summary.clone()],
            short_summary,
            relevance: "unknown".to_string(),
            keypoints,
        }
    }
}

fn build_system_prompt(request: &ClassifyRequest) -> String {
    let categories = request.candidate_categories.join(", ");
    let description = request.user_description.as_deref().unwrap_or("");
    format!(
        r#"You are an email classification agent. Given an email's subject and body, return strict JSON matching this shape:
{{
  "topic": "one of [{categories}] or \"default\"",
  "importance_distribution": {{"UrgentWorkInformation":0-100,"RoutineWorkUpdates":0-100,"InternalCommunications":0-100,"Promotional":0-100,"News":0-100}},
  "suggested_answer": "string",
  "bullet_summary": ["string", ...],
  "short_summary": "single sentence",
  "relevance": "string",
  "keypoints": [{{"category":"","organization":"","topic":"","content":""}}, ...]
}}
Language: {}. Reply context: {}. User hint: {description}"#,
        request.language, request.is_reply
    )
}

/// Enforces the §4.F invariant that `topic` must be drawn from
/// `candidate_categories`, falling back to `"default"` otherwise — the
/// LLM is free-text and can't be trusted to honor this on its own.
fn validate_topic(mut classification: Classification, candidates: &[String]) -> Classification {
    if !candidates.iter().any(|c| c == &classification.topic) {
        classification.topic = "default".to_string();
    }
    classification
}

fn fallback_distribution(haystack: &str) -> ImportanceDistribution {
    let mut dist = ImportanceDistribution::new();
    let urgent = contains_any(haystack, &["urgent", "asap", "immediately", "action required"]);
    let promo = contains_any(haystack, &["% off", "sale", "unsubscribe", "limited time"]);
    let news = contains_any(haystack, &["newsletter", "digest", "roundup"]);
    let internal = contains_any(haystack, &["standup", "sync", "fyi", "reminder"]);

    dist.insert(URGENT_WORK_INFORMATION.to_string(), if urgent { 70 } else { 0 });
    dist.insert(PROMOTIONAL.to_string(), if promo { 60 } else { 0 });
    dist.insert(NEWS.to_string(), if news { 55 } else { 0 });
    dist.insert(
        INTERNAL_COMMUNICATIONS.to_string(),
        if internal { 50 } else { 0 },
    );
    dist.insert(
        ROUTINE_WORK_UPDATES.to_string(),
        if !urgent && !promo && !news && !internal { 40 } else { 0 },
    );
    dist
}

fn fallback_topic(haystack: &str, candidates: &[String]) -> String {
    candidates
        .iter()
        .find(|c| haystack.contains(c.to_lowercase().as_str()))
        .cloned()
        .unwrap_or_else(|| "default".to_string())
}

fn fallback_summary(subject: &str, body: &str) -> String {
    let first_sentence = body
        .split(['.', '\n'])
        .map(str::trim)
        .find(|s| !s.is_empty());
    match first_sentence {
        Some(sentence) if !sentence.is_empty() => sentence.to_string(),
        _ => subject.to_string(),
    }
}

fn fallback_keypoints(subject: &str, haystack: &str) -> Vec<KeyPointItem> {
    static ACTION_PATTERN: &str = r"(?i)\b(please|could you|can you|need you to)\s+(.+?)(?:\.|$)";
    let re = Regex::new(ACTION_PATTERN).expect("action pattern is valid");
    let mut points: Vec<KeyPointItem> = re
        .captures_iter(haystack)
        .filter_map(|cap| cap.get(2))
        .map(|m| KeyPointItem {
            category: "action".to_string(),
            organization: String::new(),
            topic: subject.to_string(),
            content: m.as_str().trim().to_string(),
        })
        .collect();

    if points.is_empty() {
        points.push(KeyPointItem {
            category: "summary".to_string(),
            organization: String::new(),
            topic: subject.to_string(),
            content: subject.to_string(),
        });
    }
    points
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_topic_keeps_known_category() {
        let mut classification = base_classification();
        classification.topic = "billing".to_string();
        let result = validate_topic(classification, &["billing".to_string(), "support".to_string()]);
        assert_eq!(result.topic, "billing");
    }

    #[test]
    fn validate_topic_falls_back_to_default() {
        let mut classification = base_classification();
        classification.topic = "made_up_category".to_string();
        let result = validate_topic(classification, &["billing".to_string()]);
        assert_eq!(result.topic, "default");
    }

    #[test]
    fn fallback_distribution_flags_urgent_language() {
        let dist = fallback_distribution("please respond asap, this is urgent");
        assert_eq!(dist.get(URGENT_WORK_INFORMATION), Some(&70));
    }

    fn base_classification() -> Classification {
        Classification {
            topic: String::new(),
            importance_distribution: ImportanceDistribution::new(),
            suggested_answer: String::new(),
            bullet_summary: vec![],
            short_summary: String::new(),
            relevance: String::new(),
            keypoints: KeyPointSet::Flat(vec![]),
        }
    }
}
