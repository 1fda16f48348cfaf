//! Domain types shared across the ingestion core: the canonical data model
//! (§3) and the DTOs services exchange over HTTP.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use chrono;
pub use serde;
pub use uuid;

/// Which third-party mailbox provider a `SocialApi` record talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Google,
    Microsoft,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Google => write!(f, "google"),
            ProviderKind::Microsoft => write!(f, "microsoft"),
        }
    }
}

/// A linked provider account for a user. `refresh_token` is ciphertext once
/// persisted by the credential store; in transit from a provider client it
/// is plaintext and MUST NOT be logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocialApi {
    pub id: Uuid,
    pub user_id: Uuid,
    pub email: String,
    pub provider: ProviderKind,
    pub access_token: String,
    pub refresh_token: String,
    pub user_description: Option<String>,
    /// Flipped to false when a refresh attempt returns `invalid_grant`;
    /// in-flight workers check this and exit rather than keep retrying.
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A live push subscription with a provider. The two variants carry
/// different watermarks because Google and Microsoft model "what's new"
/// in incompatible ways (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum ProviderSubscription {
    Google {
        id: Uuid,
        social_api_id: Uuid,
        /// Gmail's `historyId` watermark, as a decimal string (Gmail's own
        /// representation; it does not comfortably fit i64 forever).
        history_id: String,
        last_modified: DateTime<Utc>,
    },
    Microsoft {
        id: Uuid,
        subscription_id: String,
        user_id: Uuid,
        email: String,
        expires_at: DateTime<Utc>,
        /// Set when a `reauthorizationRequired` lifecycle event arrived and
        /// the sweeper hasn't yet reauthorized it.
        reauthorization_pending: bool,
    },
}

impl ProviderSubscription {
    pub fn id(&self) -> Uuid {
        match self {
            ProviderSubscription::Google { id, .. } => *id,
            ProviderSubscription::Microsoft { id, .. } => *id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sender {
    pub id: Uuid,
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub description: String,
}

impl Category {
    pub const DEFAULT_NAME: &'static str = "default";
}

/// Priority as assigned to an Email, either by the Rule Engine (override)
/// or derived from the Classifier's importance distribution (§4.F).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Important,
    Information,
    Useless,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Priority::Important => "important",
            Priority::Information => "information",
            Priority::Useless => "useless",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: Uuid,
    pub user_id: Uuid,
    pub sender_id: Uuid,
    pub block: bool,
    pub category_id: Option<Uuid>,
    pub priority_override: Option<Priority>,
}

/// The canonical ingested record (§3). `date` is the message's own sent
/// time, not the ingestion time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Email {
    pub id: Uuid,
    pub social_api_id: Uuid,
    pub provider_id: String,
    pub provider: ProviderKind,
    pub subject: String,
    pub content: String,
    pub short_summary: String,
    pub priority: Priority,
    pub read: bool,
    pub answer_later: bool,
    pub sender_id: Uuid,
    pub category_id: Uuid,
    pub user_id: Uuid,
    pub date: DateTime<Utc>,
    pub has_attachments: bool,
    pub web_link: String,
    pub suggested_answer: String,
    pub relevance: String,
}

/// One extracted key point. For a non-reply email these form a flat set
/// (`position = None`); for a reply they're grouped by `position`, one
/// group per conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPoint {
    pub id: Uuid,
    pub email_id: Uuid,
    pub is_reply: bool,
    pub position: Option<i32>,
    pub category: String,
    pub organization: String,
    pub topic: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulletPoint {
    pub id: Uuid,
    pub email_id: Uuid,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filter {
    pub id: Uuid,
    pub user_id: Uuid,
    pub category_id: Uuid,
    pub name: String,
}

// ---------------------------------------------------------------------
// Provider-client contract types (§4.B/C)
// ---------------------------------------------------------------------

/// The normalized form of a provider message, independent of Google vs.
/// Microsoft wire formats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalMessage {
    pub subject: String,
    pub from_name: String,
    pub from_email: String,
    pub body_text: String,
    pub sent_at: DateTime<Utc>,
    pub has_attachments: bool,
    pub web_link: String,
    pub is_reply: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeSet {
    pub message_ids: Vec<String>,
    pub new_watermark: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionHandle {
    pub external_id: String,
    pub expires_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------
// Classifier contract (§4.F)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPointItem {
    pub category: String,
    pub organization: String,
    pub topic: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub position: i32,
    pub points: Vec<KeyPointItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPointSet {
    Flat(Vec<KeyPointItem>),
    Grouped(Vec<ConversationTurn>),
}

/// The five importance buckets the Classifier must report (§4.F). A
/// `BTreeMap` keeps key iteration alphabetical, which doubles as the
/// deterministic tie-break `project_priority` relies on.
pub type ImportanceDistribution = BTreeMap<String, u8>;

pub const URGENT_WORK_INFORMATION: &str = "UrgentWorkInformation";
pub const ROUTINE_WORK_UPDATES: &str = "RoutineWorkUpdates";
pub const INTERNAL_COMMUNICATIONS: &str = "InternalCommunications";
pub const PROMOTIONAL: &str = "Promotional";
pub const NEWS: &str = "News";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub topic: String,
    pub importance_distribution: ImportanceDistribution,
    pub suggested_answer: String,
    pub bullet_summary: Vec<String>,
    pub short_summary: String,
    pub relevance: String,
    pub keypoints: KeyPointSet,
}

/// Projects an importance distribution onto a coarse priority (§4.F). The
/// fast path (`UrgentWorkInformation >= 50`) is definitive and is never
/// reconsidered by the max-value branch that follows, unlike the source
/// this spec was distilled from (see DESIGN.md).
pub fn project_priority(distribution: &ImportanceDistribution) -> Priority {
    if distribution
        .get(URGENT_WORK_INFORMATION)
        .copied()
        .unwrap_or(0)
        >= 50
    {
        return Priority::Important;
    }

    let max_entry = distribution
        .iter()
        .filter(|(_, v)| **v > 0)
        .max_by_key(|(_, v)| **v);

    match max_entry {
        None => Priority::Information,
        Some((key, _)) => match key.as_str() {
            PROMOTIONAL | NEWS => Priority::Useless,
            ROUTINE_WORK_UPDATES | INTERNAL_COMMUNICATIONS => Priority::Information,
            URGENT_WORK_INFORMATION => Priority::Important,
            _ => Priority::Information,
        },
    }
}

// ---------------------------------------------------------------------
// Inter-service request/response DTOs
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSocialApiRequest {
    pub user_id: Uuid,
    pub email: String,
    pub provider: ProviderKind,
    pub access_token: String,
    /// Plaintext; the credential store encrypts it before persisting.
    pub refresh_token: String,
    pub user_description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshedAccessToken {
    pub access_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecryptedRefreshToken {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDecision {
    pub block: bool,
    pub forced_category_id: Option<Uuid>,
    pub forced_priority: Option<Priority>,
}

impl RuleDecision {
    pub fn pass_through() -> Self {
        Self {
            block: false,
            forced_category_id: None,
            forced_priority: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestEmailRequest {
    pub social_api_id: Uuid,
    pub provider_id: String,
    pub provider: ProviderKind,
    pub subject: String,
    pub content: String,
    pub short_summary: String,
    pub priority: Priority,
    pub sender_email: String,
    pub sender_name: String,
    pub category_id: Uuid,
    pub user_id: Uuid,
    pub date: DateTime<Utc>,
    pub has_attachments: bool,
    pub web_link: String,
    pub suggested_answer: String,
    pub relevance: String,
    pub bullet_points: Vec<String>,
    pub keypoints: KeyPointSet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestEmailResponse {
    pub email: Email,
    /// True when the record already existed (idempotent no-op per §3/§8).
    pub already_existed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyRequest {
    pub subject: String,
    pub body_text: String,
    pub candidate_categories: Vec<String>,
    pub user_description: Option<String>,
    pub language: String,
    pub is_reply: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dist(pairs: &[(&str, u8)]) -> ImportanceDistribution {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn urgent_fast_path_wins_even_if_not_max() {
        let d = dist(&[(URGENT_WORK_INFORMATION, 50), (PROMOTIONAL, 90)]);
        assert_eq!(project_priority(&d), Priority::Important);
    }

    #[test]
    fn promotional_and_news_map_to_useless() {
        let d = dist(&[(PROMOTIONAL, 40), (NEWS, 35), (ROUTINE_WORK_UPDATES, 25)]);
        assert_eq!(project_priority(&d), Priority::Useless);
    }

    #[test]
    fn all_zero_is_information() {
        let d = dist(&[
            (URGENT_WORK_INFORMATION, 0),
            (ROUTINE_WORK_UPDATES, 0),
            (INTERNAL_COMMUNICATIONS, 0),
            (PROMOTIONAL, 0),
            (NEWS, 0),
        ]);
        assert_eq!(project_priority(&d), Priority::Information);
    }

    #[test]
    fn routine_and_internal_map_to_information() {
        let d = dist(&[(ROUTINE_WORK_UPDATES, 10), (INTERNAL_COMMUNICATIONS, 80)]);
        assert_eq!(project_priority(&d), Priority::Information);
    }

    #[test]
    fn ties_resolve_to_the_same_bucket_regardless_of_iteration_order() {
        let d = dist(&[(NEWS, 50), (PROMOTIONAL, 50)]);
        assert_eq!(project_priority(&d), Priority::Useless);
    }

    #[test]
    fn projection_is_pure() {
        let d = dist(&[(ROUTINE_WORK_UPDATES, 70)]);
        assert_eq!(project_priority(&d), project_priority(&d));
    }
}
