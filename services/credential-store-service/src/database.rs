//! Postgres persistence for the Credential Store (§4.D). Runtime
//! (non-macro) queries with a manual `CREATE TABLE IF NOT EXISTS`
//! migration, in the style of the teacher's working persistence layer —
//! `sqlx::query!` needs a live database at build time, which this
//! workspace never has.

use chrono::{DateTime, Utc};
use common::{ServiceError, ServiceResult};
use models::{
    BulletPoint, Category, Email, Filter, KeyPoint, KeyPointSet, Priority, ProviderKind,
    ProviderSubscription, Rule, Sender, SocialApi,
};
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

fn provider_to_str(p: ProviderKind) -> &'static str {
    match p {
        ProviderKind::Google => "google",
        ProviderKind::Microsoft => "microsoft",
    }
}

fn provider_from_str(s: &str) -> ServiceResult<ProviderKind> {
    match s {
        "google" => Ok(ProviderKind::Google),
        "microsoft" => Ok(ProviderKind::Microsoft),
        other => Err(ServiceError::Internal(anyhow::anyhow!(
            "unknown provider kind in database row: {other}"
        ))),
    }
}

fn priority_to_str(p: Priority) -> &'static str {
    match p {
        Priority::Important => "important",
        Priority::Information => "information",
        Priority::Useless => "useless",
    }
}

fn priority_from_str(s: &str) -> ServiceResult<Priority> {
    match s {
        "important" => Ok(Priority::Important),
        "information" => Ok(Priority::Information),
        "useless" => Ok(Priority::Useless),
        other => Err(ServiceError::Internal(anyhow::anyhow!(
            "unknown priority in database row: {other}"
        ))),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

fn social_api_from_row(row: &PgRow) -> ServiceResult<SocialApi> {
    Ok(SocialApi {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        email: row.try_get("email")?,
        provider: provider_from_str(row.try_get::<String, _>("provider")?.as_str())?,
        access_token: row.try_get("access_token")?,
        refresh_token: row.try_get("refresh_token")?,
        user_description: row.try_get("user_description")?,
        active: row.try_get("active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn email_from_row(row: &PgRow) -> ServiceResult<Email> {
    Ok(Email {
        id: row.try_get("id")?,
        social_api_id: row.try_get("social_api_id")?,
        provider_id: row.try_get("provider_id")?,
        provider: provider_from_str(row.try_get::<String, _>("provider")?.as_str())?,
        subject: row.try_get("subject")?,
        content: row.try_get("content")?,
        short_summary: row.try_get("short_summary")?,
        priority: priority_from_str(row.try_get::<String, _>("priority")?.as_str())?,
        read: row.try_get("read")?,
        answer_later: row.try_get("answer_later")?,
        sender_id: row.try_get("sender_id")?,
        category_id: row.try_get("category_id")?,
        user_id: row.try_get("user_id")?,
        date: row.try_get("date")?,
        has_attachments: row.try_get("has_attachments")?,
        web_link: row.try_get("web_link")?,
        suggested_answer: row.try_get("suggested_answer")?,
        relevance: row.try_get("relevance")?,
    })
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS social_apis (
                id UUID PRIMARY KEY,
                user_id UUID NOT NULL,
                email TEXT NOT NULL UNIQUE,
                provider TEXT NOT NULL,
                access_token TEXT NOT NULL,
                refresh_token TEXT NOT NULL,
                user_description TEXT,
                active BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS senders (
                id UUID PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS categories (
                id UUID PRIMARY KEY,
                user_id UUID NOT NULL,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                UNIQUE (user_id, name)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rules (
                id UUID PRIMARY KEY,
                user_id UUID NOT NULL,
                sender_id UUID NOT NULL,
                block BOOLEAN NOT NULL DEFAULT FALSE,
                category_id UUID,
                priority_override TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS emails (
                id UUID PRIMARY KEY,
                social_api_id UUID NOT NULL,
                provider_id TEXT NOT NULL UNIQUE,
                provider TEXT NOT NULL,
                subject TEXT NOT NULL DEFAULT '',
                content TEXT NOT NULL DEFAULT '',
                short_summary TEXT NOT NULL DEFAULT '',
                priority TEXT NOT NULL,
                read BOOLEAN NOT NULL DEFAULT FALSE,
                answer_later BOOLEAN NOT NULL DEFAULT FALSE,
                sender_id UUID NOT NULL,
                category_id UUID NOT NULL,
                user_id UUID NOT NULL,
                date TIMESTAMPTZ NOT NULL,
                has_attachments BOOLEAN NOT NULL DEFAULT FALSE,
                web_link TEXT NOT NULL DEFAULT '',
                suggested_answer TEXT NOT NULL DEFAULT '',
                relevance TEXT NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS key_points (
                id UUID PRIMARY KEY,
                email_id UUID NOT NULL,
                is_reply BOOLEAN NOT NULL DEFAULT FALSE,
                position INT,
                category TEXT NOT NULL DEFAULT '',
                organization TEXT NOT NULL DEFAULT '',
                topic TEXT NOT NULL DEFAULT '',
                content TEXT NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bullet_points (
                id UUID PRIMARY KEY,
                email_id UUID NOT NULL,
                content TEXT NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS filters (
                id UUID PRIMARY KEY,
                user_id UUID NOT NULL,
                category_id UUID NOT NULL,
                name TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS google_subscriptions (
                id UUID PRIMARY KEY,
                social_api_id UUID NOT NULL UNIQUE,
                history_id TEXT NOT NULL,
                last_modified TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS microsoft_subscriptions (
                id UUID PRIMARY KEY,
                subscription_id TEXT NOT NULL UNIQUE,
                user_id UUID NOT NULL,
                email TEXT NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL,
                reauthorization_pending BOOLEAN NOT NULL DEFAULT FALSE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ---------------------------------------------------------------
    // SocialApi
    // ---------------------------------------------------------------

    /// Inserts a new linked account. `email` is globally unique (§3); a
    /// violation is surfaced as `ServiceError::Conflict` rather than 500.
    pub async fn create_social_api(
        &self,
        user_id: Uuid,
        email: &str,
        provider: ProviderKind,
        access_token: &str,
        encrypted_refresh_token: &str,
        user_description: Option<&str>,
    ) -> ServiceResult<SocialApi> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let row = sqlx::query(
            r#"
            INSERT INTO social_apis
                (id, user_id, email, provider, access_token, refresh_token, user_description, active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE, $8, $8)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(email)
        .bind(provider_to_str(provider))
        .bind(access_token)
        .bind(encrypted_refresh_token)
        .bind(user_description)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ServiceError::Conflict(format!("email {email} is already linked"))
            } else {
                ServiceError::Database(e)
            }
        })?;

        social_api_from_row(&row)
    }

    pub async fn get_social_api(&self, id: Uuid) -> ServiceResult<SocialApi> {
        let row = sqlx::query("SELECT * FROM social_apis WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("social_api {id} not found")))?;
        social_api_from_row(&row)
    }

    pub async fn get_social_api_by_email(&self, email: &str) -> ServiceResult<Option<SocialApi>> {
        let row = sqlx::query("SELECT * FROM social_apis WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(social_api_from_row).transpose()
    }

    pub async fn list_active_social_apis(&self) -> ServiceResult<Vec<SocialApi>> {
        let rows = sqlx::query("SELECT * FROM social_apis WHERE active = TRUE")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(social_api_from_row).collect()
    }

    /// Last-writer-wins token refresh (§5): concurrent refreshers for the
    /// same SocialAPI all see equivalent values modulo clock skew, so no
    /// extra locking is needed beyond the row UPDATE itself.
    pub async fn update_tokens(
        &self,
        id: Uuid,
        access_token: &str,
        encrypted_refresh_token: &str,
    ) -> ServiceResult<()> {
        sqlx::query(
            "UPDATE social_apis SET access_token = $2, refresh_token = $3, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(access_token)
        .bind(encrypted_refresh_token)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Flips a SocialAPI inactive after `invalid_grant` (§7
    /// `TokenRefreshError`). In-flight workers check `active` at their
    /// next checkpoint and exit rather than keep retrying.
    pub async fn deactivate_social_api(&self, id: Uuid) -> ServiceResult<()> {
        sqlx::query("UPDATE social_apis SET active = FALSE, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Sender / Category / Rule
    // ---------------------------------------------------------------

    pub async fn get_or_create_sender(&self, email: &str, name: &str) -> ServiceResult<Sender> {
        if let Some(row) = sqlx::query("SELECT * FROM senders WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?
        {
            return Ok(Sender {
                id: row.try_get("id")?,
                email: row.try_get("email")?,
                name: row.try_get("name")?,
            });
        }

        let id = Uuid::new_v4();
        let row = sqlx::query(
            "INSERT INTO senders (id, email, name) VALUES ($1, $2, $3)
             ON CONFLICT (email) DO UPDATE SET email = EXCLUDED.email
             RETURNING *",
        )
        .bind(id)
        .bind(email)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Ok(Sender {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            name: row.try_get("name")?,
        })
    }

    /// Every user has a `"default"` category created at signup (§3); this
    /// is the fallback used when the classifier's topic isn't among the
    /// user's candidate categories.
    pub async fn get_or_create_default_category(&self, user_id: Uuid) -> ServiceResult<Category> {
        self.get_or_create_category(user_id, Category::DEFAULT_NAME, "")
            .await
    }

    pub async fn get_or_create_category(
        &self,
        user_id: Uuid,
        name: &str,
        description: &str,
    ) -> ServiceResult<Category> {
        if let Some(row) = sqlx::query("SELECT * FROM categories WHERE user_id = $1 AND name = $2")
            .bind(user_id)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
        {
            return Ok(Category {
                id: row.try_get("id")?,
                user_id: row.try_get("user_id")?,
                name: row.try_get("name")?,
                description: row.try_get("description")?,
            });
        }

        let id = Uuid::new_v4();
        let row = sqlx::query(
            "INSERT INTO categories (id, user_id, name, description) VALUES ($1, $2, $3, $4)
             ON CONFLICT (user_id, name) DO UPDATE SET name = EXCLUDED.name
             RETURNING *",
        )
        .bind(id)
        .bind(user_id)
        .bind(name)
        .bind(description)
        .fetch_one(&self.pool)
        .await?;

        Ok(Category {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
        })
    }

    pub async fn list_categories_for_user(&self, user_id: Uuid) -> ServiceResult<Vec<Category>> {
        let rows = sqlx::query("SELECT * FROM categories WHERE user_id = $1")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| {
                Ok(Category {
                    id: row.try_get("id")?,
                    user_id: row.try_get("user_id")?,
                    name: row.try_get("name")?,
                    description: row.try_get("description")?,
                })
            })
            .collect()
    }

    /// All rules for `(user_id, sender_id)`, in insertion order — the Rule
    /// Engine (§4.E) takes the first non-null-category rule as the
    /// winner, so callers must not reorder this result.
    pub async fn get_rules_for_sender(
        &self,
        user_id: Uuid,
        sender_id: Uuid,
    ) -> ServiceResult<Vec<Rule>> {
        let rows = sqlx::query(
            "SELECT * FROM rules WHERE user_id = $1 AND sender_id = $2 ORDER BY created_at, id",
        )
        .bind(user_id)
        .bind(sender_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let priority_override: Option<String> = row.try_get("priority_override")?;
                Ok(Rule {
                    id: row.try_get("id")?,
                    user_id: row.try_get("user_id")?,
                    sender_id: row.try_get("sender_id")?,
                    block: row.try_get("block")?,
                    category_id: row.try_get("category_id")?,
                    priority_override: priority_override
                        .map(|s| priority_from_str(&s))
                        .transpose()?,
                })
            })
            .collect()
    }

    pub async fn create_rule(
        &self,
        user_id: Uuid,
        sender_id: Uuid,
        block: bool,
        category_id: Option<Uuid>,
        priority_override: Option<Priority>,
    ) -> ServiceResult<Rule> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO rules (id, user_id, sender_id, block, category_id, priority_override)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(id)
        .bind(user_id)
        .bind(sender_id)
        .bind(block)
        .bind(category_id)
        .bind(priority_override.map(priority_to_str))
        .execute(&self.pool)
        .await?;

        Ok(Rule {
            id,
            user_id,
            sender_id,
            block,
            category_id,
            priority_override,
        })
    }

    // ---------------------------------------------------------------
    // Filter (opaque passthrough for frontend listing, per §3)
    // ---------------------------------------------------------------

    pub async fn create_filter(
        &self,
        user_id: Uuid,
        category_id: Uuid,
        name: &str,
    ) -> ServiceResult<Filter> {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO filters (id, user_id, category_id, name) VALUES ($1, $2, $3, $4)")
            .bind(id)
            .bind(user_id)
            .bind(category_id)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(Filter {
            id,
            user_id,
            category_id,
            name: name.to_string(),
        })
    }

    pub async fn list_filters_for_user(&self, user_id: Uuid) -> ServiceResult<Vec<Filter>> {
        let rows = sqlx::query("SELECT * FROM filters WHERE user_id = $1")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| {
                Ok(Filter {
                    id: row.try_get("id")?,
                    user_id: row.try_get("user_id")?,
                    category_id: row.try_get("category_id")?,
                    name: row.try_get("name")?,
                })
            })
            .collect()
    }

    // ---------------------------------------------------------------
    // Email / KeyPoint / BulletPoint
    // ---------------------------------------------------------------

    pub async fn find_email_by_provider_id(&self, provider_id: &str) -> ServiceResult<Option<Email>> {
        let row = sqlx::query("SELECT * FROM emails WHERE provider_id = $1")
            .bind(provider_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(email_from_row).transpose()
    }

    /// Idempotent insert keyed on `provider_id` (§3, §8 scenario 1): a
    /// unique-constraint loser returns the winner's row with
    /// `already_existed = true` instead of propagating the conflict.
    #[allow(clippy::too_many_arguments)]
    pub async fn ingest_email(
        &self,
        social_api_id: Uuid,
        provider_id: &str,
        provider: ProviderKind,
        subject: &str,
        content: &str,
        short_summary: &str,
        priority: Priority,
        sender_id: Uuid,
        category_id: Uuid,
        user_id: Uuid,
        date: DateTime<Utc>,
        has_attachments: bool,
        web_link: &str,
        suggested_answer: &str,
        relevance: &str,
        bullet_points: &[String],
        keypoints: &KeyPointSet,
    ) -> ServiceResult<(Email, bool)> {
        let id = Uuid::new_v4();
        let insert_result = sqlx::query(
            r#"
            INSERT INTO emails
                (id, social_api_id, provider_id, provider, subject, content, short_summary,
                 priority, read, answer_later, sender_id, category_id, user_id, date,
                 has_attachments, web_link, suggested_answer, relevance)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, FALSE, FALSE, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(social_api_id)
        .bind(provider_id)
        .bind(provider_to_str(provider))
        .bind(subject)
        .bind(content)
        .bind(short_summary)
        .bind(priority_to_str(priority))
        .bind(sender_id)
        .bind(category_id)
        .bind(user_id)
        .bind(date)
        .bind(has_attachments)
        .bind(web_link)
        .bind(suggested_answer)
        .bind(relevance)
        .fetch_one(&self.pool)
        .await;

        let (email, already_existed) = match insert_result {
            Ok(row) => (email_from_row(&row)?, false),
            Err(e) if is_unique_violation(&e) => {
                let existing = self
                    .find_email_by_provider_id(provider_id)
                    .await?
                    .ok_or(ServiceError::Database(e))?;
                return Ok((existing, true));
            }
            Err(e) => return Err(ServiceError::Database(e)),
        };

        self.insert_bullet_points(email.id, bullet_points).await?;
        self.insert_keypoints(email.id, keypoints).await?;

        Ok((email, already_existed))
    }

    async fn insert_bullet_points(&self, email_id: Uuid, points: &[String]) -> ServiceResult<()> {
        for content in points {
            sqlx::query("INSERT INTO bullet_points (id, email_id, content) VALUES ($1, $2, $3)")
                .bind(Uuid::new_v4())
                .bind(email_id)
                .bind(content)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn insert_keypoints(&self, email_id: Uuid, keypoints: &KeyPointSet) -> ServiceResult<()> {
        match keypoints {
            KeyPointSet::Flat(items) => {
                for item in items {
                    self.insert_one_keypoint(email_id, false, None, item).await?;
                }
            }
            KeyPointSet::Grouped(turns) => {
                for turn in turns {
                    for item in &turn.points {
                        self.insert_one_keypoint(email_id, true, Some(turn.position), item)
                            .await?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn insert_one_keypoint(
        &self,
        email_id: Uuid,
        is_reply: bool,
        position: Option<i32>,
        item: &models::KeyPointItem,
    ) -> ServiceResult<()> {
        sqlx::query(
            r#"
            INSERT INTO key_points (id, email_id, is_reply, position, category, organization, topic, content)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(email_id)
        .bind(is_reply)
        .bind(position)
        .bind(&item.category)
        .bind(&item.organization)
        .bind(&item.topic)
        .bind(&item.content)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_key_points(&self, email_id: Uuid) -> ServiceResult<Vec<KeyPoint>> {
        let rows = sqlx::query("SELECT * FROM key_points WHERE email_id = $1")
            .bind(email_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| {
                Ok(KeyPoint {
                    id: row.try_get("id")?,
                    email_id: row.try_get("email_id")?,
                    is_reply: row.try_get("is_reply")?,
                    position: row.try_get("position")?,
                    category: row.try_get("category")?,
                    organization: row.try_get("organization")?,
                    topic: row.try_get("topic")?,
                    content: row.try_get("content")?,
                })
            })
            .collect()
    }

    pub async fn get_bullet_points(&self, email_id: Uuid) -> ServiceResult<Vec<BulletPoint>> {
        let rows = sqlx::query("SELECT * FROM bullet_points WHERE email_id = $1")
            .bind(email_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| {
                Ok(BulletPoint {
                    id: row.try_get("id")?,
                    email_id: row.try_get("email_id")?,
                    content: row.try_get("content")?,
                })
            })
            .collect()
    }

    /// Deletion is idempotent (§4.G step 3): deleting an already-absent
    /// `provider_id` is a successful no-op, not a 404.
    pub async fn delete_email_by_provider_id(&self, provider_id: &str) -> ServiceResult<()> {
        sqlx::query("DELETE FROM emails WHERE provider_id = $1")
            .bind(provider_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // ProviderSubscription
    // ---------------------------------------------------------------

    pub async fn upsert_google_subscription(
        &self,
        social_api_id: Uuid,
        history_id: &str,
    ) -> ServiceResult<ProviderSubscription> {
        let id = Uuid::new_v4();
        let row = sqlx::query(
            r#"
            INSERT INTO google_subscriptions (id, social_api_id, history_id, last_modified)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (social_api_id) DO UPDATE SET history_id = EXCLUDED.history_id, last_modified = NOW()
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(social_api_id)
        .bind(history_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(ProviderSubscription::Google {
            id: row.try_get("id")?,
            social_api_id: row.try_get("social_api_id")?,
            history_id: row.try_get("history_id")?,
            last_modified: row.try_get("last_modified")?,
        })
    }

    pub async fn list_google_subscriptions(&self) -> ServiceResult<Vec<ProviderSubscription>> {
        let rows = sqlx::query("SELECT * FROM google_subscriptions")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| {
                Ok(ProviderSubscription::Google {
                    id: row.try_get("id")?,
                    social_api_id: row.try_get("social_api_id")?,
                    history_id: row.try_get("history_id")?,
                    last_modified: row.try_get("last_modified")?,
                })
            })
            .collect()
    }

    pub async fn upsert_microsoft_subscription(
        &self,
        subscription_id: &str,
        user_id: Uuid,
        email: &str,
        expires_at: DateTime<Utc>,
    ) -> ServiceResult<ProviderSubscription> {
        let id = Uuid::new_v4();
        let row = sqlx::query(
            r#"
            INSERT INTO microsoft_subscriptions (id, subscription_id, user_id, email, expires_at, reauthorization_pending)
            VALUES ($1, $2, $3, $4, $5, FALSE)
            ON CONFLICT (subscription_id) DO UPDATE SET expires_at = EXCLUDED.expires_at
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(subscription_id)
        .bind(user_id)
        .bind(email)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?;

        microsoft_subscription_from_row(&row)
    }

    pub async fn get_microsoft_subscription(
        &self,
        subscription_id: &str,
    ) -> ServiceResult<Option<ProviderSubscription>> {
        let row = sqlx::query("SELECT * FROM microsoft_subscriptions WHERE subscription_id = $1")
            .bind(subscription_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(microsoft_subscription_from_row).transpose()
    }

    pub async fn list_microsoft_subscriptions(&self) -> ServiceResult<Vec<ProviderSubscription>> {
        let rows = sqlx::query("SELECT * FROM microsoft_subscriptions")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(microsoft_subscription_from_row).collect()
    }

    pub async fn mark_microsoft_reauthorization_pending(
        &self,
        subscription_id: &str,
    ) -> ServiceResult<()> {
        sqlx::query(
            "UPDATE microsoft_subscriptions SET reauthorization_pending = TRUE WHERE subscription_id = $1",
        )
        .bind(subscription_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_microsoft_subscription_expiry(
        &self,
        subscription_id: &str,
        expires_at: DateTime<Utc>,
    ) -> ServiceResult<()> {
        sqlx::query(
            "UPDATE microsoft_subscriptions SET expires_at = $2, reauthorization_pending = FALSE WHERE subscription_id = $1",
        )
        .bind(subscription_id)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_microsoft_subscription(&self, subscription_id: &str) -> ServiceResult<()> {
        sqlx::query("DELETE FROM microsoft_subscriptions WHERE subscription_id = $1")
            .bind(subscription_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn microsoft_subscription_from_row(row: &PgRow) -> ServiceResult<ProviderSubscription> {
    Ok(ProviderSubscription::Microsoft {
        id: row.try_get("id")?,
        subscription_id: row.try_get("subscription_id")?,
        user_id: row.try_get("user_id")?,
        email: row.try_get("email")?,
        expires_at: row.try_get("expires_at")?,
        reauthorization_pending: row.try_get("reauthorization_pending")?,
    })
}
