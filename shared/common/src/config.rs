use std::env;

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub service_name: String,
    pub port: u16,
    pub database_url: Option<String>,
    pub openai_api_key: Option<String>,
    pub log_level: String,

    // OAuth2 / webhook plumbing
    pub microsoft_client_id: Option<String>,
    pub microsoft_client_secret: Option<String>,
    pub microsoft_tenant_id: Option<String>,
    pub microsoft_client_state: Option<String>,
    pub google_client_id: Option<String>,
    pub google_client_secret: Option<String>,
    pub google_pubsub_topic: Option<String>,
    pub google_pubsub_ack_token: Option<String>,
    pub redirect_base_url: String,

    // Ingestion worker
    pub max_retries: u32,
    pub admin_alert_emails: Vec<String>,

    // Secret Vault
    pub vault_key_env_var: String,
}

impl ServiceConfig {
    pub fn from_env(service_name: &str, default_port: u16) -> Self {
        Self {
            service_name: service_name.to_string(),
            port: env::var("PORT")
                .unwrap_or_else(|_| default_port.to_string())
                .parse()
                .unwrap_or(default_port),
            database_url: env::var("DATABASE_URL").ok(),
            openai_api_key: env::var("OPENAI_API_KEY").ok(),
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),

            microsoft_client_id: env::var("MICROSOFT_CLIENT_ID").ok(),
            microsoft_client_secret: env::var("MICROSOFT_CLIENT_SECRET").ok(),
            microsoft_tenant_id: env::var("MICROSOFT_TENANT_ID").ok(),
            microsoft_client_state: env::var("MICROSOFT_CLIENT_STATE").ok(),
            google_client_id: env::var("GOOGLE_CLIENT_ID").ok(),
            google_client_secret: env::var("GOOGLE_CLIENT_SECRET").ok(),
            google_pubsub_topic: env::var("GOOGLE_PUBSUB_TOPIC").ok(),
            google_pubsub_ack_token: env::var("GOOGLE_PUBSUB_ACK_TOKEN").ok(),
            redirect_base_url: env::var("REDIRECT_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),

            max_retries: env::var("MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            admin_alert_emails: env::var("ADMIN_ALERT_EMAILS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),

            vault_key_env_var: env::var("VAULT_KEY_ENV_VAR")
                .unwrap_or_else(|_| "VAULT_KEY_REFRESH_TOKEN".to_string()),
        }
    }

    pub fn service_url(&self, service: &str) -> String {
        match service {
            "credential-store" => env::var("CREDENTIAL_STORE_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:8001".to_string()),
            "classifier" => env::var("CLASSIFIER_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:8002".to_string()),
            "ingestion-orchestrator" => env::var("INGESTION_ORCHESTRATOR_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:8003".to_string()),
            _ => "http://localhost:8000".to_string(),
        }
    }
}
