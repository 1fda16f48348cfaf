//! Subscription sweeper (§4.G): a periodic task that advances Google's
//! history-diff watermark and keeps Microsoft subscriptions from expiring.
//! Runs on `tokio::time::interval`, the same shape the teacher's
//! `email_polling_task` used for its own periodic fetch.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use models::ProviderKind;
use models::ProviderSubscription;
use tracing::{error, info, warn};

use crate::worker::{dispatch, CoreContext};

const SWEEP_INTERVAL_SECS: u64 = 300;
const MICROSOFT_RENEWAL_THRESHOLD_MINUTES: i64 = 15;

pub async fn run(ctx: Arc<CoreContext>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
    loop {
        ticker.tick().await;
        sweep_google(ctx.clone()).await;
        sweep_microsoft(&ctx).await;
    }
}

async fn sweep_google(ctx: Arc<CoreContext>) {
    let subscriptions = match ctx.credential.list_google_subscriptions().await {
        Ok(subs) => subs,
        Err(e) => {
            error!("failed to list google subscriptions: {e}");
            return;
        }
    };

    let Some(client) = ctx.registry.get(&ProviderKind::Google) else {
        return;
    };

    for subscription in subscriptions {
        let ProviderSubscription::Google {
            social_api_id,
            history_id,
            ..
        } = subscription
        else {
            continue;
        };

        let social_api = match ctx.credential.get_social_api(social_api_id).await {
            Ok(s) if s.active => s,
            Ok(_) => continue,
            Err(e) => {
                warn!(%social_api_id, "failed to load social api during sweep: {e}");
                continue;
            }
        };

        let changes = match client.list_changes_since(&social_api.access_token, &history_id).await {
            Ok(changes) => changes,
            Err(e) => {
                warn!(%social_api_id, "gmail history diff failed: {e}");
                continue;
            }
        };

        for message_id in &changes.message_ids {
            dispatch(ctx.clone(), ProviderKind::Google, social_api_id, message_id.clone());
        }

        // Watermark only advances once every discovered id has been
        // enqueued (§4.G sweeper semantics), never before.
        if changes.new_watermark != history_id {
            if let Err(e) = ctx
                .credential
                .upsert_google_subscription(social_api_id, &changes.new_watermark)
                .await
            {
                warn!(%social_api_id, "failed to persist advanced watermark: {e}");
            }
        }
    }
}

async fn sweep_microsoft(ctx: &CoreContext) {
    let subscriptions = match ctx.credential.list_microsoft_subscriptions().await {
        Ok(subs) => subs,
        Err(e) => {
            error!("failed to list microsoft subscriptions: {e}");
            return;
        }
    };

    let Some(client) = ctx.registry.get(&ProviderKind::Microsoft) else {
        return;
    };

    for subscription in subscriptions {
        let ProviderSubscription::Microsoft {
            id: _,
            subscription_id,
            user_id,
            email,
            expires_at,
            reauthorization_pending,
        } = subscription
        else {
            continue;
        };

        let social_api = match ctx.credential.get_social_api_by_email(&email).await {
            Ok(Some(s)) if s.active => s,
            Ok(_) => continue,
            Err(e) => {
                warn!(%subscription_id, "failed to load social api during sweep: {e}");
                continue;
            }
        };

        let needs_renewal = expires_at - Utc::now() < ChronoDuration::minutes(MICROSOFT_RENEWAL_THRESHOLD_MINUTES);

        let result = if reauthorization_pending {
            client.reauthorize(&social_api.access_token, &subscription_id).await
        } else if needs_renewal {
            client.renew(&social_api.access_token, &subscription_id).await
        } else {
            continue;
        };

        match result {
            Ok(handle) => {
                let new_expiry = handle.expires_at.unwrap_or_else(Utc::now);
                if let Err(e) = ctx
                    .credential
                    .update_microsoft_subscription_expiry(&subscription_id, new_expiry)
                    .await
                {
                    warn!(%subscription_id, "failed to persist renewed expiry: {e}");
                }
                info!(%subscription_id, "subscription renewed, expires {new_expiry}");
            }
            Err(e) => {
                error!(%subscription_id, user_id = %user_id, "subscription renewal failed: {e}");
                ctx.notifier
                    .send_admin_alert(
                        &format!("Microsoft subscription {subscription_id} could not be renewed"),
                        &format!("<p>User: {user_id}</p><p>Error: {e}</p>"),
                    )
                    .await;
            }
        }
    }
}
