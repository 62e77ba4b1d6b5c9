use anyhow::Context;
use teloxide::prelude::*;

use gtb_core::config::Config;

/// Drop any previous webhook and, when an external URL is configured, point
/// Telegram at `{APP_URL}/{token}`.
pub async fn register(bot: &Bot, cfg: &Config) -> anyhow::Result<()> {
    bot.delete_webhook().await.context("delete webhook")?;

    let Some(url) = cfg.webhook_url() else {
        tracing::warn!("APP_URL is not set; webhook not registered");
        return Ok(());
    };

    let parsed = reqwest::Url::parse(&url).context("APP_URL is not a valid url")?;
    bot.set_webhook(parsed).await.context("set webhook")?;

    // The url embeds the token; log only the base.
    tracing::info!(base = %cfg.app_url.as_deref().unwrap_or_default(), "webhook registered");
    Ok(())
}
