use std::sync::Arc;

use gtb_core::{config::Config, model::GenerativeModel};
use gtb_gemini::GeminiClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    gtb_core::logging::init("gtb")?;

    let cfg = Arc::new(Config::load()?);

    let model: Arc<dyn GenerativeModel> = Arc::new(GeminiClient::new(
        cfg.gemini_api_key.clone(),
        cfg.gemini_api_base.clone(),
        cfg.gemini_timeout,
    )?);

    gtb_telegram::server::run_webhook(cfg, model).await
}
