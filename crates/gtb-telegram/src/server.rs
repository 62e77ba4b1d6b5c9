use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use teloxide::{prelude::*, types::Update};

use gtb_core::{
    allowlist::{AllowListStore, JsonFileAllowList},
    answer::{AnswerService, AnswerSettings},
    config::Config,
    dispatcher::Dispatcher,
    messaging::port::MessagingPort,
    model::GenerativeModel,
    pending::PendingQuestions,
    security::AuthorizationGate,
};

use crate::{convert::incoming_from_update, webhook, TelegramMessenger};

pub const HEALTH_TEXT: &str = "🤖 Gemini AI Telegram Bot is live!";

const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct WebhookState {
    pub token: String,
    pub dispatcher: Arc<Dispatcher>,
}

pub fn router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/", get(handle_health))
        .route("/{token}", post(handle_webhook))
        .with_state(state)
}

async fn handle_health() -> &'static str {
    HEALTH_TEXT
}

/// Always answers `200 OK` for the right token; processing happens on a
/// spawned task so a slow model call never holds the Telegram delivery.
async fn handle_webhook(
    State(state): State<Arc<WebhookState>>,
    Path(token): Path<String>,
    body: Bytes,
) -> Response {
    if token != state.token {
        return StatusCode::NOT_FOUND.into_response();
    }

    match serde_json::from_slice::<Update>(&body) {
        Ok(update) => match incoming_from_update(&update) {
            Some(incoming) => {
                let dispatcher = state.dispatcher.clone();
                let update_id = update.id;
                tokio::spawn(async move {
                    if let Err(e) = dispatcher.handle(incoming).await {
                        tracing::error!(update_id, error = %e, "update handling failed");
                    }
                });
            }
            None => tracing::debug!(update_id = update.id, "ignoring unsupported update"),
        },
        Err(e) => tracing::warn!(error = %e, "undecodable webhook body"),
    }

    (StatusCode::OK, "OK").into_response()
}

/// Wire adapters, register the webhook, and serve until ctrl-c.
pub async fn run_webhook(cfg: Arc<Config>, model: Arc<dyn GenerativeModel>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.bot_token.clone());

    match bot.get_me().await {
        Ok(me) => tracing::info!(username = %me.username(), "bot started"),
        Err(e) => tracing::warn!(error = %e, "get_me failed"),
    }
    tracing::info!(
        policy = %cfg.auth_policy,
        owner = ?cfg.owner_id,
        groups = cfg.allowed_groups.len(),
        auth_file = %cfg.auth_file.display(),
        "authorization configured"
    );
    if cfg.owner_id.is_none() {
        tracing::warn!("OWNER_ID is not set; /auth and /authlist are unusable");
    }
    if cfg.gemini_api_key.is_none() {
        tracing::warn!("GEMINI_API_KEY is not set; every question will be answered with an error");
    }

    let messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(
        bot.clone(),
        cfg.telegram_message_limit,
    ));
    let store: Arc<dyn AllowListStore> = Arc::new(JsonFileAllowList::new(cfg.auth_file.clone()));
    let gate = AuthorizationGate::new(
        cfg.auth_policy,
        cfg.owner_id,
        cfg.allowed_groups.clone(),
        store,
    );
    let pending = Arc::new(PendingQuestions::new(cfg.ask_timeout));
    let answers = AnswerService::new(model, messenger.clone(), AnswerSettings::from_config(&cfg));
    let dispatcher = Arc::new(Dispatcher::new(gate, pending.clone(), answers, messenger));

    if pending.ttl().is_some() {
        tokio::spawn(purge_loop(pending));
    }

    // Registration failures are logged; the server still serves health checks.
    if let Err(e) = webhook::register(&bot, &cfg).await {
        tracing::error!(error = %e, "webhook registration failed");
    }

    let state = Arc::new(WebhookState {
        token: cfg.bot_token.clone(),
        dispatcher,
    });

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("parse listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")?;

    tracing::info!("shutdown complete");
    Ok(())
}

async fn purge_loop(pending: Arc<PendingQuestions>) {
    let mut tick = tokio::time::interval(PURGE_INTERVAL);
    loop {
        tick.tick().await;
        let removed = pending.purge_expired();
        if removed > 0 {
            tracing::debug!(removed, "expired pending questions");
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "ctrl-c handler failed");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::{body::Body, http::Request};
    use gtb_core::{
        allowlist::MemoryAllowList,
        domain::{ChatId, MessageId, MessageRef},
        messaging::types::{ChatAction, MessagingCapabilities},
        security::AuthPolicy,
        Result,
    };
    use std::sync::Mutex;
    use tower::ServiceExt;

    const TOKEN: &str = "123:secret";

    #[derive(Default)]
    struct FakeMessenger {
        sent: Mutex<Vec<(ChatId, String)>>,
    }

    #[async_trait]
    impl MessagingPort for FakeMessenger {
        fn capabilities(&self) -> MessagingCapabilities {
            MessagingCapabilities {
                supports_chat_actions: false,
                max_message_len: 4096,
            }
        }

        async fn send_text(
            &self,
            chat_id: ChatId,
            text: &str,
            _reply_to: Option<MessageId>,
        ) -> Result<MessageRef> {
            self.sent.lock().unwrap().push((chat_id, text.to_string()));
            Ok(MessageRef {
                chat_id,
                message_id: MessageId(1),
            })
        }

        async fn send_chat_action(&self, _chat_id: ChatId, _action: ChatAction) -> Result<()> {
            Ok(())
        }

        async fn download_file(&self, _file_id: &str) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    struct EchoModel;

    #[async_trait]
    impl GenerativeModel for EchoModel {
        async fn generate_text(&self, _model: &str, prompt: &str) -> Result<String> {
            Ok(format!("echo: {prompt}"))
        }

        async fn generate_with_image(
            &self,
            _model: &str,
            _prompt: &str,
            _image_path: &std::path::Path,
            _mime_type: &str,
        ) -> Result<String> {
            Ok("image".to_string())
        }
    }

    fn app(messenger: Arc<FakeMessenger>) -> Router {
        let gate = AuthorizationGate::new(
            AuthPolicy::OwnerOnly,
            Some(555),
            vec![],
            Arc::new(MemoryAllowList::default()),
        );
        let answers = AnswerService::new(
            Arc::new(EchoModel),
            messenger.clone(),
            AnswerSettings {
                text_model: "m".to_string(),
                vision_model: "v".to_string(),
                image_prompt: "p".to_string(),
                temp_dir: std::env::temp_dir(),
            },
        );
        let dispatcher = Dispatcher::new(
            gate,
            Arc::new(PendingQuestions::default()),
            answers,
            messenger,
        );
        router(Arc::new(WebhookState {
            token: TOKEN.to_string(),
            dispatcher: Arc::new(dispatcher),
        }))
    }

    fn start_update() -> String {
        r#"{
            "update_id": 1,
            "message": {
                "message_id": 9,
                "date": 1700000000,
                "chat": {"id": 555, "type": "private", "first_name": "Ann"},
                "from": {"id": 555, "is_bot": false, "first_name": "Ann"},
                "text": "/start"
            }
        }"#
        .to_string()
    }

    async fn body_text(resp: Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn wait_for_sends(messenger: &FakeMessenger, n: usize) {
        for _ in 0..100 {
            if messenger.sent.lock().unwrap().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn health_returns_liveness_text() {
        let resp = app(Arc::new(FakeMessenger::default()))
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_text(resp).await, HEALTH_TEXT);
    }

    #[tokio::test]
    async fn webhook_acks_and_dispatches() {
        let messenger = Arc::new(FakeMessenger::default());
        let resp = app(messenger.clone())
            .oneshot(
                Request::post(format!("/{TOKEN}"))
                    .header("content-type", "application/json")
                    .body(Body::from(start_update()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_text(resp).await, "OK");

        wait_for_sends(&messenger, 1).await;
        let sent = messenger.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, ChatId(555));
        assert_eq!(sent[0].1, gtb_core::dispatcher::WELCOME);
    }

    #[tokio::test]
    async fn garbage_body_still_gets_ok() {
        let resp = app(Arc::new(FakeMessenger::default()))
            .oneshot(
                Request::post(format!("/{TOKEN}"))
                    .body(Body::from("not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_text(resp).await, "OK");
    }

    #[tokio::test]
    async fn wrong_token_is_not_found() {
        let messenger = Arc::new(FakeMessenger::default());
        let resp = app(messenger.clone())
            .oneshot(
                Request::post("/not-the-token")
                    .body(Body::from(start_update()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(messenger.sent.lock().unwrap().is_empty());
    }
}
