use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use clearquote_agent::InboundPipeline;
use clearquote_core::signature;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::{error, warn};

use crate::bootstrap::AppState;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Subscription handshake parameters. The provider sends them with a
/// `hub.` prefix; both spellings are accepted.
#[derive(Debug, Default, Deserialize)]
pub struct HandshakeParams {
    #[serde(default, alias = "hub.mode")]
    pub mode: String,
    #[serde(default, alias = "hub.challenge")]
    pub challenge: String,
    #[serde(default, alias = "hub.verify_token")]
    pub verify_token: String,
}

/// `GET /webhook`: echo the challenge iff the mode is `subscribe` and
/// the token matches the configured secret.
pub async fn verify_handshake(
    State(state): State<AppState>,
    Query(params): Query<HandshakeParams>,
) -> Response {
    if params.mode == "subscribe"
        && !params.verify_token.is_empty()
        && params.verify_token == state.verify_token.expose_secret()
    {
        return (StatusCode::OK, params.challenge).into_response();
    }
    (StatusCode::FORBIDDEN, "forbidden").into_response()
}

/// `POST /webhook`: the raw body is read before any parsing because the
/// signature covers the exact bytes. On a valid signature the provider
/// gets its 200 immediately; processing continues in a detached task
/// that can never fail the HTTP response.
pub async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let signature_header =
        headers.get(SIGNATURE_HEADER).and_then(|value| value.to_str().ok()).unwrap_or_default();

    if !signature::verify_provider_signature(
        state.app_secret.expose_secret(),
        &body,
        signature_header,
    ) {
        warn!("rejected webhook with missing or invalid signature");
        return StatusCode::FORBIDDEN;
    }

    spawn_processing(Arc::clone(&state.pipeline), body);
    StatusCode::OK
}

/// Fault boundary for the detached processing task: a panic inside it
/// is caught by the watcher and logged, never terminating the process.
fn spawn_processing(pipeline: Arc<InboundPipeline>, body: Bytes) {
    let task = tokio::spawn(async move {
        pipeline.process_payload(&body).await;
    });
    tokio::spawn(async move {
        if let Err(join_error) = task.await {
            if join_error.is_panic() {
                error!(error = %join_error, "webhook processing task panicked");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Bytes;
    use axum::extract::{Query, State};
    use axum::http::{HeaderMap, StatusCode};
    use clearquote_agent::llm::{LlmClient, LlmError};
    use clearquote_agent::{ConversationLocks, InboundPipeline};
    use clearquote_core::{AgentAction, AgentReply, ExtractedData, Message};
    use clearquote_db::{connect_with_settings, migrations, ConversationStore};
    use clearquote_slack::notifier::{EscalationNotifier, NotifyError};
    use clearquote_whatsapp::sender::{ReplySender, SendError};
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    use super::{receive_webhook, verify_handshake, HandshakeParams, SIGNATURE_HEADER};
    use crate::bootstrap::AppState;

    struct CannedLlm;

    #[async_trait]
    impl LlmClient for CannedLlm {
        async fn complete(
            &self,
            _system_prompt: &str,
            _history: &[Message],
        ) -> Result<AgentReply, LlmError> {
            Ok(AgentReply {
                reply_to_user: "Hi! What's the address?".to_string(),
                extracted_data: ExtractedData::new(),
                action: AgentAction::Continue,
            })
        }
    }

    struct NullSender;

    #[async_trait]
    impl ReplySender for NullSender {
        async fn send_text(&self, _to: &str, _body: &str) -> Result<(), SendError> {
            Ok(())
        }
    }

    struct NullNotifier;

    #[async_trait]
    impl EscalationNotifier for NullNotifier {
        async fn notify_handoff(
            &self,
            _conversation_id: &str,
            _extracted: &ExtractedData,
        ) -> Result<(), NotifyError> {
            Ok(())
        }
    }

    async fn test_state() -> (AppState, ConversationStore) {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let store = ConversationStore::new(pool);
        let pipeline = Arc::new(InboundPipeline::new(
            store.clone(),
            Arc::new(CannedLlm),
            Arc::new(NullSender),
            Arc::new(NullNotifier),
            Arc::new(ConversationLocks::new()),
            "You are a test assistant.".to_string(),
            Duration::from_secs(5),
        ));
        let state = AppState {
            pipeline,
            store: store.clone(),
            verify_token: "test-verify-token".to_string().into(),
            app_secret: "test-app-secret".to_string().into(),
            signing_secret: "test-slack-secret".to_string().into(),
        };
        (state, store)
    }

    fn provider_signature(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac key");
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn signed_headers(secret: &str, body: &[u8]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            SIGNATURE_HEADER,
            provider_signature(secret, body).parse().expect("header value"),
        );
        headers
    }

    #[tokio::test]
    async fn handshake_echoes_challenge_for_correct_token() {
        let (state, _) = test_state().await;

        let params: HandshakeParams = serde_urlencoded::from_str(
            "mode=subscribe&challenge=abc123&verify_token=test-verify-token",
        )
        .expect("params");
        let response = verify_handshake(State(state), Query(params)).await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.expect("body");
        assert_eq!(&body[..], b"abc123");
    }

    #[tokio::test]
    async fn handshake_accepts_provider_prefixed_parameters() {
        let (state, _) = test_state().await;

        let params: HandshakeParams = serde_urlencoded::from_str(
            "hub.mode=subscribe&hub.challenge=ping&hub.verify_token=test-verify-token",
        )
        .expect("params");
        let response = verify_handshake(State(state), Query(params)).await;

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn handshake_rejects_wrong_token() {
        let (state, _) = test_state().await;

        let params: HandshakeParams =
            serde_urlencoded::from_str("mode=subscribe&challenge=abc123&verify_token=WRONG")
                .expect("params");
        let response = verify_handshake(State(state), Query(params)).await;

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn handshake_rejects_wrong_mode() {
        let (state, _) = test_state().await;

        let params: HandshakeParams = serde_urlencoded::from_str(
            "mode=unsubscribe&challenge=abc123&verify_token=test-verify-token",
        )
        .expect("params");
        let response = verify_handshake(State(state), Query(params)).await;

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn webhook_rejects_bad_signature() {
        let (state, _) = test_state().await;
        let body = Bytes::from_static(br#"{"object":"whatsapp_business_account"}"#);

        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_HEADER, "sha256=badsignature".parse().expect("header value"));

        let status = receive_webhook(State(state), headers, body).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn webhook_rejects_missing_signature() {
        let (state, _) = test_state().await;
        let body = Bytes::from_static(br#"{"object":"whatsapp_business_account"}"#);

        let status = receive_webhook(State(state), HeaderMap::new(), body).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn webhook_acknowledges_then_processes_asynchronously() {
        let (state, store) = test_state().await;
        let payload = br#"{"object":"whatsapp_business_account","entry":[{"changes":[{"value":{"messages":[
            {"from":"14165551234","id":"wamid.test001","type":"text","text":{"body":"I need a couch removed."}}
        ]}}]}]}"#;
        let headers = signed_headers("test-app-secret", payload);

        let status =
            receive_webhook(State(state), headers, Bytes::from_static(payload)).await;
        assert_eq!(status, StatusCode::OK, "must return 200 immediately regardless of async work");

        // Give the detached task time to run.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(store.message_exists("wamid.test001").await.expect("lookup"));
        let history = store.recent_messages("14165551234", 20).await.expect("history");
        assert_eq!(history.len(), 2, "user message and assistant reply should be stored");
    }

    #[tokio::test]
    async fn status_only_payload_returns_200_and_stores_nothing() {
        let (state, store) = test_state().await;
        let payload = br#"{"object":"whatsapp_business_account","entry":[{"changes":[{"value":{"statuses":[
            {"id":"wamid.status","status":"delivered"}
        ]}}]}]}"#;
        let headers = signed_headers("test-app-secret", payload);

        let status =
            receive_webhook(State(state), headers, Bytes::from_static(payload)).await;
        assert_eq!(status, StatusCode::OK);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!store.message_exists("wamid.status").await.expect("lookup"));
    }
}
