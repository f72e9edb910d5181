use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use clearquote_core::signature;
use clearquote_slack::interaction::{self, InteractionPayload, TakeOverOutcome};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::bootstrap::AppState;

pub const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";
pub const SIGNATURE_HEADER: &str = "x-slack-signature";

#[derive(Debug, Default, Deserialize)]
struct CallbackForm {
    #[serde(default)]
    payload: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackResponse {
    pub replace_original: bool,
    pub text: String,
}

/// `POST /escalation/callback`: the button-press callback from the
/// escalation channel. The channel expects a fast 200 regardless of
/// outcome; only a failing state mutation maps to a server error.
pub async fn escalation_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let timestamp =
        headers.get(TIMESTAMP_HEADER).and_then(|value| value.to_str().ok()).unwrap_or_default();
    let signature_header =
        headers.get(SIGNATURE_HEADER).and_then(|value| value.to_str().ok()).unwrap_or_default();

    if !signature::verify_callback_signature(
        state.signing_secret.expose_secret(),
        timestamp,
        &body,
        signature_header,
        Utc::now().timestamp(),
    ) {
        warn!("rejected escalation callback with missing, stale, or invalid signature");
        return (StatusCode::FORBIDDEN, "forbidden").into_response();
    }

    let Ok(form) = serde_urlencoded::from_bytes::<CallbackForm>(&body) else {
        return (StatusCode::BAD_REQUEST, "bad request").into_response();
    };
    if form.payload.is_empty() {
        return (StatusCode::BAD_REQUEST, "missing payload").into_response();
    }

    let payload: InteractionPayload = match serde_json::from_str(&form.payload) {
        Ok(payload) => payload,
        Err(error) => {
            warn!(error = %error, "unparsable interaction payload");
            return (StatusCode::BAD_REQUEST, "bad request").into_response();
        }
    };
    if payload.actions.is_empty() {
        return (StatusCode::BAD_REQUEST, "no actions").into_response();
    }

    match interaction::apply_take_over(&state.store, &payload).await {
        Ok(outcome) => {
            if let TakeOverOutcome::Paused { operator } = &outcome {
                info!(operator = %operator, "conversation paused by operator");
            }
            match outcome.response_text() {
                Some(text) => {
                    Json(CallbackResponse { replace_original: true, text }).into_response()
                }
                None => StatusCode::OK.into_response(),
            }
        }
        Err(store_error) => {
            error!(error = %store_error, "failed to pause conversation");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Bytes;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use chrono::Utc;
    use clearquote_agent::llm::{LlmClient, LlmError};
    use clearquote_agent::{ConversationLocks, InboundPipeline};
    use clearquote_core::{AgentReply, ConversationState, ExtractedData, Message};
    use clearquote_db::{connect_with_settings, migrations, ConversationStore};
    use clearquote_slack::notifier::{EscalationNotifier, NotifyError};
    use clearquote_whatsapp::sender::{ReplySender, SendError};
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    use super::{escalation_callback, CallbackResponse, SIGNATURE_HEADER, TIMESTAMP_HEADER};
    use crate::bootstrap::AppState;

    struct UnusedLlm;

    #[async_trait]
    impl LlmClient for UnusedLlm {
        async fn complete(
            &self,
            _system_prompt: &str,
            _history: &[Message],
        ) -> Result<AgentReply, LlmError> {
            Err(LlmError::EmptyChoices)
        }
    }

    struct UnusedSender;

    #[async_trait]
    impl ReplySender for UnusedSender {
        async fn send_text(&self, _to: &str, _body: &str) -> Result<(), SendError> {
            Ok(())
        }
    }

    struct UnusedNotifier;

    #[async_trait]
    impl EscalationNotifier for UnusedNotifier {
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
            Arc::new(UnusedLlm),
            Arc::new(UnusedSender),
            Arc::new(UnusedNotifier),
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

    fn callback_signature(secret: &str, timestamp: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac key");
        mac.update(format!("v0:{timestamp}:").as_bytes());
        mac.update(body);
        format!("v0={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn signed_headers(secret: &str, body: &[u8]) -> HeaderMap {
        let timestamp = Utc::now().timestamp().to_string();
        let mut headers = HeaderMap::new();
        headers.insert(TIMESTAMP_HEADER, timestamp.parse().expect("header value"));
        headers.insert(
            SIGNATURE_HEADER,
            callback_signature(secret, &timestamp, body).parse().expect("header value"),
        );
        headers
    }

    fn take_over_body(value: &str) -> Vec<u8> {
        let payload = format!(
            r#"{{"type":"block_actions","user":{{"id":"U123","username":"adriana"}},"actions":[{{"action_id":"take_over_chat","value":"{value}"}}]}}"#
        );
        serde_urlencoded::to_string([("payload", payload.as_str())])
            .expect("form encode")
            .into_bytes()
    }

    async fn decode_response(
        response: axum::response::Response,
    ) -> (StatusCode, Option<CallbackResponse>) {
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 64 * 1024).await.expect("body");
        let decoded = serde_json::from_slice(&body).ok();
        (status, decoded)
    }

    #[tokio::test]
    async fn bad_signature_is_rejected() {
        let (state, _) = test_state().await;
        let body = take_over_body("14165551234");

        let mut headers = HeaderMap::new();
        headers.insert(
            TIMESTAMP_HEADER,
            Utc::now().timestamp().to_string().parse().expect("header value"),
        );
        headers.insert(SIGNATURE_HEADER, "v0=badsignature".parse().expect("header value"));

        let response = escalation_callback(State(state), headers, Bytes::from(body)).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn stale_timestamp_is_rejected() {
        let (state, _) = test_state().await;
        let body = take_over_body("14165551234");

        let stale = (Utc::now().timestamp() - 400).to_string();
        let mut headers = HeaderMap::new();
        headers.insert(TIMESTAMP_HEADER, stale.parse().expect("header value"));
        headers.insert(
            SIGNATURE_HEADER,
            callback_signature("test-slack-secret", &stale, &body)
                .parse()
                .expect("header value"),
        );

        let response = escalation_callback(State(state), headers, Bytes::from(body)).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn take_over_pauses_conversation_and_names_the_operator() {
        let (state, store) = test_state().await;
        store.ensure_conversation("14165551234").await.expect("seed");

        let body = take_over_body("14165551234");
        let headers = signed_headers("test-slack-secret", &body);

        let response = escalation_callback(State(state), headers, Bytes::from(body)).await;
        let (status, decoded) = decode_response(response).await;

        assert_eq!(status, StatusCode::OK);
        let decoded = decoded.expect("json body");
        assert!(decoded.replace_original);
        assert!(decoded.text.contains("adriana"));

        let conversation_state = store.conversation_state("14165551234").await.expect("state");
        assert_eq!(conversation_state, Some(ConversationState::Paused));
    }

    #[tokio::test]
    async fn repeated_take_over_reports_already_paused() {
        let (state, store) = test_state().await;
        store.ensure_conversation("14165551234").await.expect("seed");

        let body = take_over_body("14165551234");
        let headers = signed_headers("test-slack-secret", &body);
        let response =
            escalation_callback(State(state.clone()), headers, Bytes::from(body.clone())).await;
        assert_eq!(response.status(), StatusCode::OK);

        let headers = signed_headers("test-slack-secret", &body);
        let response = escalation_callback(State(state), headers, Bytes::from(body)).await;
        let (status, decoded) = decode_response(response).await;

        assert_eq!(status, StatusCode::OK);
        assert!(decoded.expect("json body").text.contains("already paused"));
        let conversation_state = store.conversation_state("14165551234").await.expect("state");
        assert_eq!(conversation_state, Some(ConversationState::Paused));
    }

    #[tokio::test]
    async fn unknown_conversation_returns_200_with_warning() {
        let (state, _) = test_state().await;

        let body = take_over_body("99999999999");
        let headers = signed_headers("test-slack-secret", &body);

        let response = escalation_callback(State(state), headers, Bytes::from(body)).await;
        let (status, decoded) = decode_response(response).await;

        assert_eq!(status, StatusCode::OK, "the channel expects a fast 200 regardless");
        assert!(decoded.expect("json body").text.contains("not found"));
    }

    #[tokio::test]
    async fn missing_payload_field_is_a_bad_request() {
        let (state, _) = test_state().await;

        let body = b"foo=bar".to_vec();
        let headers = signed_headers("test-slack-secret", &body);

        let response = escalation_callback(State(state), headers, Bytes::from(body)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn empty_action_list_is_a_bad_request() {
        let (state, _) = test_state().await;

        let body = serde_urlencoded::to_string([(
            "payload",
            r#"{"type":"block_actions","user":{"id":"U1","username":"adriana"},"actions":[]}"#,
        )])
        .expect("form encode")
        .into_bytes();
        let headers = signed_headers("test-slack-secret", &body);

        let response = escalation_callback(State(state), headers, Bytes::from(body)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unrelated_action_is_acknowledged_without_a_body() {
        let (state, store) = test_state().await;
        store.ensure_conversation("14165551234").await.expect("seed");

        let body = serde_urlencoded::to_string([(
            "payload",
            r#"{"type":"block_actions","user":{"id":"U1","username":"adriana"},"actions":[{"action_id":"open_dashboard","value":"14165551234"}]}"#,
        )])
        .expect("form encode")
        .into_bytes();
        let headers = signed_headers("test-slack-secret", &body);

        let response = escalation_callback(State(state), headers, Bytes::from(body)).await;
        let (status, decoded) = decode_response(response).await;

        assert_eq!(status, StatusCode::OK);
        assert!(decoded.is_none());
        let conversation_state = store.conversation_state("14165551234").await.expect("state");
        assert_eq!(conversation_state, Some(ConversationState::Active));
    }
}
