use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Extension, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use kedai_domain::DomainResult;
use kedai_domain::error::DomainError;
use kedai_domain::realtime::{SupportEvent, Topic};
use kedai_domain::support::Conversation;
use kedai_domain::views::MessageView;
use kedai_infra::realtime::{Delivery, Subscription};
use serde::{Deserialize, Serialize};
use tokio::time::{MissedTickBehavior, interval};
use tokio_stream::StreamMap;
use validator::Validate;

use super::{GuestTokenQuery, guest_token, map_domain_error, principal_actor, validate_input};
use crate::middleware::AuthContext;
use crate::{observability, state::AppState};

const LAGGED_CODE: &str = "subscriber_lagged";

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Subscribe(SubscribeFrame),
    Unsubscribe(UnsubscribeFrame),
    Send(SendFrame),
}

#[derive(Debug, Deserialize, Validate)]
struct SubscribeFrame {
    #[validate(length(min = 1, max = 256))]
    topic: String,
    guest_token: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
struct UnsubscribeFrame {
    #[validate(length(min = 1, max = 256))]
    topic: String,
}

#[derive(Debug, Deserialize, Validate)]
struct SendFrame {
    #[validate(length(min = 1, max = 128))]
    conversation_id: String,
    text: String,
    guest_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerFrame<'a> {
    Subscribed { topic: String },
    Unsubscribed { topic: String },
    Event { topic: &'a str, payload: &'a SupportEvent },
    Ack { message: MessageView },
    Error { code: &'static str, message: String },
}

impl ServerFrame<'_> {
    fn error(code: &'static str, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    fn from_domain(err: DomainError) -> Self {
        let err = map_domain_error(err);
        Self::error(err.error_code(), err.to_string())
    }
}

/// Caller identity captured at upgrade time.
struct Principal {
    auth: AuthContext,
    guest_token: Option<String>,
}

pub(super) async fn support_ws(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<GuestTokenQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let principal = Principal {
        guest_token: guest_token(&headers, &query),
        auth,
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, principal))
}

async fn handle_socket(socket: WebSocket, state: AppState, principal: Principal) {
    let (mut sender, mut incoming) = socket.split();
    let mut subscriptions: StreamMap<String, Subscription> = StreamMap::new();
    let mut heartbeat = interval(Duration::from_secs(
        state.config.realtime_heartbeat_secs.max(1),
    ));
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;
    observability::register_realtime_connection("opened");

    loop {
        tokio::select! {
            frame = incoming.next() => {
                let raw = match frame {
                    Some(Ok(Message::Text(raw))) => raw,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => {
                        tracing::debug!(error = %err, "support websocket receive failed");
                        break;
                    }
                };
                let reply = handle_client_frame(&state, &principal, &mut subscriptions, &raw).await;
                if send_frame(&mut sender, &reply).await.is_err() {
                    break;
                }
            }
            Some((topic, delivery)) = subscriptions.next(), if !subscriptions.is_empty() => {
                let sent = match delivery {
                    Delivery::Event(envelope) => {
                        send_frame(
                            &mut sender,
                            &ServerFrame::Event {
                                topic: &envelope.topic,
                                payload: &envelope.payload,
                            },
                        )
                        .await
                    }
                    Delivery::Evicted => {
                        subscriptions.remove(&topic);
                        observability::register_realtime_connection("evicted");
                        send_frame(
                            &mut sender,
                            &ServerFrame::error(
                                LAGGED_CODE,
                                format!("subscription to {topic} dropped; resubscribe to continue"),
                            ),
                        )
                        .await
                    }
                };
                if sent.is_err() {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    observability::register_realtime_connection("closed");
    tracing::debug!(subscriptions = subscriptions.len(), "support websocket closed");
}

async fn handle_client_frame<'a>(
    state: &AppState,
    principal: &Principal,
    subscriptions: &mut StreamMap<String, Subscription>,
    raw: &str,
) -> ServerFrame<'a> {
    let frame = match serde_json::from_str::<ClientFrame>(raw) {
        Ok(frame) => frame,
        Err(err) => return ServerFrame::error("invalid_frame", err.to_string()),
    };

    match frame {
        ClientFrame::Subscribe(frame) => subscribe(state, principal, subscriptions, frame).await,
        ClientFrame::Unsubscribe(frame) => {
            if let Err(err) = validate_input(&frame) {
                return ServerFrame::error(err.error_code(), err.to_string());
            }
            let topic = Topic::parse(&frame.topic)
                .map(|topic| topic.to_string())
                .unwrap_or_else(|| frame.topic.trim().to_string());
            subscriptions.remove(&topic);
            ServerFrame::Unsubscribed { topic }
        }
        ClientFrame::Send(frame) => {
            if let Err(err) = validate_input(&frame) {
                return ServerFrame::error(err.error_code(), err.to_string());
            }
            let token = frame.guest_token.or_else(|| principal.guest_token.clone());
            let actor = principal_actor(&principal.auth, token);
            match state
                .support
                .send_text(&frame.conversation_id, &actor, &frame.text)
                .await
            {
                Ok(message) => {
                    observability::register_support_event("send_text", "ok");
                    ServerFrame::Ack {
                        message: MessageView::from(&message),
                    }
                }
                Err(err) => ServerFrame::from_domain(err),
            }
        }
    }
}

async fn subscribe<'a>(
    state: &AppState,
    principal: &Principal,
    subscriptions: &mut StreamMap<String, Subscription>,
    frame: SubscribeFrame,
) -> ServerFrame<'a> {
    if let Err(err) = validate_input(&frame) {
        return ServerFrame::error(err.error_code(), err.to_string());
    }
    let Some(topic) = Topic::parse(&frame.topic) else {
        return ServerFrame::error("invalid_topic", format!("unknown topic {}", frame.topic));
    };

    let conversation = match state.support.get_conversation(topic.conversation_id()).await {
        Ok(conversation) => conversation,
        Err(err) => return ServerFrame::from_domain(err),
    };
    if let Err(err) =
        authorize_subscription(state, principal, &topic, &conversation, frame.guest_token).await
    {
        return ServerFrame::from_domain(err);
    }

    let key = topic.to_string();
    if !subscriptions.contains_key(&key) {
        subscriptions.insert(key.clone(), state.realtime.subscribe(&topic));
        tracing::debug!(
            topic = %key,
            subscribers = state.realtime.subscriber_count(&topic),
            "support websocket subscribed"
        );
    }
    ServerFrame::Subscribed { topic: key }
}

/// Status topics are open to any agent, matching what the queue shows.
/// Message topics need the same access as reading the messages.
async fn authorize_subscription(
    state: &AppState,
    principal: &Principal,
    topic: &Topic,
    conversation: &Conversation,
    guest_token: Option<String>,
) -> DomainResult<()> {
    if principal.auth.is_support_agent() && matches!(topic, Topic::Status(_)) {
        return Ok(());
    }
    let token = guest_token.or_else(|| principal.guest_token.clone());
    let actor = principal_actor(&principal.auth, token);
    state.support.assert_access(conversation, &actor).await?;
    Ok(())
}

async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    frame: &ServerFrame<'_>,
) -> Result<(), axum::Error> {
    let payload = match serde_json::to_string(frame) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::error!(error = %err, "failed to encode realtime frame");
            return Ok(());
        }
    };
    sender.send(Message::Text(payload)).await
}
