use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Extension, Multipart, Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use kedai_domain::DomainResult;
use kedai_domain::identity::SupportActor;
use kedai_domain::storefront::SupportContext;
use kedai_domain::support::{
    Attachment, AttachmentUpload, ConversationStatus, DEFAULT_ATTACHMENT_FILE_NAME,
};
use kedai_domain::views::{ConversationSummaryView, ConversationView, MessageView};
use serde::Deserialize;
use validator::Validate;

use super::{
    GuestTokenQuery, agent_actor, customer_or_guest_actor, guest_token, map_domain_error,
    principal_actor, validate_input,
};
use crate::middleware::AuthContext;
use crate::{error::ApiError, middleware as app_middleware, observability, state::AppState};

pub(super) fn routes(state: &AppState) -> Router<AppState> {
    let upload_limit = DefaultBodyLimit::max(state.config.support_upload_body_limit_bytes);

    let agent = Router::new()
        .route("/api/support/agent/queue", get(agent_queue))
        .route(
            "/api/support/agent/conversations/:conversation_id/claim",
            post(agent_claim),
        )
        .route(
            "/api/support/agent/conversations/:conversation_id/close",
            post(agent_close),
        )
        .route(
            "/api/support/agent/conversations/:conversation_id/messages",
            get(agent_list_messages).post(agent_send_text),
        )
        .route(
            "/api/support/agent/conversations/:conversation_id/attachments",
            post(agent_upload_attachment).layer(upload_limit.clone()),
        )
        .route(
            "/api/support/agent/conversations/:conversation_id/context",
            get(agent_context),
        )
        .route(
            "/api/support/agent/attachments/:attachment_id",
            get(agent_download_attachment),
        )
        .route_layer(middleware::from_fn(app_middleware::require_agent_middleware));

    Router::new()
        .route("/api/support/conversations/start", post(start_conversation))
        .route(
            "/api/support/conversations/:conversation_id/messages",
            get(list_messages).post(send_text),
        )
        .route(
            "/api/support/conversations/:conversation_id/attachments",
            post(upload_attachment).layer(upload_limit),
        )
        .route(
            "/api/support/conversations/:conversation_id/context",
            get(conversation_context),
        )
        .route(
            "/api/support/conversations/:conversation_id/close",
            post(close_conversation),
        )
        .route(
            "/api/support/attachments/:attachment_id",
            get(download_attachment),
        )
        .merge(agent)
}

fn record<T>(event: &'static str, result: DomainResult<T>) -> Result<T, ApiError> {
    match result {
        Ok(value) => {
            observability::register_support_event(event, "ok");
            Ok(value)
        }
        Err(err) => {
            let err = map_domain_error(err);
            observability::register_support_event(event, err.error_code());
            Err(err)
        }
    }
}

async fn start_conversation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<GuestTokenQuery>,
    headers: HeaderMap,
) -> Result<Json<ConversationView>, ApiError> {
    let actor = principal_actor(&auth, guest_token(&headers, &query));
    let conversation = record("start", state.support.start(&actor).await)?;
    Ok(Json(ConversationView::for_owner(&conversation)))
}

async fn list_messages(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(conversation_id): Path<String>,
    Query(query): Query<GuestTokenQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<MessageView>>, ApiError> {
    let actor = customer_or_guest_actor(&auth, guest_token(&headers, &query));
    list_messages_as(&state, &conversation_id, &actor).await
}

async fn send_text(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(conversation_id): Path<String>,
    Query(query): Query<GuestTokenQuery>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<MessageView>, ApiError> {
    let actor = customer_or_guest_actor(&auth, guest_token(&headers, &query));
    send_text_as(&state, &conversation_id, &actor, multipart).await
}

async fn upload_attachment(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(conversation_id): Path<String>,
    Query(query): Query<GuestTokenQuery>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<MessageView>, ApiError> {
    let actor = customer_or_guest_actor(&auth, guest_token(&headers, &query));
    upload_attachment_as(&state, &conversation_id, &actor, multipart).await
}

async fn conversation_context(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(conversation_id): Path<String>,
    Query(query): Query<GuestTokenQuery>,
    headers: HeaderMap,
) -> Result<Json<SupportContext>, ApiError> {
    let actor = customer_or_guest_actor(&auth, guest_token(&headers, &query));
    let context = record("context", state.support.context(&conversation_id, &actor).await)?;
    Ok(Json(context))
}

async fn close_conversation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(conversation_id): Path<String>,
    Query(query): Query<GuestTokenQuery>,
    headers: HeaderMap,
) -> Result<Json<ConversationView>, ApiError> {
    let actor = customer_or_guest_actor(&auth, guest_token(&headers, &query));
    let conversation = record("close", state.support.close(&conversation_id, &actor).await)?;
    Ok(Json(ConversationView::for_owner(&conversation)))
}

async fn download_attachment(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(attachment_id): Path<String>,
    Query(query): Query<GuestTokenQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let actor = customer_or_guest_actor(&auth, guest_token(&headers, &query));
    download_as(&state, &attachment_id, &actor).await
}

#[derive(Debug, Default, Deserialize, Validate)]
struct QueueQuery {
    #[validate(length(min = 1, max = 16))]
    status: Option<String>,
}

async fn agent_queue(
    State(state): State<AppState>,
    Query(query): Query<QueueQuery>,
) -> Result<Json<Vec<ConversationSummaryView>>, ApiError> {
    validate_input(&query)?;
    let status = match query.status.as_deref() {
        Some(raw) => Some(ConversationStatus::parse(raw).ok_or_else(|| {
            ApiError::Validation(format!("unknown conversation status: {raw}"))
        })?),
        None => None,
    };
    let summaries = record("queue", state.support.agent_queue(status).await)?;
    Ok(Json(
        summaries.iter().map(ConversationSummaryView::from).collect(),
    ))
}

async fn agent_claim(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(conversation_id): Path<String>,
) -> Result<Json<ConversationView>, ApiError> {
    let SupportActor::Agent { username } = agent_actor(&auth)? else {
        return Err(ApiError::Unauthorized);
    };
    let conversation = record("claim", state.support.claim(&conversation_id, &username).await)?;
    Ok(Json(ConversationView::for_agent(&conversation)))
}

async fn agent_close(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(conversation_id): Path<String>,
) -> Result<Json<ConversationView>, ApiError> {
    let actor = agent_actor(&auth)?;
    let conversation = record("close", state.support.close(&conversation_id, &actor).await)?;
    Ok(Json(ConversationView::for_agent(&conversation)))
}

async fn agent_list_messages(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(conversation_id): Path<String>,
) -> Result<Json<Vec<MessageView>>, ApiError> {
    let actor = agent_actor(&auth)?;
    list_messages_as(&state, &conversation_id, &actor).await
}

async fn agent_send_text(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(conversation_id): Path<String>,
    multipart: Multipart,
) -> Result<Json<MessageView>, ApiError> {
    let actor = agent_actor(&auth)?;
    send_text_as(&state, &conversation_id, &actor, multipart).await
}

async fn agent_upload_attachment(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(conversation_id): Path<String>,
    multipart: Multipart,
) -> Result<Json<MessageView>, ApiError> {
    let actor = agent_actor(&auth)?;
    upload_attachment_as(&state, &conversation_id, &actor, multipart).await
}

async fn agent_context(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(conversation_id): Path<String>,
) -> Result<Json<SupportContext>, ApiError> {
    let actor = agent_actor(&auth)?;
    let context = record("context", state.support.context(&conversation_id, &actor).await)?;
    Ok(Json(context))
}

async fn agent_download_attachment(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(attachment_id): Path<String>,
) -> Result<Response, ApiError> {
    let actor = agent_actor(&auth)?;
    download_as(&state, &attachment_id, &actor).await
}

async fn list_messages_as(
    state: &AppState,
    conversation_id: &str,
    actor: &SupportActor,
) -> Result<Json<Vec<MessageView>>, ApiError> {
    let messages = record(
        "list_messages",
        state.support.list_messages(conversation_id, actor).await,
    )?;
    Ok(Json(messages.iter().map(MessageView::from).collect()))
}

async fn send_text_as(
    state: &AppState,
    conversation_id: &str,
    actor: &SupportActor,
    mut multipart: Multipart,
) -> Result<Json<MessageView>, ApiError> {
    let mut text = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() == Some("text") {
            text = Some(field.text().await.map_err(multipart_error)?);
        }
    }
    let text = text.ok_or_else(|| ApiError::Validation("text is required".into()))?;
    let message = record(
        "send_text",
        state.support.send_text(conversation_id, actor, &text).await,
    )?;
    Ok(Json(MessageView::from(&message)))
}

async fn upload_attachment_as(
    state: &AppState,
    conversation_id: &str,
    actor: &SupportActor,
    mut multipart: Multipart,
) -> Result<Json<MessageView>, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let data = field.bytes().await.map_err(multipart_error)?;
        upload = Some(AttachmentUpload {
            file_name,
            content_type,
            data: data.to_vec(),
        });
    }
    let message = record(
        "upload_attachment",
        state
            .support
            .upload_attachment(conversation_id, actor, upload)
            .await,
    )?;
    Ok(Json(MessageView::from(&message)))
}

async fn download_as(
    state: &AppState,
    attachment_id: &str,
    actor: &SupportActor,
) -> Result<Response, ApiError> {
    let attachment = record(
        "download_attachment",
        state.support.download_attachment(attachment_id, actor).await,
    )?;
    attachment_response(attachment)
}

fn attachment_response(attachment: Attachment) -> Result<Response, ApiError> {
    let content_type = HeaderValue::from_str(&attachment.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    let disposition = HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"",
        disposition_file_name(&attachment.file_name)
    ))
    .map_err(|err| {
        tracing::error!(error = %err, "attachment disposition header rejected");
        ApiError::Internal
    })?;

    let mut response = Body::from(attachment.data.to_vec()).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(attachment.size));
    Ok(response)
}

fn disposition_file_name(file_name: &str) -> String {
    let cleaned: String = file_name
        .chars()
        .map(|ch| match ch {
            '"' | '\\' => '_',
            ch if ch.is_ascii_graphic() || ch == ' ' => ch,
            _ => '_',
        })
        .collect();
    if cleaned.trim().is_empty() {
        DEFAULT_ATTACHMENT_FILE_NAME.to_string()
    } else {
        cleaned
    }
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError::Validation(err.body_text())
}
