use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures_util::TryStreamExt as _;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::ModAuth;
use crate::board::{Board, Submission};
use crate::error::ApiError;
use crate::models::*;
use crate::session::Session;
use crate::storage::MediaError;
use crate::word_filter::WordFilters;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(
                web::resource("/threads")
                    .route(web::get().to(list_threads))
                    .route(web::post().to(create_thread)),
            )
            .service(web::resource("/catalog").route(web::get().to(catalog)))
            .service(web::resource("/threads/{id}").route(web::get().to(get_thread)))
            .service(web::resource("/threads/{id}/replies").route(web::post().to(create_reply)))
            .service(web::resource("/posts/{id}/locate").route(web::get().to(locate_post)))
            .service(web::resource("/posts/{id}/delete").route(web::post().to(delete_own_post)))
            .service(web::resource("/media").route(web::post().to(upload_media)))
            // moderation
            .service(web::resource("/mod/pending").route(web::get().to(mod_pending)))
            .service(
                web::resource("/mod/threads")
                    .route(web::get().to(mod_list_threads))
                    .route(web::post().to(mod_create_thread)),
            )
            .service(web::resource("/mod/threads/{id}").route(web::get().to(mod_get_thread)))
            .service(web::resource("/mod/threads/{id}/replies").route(web::post().to(mod_create_reply)))
            .service(
                web::resource("/mod/threads/{id}/lock")
                    .route(web::post().to(toggle_lock))
                    .route(web::put().to(set_lock)),
            )
            .service(
                web::resource("/mod/threads/{id}/sticky")
                    .route(web::post().to(toggle_sticky))
                    .route(web::put().to(set_sticky)),
            )
            .service(web::resource("/mod/posts/{id}/approve").route(web::post().to(approve_post)))
            .service(web::resource("/mod/posts/{id}/reject").route(web::post().to(reject_post)))
            .service(web::resource("/mod/posts/{id}/soft-delete").route(web::post().to(mod_soft_delete)))
            .service(
                web::resource("/mod/posts/{id}")
                    .route(web::delete().to(hard_delete_post))
                    .route(web::patch().to(edit_post)),
            )
            .service(
                web::resource("/mod/settings")
                    .route(web::get().to(list_settings))
                    .route(web::put().to(update_setting)),
            )
            .service(
                web::resource("/mod/word-filters")
                    .route(web::get().to(list_word_filters))
                    .route(web::post().to(add_word_filter))
                    .route(web::delete().to(remove_word_filter)),
            ),
    );
    // outside /api/v1 so stored paths like `media/<name>` resolve directly
    cfg.route("/media/{name}", web::get().to(get_media));
}

#[derive(Clone)]
pub struct AppState {
    pub board: Board,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreatedPost {
    pub id: Id,
    pub thread_id: Id,
    /// False when the post waits in the moderation queue.
    pub approved: bool,
}

impl From<&Post> for CreatedPost {
    fn from(p: &Post) -> Self {
        Self { id: p.id, thread_id: p.thread_id(), approved: p.approved }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DeleteRequest {
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeleteOutcome {
    pub id: Id,
    /// False when the post had already been deleted.
    pub deleted: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PurgeOutcome {
    pub id: Id,
    /// Rows removed, the post itself included.
    pub removed: usize,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct EditRequest {
    pub message: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct FlagRequest {
    pub value: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FlagResponse {
    pub thread_id: Id,
    /// New flag value; null when the id is not a thread.
    pub value: Option<bool>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SettingUpdate {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct WordFilterRequest {
    pub word: String,
    /// `exact` or `contains`.
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MediaUploadResponse {
    /// Pass this as `media` when creating a post.
    pub name: String,
    pub mime: String,
    pub size: usize,
    pub media: String,
    pub thumb: Option<String>,
}

// ---------------- public reads ----------------

#[utoipa::path(
    get,
    path = "/api/v1/threads",
    tag = "board",
    params(("page" = Option<i64>, Query, description = "1-based page number")),
    responses((status = 200, description = "Index page", body = IndexPage))
)]
pub async fn list_threads(data: web::Data<AppState>, query: web::Query<PageQuery>) -> Result<HttpResponse, ApiError> {
    let page = data.board.index_page(Visibility::Public, query.page.unwrap_or(1)).await?;
    Ok(HttpResponse::Ok().json(page))
}

#[utoipa::path(
    get,
    path = "/api/v1/catalog",
    tag = "board",
    responses((status = 200, description = "Catalog", body = [CatalogEntry]))
)]
pub async fn catalog(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(data.board.catalog(Visibility::Public).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/threads/{id}",
    tag = "board",
    params(("id" = Id, Path, description = "Thread id")),
    responses(
        (status = 200, description = "Thread with replies", body = ThreadView),
        (status = 404, description = "Thread not found")
    )
)]
pub async fn get_thread(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(data.board.thread_view(Visibility::Public, path.into_inner()).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/posts/{id}/locate",
    tag = "board",
    params(("id" = Id, Path, description = "Post id")),
    responses(
        (status = 200, description = "Containing thread", body = PostLocation),
        (status = 404, description = "Post not found")
    )
)]
pub async fn locate_post(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(data.board.locate(Visibility::Public, path.into_inner()).await?))
}

// ---------------- public writes ----------------

#[utoipa::path(
    post,
    path = "/api/v1/threads",
    tag = "board",
    request_body = Submission,
    responses(
        (status = 201, description = "Thread created", body = CreatedPost),
        (status = 400, description = "Invalid submission"),
        (status = 403, description = "Read-only mode or blocked word"),
        (status = 429, description = "Posting too fast")
    )
)]
pub async fn create_thread(
    session: Session,
    data: web::Data<AppState>,
    payload: web::Json<Submission>,
) -> Result<HttpResponse, ApiError> {
    let post = data.board.create_thread(&session.0, payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(CreatedPost::from(&post)))
}

#[utoipa::path(
    post,
    path = "/api/v1/threads/{id}/replies",
    tag = "board",
    params(("id" = Id, Path, description = "Thread id")),
    request_body = Submission,
    responses(
        (status = 201, description = "Reply created", body = CreatedPost),
        (status = 403, description = "Thread locked, read-only mode or blocked word"),
        (status = 404, description = "Thread not found"),
        (status = 429, description = "Posting too fast")
    )
)]
pub async fn create_reply(
    session: Session,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<Submission>,
) -> Result<HttpResponse, ApiError> {
    let post = data.board.create_reply(&session.0, path.into_inner(), payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(CreatedPost::from(&post)))
}

#[utoipa::path(
    post,
    path = "/api/v1/posts/{id}/delete",
    tag = "board",
    params(("id" = Id, Path, description = "Post id")),
    request_body = DeleteRequest,
    responses(
        (status = 200, description = "Deleted", body = DeleteOutcome),
        (status = 403, description = "Not authorized")
    )
)]
pub async fn delete_own_post(
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<DeleteRequest>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let deleted = data.board.delete_own_post(id, &payload.password).await?;
    Ok(HttpResponse::Ok().json(DeleteOutcome { id, deleted }))
}

#[utoipa::path(
    post,
    path = "/api/v1/media",
    tag = "board",
    responses(
        (status = 201, description = "File stored", body = MediaUploadResponse),
        (status = 403, description = "Board is read-only"),
        (status = 413, description = "Payload too large"),
        (status = 429, description = "Posting too fast"),
        (status = 415, description = "Unsupported media type")
    )
)]
pub async fn upload_media(
    data: web::Data<AppState>,
    session: Session,
    moderator: Option<ModAuth>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let limit = data.board.max_upload_bytes();
    while let Some(mut field) = payload.try_next().await.map_err(|e| {
        log::error!("multipart error: {e}");
        ApiError::BadRequest("malformed multipart body".into())
    })? {
        if field.content_disposition().get_name() != Some("file") {
            continue;
        }
        let mut bytes: Vec<u8> = Vec::new();
        while let Some(chunk) = field.try_next().await.map_err(|e| {
            log::error!("stream read error: {e}");
            ApiError::BadRequest("upload interrupted".into())
        })? {
            if bytes.len() + chunk.len() > limit {
                return Err(MediaError::TooLarge { limit }.into());
            }
            bytes.extend_from_slice(&chunk);
        }
        let moderator = moderator.as_ref().map(|m| &m.moderator);
        let stored = data.board.upload(&session.0, moderator, &bytes).await?;
        return Ok(HttpResponse::Created().json(MediaUploadResponse {
            name: stored.name,
            mime: stored.mime,
            size: stored.size,
            media: stored.attachment.media,
            thumb: stored.attachment.thumb,
        }));
    }
    Err(ApiError::BadRequest("missing 'file' field".into()))
}

pub async fn get_media(data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let name = path.into_inner();
    let (bytes, mime) = data.board.media().load(&name).await?;
    Ok(HttpResponse::Ok().insert_header(("Content-Type", mime)).body(bytes))
}

// ---------------- moderator ----------------

#[utoipa::path(
    get,
    path = "/api/v1/mod/pending",
    tag = "moderation",
    responses(
        (status = 200, description = "Posts awaiting approval", body = PendingQueue),
        (status = 401, description = "Missing or invalid token"),
        (status = 403, description = "Not a moderator")
    ),
    security(("bearer" = []))
)]
pub async fn mod_pending(_auth: ModAuth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(data.board.pending().await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/mod/threads",
    tag = "moderation",
    params(("page" = Option<i64>, Query, description = "1-based page number")),
    responses((status = 200, description = "Index page including pending posts", body = IndexPage)),
    security(("bearer" = []))
)]
pub async fn mod_list_threads(
    _auth: ModAuth,
    data: web::Data<AppState>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, ApiError> {
    let page = data.board.index_page(Visibility::Moderator, query.page.unwrap_or(1)).await?;
    Ok(HttpResponse::Ok().json(page))
}

#[utoipa::path(
    get,
    path = "/api/v1/mod/threads/{id}",
    tag = "moderation",
    params(("id" = Id, Path, description = "Thread id")),
    responses(
        (status = 200, description = "Thread including pending replies", body = ThreadView),
        (status = 404, description = "Thread not found")
    ),
    security(("bearer" = []))
)]
pub async fn mod_get_thread(_auth: ModAuth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(data.board.thread_view(Visibility::Moderator, path.into_inner()).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/mod/threads",
    tag = "moderation",
    request_body = Submission,
    responses((status = 201, description = "Capcoded thread created", body = CreatedPost)),
    security(("bearer" = []))
)]
pub async fn mod_create_thread(
    auth: ModAuth,
    data: web::Data<AppState>,
    payload: web::Json<Submission>,
) -> Result<HttpResponse, ApiError> {
    let post = data.board.mod_create_thread(&auth.moderator, payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(CreatedPost::from(&post)))
}

#[utoipa::path(
    post,
    path = "/api/v1/mod/threads/{id}/replies",
    tag = "moderation",
    params(("id" = Id, Path, description = "Thread id")),
    request_body = Submission,
    responses(
        (status = 201, description = "Capcoded reply created", body = CreatedPost),
        (status = 403, description = "Thread locked"),
        (status = 404, description = "Thread not found")
    ),
    security(("bearer" = []))
)]
pub async fn mod_create_reply(
    auth: ModAuth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<Submission>,
) -> Result<HttpResponse, ApiError> {
    let post = data.board.mod_create_reply(&auth.moderator, path.into_inner(), payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(CreatedPost::from(&post)))
}

#[utoipa::path(
    post,
    path = "/api/v1/mod/posts/{id}/approve",
    tag = "moderation",
    params(("id" = Id, Path, description = "Post id")),
    responses(
        (status = 200, description = "Approved", body = PostView),
        (status = 404, description = "Post not found")
    ),
    security(("bearer" = []))
)]
pub async fn approve_post(_auth: ModAuth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let post = data.board.approve(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(post.view(Vec::new())))
}

#[utoipa::path(
    post,
    path = "/api/v1/mod/posts/{id}/reject",
    tag = "moderation",
    params(("id" = Id, Path, description = "Post id")),
    responses(
        (status = 200, description = "Rejected and removed", body = PurgeOutcome),
        (status = 404, description = "Post not found")
    ),
    security(("bearer" = []))
)]
pub async fn reject_post(_auth: ModAuth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let removed = data.board.reject(id).await?;
    Ok(HttpResponse::Ok().json(PurgeOutcome { id, removed }))
}

#[utoipa::path(
    post,
    path = "/api/v1/mod/posts/{id}/soft-delete",
    tag = "moderation",
    params(("id" = Id, Path, description = "Post id")),
    responses(
        (status = 200, description = "Deleted", body = DeleteOutcome),
        (status = 404, description = "Post not found")
    ),
    security(("bearer" = []))
)]
pub async fn mod_soft_delete(_auth: ModAuth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let deleted = data.board.mod_soft_delete(id).await?;
    Ok(HttpResponse::Ok().json(DeleteOutcome { id, deleted }))
}

#[utoipa::path(
    delete,
    path = "/api/v1/mod/posts/{id}",
    tag = "moderation",
    params(("id" = Id, Path, description = "Post id")),
    responses(
        (status = 200, description = "Removed with dependents", body = PurgeOutcome),
        (status = 404, description = "Post not found")
    ),
    security(("bearer" = []))
)]
pub async fn hard_delete_post(_auth: ModAuth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let removed = data.board.hard_delete(id).await?;
    Ok(HttpResponse::Ok().json(PurgeOutcome { id, removed }))
}

#[utoipa::path(
    patch,
    path = "/api/v1/mod/posts/{id}",
    tag = "moderation",
    params(("id" = Id, Path, description = "Post id")),
    request_body = EditRequest,
    responses(
        (status = 200, description = "Edited", body = PostView),
        (status = 400, description = "Invalid message"),
        (status = 404, description = "Post not found")
    ),
    security(("bearer" = []))
)]
pub async fn edit_post(
    _auth: ModAuth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<EditRequest>,
) -> Result<HttpResponse, ApiError> {
    let post = data.board.edit(path.into_inner(), &payload.message).await?;
    Ok(HttpResponse::Ok().json(post.view(Vec::new())))
}

#[utoipa::path(
    post,
    path = "/api/v1/mod/threads/{id}/lock",
    tag = "moderation",
    params(("id" = Id, Path, description = "Thread id")),
    responses((status = 200, description = "Lock flipped", body = FlagResponse)),
    security(("bearer" = []))
)]
pub async fn toggle_lock(_auth: ModAuth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let thread_id = path.into_inner();
    let value = data.board.toggle_lock(thread_id).await?;
    Ok(HttpResponse::Ok().json(FlagResponse { thread_id, value }))
}

#[utoipa::path(
    put,
    path = "/api/v1/mod/threads/{id}/lock",
    tag = "moderation",
    params(("id" = Id, Path, description = "Thread id")),
    request_body = FlagRequest,
    responses((status = 200, description = "Lock set", body = FlagResponse)),
    security(("bearer" = []))
)]
pub async fn set_lock(
    _auth: ModAuth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<FlagRequest>,
) -> Result<HttpResponse, ApiError> {
    let thread_id = path.into_inner();
    let value = data.board.set_locked(thread_id, payload.value).await?;
    Ok(HttpResponse::Ok().json(FlagResponse { thread_id, value }))
}

#[utoipa::path(
    post,
    path = "/api/v1/mod/threads/{id}/sticky",
    tag = "moderation",
    params(("id" = Id, Path, description = "Thread id")),
    responses((status = 200, description = "Sticky flipped", body = FlagResponse)),
    security(("bearer" = []))
)]
pub async fn toggle_sticky(_auth: ModAuth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let thread_id = path.into_inner();
    let value = data.board.toggle_sticky(thread_id).await?;
    Ok(HttpResponse::Ok().json(FlagResponse { thread_id, value }))
}

#[utoipa::path(
    put,
    path = "/api/v1/mod/threads/{id}/sticky",
    tag = "moderation",
    params(("id" = Id, Path, description = "Thread id")),
    request_body = FlagRequest,
    responses((status = 200, description = "Sticky set", body = FlagResponse)),
    security(("bearer" = []))
)]
pub async fn set_sticky(
    _auth: ModAuth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<FlagRequest>,
) -> Result<HttpResponse, ApiError> {
    let thread_id = path.into_inner();
    let value = data.board.set_sticky(thread_id, payload.value).await?;
    Ok(HttpResponse::Ok().json(FlagResponse { thread_id, value }))
}

#[utoipa::path(
    get,
    path = "/api/v1/mod/settings",
    tag = "moderation",
    responses((status = 200, description = "All settings", body = [Setting])),
    security(("bearer" = []))
)]
pub async fn list_settings(_auth: ModAuth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(data.board.settings().list().await?))
}

#[utoipa::path(
    put,
    path = "/api/v1/mod/settings",
    tag = "moderation",
    request_body = SettingUpdate,
    responses((status = 200, description = "Stored value", body = Setting)),
    security(("bearer" = []))
)]
pub async fn update_setting(
    _auth: ModAuth,
    data: web::Data<AppState>,
    payload: web::Json<SettingUpdate>,
) -> Result<HttpResponse, ApiError> {
    let setting = data.board.update_setting(&payload.key, &payload.value).await?;
    Ok(HttpResponse::Ok().json(setting))
}

#[utoipa::path(
    get,
    path = "/api/v1/mod/word-filters",
    tag = "moderation",
    responses((status = 200, description = "Current filters", body = WordFilters)),
    security(("bearer" = []))
)]
pub async fn list_word_filters(_auth: ModAuth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(data.board.word_filters()))
}

#[utoipa::path(
    post,
    path = "/api/v1/mod/word-filters",
    tag = "moderation",
    request_body = WordFilterRequest,
    responses(
        (status = 201, description = "Filters after the addition", body = WordFilters),
        (status = 400, description = "Empty, duplicate or bad filter type")
    ),
    security(("bearer" = []))
)]
pub async fn add_word_filter(
    _auth: ModAuth,
    data: web::Data<AppState>,
    payload: web::Json<WordFilterRequest>,
) -> Result<HttpResponse, ApiError> {
    let filters = data.board.add_word_filter(&payload.word, &payload.kind)?;
    Ok(HttpResponse::Created().json(filters))
}

#[utoipa::path(
    delete,
    path = "/api/v1/mod/word-filters",
    tag = "moderation",
    request_body = WordFilterRequest,
    responses(
        (status = 200, description = "Filters after the removal", body = WordFilters),
        (status = 404, description = "Word not in filter")
    ),
    security(("bearer" = []))
)]
pub async fn remove_word_filter(
    _auth: ModAuth,
    data: web::Data<AppState>,
    payload: web::Json<WordFilterRequest>,
) -> Result<HttpResponse, ApiError> {
    let filters = data.board.remove_word_filter(&payload.word, &payload.kind)?;
    Ok(HttpResponse::Ok().json(filters))
}
