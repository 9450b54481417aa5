use crate::board::Submission;
use crate::models::{
    Capcode, CatalogEntry, IndexPage, Mention, PendingQueue, PostLocation, PostView, Setting, ThreadSummary,
    ThreadView,
};
use crate::word_filter::{FilterKind, WordFilters};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::list_threads,
        crate::routes::catalog,
        crate::routes::get_thread,
        crate::routes::locate_post,
        crate::routes::create_thread,
        crate::routes::create_reply,
        crate::routes::delete_own_post,
        crate::routes::upload_media,
        crate::routes::mod_pending,
        crate::routes::mod_list_threads,
        crate::routes::mod_get_thread,
        crate::routes::mod_create_thread,
        crate::routes::mod_create_reply,
        crate::routes::approve_post,
        crate::routes::reject_post,
        crate::routes::mod_soft_delete,
        crate::routes::hard_delete_post,
        crate::routes::edit_post,
        crate::routes::toggle_lock,
        crate::routes::set_lock,
        crate::routes::toggle_sticky,
        crate::routes::set_sticky,
        crate::routes::list_settings,
        crate::routes::update_setting,
        crate::routes::list_word_filters,
        crate::routes::add_word_filter,
        crate::routes::remove_word_filter,
    ),
    components(schemas(
        Submission, Capcode, PostView, ThreadSummary, IndexPage, CatalogEntry, ThreadView,
        PostLocation, PendingQueue, Mention, Setting, WordFilters, FilterKind,
        crate::routes::CreatedPost, crate::routes::DeleteRequest, crate::routes::DeleteOutcome,
        crate::routes::PurgeOutcome, crate::routes::EditRequest, crate::routes::FlagRequest,
        crate::routes::FlagResponse, crate::routes::SettingUpdate, crate::routes::WordFilterRequest,
        crate::routes::MediaUploadResponse, crate::error::ApiErrorBody,
    )),
    modifiers(&BearerScheme),
    tags(
        (name = "board", description = "Public reading and posting"),
        (name = "moderation", description = "Moderator tooling"),
    )
)]
pub struct ApiDoc;

struct BearerScheme;

impl Modify for BearerScheme {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).bearer_format("JWT").build()),
            );
        }
    }
}
