use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::{json, Map, Value};

use crate::{
    auth::{require_role, Role},
    db::db_pool,
    error::AppResult,
    repository::table_service::{create_row, delete_row, get_row, list_rows, update_row},
    schemas::{
        check_blog_title, clamp_limit, validate_input, BlogPostPath, CreateBlogPostInput,
        ListQuery, UpdateBlogPostInput,
    },
    state::AppState,
};

const EXCERPT_CHARS: usize = 200;

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/blog", axum::routing::get(list_posts).post(create_post))
        .route(
            "/blog/{post_id}",
            axum::routing::get(get_post)
                .patch(update_post)
                .delete(delete_post),
        )
}

async fn list_posts(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Value>> {
    let rows = list_rows(
        db_pool(&state)?,
        "blog_posts",
        None,
        clamp_limit(query.limit),
        query.offset,
        "created_at",
        false,
    )
    .await?;
    let posts = rows.iter().map(post_summary).collect::<Vec<_>>();
    Ok(Json(json!({ "data": posts })))
}

async fn get_post(
    State(state): State<AppState>,
    Path(path): Path<BlogPostPath>,
) -> AppResult<Json<Value>> {
    let post = get_row(
        db_pool(&state)?,
        "blog_posts",
        &path.post_id.to_string(),
        "id",
    )
    .await?;
    Ok(Json(post))
}

async fn create_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateBlogPostInput>,
) -> AppResult<impl IntoResponse> {
    let admin = require_role(&state, &headers, Role::Admin)?;
    validate_input(&payload)?;
    let title = check_blog_title(&payload.title)?;

    let mut record = Map::new();
    record.insert("title".to_string(), Value::String(title));
    record.insert("content".to_string(), json!(payload.content));
    record.insert(
        "created_by".to_string(),
        Value::String(admin.id.to_string()),
    );
    let created = create_row(db_pool(&state)?, "blog_posts", &record).await?;
    tracing::info!(admin_id = %admin.id, "Published blog post");
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_post(
    State(state): State<AppState>,
    Path(path): Path<BlogPostPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateBlogPostInput>,
) -> AppResult<Json<Value>> {
    require_role(&state, &headers, Role::Admin)?;
    validate_input(&payload)?;

    let mut patch = Map::new();
    if let Some(title) = &payload.title {
        patch.insert("title".to_string(), Value::String(check_blog_title(title)?));
    }
    if let Some(content) = &payload.content {
        patch.insert("content".to_string(), json!(content));
    }
    patch.insert(
        "updated_at".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );

    let updated = update_row(
        db_pool(&state)?,
        "blog_posts",
        &path.post_id.to_string(),
        &patch,
        "id",
    )
    .await?;
    Ok(Json(updated))
}

async fn delete_post(
    State(state): State<AppState>,
    Path(path): Path<BlogPostPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let admin = require_role(&state, &headers, Role::Admin)?;
    let deleted = delete_row(
        db_pool(&state)?,
        "blog_posts",
        &path.post_id.to_string(),
        "id",
    )
    .await?;
    tracing::info!(post_id = %path.post_id, admin_id = %admin.id, "Deleted blog post");
    Ok(Json(deleted))
}

/// Listing shape: the first text block trimmed to an excerpt and the first
/// image as the cover.
fn post_summary(post: &Value) -> Value {
    let blocks = post
        .get("content")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let first_of = |kind: &str, field: &str| {
        blocks
            .iter()
            .find(|block| block.get("type").and_then(Value::as_str) == Some(kind))
            .and_then(|block| block.get(field))
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    let excerpt = first_of("text", "text")
        .map(|text| text.chars().take(EXCERPT_CHARS).collect::<String>())
        .unwrap_or_default();

    json!({
        "id": post.get("id").cloned().unwrap_or(Value::Null),
        "title": post.get("title").cloned().unwrap_or(Value::Null),
        "excerpt": excerpt,
        "cover": first_of("image", "image"),
        "created_at": post.get("created_at").cloned().unwrap_or(Value::Null),
    })
}
