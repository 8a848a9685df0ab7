use crate::{
    blog::Blog,
    server::{Result, ServerError, ServerRouter, auth::AuthenticatedUser, json::Json},
};
use axum::extract::State;
use axum_extra::routing::{RouterExt, TypedPath};
use quill_common::model::{
    Id,
    post::{Post, PostDraft, PostMarker},
    read_mark::ReadMark,
};
use serde::Deserialize;
use std::sync::Arc;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(get_post)
        .typed_post(create_post)
        .typed_post(mark_read)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/{id}", rejection(ServerError))]
struct GetPostPath {
    id: Id<PostMarker>,
}

async fn get_post(
    GetPostPath { id }: GetPostPath,
    State(blog): State<Arc<Blog>>,
    _user: AuthenticatedUser,
) -> Result<Json<Post>> {
    let post = blog.post(id).await?;

    Ok(Json(post))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/create", rejection(ServerError))]
struct CreatePostPath();

async fn create_post(
    CreatePostPath(): CreatePostPath,
    State(blog): State<Arc<Blog>>,
    user: AuthenticatedUser,
    Json(draft): Json<PostDraft>,
) -> Result<Json<Post>> {
    let post = blog.create_post(user.user_id(), draft).await?;

    Ok(Json(post))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/{id}/read", rejection(ServerError))]
struct MarkReadPath {
    id: Id<PostMarker>,
}

async fn mark_read(
    MarkReadPath { id }: MarkReadPath,
    State(blog): State<Arc<Blog>>,
    user: AuthenticatedUser,
) -> Result<Json<ReadMark>> {
    let read_mark = blog.mark_read(user.user_id(), id).await?;

    Ok(Json(read_mark))
}
