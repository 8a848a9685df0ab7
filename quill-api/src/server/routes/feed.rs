use crate::{
    blog::Blog,
    server::{Result, ServerError, ServerRouter, auth::AuthenticatedUser, json::Json},
};
use axum::extract::State;
use axum_extra::routing::{RouterExt, TypedPath};
use quill_common::model::feed::FeedEntry;
use serde::Deserialize;
use std::sync::Arc;

pub fn routes() -> ServerRouter {
    ServerRouter::new().typed_get(get_feed)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/feed", rejection(ServerError))]
struct FeedPath();

async fn get_feed(
    FeedPath(): FeedPath,
    State(blog): State<Arc<Blog>>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<FeedEntry>>> {
    let feed = blog.feed(user.user_id()).await?;

    Ok(Json(feed))
}
