use crate::{
    blog::Blog,
    server::{Result, ServerError, ServerRouter, auth::AuthenticatedUser, json::Json},
};
use axum::{extract::State, http::StatusCode};
use axum_extra::routing::{RouterExt, TypedPath};
use quill_common::model::{
    Id,
    blog::AuthorBlog,
    subscription::{Subscription, SubscriptionStatus},
    user::{User, UserMarker},
};
use serde::Deserialize;
use std::sync::Arc;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(get_users)
        .typed_get(get_user)
        .typed_get(get_user_blog)
        .typed_get(get_subscription)
        .typed_post(subscribe)
        .typed_post(unsubscribe)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users", rejection(ServerError))]
struct GetUsersPath();

async fn get_users(
    GetUsersPath(): GetUsersPath,
    State(blog): State<Arc<Blog>>,
    _user: AuthenticatedUser,
) -> Result<Json<Vec<User>>> {
    let users = blog.authors().await?;

    Ok(Json(users))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/{id}", rejection(ServerError))]
struct GetUserPath {
    id: Id<UserMarker>,
}

async fn get_user(
    GetUserPath { id }: GetUserPath,
    State(blog): State<Arc<Blog>>,
    _user: AuthenticatedUser,
) -> Result<Json<User>> {
    let user = blog.user(id).await?;

    Ok(Json(user))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/{id}/blog", rejection(ServerError))]
struct GetUserBlogPath {
    id: Id<UserMarker>,
}

async fn get_user_blog(
    GetUserBlogPath { id }: GetUserBlogPath,
    State(blog): State<Arc<Blog>>,
    user: AuthenticatedUser,
) -> Result<Json<AuthorBlog>> {
    let author_blog = blog.author_blog(user.user_id(), id).await?;

    Ok(Json(author_blog))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/{id}/subscription", rejection(ServerError))]
struct GetSubscriptionPath {
    id: Id<UserMarker>,
}

async fn get_subscription(
    GetSubscriptionPath { id }: GetSubscriptionPath,
    State(blog): State<Arc<Blog>>,
    user: AuthenticatedUser,
) -> Result<Json<SubscriptionStatus>> {
    let subscribed = blog.is_subscribed(user.user_id(), id).await?;

    Ok(Json(SubscriptionStatus {
        author: id,
        subscribed,
    }))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/{id}/subscribe", rejection(ServerError))]
struct SubscribePath {
    id: Id<UserMarker>,
}

async fn subscribe(
    SubscribePath { id }: SubscribePath,
    State(blog): State<Arc<Blog>>,
    user: AuthenticatedUser,
) -> Result<Json<Subscription>> {
    let subscription = blog.subscribe(user.user_id(), id).await?;

    Ok(Json(subscription))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/{id}/unsubscribe", rejection(ServerError))]
struct UnsubscribePath {
    id: Id<UserMarker>,
}

async fn unsubscribe(
    UnsubscribePath { id }: UnsubscribePath,
    State(blog): State<Arc<Blog>>,
    user: AuthenticatedUser,
) -> Result<StatusCode> {
    blog.unsubscribe(user.user_id(), id).await?;

    Ok(StatusCode::NO_CONTENT)
}
