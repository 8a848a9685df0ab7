use crate::server::ServerRouter;

mod feed;
mod posts;
mod users;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .merge(feed::routes())
        .merge(posts::routes())
        .merge(users::routes())
}
