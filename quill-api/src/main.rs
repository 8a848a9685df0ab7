use crate::{
    blog::{
        Blog,
        notify::{LogMailer, Notifier, run_dispatcher},
    },
    server::ServerState,
};
use quill_common::{
    model::user::{InvalidUserEmailError, UserEmail},
    snowflake::{ProcessId, WorkerId},
};
use quill_db::{
    client::DbClient,
    memory::MemoryStore,
    store::{BlogStore, DbError},
};
use serde::Deserialize;
use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod blog;
mod server;

#[derive(Debug, Error)]
enum InitError {
    #[error("Error parsing .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),
    #[error("Error parsing environment: {0}")]
    Envy(#[from] envy::Error),
    #[error("Invalid notification sender address: {0}")]
    NotificationEmail(#[from] InvalidUserEmailError),
    #[error("Error setting up the database: {0}")]
    Database(#[from] DbError),
    #[error("Error binding tcp listener: {0}")]
    TcpBind(std::io::Error),
    #[error("Error serving server: {0}")]
    TcpServe(std::io::Error),
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
struct Env {
    server_address: IpAddr,
    server_port: u16,
    database_url: Option<String>,
    #[serde(default = "default_max_connections")]
    database_max_connections: u32,
    #[serde(default)]
    worker_id: WorkerId,
    #[serde(default)]
    process_id: ProcessId,
    #[serde(default = "default_notification_email")]
    notification_email: String,
}

fn default_max_connections() -> u32 {
    5
}

fn default_notification_email() -> String {
    "noreply@quill.invalid".to_owned()
}

fn install_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "quill_api=debug,quill_db=debug,\
                tower_http=debug,axum::rejection=trace,sqlx=warn"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn get_env() -> Result<Env, InitError> {
    if let Err(e) = dotenvy::dotenv() {
        if e.not_found() {
            debug!("No .dotenv file found");
        } else {
            return Err(e.into());
        }
    }

    envy::from_env().map_err(InitError::from)
}

async fn open_store(env: &Env) -> Result<Arc<dyn BlogStore>, InitError> {
    let Some(database_url) = &env.database_url else {
        warn!("DATABASE_URL is not set, keeping all data in memory");
        return Ok(Arc::new(MemoryStore::new(env.worker_id, env.process_id)));
    };

    let client = DbClient::connect(
        database_url,
        env.database_max_connections,
        env.worker_id,
        env.process_id,
    )
    .await?;
    client.migrate().await?;

    Ok(Arc::new(client))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "Could not listen for Ctrl-C, shutting down");
    }
    info!("Shutting down");
}

#[tokio::main]
async fn main() -> Result<(), InitError> {
    install_tracing();
    let env = get_env()?;
    let sender = UserEmail::new(env.notification_email.clone())?;

    let store = open_store(&env).await?;

    let shutdown = CancellationToken::new();
    let (notifier, notifications) = Notifier::channel();
    let dispatcher = tokio::spawn(run_dispatcher(
        notifications,
        Arc::new(LogMailer::new(sender)),
        shutdown.clone(),
    ));

    let state = ServerState {
        blog: Arc::new(Blog::new(store, notifier)),
    };
    let app = server::routes()
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let server_address = SocketAddr::new(env.server_address, env.server_port);
    let listener = tokio::net::TcpListener::bind(server_address)
        .await
        .map_err(InitError::TcpBind)?;
    info!(%server_address, "Listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(InitError::TcpServe);

    shutdown.cancel();
    match dispatcher.await {
        Ok(summary) => info!(
            delivered = summary.delivered,
            failed = summary.failed,
            "Notification dispatcher stopped"
        ),
        Err(err) => warn!(error = %err, "Notification dispatcher panicked"),
    }

    served
}
