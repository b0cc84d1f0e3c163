//! Parley headless client — connects the sync engine to a server and
//! logs everything it observes. Useful for driving and debugging a
//! deployment without a UI.
//!
//! ```bash
//! cargo run --bin parley -- --ws-url ws://127.0.0.1:8800/ws \
//!     --api-url http://127.0.0.1:8800 --user-id alice
//!
//! # Or via environment variables
//! PARLEY_WS_URL=ws://127.0.0.1:8800/ws PARLEY_API_URL=http://127.0.0.1:8800 \
//!     PARLEY_USER_ID=alice cargo run --bin parley
//! ```

use std::path::Path;
use std::time::Duration;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;

use parley::api::HttpApiClient;
use parley::config::{CliArgs, ClientConfig};
use parley::link::ws::WsConnector;
use parley::session::{SessionEvent, SyncSession};
use parley_proto::message::UserId;

#[tokio::main]
async fn main() {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    let (Some(ws_url), Some(api_url), Some(user_id)) =
        (&config.ws_url, &config.api_url, &config.user_id)
    else {
        eprintln!("ws-url, api-url and user-id are required (flags, env, or config file)");
        std::process::exit(2);
    };

    for (name, value) in [("ws-url", ws_url), ("api-url", api_url)] {
        if let Err(e) = url::Url::parse(value) {
            eprintln!("invalid {name} '{value}': {e}");
            std::process::exit(2);
        }
    }

    tracing::info!(user = %user_id, ws = %ws_url, api = %api_url, "parley starting");

    let connector =
        WsConnector::new(ws_url.clone()).with_connect_timeout(config.connect_timeout);
    let api = HttpApiClient::new(api_url.clone());
    let (session, mut events) = SyncSession::new(
        UserId::new(user_id.clone()),
        connector,
        api,
        config.session_options(),
    );

    session.connect();

    match session.refresh_sessions().await {
        Ok(sessions) => {
            for s in &sessions {
                tracing::info!(
                    peer = %s.peer_id,
                    unread = s.unread_count,
                    online = s.is_online,
                    last = s.last_message.as_deref().unwrap_or("-"),
                    "conversation"
                );
            }
        }
        Err(e) => tracing::warn!(err = %e, "could not fetch conversation list"),
    }

    // Periodic maintenance alongside the event stream.
    let mut maintenance = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                log_event(&event);
            }
            _ = maintenance.tick() => {
                for temp_id in session.tick() {
                    tracing::warn!(%temp_id, "send still unconfirmed");
                }
            }
        }
    }

    tracing::info!("parley exiting");
}

/// Log one session notification at an appropriate level.
fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::ConnectionChanged { connected } => {
            tracing::info!(connected, "connection state");
        }
        SessionEvent::Reconnecting {
            attempt,
            max_attempts,
        } => {
            tracing::info!(attempt, max_attempts, "reconnecting");
        }
        SessionEvent::ConversationUpdated { peer } => {
            tracing::info!(peer = %peer, "conversation updated");
        }
        SessionEvent::PresenceUpdated => tracing::info!("presence updated"),
        SessionEvent::TypingUpdated => tracing::info!("typing updated"),
        SessionEvent::UnreadChanged { total } => tracing::info!(total, "unread badge"),
        SessionEvent::FetchFailed { context } => {
            tracing::warn!(context = %context, "fetch failed");
        }
    }
}

/// Initialize logging to stderr, or to a file when `--log-file` is given.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown so buffered
/// entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    match file_path {
        Some(path) => {
            let log_dir = path.parent()?;
            let file_name = path.file_name()?.to_str()?;
            let file_appender = tracing_appender::rolling::never(log_dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt()
                .with_writer(non_blocking)
                .with_env_filter(env_filter)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_env_filter(env_filter)
                .init();
            None
        }
    }
}
