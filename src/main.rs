use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use campus_session::{
    FileTokenStore, FirebaseIdentityProvider, MemoryTokenStore, RestBackend, SessionConfig,
    SessionEvent, SessionSynchronizer, TokenStore,
};

/// Log one session event
fn report(event: &SessionEvent) {
    match event {
        SessionEvent::StateChanged { state } => info!(
            phase = ?state.phase(),
            uid = ?state.identity.as_ref().map(|i| i.uid.as_str()),
            generation = state.generation,
            "Session state changed"
        ),
        SessionEvent::Issue { issue, .. } => warn!(kind = issue.kind(), issue = ?issue, "Session issue"),
        SessionEvent::StaleResultDiscarded {
            operation,
            generation,
        } => debug!(%operation, generation, "Stale result discarded"),
        SessionEvent::TokenStored { slot } => debug!(%slot, "Session token stored"),
        SessionEvent::TokenCleared { slot } => debug!(%slot, "Session token cleared"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file if it exists
    let env_file_path = dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            if cfg!(debug_assertions) {
                "campus_session=debug,campus_shell=debug,warn".into()
            } else {
                "campus_session=info,campus_shell=info,warn".into()
            }
        }))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    match env_file_path {
        Some(path) => info!("Loaded environment variables from {}", path.display()),
        None => debug!("No .env file found. Using existing environment variables."),
    };

    let config = SessionConfig::from_env().context("invalid session configuration")?;

    let provider = Arc::new(
        FirebaseIdentityProvider::new(&config).context("identity provider not configured")?,
    );
    let backend = Arc::new(RestBackend::new(config.clone()));
    let tokens: Arc<dyn TokenStore> = match &config.token_store_path {
        Some(path) => {
            info!(path = %path.display(), "Persisting session token to file");
            Arc::new(FileTokenStore::new(path))
        }
        None => Arc::new(MemoryTokenStore::new()),
    };

    let synchronizer = SessionSynchronizer::new(provider, backend, tokens, &config);
    let mut events = synchronizer.subscribe();
    let guard = synchronizer.start().await?;

    // campus-shell sign-in <email> <password>
    let args: Vec<String> = std::env::args().skip(1).collect();
    if let [command, email, password] = args.as_slice() {
        if command == "sign-in" {
            match synchronizer.authenticate(email, password).await {
                Ok(identity) => info!(uid = %identity.uid, "Signed in"),
                Err(e) => error!(error = %e, "Sign-in failed"),
            }
        }
    }

    info!("campus-shell running, press Ctrl-C to exit");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
            received = events.recv() => match received {
                Ok(event) => report(&event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event log lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    guard.shutdown().await;
    Ok(())
}
