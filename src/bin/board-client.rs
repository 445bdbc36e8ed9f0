//! Headless board client: joins a relay, follows the shared board and logs turn changes.

use std::sync::Arc;

use anyhow::Context;
use tabletop_sync::{
    config::AppConfig,
    dao::{http::HttpBoardStore, remote_store::RemoteStore},
    state::identity::Identity,
    sync::{SessionSettings, SyncSession},
};
use tokio::sync::{broadcast::error::RecvError, watch};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load().client;
    let endpoint = config
        .endpoint
        .context("no relay endpoint configured (set BOARD_ENDPOINT)")?;
    let store: Arc<dyn RemoteStore> =
        Arc::new(HttpBoardStore::new(&endpoint).context("building relay client")?);

    let identity = Identity::new(&config.user_id, config.gm);
    info!(user = %identity.user_id(), gm = identity.is_gm(), %endpoint, "joining board");
    let session = SyncSession::new(
        identity,
        config.user_id.clone(),
        Some(store),
        SessionSettings {
            poll_interval: config.poll_interval,
            ..SessionSettings::default()
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller = session.poller().spawn(shutdown_rx);

    let mut board = session.subscribe();
    let mut effects = session.subscribe_effects();
    let mut last_indicator = None;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = board.changed() => {
                if changed.is_err() {
                    break;
                }
                let indicator = session.turn_indicator();
                if indicator != last_indicator {
                    info!(indicator = indicator.as_deref().unwrap_or("no combat"), "turn indicator");
                    last_indicator = indicator;
                }
            }
            effect = effects.recv() => match effect {
                Ok(effect) => info!(kind = %effect.kind, combatant = ?effect.combatant_id, "turn effect"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "dropped turn effects"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    info!("leaving board");
    let _ = shutdown_tx.send(true);
    poller.await.context("joining poller")?;
    Ok(())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
