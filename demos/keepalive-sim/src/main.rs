//! Simulated flaky channel kept present by the maintainer.
//!
//! Run with: cargo run -p keepalive-sim
//!
//! Settings come from `PRESENCE_*` environment variables (or a `.env`
//! file); anything unset falls back to short demo timings. Stop with
//! Ctrl-C.

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use presence_keeper_core::{
    ConnectError, IdentityId, PresenceConfig, TargetId, config::env,
};
use presence_keeper_session::{MemoryChannelClient, MemoryDirectory, PresenceMaintainer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Fallbacks so the demo runs with an empty environment.
fn demo_default(key: &str) -> Option<String> {
    let value = match key {
        env::PARENT_ID => "1",
        env::TARGET_ID => "10",
        env::BACKOFF_BASE_SECS => "1",
        env::BACKOFF_MAX_SECS => "8",
        env::MAX_ATTEMPTS => "4",
        env::HEALTH_CHECK_SECS => "15",
        env::DEBOUNCE_SECS => "2",
        env::CONNECT_TIMEOUT_SECS => "5",
        _ => return None,
    };
    Some(value.to_string())
}

/// Things the simulated remote side does to us, in rotation.
#[derive(Debug, Clone, Copy)]
enum Chaos {
    Drop,
    MoveAway,
    GoStale,
    Outage,
}

const CHAOS_ROTATION: [Chaos; 4] = [Chaos::Drop, Chaos::MoveAway, Chaos::GoStale, Chaos::Outage];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    if let Ok(path) = dotenv {
        tracing::info!("Loaded environment from {}", path.display());
    }

    let config = PresenceConfig::from_lookup(|key| {
        std::env::var(key).ok().or_else(|| demo_default(key))
    })
    .context("invalid presence configuration")?;
    let scope = config.scope;
    let elsewhere = TargetId::new(scope.target.get().wrapping_add(1).max(1))
        .context("no spare target id")?;

    let directory = Arc::new(MemoryDirectory::new());
    directory.add_parent(scope.parent, "simulated-home");
    directory.add_target(scope.parent, scope.target, "lounge");
    directory.add_target(scope.parent, elsewhere, "hallway");

    let identity = IdentityId::new(1).context("identity id")?;
    let client = Arc::new(
        MemoryChannelClient::new(identity).with_latency(Duration::from_millis(300)),
    );

    let maintainer = PresenceMaintainer::new(config, Arc::clone(&directory), Arc::clone(&client));
    let task = maintainer.spawn(&client);

    // Log every phase transition.
    let mut phases = maintainer.watch_phase();
    tokio::spawn(async move {
        while phases.changed().await.is_ok() {
            let phase = *phases.borrow_and_update();
            tracing::info!(?phase, "phase changed");
        }
    });

    // Simulated remote misbehaviour.
    let chaos_client = Arc::clone(&client);
    let chaos_shutdown = maintainer.shutdown_token();
    let chaos = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(20));
        ticker.tick().await;
        for step in CHAOS_ROTATION.iter().cycle() {
            tokio::select! {
                () = chaos_shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            tracing::info!(?step, "chaos");
            match step {
                Chaos::Drop => chaos_client.drop_connection(scope.parent),
                Chaos::MoveAway => chaos_client.force_move(scope.parent, elsewhere),
                Chaos::GoStale => chaos_client.go_stale(scope.parent),
                Chaos::Outage => {
                    chaos_client.fail_next_connects(std::iter::repeat_n(
                        ConnectError::Transport("simulated outage".to_string()),
                        3,
                    ));
                    chaos_client.drop_connection(scope.parent);
                }
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("Shutting down");

    maintainer.shutdown();
    task.await.context("maintainer task failed")?;
    chaos.await.context("chaos task failed")?;

    tracing::info!(
        connects = client.connect_calls(),
        moves = client.move_calls(),
        "Stopped"
    );
    Ok(())
}
