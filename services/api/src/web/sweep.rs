//! services/api/src/web/sweep.rs
//!
//! Background task that closes exam sessions nobody touched after their
//! deadline, so that abandoned attempts still end and get evaluated.

use crate::web::ecos_sessions::complete_session;
use crate::web::state::AppState;
use chrono::{DateTime, Utc};
use ecos_core::ports::PortResult;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Runs `sweep_once` every `period` until `shutdown` is cancelled.
pub async fn run_expiry_sweep(
    state: Arc<AppState>,
    period: Duration,
    shutdown: CancellationToken,
) {
    info!("Expiry sweep running every {:?}", period);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Expiry sweep stopped");
                break;
            }
            _ = ticker.tick() => {
                match sweep_once(&state, Utc::now()).await {
                    Ok(0) => debug!("Expiry sweep found nothing to close"),
                    Ok(closed) => info!("Expiry sweep closed {} session(s)", closed),
                    Err(e) => error!("Expiry sweep failed: {}", e),
                }
            }
        }
    }
}

/// Completes every in-progress session whose deadline is behind `now`.
/// Returns how many sessions this call moved to completed.
pub async fn sweep_once(state: &Arc<AppState>, now: DateTime<Utc>) -> PortResult<usize> {
    let cutoff = state.session_clock().stale_cutoff(now);
    let stale = state.db.list_stale_ecos_sessions(cutoff).await?;

    let results = join_all(
        stale
            .iter()
            .map(|session| complete_session(state, session, now, true)),
    )
    .await;

    let mut closed = 0;
    for (session, result) in stale.iter().zip(results) {
        match result {
            Ok(completion) if completion.transitioned() => closed += 1,
            Ok(_) => {}
            Err(e) => warn!("Could not close expired session {}: {}", session.id, e),
        }
    }
    Ok(closed)
}
