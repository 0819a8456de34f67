//! Turn clock loop
//!
//! One lightweight task per started session. Each tick takes the session lock,
//! and if the side to move has run out of time performs the timeout transition
//! and announces it. Between expiries it pushes periodic `TimeUpdate`s. Once
//! the session has finished, for whatever reason, the task waits out the
//! retention period and then removes the session from the registry.

use crate::game::GameSession;
use crate::network::ServerContext;
use crate::registry::SharedSession;
use log::{debug, info};
use shared::{ServerMessage, SessionStatus};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// What a single clock tick decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Running,
    /// The side to move ran out and the session is now finished
    Expired,
    /// The session was already over or abandoned
    Stopped,
}

/// Checks the side to move against its budget and ends the game on time
///
/// A failed expiry (the side moved before the tick got the lock) is ignored,
/// so a stale tick can never override a newer state.
pub fn check_expiry(ctx: &ServerContext, session: &mut GameSession, now: Instant) -> TickOutcome {
    if session.is_abandoned() || session.status() == SessionStatus::Finished {
        return TickOutcome::Stopped;
    }
    if session.status() != SessionStatus::InProgress {
        return TickOutcome::Running;
    }

    let side = session.side_to_move();
    if !session.remaining(side, now).is_zero() {
        return TickOutcome::Running;
    }

    match session.expire_clock(side, now) {
        Ok(winner) => {
            info!("Session {}: {} flagged, {} wins", session.id(), side, winner);
            ctx.announce(session, now);
            TickOutcome::Expired
        }
        Err(e) => {
            debug!("Session {}: ignoring clock tick ({})", session.id(), e);
            TickOutcome::Running
        }
    }
}

pub fn spawn_turn_clock(ctx: Arc<ServerContext>, session: SharedSession) -> JoinHandle<()> {
    tokio::spawn(run_turn_clock(ctx, session))
}

async fn run_turn_clock(ctx: Arc<ServerContext>, session: SharedSession) {
    let mut ticker = interval(ctx.config.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_update = Instant::now();

    let session_id = loop {
        ticker.tick().await;
        let now = Instant::now();
        let mut guard = session.lock().await;

        match check_expiry(&ctx, &mut guard, now) {
            TickOutcome::Running => {}
            TickOutcome::Expired | TickOutcome::Stopped => {
                if guard.is_abandoned() {
                    // Already removed by whoever abandoned it
                    return;
                }
                break guard.id().clone();
            }
        }

        if now.duration_since(last_update) >= ctx.config.time_update_interval {
            let update = ServerMessage::TimeUpdate {
                clocks: guard.clocks(now),
                side_to_move: guard.side_to_move(),
            };
            ctx.broadcaster.deliver(&guard.targets(), &update);
            last_update = now;
        }
    };

    debug!("Clock for session {} stopped", session_id);
    tokio::time::sleep(ctx.config.finished_retention).await;
    ctx.retire_session(&session_id).await;
}
