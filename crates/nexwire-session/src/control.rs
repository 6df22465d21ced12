//! Keepalive: ping a quiet connection, close a silent one.

use std::sync::Arc;
use std::time::Duration;

use nexwire_frame::{DisconnectReason, Message};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{trace, warn};

use crate::session::SessionInner;

/// What the keepalive timer should do on a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeepaliveAction {
    Wait,
    Ping,
    Expire,
}

/// `idle` is the time since the last inbound frame, `since_ping` the time
/// since this side last pinged.
pub(crate) fn next_action(
    idle: Duration,
    since_ping: Option<Duration>,
    ping_interval: Duration,
    idle_timeout: Duration,
) -> KeepaliveAction {
    if idle >= idle_timeout {
        KeepaliveAction::Expire
    } else if idle >= ping_interval && since_ping.is_none_or(|elapsed| elapsed >= ping_interval) {
        KeepaliveAction::Ping
    } else {
        KeepaliveAction::Wait
    }
}

pub(crate) async fn run_keepalive(inner: Arc<SessionInner>) {
    let ping_interval = inner.config.ping_interval;
    let idle_timeout = inner.config.idle_timeout;

    let mut ticker = tokio::time::interval(ping_interval / 2);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_ping: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let idle = inner.idle_for();
        match next_action(
            idle,
            last_ping.map(|at| at.elapsed()),
            ping_interval,
            idle_timeout,
        ) {
            KeepaliveAction::Wait => {}
            KeepaliveAction::Ping => {
                let nonce = inner.next_nonce();
                trace!(nonce, ?idle, "keepalive ping");
                inner.spawn_send(Message::Ping(nonce));
                last_ping = Some(Instant::now());
            }
            KeepaliveAction::Expire => {
                warn!(?idle, ?idle_timeout, "no traffic within idle timeout");
                inner.teardown(DisconnectReason::Timeout, true).await;
                return;
            }
        }
    }
}
