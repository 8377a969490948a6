//! Periodic deletion of pending requests past the retention window.

use std::time::Duration;

use log::{error, info};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::service::RequestLifecycle;

/// Start the expiry sweeper.
///
/// Runs every `interval_secs` until the shutdown signal fires. The sweep
/// bodies live in [RequestLifecycle]; this task only provides the cadence.
pub fn start_expiry_sweeper(
    lifecycle: RequestLifecycle,
    interval_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match lifecycle.expire_friend_requests().await {
                        Ok(removed) if removed > 0 => {
                            info!("Sweeper removed {removed} expired friend requests")
                        }
                        Ok(_) => {}
                        Err(err) => error!("Friend request sweep failed: {err}"),
                    }
                    match lifecycle.expire_group_join_requests().await {
                        Ok(removed) if removed > 0 => {
                            info!("Sweeper removed {removed} expired group join requests")
                        }
                        Ok(_) => {}
                        Err(err) => error!("Group join request sweep failed: {err}"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("Stopping expiry sweeper");
                    break;
                }
            }
        }
    });
}
