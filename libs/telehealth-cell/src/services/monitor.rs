use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, info, warn};

use shared_config::TelehealthSettings;

use crate::services::waiting_room::WaitingRoomQueue;

/// Background task that refreshes wait estimates, sweeps abandoned entries
/// and marks sessions that never checked in as no-shows
pub struct WaitingRoomMonitor {
    waiting_room: Arc<WaitingRoomQueue>,
    interval: Duration,
    abandonment_threshold: chrono::Duration,
    is_shutdown: RwLock<bool>,
    wake: Notify,
}

impl WaitingRoomMonitor {
    pub fn new(waiting_room: Arc<WaitingRoomQueue>, settings: &TelehealthSettings) -> Self {
        Self {
            waiting_room,
            interval: Duration::from_secs(settings.wait_time_refresh_seconds.max(1)),
            abandonment_threshold: chrono::Duration::minutes(settings.waiting_room_abandonment_minutes),
            is_shutdown: RwLock::new(false),
            wake: Notify::new(),
        }
    }

    /// One refresh-and-sweep pass; returns how many sessions were moved to no_show
    pub async fn tick(&self) -> usize {
        let now = Utc::now();
        let refreshed = self.waiting_room.recompute_wait_times().await;
        let swept = self
            .waiting_room
            .sweep_abandoned(now, self.abandonment_threshold)
            .await;

        // check-in timeout uses the same window, counted from the scheduled start
        let missed = match self
            .waiting_room
            .state_machine()
            .sweep_missed_check_ins(now, self.abandonment_threshold)
            .await
        {
            Ok(missed) => missed,
            Err(e) => {
                warn!("Missed check-in sweep failed: {}", e);
                Vec::new()
            }
        };

        for session in &missed {
            self.waiting_room
                .remove_for_session(session.provider_id, &session.id)
                .await;
        }

        debug!(
            "Monitor tick: {} entries refreshed, {} swept, {} missed check-ins",
            refreshed,
            swept.len(),
            missed.len()
        );
        swept.len() + missed.len()
    }

    pub async fn run(&self) {
        info!(
            "Waiting room monitor started (every {:?}, abandonment after {}m)",
            self.interval,
            self.abandonment_threshold.num_minutes()
        );

        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.wake.notified() => {}
            }

            if *self.is_shutdown.read().await {
                break;
            }

            self.tick().await;
        }

        info!("Waiting room monitor stopped");
    }

    /// Stops the loop after the pass in flight, if any, completes
    pub async fn shutdown(&self) {
        *self.is_shutdown.write().await = true;
        self.wake.notify_one();
    }
}
