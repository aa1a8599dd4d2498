// Presence registry: the single source of truth for who is online.
//
// One entry per user identity. A reconnect supersedes the previous
// entry and drops its transport sender, so the orphaned connection's
// forwarding loop terminates instead of double-delivering. All state
// lives behind one async RwLock; snapshots and recipient lists are
// copied out of the guard before anything is sent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;
use waypoint_common::geo::haversine_km;
use waypoint_common::protocol::ws::{PresenceBroadcastEntry, ServerMessage};
use waypoint_common::types::{Identity, LocationFix, UserId};

use crate::error::EngineError;

/// Fixes with accuracy worse than this (meters) log a warning.
const POOR_ACCURACY_METERS: f64 = 10.0;

/// Movements shorter than this (kilometers) are not worth a log line.
const SIGNIFICANT_MOVE_KM: f64 = 0.001;

#[derive(Clone)]
pub struct PresenceRegistry {
    state: Arc<RwLock<RegistryState>>,
    debounce: Duration,
    dirty: Arc<AtomicBool>,
}

#[derive(Default)]
struct RegistryState {
    entries: HashMap<UserId, PresenceEntry>,
    next_seq: u64,
}

struct PresenceEntry {
    conn_id: Uuid,
    identity: Identity,
    outbound: mpsc::UnboundedSender<ServerMessage>,
    connected_at: DateTime<Utc>,
    seq: u64,
    location: LocationState,
    in_background: bool,
    background_changed_at: Option<DateTime<Utc>>,
    last_activity_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct LocationState {
    lat: Option<f64>,
    lon: Option<f64>,
    accuracy: Option<f64>,
    speed: Option<f64>,
    heading: Option<f64>,
    /// Server receive time of the last accepted fix.
    updated_at: Option<DateTime<Utc>>,
    /// Client-reported time of the last accepted fix.
    reported_at: Option<DateTime<Utc>>,
    /// Unrounded coordinates of the previous fix, for the delta.
    prev_lat: Option<f64>,
    prev_lon: Option<f64>,
    distance_moved: Option<f64>,
}

impl PresenceEntry {
    fn view(&self) -> PresenceBroadcastEntry {
        PresenceBroadcastEntry {
            user_id: self.identity.user_id,
            username: self.identity.username.clone(),
            is_admin: self.identity.is_admin,
            lat: self.location.lat,
            lon: self.location.lon,
            accuracy: self.location.accuracy,
            speed: self.location.speed,
            heading: self.location.heading,
            distance_moved: self.location.distance_moved,
            last_fix_at: self.location.updated_at,
            connected_at: self.connected_at,
            in_background: self.in_background,
        }
    }
}

impl PresenceRegistry {
    /// `debounce` of zero broadcasts the full roster on every change;
    /// a non-zero window requires [`spawn_debounce_flusher`] to run.
    ///
    /// [`spawn_debounce_flusher`]: PresenceRegistry::spawn_debounce_flusher
    pub fn new(debounce: Duration) -> Self {
        Self {
            state: Arc::new(RwLock::new(RegistryState::default())),
            debounce,
            dirty: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Insert or replace the entry for a user.
    ///
    /// Last writer wins: the superseded entry's transport sender is
    /// dropped here, which closes its channel and ends the old
    /// connection's forwarding loop.
    pub async fn register(
        &self,
        identity: Identity,
        conn_id: Uuid,
        outbound: mpsc::UnboundedSender<ServerMessage>,
    ) {
        {
            let mut guard = self.state.write().await;
            let seq = guard.next_seq;
            guard.next_seq += 1;
            let superseded = guard.entries.insert(
                identity.user_id,
                PresenceEntry {
                    conn_id,
                    identity,
                    outbound,
                    connected_at: Utc::now(),
                    seq,
                    location: LocationState::default(),
                    in_background: false,
                    background_changed_at: None,
                    last_activity_at: None,
                },
            );
            if let Some(old) = superseded {
                debug!(conn_id = %old.conn_id, "superseding previous connection");
                drop(old.outbound);
            }
        }
        self.broadcast_roster().await;
    }

    /// Remove a user's entry, but only if it still belongs to the given
    /// connection. A disconnect racing with a reconnect is a no-op.
    pub async fn unregister(&self, user_id: UserId, conn_id: Uuid) -> bool {
        let removed = {
            let mut guard = self.state.write().await;
            match guard.entries.get(&user_id) {
                Some(entry) if entry.conn_id == conn_id => {
                    guard.entries.remove(&user_id);
                    true
                }
                _ => false,
            }
        };
        if removed {
            self.broadcast_roster().await;
        }
        removed
    }

    /// Forcibly remove a user regardless of connection, tearing down
    /// the transport. Driven by the external admin collaborator when an
    /// account is deleted.
    pub async fn evict(&self, user_id: UserId) -> bool {
        let removed = {
            let mut guard = self.state.write().await;
            guard.entries.remove(&user_id).is_some()
        };
        if removed {
            self.broadcast_roster().await;
        }
        removed
    }

    /// Apply an accepted location fix and broadcast the new roster.
    ///
    /// Callers are expected to have dropped non-finite coordinates
    /// already; optional refinements are still filtered here. The
    /// movement delta is computed only when a previous fix exists.
    pub async fn update_location(
        &self,
        user_id: UserId,
        fix: LocationFix,
    ) -> Result<PresenceBroadcastEntry, EngineError> {
        let view = {
            let mut guard = self.state.write().await;
            let entry = guard.entries.get_mut(&user_id).ok_or(EngineError::NotOnline(user_id))?;
            let username = entry.identity.username.clone();
            let location = &mut entry.location;

            location.lat = Some(round_dp(fix.lat, 8));
            location.lon = Some(round_dp(fix.lon, 8));
            location.updated_at = Some(Utc::now());
            location.reported_at = fix.timestamp;

            if let Some(accuracy) = fix.accuracy.filter(|v| v.is_finite()) {
                location.accuracy = Some(round_dp(accuracy, 2));
                if accuracy > POOR_ACCURACY_METERS {
                    warn!(user = %username, accuracy_m = accuracy, "poor gps accuracy");
                }
            }
            if let Some(speed) = fix.speed.filter(|v| v.is_finite()) {
                location.speed = Some(round_dp(speed, 2));
            }
            if let Some(heading) = fix.heading.filter(|v| v.is_finite()) {
                location.heading = Some(round_dp(heading, 1));
            }

            match (location.prev_lat, location.prev_lon) {
                (Some(prev_lat), Some(prev_lon)) => {
                    let km = haversine_km(prev_lat, prev_lon, fix.lat, fix.lon);
                    location.distance_moved = Some(round_dp(km, 3));
                    if km > SIGNIFICANT_MOVE_KM {
                        debug!(user = %username, moved_m = km * 1000.0, "location update");
                    }
                }
                _ => {
                    debug!(user = %username, lat = fix.lat, lon = fix.lon, "initial location");
                }
            }
            location.prev_lat = Some(fix.lat);
            location.prev_lon = Some(fix.lon);

            entry.view()
        };
        self.broadcast_roster().await;
        Ok(view)
    }

    /// Flip the background flag for a user. State-only, no broadcast;
    /// silently ignored when the user is not online.
    pub async fn set_background(&self, user_id: UserId, in_background: bool) {
        let mut guard = self.state.write().await;
        if let Some(entry) = guard.entries.get_mut(&user_id) {
            entry.in_background = in_background;
            entry.background_changed_at = Some(Utc::now());
        }
    }

    /// Record app lifecycle activity. State-only, no broadcast.
    pub async fn touch_activity(&self, user_id: UserId) {
        let mut guard = self.state.write().await;
        if let Some(entry) = guard.entries.get_mut(&user_id) {
            entry.last_activity_at = Some(Utc::now());
        }
    }

    /// The current roster, in connection order.
    pub async fn snapshot(&self) -> Vec<PresenceBroadcastEntry> {
        let guard = self.state.read().await;
        let mut entries: Vec<&PresenceEntry> = guard.entries.values().collect();
        entries.sort_by_key(|entry| entry.seq);
        entries.into_iter().map(PresenceEntry::view).collect()
    }

    /// Send one frame to a single user, if online. Returns whether the
    /// frame was handed to a live channel.
    pub async fn send_to(&self, user_id: UserId, message: ServerMessage) -> bool {
        let sender = {
            let guard = self.state.read().await;
            guard.entries.get(&user_id).map(|entry| entry.outbound.clone())
        };
        match sender {
            Some(sender) => sender.send(message).is_ok(),
            None => false,
        }
    }

    /// Deliver one frame to every listed user who is currently online.
    /// Returns the number of live channels reached.
    pub async fn deliver(&self, user_ids: &[UserId], message: ServerMessage) -> usize {
        let recipients: Vec<mpsc::UnboundedSender<ServerMessage>> = {
            let guard = self.state.read().await;
            user_ids
                .iter()
                .filter_map(|id| guard.entries.get(id))
                .map(|entry| entry.outbound.clone())
                .collect()
        };

        let mut sent_count = 0;
        for recipient in recipients {
            if recipient.send(message.clone()).is_ok() {
                sent_count += 1;
            }
        }
        sent_count
    }

    /// Push the full roster to every connected client, or mark it dirty
    /// for the flusher when a debounce window is configured.
    pub async fn broadcast_roster(&self) {
        if self.debounce.is_zero() {
            self.flush_roster_now().await;
        } else {
            self.dirty.store(true, Ordering::Release);
        }
    }

    async fn flush_roster_now(&self) {
        let (users, recipients) = {
            let guard = self.state.read().await;
            let mut entries: Vec<&PresenceEntry> = guard.entries.values().collect();
            entries.sort_by_key(|entry| entry.seq);
            let users: Vec<PresenceBroadcastEntry> =
                entries.iter().map(|entry| entry.view()).collect();
            let recipients: Vec<mpsc::UnboundedSender<ServerMessage>> =
                entries.iter().map(|entry| entry.outbound.clone()).collect();
            (users, recipients)
        };

        let message = ServerMessage::PresenceUpdate { users };
        for recipient in recipients {
            let _ = recipient.send(message.clone());
        }
    }

    /// Start the coalescing flusher. Returns `None` when broadcasting
    /// is immediate (debounce of zero). Dirty snapshots are flushed at
    /// most once per window, trailing edge included.
    pub fn spawn_debounce_flusher(&self) -> Option<tokio::task::JoinHandle<()>> {
        if self.debounce.is_zero() {
            return None;
        }
        let registry = self.clone();
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(registry.debounce);
            interval.reset(); // skip immediate first tick
            loop {
                interval.tick().await;
                if registry.dirty.swap(false, Ordering::AcqRel) {
                    registry.flush_roster_now().await;
                }
            }
        }))
    }
}

fn round_dp(value: f64, dp: i32) -> f64 {
    let factor = 10f64.powi(dp);
    (value * factor).round() / factor
}
