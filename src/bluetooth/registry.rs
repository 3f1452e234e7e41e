//! Peer registry and identity resolver.
//!
//! Discovery events carry noisy signal readings and unreliable names; this
//! module turns them into a stable, sorted peer list. Signal readings are
//! damped so the list does not reorder on every event, and a resolved name
//! is only ever upgraded, never replaced with weaker evidence.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::debug;
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::bluetooth::constants::{
    MEDIUM_RSSI_THRESHOLD, SIGNAL_JUMP_THRESHOLD, SIGNAL_SNAPSHOT_HOLD_SECS,
    STRONG_RSSI_THRESHOLD, UNKNOWN_DEVICE_NAME,
};

/// A name containing a space or apostrophe came from a user-assigned label
/// ("Ray's iPhone") and is treated as reliable.
pub fn is_confident_name(name: &str) -> bool {
    name.contains(' ') || name.contains('\'')
}

/// A currently known peer. Created on first discovery, updated in place,
/// never explicitly destroyed within a session.
#[derive(Debug, Clone)]
pub struct PeerDevice {
    pub id: String,
    pub name: String,
    /// Latest raw strength reading.
    pub current_signal: i16,
    /// Damped strength used for sorting and display.
    pub display_signal: i16,
    last_snapshot: Instant,
    pub last_updated: DateTime<Utc>,
    pub is_connected: bool,
    pub is_peer_app: bool,
}

impl PeerDevice {
    fn new(id: &str, name: String, rssi: i16, is_peer_app: bool, now: Instant) -> Self {
        Self {
            id: id.to_string(),
            name,
            current_signal: rssi,
            display_signal: rssi,
            last_snapshot: now,
            last_updated: Utc::now(),
            is_connected: false,
            is_peer_app,
        }
    }

    /// 1 = strong, 2 = medium, 3 = weak.
    pub fn signal_category(&self) -> u8 {
        if self.display_signal > STRONG_RSSI_THRESHOLD {
            1
        } else if self.display_signal > MEDIUM_RSSI_THRESHOLD {
            2
        } else {
            3
        }
    }

    /// Applies the damping rule: the displayed value moves only when the
    /// hold expired or the reading jumped past the threshold.
    fn observe_signal(&mut self, raw: i16, now: Instant) {
        self.current_signal = raw;
        let held = now.duration_since(self.last_snapshot);
        let hold_expired = held >= Duration::from_secs(SIGNAL_SNAPSHOT_HOLD_SECS);
        let jumped = (raw - self.display_signal).abs() > SIGNAL_JUMP_THRESHOLD;
        if raw != self.display_signal && (hold_expired || jumped) {
            self.display_signal = raw;
            self.last_snapshot = now;
        }
    }

    pub fn snapshot(&self) -> PeerSnapshot {
        PeerSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            address: extract_mac_address(&self.id),
            rssi: self.display_signal,
            signal_category: self.signal_category(),
            is_connected: self.is_connected,
            is_peer_app: self.is_peer_app,
            last_updated: self.last_updated,
        }
    }
}

/// Read-only peer projection handed to observers.
#[derive(Debug, Clone, Serialize)]
pub struct PeerSnapshot {
    /// Platform-specific unique identifier for the device.
    pub id: String,
    /// Best-known human label.
    pub name: String,
    /// The MAC address when the platform id contains one (may be absent on macOS).
    pub address: Option<String>,
    /// The damped signal strength used for sorting.
    pub rssi: i16,
    /// 1 = strong, 2 = medium, 3 = weak.
    pub signal_category: u8,
    /// Whether the device is connected.
    pub is_connected: bool,
    /// Whether the peer advertises this app's presence service.
    pub is_peer_app: bool,
    pub last_updated: DateTime<Utc>,
}

fn extract_mac_address(device_id_str: &str) -> Option<String> {
    let re = Regex::new(r"([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})").unwrap();
    re.find_iter(device_id_str)
        .last()
        .map(|m| m.as_str().to_string().to_uppercase())
}

/// Stable short tag derived from a peer id, used to split name collisions.
fn name_tag(id: &str) -> String {
    let hash = Sha256::digest(id.as_bytes());
    format!("{:02x}{:02x}", hash[0], hash[1])
}

/// Name resolution policy, first match wins. Never downgrades a confident
/// name.
fn resolve_name(existing: &str, incoming: &str) -> String {
    if is_confident_name(existing) {
        existing.to_string()
    } else if is_confident_name(incoming) {
        incoming.to_string()
    } else if existing == UNKNOWN_DEVICE_NAME && incoming != UNKNOWN_DEVICE_NAME {
        incoming.to_string()
    } else {
        existing.to_string()
    }
}

/// The set of currently known peers, plus the shadow collection a buffered
/// refresh accumulates into.
pub struct PeerRegistry {
    peers: HashMap<String, PeerDevice>,
    shadow: Option<HashMap<String, PeerDevice>>,
    last_scan_time: Option<DateTime<Utc>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self {
            peers: HashMap::new(),
            shadow: None,
            last_scan_time: None,
        }
    }

    /// Records a discovery event. Returns whether the published collection
    /// changed (events routed into the shadow never change it).
    pub fn on_discovered(
        &mut self,
        id: &str,
        raw_name: Option<&str>,
        rssi: i16,
        is_peer_app: bool,
        now: Instant,
    ) -> bool {
        let raw = match raw_name.map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ => UNKNOWN_DEVICE_NAME,
        };

        if let Some(shadow) = &mut self.shadow {
            Self::apply(shadow, id, raw, rssi, is_peer_app, now);
            Self::disambiguate(shadow);
            false
        } else {
            Self::apply(&mut self.peers, id, raw, rssi, is_peer_app, now);
            Self::disambiguate(&mut self.peers);
            true
        }
    }

    fn apply(
        map: &mut HashMap<String, PeerDevice>,
        id: &str,
        raw: &str,
        rssi: i16,
        is_peer_app: bool,
        now: Instant,
    ) {
        match map.get_mut(id) {
            Some(peer) => {
                peer.name = resolve_name(&peer.name, raw);
                peer.observe_signal(rssi, now);
                peer.is_peer_app |= is_peer_app;
                peer.last_updated = Utc::now();
            }
            None => {
                debug!("New peer {} ({:?})", id, raw);
                map.insert(
                    id.to_string(),
                    PeerDevice::new(id, raw.to_string(), rssi, is_peer_app, now),
                );
            }
        }
    }

    /// Splits collisions: when several peers share one non-confident name,
    /// every collider gets a stable id-derived tag. The tagged name contains
    /// a space, so it counts as confident from then on and never flaps.
    fn disambiguate(map: &mut HashMap<String, PeerDevice>) {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for peer in map.values() {
            if !is_confident_name(&peer.name) {
                *counts.entry(peer.name.clone()).or_default() += 1;
            }
        }
        for peer in map.values_mut() {
            if counts.get(&peer.name).copied().unwrap_or(0) > 1 {
                let tagged = format!("{} #{}", peer.name, name_tag(&peer.id));
                debug!("Name collision on {:?}: {} becomes {:?}", peer.name, peer.id, tagged);
                peer.name = tagged;
            }
        }
    }

    /// Marks a peer's connection state in the published collection.
    /// Returns whether anything changed.
    pub fn set_connected(&mut self, id: &str, connected: bool) -> bool {
        match self.peers.get_mut(id) {
            Some(peer) if peer.is_connected != connected => {
                peer.is_connected = connected;
                peer.last_updated = Utc::now();
                true
            }
            _ => false,
        }
    }

    /// Starts routing discovery events into an observer-invisible shadow.
    pub fn begin_refresh(&mut self) {
        self.shadow = Some(HashMap::new());
    }

    pub fn is_refreshing(&self) -> bool {
        self.shadow.is_some()
    }

    /// Drops the shadow without publishing anything.
    pub fn cancel_refresh(&mut self) {
        self.shadow = None;
    }

    /// Merges the shadow into the published collection with the same
    /// per-field policy as live updates, in one atomic step. Peers absent
    /// from the shadow stay listed untouched.
    pub fn complete_refresh(&mut self, now: Instant) {
        let Some(shadow) = self.shadow.take() else {
            return;
        };
        for (id, found) in shadow {
            match self.peers.get_mut(&id) {
                Some(peer) => {
                    peer.name = resolve_name(&peer.name, &found.name);
                    peer.observe_signal(found.current_signal, now);
                    peer.is_peer_app |= found.is_peer_app;
                    peer.last_updated = Utc::now();
                }
                None => {
                    self.peers.insert(id, found);
                }
            }
        }
        Self::disambiguate(&mut self.peers);
        self.last_scan_time = Some(Utc::now());
    }

    pub fn last_scan_time(&self) -> Option<DateTime<Utc>> {
        self.last_scan_time
    }

    /// Empties the published collection (a discovery session starting over).
    pub fn clear_published(&mut self) {
        self.peers.clear();
    }

    /// Published peers, strongest category first, then name, then id for a
    /// total order.
    pub fn sorted_snapshots(&self) -> Vec<PeerSnapshot> {
        let mut peers: Vec<&PeerDevice> = self.peers.values().collect();
        peers.sort_by(|a, b| {
            a.signal_category()
                .cmp(&b.signal_category())
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
                .then_with(|| a.id.cmp(&b.id))
        });
        peers.into_iter().map(PeerDevice::snapshot).collect()
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
