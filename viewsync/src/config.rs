//! Engine configuration: what to sync, in which role, through which transform,
//! and on which timings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::role::{ChannelKind, Direction, Role, RoleResolver};
use crate::transform::{MirrorParams, OffsetParams, TransformConfig};

/// Per-instance sync policy.
///
/// Loadable from JSON; missing fields fall back to [`SyncConfig::default`]
/// (a peer syncing everything with no transform).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    pub sync_camera: bool,
    pub sync_selection: bool,
    pub sync_layers: bool,
    pub sync_ambiance: bool,
    pub role: Role,
    pub transform: TransformConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_camera: true,
            sync_selection: true,
            sync_layers: true,
            sync_ambiance: true,
            role: Role::Peer,
            transform: TransformConfig::None,
        }
    }
}

impl SyncConfig {
    /// Drives every follower, never follows.
    pub fn master() -> Self {
        Self {
            role: Role::Master,
            ..Self::default()
        }
    }

    pub fn peer() -> Self {
        Self::default()
    }

    /// Follows, never drives.
    pub fn slave() -> Self {
        Self {
            role: Role::Slave,
            ..Self::default()
        }
    }

    /// Follower panned by a fixed lng/lat delta.
    pub fn offset_view(d_lng: f64, d_lat: f64) -> Self {
        Self {
            transform: TransformConfig::Offset(OffsetParams::pan(d_lng, d_lat)),
            ..Self::slave()
        }
    }

    /// Follower zoomed out for overview.
    pub fn satellite_view(zoom_out: f64) -> Self {
        Self {
            transform: TransformConfig::Offset(OffsetParams::zoom(-zoom_out.abs())),
            ..Self::slave()
        }
    }

    /// Follower looking the other way.
    pub fn mirror_view() -> Self {
        Self {
            transform: TransformConfig::Mirror(MirrorParams::default()),
            ..Self::slave()
        }
    }

    /// Shares feature selection only; every view stays independent.
    pub fn selection_only() -> Self {
        Self {
            sync_camera: false,
            sync_selection: true,
            sync_layers: false,
            sync_ambiance: false,
            ..Self::peer()
        }
    }

    /// Shares data state (selection, layers, ambiance) but not the camera.
    pub fn data_only() -> Self {
        Self {
            sync_camera: false,
            ..Self::peer()
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn with_transform(mut self, transform: TransformConfig) -> Self {
        self.transform = transform;
        self
    }

    pub fn is_enabled(&self, kind: ChannelKind) -> bool {
        match kind {
            ChannelKind::Camera => self.sync_camera,
            ChannelKind::Selection => self.sync_selection,
            ChannelKind::Layer => self.sync_layers,
            ChannelKind::Ambiance => self.sync_ambiance,
        }
    }

    pub fn may_send(&self, kind: ChannelKind) -> bool {
        RoleResolver::decide(self.role, self.is_enabled(kind), Direction::Send)
    }

    pub fn may_apply(&self, kind: ChannelKind) -> bool {
        RoleResolver::decide(self.role, self.is_enabled(kind), Direction::Apply)
    }
}

/// Timer settings, all in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimingConfig {
    /// Minimum spacing between camera broadcasts.
    pub camera_debounce_ms: u64,
    /// How long `should_ignore_camera()` stays true after applying a camera.
    pub echo_window_ms: u64,
    pub heartbeat_interval_ms: u64,
    /// Peers silent for longer than this are evicted on the next tick.
    pub stale_after_ms: u64,
    /// Quiet period before a snapshot write.
    pub persist_debounce_ms: u64,
    /// Auto-resume after `pause_camera_send()` if nobody resumes.
    pub pause_fallback_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            camera_debounce_ms: 50,
            echo_window_ms: 100,
            heartbeat_interval_ms: 5_000,
            stale_after_ms: 15_000,
            persist_debounce_ms: 500,
            pause_fallback_ms: 3_000,
        }
    }
}

impl TimingConfig {
    pub fn camera_debounce(&self) -> Duration {
        Duration::from_millis(self.camera_debounce_ms)
    }

    pub fn echo_window(&self) -> Duration {
        Duration::from_millis(self.echo_window_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    pub fn persist_debounce(&self) -> Duration {
        Duration::from_millis(self.persist_debounce_ms)
    }

    pub fn pause_fallback(&self) -> Duration {
        Duration::from_millis(self.pause_fallback_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_full_peer() {
        let config = SyncConfig::default();
        assert_eq!(config.role, Role::Peer);
        for kind in ChannelKind::ALL {
            assert!(config.may_send(kind));
            assert!(config.may_apply(kind));
        }
    }

    #[test]
    fn test_master_and_slave_presets() {
        let master = SyncConfig::master();
        assert!(master.may_send(ChannelKind::Camera));
        assert!(!master.may_apply(ChannelKind::Camera));

        let slave = SyncConfig::slave();
        assert!(!slave.may_send(ChannelKind::Camera));
        assert!(slave.may_apply(ChannelKind::Camera));
    }

    #[test]
    fn test_view_presets_are_followers() {
        for config in [
            SyncConfig::offset_view(0.5, 0.0),
            SyncConfig::satellite_view(3.0),
            SyncConfig::mirror_view(),
        ] {
            assert_eq!(config.role, Role::Slave);
            assert!(!config.transform.is_identity());
        }
        assert_eq!(
            SyncConfig::satellite_view(3.0).transform,
            TransformConfig::Offset(OffsetParams::zoom(-3.0))
        );
    }

    #[test]
    fn test_selection_only_and_data_only() {
        let sel = SyncConfig::selection_only();
        assert!(sel.may_send(ChannelKind::Selection));
        assert!(!sel.may_send(ChannelKind::Camera));
        assert!(!sel.may_apply(ChannelKind::Layer));
        assert!(!sel.may_apply(ChannelKind::Ambiance));

        let data = SyncConfig::data_only();
        assert!(!data.may_apply(ChannelKind::Camera));
        assert!(data.may_apply(ChannelKind::Layer));
        assert!(data.may_send(ChannelKind::Ambiance));
    }

    #[test]
    fn test_partial_json_config() {
        let config: SyncConfig = serde_json::from_str(
            r#"{"role":"slave","syncAmbiance":false,"transform":{"kind":"mirror"}}"#,
        )
        .unwrap();
        assert_eq!(config.role, Role::Slave);
        assert!(config.sync_camera);
        assert!(!config.sync_ambiance);
        assert_eq!(config.transform, TransformConfig::mirror());
    }

    #[test]
    fn test_timing_defaults_and_partial_json() {
        let timings = TimingConfig::default();
        assert_eq!(timings.camera_debounce(), Duration::from_millis(50));
        assert_eq!(timings.stale_after_ms, 3 * timings.heartbeat_interval_ms);

        let custom: TimingConfig = serde_json::from_str(r#"{"echoWindowMs": 250}"#).unwrap();
        assert_eq!(custom.echo_window_ms, 250);
        assert_eq!(custom.persist_debounce_ms, 500);
    }
}
