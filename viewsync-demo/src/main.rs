//! viewsync demo: several headless viewers on one in-process bus.
//!
//! A master drives a mirrored follower and a satellite overview; a fourth
//! viewer joins late and bootstraps from the snapshot store. Run with
//! `RUST_LOG=debug` to see peer traffic.
//!
//! `VIEWSYNC_FOLLOWER_CONFIG` may hold a JSON `SyncConfig` replacing the
//! satellite's policy, e.g.
//! `{"role":"slave","transform":{"kind":"offset","dZoom":-3}}`.

use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

use viewsync::{
    BroadcastBus, CameraState, LayerVisibility, MapCamera, ProtocolError, RocksSnapshotStore,
    SnapshotStore, StoreConfig, SyncConfig, SyncController, SyncError, TimingConfig,
};

const GROUP: &str = "demo-wall";

fn follower_config() -> Result<SyncConfig, SyncError> {
    match std::env::var("VIEWSYNC_FOLLOWER_CONFIG") {
        Ok(raw) => serde_json::from_str(&raw)
            .map_err(|e| ProtocolError::Deserialization(e.to_string()).into()),
        Err(_) => Ok(SyncConfig::satellite_view(3.0)),
    }
}

/// Log every camera a viewer receives.
fn watch(ctl: &SyncController, name: &'static str) {
    ctl.set_on_camera_change(move |cam, from| match cam {
        CameraState::Map(map) => info!(
            "[{name}] camera from {from}: center=({:.4}, {:.4}) zoom={:.2} bearing={:.1}",
            map.lng(),
            map.lat(),
            map.zoom,
            map.bearing
        ),
        CameraState::Scene(scene) => info!(
            "[{name}] camera from {from}: eye=({:.2}, {:.2}, {:.2})",
            scene.position.x, scene.position.y, scene.position.z
        ),
    });
}

#[tokio::main]
async fn main() -> Result<(), SyncError> {
    env_logger::init();

    let store_path = std::env::temp_dir().join("viewsync-demo");
    let store: Arc<dyn SnapshotStore> =
        Arc::new(RocksSnapshotStore::open(StoreConfig::for_testing(&store_path))?);
    info!("Snapshot store at {}", store_path.display());

    let bus = BroadcastBus::default();
    let timings = TimingConfig {
        heartbeat_interval_ms: 1_000,
        stale_after_ms: 3_000,
        ..TimingConfig::default()
    };

    let master = SyncController::builder(GROUP, bus.channel(GROUP))
        .instance_id("master")
        .config(SyncConfig::master())
        .timings(timings)
        .store(store.clone())
        .build();
    let mirror = SyncController::builder(GROUP, bus.channel(GROUP))
        .instance_id("mirror")
        .config(SyncConfig::mirror_view())
        .timings(timings)
        .build();
    let satellite = SyncController::builder(GROUP, bus.channel(GROUP))
        .instance_id("satellite")
        .config(follower_config()?)
        .timings(timings)
        .build();

    watch(&mirror, "mirror");
    watch(&satellite, "satellite");
    satellite.set_on_layer_change(|vis, from| {
        info!("[satellite] layer {} visible={} (from {from})", vis.layer_id, vis.visible)
    });

    master.start().await;
    mirror.start().await;
    satellite.start().await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    info!("master sees {} peers", master.peer_count());

    // A short pan gesture: a burst of moves, one message on the wire.
    let mut camera = MapCamera::new(2.3522, 48.8566, 12.0);
    for _ in 0..10 {
        camera.center[0] += 0.001;
        camera.bearing += 2.0;
        master.send_camera(camera.into());
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    master.notify_gesture_end(camera.into());

    master.send_layer_visibility(LayerVisibility {
        layer_id: "buildings".into(),
        visible: false,
    });

    // Programmatic fly-to: nothing goes out while paused.
    master.pause_camera_send();
    master.send_camera(MapCamera::new(12.4964, 41.9028, 10.0).into());
    tokio::time::sleep(Duration::from_millis(100)).await;
    master.resume_camera_send();

    // Let the snapshot write land, then bring in a latecomer.
    tokio::time::sleep(Duration::from_millis(700)).await;
    let late = SyncController::builder(GROUP, bus.channel(GROUP))
        .instance_id("late")
        .config(SyncConfig::slave())
        .timings(timings)
        .store(store.clone())
        .build();
    late.start().await;
    match late.initial_state() {
        Some(snapshot) => info!(
            "[late] bootstrapped at zoom {:.2}, written by {}",
            snapshot.camera.zoom(),
            snapshot.writer_instance_id
        ),
        None => warn!("[late] no snapshot found"),
    }

    // Dropping a controller announces its leave.
    drop(mirror);
    tokio::time::sleep(Duration::from_millis(50)).await;
    info!("master sees {} peers after mirror left", master.peer_count());

    // Live peers stay registered across several heartbeat sweeps.
    satellite.stop();
    tokio::time::sleep(Duration::from_millis(3_500)).await;
    info!(
        "master sees {:?}",
        master
            .peers()
            .iter()
            .map(|p| p.instance_id.as_str())
            .collect::<Vec<_>>()
    );

    late.stop();
    master.stop();
    Ok(())
}
