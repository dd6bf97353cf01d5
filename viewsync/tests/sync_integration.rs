//! End-to-end tests: several controllers sharing one in-process bus.
//!
//! All tests run on a paused clock, so debounce, echo window and heartbeat
//! timings are exact.

use std::sync::{Arc, Mutex};
use tokio::time::Duration;
use viewsync::{
    BroadcastBus, CameraState, LayerVisibility, LinkState, MapCamera, MessageBody, MirrorParams,
    SceneCamera, SelectionState, Subscription, SyncConfig, SyncController, SyncMessage,
    TransformConfig, TransportChannel, Vec3,
};

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn paris(zoom: f64) -> CameraState {
    MapCamera::new(2.3522, 48.8566, zoom).into()
}

fn controller(bus: &BroadcastBus, id: &str, config: SyncConfig) -> SyncController {
    SyncController::builder("g1", bus.channel("g1"))
        .instance_id(id)
        .config(config)
        .build()
}

/// Record every camera delivered to `ctl`.
fn record_cameras(ctl: &SyncController) -> Arc<Mutex<Vec<(CameraState, String)>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    ctl.set_on_camera_change(move |cam, from| sink.lock().unwrap().push((*cam, from.to_string())));
    seen
}

/// Let queued frames reach their readers.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

async fn drain(sub: &mut Subscription) -> Vec<SyncMessage> {
    let mut out = Vec::new();
    while let Ok(Some(frame)) = tokio::time::timeout(Duration::from_millis(1), sub.recv()).await {
        out.push(SyncMessage::decode(&frame).unwrap());
    }
    out
}

fn count_cameras_from(messages: &[SyncMessage], id: &str) -> usize {
    messages
        .iter()
        .filter(|m| m.instance_id == id && matches!(m.body, MessageBody::Camera(_)))
        .count()
}

// ─── Camera flow ─────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_master_drives_satellite_slave() {
    let bus = BroadcastBus::default();
    let master = controller(&bus, "A", SyncConfig::master());
    let slave = controller(&bus, "B", SyncConfig::satellite_view(2.0));
    let seen = record_cameras(&slave);

    master.start().await;
    slave.start().await;

    master.send_camera(paris(10.0));
    tokio::time::sleep(Duration::from_millis(60)).await;

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let (cam, from) = &seen[0];
    assert_eq!(from, "A");
    let map = cam.as_map().unwrap();
    assert_eq!(map.zoom, 8.0);
    assert_eq!(map.center, [2.3522, 48.8566]);
}

#[tokio::test(start_paused = true)]
async fn test_burst_sends_one_message() {
    let bus = BroadcastBus::default();
    let mut tap = bus.channel("g1").subscribe().unwrap();
    let master = controller(&bus, "A", SyncConfig::master());
    master.start().await;

    master.send_camera(paris(10.0));
    tokio::time::sleep(Duration::from_millis(10)).await;
    master.send_camera(paris(10.5));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let sent = drain(&mut tap).await;
    assert_eq!(count_cameras_from(&sent, "A"), 1);
    let last = sent
        .iter()
        .find_map(|m| match m.body {
            MessageBody::Camera(c) => Some(c),
            _ => None,
        })
        .unwrap();
    assert_eq!(last.zoom(), 10.5);
}

#[tokio::test(start_paused = true)]
async fn test_mirror_scene_view() {
    let bus = BroadcastBus::default();
    let master = controller(&bus, "A", SyncConfig::master());
    let mirror = controller(
        &bus,
        "B",
        SyncConfig::slave().with_transform(TransformConfig::Mirror(MirrorParams::new(180.0, 0.0))),
    );
    let seen = record_cameras(&mirror);
    master.start().await;
    mirror.start().await;

    let front = SceneCamera::new(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, 1.0);
    master.send_camera(front.into());
    tokio::time::sleep(Duration::from_millis(60)).await;

    let seen = seen.lock().unwrap();
    let scene = seen[0].0.as_scene().copied().unwrap();
    assert!((scene.position.z + 10.0).abs() < 1e-9);
    assert!(scene.position.x.abs() < 1e-9);
    assert!((scene.distance() - 10.0).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn test_slave_never_broadcasts_camera() {
    let bus = BroadcastBus::default();
    let mut tap = bus.channel("g1").subscribe().unwrap();
    let slave = controller(&bus, "B", SyncConfig::slave());
    slave.start().await;

    for z in 0..5 {
        slave.send_camera(paris(z as f64));
        tokio::time::sleep(Duration::from_millis(30)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(count_cameras_from(&drain(&mut tap).await, "B"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_peers_exchange_both_ways() {
    let bus = BroadcastBus::default();
    let a = controller(&bus, "A", SyncConfig::peer());
    let b = controller(&bus, "B", SyncConfig::peer());
    let seen_a = record_cameras(&a);
    let seen_b = record_cameras(&b);
    a.start().await;
    b.start().await;

    a.send_camera(paris(4.0));
    tokio::time::sleep(Duration::from_millis(200)).await;
    b.send_camera(paris(6.0));
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(seen_b.lock().unwrap().len(), 1);
    assert_eq!(seen_a.lock().unwrap()[0].0.zoom(), 6.0);
}

#[tokio::test(start_paused = true)]
async fn test_echo_suppression_breaks_loop() {
    let bus = BroadcastBus::default();
    let mut tap = bus.channel("g1").subscribe().unwrap();
    let a = Arc::new(controller(&bus, "A", SyncConfig::peer()));
    let b = Arc::new(controller(&bus, "B", SyncConfig::peer()));

    // A host whose move handler always re-sends, guarded by the echo flag.
    let weak = Arc::downgrade(&b);
    b.set_on_camera_change(move |cam, _| {
        if let Some(b) = weak.upgrade() {
            if !b.should_ignore_camera() {
                b.send_camera(*cam);
            }
        }
    });
    a.start().await;
    b.start().await;

    a.send_camera(paris(12.0));
    tokio::time::sleep(Duration::from_millis(500)).await;

    let sent = drain(&mut tap).await;
    assert_eq!(count_cameras_from(&sent, "A"), 1);
    assert_eq!(count_cameras_from(&sent, "B"), 0);
    assert_eq!(b.link_state(), LinkState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_pause_resume_counts() {
    let bus = BroadcastBus::default();
    let mut tap = bus.channel("g1").subscribe().unwrap();
    let master = controller(&bus, "A", SyncConfig::master());
    master.start().await;

    master.pause_camera_send();
    for z in 0..3 {
        master.send_camera(paris(z as f64));
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(count_cameras_from(&drain(&mut tap).await, "A"), 0);

    master.resume_camera_send();
    master.send_camera(paris(9.0));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(count_cameras_from(&drain(&mut tap).await, "A"), 1);
}

// ─── Discrete kinds ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_selection_and_layers_immediate() {
    let bus = BroadcastBus::default();
    let a = controller(&bus, "A", SyncConfig::peer());
    let b = controller(&bus, "B", SyncConfig::peer());
    let selections = Arc::new(Mutex::new(Vec::new()));
    let layers = Arc::new(Mutex::new(Vec::new()));
    let (s, l) = (selections.clone(), layers.clone());
    b.set_on_selection_change(move |sel, _| s.lock().unwrap().push(sel.clone()));
    b.set_on_layer_change(move |vis, _| l.lock().unwrap().push(vis.clone()));
    a.start().await;
    b.start().await;

    a.send_selection(SelectionState {
        layer_id: "parcels".into(),
        feature_indices: vec![1, 2, 3],
    });
    a.send_layer_visibility(LayerVisibility {
        layer_id: "roads".into(),
        visible: false,
    });
    settle().await;

    assert_eq!(selections.lock().unwrap()[0].feature_indices, vec![1, 2, 3]);
    assert!(!layers.lock().unwrap()[0].visible);
}

#[tokio::test(start_paused = true)]
async fn test_groups_do_not_cross() {
    let bus = BroadcastBus::default();
    let a = SyncController::builder("g1", bus.channel("g1"))
        .config(SyncConfig::master())
        .build();
    let other = SyncController::builder("g2", bus.channel("g2"))
        .config(SyncConfig::slave())
        .build();
    let seen = record_cameras(&other);
    a.start().await;
    other.start().await;

    a.send_camera(paris(3.0));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(other.peer_count(), 0);
}

// ─── Liveness ────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_join_answered_without_heartbeat() {
    let bus = BroadcastBus::default();
    let b = controller(&bus, "B", SyncConfig::peer());
    b.start().await;
    let a = controller(&bus, "A", SyncConfig::peer());
    a.start().await;
    settle().await;

    assert_eq!(a.peer_count(), 1);
    assert_eq!(b.peer_count(), 1);
    assert_eq!(a.peers()[0].instance_id, "B");
}

#[tokio::test(start_paused = true)]
async fn test_stop_announces_leave() {
    let bus = BroadcastBus::default();
    let a = controller(&bus, "A", SyncConfig::peer());
    let b = controller(&bus, "B", SyncConfig::peer());
    a.start().await;
    b.start().await;
    settle().await;
    assert_eq!(a.peer_count(), 1);

    b.stop();
    settle().await;
    assert_eq!(a.peer_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_instance_times_out() {
    let bus = BroadcastBus::default();
    let a = controller(&bus, "A", SyncConfig::peer());
    a.start().await;

    // A peer that announces itself and then goes silent without leaving.
    let ghost = bus.channel("g1");
    ghost.broadcast(&SyncMessage::join("g1", "ghost")).unwrap();
    settle().await;
    assert_eq!(a.peer_count(), 1);

    tokio::time::sleep(Duration::from_secs(21)).await;
    assert_eq!(a.peer_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_live_peers_survive_heartbeats() {
    let bus = BroadcastBus::default();
    let a = controller(&bus, "A", SyncConfig::peer());
    let b = controller(&bus, "B", SyncConfig::peer());
    a.start().await;
    b.start().await;

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(a.peer_count(), 1);
    assert_eq!(b.peer_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_stop() {
    let bus = BroadcastBus::default();
    let a = controller(&bus, "A", SyncConfig::peer());
    let b = controller(&bus, "B", SyncConfig::peer());
    let seen = record_cameras(&b);
    a.start().await;
    b.start().await;

    b.stop();
    b.start().await;
    a.send_camera(paris(7.0));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(seen.lock().unwrap().len(), 1);
}
