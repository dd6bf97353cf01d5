//! The per-instance orchestrator.
//!
//! ## Data flow
//!
//! ```text
//!  local camera move
//!       │
//!       ▼
//!  send_camera() ── role / flag / paused? ──► pending slot ──(50ms)──► broadcast
//!
//!  transport frame
//!       │
//!       ▼
//!  decode ── group / self filter ── peers.touch ── role / flag gate
//!       │
//!       ▼   (camera only)
//!  TransformConfig::apply ──► Receiving (echo window) ──► on_camera_change(cb)
//!                                                   └──► schedule_save (writers)
//! ```
//!
//! ## Link state
//!
//! ```text
//!            start()                 inbound camera
//!  Stopped ──────────► Idle ◄──────────────────────► Receiving
//!     ▲                  │      echo window elapsed
//!     └──── stop() ──────┘
//!
//!  send_paused: orthogonal flag, set by pause_camera_send()
//! ```
//!
//! `should_ignore_camera()` is true exactly while the link is `Receiving`;
//! the host's move handler checks it so that a camera update we just
//! applied is not broadcast back as if it were a local change.
//!
//! All timers are [`ScheduledTask`]s owned by the controller and cancelled
//! by `stop()`. Background tasks hold only a weak reference, so dropping
//! the controller tears everything down.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::runtime::Handle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::camera::CameraState;
use crate::config::{SyncConfig, TimingConfig};
use crate::peers::{PeerInfo, PeerRegistry};
use crate::persistence::{PersistedSnapshot, PersistenceAdapter, SnapshotStore};
use crate::protocol::{AmbianceState, LayerVisibility, MessageBody, SelectionState, SyncMessage};
use crate::role::ChannelKind;
use crate::task::{cancel_slot, ScheduledTask};
use crate::transport::{Subscription, TransportChannel};

/// Receives a derived camera and the id of the instance it came from.
pub type CameraHandler = Arc<dyn Fn(&CameraState, &str) + Send + Sync>;
pub type SelectionHandler = Arc<dyn Fn(&SelectionState, &str) + Send + Sync>;
pub type AmbianceHandler = Arc<dyn Fn(&AmbianceState, &str) + Send + Sync>;
pub type LayerHandler = Arc<dyn Fn(&LayerVisibility, &str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Stopped,
    Idle,
    /// An inbound camera was just applied; local moves are echoes.
    Receiving,
}

impl LinkState {
    pub fn is_active(self) -> bool {
        !matches!(self, LinkState::Stopped)
    }
}

#[derive(Default, Clone)]
struct Callbacks {
    camera: Option<CameraHandler>,
    selection: Option<SelectionHandler>,
    ambiance: Option<AmbianceHandler>,
    layer: Option<LayerHandler>,
}

/// Payload to hand to a callback once the state lock is released.
enum Dispatch {
    Camera(CameraState),
    Selection(SelectionState),
    Ambiance(AmbianceState),
    Layer(LayerVisibility),
}

struct ControllerState {
    link: LinkState,
    /// A `start()` is between bootstrap and activation. Cleared by `stop()`
    /// to abort it.
    starting: bool,
    send_paused: bool,
    config: SyncConfig,
    peers: PeerRegistry,
    runtime: Option<Handle>,
    epoch: Instant,
    initial_state: Option<PersistedSnapshot>,
    pending_camera: Option<CameraState>,
    camera_flush: Option<ScheduledTask>,
    echo_reset: Option<ScheduledTask>,
    /// Bumped per echo window; a reset only closes its own window.
    echo_generation: u64,
    pause_fallback: Option<ScheduledTask>,
    heartbeat: Option<ScheduledTask>,
    reader: Option<ScheduledTask>,
}

impl ControllerState {
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Runtime handle while running.
    fn active_runtime(&self) -> Option<Handle> {
        if self.link.is_active() {
            self.runtime.clone()
        } else {
            None
        }
    }

    fn cancel_camera_flush(&mut self) {
        self.pending_camera = None;
        cancel_slot(&mut self.camera_flush);
    }
}

struct Shared {
    instance_id: String,
    group_id: String,
    transport: Arc<dyn TransportChannel>,
    persistence: Option<PersistenceAdapter>,
    timings: TimingConfig,
    state: Mutex<ControllerState>,
    callbacks: Mutex<Callbacks>,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_callbacks(&self) -> MutexGuard<'_, Callbacks> {
        self.callbacks.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn broadcast(&self, message: SyncMessage) {
        if let Err(e) = self.transport.broadcast(&message) {
            log::debug!("[{}] {} not sent: {e}", self.instance_id, message.type_name());
        }
    }

    fn spawn_reader(self: &Arc<Self>, runtime: &Handle, mut subscription: Subscription) -> ScheduledTask {
        let weak = Arc::downgrade(self);
        ScheduledTask::spawn(runtime, async move {
            while let Some(frame) = subscription.recv().await {
                let Some(shared) = weak.upgrade() else { break };
                shared.handle_frame(&frame);
            }
        })
    }

    fn spawn_heartbeat(self: &Arc<Self>, runtime: &Handle) -> ScheduledTask {
        let weak = Arc::downgrade(self);
        let period = self.timings.heartbeat_interval();
        ScheduledTask::spawn(runtime, async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else { break };
                shared.heartbeat_tick();
            }
        })
    }

    fn heartbeat_tick(&self) {
        let evicted = {
            let mut st = self.lock_state();
            if !st.link.is_active() {
                return;
            }
            let now = st.now_ms();
            st.peers.sweep_stale(now, self.timings.stale_after_ms)
        };
        for id in &evicted {
            log::debug!("[{}] Peer {id} timed out", self.instance_id);
        }
        self.broadcast(SyncMessage::ping(&self.group_id, &self.instance_id));
    }

    fn handle_frame(self: &Arc<Self>, frame: &[u8]) {
        match SyncMessage::decode(frame) {
            Ok(message) => self.handle_message(message),
            Err(e) => log::trace!("[{}] Discarding frame: {e}", self.instance_id),
        }
    }

    fn handle_message(self: &Arc<Self>, message: SyncMessage) {
        if message.group_id != self.group_id || message.instance_id == self.instance_id {
            return;
        }
        let source = message.instance_id;
        let mut reply = None;
        let mut dispatch = None;

        {
            let mut st = self.lock_state();
            let Some(runtime) = st.active_runtime() else {
                return;
            };

            let now = st.now_ms();
            if matches!(message.body, MessageBody::Leave) {
                if st.peers.remove(&source) {
                    log::debug!("[{}] Peer {source} left", self.instance_id);
                }
            } else if message.body.channel_kind().is_some() {
                st.peers.refresh(&source, now);
            } else if st.peers.touch(&source, now) {
                log::debug!("[{}] Peer {source} joined", self.instance_id);
            }

            if let Some(kind) = message.body.channel_kind() {
                if !st.config.may_apply(kind) {
                    return;
                }
            }

            match message.body {
                MessageBody::Join | MessageBody::Ping => {
                    reply = Some(SyncMessage::pong(&self.group_id, &self.instance_id));
                }
                MessageBody::Leave | MessageBody::Pong => {}
                MessageBody::Camera(reference) => {
                    let derived = st.config.transform.apply(&reference);
                    self.enter_receiving(&mut st, &runtime);
                    if st.config.role.is_writer() {
                        if let Some(persistence) = &self.persistence {
                            persistence.schedule_save(
                                &runtime,
                                PersistedSnapshot::new(&self.group_id, reference, &self.instance_id),
                            );
                        }
                    }
                    dispatch = Some(Dispatch::Camera(derived));
                }
                MessageBody::Selection(state) => dispatch = Some(Dispatch::Selection(state)),
                MessageBody::Ambiance(state) => dispatch = Some(Dispatch::Ambiance(state)),
                MessageBody::Layer(state) => dispatch = Some(Dispatch::Layer(state)),
            }
        }

        if let Some(reply) = reply {
            self.broadcast(reply);
        }
        if let Some(dispatch) = dispatch {
            self.dispatch(dispatch, &source);
        }
    }

    /// Open (or extend) the echo window. Runs before the camera callback so
    /// a synchronous move handler already sees it.
    fn enter_receiving(self: &Arc<Self>, st: &mut ControllerState, runtime: &Handle) {
        st.link = LinkState::Receiving;
        st.echo_generation += 1;
        cancel_slot(&mut st.echo_reset);

        let generation = st.echo_generation;
        let weak: Weak<Shared> = Arc::downgrade(self);
        st.echo_reset = Some(ScheduledTask::after(runtime, self.timings.echo_window(), move || {
            if let Some(shared) = weak.upgrade() {
                let mut st = shared.lock_state();
                if st.echo_generation != generation {
                    return;
                }
                if st.link == LinkState::Receiving {
                    st.link = LinkState::Idle;
                }
                st.echo_reset = None;
            }
        }));
    }

    fn dispatch(&self, dispatch: Dispatch, source: &str) {
        let callbacks = self.lock_callbacks().clone();
        match dispatch {
            Dispatch::Camera(state) => {
                if let Some(cb) = callbacks.camera {
                    cb(&state, source);
                }
            }
            Dispatch::Selection(state) => {
                if let Some(cb) = callbacks.selection {
                    cb(&state, source);
                }
            }
            Dispatch::Ambiance(state) => {
                if let Some(cb) = callbacks.ambiance {
                    cb(&state, source);
                }
            }
            Dispatch::Layer(state) => {
                if let Some(cb) = callbacks.layer {
                    cb(&state, source);
                }
            }
        }
    }

    fn queue_camera(self: &Arc<Self>, state: CameraState) {
        let mut st = self.lock_state();
        let Some(runtime) = st.active_runtime() else {
            return;
        };
        if !st.config.may_send(ChannelKind::Camera) || st.send_paused {
            return;
        }

        st.pending_camera = Some(state);
        if st.camera_flush.is_none() {
            let weak = Arc::downgrade(self);
            st.camera_flush = Some(ScheduledTask::after(
                &runtime,
                self.timings.camera_debounce(),
                move || {
                    if let Some(shared) = weak.upgrade() {
                        shared.flush_camera();
                    }
                },
            ));
        }
    }

    fn flush_camera(&self) {
        let message = {
            let mut st = self.lock_state();
            st.camera_flush = None;
            match st.pending_camera.take() {
                Some(state) if st.link.is_active() => {
                    SyncMessage::camera(&self.group_id, &self.instance_id, state)
                }
                _ => return,
            }
        };
        self.broadcast(message);
    }

    /// Immediate send for the discrete kinds.
    fn send_now(&self, kind: ChannelKind, body: MessageBody) {
        {
            let st = self.lock_state();
            if !st.link.is_active() || !st.config.may_send(kind) {
                return;
            }
        }
        self.broadcast(SyncMessage::new(body, &self.group_id, &self.instance_id));
    }

    fn resume(&self, reason: &str) {
        let mut st = self.lock_state();
        if st.send_paused {
            log::debug!("[{}] Camera send resumed ({reason})", self.instance_id);
        }
        st.send_paused = false;
        cancel_slot(&mut st.pause_fallback);
    }

    fn stop(&self) {
        {
            let mut st = self.lock_state();
            st.starting = false;
            if !st.link.is_active() {
                return;
            }
            st.link = LinkState::Stopped;
            st.send_paused = false;
            st.cancel_camera_flush();
            cancel_slot(&mut st.echo_reset);
            cancel_slot(&mut st.pause_fallback);
            cancel_slot(&mut st.heartbeat);
            cancel_slot(&mut st.reader);
            st.peers.clear();
            st.runtime = None;
        }
        if let Some(persistence) = &self.persistence {
            persistence.cancel();
        }
        self.broadcast(SyncMessage::leave(&self.group_id, &self.instance_id));
        log::info!("[{}] Left group {}", self.instance_id, self.group_id);
    }
}

/// Builder for [`SyncController`].
pub struct ControllerBuilder {
    group_id: String,
    transport: Arc<dyn TransportChannel>,
    config: SyncConfig,
    timings: TimingConfig,
    store: Option<Arc<dyn SnapshotStore>>,
    instance_id: Option<String>,
}

impl ControllerBuilder {
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn timings(mut self, timings: TimingConfig) -> Self {
        self.timings = timings;
        self
    }

    /// Enable late-join bootstrap and snapshot writes.
    pub fn store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Override the random instance id (stable ids for logs and tests).
    pub fn instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = Some(id.into());
        self
    }

    pub fn build(self) -> SyncController {
        let instance_id = self
            .instance_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let persistence = self
            .store
            .map(|store| PersistenceAdapter::new(store, self.timings.persist_debounce()));

        SyncController {
            shared: Arc::new(Shared {
                state: Mutex::new(ControllerState {
                    link: LinkState::Stopped,
                    starting: false,
                    send_paused: false,
                    config: self.config,
                    peers: PeerRegistry::new(instance_id.clone()),
                    runtime: None,
                    epoch: Instant::now(),
                    initial_state: None,
                    pending_camera: None,
                    camera_flush: None,
                    echo_reset: None,
                    echo_generation: 0,
                    pause_fallback: None,
                    heartbeat: None,
                    reader: None,
                }),
                instance_id,
                group_id: self.group_id,
                transport: self.transport,
                persistence,
                timings: self.timings,
                callbacks: Mutex::new(Callbacks::default()),
            }),
        }
    }
}

/// One synchronized rendering instance.
///
/// The public API never fails: anything that goes wrong is logged and the
/// call does nothing this cycle.
pub struct SyncController {
    shared: Arc<Shared>,
}

impl SyncController {
    pub fn new(group_id: impl Into<String>, config: SyncConfig, transport: Arc<dyn TransportChannel>) -> Self {
        Self::builder(group_id, transport).config(config).build()
    }

    pub fn builder(group_id: impl Into<String>, transport: Arc<dyn TransportChannel>) -> ControllerBuilder {
        ControllerBuilder {
            group_id: group_id.into(),
            transport,
            config: SyncConfig::default(),
            timings: TimingConfig::default(),
            store: None,
            instance_id: None,
        }
    }

    /// Bootstrap from the store, subscribe, start the heartbeat and
    /// announce ourselves. No-op if already running.
    pub async fn start(&self) {
        let shared = &self.shared;
        {
            let mut st = shared.lock_state();
            if st.link.is_active() || st.starting {
                return;
            }
            st.starting = true;
        }

        let initial = match &shared.persistence {
            Some(persistence) => persistence.bootstrap(&shared.group_id).await,
            None => None,
        };

        let runtime = Handle::current();
        {
            let mut st = shared.lock_state();
            if !st.starting {
                // stop() raced the bootstrap read.
                return;
            }
            st.starting = false;
            if let Some(snapshot) = initial {
                log::info!(
                    "[{}] Bootstrapped group {} from snapshot by {}",
                    shared.instance_id,
                    shared.group_id,
                    snapshot.writer_instance_id
                );
                st.initial_state = Some(snapshot);
            }

            match shared.transport.subscribe() {
                Some(subscription) => st.reader = Some(shared.spawn_reader(&runtime, subscription)),
                None if shared.transport.is_available() => {
                    log::warn!("[{}] Transport refused subscription", shared.instance_id)
                }
                None => log::info!("[{}] No transport, running standalone", shared.instance_id),
            }

            st.epoch = Instant::now();
            st.link = LinkState::Idle;
            st.send_paused = false;
            st.heartbeat = Some(shared.spawn_heartbeat(&runtime));
            st.runtime = Some(runtime);
        }

        shared.broadcast(SyncMessage::join(&shared.group_id, &shared.instance_id));
        log::info!(
            "[{}] Joined group {} as {}",
            shared.instance_id,
            shared.group_id,
            self.config().role
        );
    }

    /// Announce departure and cancel every timer and subscription.
    /// Safe to call repeatedly.
    pub fn stop(&self) {
        self.shared.stop();
    }

    /// Queue a local camera for broadcast. Bursts inside the debounce
    /// window collapse into one message carrying the latest state.
    pub fn send_camera(&self, state: CameraState) {
        self.shared.queue_camera(state);
    }

    pub fn send_selection(&self, state: SelectionState) {
        self.shared
            .send_now(ChannelKind::Selection, MessageBody::Selection(state));
    }

    pub fn send_ambiance(&self, state: AmbianceState) {
        self.shared
            .send_now(ChannelKind::Ambiance, MessageBody::Ambiance(state));
    }

    pub fn send_layer_visibility(&self, state: LayerVisibility) {
        self.shared.send_now(ChannelKind::Layer, MessageBody::Layer(state));
    }

    /// Suppress camera sends around a programmatic camera animation.
    /// Drops any queued camera. Resumes by itself after the fallback
    /// timeout if `resume_camera_send()` never comes. Ignored while stopped,
    /// like the `send_*` calls.
    pub fn pause_camera_send(&self) {
        let shared = &self.shared;
        let mut st = shared.lock_state();
        let Some(runtime) = st.active_runtime() else {
            log::trace!("[{}] Pause ignored while stopped", shared.instance_id);
            return;
        };
        st.send_paused = true;
        st.cancel_camera_flush();
        cancel_slot(&mut st.pause_fallback);

        let weak = Arc::downgrade(shared);
        st.pause_fallback = Some(ScheduledTask::after(
            &runtime,
            shared.timings.pause_fallback(),
            move || {
                if let Some(shared) = weak.upgrade() {
                    shared.resume("fallback timeout");
                }
            },
        ));
    }

    pub fn resume_camera_send(&self) {
        self.shared.resume("caller");
    }

    pub fn is_camera_send_paused(&self) -> bool {
        self.shared.lock_state().send_paused
    }

    pub fn set_on_camera_change(&self, cb: impl Fn(&CameraState, &str) + Send + Sync + 'static) {
        self.shared.lock_callbacks().camera = Some(Arc::new(cb));
    }

    pub fn set_on_selection_change(&self, cb: impl Fn(&SelectionState, &str) + Send + Sync + 'static) {
        self.shared.lock_callbacks().selection = Some(Arc::new(cb));
    }

    pub fn set_on_ambiance_change(&self, cb: impl Fn(&AmbianceState, &str) + Send + Sync + 'static) {
        self.shared.lock_callbacks().ambiance = Some(Arc::new(cb));
    }

    pub fn set_on_layer_change(&self, cb: impl Fn(&LayerVisibility, &str) + Send + Sync + 'static) {
        self.shared.lock_callbacks().layer = Some(Arc::new(cb));
    }

    /// True right after an inbound camera was applied.
    pub fn should_ignore_camera(&self) -> bool {
        self.shared.lock_state().link == LinkState::Receiving
    }

    /// Renderer reports the end of a user gesture. Writers persist it.
    pub fn notify_gesture_end(&self, state: CameraState) {
        let shared = &self.shared;
        let Some(persistence) = &shared.persistence else {
            return;
        };
        let st = shared.lock_state();
        let Some(runtime) = st.active_runtime() else {
            return;
        };
        if st.config.role.is_writer() {
            persistence.schedule_save(
                &runtime,
                PersistedSnapshot::new(&shared.group_id, state, &shared.instance_id),
            );
        }
    }

    /// Feed a decoded message from a host-managed transport.
    pub fn on_message(&self, message: SyncMessage) {
        self.shared.handle_message(message);
    }

    /// Feed a raw frame from a host-managed transport.
    pub fn on_frame(&self, frame: &[u8]) {
        self.shared.handle_frame(frame);
    }

    /// Swap the sync policy. A role change while running rebuilds the
    /// transport subscription.
    pub fn update_config(&self, config: SyncConfig) {
        let shared = &self.shared;
        let mut st = shared.lock_state();
        let role_changed = st.config.role != config.role;
        st.config = config;

        if !st.config.may_send(ChannelKind::Camera) {
            st.cancel_camera_flush();
        }
        if !st.config.role.is_writer() {
            if let Some(persistence) = &shared.persistence {
                persistence.cancel();
            }
        }

        if role_changed {
            log::debug!("[{}] Role changed to {}", shared.instance_id, st.config.role);
            if let Some(runtime) = st.active_runtime() {
                cancel_slot(&mut st.reader);
                st.reader = shared
                    .transport
                    .subscribe()
                    .map(|sub| shared.spawn_reader(&runtime, sub));
            }
        }
    }

    pub fn config(&self) -> SyncConfig {
        self.shared.lock_state().config.clone()
    }

    /// Snapshot read at startup, for the host to apply before live traffic.
    pub fn initial_state(&self) -> Option<PersistedSnapshot> {
        self.shared.lock_state().initial_state.clone()
    }

    pub fn peer_count(&self) -> usize {
        self.shared.lock_state().peers.count()
    }

    pub fn peers(&self) -> Vec<PeerInfo> {
        self.shared.lock_state().peers.peers()
    }

    pub fn link_state(&self) -> LinkState {
        self.shared.lock_state().link
    }

    pub fn is_running(&self) -> bool {
        self.link_state().is_active()
    }

    pub fn instance_id(&self) -> &str {
        &self.shared.instance_id
    }

    pub fn group_id(&self) -> &str {
        &self.shared.group_id
    }

    pub fn transport_available(&self) -> bool {
        self.shared.transport.is_available()
    }
}

/// Dropping stops the controller. The transport handle belongs to the host
/// and stays open.
impl Drop for SyncController {
    fn drop(&mut self) {
        self.shared.stop();
    }
}
