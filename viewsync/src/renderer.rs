//! Renderer integration: bridges a host renderer's camera with a
//! [`SyncController`].
//!
//! ## Responsibilities
//!
//! 1. Push inbound (already transformed) cameras into the renderer.
//! 2. Turn renderer move events into camera sends, skipping echoes.
//! 3. Turn gesture-end events into snapshot writes and end any pause.
//! 4. Apply the late-join snapshot once, before live traffic.
//!
//! ## Data flow
//!
//! ```text
//!  renderer "move" event ──► RendererBridge::on_move()
//!       │                         │  should_ignore_camera()? ─► drop
//!       │                         ▼
//!       │                    send_camera(renderer.camera_state())
//!       │
//!  renderer "gesture end" ──► RendererBridge::on_gesture_end()
//!                                 │  resume_camera_send()
//!                                 ▼
//!                            notify_gesture_end(renderer.camera_state())
//!
//!  SyncController ── on_camera_change ──► renderer.set_camera_state(_, false)
//! ```

use std::sync::Arc;

use crate::camera::CameraState;
use crate::controller::SyncController;

/// What the engine needs from a map or scene renderer.
pub trait CameraRenderer: Send + Sync {
    fn camera_state(&self) -> CameraState;

    /// Move the view. Setting a camera usually fires the renderer's own
    /// move event; the bridge filters those through the echo window.
    fn set_camera_state(&self, state: CameraState, animate: bool);
}

/// Binds one renderer to one controller.
pub struct RendererBridge {
    controller: Arc<SyncController>,
    renderer: Arc<dyn CameraRenderer>,
}

impl RendererBridge {
    /// Takes over the controller's camera callback.
    pub fn new(controller: Arc<SyncController>, renderer: Arc<dyn CameraRenderer>) -> Self {
        let sink = renderer.clone();
        controller.set_on_camera_change(move |state, _source| sink.set_camera_state(*state, false));
        Self { controller, renderer }
    }

    /// Apply the snapshot read at startup, through this instance's
    /// transform. Returns whether anything was applied.
    pub fn apply_initial_state(&self) -> bool {
        let Some(snapshot) = self.controller.initial_state() else {
            return false;
        };
        let derived = self.controller.config().transform.apply(&snapshot.camera);
        self.renderer.set_camera_state(derived, false);
        true
    }

    /// Call from the renderer's move handler.
    pub fn on_move(&self) {
        if self.controller.should_ignore_camera() {
            log::trace!("[{}] Ignoring echoed move", self.controller.instance_id());
            return;
        }
        self.controller.send_camera(self.renderer.camera_state());
    }

    /// Call when the user releases the view (drag end, wheel settle).
    pub fn on_gesture_end(&self) {
        self.controller.resume_camera_send();
        if self.controller.should_ignore_camera() {
            return;
        }
        self.controller.notify_gesture_end(self.renderer.camera_state());
    }

    /// Programmatic animated move: camera sends stay off until the
    /// animation's gesture end (or the fallback timeout).
    pub fn fly_to(&self, state: CameraState) {
        self.controller.pause_camera_send();
        self.renderer.set_camera_state(state, true);
    }

    pub fn controller(&self) -> &Arc<SyncController> {
        &self.controller
    }
}
