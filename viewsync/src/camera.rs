//! Camera state as seen by the sync engine.
//!
//! Two renderer families share the engine:
//!
//! ```text
//! Map renderer    → MapCamera   { center: [lng, lat], zoom, pitch, bearing }
//! Scene renderer  → SceneCamera { position: Vec3, target: Vec3, zoom }
//! ```
//!
//! The engine never owns a camera. It reads one from the renderer, hands a
//! derived one back, and otherwise treats these values as immutable.

use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Sub};

/// 3D vector in scene coordinates (y-up).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };
    pub const UP: Vec3 = Vec3 { x: 0.0, y: 1.0, z: 0.0 };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn length(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Euclidean distance to another point.
    pub fn distance(&self, other: &Vec3) -> f64 {
        (*self - *other).length()
    }
}

impl Default for Vec3 {
    fn default() -> Self {
        Self::ZERO
    }
}

impl Add for Vec3 {
    type Output = Vec3;

    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Vec3;

    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Vec3 {
    type Output = Vec3;

    fn mul(self, rhs: f64) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// Viewpoint of a 2D/2.5D map renderer. Unknown fields are ignored and a
/// missing pitch or bearing reads as 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapCamera {
    /// `[longitude, latitude]` in degrees.
    pub center: [f64; 2],
    pub zoom: f64,
    /// Tilt in degrees, 0 = looking straight down.
    #[serde(default)]
    pub pitch: f64,
    /// Rotation in degrees clockwise from north.
    #[serde(default)]
    pub bearing: f64,
}

impl MapCamera {
    pub fn new(lng: f64, lat: f64, zoom: f64) -> Self {
        Self {
            center: [lng, lat],
            zoom,
            pitch: 0.0,
            bearing: 0.0,
        }
    }

    pub fn with_pitch(mut self, pitch: f64) -> Self {
        self.pitch = pitch;
        self
    }

    pub fn with_bearing(mut self, bearing: f64) -> Self {
        self.bearing = bearing;
        self
    }

    pub fn lng(&self) -> f64 {
        self.center[0]
    }

    pub fn lat(&self) -> f64 {
        self.center[1]
    }
}

/// Viewpoint of an orbiting 3D scene renderer.
///
/// Wire shape is flat: `{ px, py, pz, tx, ty, tz, zoom }`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "ScenePayload", into = "ScenePayload")]
pub struct SceneCamera {
    pub position: Vec3,
    pub target: Vec3,
    pub zoom: f64,
}

impl SceneCamera {
    pub fn new(position: Vec3, target: Vec3, zoom: f64) -> Self {
        Self { position, target, zoom }
    }

    /// Distance from the eye to the orbit target.
    pub fn distance(&self) -> f64 {
        self.position.distance(&self.target)
    }
}

#[derive(Serialize, Deserialize)]
struct ScenePayload {
    px: f64,
    py: f64,
    pz: f64,
    tx: f64,
    ty: f64,
    tz: f64,
    zoom: f64,
}

impl From<ScenePayload> for SceneCamera {
    fn from(p: ScenePayload) -> Self {
        Self {
            position: Vec3::new(p.px, p.py, p.pz),
            target: Vec3::new(p.tx, p.ty, p.tz),
            zoom: p.zoom,
        }
    }
}

impl From<SceneCamera> for ScenePayload {
    fn from(c: SceneCamera) -> Self {
        Self {
            px: c.position.x,
            py: c.position.y,
            pz: c.position.z,
            tx: c.target.x,
            ty: c.target.y,
            tz: c.target.z,
            zoom: c.zoom,
        }
    }
}

/// Any camera the engine can carry. The payload shape selects the variant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CameraState {
    Map(MapCamera),
    Scene(SceneCamera),
}

impl CameraState {
    pub fn zoom(&self) -> f64 {
        match self {
            CameraState::Map(c) => c.zoom,
            CameraState::Scene(c) => c.zoom,
        }
    }

    pub fn as_map(&self) -> Option<&MapCamera> {
        match self {
            CameraState::Map(c) => Some(c),
            CameraState::Scene(_) => None,
        }
    }

    pub fn as_scene(&self) -> Option<&SceneCamera> {
        match self {
            CameraState::Scene(c) => Some(c),
            CameraState::Map(_) => None,
        }
    }
}

impl From<MapCamera> for CameraState {
    fn from(c: MapCamera) -> Self {
        CameraState::Map(c)
    }
}

impl From<SceneCamera> for CameraState {
    fn from(c: SceneCamera) -> Self {
        CameraState::Scene(c)
    }
}
