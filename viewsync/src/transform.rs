//! View transforms: derive one instance's view from a broadcast reference view.
//!
//! ```text
//! reference CameraState ──► TransformConfig::apply() ──► derived CameraState
//!                            None | Offset | Mirror | Custom
//! ```
//!
//! Every transform is pure. For scene cameras the mirror transform works in
//! spherical coordinates around the orbit target:
//!
//! ```text
//!            +y (up)
//!             │   position
//!             │  ╱
//!             │ ╱ elevation
//!   target ───┼──────── +z      azimuth = atan2(dx, dz)
//!            ╱
//!          +x
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::camera::{CameraState, MapCamera, SceneCamera, Vec3};

/// Elevation stays this far (in degrees) from the poles.
pub const ELEVATION_EPSILON_DEG: f64 = 0.01;

/// Wrap a bearing into `[0, 360)`.
pub fn normalize_bearing(bearing: f64) -> f64 {
    let b = bearing.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negatives
    if b >= 360.0 {
        0.0
    } else {
        b
    }
}

/// Componentwise deltas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct OffsetParams {
    pub d_lng: f64,
    pub d_lat: f64,
    pub d_zoom: f64,
    pub d_pitch: f64,
    pub d_bearing: f64,
    /// Scene cameras only: translation applied to both eye and target.
    pub translate: [f64; 3],
}

impl OffsetParams {
    pub fn pan(d_lng: f64, d_lat: f64) -> Self {
        Self {
            d_lng,
            d_lat,
            ..Self::default()
        }
    }

    pub fn zoom(d_zoom: f64) -> Self {
        Self {
            d_zoom,
            ..Self::default()
        }
    }

    fn apply(&self, state: &CameraState) -> CameraState {
        match state {
            CameraState::Map(c) => CameraState::Map(MapCamera {
                center: [c.center[0] + self.d_lng, c.center[1] + self.d_lat],
                zoom: (c.zoom + self.d_zoom).max(0.0),
                pitch: c.pitch + self.d_pitch,
                bearing: normalize_bearing(c.bearing + self.d_bearing),
            }),
            CameraState::Scene(c) => {
                let t = Vec3::new(self.translate[0], self.translate[1], self.translate[2]);
                CameraState::Scene(SceneCamera {
                    position: c.position + t,
                    target: c.target + t,
                    zoom: (c.zoom + self.d_zoom).max(0.0),
                })
            }
        }
    }
}

/// Parameters of the mirror transform.
///
/// Map cameras ignore everything here and simply turn around
/// (`bearing + 180`). Scene cameras are rebuilt from spherical
/// coordinates: optionally negated azimuth/elevation, plus the rotation
/// offsets, times `distance_scale`, around a target nudged along the
/// reference view's right/forward/up axes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MirrorParams {
    /// Added to the (possibly negated) azimuth, degrees, always >= 0.
    pub azimuth_deg: f64,
    /// Added to the (possibly negated) elevation, degrees, always >= 0.
    pub elevation_deg: f64,
    pub mirror_azimuth: bool,
    pub mirror_elevation: bool,
    pub distance_scale: f64,
    /// Target offset along the reference right axis.
    pub lateral: f64,
    /// Target offset along the reference forward axis.
    pub depth: f64,
    /// Target offset along world up.
    pub vertical: f64,
}

impl Default for MirrorParams {
    fn default() -> Self {
        Self {
            azimuth_deg: 180.0,
            elevation_deg: 0.0,
            mirror_azimuth: false,
            mirror_elevation: false,
            distance_scale: 1.0,
            lateral: 0.0,
            depth: 0.0,
            vertical: 0.0,
        }
    }
}

impl MirrorParams {
    /// A negative rotation selects mirrored mode for that angle; its
    /// magnitude is kept as the rotation offset.
    pub fn new(azimuth_deg: f64, elevation_deg: f64) -> Self {
        Self {
            azimuth_deg: azimuth_deg.abs(),
            elevation_deg: elevation_deg.abs(),
            mirror_azimuth: azimuth_deg < 0.0,
            mirror_elevation: elevation_deg < 0.0,
            ..Self::default()
        }
    }

    pub fn with_distance_scale(mut self, scale: f64) -> Self {
        self.distance_scale = scale;
        self
    }

    pub fn with_target_offset(mut self, lateral: f64, depth: f64, vertical: f64) -> Self {
        self.lateral = lateral;
        self.depth = depth;
        self.vertical = vertical;
        self
    }

    fn apply(&self, state: &CameraState) -> CameraState {
        match state {
            CameraState::Map(c) => CameraState::Map(MapCamera {
                bearing: normalize_bearing(c.bearing + 180.0),
                ..*c
            }),
            CameraState::Scene(c) => CameraState::Scene(self.apply_scene(c)),
        }
    }

    fn apply_scene(&self, cam: &SceneCamera) -> SceneCamera {
        let orbit = Spherical::from_offset(cam.position - cam.target);

        let base_az = if self.mirror_azimuth { -orbit.azimuth } else { orbit.azimuth };
        let base_el = if self.mirror_elevation { -orbit.elevation } else { orbit.elevation };
        let limit = (90.0 - ELEVATION_EPSILON_DEG).to_radians();

        let derived = Spherical {
            azimuth: base_az + self.azimuth_deg.to_radians(),
            elevation: (base_el + self.elevation_deg.to_radians()).clamp(-limit, limit),
            distance: orbit.distance * self.distance_scale,
        };

        // Axes come from the reference view, not the derived one.
        let (sin_az, cos_az) = orbit.azimuth.sin_cos();
        let forward = Vec3::new(-sin_az, 0.0, -cos_az);
        let right = Vec3::new(cos_az, 0.0, -sin_az);
        let target = cam.target
            + right * self.lateral
            + forward * self.depth
            + Vec3::UP * self.vertical;

        SceneCamera {
            position: target + derived.to_offset(),
            target,
            zoom: cam.zoom,
        }
    }
}

/// Orbit coordinates of an eye relative to its target, in radians.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Spherical {
    azimuth: f64,
    elevation: f64,
    distance: f64,
}

impl Spherical {
    fn from_offset(offset: Vec3) -> Self {
        let distance = offset.length();
        if distance <= f64::EPSILON {
            return Self {
                azimuth: 0.0,
                elevation: 0.0,
                distance: 0.0,
            };
        }
        Self {
            azimuth: offset.x.atan2(offset.z),
            elevation: (offset.y / distance).clamp(-1.0, 1.0).asin(),
            distance,
        }
    }

    fn to_offset(self) -> Vec3 {
        let (sin_el, cos_el) = self.elevation.sin_cos();
        let (sin_az, cos_az) = self.azimuth.sin_cos();
        Vec3::new(
            self.distance * cos_el * sin_az,
            self.distance * sin_el,
            self.distance * cos_el * cos_az,
        )
    }
}

type TransformFn = dyn Fn(&CameraState) -> CameraState + Send + Sync;

/// Caller-supplied pure transform.
#[derive(Clone)]
pub struct CustomTransform(Arc<TransformFn>);

impl CustomTransform {
    pub fn new(f: impl Fn(&CameraState) -> CameraState + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }
}

impl fmt::Debug for CustomTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomTransform(..)")
    }
}

impl PartialEq for CustomTransform {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// How an instance derives its view from an incoming reference view.
///
/// `Custom` is code-only: it is skipped by serde, so configs that carry it
/// cannot be serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransformConfig {
    #[default]
    None,
    Offset(OffsetParams),
    Mirror(MirrorParams),
    #[serde(skip)]
    Custom(CustomTransform),
}

impl TransformConfig {
    pub fn mirror() -> Self {
        TransformConfig::Mirror(MirrorParams::default())
    }

    pub fn custom(f: impl Fn(&CameraState) -> CameraState + Send + Sync + 'static) -> Self {
        TransformConfig::Custom(CustomTransform::new(f))
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, TransformConfig::None)
    }

    /// Derive this instance's camera from a reference camera.
    pub fn apply(&self, reference: &CameraState) -> CameraState {
        match self {
            TransformConfig::None => *reference,
            TransformConfig::Offset(params) => params.apply(reference),
            TransformConfig::Mirror(params) => params.apply(reference),
            TransformConfig::Custom(custom) => (custom.0)(reference),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paris() -> CameraState {
        MapCamera::new(2.3522, 48.8566, 10.0).into()
    }

    fn orbit() -> SceneCamera {
        SceneCamera::new(Vec3::new(3.0, 4.0, 12.0), Vec3::new(1.0, 0.0, -2.0), 1.0)
    }

    fn assert_vec_close(a: Vec3, b: Vec3) {
        assert!(a.distance(&b) < 1e-9, "{a:?} != {b:?}");
    }

    #[test]
    fn test_none_is_identity() {
        let scene: CameraState = orbit().into();
        assert_eq!(TransformConfig::None.apply(&paris()), paris());
        assert_eq!(TransformConfig::None.apply(&scene), scene);
    }

    #[test]
    fn test_offset_zoom_out() {
        let derived = TransformConfig::Offset(OffsetParams::zoom(-2.0)).apply(&paris());
        assert_eq!(derived, MapCamera::new(2.3522, 48.8566, 8.0).into());
    }

    #[test]
    fn test_offset_pan_and_bearing_wrap() {
        let params = OffsetParams {
            d_lng: 1.0,
            d_lat: -0.5,
            d_bearing: 200.0,
            ..OffsetParams::default()
        };
        let reference: CameraState = MapCamera::new(10.0, 20.0, 5.0).with_bearing(170.0).into();
        let derived = *TransformConfig::Offset(params).apply(&reference).as_map().unwrap();
        assert_eq!(derived.center, [11.0, 19.5]);
        assert!((derived.bearing - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_offset_zoom_floor() {
        let derived = TransformConfig::Offset(OffsetParams::zoom(-20.0)).apply(&paris());
        assert_eq!(derived.zoom(), 0.0);
    }

    #[test]
    fn test_offset_translates_scene() {
        let params = OffsetParams {
            translate: [1.0, 2.0, 3.0],
            ..OffsetParams::default()
        };
        let derived = TransformConfig::Offset(params).apply(&orbit().into());
        let derived = derived.as_scene().unwrap();
        assert_vec_close(derived.position, Vec3::new(4.0, 6.0, 15.0));
        assert_vec_close(derived.target, Vec3::new(2.0, 2.0, 1.0));
    }

    #[test]
    fn test_mirror_map_turns_around() {
        let reference: CameraState = MapCamera::new(0.0, 0.0, 3.0).with_bearing(270.0).into();
        let derived = TransformConfig::mirror().apply(&reference);
        assert_eq!(derived.as_map().unwrap().bearing, 90.0);
    }

    #[test]
    fn test_mirror_twice_is_identity_map() {
        let mirror = TransformConfig::mirror();
        for bearing in [0.0, 45.0, 179.5, 180.0, 359.0, -30.0] {
            let reference: CameraState = MapCamera::new(5.0, 5.0, 4.0).with_bearing(bearing).into();
            let twice = mirror.apply(&mirror.apply(&reference));
            let got = twice.as_map().unwrap().bearing;
            assert!(
                (normalize_bearing(got) - normalize_bearing(bearing)).abs() < 1e-9,
                "bearing {bearing} came back as {got}"
            );
        }
    }

    #[test]
    fn test_mirror_scene_opposite_side() {
        let cam = SceneCamera::new(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, 1.0);
        let derived = TransformConfig::mirror().apply(&cam.into());
        let derived = derived.as_scene().unwrap();
        assert_vec_close(derived.position, Vec3::new(0.0, 0.0, -10.0));
        assert_vec_close(derived.target, Vec3::ZERO);
    }

    #[test]
    fn test_mirror_twice_is_identity_scene() {
        let mirror = TransformConfig::mirror();
        let cam: CameraState = orbit().into();
        let twice = mirror.apply(&mirror.apply(&cam));
        let twice = twice.as_scene().unwrap();
        assert_vec_close(twice.position, orbit().position);
        assert_vec_close(twice.target, orbit().target);
    }

    #[test]
    fn test_mirror_preserves_distance_and_scales() {
        let cam = orbit();
        let plain = TransformConfig::mirror().apply(&cam.into());
        assert!((plain.as_scene().unwrap().distance() - cam.distance()).abs() < 1e-9);

        let scaled = TransformConfig::Mirror(MirrorParams::default().with_distance_scale(2.0))
            .apply(&cam.into());
        assert!((scaled.as_scene().unwrap().distance() - 2.0 * cam.distance()).abs() < 1e-9);
    }

    #[test]
    fn test_negative_rotation_selects_mirror_mode() {
        let params = MirrorParams::new(-30.0, 15.0);
        assert!(params.mirror_azimuth);
        assert!(!params.mirror_elevation);
        assert_eq!(params.azimuth_deg, 30.0);
        assert_eq!(params.elevation_deg, 15.0);
    }

    #[test]
    fn test_mirrored_azimuth_reflects_across_z() {
        // Eye on +x side, azimuth 90°. Mirrored azimuth with no rotation → -90°.
        let cam = SceneCamera::new(Vec3::new(10.0, 0.0, 0.0), Vec3::ZERO, 1.0);
        let params = MirrorParams {
            azimuth_deg: 0.0,
            mirror_azimuth: true,
            ..MirrorParams::default()
        };
        let derived = TransformConfig::Mirror(params).apply(&cam.into());
        assert_vec_close(derived.as_scene().unwrap().position, Vec3::new(-10.0, 0.0, 0.0));
    }

    #[test]
    fn test_elevation_clamped_below_pole() {
        let cam = SceneCamera::new(Vec3::new(0.0, 8.0, 6.0), Vec3::ZERO, 1.0);
        let params = MirrorParams {
            azimuth_deg: 0.0,
            elevation_deg: 80.0,
            ..MirrorParams::default()
        };
        let derived = TransformConfig::Mirror(params).apply(&cam.into());
        let derived = derived.as_scene().unwrap();
        let offset = derived.position - derived.target;
        let elevation = (offset.y / offset.length()).asin().to_degrees();
        assert!(elevation < 90.0);
        assert!((elevation - (90.0 - ELEVATION_EPSILON_DEG)).abs() < 1e-6);
    }

    #[test]
    fn test_target_offset_uses_reference_axes() {
        // Looking down -z from +z: right is +x, forward is -z.
        let cam = SceneCamera::new(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, 1.0);
        let params = MirrorParams {
            azimuth_deg: 0.0,
            ..MirrorParams::default()
        }
        .with_target_offset(2.0, 3.0, 1.0);
        let derived = TransformConfig::Mirror(params).apply(&cam.into());
        let derived = derived.as_scene().unwrap();
        assert_vec_close(derived.target, Vec3::new(2.0, 1.0, -3.0));
        assert_vec_close(derived.position, Vec3::new(2.0, 1.0, 7.0));
    }

    #[test]
    fn test_custom_delegates() {
        let transform = TransformConfig::custom(|state| match state {
            CameraState::Map(c) => CameraState::Map(MapCamera { zoom: 1.0, ..*c }),
            other => *other,
        });
        assert_eq!(transform.apply(&paris()).zoom(), 1.0);
        assert!(!transform.is_identity());
    }

    #[test]
    fn test_transform_config_json() {
        let parsed: TransformConfig =
            serde_json::from_str(r#"{"kind":"offset","dZoom":-2}"#).unwrap();
        assert_eq!(parsed, TransformConfig::Offset(OffsetParams::zoom(-2.0)));
        let parsed: TransformConfig = serde_json::from_str(r#"{"kind":"none"}"#).unwrap();
        assert!(parsed.is_identity());
    }
}
