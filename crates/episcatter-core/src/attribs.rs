//! Per-frame camera and light attributes supplied by the application.

use glam::{Mat4, Vec2, Vec3, Vec3Swizzles, Vec4, Vec4Swizzles};

use crate::config::LightType;

/// The light's screen position is clamped to this distance from the center.
pub const MAX_LIGHT_SCREEN_DISTANCE: f32 = 100.0;

/// Camera matrices for one frame.
///
/// Left-handed view space looking down +Z; the projection maps depth to
/// `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraAttribs {
    /// World-space eye position.
    pub position: Vec3,
    /// World to view transform.
    pub view: Mat4,
    /// View to clip transform.
    pub proj: Mat4,
    /// World to clip transform.
    pub view_proj: Mat4,
    /// Clip to world transform.
    pub inv_view_proj: Mat4,
}

impl CameraAttribs {
    /// Builds the attributes from view and projection matrices.
    pub fn new(view: Mat4, proj: Mat4) -> Self {
        let view_proj = proj * view;
        Self {
            position: view.inverse().w_axis.xyz(),
            view,
            proj,
            view_proj,
            inv_view_proj: view_proj.inverse(),
        }
    }

    /// Perspective camera looking from `eye` at `target`.
    pub fn look_at(
        eye: Vec3,
        target: Vec3,
        up: Vec3,
        fov_y: f32,
        aspect: f32,
        near: f32,
        far: f32,
    ) -> Self {
        Self::new(
            Mat4::look_at_lh(eye, target, up),
            Mat4::perspective_lh(fov_y, aspect, near, far),
        )
    }

    /// Converts a non-linear depth buffer value to camera-space Z.
    pub fn depth_to_camera_z(&self, depth: f32) -> f32 {
        let a = self.proj.z_axis.z;
        let b = self.proj.w_axis.z;
        b / (depth - a)
    }

    /// Converts camera-space Z back to a depth buffer value.
    pub fn camera_z_to_depth(&self, camera_z: f32) -> f32 {
        let a = self.proj.z_axis.z;
        let b = self.proj.w_axis.z;
        a + b / camera_z
    }

    /// World position of a screen point at the given camera-space Z.
    pub fn unproject(&self, screen_pos: Vec2, camera_z: f32) -> Vec3 {
        let depth = self.camera_z_to_depth(camera_z);
        let p = self.inv_view_proj * Vec4::new(screen_pos.x, screen_pos.y, depth, 1.0);
        p.xyz() / p.w
    }

    /// Projects a world point to normalized device coordinates.
    pub fn project(&self, world: Vec3) -> Vec3 {
        let p = self.view_proj * world.extend(1.0);
        p.xyz() / p.w
    }
}

/// Light source attributes for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightAttribs {
    /// Unit direction from the scene towards the light (directional), or from
    /// the camera towards the light position (point/spot).
    pub dir_on_light: Vec3,
    /// World position of point and spot lights.
    pub world_pos: Vec3,
    /// Spot light axis.
    pub spot_axis: Vec3,
    /// Cosine of the spot light half angle.
    pub spot_cos_angle: f32,
    /// Light color.
    pub color: Vec3,
    /// Light intensity multiplier.
    pub intensity: f32,
    /// World to light clip space, the transform the shadow map was rendered with.
    pub world_to_light_proj: Mat4,
}

impl LightAttribs {
    /// Directional light shining along `-dir_on_light`.
    pub fn directional(
        dir_on_light: Vec3,
        color: Vec3,
        intensity: f32,
        world_to_light_proj: Mat4,
    ) -> Self {
        Self {
            dir_on_light: dir_on_light.normalize(),
            world_pos: Vec3::ZERO,
            spot_axis: -dir_on_light.normalize(),
            spot_cos_angle: -1.0,
            color,
            intensity,
            world_to_light_proj,
        }
    }

    /// Point light at `world_pos`.
    pub fn point(world_pos: Vec3, color: Vec3, intensity: f32, world_to_light_proj: Mat4) -> Self {
        Self {
            dir_on_light: Vec3::Y,
            world_pos,
            spot_axis: Vec3::NEG_Y,
            spot_cos_angle: -1.0,
            color,
            intensity,
            world_to_light_proj,
        }
    }

    /// Spot light at `world_pos` pointing along `axis` with half angle `angle`.
    pub fn spot(
        world_pos: Vec3,
        axis: Vec3,
        angle: f32,
        color: Vec3,
        intensity: f32,
        world_to_light_proj: Mat4,
    ) -> Self {
        Self {
            dir_on_light: -axis.normalize(),
            world_pos,
            spot_axis: axis.normalize(),
            spot_cos_angle: angle.cos(),
            color,
            intensity,
            world_to_light_proj,
        }
    }

    /// Updates `dir_on_light` of positional lights for the current camera.
    pub fn track_camera(&mut self, light_type: LightType, camera: &CameraAttribs) {
        if light_type.is_positional() {
            let to_light = self.world_pos - camera.position;
            if to_light.length_squared() > 0.0 {
                self.dir_on_light = to_light.normalize();
            }
        }
    }

    /// Light color scaled by intensity.
    pub fn radiance(&self) -> Vec3 {
        self.color * self.intensity
    }

    /// Projects the light onto the screen.
    ///
    /// Directional lights project their direction as a point at infinity. The
    /// result is clamped to [`MAX_LIGHT_SCREEN_DISTANCE`] so that nearly
    /// parallel lights still produce finite epipolar lines.
    pub fn screen_position(&self, light_type: LightType, camera: &CameraAttribs) -> Vec2 {
        let homogeneous = match light_type {
            LightType::Directional => self.dir_on_light.extend(0.0),
            LightType::Spot | LightType::Point => self.world_pos.extend(1.0),
        };
        let clip = camera.view_proj * homogeneous;
        let w = if clip.w.abs() < 1e-7 {
            1e-7_f32.copysign(clip.w)
        } else {
            clip.w
        };
        let pos = clip.xy() / w;
        let len = pos.length();
        if len > MAX_LIGHT_SCREEN_DISTANCE {
            pos * (MAX_LIGHT_SCREEN_DISTANCE / len)
        } else {
            pos
        }
    }

    /// Returns true if `screen_pos` lies on the outermost pixel centers of a
    /// `width` x `height` screen.
    pub fn is_on_screen(screen_pos: Vec2, width: u32, height: u32) -> bool {
        #[allow(clippy::cast_precision_loss)]
        let (w, h) = (width as f32, height as f32);
        screen_pos.x.abs() <= 1.0 - 1.0 / w && screen_pos.y.abs() <= 1.0 - 1.0 / h
    }

    /// Camera position in shadow map UV and light clip depth.
    pub fn camera_uv_and_depth(&self, camera: &CameraAttribs) -> Vec4 {
        let p = self.world_to_light_proj * camera.position.extend(1.0);
        let ndc = p.xyz() / p.w;
        let uv = proj_to_uv(ndc.xy());
        Vec4::new(uv.x, uv.y, ndc.z, p.w)
    }
}

/// Maps normalized device XY to texture UV.
pub fn proj_to_uv(ndc: Vec2) -> Vec2 {
    Vec2::new(0.5 + 0.5 * ndc.x, 0.5 - 0.5 * ndc.y)
}

/// Maps texture UV to normalized device XY.
pub fn uv_to_proj(uv: Vec2) -> Vec2 {
    Vec2::new(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn camera() -> CameraAttribs {
        CameraAttribs::look_at(
            Vec3::new(0.0, 2.0, -10.0),
            Vec3::ZERO,
            Vec3::Y,
            std::f32::consts::FRAC_PI_3,
            1.5,
            0.1,
            100.0,
        )
    }

    #[test]
    fn test_depth_roundtrip() {
        let cam = camera();
        for z in [0.1_f32, 1.0, 7.5, 99.0] {
            let depth = cam.camera_z_to_depth(z);
            assert!((0.0..=1.0).contains(&depth));
            let back = cam.depth_to_camera_z(depth);
            assert!((back - z).abs() < 1e-3 * z, "{z} -> {back}");
        }
        assert!((cam.depth_to_camera_z(1.0) - 100.0).abs() < 1e-2);
    }

    #[test]
    fn test_unproject_matches_project() {
        let cam = camera();
        let world = Vec3::new(1.0, 0.5, 3.0);
        let ndc = cam.project(world);
        let view_z = (cam.view * world.extend(1.0)).z;
        let back = cam.unproject(ndc.truncate(), view_z);
        assert!((back - world).length() < 1e-3);
        assert!((cam.position - Vec3::new(0.0, 2.0, -10.0)).length() < 1e-4);
    }

    #[test]
    fn test_light_screen_position_clamped() {
        let cam = camera();
        let light = LightAttribs::directional(Vec3::Y, Vec3::ONE, 1.0, Mat4::IDENTITY);
        let pos = light.screen_position(LightType::Directional, &cam);
        assert!(pos.length() <= MAX_LIGHT_SCREEN_DISTANCE + 1e-3);
        assert!(!LightAttribs::is_on_screen(pos, 640, 480));

        let point = LightAttribs::point(Vec3::new(0.0, 0.0, 0.0), Vec3::ONE, 1.0, Mat4::IDENTITY);
        let pos = point.screen_position(LightType::Point, &cam);
        assert!(LightAttribs::is_on_screen(pos, 640, 480));
    }

    proptest! {
        #[test]
        fn prop_depth_roundtrip_over_frustum(z in 0.1_f32..100.0) {
            let cam = camera();
            let depth = cam.camera_z_to_depth(z);
            prop_assert!((0.0..=1.0).contains(&depth));
            let back = cam.depth_to_camera_z(depth);
            prop_assert!((back - z).abs() <= 2e-3 * z, "{} -> {}", z, back);
        }

        #[test]
        fn prop_unproject_inverts_project(
            x in -0.9_f32..0.9,
            y in -0.9_f32..0.9,
            z in 0.5_f32..80.0,
        ) {
            let cam = camera();
            let world = cam.unproject(Vec2::new(x, y), z);
            let ndc = cam.project(world);
            prop_assert!((ndc.x - x).abs() < 1e-3 && (ndc.y - y).abs() < 1e-3, "{:?}", ndc);
            prop_assert!(((cam.view * world.extend(1.0)).z - z).abs() < 1e-2 * z);
        }
    }

    #[test]
    fn test_uv_roundtrip() {
        let ndc = Vec2::new(-0.25, 0.75);
        assert!((uv_to_proj(proj_to_uv(ndc)) - ndc).length() < 1e-6);
        assert_eq!(proj_to_uv(Vec2::new(-1.0, 1.0)), Vec2::ZERO);
    }
}
