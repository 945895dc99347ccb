//! Orbit camera.

use glam::{Mat4, Vec3};

/// Perspective camera circling `target`.
#[derive(Debug, Clone)]
pub struct OrbitCamera {
    pub target: Vec3,
    pub distance: f32,
    /// Degrees around +Y.
    pub yaw: f32,
    /// Degrees above the XZ plane.
    pub pitch: f32,
    /// Vertical field of view in degrees.
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for OrbitCamera {
    fn default() -> Self {
        Self {
            target: Vec3::ZERO,
            distance: 6.0,
            yaw: 35.0,
            pitch: 25.0,
            fov_y: 45.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl OrbitCamera {
    const MIN_DISTANCE: f32 = 0.5;
    const MAX_PITCH: f32 = 89.0;

    pub fn eye(&self) -> Vec3 {
        let (yaw, pitch) = (self.yaw.to_radians(), self.pitch.to_radians());
        let offset = Vec3::new(
            pitch.cos() * yaw.sin(),
            pitch.sin(),
            pitch.cos() * yaw.cos(),
        );
        self.target + offset * self.distance
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye(), self.target, Vec3::Y)
    }

    /// Depth in [0, 1]. A zero-height framebuffer gets aspect 1.
    pub fn projection(&self, width: u32, height: u32) -> Mat4 {
        let aspect = if height == 0 { 1.0 } else { width as f32 / height as f32 };
        Mat4::perspective_rh(self.fov_y.to_radians(), aspect, self.near, self.far)
    }

    pub fn orbit(&mut self, d_yaw: f32, d_pitch: f32) {
        self.yaw = (self.yaw + d_yaw).rem_euclid(360.0);
        self.pitch = (self.pitch + d_pitch).clamp(-Self::MAX_PITCH, Self::MAX_PITCH);
    }

    /// Positive steps move closer.
    pub fn zoom(&mut self, steps: f32) {
        let factor = 0.9f32.powf(steps);
        self.distance = (self.distance * factor).clamp(Self::MIN_DISTANCE, self.far * 0.5);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eye_sits_at_distance_from_target() {
        let camera = OrbitCamera { target: Vec3::new(1.0, 2.0, 3.0), ..OrbitCamera::default() };
        let d = camera.eye().distance(camera.target);
        assert!((d - camera.distance).abs() < 1e-4);
    }

    #[test]
    fn pitch_is_clamped_and_yaw_wraps() {
        let mut camera = OrbitCamera::default();
        camera.orbit(400.0, 500.0);
        assert_eq!(camera.pitch, 89.0);
        assert!((camera.yaw - 75.0).abs() < 1e-3);
    }

    #[test]
    fn zoom_never_passes_the_target() {
        let mut camera = OrbitCamera::default();
        camera.zoom(1000.0);
        assert_eq!(camera.distance, 0.5);
        camera.zoom(-3.0);
        assert!(camera.distance > 0.5);
    }

    #[test]
    fn target_projects_to_the_centre() {
        let camera = OrbitCamera::default();
        let clip = camera.projection(800, 600) * camera.view() * camera.target.extend(1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < 1e-4 && ndc.y.abs() < 1e-4);
        assert!((0.0..=1.0).contains(&ndc.z));
    }
}
