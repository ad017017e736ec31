//! Perspective camera.

use glam::{Mat4, Vec3};

/// A look-at camera with a right-handed perspective projection.
#[derive(Clone, Debug)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in degrees.
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov_y: 45.0,
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 100.0,
        }
    }
}

impl Camera {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn look_at(&mut self, position: Vec3, target: Vec3) {
        self.position = position;
        self.target = target;
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        self.aspect = aspect;
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    /// Projection with Y flipped for Vulkan clip space.
    pub fn projection_matrix(&self) -> Mat4 {
        let mut proj = Mat4::perspective_rh(self.fov_y.to_radians(), self.aspect, self.near, self.far);
        proj.y_axis.y *= -1.0;
        proj
    }

    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    pub fn forward(&self) -> Vec3 {
        (self.target - self.position).normalize_or_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn test_projection_flips_y() {
        let camera = Camera::new();
        let flipped = camera.projection_matrix();
        let plain = Mat4::perspective_rh(45f32.to_radians(), camera.aspect, camera.near, camera.far);
        assert_eq!(flipped.y_axis.y, -plain.y_axis.y);
        assert_eq!(flipped.x_axis, plain.x_axis);
    }

    #[test]
    fn test_target_lands_in_center_of_clip_space() {
        let mut camera = Camera::new();
        camera.look_at(Vec3::new(3.0, 4.0, 5.0), Vec3::new(0.0, 1.0, 0.0));
        let clip = camera.view_projection_matrix() * Vec4::new(0.0, 1.0, 0.0, 1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < 1e-5);
        assert!(ndc.y.abs() < 1e-5);
        assert!((0.0..=1.0).contains(&ndc.z));
    }

    #[test]
    fn test_forward() {
        let mut camera = Camera::new();
        camera.look_at(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO);
        assert_eq!(camera.forward(), Vec3::NEG_Z);
    }
}
