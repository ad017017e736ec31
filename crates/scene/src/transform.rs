//! Per-object placement.
//!
//! The model matrix is `T * Rx * Ry * Rz * S`, with the rotation given as
//! Euler angles in degrees. An object that is animated by other means can
//! replace the whole matrix with [`Transform::set_model_override`].
//!
//! ```
//! use glam::Vec3;
//! use vkframe_scene::Transform;
//!
//! let ground = Transform::new()
//!     .with_position(Vec3::new(0.0, -1.0, 0.0))
//!     .with_scale(Vec3::new(20.0, 1.0, 20.0));
//! let _model = ground.model_matrix();
//! ```

use glam::{Mat4, Vec3};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    /// Euler angles in degrees, applied X then Y then Z in the matrix product.
    pub rotation: Vec3,
    pub scale: Vec3,
    model_override: Option<Mat4>,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
            model_override: None,
        }
    }
}

impl Transform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn with_rotation(mut self, degrees: Vec3) -> Self {
        self.rotation = degrees;
        self
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    /// Uses `model` verbatim instead of the position/rotation/scale product.
    pub fn set_model_override(&mut self, model: Mat4) {
        self.model_override = Some(model);
    }

    pub fn clear_model_override(&mut self) {
        self.model_override = None;
    }

    pub fn model_override(&self) -> Option<Mat4> {
        self.model_override
    }

    pub fn translation_matrix(&self) -> Mat4 {
        Mat4::from_translation(self.position)
    }

    pub fn rotation_matrix(&self) -> Mat4 {
        Mat4::from_rotation_x(self.rotation.x.to_radians())
            * Mat4::from_rotation_y(self.rotation.y.to_radians())
            * Mat4::from_rotation_z(self.rotation.z.to_radians())
    }

    pub fn scale_matrix(&self) -> Mat4 {
        Mat4::from_scale(self.scale)
    }

    pub fn model_matrix(&self) -> Mat4 {
        self.model_override.unwrap_or_else(|| {
            self.translation_matrix() * self.rotation_matrix() * self.scale_matrix()
        })
    }

    /// Inverse transpose of the model matrix.
    ///
    /// Falls back to identity for a singular model (zero scale) so that no
    /// NaNs reach the shader.
    pub fn normal_matrix(&self) -> Mat4 {
        const EPSILON: f32 = 1e-6;
        let model = self.model_matrix();
        if model.determinant().abs() < EPSILON {
            Mat4::IDENTITY
        } else {
            model.inverse().transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq_vec3(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-5
    }

    #[test]
    fn test_default_is_identity() {
        let t = Transform::new();
        assert_eq!(t.model_matrix(), Mat4::IDENTITY);
        assert_eq!(t.normal_matrix(), Mat4::IDENTITY);
    }

    #[test]
    fn test_translation_applies_after_scale() {
        let t = Transform::new()
            .with_position(Vec3::new(1.0, 2.0, 3.0))
            .with_scale(Vec3::splat(2.0));
        let p = t.model_matrix().transform_point3(Vec3::X);
        assert!(approx_eq_vec3(p, Vec3::new(3.0, 2.0, 3.0)));
    }

    #[test]
    fn test_rotation_is_in_degrees() {
        let t = Transform::new().with_rotation(Vec3::new(0.0, 90.0, 0.0));
        let p = t.model_matrix().transform_point3(Vec3::X);
        assert!(approx_eq_vec3(p, Vec3::NEG_Z));
    }

    #[test]
    fn test_rotation_order() {
        // Rx * Ry * Rz: Z is applied to the point first.
        let t = Transform::new().with_rotation(Vec3::new(90.0, 0.0, 90.0));
        let p = t.model_matrix().transform_point3(Vec3::X);
        // Rz(90) maps X to Y, then Rx(90) maps Y to Z.
        assert!(approx_eq_vec3(p, Vec3::Z));
    }

    #[test]
    fn test_normal_matrix_with_scale() {
        let t = Transform::new().with_scale(Vec3::new(2.0, 1.0, 1.0));
        let n = t.normal_matrix().transform_vector3(Vec3::X);
        assert!(approx_eq_vec3(n, Vec3::new(0.5, 0.0, 0.0)));
    }

    #[test]
    fn test_normal_matrix_singular_falls_back() {
        let t = Transform::new().with_scale(Vec3::new(0.0, 1.0, 1.0));
        assert_eq!(t.normal_matrix(), Mat4::IDENTITY);
    }

    #[test]
    fn test_model_override() {
        let mut t = Transform::new().with_position(Vec3::X);
        let custom = Mat4::from_translation(Vec3::new(0.0, 5.0, 0.0));
        t.set_model_override(custom);
        assert_eq!(t.model_matrix(), custom);

        t.clear_model_override();
        assert_eq!(t.model_matrix(), Mat4::from_translation(Vec3::X));
    }
}
