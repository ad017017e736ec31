//! Directional light and its shadow projection.

use glam::{Mat4, Vec3, Vec4};

/// Orthographic box the shadow map covers, in light view space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShadowVolume {
    pub half_width: f32,
    pub half_height: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for ShadowVolume {
    fn default() -> Self {
        Self {
            half_width: 10.0,
            half_height: 10.0,
            near: 1.0,
            far: 100.0,
        }
    }
}

impl ShadowVolume {
    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::orthographic_rh(
            -self.half_width,
            self.half_width,
            -self.half_height,
            self.half_height,
            self.near,
            self.far,
        )
    }
}

/// A sun-like light.
///
/// `position` only matters for the shadow pass: the shadow map is rendered
/// from there, looking at `target`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DirectionalLight {
    pub position: Vec3,
    pub direction: Vec3,
    /// RGB color, intensity in `w`. Zero intensity disables the light.
    pub color: Vec4,
    pub target: Vec3,
    pub volume: ShadowVolume,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 40.0, 0.0),
            direction: Vec3::NEG_Y,
            color: Vec4::new(1.0, 1.0, 1.0, 0.8),
            target: Vec3::ZERO,
            volume: ShadowVolume::default(),
        }
    }
}

impl DirectionalLight {
    pub fn new(position: Vec3, direction: Vec3, color: Vec4) -> Self {
        Self {
            position,
            direction: direction.normalize_or_zero(),
            color,
            ..Default::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.color.w > 0.0
    }

    pub fn view_matrix(&self) -> Mat4 {
        // look_at_rh degenerates when looking straight along the up vector.
        let to_target = (self.target - self.position).normalize_or_zero();
        let up = if to_target.cross(Vec3::Y).length_squared() < 1e-6 {
            Vec3::Z
        } else {
            Vec3::Y
        };
        Mat4::look_at_rh(self.position, self.target, up)
    }

    /// View-projection used to render and sample the shadow map.
    pub fn light_space_matrix(&self) -> Mat4 {
        self.volume.projection_matrix() * self.view_matrix()
    }
}
