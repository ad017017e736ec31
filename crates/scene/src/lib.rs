//! Scene math for the demo renderer.
//!
//! - Euler-angle transforms with an optional model-matrix override
//! - Perspective camera with the Vulkan Y flip
//! - Directional light with a light-space projection for shadow mapping

pub mod camera;
pub mod light;
pub mod transform;

pub use camera::Camera;
pub use light::{DirectionalLight, ShadowVolume};
pub use transform::Transform;
