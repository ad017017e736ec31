//! Demo scene: a spinning cube and an upright panel over a ground plane,
//! lit by one directional light that casts shadows.

use std::time::Instant;

use anyhow::{Context, Result};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3, Vec4};
use tracing::info;

use vkframe_core::RendererConfig;
use vkframe_renderer::batch::{Material, ObjectHandle, RenderObject};
use vkframe_renderer::mesh::Mesh;
use vkframe_renderer::program::ShaderProgram;
use vkframe_renderer::registry::{ResourceHandle, ResourceRegistry};
use vkframe_renderer::renderer::StageKind;
use vkframe_renderer::texture::Texture;
use vkframe_renderer::uniform::UniformBuffer;
use vkframe_renderer::{
    DeviceContext, FrameRenderer, MAX_FRAMES_IN_FLIGHT, RenderError, RenderResult,
};
use vkframe_rhi::descriptor::{DescriptorSetLayout, DescriptorSets};
use vkframe_rhi::vertex::Vertex;
use vkframe_scene::{Camera, DirectionalLight, Transform};

/// Main pass uniforms, set 0 binding 0 of `main.vert`/`main.frag`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct CameraUniforms {
    view: Mat4,
    projection: Mat4,
    light_space: Mat4,
    light_direction: Vec4,
    light_color: Vec4,
    camera_position: Vec4,
}

/// Shadow pass uniforms, set 0 binding 0 of `shadow.vert`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct LightUniforms {
    light_space: Mat4,
}

const SPIN_DEGREES_PER_SEC: f32 = 45.0;

const WHITE: [u8; 4] = [255; 4];

/// Everything the demo owns on the GPU besides the frame renderer.
///
/// Meshes, uniform buffers and textures live in `resources`; call
/// [`DemoScene::destroy`] after [`FrameRenderer::shutdown`]. The scene must
/// be dropped before the [`DeviceContext`].
pub struct DemoScene {
    camera: Camera,
    light: DirectionalLight,
    resources: ResourceRegistry<DeviceContext>,
    camera_uniforms: ResourceHandle,
    light_uniforms: ResourceHandle,
    // Descriptor sets are returned to the pool with the context.
    _camera_sets: DescriptorSets,
    _shadow_map_sets: DescriptorSets,
    _texture_sets: DescriptorSets,
    _light_sets: DescriptorSets,
    _main_program: ShaderProgram,
    _shadow_program: ShaderProgram,
    cube: [ObjectHandle; 2],
    cube_transform: Transform,
    started: Instant,
}

impl DemoScene {
    pub fn new(
        ctx: &DeviceContext,
        renderer: &mut FrameRenderer<DeviceContext>,
        config: &RendererConfig,
        aspect: f32,
    ) -> Result<Self> {
        let device = ctx.device();

        let main_program = ShaderProgram::load(
            device.clone(),
            &config.shader_dir,
            "main.vert.spv",
            Some("main.frag.spv"),
            vec![
                DescriptorSetLayout::uniform(device.clone(), 0)?,
                DescriptorSetLayout::sampler(device.clone(), 0)?,
                DescriptorSetLayout::sampler(device.clone(), 0)?,
            ],
        )
        .context("loading main shader program")?;
        let shadow_program = ShaderProgram::load(
            device.clone(),
            &config.shader_dir,
            "shadow.vert.spv",
            None,
            vec![DescriptorSetLayout::uniform(device.clone(), 0)?],
        )
        .context("loading shadow shader program")?;

        let mut resources = ResourceRegistry::new();
        let camera_uniforms = UniformBuffer::for_type::<CameraUniforms>(device.clone())?;
        let light_uniforms = UniformBuffer::for_type::<LightUniforms>(device.clone())?;
        let white_texture = Texture::filled(ctx, renderer.session(), WHITE)?;

        let pool = ctx.descriptor_pool();
        let mut camera_sets = DescriptorSets::allocate(pool, layout(&main_program, 0)?)?;
        let mut shadow_map_sets = DescriptorSets::allocate(pool, layout(&main_program, 1)?)?;
        let mut texture_sets = DescriptorSets::allocate(pool, layout(&main_program, 2)?)?;
        let mut light_sets = DescriptorSets::allocate(pool, layout(&shadow_program, 0)?)?;

        let shadow_map = renderer
            .shadow_map_info()
            .context("shadow pass has no shadow map")?;
        let white_info = white_texture
            .descriptor_info()
            .context("white texture not uploaded")?;
        shadow_map_sets.write_image(0, shadow_map)?;
        texture_sets.write_image(0, white_info)?;
        for slot in 0..MAX_FRAMES_IN_FLIGHT {
            shadow_map_sets.apply(device, slot)?;
            texture_sets.apply(device, slot)?;

            camera_sets.write_buffer(0, camera_uniforms.descriptor_info(slot)?)?;
            camera_sets.apply(device, slot)?;
            camera_sets.flush();

            light_sets.write_buffer(0, light_uniforms.descriptor_info(slot)?)?;
            light_sets.apply(device, slot)?;
            light_sets.flush();
        }
        shadow_map_sets.flush();
        texture_sets.flush();
        let camera_uniforms = resources.register(camera_uniforms);
        let light_uniforms = resources.register(light_uniforms);
        resources.register(white_texture);

        let (cube_vertices, cube_indices) = cube(Vec3::new(0.9, 0.9, 0.9));
        let (panel_vertices, panel_indices) = plane(2.0, Vec3::new(0.8, 0.25, 0.2));
        let (ground_vertices, ground_indices) = plane(20.0, Vec3::new(0.6, 0.6, 0.6));
        let cube_mesh = Mesh::upload(ctx, renderer.session(), &cube_vertices, Some(&cube_indices))?;
        let panel_mesh =
            Mesh::upload(ctx, renderer.session(), &panel_vertices, Some(&panel_indices))?;
        let ground_mesh =
            Mesh::upload(ctx, renderer.session(), &ground_vertices, Some(&ground_indices))?;
        let cube_binding = cube_mesh.binding().context("cube mesh not uploaded")?;
        let panel_binding = panel_mesh.binding().context("panel mesh not uploaded")?;
        let ground_binding = ground_mesh.binding().context("ground mesh not uploaded")?;
        for mesh in [cube_mesh, panel_mesh, ground_mesh] {
            resources.register(mesh);
        }

        let material = Material {
            ambient: Vec4::splat(0.15),
            diffuse: Vec4::splat(0.8),
            specular: Vec4::new(0.5, 0.5, 0.5, 32.0),
            ..Default::default()
        };
        let cube_transform = Transform::new().with_position(Vec3::new(0.0, 1.0, 0.0));
        let cube_object = RenderObject::new(cube_binding)
            .with_transform(cube_transform)
            .with_material(material);
        let panel_object = RenderObject::new(panel_binding)
            .with_transform(
                Transform::new()
                    .with_position(Vec3::new(-2.5, 1.0, -1.5))
                    .with_rotation(Vec3::new(90.0, 30.0, 0.0)),
            )
            .with_material(material);
        let mut ground_object = RenderObject::new(ground_binding).with_material(material);
        ground_object.set_cast_shadow(false);

        let shadow = renderer.build_pipeline(ctx, StageKind::Shadow, &shadow_program.interface())?;
        let casters = shadow.create_batch("shadow")?;
        shadow.set_descriptor_sets(casters, Some(&light_sets), &[])?;
        let cube_shadow = shadow.add_object(cube_object.clone(), casters)?;
        shadow.add_object(panel_object.clone(), casters)?;

        let main = renderer.build_pipeline(ctx, StageKind::Main, &main_program.interface())?;
        let white = main.create_batch("white")?;
        main.set_descriptor_sets(white, Some(&camera_sets), &[&shadow_map_sets, &texture_sets])?;
        let cube_main = main.add_object(cube_object, white)?;
        main.add_object(panel_object, white)?;
        main.add_object(ground_object, white)?;

        let mut camera = Camera::new();
        camera.look_at(Vec3::new(6.0, 5.0, 8.0), Vec3::ZERO);
        camera.set_aspect(aspect);

        let mut light = DirectionalLight::new(
            Vec3::new(8.0, 15.0, 6.0),
            Vec3::new(-8.0, -15.0, -6.0),
            Vec4::new(1.0, 0.95, 0.9, 1.0),
        );
        light.volume.half_width = 12.0;
        light.volume.half_height = 12.0;
        light.volume.far = 40.0;

        info!("Demo scene ready with {} GPU resources", resources.len());
        Ok(Self {
            camera,
            light,
            resources,
            camera_uniforms,
            light_uniforms,
            _camera_sets: camera_sets,
            _shadow_map_sets: shadow_map_sets,
            _texture_sets: texture_sets,
            _light_sets: light_sets,
            _main_program: main_program,
            _shadow_program: shadow_program,
            cube: [cube_main, cube_shadow],
            cube_transform,
            started: Instant::now(),
        })
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        self.camera.set_aspect(aspect);
    }

    /// Spins the cube in both stages.
    pub fn animate(&mut self, renderer: &mut FrameRenderer<DeviceContext>) {
        let angle = self.started.elapsed().as_secs_f32() * SPIN_DEGREES_PER_SEC;
        self.cube_transform.rotation = Vec3::new(0.0, angle % 360.0, 0.0);

        let [main, shadow] = self.cube;
        for (kind, handle) in [(StageKind::Main, main), (StageKind::Shadow, shadow)] {
            if let Some(object) = renderer
                .batches_mut(kind)
                .and_then(|batches| batches.object_mut(handle))
            {
                object.transform = self.cube_transform;
            }
        }
    }

    /// Writes this frame's uniforms into `slot`.
    pub fn write_uniforms(&self, slot: usize) -> RenderResult<()> {
        let light_space = self.light.light_space_matrix();
        uniform(&self.resources, self.camera_uniforms)?.update_pod(
            slot,
            &CameraUniforms {
                view: self.camera.view_matrix(),
                projection: self.camera.projection_matrix(),
                light_space,
                light_direction: self.light.direction.extend(0.0),
                light_color: self.light.color,
                camera_position: self.camera.position.extend(1.0),
            },
        )?;
        uniform(&self.resources, self.light_uniforms)?
            .update_pod(slot, &LightUniforms { light_space })
    }

    /// Releases the meshes, uniform buffers and textures. The GPU must be
    /// idle, which [`FrameRenderer::shutdown`] guarantees.
    pub fn destroy(&mut self, ctx: &DeviceContext) {
        let count = self.resources.len();
        self.resources.destroy_all(ctx);
        info!("Released {} scene resources", count);
    }
}

fn uniform(
    resources: &ResourceRegistry<DeviceContext>,
    handle: ResourceHandle,
) -> RenderResult<&UniformBuffer> {
    resources
        .get::<UniformBuffer>(handle)
        .ok_or(RenderError::MissingResource(handle.raw()))
}

fn layout(program: &ShaderProgram, index: usize) -> Result<&DescriptorSetLayout> {
    program
        .set_layout(index)
        .with_context(|| format!("program has no descriptor set layout {index}"))
}

/// Unit cube centered on the origin, one quad per face.
fn cube(color: Vec3) -> (Vec<Vertex>, Vec<u32>) {
    const FACES: [(Vec3, Vec3, Vec3); 6] = [
        (Vec3::X, Vec3::NEG_Z, Vec3::Y),
        (Vec3::NEG_X, Vec3::Z, Vec3::Y),
        (Vec3::Y, Vec3::X, Vec3::NEG_Z),
        (Vec3::NEG_Y, Vec3::X, Vec3::Z),
        (Vec3::Z, Vec3::X, Vec3::Y),
        (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, right, up) in FACES {
        let base = vertices.len() as u32;
        let center = normal * 0.5;
        for (u, v) in [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)] {
            let position = center + right * (u - 0.5) + up * (v - 0.5);
            vertices.push(Vertex::new(position, normal, color, Vec2::new(u, v)));
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
    }
    (vertices, indices)
}

/// Square in the XZ plane facing +Y.
fn plane(size: f32, color: Vec3) -> (Vec<Vertex>, Vec<u32>) {
    let h = size * 0.5;
    let corners = [
        (Vec3::new(-h, 0.0, h), Vec2::new(0.0, 0.0)),
        (Vec3::new(h, 0.0, h), Vec2::new(1.0, 0.0)),
        (Vec3::new(h, 0.0, -h), Vec2::new(1.0, 1.0)),
        (Vec3::new(-h, 0.0, -h), Vec2::new(0.0, 1.0)),
    ];
    let vertices = corners
        .into_iter()
        .map(|(position, uv)| Vertex::new(position, Vec3::Y, color, uv))
        .collect();
    (vertices, vec![0, 1, 2, 2, 3, 0])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle_normal(vertices: &[Vertex], tri: &[u32]) -> Vec3 {
        let [a, b, c] = [0, 1, 2].map(|i| vertices[tri[i] as usize].position);
        (b - a).cross(c - a).normalize()
    }

    #[test]
    fn test_cube_winding_faces_outward() {
        let (vertices, indices) = cube(Vec3::ONE);
        assert_eq!(vertices.len(), 24);
        assert_eq!(indices.len(), 36);

        // Counter-clockwise front faces: the geometric normal matches the
        // vertex normal.
        for tri in indices.chunks(3) {
            let expected = vertices[tri[0] as usize].normal;
            assert!(triangle_normal(&vertices, tri).abs_diff_eq(expected, 1e-5));
        }
    }

    #[test]
    fn test_plane_faces_up() {
        let (vertices, indices) = plane(4.0, Vec3::ONE);
        assert_eq!(vertices.len(), 4);
        for tri in indices.chunks(3) {
            assert!(triangle_normal(&vertices, tri).abs_diff_eq(Vec3::Y, 1e-5));
        }
        assert!(vertices.iter().all(|v| v.position.x.abs() == 2.0));
    }

    #[test]
    fn test_uniform_lookup_rejects_other_resources() {
        use vkframe_renderer::mesh::MeshBinding;
        use ash::vk::{self, Handle};

        let mut resources = ResourceRegistry::<DeviceContext>::new();
        let object = resources.register(RenderObject::new(MeshBinding::non_indexed(
            vk::Buffer::from_raw(1),
            3,
        )));
        assert!(matches!(
            uniform(&resources, object),
            Err(RenderError::MissingResource(raw)) if raw == object.raw()
        ));
    }

    #[test]
    fn test_uniform_layouts_are_std140_sized() {
        assert_eq!(std::mem::size_of::<CameraUniforms>(), 3 * 64 + 3 * 16);
        assert_eq!(std::mem::size_of::<LightUniforms>(), 64);
    }
}
