//! Draw batches: objects grouped by the descriptor sets they share.
//!
//! A [`DrawBatchManager`] draws with one pipeline. Each batch it owns
//! carries one descriptor-set group per frame slot, bound once per frame
//! before the batch's objects are drawn with their own push constants.

use std::collections::HashMap;
use std::fmt;
use std::ops::AddAssign;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};
use tracing::{debug, info};
use vkframe_rhi::RhiError;
use vkframe_rhi::descriptor::DescriptorSets;
use vkframe_scene::Transform;

use crate::backend::CommandRecorder;
use crate::command_session::FrameDescriptor;
use crate::mesh::MeshBinding;
use crate::program::PipelineBinding;
use crate::registry::{GpuResource, ResourceHandle, ResourceRegistry};
use crate::{MAX_FRAMES_IN_FLIGHT, RenderError, RenderResult};

/// Shade the object with the scene lights.
pub const USE_LIGHTING: i32 = 1;
/// Draw the object into the shadow map.
pub const CAST_SHADOW: i32 = 2;
pub const USE_DIRECTIONAL_LIGHT: i32 = 4;

/// Per-object push constant block.
///
/// Matches the `std430` push block of the shaders: two matrices, four
/// 16-byte vectors and an `ivec4` whose `x` holds the flags.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct PushData {
    pub model: Mat4,
    pub normal: Mat4,
    pub color: Vec4,
    pub ambient: Vec4,
    pub diffuse: Vec4,
    /// `w` is the shininess exponent.
    pub specular: Vec4,
    pub args: [i32; 4],
}

impl Default for PushData {
    fn default() -> Self {
        Material::default().push_data(Mat4::IDENTITY, Mat4::IDENTITY, 0)
    }
}

/// Surface parameters of a render object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Material {
    pub color: Vec4,
    pub ambient: Vec4,
    pub diffuse: Vec4,
    pub specular: Vec4,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            color: Vec4::ONE,
            ambient: Vec4::ZERO,
            diffuse: Vec4::ZERO,
            specular: Vec4::ZERO,
        }
    }
}

impl Material {
    fn push_data(&self, model: Mat4, normal: Mat4, flags: i32) -> PushData {
        PushData {
            model,
            normal,
            color: self.color,
            ambient: self.ambient,
            diffuse: self.diffuse,
            specular: self.specular,
            args: [flags, 0, 0, 0],
        }
    }
}

/// A mesh placed in the scene.
#[derive(Debug, Clone)]
pub struct RenderObject {
    pub mesh: MeshBinding,
    pub transform: Transform,
    pub material: Material,
    pub flags: i32,
    batch: Option<BatchHandle>,
}

impl RenderObject {
    /// Lit, shadow casting and lit by the directional light.
    pub fn new(mesh: MeshBinding) -> Self {
        Self {
            mesh,
            transform: Transform::default(),
            material: Material::default(),
            flags: USE_LIGHTING | CAST_SHADOW | USE_DIRECTIONAL_LIGHT,
            batch: None,
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_material(mut self, material: Material) -> Self {
        self.material = material;
        self
    }

    fn set_flag(&mut self, flag: i32, on: bool) {
        if on {
            self.flags |= flag;
        } else {
            self.flags &= !flag;
        }
    }

    pub fn set_use_lighting(&mut self, on: bool) -> &mut Self {
        self.set_flag(USE_LIGHTING, on);
        self
    }

    pub fn set_cast_shadow(&mut self, on: bool) -> &mut Self {
        self.set_flag(CAST_SHADOW, on);
        self
    }

    pub fn set_use_directional_light(&mut self, on: bool) -> &mut Self {
        self.set_flag(USE_DIRECTIONAL_LIGHT, on);
        self
    }

    #[inline]
    pub fn casts_shadow(&self) -> bool {
        self.flags & CAST_SHADOW != 0
    }

    /// Batch the object was added to, if any.
    #[inline]
    pub fn batch(&self) -> Option<BatchHandle> {
        self.batch
    }

    pub fn push_data(&self) -> PushData {
        self.material.push_data(
            self.transform.model_matrix(),
            self.transform.normal_matrix(),
            self.flags,
        )
    }
}

// Objects only borrow their mesh, so there is nothing on the GPU to free.
impl<C: ?Sized + 'static> GpuResource<C> for RenderObject {
    fn release(&mut self, _ctx: &C) {
        self.batch = None;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchHandle(ResourceHandle);

impl BatchHandle {
    #[inline]
    pub fn raw(self) -> u64 {
        self.0.raw()
    }
}

impl fmt::Display for BatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch {}", self.0)
    }
}

/// An object inside a specific batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjectHandle {
    pub batch: BatchHandle,
    pub id: ResourceHandle,
}

/// Commands recorded by [`DrawBatchManager::draw_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrawStats {
    pub descriptor_binds: u32,
    pub draw_calls: u32,
}

impl AddAssign for DrawStats {
    fn add_assign(&mut self, rhs: Self) {
        self.descriptor_binds += rhs.descriptor_binds;
        self.draw_calls += rhs.draw_calls;
    }
}

/// Objects drawn with the same descriptor bindings.
pub struct RenderBatch<C: ?Sized + 'static> {
    label: String,
    objects: ResourceRegistry<C>,
    /// Sets bound for each frame slot, in set-index order.
    groups: [Vec<vk::DescriptorSet>; MAX_FRAMES_IN_FLIGHT],
}

impl<C: ?Sized + 'static> RenderBatch<C> {
    fn new(label: String) -> Self {
        Self {
            label,
            objects: ResourceRegistry::new(),
            groups: std::array::from_fn(|_| Vec::new()),
        }
    }

    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[inline]
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn descriptor_group(&self, slot: usize) -> Option<&[vk::DescriptorSet]> {
        self.groups.get(slot).map(Vec::as_slice)
    }

    /// Objects draw in the order they were added.
    fn draw<R: CommandRecorder + ?Sized>(
        &self,
        recorder: &R,
        binding: &PipelineBinding,
        buffer: vk::CommandBuffer,
        slot: usize,
    ) -> DrawStats {
        let mut stats = DrawStats::default();
        if let Some(group) = self.groups.get(slot)
            && !group.is_empty()
        {
            binding.bind_descriptor_sets(recorder, buffer, group);
            stats.descriptor_binds += 1;
        }
        for (_, object) in self.objects.iter::<RenderObject>() {
            binding.push(recorder, buffer, &object.push_data());
            object.mesh.record(recorder, buffer);
            stats.draw_calls += 1;
        }
        stats
    }
}

impl<C: ?Sized + 'static> GpuResource<C> for RenderBatch<C> {
    fn release(&mut self, ctx: &C) {
        self.objects.destroy_all(ctx);
        for group in &mut self.groups {
            group.clear();
        }
        debug!("Released batch '{}'", self.label);
    }
}

/// Owns the batches drawn with one pipeline.
///
/// `C` is the context objects are released with.
pub struct DrawBatchManager<C: ?Sized + 'static> {
    binding: PipelineBinding,
    batches: ResourceRegistry<C>,
    labels: HashMap<String, BatchHandle>,
}

impl<C: ?Sized + 'static> DrawBatchManager<C> {
    pub fn new(binding: PipelineBinding) -> Self {
        Self {
            binding,
            batches: ResourceRegistry::new(),
            labels: HashMap::new(),
        }
    }

    #[inline]
    pub fn binding(&self) -> PipelineBinding {
        self.binding
    }

    /// Swaps in a rebuilt pipeline.
    pub fn set_binding(&mut self, binding: PipelineBinding) {
        self.binding = binding;
    }

    /// # Errors
    ///
    /// [`RenderError::DuplicateBatchLabel`] if `label` is taken.
    pub fn create_batch(&mut self, label: &str) -> RenderResult<BatchHandle> {
        if self.labels.contains_key(label) {
            return Err(RenderError::DuplicateBatchLabel(label.to_owned()));
        }
        let handle = BatchHandle(self.batches.register(RenderBatch::<C>::new(label.to_owned())));
        self.labels.insert(label.to_owned(), handle);
        info!("Created batch '{}' ({})", label, handle);
        Ok(handle)
    }

    fn batch(&self, handle: BatchHandle) -> RenderResult<&RenderBatch<C>> {
        self.batches
            .get::<RenderBatch<C>>(handle.0)
            .ok_or(RenderError::UnknownBatch(handle.raw()))
    }

    fn batch_mut(&mut self, handle: BatchHandle) -> RenderResult<&mut RenderBatch<C>> {
        self.batches
            .get_mut::<RenderBatch<C>>(handle.0)
            .ok_or(RenderError::UnknownBatch(handle.raw()))
    }

    pub fn add_object(
        &mut self,
        mut object: RenderObject,
        batch: BatchHandle,
    ) -> RenderResult<ObjectHandle> {
        let target = self.batch_mut(batch)?;
        object.batch = Some(batch);
        let id = target.objects.register(object);
        Ok(ObjectHandle { batch, id })
    }

    /// Destroys the object in its batch. Returns `false` if it was already
    /// gone.
    pub fn remove_object(&mut self, ctx: &C, object: ObjectHandle) -> bool {
        match self.batch_mut(object.batch) {
            Ok(batch) => batch.objects.destroy(object.id, ctx),
            Err(_) => false,
        }
    }

    /// Moves an object to another batch. The object gets a new handle.
    ///
    /// Returns `Ok(None)` if the object does not exist.
    pub fn move_object(
        &mut self,
        object: ObjectHandle,
        to: BatchHandle,
    ) -> RenderResult<Option<ObjectHandle>> {
        self.batch(to)?;
        if object.batch == to {
            let exists = self.batch(to)?.objects.contains(object.id);
            return Ok(exists.then_some(object));
        }
        let taken = match self.batch_mut(object.batch) {
            Ok(source) => source.objects.take::<RenderObject>(object.id),
            Err(_) => None,
        };
        match taken {
            Some(moved) => self.add_object(moved, to).map(Some),
            None => Ok(None),
        }
    }

    /// Sets the descriptor sets `batch` binds in each frame slot: `global`
    /// first when present, then `sets` in order.
    ///
    /// # Errors
    ///
    /// Fails without changing anything if a set collection lacks a set for
    /// some frame slot.
    pub fn set_descriptor_sets(
        &mut self,
        batch: BatchHandle,
        global: Option<&DescriptorSets>,
        sets: &[&DescriptorSets],
    ) -> RenderResult<()> {
        let mut groups: [Vec<vk::DescriptorSet>; MAX_FRAMES_IN_FLIGHT] =
            std::array::from_fn(|_| Vec::new());
        for (slot, group) in groups.iter_mut().enumerate() {
            for collection in global.into_iter().chain(sets.iter().copied()) {
                let set = collection
                    .get(slot)
                    .ok_or(RhiError::DescriptorIndexOutOfRange {
                        index: slot,
                        count: collection.len(),
                    })?;
                group.push(set);
            }
        }
        self.batch_mut(batch)?.groups = groups;
        Ok(())
    }

    /// Records every batch, in creation order, into `frame`'s command
    /// buffer.
    ///
    /// The pipeline is bound once, and each batch's descriptor group for the
    /// frame slot once. The caller has begun the pass this manager's
    /// pipeline belongs to.
    pub fn draw_all<R: CommandRecorder + ?Sized>(
        &self,
        recorder: &R,
        frame: &FrameDescriptor,
    ) -> DrawStats {
        let buffer = frame.command_buffer();
        self.binding.bind(recorder, buffer);

        let mut stats = DrawStats::default();
        for (_, batch) in self.batches.iter::<RenderBatch<C>>() {
            stats += batch.draw(recorder, &self.binding, buffer, frame.slot());
        }
        stats
    }

    pub fn object(&self, object: ObjectHandle) -> Option<&RenderObject> {
        self.batch(object.batch).ok()?.objects.get(object.id)
    }

    pub fn object_mut(&mut self, object: ObjectHandle) -> Option<&mut RenderObject> {
        self.batch_mut(object.batch).ok()?.objects.get_mut(object.id)
    }

    pub fn batch_by_label(&self, label: &str) -> Option<BatchHandle> {
        self.labels.get(label).copied()
    }

    pub fn label(&self, batch: BatchHandle) -> Option<&str> {
        self.batch(batch).ok().map(RenderBatch::label)
    }

    /// Objects in `batch`, or 0 for an unknown batch.
    pub fn object_count(&self, batch: BatchHandle) -> usize {
        self.batch(batch).map_or(0, RenderBatch::object_count)
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    /// Releases every batch and object. The GPU must be done with them.
    pub fn destroy(&mut self, ctx: &C) {
        let count = self.batches.len();
        self.batches.destroy_all(ctx);
        self.labels.clear();
        debug!("Destroyed {} batch(es)", count);
    }
}
