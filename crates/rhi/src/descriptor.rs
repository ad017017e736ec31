//! Descriptor layouts, the descriptor pool and per-frame descriptor sets.
//!
//! Every set layout in the renderer holds exactly one binding, so shaders
//! address resources by set index. [`DescriptorSets`] allocates one set per
//! frame slot and stages writes that are then applied slot by slot:
//!
//! ```no_run
//! use vkframe_rhi::descriptor::{DescriptorPool, DescriptorSetLayout, DescriptorSets};
//! # use std::sync::Arc;
//! # use vkframe_rhi::{device::Device, vk};
//! # fn example(device: Arc<Device>, info: vk::DescriptorBufferInfo) -> Result<(), vkframe_rhi::RhiError> {
//! let pool = DescriptorPool::new(device.clone(), 50)?;
//! let layout = DescriptorSetLayout::uniform(device.clone(), 0)?;
//! let mut sets = DescriptorSets::allocate(&pool, &layout)?;
//!
//! sets.write_buffer(0, info)?;
//! for slot in 0..sets.len() {
//!     sets.apply(&device, slot)?;
//! }
//! sets.flush();
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::sync::MAX_FRAMES_IN_FLIGHT;

/// Single-binding layout helpers.
pub struct DescriptorBindingBuilder;

impl DescriptorBindingBuilder {
    /// Uniform buffer readable from the vertex and fragment stages.
    #[inline]
    pub fn uniform_buffer(binding: u32) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(binding)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
    }

    /// Combined image sampler readable from the fragment stage.
    #[inline]
    pub fn combined_image_sampler(binding: u32) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(binding)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)
    }
}

pub struct DescriptorSetLayout {
    device: Arc<Device>,
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    pub fn new(
        device: Arc<Device>,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> RhiResult<Self> {
        let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);
        let layout = unsafe { device.handle().create_descriptor_set_layout(&info, None)? };
        debug!(
            "Created descriptor set layout with {} binding(s)",
            bindings.len()
        );
        Ok(Self { device, layout })
    }

    /// Layout with a single uniform buffer at `binding`.
    pub fn uniform(device: Arc<Device>, binding: u32) -> RhiResult<Self> {
        Self::new(device, &[DescriptorBindingBuilder::uniform_buffer(binding)])
    }

    /// Layout with a single combined image sampler at `binding`.
    pub fn sampler(device: Arc<Device>, binding: u32) -> RhiResult<Self> {
        Self::new(
            device,
            &[DescriptorBindingBuilder::combined_image_sampler(binding)],
        )
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_set_layout(self.layout, None);
        }
        debug!("Destroyed descriptor set layout");
    }
}

/// Pool sizes for `max_sets` logical sets, each replicated per frame slot.
pub fn pool_sizes(max_sets: u32) -> [vk::DescriptorPoolSize; 2] {
    let count = max_sets * MAX_FRAMES_IN_FLIGHT as u32;
    [
        vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(count),
        vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(count),
    ]
}

/// The global descriptor pool.
///
/// Sets are never freed individually; they go away with the pool.
pub struct DescriptorPool {
    device: Arc<Device>,
    pool: vk::DescriptorPool,
    max_sets: u32,
}

impl DescriptorPool {
    /// Creates a pool for `max_sets` per-frame set groups.
    pub fn new(device: Arc<Device>, max_sets: u32) -> RhiResult<Self> {
        let sizes = pool_sizes(max_sets);
        let info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets * MAX_FRAMES_IN_FLIGHT as u32)
            .pool_sizes(&sizes);
        let pool = unsafe { device.handle().create_descriptor_pool(&info, None)? };
        debug!(
            "Created descriptor pool for {} set(s) x {} frame(s)",
            max_sets, MAX_FRAMES_IN_FLIGHT
        );
        Ok(Self {
            device,
            pool,
            max_sets,
        })
    }

    pub fn allocate(&self, layouts: &[vk::DescriptorSetLayout]) -> RhiResult<Vec<vk::DescriptorSet>> {
        let info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);
        let sets = unsafe { self.device.handle().allocate_descriptor_sets(&info)? };
        debug!("Allocated {} descriptor set(s)", sets.len());
        Ok(sets)
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    #[inline]
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_pool(self.pool, None);
        }
        debug!("Destroyed descriptor pool");
    }
}

/// Resource referenced by a staged write.
#[derive(Debug, Clone, Copy)]
pub enum StagedResource {
    Buffer(vk::DescriptorBufferInfo),
    Image(vk::DescriptorImageInfo),
}

#[derive(Debug, Clone, Copy)]
pub struct StagedWrite {
    pub binding: u32,
    pub resource: StagedResource,
}

/// One descriptor set per frame slot, plus staged writes.
///
/// Misuse of the staging protocol is reported as an error rather than
/// silently producing a broken set.
#[derive(Debug, Default)]
pub struct DescriptorSets {
    sets: Vec<vk::DescriptorSet>,
    staged: Vec<StagedWrite>,
}

impl DescriptorSets {
    /// Allocates one set per frame slot with `layout`.
    pub fn allocate(pool: &DescriptorPool, layout: &DescriptorSetLayout) -> RhiResult<Self> {
        let layouts = [layout.handle(); MAX_FRAMES_IN_FLIGHT];
        Ok(Self::from_raw(pool.allocate(&layouts)?))
    }

    /// Wraps already allocated sets, one per slot.
    pub fn from_raw(sets: Vec<vk::DescriptorSet>) -> Self {
        Self {
            sets,
            staged: Vec::new(),
        }
    }

    /// The set for frame slot `slot`.
    #[inline]
    pub fn get(&self, slot: usize) -> Option<vk::DescriptorSet> {
        self.sets.get(slot).copied()
    }

    #[inline]
    pub fn sets(&self) -> &[vk::DescriptorSet] {
        &self.sets
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    #[inline]
    pub fn staged(&self) -> &[StagedWrite] {
        &self.staged
    }

    /// Stages a uniform buffer write to `binding`.
    pub fn write_buffer(
        &mut self,
        binding: u32,
        info: vk::DescriptorBufferInfo,
    ) -> RhiResult<&mut Self> {
        self.stage(binding, StagedResource::Buffer(info))
    }

    /// Stages a combined image sampler write to `binding`.
    pub fn write_image(
        &mut self,
        binding: u32,
        info: vk::DescriptorImageInfo,
    ) -> RhiResult<&mut Self> {
        self.stage(binding, StagedResource::Image(info))
    }

    fn stage(&mut self, binding: u32, resource: StagedResource) -> RhiResult<&mut Self> {
        if self.staged.iter().any(|write| write.binding == binding) {
            return Err(RhiError::BindingAlreadyStaged(binding));
        }
        self.staged.push(StagedWrite { binding, resource });
        Ok(self)
    }

    /// Replaces the buffer of staged entry `index`.
    pub fn update_buffer(
        &mut self,
        index: usize,
        info: vk::DescriptorBufferInfo,
    ) -> RhiResult<&mut Self> {
        match self.staged.get_mut(index) {
            Some(StagedWrite {
                resource: StagedResource::Buffer(current),
                ..
            }) => {
                *current = info;
                Ok(self)
            }
            Some(_) => Err(RhiError::InvalidStagedWrite {
                index,
                reason: "entry is not a buffer write",
            }),
            None => Err(RhiError::InvalidStagedWrite {
                index,
                reason: "no staged entry at this index",
            }),
        }
    }

    /// Replaces the image of staged entry `index`.
    pub fn update_image(
        &mut self,
        index: usize,
        info: vk::DescriptorImageInfo,
    ) -> RhiResult<&mut Self> {
        match self.staged.get_mut(index) {
            Some(StagedWrite {
                resource: StagedResource::Image(current),
                ..
            }) => {
                *current = info;
                Ok(self)
            }
            Some(_) => Err(RhiError::InvalidStagedWrite {
                index,
                reason: "entry is not an image write",
            }),
            None => Err(RhiError::InvalidStagedWrite {
                index,
                reason: "no staged entry at this index",
            }),
        }
    }

    /// Writes every staged entry into the set of frame slot `slot`.
    ///
    /// Staged entries are kept, so the same writes can be applied to each
    /// slot in turn before [`DescriptorSets::flush`].
    pub fn apply(&self, device: &Device, slot: usize) -> RhiResult<()> {
        let target = self.apply_target(slot)?;

        let writes: Vec<vk::WriteDescriptorSet> = self
            .staged
            .iter()
            .map(|staged| {
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(target)
                    .dst_binding(staged.binding)
                    .dst_array_element(0);
                match &staged.resource {
                    StagedResource::Buffer(info) => write
                        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                        .buffer_info(std::slice::from_ref(info)),
                    StagedResource::Image(info) => write
                        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                        .image_info(std::slice::from_ref(info)),
                }
            })
            .collect();

        unsafe { device.handle().update_descriptor_sets(&writes, &[]) };
        debug!("Applied {} descriptor write(s) to slot {}", writes.len(), slot);
        Ok(())
    }

    /// Validates an `apply` to `slot` and returns the target set.
    fn apply_target(&self, slot: usize) -> RhiResult<vk::DescriptorSet> {
        let target = self
            .get(slot)
            .ok_or(RhiError::DescriptorIndexOutOfRange {
                index: slot,
                count: self.sets.len(),
            })?;
        if self.staged.is_empty() {
            return Err(RhiError::NoPendingWrites);
        }
        Ok(target)
    }

    /// Drops every staged entry.
    pub fn flush(&mut self) -> &mut Self {
        self.staged.clear();
        self
    }
}
