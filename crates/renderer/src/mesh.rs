//! Device-local meshes and the `Copy` views render objects draw with.

use ash::vk;
use tracing::debug;
use vkframe_rhi::buffer::{Buffer, BufferUsage};
use vkframe_rhi::vertex::Vertex;

use crate::backend::CommandRecorder;
use crate::command_session::CommandSession;
use crate::context::DeviceContext;
use crate::registry::GpuResource;
use crate::{RenderError, RenderResult};

/// How a mesh is drawn. Fixed when the binding is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawKind {
    Indexed {
        index_buffer: vk::Buffer,
        index_count: u32,
        index_type: vk::IndexType,
    },
    NonIndexed {
        vertex_count: u32,
    },
}

/// Buffers and draw strategy of a mesh, without ownership.
///
/// The mesh itself lives in a registry; objects keep this view and must not
/// outlive the mesh they were created from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshBinding {
    pub vertex_buffer: vk::Buffer,
    pub draw: DrawKind,
}

impl MeshBinding {
    pub fn non_indexed(vertex_buffer: vk::Buffer, vertex_count: u32) -> Self {
        Self {
            vertex_buffer,
            draw: DrawKind::NonIndexed { vertex_count },
        }
    }

    /// 32-bit indexed mesh.
    pub fn indexed(vertex_buffer: vk::Buffer, index_buffer: vk::Buffer, index_count: u32) -> Self {
        Self {
            vertex_buffer,
            draw: DrawKind::Indexed {
                index_buffer,
                index_type: vk::IndexType::UINT32,
                index_count,
            },
        }
    }

    /// Binds the buffers and records one draw.
    pub fn record<R: CommandRecorder + ?Sized>(&self, recorder: &R, buffer: vk::CommandBuffer) {
        recorder.cmd_bind_vertex_buffer(buffer, self.vertex_buffer);
        match self.draw {
            DrawKind::Indexed {
                index_buffer,
                index_count,
                index_type,
            } => {
                recorder.cmd_bind_index_buffer(buffer, index_buffer, index_type);
                recorder.cmd_draw_indexed(buffer, index_count);
            }
            DrawKind::NonIndexed { vertex_count } => recorder.cmd_draw(buffer, vertex_count),
        }
    }
}

/// Vertex and optional index buffer in device-local memory.
pub struct Mesh {
    vertex_buffer: Option<Buffer>,
    index_buffer: Option<Buffer>,
    vertex_count: u32,
    index_count: u32,
}

impl Mesh {
    /// Uploads `vertices` (and `indices`) through staging buffers and a
    /// one-shot copy. Blocks until the copy has finished.
    pub fn upload(
        ctx: &DeviceContext,
        session: &CommandSession,
        vertices: &[Vertex],
        indices: Option<&[u32]>,
    ) -> RenderResult<Self> {
        let (vertex_count, index_count) = draw_counts(vertices.len(), indices.map(<[u32]>::len))?;
        let vertex_buffer = upload_buffer(ctx, session, BufferUsage::Vertex, bytemuck::cast_slice(vertices))?;
        let index_buffer = indices
            .map(|indices| upload_buffer(ctx, session, BufferUsage::Index, bytemuck::cast_slice(indices)))
            .transpose()?;

        let mesh = Self {
            vertex_buffer: Some(vertex_buffer),
            index_buffer,
            vertex_count,
            index_count,
        };
        debug!(
            "Uploaded mesh: {} vertices, {} indices",
            mesh.vertex_count, mesh.index_count
        );
        Ok(mesh)
    }

    /// `None` once the mesh has been released.
    pub fn binding(&self) -> Option<MeshBinding> {
        let vertex = self.vertex_buffer.as_ref()?.handle();
        Some(match &self.index_buffer {
            Some(index) => MeshBinding::indexed(vertex, index.handle(), self.index_count),
            None => MeshBinding::non_indexed(vertex, self.vertex_count),
        })
    }

    #[inline]
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    #[inline]
    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

impl GpuResource<DeviceContext> for Mesh {
    fn release(&mut self, _ctx: &DeviceContext) {
        self.index_buffer = None;
        self.vertex_buffer = None;
    }
}

/// Vertex and index counts as draw parameters.
///
/// # Errors
///
/// [`RenderError::EmptyMesh`] without vertices, and
/// [`RenderError::MeshTooLarge`] when a count does not fit in a `u32`.
fn draw_counts(vertices: usize, indices: Option<usize>) -> RenderResult<(u32, u32)> {
    if vertices == 0 {
        return Err(RenderError::EmptyMesh);
    }
    let count = |what, count: usize| {
        u32::try_from(count).map_err(|_| RenderError::MeshTooLarge { what, count })
    };
    Ok((count("vertex", vertices)?, count("index", indices.unwrap_or(0))?))
}

fn upload_buffer(
    ctx: &DeviceContext,
    session: &CommandSession,
    usage: BufferUsage,
    data: &[u8],
) -> RenderResult<Buffer> {
    let staging = Buffer::new_with_data(ctx.device().clone(), BufferUsage::Staging, data)?;
    let target = Buffer::new(ctx.device().clone(), usage, staging.size())?;
    session.run_immediate(ctx, |buffer| {
        ctx.cmd_copy_buffer(buffer, staging.handle(), target.handle(), staging.size());
        Ok(())
    })?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;

    use super::*;
    use crate::mock::{Event, MockBackend};

    #[test]
    fn test_indexed_binds_index_buffer() {
        let backend = MockBackend::new();
        let vb = vk::Buffer::from_raw(1);
        let ib = vk::Buffer::from_raw(2);
        MeshBinding::indexed(vb, ib, 36).record(&backend, vk::CommandBuffer::from_raw(9));
        assert_eq!(
            backend.events(),
            vec![
                Event::BindVertexBuffer(vb),
                Event::BindIndexBuffer(ib, vk::IndexType::UINT32),
                Event::DrawIndexed(36),
            ]
        );
    }

    #[test]
    fn test_draw_counts() {
        assert_eq!(draw_counts(24, Some(36)).unwrap(), (24, 36));
        assert_eq!(draw_counts(6, None).unwrap(), (6, 0));
    }

    #[test]
    fn test_empty_mesh_rejected() {
        assert!(matches!(draw_counts(0, None), Err(RenderError::EmptyMesh)));
        assert!(matches!(draw_counts(0, Some(3)), Err(RenderError::EmptyMesh)));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_counts_beyond_u32_rejected() {
        let too_many = u32::MAX as usize + 1;
        assert!(matches!(
            draw_counts(too_many, None),
            Err(RenderError::MeshTooLarge { what: "vertex", count }) if count == too_many
        ));
        assert!(matches!(
            draw_counts(3, Some(too_many)),
            Err(RenderError::MeshTooLarge { what: "index", .. })
        ));
    }

    #[test]
    fn test_non_indexed_draws_vertices() {
        let backend = MockBackend::new();
        let vb = vk::Buffer::from_raw(1);
        MeshBinding::non_indexed(vb, 6).record(&backend, vk::CommandBuffer::from_raw(9));
        assert_eq!(
            backend.events(),
            vec![Event::BindVertexBuffer(vb), Event::Draw(6)]
        );
    }
}
