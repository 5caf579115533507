use anyhow::{anyhow, Context, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};

use crate::context::DeviceContext;
use crate::pipeline::VertexLayout;

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 2],
}

impl Vertex {
    pub fn layout() -> VertexLayout {
        VertexLayout {
            bindings: vec![vk::VertexInputBindingDescription {
                binding: 0,
                stride: std::mem::size_of::<Vertex>() as u32,
                input_rate: vk::VertexInputRate::VERTEX,
            }],
            attributes: vec![vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: 0,
            }],
        }
    }
}

pub const DEMO_TRIANGLE: [Vertex; 3] = [
    Vertex { pos: [0.0, -0.5] },
    Vertex { pos: [0.5, 0.5] },
    Vertex { pos: [-0.5, 0.5] },
];

/// Host-visible, host-coherent vertex storage. Written once at creation and
/// never mutated afterwards.
pub struct VertexBuffer {
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    count: u32,
}

impl VertexBuffer {
    pub fn create(ctx: &DeviceContext, vertices: &[Vertex]) -> Result<Self> {
        let device = ctx.device();
        let size = std::mem::size_of_val(vertices) as vk::DeviceSize;

        let buffer_info = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage: vk::BufferUsageFlags::VERTEX_BUFFER,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let buffer =
            unsafe { device.create_buffer(&buffer_info, None) }.context("create vertex buffer")?;

        let reqs = unsafe { device.get_buffer_memory_requirements(buffer) };
        let memory_type = match find_memory_type(
            ctx,
            reqs.memory_type_bits,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ) {
            Ok(t) => t,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let alloc_info = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: reqs.size,
            memory_type_index: memory_type,
            ..Default::default()
        };
        let memory = match unsafe { device.allocate_memory(&alloc_info, None) } {
            Ok(m) => m,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e).context("allocate vertex memory");
            }
        };

        let upload = || -> Result<()> {
            unsafe {
                device
                    .bind_buffer_memory(buffer, memory, 0)
                    .context("bind vertex memory")?;
                let ptr = device
                    .map_memory(memory, 0, size, vk::MemoryMapFlags::empty())
                    .context("map vertex memory")?;
                let bytes: &[u8] = bytemuck::cast_slice(vertices);
                std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), bytes.len());
                device.unmap_memory(memory);
            }
            Ok(())
        };
        if let Err(e) = upload() {
            unsafe {
                device.destroy_buffer(buffer, None);
                device.free_memory(memory, None);
            }
            return Err(e);
        }

        Ok(Self {
            buffer,
            memory,
            count: vertices.len() as u32,
        })
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn vertex_count(&self) -> u32 {
        self.count
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            if self.buffer != vk::Buffer::null() {
                device.destroy_buffer(self.buffer, None);
                self.buffer = vk::Buffer::null();
            }
            if self.memory != vk::DeviceMemory::null() {
                device.free_memory(self.memory, None);
                self.memory = vk::DeviceMemory::null();
            }
        }
    }
}

fn find_memory_type(
    ctx: &DeviceContext,
    type_bits: u32,
    properties: vk::MemoryPropertyFlags,
) -> Result<u32> {
    let props = unsafe {
        ctx.instance()
            .get_physical_device_memory_properties(ctx.physical_device())
    };
    (0..props.memory_type_count)
        .find(|&i| {
            (type_bits & (1 << i)) != 0
                && props.memory_types[i as usize]
                    .property_flags
                    .contains(properties)
        })
        .ok_or_else(|| anyhow!("no suitable memory type for vertex buffer"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_triangle_is_three_tightly_packed_vertices() {
        assert_eq!(DEMO_TRIANGLE.len(), 3);
        assert_eq!(std::mem::size_of_val(&DEMO_TRIANGLE), 24);
        let bytes: &[u8] = bytemuck::cast_slice(&DEMO_TRIANGLE);
        assert_eq!(bytes.len(), 24);
    }

    #[test]
    fn vertex_layout_matches_vertex_struct() {
        let layout = Vertex::layout();
        assert_eq!(layout.bindings.len(), 1);
        assert_eq!(layout.bindings[0].stride as usize, std::mem::size_of::<Vertex>());
        assert_eq!(layout.attributes[0].format, vk::Format::R32G32_SFLOAT);
    }
}
