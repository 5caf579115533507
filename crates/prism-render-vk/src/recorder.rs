use anyhow::{Context, Result};
use ash::vk;

use crate::buffer::VertexBuffer;

/// Everything the fixed draw body needs for one target image.
pub struct RecordTarget<'a> {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub pipeline: Option<vk::Pipeline>,
    pub vertices: Option<&'a VertexBuffer>,
    pub clear: vk::ClearValue,
}

/// Record the fixed drawing sequence: begin the buffer, begin the render
/// pass with one clear value, and — when a pipeline is bound — set the
/// dynamic viewport/scissor to the swapchain extent and issue the draw.
/// Without a pipeline the pass still clears, keeping frame pacing alive.
/// `inject` lets a host renderer append its own commands inside the pass.
pub fn record<F>(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    target: &RecordTarget,
    inject: F,
) -> Result<()>
where
    F: FnOnce(&ash::Device, vk::CommandBuffer),
{
    let begin = vk::CommandBufferBeginInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
        ..Default::default()
    };
    unsafe { device.begin_command_buffer(cmd, &begin) }.context("begin_command_buffer")?;

    let clears = [target.clear];
    let rp_begin = vk::RenderPassBeginInfo {
        s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
        render_pass: target.render_pass,
        framebuffer: target.framebuffer,
        render_area: vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: target.extent,
        },
        clear_value_count: clears.len() as u32,
        p_clear_values: clears.as_ptr(),
        ..Default::default()
    };

    unsafe {
        device.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);

        if let Some(pipeline) = target.pipeline {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);

            let viewport = vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: target.extent.width as f32,
                height: target.extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            device.cmd_set_viewport(cmd, 0, std::slice::from_ref(&viewport));

            let scissor = vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: target.extent,
            };
            device.cmd_set_scissor(cmd, 0, std::slice::from_ref(&scissor));

            let count = match target.vertices {
                Some(vb) => {
                    device.cmd_bind_vertex_buffers(cmd, 0, &[vb.handle()], &[0]);
                    vb.vertex_count()
                }
                None => 3,
            };
            device.cmd_draw(cmd, count, 1, 0, 0);
        }

        inject(device, cmd);

        device.cmd_end_render_pass(cmd);
    }

    unsafe { device.end_command_buffer(cmd) }.context("end_command_buffer")?;
    Ok(())
}
