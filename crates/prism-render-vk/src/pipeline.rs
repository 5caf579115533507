use anyhow::{anyhow, ensure, Context, Result};
use ash::vk;
use tracing::{info, warn};

/// Buffer-sourced vertex input for a pipeline. `None` means the vertex
/// shader supplies its own geometry (gl_VertexIndex style).
pub struct VertexLayout {
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
}

/// The one graphics pipeline the renderer draws with, plus its layout. Both
/// handles are null until the first successful [`build`](Self::build); a
/// failed build never disturbs what was built before.
pub struct GraphicsPipeline {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl GraphicsPipeline {
    pub fn new() -> Self {
        Self {
            pipeline: vk::Pipeline::null(),
            layout: vk::PipelineLayout::null(),
        }
    }

    pub fn handle(&self) -> Option<vk::Pipeline> {
        if self.pipeline == vk::Pipeline::null() {
            None
        } else {
            Some(self.pipeline)
        }
    }

    /// Compile two SPIR-V wordstreams into a graphics pipeline against
    /// `render_pass`. Viewport and scissor are dynamic (count 1), front face
    /// is clockwise with back-face culling, one sample, blending disabled
    /// with a full RGBA write mask, and the layout carries no descriptor
    /// sets or push constants.
    ///
    /// The caller must ensure no frame is using the previous pipeline (the
    /// renderer idles the device first); on any failure the previous
    /// pipeline stays bound.
    pub fn build(
        &mut self,
        device: &ash::Device,
        render_pass: vk::RenderPass,
        vertex: &[u32],
        fragment: &[u32],
        topology: vk::PrimitiveTopology,
        vertex_layout: Option<&VertexLayout>,
    ) -> Result<()> {
        ensure!(
            !vertex.is_empty() && !fragment.is_empty(),
            "shader bytecode must be non-empty"
        );
        ensure!(
            render_pass != vk::RenderPass::null(),
            "no render target description to build against"
        );

        let vert_module = create_shader_module(device, vertex)?;
        let frag_module = match create_shader_module(device, fragment) {
            Ok(m) => m,
            Err(e) => {
                unsafe { device.destroy_shader_module(vert_module, None) };
                return Err(e);
            }
        };

        let result = self.build_with_modules(
            device,
            render_pass,
            vert_module,
            frag_module,
            topology,
            vertex_layout,
        );

        // Modules are only needed during pipeline compilation.
        unsafe {
            device.destroy_shader_module(vert_module, None);
            device.destroy_shader_module(frag_module, None);
        }
        result
    }

    fn build_with_modules(
        &mut self,
        device: &ash::Device,
        render_pass: vk::RenderPass,
        vert_module: vk::ShaderModule,
        frag_module: vk::ShaderModule,
        topology: vk::PrimitiveTopology,
        vertex_layout: Option<&VertexLayout>,
    ) -> Result<()> {
        let entry = c"main";
        let stages = [
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::VERTEX,
                module: vert_module,
                p_name: entry.as_ptr(),
                ..Default::default()
            },
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::FRAGMENT,
                module: frag_module,
                p_name: entry.as_ptr(),
                ..Default::default()
            },
        ];

        let vertex_input = match vertex_layout {
            Some(layout) => vk::PipelineVertexInputStateCreateInfo {
                s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
                vertex_binding_description_count: layout.bindings.len() as u32,
                p_vertex_binding_descriptions: layout.bindings.as_ptr(),
                vertex_attribute_description_count: layout.attributes.len() as u32,
                p_vertex_attribute_descriptions: layout.attributes.as_ptr(),
                ..Default::default()
            },
            // Vertices come from the shader itself; no buffer-sourced input.
            None => vk::PipelineVertexInputStateCreateInfo {
                s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
                ..Default::default()
            },
        };

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
            topology,
            primitive_restart_enable: vk::FALSE,
            ..Default::default()
        };

        let viewport_state = vk::PipelineViewportStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
            viewport_count: 1,
            scissor_count: 1,
            ..Default::default()
        };

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
            dynamic_state_count: dynamic_states.len() as u32,
            p_dynamic_states: dynamic_states.as_ptr(),
            ..Default::default()
        };

        let rasterizer = vk::PipelineRasterizationStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::CLOCKWISE,
            line_width: 1.0,
            ..Default::default()
        };

        let multisampling = vk::PipelineMultisampleStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
            rasterization_samples: vk::SampleCountFlags::TYPE_1,
            ..Default::default()
        };

        let blend_attachment = vk::PipelineColorBlendAttachmentState {
            blend_enable: vk::FALSE,
            color_write_mask: vk::ColorComponentFlags::RGBA,
            ..Default::default()
        };
        let color_blending = vk::PipelineColorBlendStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
            attachment_count: 1,
            p_attachments: &blend_attachment,
            ..Default::default()
        };

        let layout_info = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            ..Default::default()
        };
        let layout = unsafe { device.create_pipeline_layout(&layout_info, None) }
            .context("create_pipeline_layout")?;

        let pipeline_info = vk::GraphicsPipelineCreateInfo {
            s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
            stage_count: stages.len() as u32,
            p_stages: stages.as_ptr(),
            p_vertex_input_state: &vertex_input,
            p_input_assembly_state: &input_assembly,
            p_viewport_state: &viewport_state,
            p_rasterization_state: &rasterizer,
            p_multisample_state: &multisampling,
            p_color_blend_state: &color_blending,
            p_dynamic_state: &dynamic_state,
            layout,
            render_pass,
            subpass: 0,
            ..Default::default()
        };

        let pipeline = match unsafe {
            device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(&pipeline_info),
                None,
            )
        } {
            Ok(pipelines) => pipelines[0],
            Err((_, e)) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                warn!("graphics pipeline compilation failed: {e}");
                return Err(anyhow!(e)).context("create_graphics_pipelines");
            }
        };

        // Only now retire the previous pipeline.
        self.destroy(device);
        self.pipeline = pipeline;
        self.layout = layout;
        info!("graphics pipeline built ({topology:?})");
        Ok(())
    }

    /// Release the pipeline and its layout. Safe when nothing was built.
    pub fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            if self.pipeline != vk::Pipeline::null() {
                device.destroy_pipeline(self.pipeline, None);
                self.pipeline = vk::Pipeline::null();
            }
            if self.layout != vk::PipelineLayout::null() {
                device.destroy_pipeline_layout(self.layout, None);
                self.layout = vk::PipelineLayout::null();
            }
        }
    }
}

impl Default for GraphicsPipeline {
    fn default() -> Self {
        Self::new()
    }
}

fn create_shader_module(device: &ash::Device, words: &[u32]) -> Result<vk::ShaderModule> {
    let info = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        code_size: std::mem::size_of_val(words),
        p_code: words.as_ptr(),
        ..Default::default()
    };
    unsafe { device.create_shader_module(&info, None) }.context("create_shader_module")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbuilt_pipeline_has_no_handle() {
        let p = GraphicsPipeline::new();
        assert!(p.handle().is_none());
    }
}
