use anyhow::{Context, Result};
use ash::khr::surface;
use ash::vk;
use prism_render::{PresentPreference, RenderSize, Renderer};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::info;

pub mod buffer;
pub mod context;
pub mod frame;
pub mod pipeline;
pub mod recorder;
pub mod swapchain;

pub use frame::FRAMES_IN_FLIGHT;

use buffer::{Vertex, VertexBuffer, DEMO_TRIANGLE};
use context::{DeviceContext, GpuInstance, PresentTarget};
use frame::{FrameOutcome, FrameScheduler};
use pipeline::GraphicsPipeline;
use swapchain::{Swapchain, SurfaceTarget};

/// Vulkan implementation of [`Renderer`]. Owns the whole stack from instance
/// to per-frame sync objects and tears it down in reverse order on drop.
pub struct VkRenderer {
    ctx: DeviceContext,
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,
    chain: Swapchain,
    pipeline: GraphicsPipeline,
    frames: FrameScheduler,
    vertices: VertexBuffer,
    // Last successfully loaded wordstreams, kept so the pipeline can be
    // rebuilt against a new render pass if the surface format changes.
    shaders: Option<(Vec<u32>, Vec<u32>)>,
    clear: vk::ClearValue,
    preference: PresentPreference,
    size: RenderSize,
    resize_requested: bool,
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
    ) -> Result<Self> {
        let raw_display = display.display_handle().context("display handle")?.as_raw();
        let raw_window = window.window_handle().context("window handle")?.as_raw();

        let gpu = GpuInstance::create("prism", Some(raw_display))?;
        let surface_loader = surface::Instance::new(gpu.entry(), gpu.handle());
        let surface = unsafe {
            ash_window::create_surface(gpu.entry(), gpu.handle(), raw_display, raw_window, None)
        }
        .context("create_surface")?;

        let ctx = DeviceContext::initialize(
            gpu,
            Some(PresentTarget {
                loader: &surface_loader,
                surface,
            }),
        )?;

        let props = unsafe {
            ctx.instance()
                .get_physical_device_properties(ctx.physical_device())
        };
        let adapter = props
            .device_name_as_c_str()
            .unwrap_or(c"unknown")
            .to_string_lossy()
            .into_owned();
        info!("rendering on {adapter}");

        // From here on `ctx` is alive, so a failure has to release the
        // surface and any newer resources before `ctx` drops the device and
        // instance beneath them.
        let preference = PresentPreference::default();
        let mut chain = match Swapchain::build(
            &ctx,
            &SurfaceTarget {
                loader: &surface_loader,
                surface,
                size,
                preference,
            },
        ) {
            Ok(c) => c,
            Err(e) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                return Err(e);
            }
        };
        let mut frames = match FrameScheduler::new(&ctx) {
            Ok(f) => f,
            Err(e) => {
                chain.teardown(ctx.device());
                unsafe { surface_loader.destroy_surface(surface, None) };
                return Err(e);
            }
        };
        let vertices = match VertexBuffer::create(&ctx, &DEMO_TRIANGLE) {
            Ok(v) => v,
            Err(e) => {
                frames.destroy(ctx.device());
                chain.teardown(ctx.device());
                unsafe { surface_loader.destroy_surface(surface, None) };
                return Err(e);
            }
        };

        Ok(Self {
            ctx,
            surface_loader,
            surface,
            chain,
            pipeline: GraphicsPipeline::new(),
            frames,
            vertices,
            shaders: None,
            clear: vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: [0.0, 0.0, 0.0, 1.0],
                },
            },
            preference,
            size,
            resize_requested: false,
        })
    }

    /// Record the new size; the swapchain is rebuilt lazily on the next
    /// frame. A zero dimension stalls rendering instead of requesting a
    /// rebuild (a zero-extent swapchain is not creatable).
    fn resize(&mut self, size: RenderSize) -> Result<()> {
        self.size = size;
        if !size.is_zero() {
            self.resize_requested = true;
        }
        Ok(())
    }

    fn render(&mut self) -> Result<()> {
        self.render_with(|_, _| {})
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear = vk::ClearValue {
            color: vk::ClearColorValue { float32: rgba },
        };
    }

    fn set_present_preference(&mut self, pref: PresentPreference) {
        if pref != self.preference {
            self.preference = pref;
            self.resize_requested = true;
        }
    }

    fn load_pipeline(&mut self, vertex: &[u32], fragment: &[u32]) -> Result<()> {
        // The old pipeline may still be referenced by in-flight frames.
        self.ctx.wait_idle();
        self.pipeline.build(
            self.ctx.device(),
            self.chain.render_pass(),
            vertex,
            fragment,
            vk::PrimitiveTopology::TRIANGLE_LIST,
            Some(&Vertex::layout()),
        )?;
        self.shaders = Some((vertex.to_vec(), fragment.to_vec()));
        Ok(())
    }
}

impl VkRenderer {
    /// Draw one frame, recording `inject`'s commands inside the render pass
    /// after the built-in draw. [`Renderer::render`] is this with no extra
    /// commands.
    pub fn render_with<F>(&mut self, inject: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        if self.size.is_zero() {
            return Ok(());
        }

        let format_before = self.chain.format();
        let pipeline = self.pipeline.handle();
        let target = SurfaceTarget {
            loader: &self.surface_loader,
            surface: self.surface,
            size: self.size,
            preference: self.preference,
        };
        let outcome = self.frames.draw_frame(
            &self.ctx,
            &mut self.chain,
            &target,
            pipeline,
            Some(&self.vertices),
            self.clear,
            self.resize_requested,
            inject,
        )?;

        if outcome == FrameOutcome::Rebuilt {
            self.resize_requested = false;
            // A format change invalidates the render pass the pipeline was
            // compiled against.
            if self.chain.format() != format_before {
                if let Some((vert, frag)) = self.shaders.clone() {
                    self.pipeline.build(
                        self.ctx.device(),
                        self.chain.render_pass(),
                        &vert,
                        &frag,
                        vk::PrimitiveTopology::TRIANGLE_LIST,
                        Some(&Vertex::layout()),
                    )?;
                }
            }
        }
        Ok(())
    }
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        self.ctx.wait_idle();
        let device = self.ctx.device();
        self.frames.destroy(device);
        self.pipeline.destroy(device);
        self.vertices.destroy(device);
        self.chain.teardown(device);
        unsafe { self.surface_loader.destroy_surface(self.surface, None) };
        // `ctx` drops last and releases the device and instance.
    }
}
