use anyhow::{ensure, Context, Result};
use ash::khr::{surface, swapchain};
use ash::vk;
use prism_render::{PresentPreference, RenderSize};
use tracing::info;

use crate::context::DeviceContext;

/// Everything a swapchain build needs from the window/surface provider.
pub struct SurfaceTarget<'a> {
    pub loader: &'a surface::Instance,
    pub surface: vk::SurfaceKHR,
    pub size: RenderSize,
    pub preference: PresentPreference,
}

/// The presentable image chain plus everything keyed to it: one view and one
/// framebuffer per image, and the render pass they are all built against.
/// Per-image arrays always have identical length; extent and format are
/// fixed until the next rebuild.
pub struct Swapchain {
    loader: swapchain::Device,
    chain: vk::SwapchainKHR,
    format: vk::Format,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
}

fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .unwrap_or(formats[0])
}

fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    pref: PresentPreference,
) -> vk::PresentModeKHR {
    // FIFO is the only mode Vulkan guarantees; everything else is opt-in.
    if pref == PresentPreference::Mailbox
        && modes.iter().any(|&m| m == vk::PresentModeKHR::MAILBOX)
    {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    if caps.max_image_count == 0 {
        caps.min_image_count + 1
    } else {
        (caps.min_image_count + 1).min(caps.max_image_count)
    }
}

impl Swapchain {
    pub fn build(ctx: &DeviceContext, target: &SurfaceTarget) -> Result<Self> {
        let loader = swapchain::Device::new(ctx.instance(), ctx.device());
        let mut chain = Self {
            loader,
            chain: vk::SwapchainKHR::null(),
            format: vk::Format::UNDEFINED,
            extent: vk::Extent2D::default(),
            images: Vec::new(),
            views: Vec::new(),
            render_pass: vk::RenderPass::null(),
            framebuffers: Vec::new(),
        };
        chain.build_inner(ctx, target)?;
        Ok(chain)
    }

    /// Tear down the stale chain (framebuffers, views, chain — the render
    /// pass is reused unless the surface format changed) and build again.
    /// Must only be called with no chain-dependent GPU work in flight.
    pub fn rebuild(&mut self, ctx: &DeviceContext, target: &SurfaceTarget) -> Result<()> {
        ctx.wait_idle();
        self.release_chain(ctx.device());
        self.build_inner(ctx, target)
    }

    fn build_inner(&mut self, ctx: &DeviceContext, target: &SurfaceTarget) -> Result<()> {
        let device = ctx.device();
        let phys = ctx.physical_device();

        let caps = unsafe {
            target
                .loader
                .get_physical_device_surface_capabilities(phys, target.surface)
        }
        .context("surface capabilities")?;
        let formats = unsafe {
            target
                .loader
                .get_physical_device_surface_formats(phys, target.surface)
        }
        .context("surface formats")?;
        let modes = unsafe {
            target
                .loader
                .get_physical_device_surface_present_modes(phys, target.surface)
        }
        .context("surface present modes")?;
        ensure!(!formats.is_empty(), "surface reports no formats");

        let surf_format = choose_surface_format(&formats);
        let present_mode = choose_present_mode(&modes, target.preference);
        let extent = choose_extent(&caps, target.size);
        let min_count = choose_image_count(&caps);

        let swap_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: target.surface,
            min_image_count: min_count,
            image_format: surf_format.format,
            image_color_space: surf_format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: vk::SharingMode::EXCLUSIVE,
            pre_transform: caps.current_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode,
            clipped: vk::TRUE,
            ..Default::default()
        };

        let chain = unsafe { self.loader.create_swapchain(&swap_info, None) }
            .context("create_swapchain")?;

        // `self` only sees complete state; until the final assignments a
        // failure must reclaim whatever the steps above produced, since a
        // later teardown cannot find it.
        let destroy_partial = |views: &[vk::ImageView], framebuffers: &[vk::Framebuffer]| unsafe {
            for &fb in framebuffers {
                device.destroy_framebuffer(fb, None);
            }
            for &iv in views {
                device.destroy_image_view(iv, None);
            }
            self.loader.destroy_swapchain(chain, None);
        };

        let images = match unsafe { self.loader.get_swapchain_images(chain) } {
            Ok(imgs) => imgs,
            Err(e) => {
                destroy_partial(&[], &[]);
                return Err(e).context("get_swapchain_images");
            }
        };

        let mut views = Vec::with_capacity(images.len());
        for &img in &images {
            let sub = vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            };
            let iv_info = vk::ImageViewCreateInfo {
                s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                image: img,
                view_type: vk::ImageViewType::TYPE_2D,
                format: surf_format.format,
                subresource_range: sub,
                ..Default::default()
            };
            match unsafe { device.create_image_view(&iv_info, None) } {
                Ok(view) => views.push(view),
                Err(e) => {
                    destroy_partial(&views, &[]);
                    return Err(e).context("create_image_view");
                }
            }
        }

        // Render target description: single color attachment, cleared on
        // load, handed to presentation at the end of the pass. Reused across
        // rebuilds as long as the format holds; on a format change the
        // replacement is created before the old pass is released.
        if self.render_pass == vk::RenderPass::null() || self.format != surf_format.format {
            let render_pass = match create_render_pass(device, surf_format.format) {
                Ok(rp) => rp,
                Err(e) => {
                    destroy_partial(&views, &[]);
                    return Err(e);
                }
            };
            if self.render_pass != vk::RenderPass::null() {
                unsafe { device.destroy_render_pass(self.render_pass, None) };
            }
            self.render_pass = render_pass;
        }

        let mut framebuffers = Vec::with_capacity(views.len());
        for &view in &views {
            let fb_info = vk::FramebufferCreateInfo {
                s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                render_pass: self.render_pass,
                attachment_count: 1,
                p_attachments: &view,
                width: extent.width,
                height: extent.height,
                layers: 1,
                ..Default::default()
            };
            match unsafe { device.create_framebuffer(&fb_info, None) } {
                Ok(fb) => framebuffers.push(fb),
                Err(e) => {
                    destroy_partial(&views, &framebuffers);
                    return Err(e).context("create_framebuffer");
                }
            }
        }

        debug_assert_eq!(images.len(), views.len());
        debug_assert_eq!(views.len(), framebuffers.len());

        self.chain = chain;
        self.format = surf_format.format;
        self.extent = extent;
        self.images = images;
        self.views = views;
        self.framebuffers = framebuffers;

        info!(
            "swapchain ready ({}x{}, fmt {:?}, {} images, {:?})",
            extent.width,
            extent.height,
            surf_format.format,
            self.images.len(),
            present_mode
        );
        Ok(())
    }

    fn release_chain(&mut self, device: &ash::Device) {
        unsafe {
            for fb in self.framebuffers.drain(..) {
                device.destroy_framebuffer(fb, None);
            }
            for iv in self.views.drain(..) {
                device.destroy_image_view(iv, None);
            }
            if self.chain != vk::SwapchainKHR::null() {
                self.loader.destroy_swapchain(self.chain, None);
                self.chain = vk::SwapchainKHR::null();
            }
        }
        self.images.clear();
    }

    /// Full teardown in reverse creation order. Safe to call repeatedly.
    pub fn teardown(&mut self, device: &ash::Device) {
        self.release_chain(device);
        if self.render_pass != vk::RenderPass::null() {
            unsafe { device.destroy_render_pass(self.render_pass, None) };
            self.render_pass = vk::RenderPass::null();
        }
    }

    pub fn loader(&self) -> &swapchain::Device {
        &self.loader
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.chain
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn framebuffer(&self, image_index: usize) -> vk::Framebuffer {
        self.framebuffers[image_index]
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }
}

fn create_render_pass(device: &ash::Device, format: vk::Format) -> Result<vk::RenderPass> {
    let color_att = vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    };
    let att_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &att_ref,
        ..Default::default()
    };
    let rp_info = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &color_att,
        subpass_count: 1,
        p_subpasses: &subpass,
        ..Default::default()
    };
    unsafe { device.create_render_pass(&rp_info, None) }.context("create_render_pass")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn prefers_srgb_nonlinear_pair() {
        let formats = [
            fmt(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            fmt(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            choose_surface_format(&formats).format,
            vk::Format::B8G8R8A8_SRGB
        );
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [fmt(
            vk::Format::R16G16B16A16_SFLOAT,
            vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
        )];
        assert_eq!(
            choose_surface_format(&formats).format,
            vk::Format::R16G16B16A16_SFLOAT
        );
    }

    #[test]
    fn mailbox_when_offered_else_fifo() {
        let with = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        let without = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            choose_present_mode(&with, PresentPreference::Mailbox),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&without, PresentPreference::Mailbox),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn fifo_preference_ignores_mailbox() {
        let modes = [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO];
        assert_eq!(
            choose_present_mode(&modes, PresentPreference::Fifo),
            vk::PresentModeKHR::FIFO
        );
    }

    fn caps(current: u32, min: (u32, u32), max: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: current,
                height: current,
            },
            min_image_extent: vk::Extent2D {
                width: min.0,
                height: min.1,
            },
            max_image_extent: vk::Extent2D {
                width: max.0,
                height: max.1,
            },
            ..Default::default()
        }
    }

    #[test]
    fn extent_uses_current_when_defined() {
        let c = caps(800, (1, 1), (4096, 4096));
        let e = choose_extent(
            &c,
            RenderSize {
                width: 1920,
                height: 1080,
            },
        );
        assert_eq!((e.width, e.height), (800, 800));
    }

    #[test]
    fn extent_clamps_window_size_when_unconstrained() {
        let c = caps(u32::MAX, (64, 64), (1024, 1024));
        for (want, got) in [(0u32, 64u32), (1, 64), (1920, 1024), (640, 640)] {
            let e = choose_extent(
                &c,
                RenderSize {
                    width: want,
                    height: want,
                },
            );
            assert_eq!((e.width, e.height), (got, got));
        }
    }

    #[test]
    fn image_count_is_min_plus_one_capped_by_max() {
        let mut c = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&c), 3);
        c.max_image_count = 0; // unlimited
        assert_eq!(choose_image_count(&c), 3);
        c.max_image_count = 2;
        assert_eq!(choose_image_count(&c), 2);
    }
}
