use std::ffi::CString;

use anyhow::{anyhow, Context, Result};
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use raw_window_handle::RawDisplayHandle;
use tracing::info;

/// Owns the Vulkan entry point and instance. The instance is destroyed on
/// drop only when this scope created it; an adopted instance (one owned by a
/// host windowing layer) is left alone.
pub struct GpuInstance {
    entry: Entry,
    instance: Instance,
    owns_instance: bool,
}

impl GpuInstance {
    /// Load the Vulkan library and create an instance. When a display handle
    /// is given the platform's surface extensions are enabled; without one
    /// the instance is headless.
    pub fn create(app_name: &str, display: Option<RawDisplayHandle>) -> Result<Self> {
        let entry = unsafe { Entry::load() }.context("load Vulkan library")?;

        let name = CString::new(app_name).context("application name")?;
        let app_info = vk::ApplicationInfo {
            s_type: vk::StructureType::APPLICATION_INFO,
            p_application_name: name.as_ptr(),
            application_version: vk::make_api_version(0, 1, 0, 0),
            p_engine_name: name.as_ptr(),
            engine_version: vk::make_api_version(0, 1, 0, 0),
            api_version: vk::API_VERSION_1_0,
            ..Default::default()
        };

        let ext_vec = match display {
            Some(raw) => ash_window::enumerate_required_extensions(raw)
                .context("enumerate_required_extensions")?
                .to_vec(),
            None => Vec::new(),
        };

        let create_info = vk::InstanceCreateInfo {
            s_type: vk::StructureType::INSTANCE_CREATE_INFO,
            p_application_info: &app_info,
            enabled_extension_count: ext_vec.len() as u32,
            pp_enabled_extension_names: ext_vec.as_ptr(),
            ..Default::default()
        };

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("create_instance")?;

        Ok(Self {
            entry,
            instance,
            owns_instance: true,
        })
    }

    /// Wrap an instance created elsewhere. Device and queue selection proceed
    /// identically; the instance is never destroyed here.
    pub fn adopt(entry: Entry, instance: Instance) -> Self {
        Self {
            entry,
            instance,
            owns_instance: false,
        }
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn handle(&self) -> &Instance {
        &self.instance
    }
}

impl Drop for GpuInstance {
    fn drop(&mut self) {
        if self.owns_instance {
            unsafe { self.instance.destroy_instance(None) };
        }
    }
}

/// Surface the selected queue family must be able to present to. If
/// initialization fails the surface is destroyed here, before the consumed
/// [`GpuInstance`] takes the instance down with it.
pub struct PresentTarget<'a> {
    pub loader: &'a surface::Instance,
    pub surface: vk::SurfaceKHR,
}

/// Owns the logical device and its single graphics queue. Every other
/// component holds this by reference; the handles never change after
/// initialization. Dropping waits for the device to idle, destroys it, and
/// then lets the inner [`GpuInstance`] tear down the instance.
pub struct DeviceContext {
    gpu: GpuInstance,
    phys: vk::PhysicalDevice,
    device: ash::Device,
    queue_family: u32,
    queue: vk::Queue,
}

impl DeviceContext {
    /// Select the first physical device exposing a graphics-capable queue
    /// family (and presentation support when `present` is given), then
    /// create the logical device and fetch its queue. On failure nothing
    /// usable is left behind: the present surface is released, and dropping
    /// the consumed [`GpuInstance`] releases the instance after it.
    pub fn initialize(gpu: GpuInstance, present: Option<PresentTarget>) -> Result<Self> {
        let (phys, queue_family) = match pick_device_and_queue(gpu.handle(), present.as_ref()) {
            Ok(picked) => picked,
            Err(e) => {
                release_present(present.as_ref());
                return Err(e);
            }
        };

        let priorities = [1.0_f32];
        let qinfo = vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: queue_family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        };

        // VK_KHR_swapchain only makes sense when presenting to a surface.
        let device_exts = [swapchain::NAME.as_ptr()];
        let ext_count = if present.is_some() { 1 } else { 0 };
        let dinfo = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            queue_create_info_count: 1,
            p_queue_create_infos: &qinfo,
            enabled_extension_count: ext_count,
            pp_enabled_extension_names: device_exts.as_ptr(),
            ..Default::default()
        };

        let device = match unsafe { gpu.handle().create_device(phys, &dinfo, None) } {
            Ok(d) => d,
            Err(e) => {
                release_present(present.as_ref());
                return Err(e).context("create_device");
            }
        };
        let queue = unsafe { device.get_device_queue(queue_family, 0) };

        info!("GPU device ready (queue family {queue_family})");

        Ok(Self {
            gpu,
            phys,
            device,
            queue_family,
            queue,
        })
    }

    pub fn entry(&self) -> &Entry {
        self.gpu.entry()
    }

    pub fn instance(&self) -> &Instance {
        self.gpu.handle()
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.phys
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    pub fn wait_idle(&self) {
        unsafe { self.device.device_wait_idle().ok() };
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();
            self.device.destroy_device(None);
        }
        // `gpu` drops afterwards and destroys the instance it owns.
    }
}

fn release_present(present: Option<&PresentTarget>) {
    if let Some(t) = present {
        unsafe { t.loader.destroy_surface(t.surface, None) };
    }
}

fn pick_device_and_queue(
    instance: &Instance,
    present: Option<&PresentTarget>,
) -> Result<(vk::PhysicalDevice, u32)> {
    let devices = unsafe { instance.enumerate_physical_devices() }
        .context("enumerate_physical_devices")?;
    for phys in devices {
        let qprops = unsafe { instance.get_physical_device_queue_family_properties(phys) };
        for (i, q) in qprops.iter().enumerate() {
            if !q.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                continue;
            }
            let can_present = match present {
                Some(t) => unsafe {
                    t.loader
                        .get_physical_device_surface_support(phys, i as u32, t.surface)
                        .unwrap_or(false)
                },
                None => true,
            };
            if can_present {
                return Ok((phys, i as u32));
            }
        }
    }
    Err(anyhow!(
        "no physical device exposes a graphics-capable queue family"
    ))
}
