use anyhow::{Context, Result};
use ash::vk;
use tracing::debug;

use crate::buffer::VertexBuffer;
use crate::context::DeviceContext;
use crate::recorder::{self, RecordTarget};
use crate::swapchain::{Swapchain, SurfaceTarget};

/// Bound on CPU-ahead-of-GPU work. Two slots: record frame i+1 while frame
/// i is still on the GPU.
pub const FRAMES_IN_FLIGHT: usize = 2;

/// Finite so a lost surface surfaces as an error instead of hanging the
/// control thread.
const GPU_WAIT_TIMEOUT_NS: u64 = 5_000_000_000;

#[derive(Clone, Copy)]
struct FrameSlot {
    image_available: vk::Semaphore,
    render_finished: vk::Semaphore,
    in_flight: vk::Fence,
    cmd: vk::CommandBuffer,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// The frame was dropped (or presented stale) and the swapchain rebuilt.
    Rebuilt,
}

pub(crate) fn next_slot(i: usize) -> usize {
    (i + 1) % FRAMES_IN_FLIGHT
}

/// What to do after presenting. A fatal present error outranks any pending
/// rebuild trigger; staleness reported by present, a suboptimal acquire, and
/// an external resize request are equivalent triggers for a single rebuild.
#[derive(Debug, PartialEq, Eq)]
enum PresentDisposition {
    Proceed,
    Rebuild,
    Fatal(vk::Result),
}

fn classify_present(
    result: Result<bool, vk::Result>,
    suboptimal_acquire: bool,
    resize_requested: bool,
) -> PresentDisposition {
    match result {
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) | Ok(true) => PresentDisposition::Rebuild,
        Err(e) => PresentDisposition::Fatal(e),
        Ok(false) if suboptimal_acquire || resize_requested => PresentDisposition::Rebuild,
        Ok(false) => PresentDisposition::Proceed,
    }
}

/// Owns the per-in-flight-frame command buffers and synchronization
/// primitives, and drives the acquire → record → submit → present cycle.
/// A slot is reused only once its fence reports the GPU finished the
/// previous submission through it.
pub struct FrameScheduler {
    cmd_pool: vk::CommandPool,
    slots: Vec<FrameSlot>,
    current: usize,
}

impl FrameScheduler {
    pub fn new(ctx: &DeviceContext) -> Result<Self> {
        let device = ctx.device();

        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            queue_family_index: ctx.queue_family(),
            ..Default::default()
        };
        let cmd_pool = unsafe { device.create_command_pool(&pool_info, None) }
            .context("create_command_pool")?;

        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: cmd_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: FRAMES_IN_FLIGHT as u32,
            ..Default::default()
        };
        let cmds = unsafe { device.allocate_command_buffers(&alloc_info) }
            .context("allocate_command_buffers")?;

        let semaphore_info = vk::SemaphoreCreateInfo {
            s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
            ..Default::default()
        };
        // Signaled so the first wait on every slot passes immediately.
        let fence_info = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };

        let mut slots = Vec::with_capacity(FRAMES_IN_FLIGHT);
        for &cmd in &cmds {
            let slot = unsafe {
                FrameSlot {
                    image_available: device
                        .create_semaphore(&semaphore_info, None)
                        .context("create image-available semaphore")?,
                    render_finished: device
                        .create_semaphore(&semaphore_info, None)
                        .context("create render-finished semaphore")?,
                    in_flight: device
                        .create_fence(&fence_info, None)
                        .context("create in-flight fence")?,
                    cmd,
                }
            };
            slots.push(slot);
        }

        Ok(Self {
            cmd_pool,
            slots,
            current: 0,
        })
    }

    /// One full frame cycle. Staleness reported by acquire or present (or an
    /// externally flagged resize) triggers exactly one swapchain rebuild;
    /// a rebuild before submission leaves the slot fence signaled so the
    /// slot simply retries next cycle. `inject` is recorded inside the
    /// render pass after the built-in draw.
    #[allow(clippy::too_many_arguments)]
    pub fn draw_frame<F>(
        &mut self,
        ctx: &DeviceContext,
        chain: &mut Swapchain,
        target: &SurfaceTarget,
        pipeline: Option<vk::Pipeline>,
        vertices: Option<&VertexBuffer>,
        clear: vk::ClearValue,
        resize_requested: bool,
        inject: F,
    ) -> Result<FrameOutcome>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let device = ctx.device();
        let slot = self.slots[self.current];

        unsafe { device.wait_for_fences(&[slot.in_flight], true, GPU_WAIT_TIMEOUT_NS) }
            .context("wait for in-flight fence")?;

        let acquired = unsafe {
            chain.loader().acquire_next_image(
                chain.handle(),
                GPU_WAIT_TIMEOUT_NS,
                slot.image_available,
                vk::Fence::null(),
            )
        };
        let (image_index, suboptimal_acquire) = match acquired {
            Ok(pair) => pair,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                // Abandon the frame before the fence reset; nothing was
                // submitted, so the slot stays signaled for retry.
                debug!("acquire reported out-of-date, rebuilding swapchain");
                chain.rebuild(ctx, target)?;
                return Ok(FrameOutcome::Rebuilt);
            }
            Err(e) => return Err(e).context("acquire_next_image"),
        };

        unsafe { device.reset_fences(&[slot.in_flight]) }.context("reset in-flight fence")?;
        unsafe { device.reset_command_buffer(slot.cmd, vk::CommandBufferResetFlags::empty()) }
            .context("reset command buffer")?;

        recorder::record(
            device,
            slot.cmd,
            &RecordTarget {
                render_pass: chain.render_pass(),
                framebuffer: chain.framebuffer(image_index as usize),
                extent: chain.extent(),
                pipeline,
                vertices,
                clear,
            },
            inject,
        )?;

        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &slot.image_available,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &slot.cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &slot.render_finished,
            ..Default::default()
        };
        unsafe { device.queue_submit(ctx.queue(), std::slice::from_ref(&submit), slot.in_flight) }
            .context("queue_submit")?;

        let chain_handle = chain.handle();
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &slot.render_finished,
            swapchain_count: 1,
            p_swapchains: &chain_handle,
            p_image_indices: &image_index,
            ..Default::default()
        };
        let present_result = unsafe { chain.loader().queue_present(ctx.queue(), &present) };

        // Submission happened; the slot advances whatever present said.
        self.current = next_slot(self.current);

        match classify_present(present_result, suboptimal_acquire, resize_requested) {
            PresentDisposition::Fatal(e) => Err(e).context("queue_present"),
            PresentDisposition::Rebuild => {
                chain.rebuild(ctx, target)?;
                Ok(FrameOutcome::Rebuilt)
            }
            PresentDisposition::Proceed => Ok(FrameOutcome::Presented),
        }
    }

    /// Destroy sync objects and the command pool (freeing the buffers with
    /// it). Must only be called with the device idle; safe to call twice.
    pub fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            for slot in self.slots.drain(..) {
                device.destroy_semaphore(slot.image_available, None);
                device.destroy_semaphore(slot.render_finished, None);
                device.destroy_fence(slot.in_flight, None);
            }
            if self.cmd_pool != vk::CommandPool::null() {
                device.destroy_command_pool(self.cmd_pool, None);
                self.cmd_pool = vk::CommandPool::null();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_index_wraps_over_two_slots() {
        let mut i = 0;
        let mut seen = Vec::new();
        for _ in 0..2 * FRAMES_IN_FLIGHT {
            seen.push(i);
            i = next_slot(i);
        }
        assert_eq!(seen, vec![0, 1, 0, 1]);
        assert_eq!(i, 0);
    }

    #[test]
    fn every_slot_is_revisited_within_f_cycles() {
        // With F slots and one advance per cycle, a slot waited on has
        // always been submitted F cycles ago (or never, when its fence is
        // still in its initial signaled state).
        let mut i = 0;
        for step in 0..8 {
            assert_eq!(i, step % FRAMES_IN_FLIGHT);
            i = next_slot(i);
        }
    }

    #[test]
    fn device_loss_is_fatal_even_with_a_rebuild_pending() {
        assert_eq!(
            classify_present(Err(vk::Result::ERROR_DEVICE_LOST), false, true),
            PresentDisposition::Fatal(vk::Result::ERROR_DEVICE_LOST)
        );
        assert_eq!(
            classify_present(Err(vk::Result::ERROR_SURFACE_LOST_KHR), true, false),
            PresentDisposition::Fatal(vk::Result::ERROR_SURFACE_LOST_KHR)
        );
    }

    #[test]
    fn all_staleness_triggers_are_equivalent() {
        for disposition in [
            classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR), false, false),
            classify_present(Ok(true), false, false),
            classify_present(Ok(false), true, false),
            classify_present(Ok(false), false, true),
        ] {
            assert_eq!(disposition, PresentDisposition::Rebuild);
        }
    }

    #[test]
    fn clean_present_proceeds() {
        assert_eq!(
            classify_present(Ok(false), false, false),
            PresentDisposition::Proceed
        );
    }
}
