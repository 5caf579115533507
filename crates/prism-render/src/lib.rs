// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn is_zero(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// How the backend should pace presentation.
///
/// Fifo never drops frames and is always available; Mailbox replaces the
/// queued image when the GPU outruns the display and falls back to Fifo when
/// the surface does not offer it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PresentPreference {
    #[default]
    Mailbox,
    Fifo,
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
    ) -> Result<Self>
    where
        Self: Sized;

    fn resize(&mut self, size: RenderSize) -> Result<()>;
    fn render(&mut self) -> Result<()>;
    fn set_clear_color(&mut self, rgba: [f32; 4]);
    fn set_present_preference(&mut self, _pref: PresentPreference) {}

    /// Build a graphics pipeline from precompiled SPIR-V wordstreams. A
    /// failed build leaves the previously bound pipeline (if any) in use;
    /// until a build succeeds the backend presents cleared frames.
    fn load_pipeline(&mut self, _vertex: &[u32], _fragment: &[u32]) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records calls instead of touching a GPU; the second implementation of
    /// the backend seam next to the Vulkan one.
    struct MockRenderer {
        size: RenderSize,
        clear: [f32; 4],
        pref: PresentPreference,
        frames: u32,
        pipelines_built: u32,
    }

    impl MockRenderer {
        fn at(size: RenderSize) -> Self {
            MockRenderer {
                size,
                clear: [0.0; 4],
                pref: PresentPreference::default(),
                frames: 0,
                pipelines_built: 0,
            }
        }
    }

    impl Renderer for MockRenderer {
        fn new(
            _window: &dyn HasWindowHandle,
            _display: &dyn HasDisplayHandle,
            size: RenderSize,
        ) -> Result<Self> {
            Ok(MockRenderer::at(size))
        }

        fn resize(&mut self, size: RenderSize) -> Result<()> {
            if !size.is_zero() {
                self.size = size;
            }
            Ok(())
        }

        fn render(&mut self) -> Result<()> {
            self.frames += 1;
            Ok(())
        }

        fn set_clear_color(&mut self, rgba: [f32; 4]) {
            self.clear = rgba;
        }

        fn set_present_preference(&mut self, pref: PresentPreference) {
            self.pref = pref;
        }

        fn load_pipeline(&mut self, vertex: &[u32], fragment: &[u32]) -> Result<()> {
            if vertex.is_empty() || fragment.is_empty() {
                anyhow::bail!("empty shader bytecode");
            }
            self.pipelines_built += 1;
            Ok(())
        }
    }

    fn mock() -> MockRenderer {
        MockRenderer::at(RenderSize {
            width: 640,
            height: 480,
        })
    }

    #[test]
    fn zero_size_resize_is_a_stall_not_a_change() {
        let mut r = mock();
        r.resize(RenderSize {
            width: 0,
            height: 0,
        })
        .unwrap();
        assert_eq!(r.size.width, 640);
        r.resize(RenderSize {
            width: 1920,
            height: 1080,
        })
        .unwrap();
        assert_eq!(r.size.height, 1080);
    }

    #[test]
    fn empty_bytecode_is_rejected_and_previous_pipeline_kept() {
        let mut r = mock();
        r.load_pipeline(&[0x0723_0203, 0], &[0x0723_0203, 0]).unwrap();
        assert!(r.load_pipeline(&[], &[0x0723_0203]).is_err());
        assert_eq!(r.pipelines_built, 1);
    }

    #[test]
    fn render_keeps_pacing_without_a_pipeline() {
        let mut r = mock();
        for _ in 0..4 {
            r.render().unwrap();
        }
        assert_eq!(r.frames, 4);
    }

    #[test]
    fn present_preference_defaults_to_mailbox() {
        assert_eq!(PresentPreference::default(), PresentPreference::Mailbox);
    }

    #[test]
    fn setters_are_plumbed() {
        let mut r = mock();
        r.set_clear_color([1.0, 0.0, 0.0, 1.0]);
        r.set_present_preference(PresentPreference::Fifo);
        assert_eq!(r.clear, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(r.pref, PresentPreference::Fifo);
    }
}
