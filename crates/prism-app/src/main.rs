// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use prism_core::init_tracing;
use prism_render::{PresentPreference, RenderSize, Renderer};
use prism_render_vk::VkRenderer;
use prism_shader::load_spirv;
use serde::Deserialize;
use tracing::{error, info, warn};

use prism_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    raw_window_handle::{HasDisplayHandle, HasWindowHandle},
    window::{Window, WindowId},
};

mod watcher;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Precompiled vertex shader (SPIR-V)
    #[arg(long, default_value = "shaders/triangle.vert.spv")]
    vert: PathBuf,

    /// Precompiled fragment shader (SPIR-V)
    #[arg(long, default_value = "shaders/triangle.frag.spv")]
    frag: PathBuf,

    /// Rebuild the pipeline when shader files change on disk
    #[arg(long)]
    watch: bool,
}

#[derive(Debug, Deserialize, Clone, Copy)]
struct RenderCfg {
    #[serde(default = "default_clear")]
    clear_color: [f32; 4],
    #[serde(default)]
    present_mode: PresentModeCfg,
}

#[derive(Debug, Clone, Copy, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
enum PresentModeCfg {
    #[default]
    Mailbox,
    Fifo,
}

#[derive(Debug, Deserialize, Default)]
struct AppCfg {
    #[serde(default)]
    render: RenderCfg,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: default_clear(),
            present_mode: PresentModeCfg::Mailbox,
        }
    }
}

fn default_clear() -> [f32; 4] {
    [0.02, 0.02, 0.04, 1.0]
}

fn load_cfg() -> AppCfg {
    match fs::read_to_string("prism.toml") {
        Ok(s) => toml::from_str::<AppCfg>(&s).unwrap_or_default(),
        Err(_) => AppCfg::default(),
    }
}

fn load_shaders(vert: &Path, frag: &Path) -> Result<(Vec<u32>, Vec<u32>)> {
    let v = load_spirv(vert)?;
    let f = load_spirv(frag)?;
    Ok((v.words, f.words))
}

struct App {
    args: Args,
    cfg: AppCfg,
    window: Option<Window>,
    renderer: Option<VkRenderer>,
    render_size: RenderSize,
    shader_events: Option<Receiver<PathBuf>>,

    exiting: bool,
    paused: bool,
    frames: u32,
    last_fps_instant: std::time::Instant,
}

impl App {
    /// Load both shaders and rebuild the pipeline. Any failure (missing
    /// file, bad SPIR-V, driver rejection) leaves the previous pipeline in
    /// place; before the first success the renderer presents cleared frames.
    fn reload_pipeline(&mut self) {
        let Some(renderer) = &mut self.renderer else {
            return;
        };
        match load_shaders(&self.args.vert, &self.args.frag) {
            Ok((vert, frag)) => {
                if let Err(e) = renderer.load_pipeline(&vert, &frag) {
                    warn!("pipeline rebuild failed, keeping previous: {e:#}");
                }
            }
            Err(e) => {
                warn!("shader load failed, keeping previous pipeline: {e:#}");
            }
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            let window = event_loop
                .create_window(Window::default_attributes().with_title("prism"))
                .expect("create_window");

            let size = window.inner_size();
            self.render_size = RenderSize {
                width: size.width.max(1),
                height: size.height.max(1),
            };

            let wh = window.window_handle().expect("window_handle");
            let dh = window.display_handle().expect("display_handle");

            let mut renderer = match VkRenderer::new(&wh, &dh, self.render_size) {
                Ok(r) => r,
                Err(e) => {
                    error!("renderer init failed: {e:#}");
                    event_loop.exit();
                    return;
                }
            };
            renderer.set_clear_color(self.cfg.render.clear_color);
            renderer.set_present_preference(match self.cfg.render.present_mode {
                PresentModeCfg::Mailbox => PresentPreference::Mailbox,
                PresentModeCfg::Fifo => PresentPreference::Fifo,
            });

            self.window = Some(window);
            self.renderer = Some(renderer);
            self.reload_pipeline();

            if self.args.watch {
                self.shader_events = Some(watcher::watch(
                    vec![self.args.vert.clone(), self.args.frag.clone()],
                    Duration::from_millis(500),
                ));
                info!(
                    "watching {} and {}",
                    self.args.vert.display(),
                    self.args.frag.display()
                );
            }
        }

        event_loop.set_control_flow(ControlFlow::Wait);
        self.paused = self.render_size.is_zero();
        if !self.paused {
            if let Some(w) = &self.window {
                w.request_redraw();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.exiting = true;
                self.renderer = None;
                self.window = None;
                event_loop.exit();
            }

            WindowEvent::Resized(new_size) => {
                self.render_size = RenderSize {
                    width: new_size.width,
                    height: new_size.height,
                };
                self.paused = self.render_size.is_zero();
                info!(
                    "Resized → {}x{} (paused={})",
                    self.render_size.width, self.render_size.height, self.paused
                );

                if let Some(renderer) = &mut self.renderer {
                    let _ = renderer.resize(self.render_size);
                }
                if !self.paused {
                    if let Some(w) = &self.window {
                        w.request_redraw();
                    }
                }
            }

            WindowEvent::Occluded(occluded) => {
                self.paused = occluded || self.render_size.is_zero();
                info!("Occluded={} → paused={}", occluded, self.paused);
            }

            WindowEvent::RedrawRequested => {
                if self.exiting || self.paused {
                    return;
                }
                if let Some(renderer) = &mut self.renderer {
                    match renderer.render() {
                        Ok(()) => {
                            self.frames = self.frames.saturating_add(1);
                        }
                        Err(e) => {
                            error!("render error: {e:#}");
                        }
                    }
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }

        // Drain edits that accumulated since the last frame; one save may
        // touch both files, so rebuild once after draining.
        if let Some(rx) = &self.shader_events {
            let mut dirty = false;
            while rx.try_recv().is_ok() {
                dirty = true;
            }
            if dirty {
                info!("shader change detected, rebuilding pipeline");
                self.reload_pipeline();
            }
        }

        if self.paused {
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }

        event_loop.set_control_flow(ControlFlow::Wait);
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = std::time::Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let event_loop: EventLoop<()> = EventLoop::new()?;

    let mut app = App {
        args,
        cfg: load_cfg(),
        window: None,
        renderer: None,
        render_size: RenderSize {
            width: 1,
            height: 1,
        },
        shader_events: None,
        exiting: false,
        paused: false,
        frames: 0,
        last_fps_instant: std::time::Instant::now(),
    };

    event_loop.run_app(&mut app)?;
    Ok(())
}
