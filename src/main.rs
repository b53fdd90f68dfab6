// =============================================================================
// FRAME PACER - windowed presentation loop
// =============================================================================
//
// Opens a window, clears it every frame and keeps presenting through resizes,
// minimize/restore and fullscreen toggles. All frame pacing lives in the
// library; this file only forwards window events.
//
// EVENT FLOW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  Resized         -> scheduler.notify_resized()                  │
// │  RedrawRequested -> scheduler.run_frame(clear_pass)             │
// │  fatal error / Esc / close -> scheduler.shutdown(), exit        │
// └─────────────────────────────────────────────────────────────────┘
//
// =============================================================================

use anyhow::Result;
use env_logger::Builder;
use frame_pacer::backend::{ClearPass, DepthTargets, PresentationSurface, VulkanDevice};
use frame_pacer::config::Config;
use frame_pacer::{FrameOutcome, FrameScheduler, FrameState};
use log::LevelFilter;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Fullscreen, Window, WindowAttributes},
};

fn main() -> Result<()> {
    // Load configuration from config.toml
    let (config, config_error) = Config::load("config.toml");

    init_logging(&config);
    if let Some(e) = config_error {
        log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
    }
    log::info!("Starting frame pacer");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!(
        "Present mode: {}, {} frames in flight",
        config.graphics.present_mode,
        config.graphics.max_frames_in_flight
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

/// RUST_LOG wins over the configured level when set
fn init_logging(config: &Config) {
    let level = config
        .debug
        .log_level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::Info);

    Builder::new().filter_level(level).parse_default_env().init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// GPU side of the app.
///
/// Field order matters for Drop: the scheduler drains the GPU before the
/// clear pass frees its command pool.
struct Renderer {
    scheduler: FrameScheduler<VulkanDevice>,
    clear_pass: ClearPass,
}

struct App {
    config: Config,
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,
    is_fullscreen: bool,

    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let is_fullscreen = config.window.fullscreen;
        let now = Instant::now();
        Self {
            config,
            renderer: None,
            window: None,
            is_fullscreen,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    /// Device + surface, then the recorder, then the scheduler (which builds
    /// the first swapchain) and its per-image listeners.
    fn init_vulkan(&self, window: Arc<Window>) -> Result<Renderer> {
        log::info!("Initializing Vulkan...");

        let enable_validation = cfg!(debug_assertions) && self.config.debug.validation_layers;
        let (device, surface) = VulkanDevice::new(&self.config.window.title, enable_validation, window.as_ref())?;

        let surface =
            PresentationSurface::new(device.clone(), surface, window).with_low_latency_mode(self.config.present_mode());

        let scheduler_config = self.config.scheduler_config();
        let clear_pass = ClearPass::new(
            device.clone(),
            scheduler_config.frames_in_flight,
            self.config.graphics.clear_color,
        )?;

        let mut scheduler = FrameScheduler::new(device.clone(), surface, scheduler_config)?;
        scheduler.add_listener(Box::new(DepthTargets::new(device)))?;

        log::info!("Vulkan initialized successfully!");
        Ok(Renderer { scheduler, clear_pass })
    }

    // =========================================================================
    // RENDER LOOP
    // =========================================================================

    /// Returns false when the app must exit
    fn render_frame(&mut self) -> bool {
        let Some(renderer) = self.renderer.as_mut() else {
            return true;
        };

        match renderer.scheduler.run_frame(&mut renderer.clear_pass) {
            Ok(FrameOutcome::Presented { .. }) => {
                self.update_fps();
                true
            }
            Ok(FrameOutcome::Recreated) => {
                log::debug!("Frame skipped, swapchain rebuilt");
                true
            }
            Ok(FrameOutcome::Suspended) => true,
            Err(e) if !e.is_fatal() => {
                // Scheduler stays suspended until the next resize
                log::warn!("Frame skipped: {}", e);
                true
            }
            Err(e) => {
                log::error!("Fatal render error: {:#}", anyhow::Error::from(e));
                false
            }
        }
    }

    fn shutdown(&mut self) {
        if let Some(Renderer { scheduler, clear_pass }) = self.renderer.take() {
            if let Err(e) = scheduler.shutdown() {
                log::error!("Shutdown: {}", e);
            }
            drop(clear_pass);
        }
    }

    // =========================================================================
    // FULLSCREEN TOGGLE
    // =========================================================================

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;

            if self.is_fullscreen {
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }

            if let Some(renderer) = self.renderer.as_mut() {
                renderer.scheduler.notify_resized();
            }
        }
    }

    // =========================================================================
    // FPS TRACKING
    // =========================================================================

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Update title every second
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                let mode = if self.is_fullscreen { "fullscreen" } else { "windowed" };
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms) [{}]",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0,
                    mode
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        if self.config.window.fullscreen {
            window_attributes = window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        match self.init_vulkan(window.clone()) {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => {
                log::error!("Failed to initialize Vulkan: {:#}", e);
                event_loop.exit();
                return;
            }
        }

        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: winit::window::WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.shutdown();
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.scheduler.notify_resized();
                }
                if let Some(ref window) = self.window {
                    window.request_redraw();
                }
            }

            WindowEvent::RedrawRequested => {
                if !self.render_frame() {
                    self.shutdown();
                    event_loop.exit();
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        match key {
                            KeyCode::Escape => {
                                log::info!("ESC pressed, exiting...");
                                self.shutdown();
                                event_loop.exit();
                            }
                            KeyCode::F11 => self.toggle_fullscreen(),
                            _ => {}
                        }
                    }
                }
            }

            _ => {}
        }
    }

    /// Continuous redraws while there is something to present. A minimized
    /// window waits for its next Resized event instead of spinning.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        let suspended = self
            .renderer
            .as_ref()
            .map_or(true, |r| r.scheduler.state() == FrameState::Recreating);

        if let (false, Some(window)) = (suspended, &self.window) {
            window.request_redraw();
        }
    }
}

impl Drop for App {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");
        self.shutdown();
        log::info!("Cleanup complete");
    }
}
