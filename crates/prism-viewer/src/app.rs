//! winit host: owns the window, the scene and the active backend.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use glam::Vec3;
use winit::application::ApplicationHandler;
use winit::dpi::{PhysicalPosition, PhysicalSize};
use winit::event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use prism_engine::backend::{
    self, BackendKind, ClientApi, FrameStatus, RenderBackend, SwitchHost, SwitchOutcome,
    WindowGeometry, WindowHints,
};
use prism_engine::render::{ShadingKind, picking};
use prism_engine::scene::{Model, Scene, primitives};

use crate::camera::OrbitCamera;
use crate::config::ViewerConfig;
use crate::hud::Hud;

/// Degrees of orbit per pixel of drag.
const DRAG_SENSITIVITY: f32 = 0.3;
const KEY_ORBIT_STEP: f32 = 5.0;
/// A press and release closer than this is a click, not a drag.
const CLICK_SLOP: f64 = 4.0;
/// Poll interval while the framebuffer is zero-area.
const SUSPENDED_POLL: Duration = Duration::from_millis(50);

/// Buffered and applied after the current callback returns.
#[derive(Debug, Clone, PartialEq)]
enum Command {
    SwitchBackend(BackendKind),
    AddModel,
    RemoveSelected,
    SetShading(ShadingKind),
    Exit,
}

#[derive(Debug, Default)]
struct Pointer {
    position: Option<PhysicalPosition<f64>>,
    pressed_at: Option<PhysicalPosition<f64>>,
}

pub struct Viewer {
    config: ViewerConfig,
    scene: Scene,
    camera: OrbitCamera,
    hud: Hud,
    window: Option<Arc<Window>>,
    backend: Box<dyn RenderBackend>,
    pointer: Pointer,
    commands: Vec<Command>,
    suspended: bool,
    exit_requested: bool,
}

impl Viewer {
    pub fn new(config: ViewerConfig) -> Self {
        let scene = demo_scene(&config);
        let backend = backend::create(config.backend, config.renderer.clone());
        Self {
            config,
            scene,
            camera: OrbitCamera::default(),
            hud: Hud::new(),
            window: None,
            backend,
            pointer: Pointer::default(),
            commands: Vec::new(),
            suspended: false,
            exit_requested: false,
        }
    }

    pub fn run(mut self) -> Result<()> {
        let event_loop = EventLoop::new().context("failed to create winit EventLoop")?;
        event_loop
            .run_app(&mut self)
            .context("winit event loop terminated with error")?;
        Ok(())
    }

    fn request_exit(&mut self) {
        self.exit_requested = true;
    }

    fn start(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let hints = self.backend.window_hints();
        let window = create_window(event_loop, &self.config, &hints)?;
        self.backend.attach_window(window.clone());
        self.window = Some(window);

        self.backend.init().context("failed to initialise backend")?;
        self.hud.bind(self.backend.as_ref());
        self.backend.setup(&self.scene).context("failed to upload scene")?;
        log::info!("viewer running on {}", self.backend.kind());
        Ok(())
    }

    fn framebuffer_size(&self) -> PhysicalSize<u32> {
        self.window.as_ref().map_or(PhysicalSize::new(0, 0), |w| w.inner_size())
    }

    fn redraw(&mut self) -> Result<()> {
        let size = self.framebuffer_size();
        let view = self.camera.view();
        let proj = self.camera.projection(size.width, size.height);

        let status = self.backend.render(&self.scene, view, proj)?;
        self.suspended = status == FrameStatus::Suspended;
        if status == FrameStatus::Presented {
            self.hud.frame_presented(Instant::now());
        }

        if let Some(window) = &self.window {
            let title = self.hud.title(&self.config.title, self.backend.as_ref(), &self.scene);
            window.set_title(&title);
        }
        Ok(())
    }

    fn pick(&mut self, at: PhysicalPosition<f64>) -> Result<()> {
        let size = self.framebuffer_size();
        if size.width == 0 || size.height == 0 {
            return Ok(());
        }
        let view = self.camera.view();
        let proj = self.camera.projection(size.width, size.height);
        let (x, y) = (at.x.max(0.0) as u32, at.y.max(0.0) as u32);

        match picking::pick(self.backend.as_mut(), &self.scene, view, proj, x, y)? {
            Some(index) => self.scene.toggle_select(index),
            None => self.scene.select_only(None),
        }
        Ok(())
    }

    fn on_key(&mut self, code: KeyCode, repeat: bool) {
        let command = match code {
            KeyCode::ArrowLeft => return self.camera.orbit(-KEY_ORBIT_STEP, 0.0),
            KeyCode::ArrowRight => return self.camera.orbit(KEY_ORBIT_STEP, 0.0),
            KeyCode::ArrowUp => return self.camera.orbit(0.0, KEY_ORBIT_STEP),
            KeyCode::ArrowDown => return self.camera.orbit(0.0, -KEY_ORBIT_STEP),
            _ if repeat => return,
            KeyCode::Digit1 => Command::SetShading(ShadingKind::Wireframe),
            KeyCode::Digit2 => Command::SetShading(ShadingKind::Solid),
            KeyCode::Digit3 => Command::SetShading(ShadingKind::MaterialPreview),
            KeyCode::Digit4 => Command::SetShading(ShadingKind::Custom),
            KeyCode::F1 => Command::SwitchBackend(BackendKind::Immediate),
            KeyCode::F2 => Command::SwitchBackend(BackendKind::Explicit),
            KeyCode::KeyN => Command::AddModel,
            KeyCode::Delete => Command::RemoveSelected,
            KeyCode::Escape => Command::Exit,
            KeyCode::KeyH => return self.hud.toggle_help(),
            KeyCode::F3 => return self.hud.toggle_stats(),
            _ => return,
        };
        self.commands.push(command);
    }

    fn on_pointer_button(&mut self, state: ElementState) {
        match state {
            ElementState::Pressed => self.pointer.pressed_at = self.pointer.position,
            ElementState::Released => {
                let (Some(from), Some(to)) = (self.pointer.pressed_at.take(), self.pointer.position)
                else {
                    return;
                };
                let moved = (to.x - from.x).hypot(to.y - from.y);
                if moved <= CLICK_SLOP
                    && let Err(err) = self.pick(to)
                {
                    log::error!("pick failed: {err:#}");
                }
            }
        }
    }

    fn on_pointer_moved(&mut self, position: PhysicalPosition<f64>) {
        if self.pointer.pressed_at.is_some()
            && let Some(last) = self.pointer.position
        {
            let (dx, dy) = (position.x - last.x, position.y - last.y);
            self.camera
                .orbit(-(dx as f32) * DRAG_SENSITIVITY, dy as f32 * DRAG_SENSITIVITY);
        }
        self.pointer.position = Some(position);
    }

    fn apply_commands(&mut self, event_loop: &ActiveEventLoop) {
        for command in std::mem::take(&mut self.commands) {
            if let Err(err) = self.apply(event_loop, command) {
                log::error!("{err:#}");
                self.request_exit();
            }
        }
        if self.exit_requested {
            event_loop.exit();
        }
    }

    fn apply(&mut self, event_loop: &ActiveEventLoop, command: Command) -> Result<()> {
        match command {
            Command::SwitchBackend(target) => {
                let renderer = self.config.renderer.clone();
                let mut host = WindowHost {
                    event_loop,
                    config: &self.config,
                    window: &mut self.window,
                    hud: &mut self.hud,
                };
                let outcome = backend::switch_backend(
                    &mut host,
                    &mut self.backend,
                    target,
                    &self.scene,
                    |kind| Ok(backend::create(kind, renderer)),
                )?;
                if outcome == SwitchOutcome::Switched {
                    self.hud.notify(format!("switched to {target}"));
                }
            }
            Command::AddModel => {
                let mut model = primitives::cube_model(&format!("cube-{}", self.scene.len()), 1.0);
                let offset = self.scene.len() as f32 * 1.5;
                model.set_position(Vec3::new(offset, 0.0, -offset * 0.5));
                let id = self.scene.add_model(model);
                let Some(model) = self.scene.model(id) else { return Ok(()) };
                if let Err(err) = self.backend.setup_model(model) {
                    self.scene.remove_model(id);
                    return Err(err);
                }
            }
            Command::RemoveSelected => {
                let ids: Vec<_> = self.scene.selected().map(Model::id).collect();
                for id in ids {
                    self.backend.clean_model(id);
                    self.scene.remove_model(id);
                }
            }
            Command::SetShading(kind) => {
                if !self.backend.set_current_shading(kind) {
                    log::warn!("shading {} is not available", kind.label());
                }
            }
            Command::Exit => self.request_exit(),
        }
        Ok(())
    }
}

impl ApplicationHandler for Viewer {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        if let Err(err) = self.start(event_loop) {
            log::error!("failed to start viewer: {err:#}");
            self.request_exit();
            event_loop.exit();
            return;
        }
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exit_requested {
            event_loop.exit();
            return;
        }

        // A minimised window may never be asked to redraw; keep polling so the
        // first non-zero frame rebuilds the swapchain.
        if self.suspended {
            event_loop.set_control_flow(ControlFlow::WaitUntil(Instant::now() + SUSPENDED_POLL));
            if let Err(err) = self.redraw() {
                log::error!("frame failed: {err:#}");
                self.request_exit();
                event_loop.exit();
            }
            return;
        }

        event_loop.set_control_flow(ControlFlow::Wait);
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        if self.window.as_ref().is_none_or(|w| w.id() != window_id) {
            return;
        }

        match event {
            WindowEvent::CloseRequested => self.commands.push(Command::Exit),
            WindowEvent::Resized(size) => {
                self.backend.resize(size);
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            WindowEvent::ScaleFactorChanged { .. } => {
                let size = self.framebuffer_size();
                self.backend.resize(size);
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state == ElementState::Pressed
                    && let PhysicalKey::Code(code) = event.physical_key
                {
                    self.on_key(code, event.repeat);
                }
            }
            WindowEvent::MouseInput { state, button: MouseButton::Left, .. } => {
                self.on_pointer_button(state);
            }
            WindowEvent::CursorMoved { position, .. } => self.on_pointer_moved(position),
            WindowEvent::CursorLeft { .. } => self.pointer = Pointer::default(),
            WindowEvent::MouseWheel { delta, .. } => {
                let steps = match delta {
                    MouseScrollDelta::LineDelta(_, y) => y,
                    MouseScrollDelta::PixelDelta(p) => (p.y / 40.0) as f32,
                };
                self.camera.zoom(steps);
            }
            WindowEvent::RedrawRequested => {
                if let Err(err) = self.redraw() {
                    log::error!("frame failed: {err:#}");
                    self.request_exit();
                }
            }
            _ => {}
        }

        self.apply_commands(event_loop);
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.backend.cleanup();
        self.hud.unbind();
        self.window = None;
    }
}

fn create_window(
    event_loop: &ActiveEventLoop,
    config: &ViewerConfig,
    hints: &WindowHints,
) -> Result<Arc<Window>> {
    // winit windows carry no client API; the immediate backend builds its own
    // surface, so the hint is informational here.
    match hints.client_api {
        ClientApi::None => log::debug!("creating window without a client API"),
        ClientApi::OpenGl { major, minor, core_profile } => log::debug!(
            "creating window for OpenGL {major}.{minor}{}",
            if core_profile { " core" } else { "" }
        ),
    }
    let attrs = Window::default_attributes()
        .with_title(config.title.clone())
        .with_inner_size(config.initial_size);
    let window = event_loop.create_window(attrs).context("failed to create window")?;
    Ok(Arc::new(window))
}

/// Borrows the viewer's window slot and HUD for one backend switch.
struct WindowHost<'a> {
    event_loop: &'a ActiveEventLoop,
    config: &'a ViewerConfig,
    window: &'a mut Option<Arc<Window>>,
    hud: &'a mut Hud,
}

impl SwitchHost for WindowHost<'_> {
    fn capture_geometry(&self) -> WindowGeometry {
        match self.window.as_ref() {
            Some(window) => WindowGeometry {
                position: window.outer_position().ok(),
                size: window.inner_size(),
            },
            None => WindowGeometry { position: None, size: PhysicalSize::new(0, 0) },
        }
    }

    fn save_ui_layout(&self) -> Result<String> {
        self.hud.save_layout()
    }

    fn unbind_ui(&mut self) {
        self.hud.unbind();
    }

    fn destroy_window(&mut self) {
        *self.window = None;
    }

    fn create_window(&mut self, hints: &WindowHints) -> Result<()> {
        *self.window = Some(create_window(self.event_loop, self.config, hints)?);
        Ok(())
    }

    fn restore_geometry(&mut self, geometry: &WindowGeometry) {
        let Some(window) = self.window.as_ref() else { return };
        if let Some(position) = geometry.position {
            window.set_outer_position(position);
        }
        if geometry.size.width > 0 && geometry.size.height > 0 {
            // Platforms may apply the size asynchronously; a Resized event follows.
            let _ = window.request_inner_size(geometry.size);
        }
    }

    fn attach_window(&mut self, backend: &mut dyn RenderBackend) {
        if let Some(window) = self.window.as_ref() {
            backend.attach_window(window.clone());
        }
    }

    fn bind_ui(&mut self, backend: &dyn RenderBackend) {
        self.hud.bind(backend);
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }

    fn restore_ui_layout(&mut self, layout: &str) -> Result<()> {
        self.hud.restore_layout(layout)
    }
}

/// A textured cube, a plain cube and a positions-only floor.
fn demo_scene(config: &ViewerConfig) -> Scene {
    let mut scene = Scene::new();

    let textured = match &config.texture {
        Some(path) => primitives::cube(1.0).with_texture(path),
        None => primitives::cube(1.0),
    };
    let mut crate_model = Model::new("crate", vec![textured]);
    crate_model.set_position(Vec3::new(-1.0, 0.5, 0.0));
    scene.add_model(crate_model);

    let mut block = primitives::cube_model("block", 0.8);
    block.set_position(Vec3::new(1.2, 0.4, 0.3));
    block.set_rotation(Vec3::new(0.0, 30.0, 0.0));
    scene.add_model(block);

    scene.add_model(Model::new("floor", vec![primitives::plane(6.0)]));

    scene.select_only(None);
    scene
}
