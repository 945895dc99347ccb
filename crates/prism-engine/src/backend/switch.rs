//! Runtime backend switching.
//!
//! The host owns the window and the UI binding; the orchestrator only decides
//! the order in which they are torn down and rebuilt around a fresh backend.

use anyhow::{Context, Result};
use winit::dpi::{PhysicalPosition, PhysicalSize};

use crate::scene::Scene;

use super::{BackendKind, RenderBackend, WindowHints};

/// Outer window placement carried across a switch.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct WindowGeometry {
    /// `None` on platforms that do not report window positions.
    pub position: Option<PhysicalPosition<i32>>,
    pub size: PhysicalSize<u32>,
}

/// What the orchestrator needs from the application hosting the backend.
pub trait SwitchHost {
    fn capture_geometry(&self) -> WindowGeometry;

    /// Serialised UI layout state.
    fn save_ui_layout(&self) -> Result<String>;

    fn unbind_ui(&mut self);

    fn destroy_window(&mut self);

    fn create_window(&mut self, hints: &WindowHints) -> Result<()>;

    fn restore_geometry(&mut self, geometry: &WindowGeometry);

    /// Hands the current window to `backend`.
    fn attach_window(&mut self, backend: &mut dyn RenderBackend);

    fn bind_ui(&mut self, backend: &dyn RenderBackend);

    fn restore_ui_layout(&mut self, layout: &str) -> Result<()>;
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SwitchOutcome {
    /// `target` was already active.
    Unchanged,
    Switched,
}

/// Replaces `current` with a freshly built backend of kind `target`.
///
/// Any failure is returned as-is; the previous backend is already gone by
/// then and no rollback is attempted.
pub fn switch_backend<H, F>(
    host: &mut H,
    current: &mut Box<dyn RenderBackend>,
    target: BackendKind,
    scene: &Scene,
    make: F,
) -> Result<SwitchOutcome>
where
    H: SwitchHost + ?Sized,
    F: FnOnce(BackendKind) -> Result<Box<dyn RenderBackend>>,
{
    let from = current.kind();
    if from == target {
        log::debug!("switch to {target} ignored; already active");
        return Ok(SwitchOutcome::Unchanged);
    }
    log::info!("switching backend: {from} -> {target}");

    let geometry = host.capture_geometry();
    let layout = host.save_ui_layout().context("failed to save UI layout")?;

    current.cleanup();
    host.unbind_ui();
    host.destroy_window();

    let previous = std::mem::replace(current, make(target)?);
    drop(previous);

    let hints = current.window_hints();
    host.create_window(&hints)
        .with_context(|| format!("failed to create window for {target}"))?;
    host.restore_geometry(&geometry);
    host.attach_window(current.as_mut());

    current.init().with_context(|| format!("failed to initialise {target}"))?;

    host.bind_ui(current.as_ref());
    host.restore_ui_layout(&layout).context("failed to restore UI layout")?;

    current.setup(scene).context("failed to upload scene")?;

    log::info!("now rendering with {target}");
    Ok(SwitchOutcome::Switched)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Arc;

    use anyhow::bail;
    use glam::Mat4;
    use winit::window::Window;

    use super::*;
    use crate::backend::{ClientApi, FrameStatus};
    use crate::render::ShadingKind;
    use crate::scene::{Model, ModelId, primitives};

    type Log = Rc<RefCell<Vec<String>>>;

    fn push(log: &Log, event: impl Into<String>) {
        log.borrow_mut().push(event.into());
    }

    struct FakeBackend {
        kind: BackendKind,
        log: Log,
        models: usize,
        fail_init: bool,
    }

    impl FakeBackend {
        fn boxed(kind: BackendKind, log: &Log) -> Box<dyn RenderBackend> {
            Box::new(Self { kind, log: log.clone(), models: 0, fail_init: false })
        }
    }

    impl RenderBackend for FakeBackend {
        fn kind(&self) -> BackendKind {
            self.kind
        }
        fn window_hints(&self) -> WindowHints {
            WindowHints { client_api: ClientApi::None }
        }
        fn attach_window(&mut self, _: Arc<Window>) {}
        fn init(&mut self) -> Result<()> {
            push(&self.log, format!("init {:?}", self.kind));
            if self.fail_init {
                bail!("no device");
            }
            Ok(())
        }
        fn setup(&mut self, scene: &Scene) -> Result<()> {
            push(&self.log, format!("setup {:?} {}", self.kind, scene.len()));
            self.models = scene.len();
            Ok(())
        }
        fn setup_model(&mut self, _: &Model) -> Result<()> {
            self.models += 1;
            Ok(())
        }
        fn clean_model(&mut self, _: ModelId) {}
        fn resize(&mut self, _: PhysicalSize<u32>) {}
        fn render(&mut self, _: &Scene, _: Mat4, _: Mat4) -> Result<FrameStatus> {
            Ok(FrameStatus::Presented)
        }
        fn render_index(&mut self, _: &Scene, _: Mat4, _: Mat4) -> Result<()> {
            Ok(())
        }
        fn read_index(&mut self, _: u32, _: u32) -> Result<u32> {
            Ok(0)
        }
        fn cleanup(&mut self) {
            push(&self.log, format!("cleanup {:?}", self.kind));
        }
        fn programs(&self) -> Vec<ShadingKind> {
            Vec::new()
        }
        fn current_shading(&self) -> ShadingKind {
            ShadingKind::Solid
        }
        fn set_current_shading(&mut self, _: ShadingKind) -> bool {
            false
        }
        fn has_model(&self, _: ModelId) -> bool {
            false
        }
        fn model_count(&self) -> usize {
            self.models
        }
    }

    struct FakeHost {
        log: Log,
        geometry: WindowGeometry,
        layout: String,
    }

    impl SwitchHost for FakeHost {
        fn capture_geometry(&self) -> WindowGeometry {
            push(&self.log, "capture");
            self.geometry
        }
        fn save_ui_layout(&self) -> Result<String> {
            push(&self.log, "save layout");
            Ok(self.layout.clone())
        }
        fn unbind_ui(&mut self) {
            push(&self.log, "unbind ui");
        }
        fn destroy_window(&mut self) {
            push(&self.log, "destroy window");
        }
        fn create_window(&mut self, _: &WindowHints) -> Result<()> {
            push(&self.log, "create window");
            self.geometry = WindowGeometry { position: None, size: PhysicalSize::new(1, 1) };
            self.layout.clear();
            Ok(())
        }
        fn restore_geometry(&mut self, geometry: &WindowGeometry) {
            push(&self.log, "restore geometry");
            self.geometry = *geometry;
        }
        fn attach_window(&mut self, _: &mut dyn RenderBackend) {
            push(&self.log, "attach window");
        }
        fn bind_ui(&mut self, backend: &dyn RenderBackend) {
            push(&self.log, format!("bind ui {:?}", backend.kind()));
        }
        fn restore_ui_layout(&mut self, layout: &str) -> Result<()> {
            push(&self.log, "restore layout");
            self.layout = layout.to_owned();
            Ok(())
        }
    }

    fn host(log: &Log) -> FakeHost {
        FakeHost {
            log: log.clone(),
            geometry: WindowGeometry {
                position: Some(PhysicalPosition::new(40, 60)),
                size: PhysicalSize::new(1280, 720),
            },
            layout: r#"{"show_stats":true}"#.into(),
        }
    }

    #[test]
    fn same_kind_is_a_no_op() {
        let log = Log::default();
        let mut host = host(&log);
        let mut current = FakeBackend::boxed(BackendKind::Immediate, &log);

        let scene = Scene::new();
        let outcome = switch_backend(&mut host, &mut current, BackendKind::Immediate, &scene, |_| {
            panic!("no backend may be constructed")
        })
        .unwrap();

        assert_eq!(outcome, SwitchOutcome::Unchanged);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn switch_runs_in_documented_order() {
        let log = Log::default();
        let mut host = host(&log);
        let mut current = FakeBackend::boxed(BackendKind::Immediate, &log);
        let mut scene = Scene::new();
        scene.add_model(primitives::cube_model("a", 1.0));
        scene.add_model(primitives::cube_model("b", 1.0));

        let outcome = switch_backend(&mut host, &mut current, BackendKind::Explicit, &scene, |k| {
            push(&log, format!("construct {k:?}"));
            Ok(FakeBackend::boxed(k, &log))
        })
        .unwrap();

        assert_eq!(outcome, SwitchOutcome::Switched);
        assert_eq!(current.kind(), BackendKind::Explicit);
        assert_eq!(current.model_count(), 2);
        assert_eq!(
            *log.borrow(),
            vec![
                "capture",
                "save layout",
                "cleanup Immediate",
                "unbind ui",
                "destroy window",
                "construct Explicit",
                "create window",
                "restore geometry",
                "attach window",
                "init Explicit",
                "bind ui Explicit",
                "restore layout",
                "setup Explicit 2",
            ]
        );
        assert_eq!(host.geometry.position, Some(PhysicalPosition::new(40, 60)));
        assert_eq!(host.layout, r#"{"show_stats":true}"#);
    }

    #[test]
    fn init_failure_is_propagated() {
        let log = Log::default();
        let mut host = host(&log);
        let mut current = FakeBackend::boxed(BackendKind::Explicit, &log);

        let scene = Scene::new();
        let err = switch_backend(&mut host, &mut current, BackendKind::Immediate, &scene, |k| {
            let next = FakeBackend { kind: k, log: log.clone(), models: 0, fail_init: true };
            Ok(Box::new(next) as Box<dyn RenderBackend>)
        })
        .unwrap_err();

        assert!(format!("{err:#}").contains("no device"));
        assert!(!log.borrow().iter().any(|e| e.starts_with("bind ui")));
    }
}
