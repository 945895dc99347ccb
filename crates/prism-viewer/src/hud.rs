//! Minimal HUD rendered into the window title.
//!
//! The HUD is the viewer's UI layer: it binds to the active backend, and its
//! layout state survives a backend switch as JSON.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use prism_engine::backend::{BackendKind, RenderBackend};
use prism_engine::scene::{Model, Scene};

pub const KEY_HELP: &str =
    "1-4 shading | F1/F2 backend | N add | Del remove | click pick | drag/arrows orbit | H help";

const NOTIFY_FOR: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HudLayout {
    pub show_stats: bool,
    pub show_help: bool,
    pub notification: Option<String>,
}

impl Default for HudLayout {
    fn default() -> Self {
        Self { show_stats: true, show_help: false, notification: None }
    }
}

/// Frames per second over one-second windows.
#[derive(Debug)]
struct FpsCounter {
    window_start: Option<Instant>,
    frames: u32,
    fps: f32,
}

impl FpsCounter {
    fn new() -> Self {
        Self { window_start: None, frames: 0, fps: 0.0 }
    }

    fn tick(&mut self, now: Instant) {
        let start = *self.window_start.get_or_insert(now);
        self.frames += 1;
        let elapsed = now.duration_since(start);
        if elapsed >= Duration::from_secs(1) {
            self.fps = self.frames as f32 / elapsed.as_secs_f32();
            self.frames = 0;
            self.window_start = Some(now);
        }
    }

    fn reset(&mut self) {
        *self = Self::new();
    }
}

#[derive(Debug)]
pub struct Hud {
    layout: HudLayout,
    bound: Option<BackendKind>,
    notification_until: Option<Instant>,
    fps: FpsCounter,
}

impl Hud {
    pub fn new() -> Self {
        Self {
            layout: HudLayout::default(),
            bound: None,
            notification_until: None,
            fps: FpsCounter::new(),
        }
    }

    pub fn layout(&self) -> &HudLayout {
        &self.layout
    }

    pub fn save_layout(&self) -> Result<String> {
        serde_json::to_string(&self.layout).context("failed to serialise HUD layout")
    }

    pub fn restore_layout(&mut self, json: &str) -> Result<()> {
        self.layout = serde_json::from_str(json).context("malformed HUD layout")?;
        if self.layout.notification.is_some() {
            self.notification_until = Some(Instant::now() + NOTIFY_FOR);
        }
        Ok(())
    }

    pub fn bind(&mut self, backend: &dyn RenderBackend) {
        self.bound = Some(backend.kind());
        self.fps.reset();
    }

    pub fn unbind(&mut self) {
        self.bound = None;
    }

    pub fn bound(&self) -> Option<BackendKind> {
        self.bound
    }

    pub fn notify(&mut self, message: impl Into<String>) {
        self.layout.notification = Some(message.into());
        self.notification_until = Some(Instant::now() + NOTIFY_FOR);
    }

    pub fn toggle_help(&mut self) {
        self.layout.show_help = !self.layout.show_help;
    }

    pub fn toggle_stats(&mut self) {
        self.layout.show_stats = !self.layout.show_stats;
    }

    pub fn frame_presented(&mut self, now: Instant) {
        self.fps.tick(now);
        if self.notification_until.is_some_and(|until| now >= until) {
            self.layout.notification = None;
            self.notification_until = None;
        }
    }

    pub fn title(&self, base: &str, backend: &dyn RenderBackend, scene: &Scene) -> String {
        let mut parts = vec![base.to_string()];
        match self.bound {
            Some(kind) => parts.push(kind.label().to_string()),
            None => parts.push("unbound".to_string()),
        }
        parts.push(backend.current_shading().label().to_string());

        if self.layout.show_stats {
            let selected: Vec<&str> = scene.selected().map(Model::name).collect();
            let selection = if selected.is_empty() { "-".to_string() } else { selected.join(",") };
            parts.push(format!("{} models", scene.len()));
            parts.push(format!("selected: {selection}"));
            parts.push(format!("{:.0} fps", self.fps.fps));
        }
        if let Some(note) = &self.layout.notification {
            parts.push(note.clone());
        }
        if self.layout.show_help {
            parts.push(KEY_HELP.to_string());
        }
        parts.join(" | ")
    }
}

#[cfg(test)]
mod tests {
    use prism_engine::backend;
    use prism_engine::config::RendererConfig;
    use prism_engine::scene::primitives;

    use super::*;

    #[test]
    fn layout_survives_unbind_and_rebind() {
        let mut hud = Hud::new();
        hud.toggle_help();
        hud.notify("switched");
        let saved = hud.save_layout().unwrap();

        let mut fresh = Hud::new();
        fresh.restore_layout(&saved).unwrap();
        assert_eq!(fresh.layout(), hud.layout());
    }

    #[test]
    fn malformed_layout_is_rejected() {
        let mut hud = Hud::new();
        assert!(hud.restore_layout("{not json").is_err());
        assert_eq!(hud.layout(), &HudLayout::default());
    }

    #[test]
    fn title_reports_backend_and_selection() {
        let mut scene = Scene::new();
        scene.add_model(primitives::cube_model("box", 1.0));
        let backend = backend::create(BackendKind::Explicit, RendererConfig::default());

        let mut hud = Hud::new();
        assert!(hud.title("prism", backend.as_ref(), &scene).contains("unbound"));

        hud.bind(backend.as_ref());
        let title = hud.title("prism", backend.as_ref(), &scene);
        assert!(title.contains("Explicit (Vulkan)"), "{title}");
        assert!(title.contains("Material Preview"), "{title}");
        assert!(title.contains("1 models"), "{title}");
        assert!(title.contains("selected: box"), "{title}");
    }

    #[test]
    fn notification_expires() {
        let mut hud = Hud::new();
        hud.notify("hello");
        hud.frame_presented(Instant::now() + NOTIFY_FOR + Duration::from_millis(1));
        assert!(hud.layout().notification.is_none());
    }

    #[test]
    fn fps_is_measured_over_a_second() {
        let mut counter = FpsCounter::new();
        let start = Instant::now();
        for i in 0..=60 {
            counter.tick(start + Duration::from_millis(i * 1000 / 60));
        }
        assert!((counter.fps - 61.0).abs() < 1.0, "{}", counter.fps);
    }
}
