//! Viewer configuration read from the environment.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use winit::dpi::LogicalSize;

use prism_engine::assets;
use prism_engine::backend::BackendKind;
use prism_engine::config::RendererConfig;

/// Parent directories searched for relative asset paths.
const ASSET_SEARCH_DEPTH: usize = 4;

#[derive(Debug, Clone)]
pub struct ViewerConfig {
    pub title: String,
    pub initial_size: LogicalSize<f64>,
    /// Backend the viewer starts with.
    pub backend: BackendKind,
    pub renderer: RendererConfig,
    /// Applied to the demo scene's textured model.
    pub texture: Option<PathBuf>,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            title: "prism".to_string(),
            initial_size: LogicalSize::new(1280.0, 720.0),
            backend: BackendKind::Immediate,
            renderer: RendererConfig::default(),
            texture: None,
        }
    }
}

impl ViewerConfig {
    /// `PRISM_BACKEND`, `PRISM_SHADER_DIR`, `PRISM_VALIDATION`, `PRISM_TEXTURE`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = lookup("PRISM_BACKEND") {
            config.backend = parse_backend(&value)?;
        }
        if let Some(dir) = lookup("PRISM_SHADER_DIR") {
            config.renderer.shader_dir = assets::locate(&dir, ASSET_SEARCH_DEPTH)
                .context("PRISM_SHADER_DIR does not name a directory")?;
        }
        if let Some(flag) = lookup("PRISM_VALIDATION") {
            config.renderer.explicit.validation = parse_flag(&flag);
        }
        if let Some(path) = lookup("PRISM_TEXTURE").filter(|p| !p.is_empty()) {
            config.texture = Some(
                assets::locate(&path, ASSET_SEARCH_DEPTH).context("PRISM_TEXTURE not found")?,
            );
        }
        Ok(config)
    }
}

fn parse_backend(value: &str) -> Result<BackendKind> {
    match value.trim().to_ascii_lowercase().as_str() {
        "immediate" | "wgpu" | "gl" => Ok(BackendKind::Immediate),
        "explicit" | "vulkan" | "vk" => Ok(BackendKind::Explicit),
        other => bail!("unknown backend '{other}' (expected 'immediate' or 'explicit')"),
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = ViewerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.backend, BackendKind::Immediate);
        assert!(!config.renderer.explicit.validation);
        assert!(config.texture.is_none());
    }

    #[test]
    fn backend_and_validation_are_parsed() {
        let config = ViewerConfig::from_lookup(lookup(&[
            ("PRISM_BACKEND", "Explicit"),
            ("PRISM_VALIDATION", "1"),
        ]))
        .unwrap();
        assert_eq!(config.backend, BackendKind::Explicit);
        assert!(config.renderer.explicit.validation);
    }

    #[test]
    fn unknown_backend_is_an_error() {
        let err = ViewerConfig::from_lookup(lookup(&[("PRISM_BACKEND", "metal")])).unwrap_err();
        assert!(err.to_string().contains("metal"));
    }

    #[test]
    fn missing_texture_is_reported() {
        let err = ViewerConfig::from_lookup(lookup(&[("PRISM_TEXTURE", "no/such/file.png")]))
            .unwrap_err();
        assert!(format!("{err:#}").contains("PRISM_TEXTURE"));
    }
}
