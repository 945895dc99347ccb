mod app;
mod camera;
mod config;
mod hud;

use prism_engine::logging::{LoggingConfig, init_logging};

use crate::app::Viewer;
use crate::config::ViewerConfig;

fn main() {
    init_logging(LoggingConfig::default());

    let config = match ViewerConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            log::error!("invalid configuration: {err:#}");
            std::process::exit(2);
        }
    };

    println!("prism viewer ({})", config.backend);
    println!("  {}", hud::KEY_HELP);

    if let Err(err) = Viewer::new(config).run() {
        log::error!("{err:#}");
        std::process::exit(1);
    }
}
