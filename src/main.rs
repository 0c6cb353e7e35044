use log::debug;
use shell::Shell;
use utils::theme::Theme;

use crate::utils::config::Config;
use crate::utils::log::init_logger;

mod shell;
mod utils;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::new()?;
    if let Err(e) = init_logger(&config) {
        eprintln!("mish: logging disabled: {}", e);
    }
    debug!("配置加载成功 {}", config.config_dir.display());
    let theme = Theme::load_theme(&config.theme);

    let mut shell = Shell::new(&config, &theme)?;
    let status = shell.run()?;
    drop(shell);
    std::process::exit(status)
}
