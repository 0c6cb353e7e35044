use dotenv::dotenv;
use rustyline::EditMode;
use std::env;
use std::fs;
use std::io;
use std::path::PathBuf;

pub struct Config {
    pub name: String,
    pub config_dir: PathBuf,
    pub theme: String,
    pub history_file: PathBuf,
    pub history_size: usize,
    pub editor_mode: String,
    pub logger_level: String,
    pub logger_dir: PathBuf,
    pub logger_stderr: bool,
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = Self::get_config_dir();
        Config {
            name: env!("CARGO_PKG_NAME").to_string(),
            theme: String::from("default"),
            history_file: config_dir.join(".mish_history"),
            history_size: 1000,
            editor_mode: String::from("emacs"),
            logger_level: String::from("info"),
            logger_dir: config_dir.join("logs"),
            logger_stderr: false,
            config_dir,
        }
    }
}

impl Config {
    fn get_config_dir() -> PathBuf {
        if let Ok(home) = env::var("HOME") {
            PathBuf::from(home).join(".config/mish")
        } else {
            env::temp_dir().join("mish")
        }
    }

    pub fn new() -> io::Result<Self> {
        // 优先加载环境变量
        if cfg!(debug_assertions) {
            dotenv::from_filename(".env.development").ok();
        } else {
            dotenv().ok();
        }

        let mut config = Config::default();
        config.apply(|key| env::var(key).ok());

        // 确保历史文件目录存在
        if let Some(parent) = config.history_file.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(config)
    }

    /// Overrides defaults with whatever `lookup` knows about the `MISH_*` keys.
    fn apply(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(theme) = lookup("MISH_THEME") {
            self.theme = theme;
        }
        if let Some(editor) = lookup("MISH_EDITOR") {
            self.editor_mode = editor;
        }
        if let Some(history) = lookup("MISH_HISTORY") {
            self.history_file = PathBuf::from(shellexpand::tilde(&history).as_ref());
        }
        if let Some(size) = lookup("MISH_HISTORY_SIZE").and_then(|s| s.trim().parse().ok()) {
            self.history_size = size;
        }
        if let Some(level) = lookup("MISH_LOG_LEVEL") {
            self.logger_level = level;
        }
        if let Some(dir) = lookup("MISH_LOG_DIR") {
            self.logger_dir = PathBuf::from(shellexpand::tilde(&dir).as_ref());
        }
        if let Some(flag) = lookup("MISH_LOG_STDERR") {
            self.logger_stderr = matches!(flag.to_lowercase().as_str(), "1" | "true" | "yes");
        }
    }

    pub fn get_edit_mode(&self) -> EditMode {
        match self.editor_mode.to_lowercase().as_str() {
            "vi" => EditMode::Vi,
            _ => EditMode::Emacs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn with(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut config = Config::default();
        config.apply(|key| vars.get(key).cloned());
        config
    }

    #[test]
    fn defaults() {
        let config = with(&[]);
        assert_eq!(config.name, "mish");
        assert_eq!(config.theme, "default");
        assert_eq!(config.history_size, 1000);
        assert_eq!(config.get_edit_mode(), EditMode::Emacs);
        assert!(!config.logger_stderr);
        assert!(config.history_file.starts_with(&config.config_dir));
    }

    #[test]
    fn environment_overrides() {
        let config = with(&[
            ("MISH_THEME", "dark"),
            ("MISH_EDITOR", "VI"),
            ("MISH_HISTORY", "/tmp/mish-hist"),
            ("MISH_HISTORY_SIZE", "50"),
            ("MISH_LOG_LEVEL", "debug"),
            ("MISH_LOG_STDERR", "true"),
        ]);
        assert_eq!(config.theme, "dark");
        assert_eq!(config.get_edit_mode(), EditMode::Vi);
        assert_eq!(config.history_file, PathBuf::from("/tmp/mish-hist"));
        assert_eq!(config.history_size, 50);
        assert_eq!(config.logger_level, "debug");
        assert!(config.logger_stderr);
    }

    #[test]
    fn bad_history_size_keeps_default() {
        assert_eq!(with(&[("MISH_HISTORY_SIZE", "lots")]).history_size, 1000);
    }
}
