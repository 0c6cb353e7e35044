use colored::Colorize;

use crate::utils::path::basename;

pub struct Theme {
    pub prompt_symbol: String,
    pub welcome_message: String,
    pub exit_message: String,
    pub prompt_style: Box<dyn Fn(&str) -> String>,
    pub error_style: Box<dyn Fn(&str) -> String>,
    pub warning_style: Box<dyn Fn(&str) -> String>,
    pub success_style: Box<dyn Fn(&str) -> String>,
}

impl Default for Theme {
    fn default() -> Self {
        Theme {
            prompt_symbol: String::from("❯"),
            welcome_message: String::from("欢迎使用 mish，输入 exit 或按 Ctrl-D 退出"),
            exit_message: String::from("再见～"),
            prompt_style: Box::new(|s: &str| s.bright_cyan().to_string()),
            error_style: Box::new(|s: &str| s.bright_red().to_string()),
            warning_style: Box::new(|s: &str| s.yellow().to_string()),
            success_style: Box::new(|s: &str| s.bright_magenta().to_string()),
        }
    }
}

impl Theme {
    pub fn load_theme(theme_name: &str) -> Theme {
        match theme_name {
            "dark" => Theme {
                prompt_symbol: String::from("➤"),
                prompt_style: Box::new(|s: &str| s.bright_purple().to_string()),
                error_style: Box::new(|s: &str| s.red().to_string()),
                warning_style: Box::new(|s: &str| s.bright_yellow().to_string()),
                success_style: Box::new(|s: &str| s.magenta().to_string()),
                ..Theme::default()
            },
            _ => Theme::default(),
        }
    }

    pub fn get_message(&self, key: &str) -> &str {
        match key {
            "welcome" => &self.welcome_message,
            "exit" => &self.exit_message,
            "interrupt" => "^C",
            _ => "",
        }
    }

    /// `<cwd basename> <symbol> `, the symbol turning to the error style
    /// after a failed command.
    pub fn prompt(&self, cwd: &str, last_status: i32) -> String {
        let symbol = if last_status == 0 {
            (self.success_style)(self.prompt_symbol.as_str())
        } else {
            (self.error_style)(self.prompt_symbol.as_str())
        };
        format!("{} {} ", (self.prompt_style)(basename(cwd).as_ref()), symbol)
    }
}
