use log::{debug, error, warn};
use std::error::Error;
use std::fmt::Display;
use std::io::{self, IsTerminal, Write};

use crate::shell::error::ShellError;
use crate::shell::executor::Executor;
use crate::shell::expand::Expander;
use crate::shell::parser::lexer::Lexer;
use crate::shell::parser::Parser;
use crate::shell::readline::{HeredocLines, Input, LineReader, ReadlineError, ReadlineManager};
use crate::shell::signals;
use crate::shell::state::ShellState;
use crate::utils::config::Config;
use crate::utils::path;
use crate::utils::theme::Theme;

/// Status of a line that failed to lex or parse.
const SYNTAX_ERROR_STATUS: i32 = 2;
/// Status after Ctrl-C discarded the line being edited.
const INTERRUPTED_STATUS: i32 = 130;

pub struct Shell<'t, R: LineReader> {
    theme: &'t Theme,
    reader: R,
    executor: Executor,
    expander: Expander,
    state: ShellState,
}

impl<'t, 'c> Shell<'t, ReadlineManager<'c>> {
    /// A shell reading from the terminal, or plain lines when stdin is not one.
    pub fn new(config: &'c Config, theme: &'t Theme) -> Result<Self, ReadlineError> {
        let interactive = io::stdin().is_terminal();
        let reader = ReadlineManager::new(config, interactive)?;
        Ok(Self::with_reader(theme, reader, interactive))
    }
}

impl<'t, R: LineReader> Shell<'t, R> {
    pub fn with_reader(theme: &'t Theme, reader: R, interactive: bool) -> Self {
        Self {
            theme,
            reader,
            executor: Executor::new(),
            expander: Expander::new(),
            state: ShellState::new(interactive),
        }
    }

    /// Read loop. Returns the status the process should exit with.
    pub fn run(&mut self) -> Result<i32, Box<dyn Error>> {
        debug!("初始化 mish, interactive={}", self.state.interactive);

        if self.state.interactive {
            if let Err(e) = signals::take_terminal() {
                warn!("无法接管终端: {}", e);
            }
        }
        signals::install_handlers()?;

        if self.state.interactive {
            println!("{}", (self.theme.success_style)(self.theme.get_message("welcome")));
        }
        debug!("mish 准备就绪...");

        let status = self.run_loop();
        if let Err(e) = self.reader.save_history() {
            warn!("保存历史记录失败: {}", e);
        }
        debug!("退出 mish, status={}", status);
        Ok(status)
    }

    fn run_loop(&mut self) -> i32 {
        loop {
            self.report_finished_jobs();
            let _ = io::stdout().flush();

            let prompt = if self.state.interactive {
                self.theme.prompt(&path::current_dir(), self.state.last_status)
            } else {
                String::new()
            };

            match self.reader.read_line(&prompt) {
                Ok(Input::Line(line)) => {
                    self.handle_line(&line);
                }
                Ok(Input::Interrupted) => {
                    if let Some(echo) = self.interrupted() {
                        println!("{}", echo);
                    }
                }
                Ok(Input::Eof) => {
                    debug!("接收到 EOF 信号，退出 mish...");
                    if self.state.interactive {
                        println!("\n{}", (self.theme.success_style)(self.theme.get_message("exit")));
                    }
                    return self.state.last_status;
                }
                Err(e) => {
                    error!("读取输入失败: {}", e);
                    self.report(format!("cannot read input: {}", e));
                    return self.state.last_status;
                }
            }

            if let Some(status) = self.state.exit_request() {
                if self.state.interactive {
                    println!("{}", (self.theme.success_style)(self.theme.get_message("exit")));
                }
                return status;
            }
        }
    }

    /// Lexes, expands, parses and runs one input line. Every error ends
    /// here, reported and turned into a status; none reaches the loop.
    pub fn handle_line(&mut self, line: &str) -> i32 {
        if line.trim().is_empty() {
            return self.state.last_status;
        }
        self.reader.add_history(line);

        let tokens = match Lexer::new(line).tokenize() {
            Ok(tokens) => tokens,
            Err(e) => return self.syntax_error(e.into()),
        };
        let tokens = self.expander.expand_tokens(tokens, &self.state);

        let continuation = if self.state.interactive { "> " } else { "" };
        let parsed = {
            let mut heredocs = HeredocLines::new(&mut self.reader, continuation);
            Parser::new(tokens).parse(&mut heredocs)
        };
        let node = match parsed {
            Ok(node) => node,
            Err(e) => return self.syntax_error(e.into()),
        };
        debug!(
            "解析结果 ({} 条命令, {} 个管道): {}",
            node.leaf_count(),
            node.pipe_count(),
            node
        );

        match self.executor.execute(&node, &mut self.state) {
            Ok(status) => status,
            Err(e) => {
                error!("执行失败: {}", e);
                self.report(ShellError::from(e));
                self.state.last_status
            }
        }
    }

    fn syntax_error(&mut self, err: ShellError) -> i32 {
        debug!("语法错误: {}", err);
        self.report(err);
        self.state.last_status = SYNTAX_ERROR_STATUS;
        SYNTAX_ERROR_STATUS
    }

    fn report(&self, err: impl Display) {
        eprintln!("{}", (self.theme.error_style)(format!("mish: {}", err).as_str()));
    }

    /// Ctrl-C at the prompt: the line is dropped and `^C` echoed when interactive.
    fn interrupted(&mut self) -> Option<String> {
        debug!("接收到中断信号...");
        self.state.last_status = INTERRUPTED_STATUS;
        self.state
            .interactive
            .then(|| (self.theme.warning_style)(self.theme.get_message("interrupt")))
    }

    fn finished_job_notices(&mut self) -> Vec<String> {
        let mut notices = Vec::new();
        for job in self.state.jobs.reap_background() {
            debug!("后台任务结束: {}", job);
            if self.state.interactive {
                notices.push((self.theme.warning_style)(job.to_string().as_str()));
            }
        }
        notices
    }

    fn report_finished_jobs(&mut self) {
        for notice in self.finished_job_notices() {
            println!("{}", notice);
        }
    }

    #[cfg(test)]
    fn state(&self) -> &ShellState {
        &self.state
    }
}
