use std::io;

use crate::shell::parser::redirect::HeredocReader;
use crate::utils::config::Config;
use log::{debug, error, warn};
pub use rustyline::error::ReadlineError;
use rustyline::history::FileHistory;
use rustyline::Editor;
use rustyline::{CompletionType, Config as RLConfig};

/// One attempt at reading a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Line(String),
    /// Ctrl-C at the prompt.
    Interrupted,
    Eof,
}

/// Source of command lines for the read loop.
pub trait LineReader {
    fn read_line(&mut self, prompt: &str) -> io::Result<Input>;

    fn add_history(&mut self, _line: &str) {}

    fn save_history(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Adapts a line reader into the source of here-document bodies.
pub struct HeredocLines<'r> {
    reader: &'r mut dyn LineReader,
    prompt: &'r str,
}

impl<'r> HeredocLines<'r> {
    pub fn new(reader: &'r mut dyn LineReader, prompt: &'r str) -> Self {
        Self { reader, prompt }
    }
}

impl HeredocReader for HeredocLines<'_> {
    fn read_heredoc_line(&mut self) -> io::Result<Option<String>> {
        match self.reader.read_line(self.prompt)? {
            Input::Line(line) => Ok(Some(line)),
            Input::Eof => Ok(None),
            Input::Interrupted => Err(io::Error::new(
                io::ErrorKind::Interrupted,
                "here-document interrupted",
            )),
        }
    }
}

pub struct ReadlineManager<'a> {
    config: &'a Config,
    editor: Editor<(), FileHistory>,
    keep_history: bool,
}

impl<'a> ReadlineManager<'a> {
    /// History is only loaded and kept for interactive sessions.
    pub fn new(config: &'a Config, interactive: bool) -> Result<Self, ReadlineError> {
        let rl_config = RLConfig::builder()
            .max_history_size(config.history_size)?
            .history_ignore_space(true)
            .history_ignore_dups(true)?
            .auto_add_history(false)
            .completion_type(CompletionType::List)
            .edit_mode(config.get_edit_mode())
            .build();

        let editor = Editor::with_config(rl_config)?;
        let mut manager = Self {
            config,
            editor,
            keep_history: interactive,
        };
        if interactive {
            manager.load_history();
        }
        Ok(manager)
    }

    fn load_history(&mut self) {
        if let Err(err) = self.editor.load_history(&self.config.history_file) {
            warn!(
                "无法加载历史记录: {} {}",
                self.config.history_file.display(),
                err
            );
        } else {
            debug!("历史记录加载成功");
        }
    }
}

impl LineReader for ReadlineManager<'_> {
    fn read_line(&mut self, prompt: &str) -> io::Result<Input> {
        match self.editor.readline(prompt) {
            Ok(line) => Ok(Input::Line(line)),
            Err(ReadlineError::Interrupted) => Ok(Input::Interrupted),
            Err(ReadlineError::Eof) => Ok(Input::Eof),
            Err(ReadlineError::Io(err)) => Err(err),
            Err(err) => Err(io::Error::other(err)),
        }
    }

    fn add_history(&mut self, line: &str) {
        if !self.keep_history {
            return;
        }
        if let Err(err) = self.editor.add_history_entry(line) {
            warn!("无法记录历史: {}", err);
        }
    }

    fn save_history(&mut self) -> io::Result<()> {
        if !self.keep_history {
            return Ok(());
        }
        match self.editor.save_history(&self.config.history_file) {
            Ok(()) => {
                debug!("历史记录保存成功");
                Ok(())
            }
            Err(ReadlineError::Io(err)) => {
                error!("保存历史记录失败: {}", err);
                Err(err)
            }
            Err(err) => {
                error!("保存历史记录失败: {}", err);
                Err(io::Error::other(err))
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct Scripted(VecDeque<Input>);

    impl LineReader for Scripted {
        fn read_line(&mut self, _prompt: &str) -> io::Result<Input> {
            Ok(self.0.pop_front().unwrap_or(Input::Eof))
        }
    }

    #[test]
    fn heredoc_lines_follow_reader() {
        let mut reader = Scripted(VecDeque::from([
            Input::Line("body".into()),
            Input::Eof,
        ]));
        let mut lines = HeredocLines::new(&mut reader, "> ");
        assert_eq!(lines.read_heredoc_line().unwrap(), Some("body".into()));
        assert_eq!(lines.read_heredoc_line().unwrap(), None);
    }

    #[test]
    fn interrupt_aborts_heredoc() {
        let mut reader = Scripted(VecDeque::from([Input::Interrupted]));
        let mut lines = HeredocLines::new(&mut reader, "> ");
        let err = lines.read_heredoc_line().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
    }
}
