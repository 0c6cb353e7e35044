use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;

use log::{debug, warn};
use nix::unistd::dup2;

use crate::shell::error::RedirectionError;
use crate::shell::parser::ast::Redirection;

fn open_target(redirection: &Redirection) -> io::Result<File> {
    match redirection {
        Redirection::Input(path) => File::open(path),
        Redirection::Output(path) => OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o644)
            .open(path),
        Redirection::Append(path) => OpenOptions::new()
            .append(true)
            .create(true)
            .mode(0o644)
            .open(path),
        Redirection::HereDoc { body, .. } => {
            let mut file = tempfile::tempfile()?;
            file.write_all(body.as_bytes())?;
            file.seek(SeekFrom::Start(0))?;
            Ok(file)
        }
    }
}

/// Binds each redirection onto its standard stream, left to right, so
/// the last one for a stream wins. Stops at the first failure; streams
/// bound before it stay bound.
pub fn apply_redirections(redirections: &[Redirection]) -> Result<(), RedirectionError> {
    for redirection in redirections {
        let file = open_target(redirection)
            .map_err(|e| RedirectionError::new(redirection.target(), e))?;
        dup2(file.as_raw_fd(), redirection.stream())
            .map_err(|e| RedirectionError::new(redirection.target(), e))?;
        debug!("重定向 {} -> fd {}", redirection, redirection.stream());
    }
    Ok(())
}

/// Copies of the standard streams a builtin is about to have redirected.
/// Dropping it puts the originals back.
pub struct SavedStreams {
    saved: Vec<(RawFd, OwnedFd)>,
}

impl SavedStreams {
    pub fn save(redirections: &[Redirection]) -> io::Result<Self> {
        let mut saved: Vec<(RawFd, OwnedFd)> = Vec::new();
        for stream in redirections.iter().map(Redirection::stream) {
            if saved.iter().any(|(s, _)| *s == stream) {
                continue;
            }
            // The duplicate is close-on-exec and numbered above 2.
            let copy = unsafe { BorrowedFd::borrow_raw(stream) }.try_clone_to_owned()?;
            saved.push((stream, copy));
        }
        Ok(Self { saved })
    }
}

impl Drop for SavedStreams {
    fn drop(&mut self) {
        let _ = io::stdout().flush();
        for (stream, copy) in self.saved.drain(..) {
            if let Err(e) = dup2(copy.as_raw_fd(), stream) {
                warn!("cannot restore fd {}: {}", stream, e);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::shell::test_support;
    use std::fs;
    use std::io::Read;

    fn read_stdin_copy() -> String {
        let copy = unsafe { BorrowedFd::borrow_raw(libc::STDIN_FILENO) }
            .try_clone_to_owned()
            .unwrap();
        let mut text = String::new();
        File::from(copy).read_to_string(&mut text).unwrap();
        text
    }

    #[test]
    fn heredoc_body_becomes_stdin_and_is_restored() {
        let _lock = test_support::lock();
        let before = fs::read_link("/proc/self/fd/0").ok();
        let redirections = vec![Redirection::HereDoc {
            delimiter: "EOF".into(),
            body: "one\ntwo\n".into(),
        }];
        {
            let _saved = SavedStreams::save(&redirections).unwrap();
            apply_redirections(&redirections).unwrap();
            assert_eq!(read_stdin_copy(), "one\ntwo\n");
        }
        assert_eq!(fs::read_link("/proc/self/fd/0").ok(), before);
    }

    #[test]
    fn later_input_redirection_wins() {
        let _lock = test_support::lock();
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first");
        let second = dir.path().join("second");
        fs::write(&first, "first\n").unwrap();
        fs::write(&second, "second\n").unwrap();

        let redirections = vec![
            Redirection::Input(first.display().to_string()),
            Redirection::Input(second.display().to_string()),
        ];
        let _saved = SavedStreams::save(&redirections).unwrap();
        apply_redirections(&redirections).unwrap();
        assert_eq!(read_stdin_copy(), "second\n");
    }

    #[test]
    fn missing_input_reports_target() {
        let _lock = test_support::lock();
        let redirections = vec![Redirection::Input("/no/such/mish/input".into())];
        let _saved = SavedStreams::save(&redirections).unwrap();
        let err = apply_redirections(&redirections).unwrap_err();
        assert_eq!(err.target, "/no/such/mish/input");
        assert_eq!(err.source.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn save_keeps_one_copy_per_stream() {
        let _lock = test_support::lock();
        let saved = SavedStreams::save(&[
            Redirection::Input("a".into()),
            Redirection::HereDoc {
                delimiter: "E".into(),
                body: String::new(),
            },
        ])
        .unwrap();
        assert_eq!(saved.saved.len(), 1);
        assert!(saved.saved[0].1.as_raw_fd() > 2);
    }
}
