use std::borrow::Cow;
use std::env;
use std::fs::read_dir;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use log::error;

pub fn basename(path: &str) -> Cow<'_, str> {
    if path == "/" {
        return path.into();
    }
    let mut pieces = path.trim_end_matches('/').rsplit('/');
    match pieces.next() {
        Some(p) => p.into(),
        None => path.into(),
    }
}

/// Searches `$PATH` for `filename`; with `exec`, only files with an
/// execute bit count.
pub fn find_file_in_path(filename: &str, exec: bool) -> Option<PathBuf> {
    if filename.contains('/') {
        return None;
    }
    let env_path = match env::var("PATH") {
        Ok(x) => x,
        Err(e) => {
            error!("mish: error with env PATH: {:?}", e);
            return None;
        }
    };
    for p in env_path.split(':').filter(|p| !p.is_empty()) {
        let list = match read_dir(p) {
            Ok(list) => list,
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    error!("mish: fs read_dir error: {}: {}", p, e);
                }
                continue;
            }
        };
        for entry in list.flatten() {
            if entry.file_name().to_str() != Some(filename) {
                continue;
            }
            if exec {
                let metadata = match entry.metadata() {
                    Ok(x) => x,
                    Err(e) => {
                        error!("mish: metadata error: {:?}", e);
                        continue;
                    }
                };
                if metadata.is_dir() || metadata.permissions().mode() & 0o111 == 0 {
                    // not binary
                    continue;
                }
            }
            return Some(entry.path());
        }
    }
    None
}

pub fn current_dir() -> String {
    match env::current_dir() {
        Ok(dir) => dir.to_string_lossy().into_owned(),
        Err(e) => {
            error!("mish: PROMPT: env current_dir error: {}", e);
            String::new()
        }
    }
}
