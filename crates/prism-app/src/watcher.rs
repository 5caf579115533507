// SPDX-License-Identifier: CEPL-1.0
//! Background polling of shader files on disk. One thread, one mtime stamp
//! per file, changed paths reported over a channel. The thread exits once
//! the receiver is dropped.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, SystemTime};

use tracing::debug;

pub fn watch(paths: Vec<PathBuf>, interval: Duration) -> Receiver<PathBuf> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut stamps: Vec<Option<SystemTime>> = paths.iter().map(|p| mtime(p)).collect();
        loop {
            thread::sleep(interval);
            for (stamp, path) in stamps.iter_mut().zip(&paths) {
                let now = mtime(path);
                if newer(*stamp, now) {
                    *stamp = now;
                    debug!("changed on disk: {}", path.display());
                    if tx.send(path.clone()).is_err() {
                        return;
                    }
                }
            }
        }
    });
    rx
}

fn mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// A file counts as changed only when it currently exists with a stamp that
/// differs from the last one seen; a vanished file (mid-save rename) is not
/// reported until it reappears.
fn newer(prev: Option<SystemTime>, now: Option<SystemTime>) -> bool {
    now.is_some() && now != prev
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn change_detection_rules() {
        let t0 = SystemTime::UNIX_EPOCH;
        let t1 = t0 + Duration::from_secs(1);
        assert!(newer(None, Some(t0)), "first appearance counts");
        assert!(newer(Some(t0), Some(t1)), "bumped stamp counts");
        assert!(!newer(Some(t0), Some(t0)), "unchanged stamp does not");
        assert!(!newer(Some(t0), None), "deleted file does not");
        assert!(!newer(None, None));
    }

    #[test]
    fn rewrite_is_reported_over_the_channel() {
        let dir = std::env::temp_dir().join(format!("prism-watch-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("shader.spv");
        fs::write(&path, b"one").unwrap();

        let rx = watch(vec![path.clone()], Duration::from_millis(20));
        thread::sleep(Duration::from_millis(60));
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(b"two").unwrap();
        drop(f);

        let got = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(got, path);
        let _ = fs::remove_dir_all(&dir);
    }
}
