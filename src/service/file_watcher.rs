use std::path::Path;
use std::sync::mpsc::channel;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use notify::{watcher, DebouncedEvent, RecursiveMode, Watcher};

use crate::ban::{self, BanList};
use crate::config::Config;

/// File watcher debounce time.
const WATCH_DEBOUNCE: Duration = Duration::from_secs(2);

/// Service to reload the ban list when its file changes.
pub fn service(config: Arc<Config>, bans: Arc<RwLock<BanList>>) {
    let dir = config.bot.data_dir.clone();
    if !dir.is_dir() {
        warn!(target: "warhost", "Data directory doesn't exist, can't watch ban list changes");
        return;
    }

    // Keep watching
    while {
        // Load once up front
        reload_bans(&bans, &dir.join(ban::FILE));

        // Watch for changes, update accordingly
        watch_dir(&bans, &dir)
    } {}
}

/// Watch the data directory.
///
/// Returns `true` if we should watch again.
#[must_use]
fn watch_dir(bans: &Arc<RwLock<BanList>>, dir: &Path) -> bool {
    if !dir.is_dir() {
        error!(target: "warhost", "Data directory at {} is gone, not watching changes", dir.display());
        return false;
    }

    // Create watcher for directory
    let (tx, rx) = channel();
    let mut watcher = match watcher(tx, WATCH_DEBOUNCE) {
        Ok(watcher) => watcher,
        Err(err) => {
            error!(target: "warhost", "Failed to create file watcher: {}", err);
            return false;
        }
    };
    if let Err(err) = watcher.watch(dir, RecursiveMode::NonRecursive) {
        error!(target: "warhost", "An error occurred while watching data files: {}", err);
        return true;
    }

    // Handle change events
    loop {
        match rx.recv() {
            Ok(
                DebouncedEvent::Create(ref path)
                | DebouncedEvent::Write(ref path)
                | DebouncedEvent::Remove(ref path),
            ) => {
                if path.ends_with(ban::FILE) {
                    reload_bans(bans, path);
                }
            }
            Ok(DebouncedEvent::Rename(ref before, ref after)) => {
                if before.ends_with(ban::FILE) || after.ends_with(ban::FILE) {
                    reload_bans(bans, &dir.join(ban::FILE));
                }
            }
            // Write/remove notices are followed by real events
            Ok(DebouncedEvent::NoticeWrite(_) | DebouncedEvent::NoticeRemove(_)) => {}
            Ok(DebouncedEvent::Chmod(_)) => {}
            Ok(DebouncedEvent::Rescan) => {
                debug!(target: "warhost", "Rescanning data directory after watcher problem");
                return true;
            }
            Ok(DebouncedEvent::Error(err, _)) => {
                error!(target: "warhost", "Error while watching data directory: {}", err);
                return true;
            }
            Err(_) => return false,
        }
    }
}

/// Reload the ban list from file.
fn reload_bans(bans: &Arc<RwLock<BanList>>, path: &Path) {
    trace!(target: "warhost", "Reloading ban list...");

    // A missing file clears the list
    if !path.is_file() {
        debug!(target: "warhost", "No ban list, {} does not exist", ban::FILE);
        *bans.write().unwrap() = BanList::default();
        return;
    }

    match ban::load(path) {
        Ok(list) => *bans.write().unwrap() = list,
        Err(err) => {
            debug!(target: "warhost", "Failed to load ban list from {}, ignoring: {}", ban::FILE, err);
        }
    }
}
