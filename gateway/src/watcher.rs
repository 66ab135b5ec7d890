//! File Watcher (C8): recursively walks a descriptor directory at startup,
//! loads every file found, then keeps the [`Registry`] current as files are
//! added, changed, or removed, per §4.8.

use std::path::{Path, PathBuf};

use notify::{
    event::{CreateKind, ModifyKind, RemoveKind, RenameMode},
    Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::registry::Registry;
use crate::Result;

/// Watch runs the file watcher to completion: an initial recursive scan
/// that loads every descriptor under `root`, then an event loop that keeps
/// `registry` current until `shutdown` is cancelled. Runs as a single
/// background task; per-file errors are logged and swallowed so one bad
/// descriptor never brings the watcher down.
#[instrument(skip_all, fields(root = %root.as_ref().display()))]
pub async fn watch<P: AsRef<Path>>(
    root: P,
    registry: &Registry,
    opts: &kube_connect::Options,
    shutdown: CancellationToken,
) -> Result<()> {
    let root = root.as_ref().to_path_buf();
    initial_scan(&root, registry, opts).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            // The notify callback runs on its own thread; hand events off
            // to the async loop rather than doing registry work here.
            if let Err(e) = tx.send(res) {
                warn!(error = %e, "file watcher event channel closed");
            }
        },
        Config::default(),
    )?;
    watcher.watch(&root, RecursiveMode::Recursive)?;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("file watcher shutting down");
                return Ok(());
            }
            event = rx.recv() => {
                match event {
                    Some(Ok(event)) => handle_event(event, registry, opts).await,
                    Some(Err(e)) => warn!(error = %e, "file watcher reported an error"),
                    None => {
                        error!("file watcher event channel closed unexpectedly");
                        return Ok(());
                    }
                }
            }
        }
    }
}

async fn initial_scan(root: &Path, registry: &Registry, opts: &kube_connect::Options) {
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "could not read descriptor directory");
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if is_descriptor_file(&path) {
                load_or_warn(&path, registry, opts).await;
            }
        }
    }
}

async fn handle_event(event: Event, registry: &Registry, opts: &kube_connect::Options) {
    match event.kind {
        EventKind::Create(CreateKind::Folder) => {
            // `notify`'s recursive mode already covers new subdirectories
            // on platforms with native recursive watch support; nothing
            // further to register here.
        }
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
            for path in event.paths {
                if is_descriptor_file(&path) {
                    update_or_load(&path, registry, opts).await;
                }
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            for path in event.paths {
                if is_descriptor_file(&path) {
                    update_or_load(&path, registry, opts).await;
                }
            }
        }
        EventKind::Remove(RemoveKind::File) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            for path in event.paths {
                registry.remove(&descriptor::cluster_name(&path));
            }
        }
        other => {
            warn!(kind = ?other, "ignoring unhandled filesystem event kind");
        }
    }
}

async fn update_or_load(path: &PathBuf, registry: &Registry, opts: &kube_connect::Options) {
    // `Registry::update` already implements remove-then-load, which is a
    // no-op remove for a path that was never registered, so Update and
    // Load collapse to one call here.
    if let Err(e) = registry.update(path, opts).await {
        warn!(path = %path.display(), error = %e, "reload failed");
    }
}

async fn load_or_warn(path: &Path, registry: &Registry, opts: &kube_connect::Options) {
    if let Err(e) = registry.load(path, opts).await {
        warn!(path = %path.display(), error = %e, "failed to load descriptor");
    }
}

fn is_descriptor_file(path: &Path) -> bool {
    path.is_file() && path.extension().is_some_and(|ext| ext == "json")
}
