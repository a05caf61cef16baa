//! Ordered, non-blocking event delivery over raw filesystem notifications
//!
//! The raw `notify` callback runs on the watcher's own delivery thread and
//! must never block or do real work. It only pushes onto an unbounded
//! channel; a single consumer task drains the channel in strict arrival
//! order and dispatches to the handler. Stopping the watch enqueues a
//! sentinel so the consumer exits instead of blocking forever.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::common::Result;

/// Per-event-kind callbacks, invoked one at a time in arrival order
///
/// Default implementations ignore the event; override the kinds you need.
#[async_trait]
pub trait DirEventHandler: Send + 'static {
    async fn on_created(&mut self, _path: &Path) {}
    async fn on_removed(&mut self, _path: &Path) {}
    async fn on_modified(&mut self, _path: &Path) {}
    /// A file opened for writing was closed; its content is complete
    async fn on_close_write(&mut self, _path: &Path) {}
    /// A file was renamed into the watched directory
    async fn on_moved_to(&mut self, _path: &Path) {}
}

enum QueueItem {
    Raw(notify::Result<notify::Event>),
    Stop,
}

/// Watch over one directory, feeding a [`DirEventHandler`]
pub struct DirWatcher {
    // Held to keep raw notifications flowing until stop
    _watcher: RecommendedWatcher,
    tx: mpsc::UnboundedSender<QueueItem>,
    task: JoinHandle<()>,
}

impl DirWatcher {
    /// Start watching `dir` (non-recursive) and dispatching to `handler`
    pub fn spawn<H: DirEventHandler>(dir: &Path, handler: H) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();

        let raw_tx = tx.clone();
        let mut watcher = notify::recommended_watcher(move |res| {
            // Delivery-thread context: enqueue only
            let _ = raw_tx.send(QueueItem::Raw(res));
        })?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;

        let task = tokio::spawn(consume(rx, handler));

        Ok(Self {
            _watcher: watcher,
            tx,
            task,
        })
    }

    /// Stop the watch and wait for queued events to finish dispatching
    pub async fn stop(self) {
        let _ = self.tx.send(QueueItem::Stop);
        let _ = self.task.await;
    }
}

async fn consume<H: DirEventHandler>(mut rx: mpsc::UnboundedReceiver<QueueItem>, mut handler: H) {
    while let Some(item) = rx.recv().await {
        let event = match item {
            QueueItem::Stop => break,
            QueueItem::Raw(Ok(event)) => event,
            QueueItem::Raw(Err(e)) => {
                tracing::warn!("directory watch error: {e}");
                continue;
            }
        };

        for path in &event.paths {
            match event.kind {
                EventKind::Access(AccessKind::Close(AccessMode::Write)) => {
                    handler.on_close_write(path).await;
                }
                EventKind::Create(_) => handler.on_created(path).await,
                EventKind::Remove(_) => handler.on_removed(path).await,
                EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                    handler.on_moved_to(path).await;
                }
                EventKind::Modify(_) => handler.on_modified(path).await,
                _ => {}
            }
        }
    }
}
