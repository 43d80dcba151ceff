use std::thread::{self, JoinHandle};

use anyhow::anyhow;
use crossbeam_channel::{Receiver, Sender, unbounded};
use formats::dat::Catalog;
use formats::spr::SpriteAtlas;
use optimizer::{ApplyOptions, ApplyReport, OptimizeError, Progress, ScanReport};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Progress(u8),
    Log(String),
}

struct ProgressProxy {
    tx: Sender<WorkerEvent>,
}

impl Progress for ProgressProxy {
    fn progress(&self, percent: u8) {
        let _ = self.tx.send(WorkerEvent::Progress(percent));
    }

    fn log(&self, line: String) {
        let _ = self.tx.send(WorkerEvent::Log(line));
    }
}

/// A background optimizer phase. Events stop once the phase returns.
pub struct Job<T> {
    rx: Receiver<WorkerEvent>,
    handle: JoinHandle<T>,
}

impl<T> Job<T> {
    /// Forwards every event to `on_event` until the worker finishes, then
    /// hands back its result.
    pub fn wait(self, mut on_event: impl FnMut(WorkerEvent)) -> anyhow::Result<T> {
        for event in self.rx.iter() {
            debug!(?event, "worker event");
            on_event(event);
        }
        self.handle
            .join()
            .map_err(|_| anyhow!("optimizer worker panicked"))
    }
}

fn spawn<T: Send + 'static>(work: impl FnOnce(&dyn Progress) -> T + Send + 'static) -> Job<T> {
    let (tx, rx) = unbounded();
    let handle = thread::spawn(move || {
        let proxy = ProgressProxy { tx };
        work(&proxy)
    });
    Job { rx, handle }
}

/// Scans `atlas` off the calling thread. The atlas comes back with the
/// report.
pub fn spawn_scan(atlas: SpriteAtlas) -> Job<(SpriteAtlas, ScanReport)> {
    spawn(move |progress| {
        let report = optimizer::scan(&atlas, progress);
        (atlas, report)
    })
}

pub struct ApplyOutcome {
    pub catalog: Catalog,
    pub atlas: SpriteAtlas,
    pub result: Result<ApplyReport, OptimizeError>,
}

/// Applies `report` off the calling thread. Both files come back whether
/// or not the apply succeeded.
pub fn spawn_apply(
    mut catalog: Catalog,
    mut atlas: SpriteAtlas,
    report: ScanReport,
    options: ApplyOptions,
) -> Job<ApplyOutcome> {
    spawn(move |progress| {
        let result = optimizer::apply(&mut catalog, &mut atlas, &report, options, progress);
        ApplyOutcome {
            catalog,
            atlas,
            result,
        }
    })
}
