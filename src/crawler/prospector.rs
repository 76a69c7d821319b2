use super::registrar::{RegistrarClosed, RegistrarHandle};
use crate::config::ProspectorConfig;
use crate::harvester::{Harvester, HarvesterExit};
use crate::input::{FileEvent, FileId, FileState};
use futures::future::join_all;
use std::collections::HashMap;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What the prospector remembers about a path between scans.
struct TrackedFile {
    file_id: FileId,
    modified: SystemTime,
    last_iteration: u64,
    /// Where a new harvester would resume once none is running
    offset: u64,
    harvester: Option<oneshot::Receiver<HarvesterExit>>,
    /// Skipped for being older than `ignore_older`; never harvested
    ignored: bool,
}

impl TrackedFile {
    /// Whether a harvester is still working on the file. Picks up the final
    /// offset of one that has just finished.
    fn is_running(&mut self) -> bool {
        let Some(rx) = self.harvester.as_mut() else {
            return false;
        };

        match rx.try_recv() {
            Ok(exit) => {
                self.offset = exit.offset;
                self.harvester = None;
                false
            }
            Err(TryRecvError::Empty) => true,
            Err(TryRecvError::Closed) => {
                self.harvester = None;
                false
            }
        }
    }
}

/// Periodically expands one group of glob patterns and decides, per
/// matching file, whether a harvester has to be started.
pub struct Prospector {
    config: ProspectorConfig,
    registrar: RegistrarHandle,
    events: mpsc::Sender<FileEvent>,
    stop: CancellationToken,

    files: HashMap<PathBuf, TrackedFile>,
    /// Entries whose path now points at another file, kept for one scan in
    /// case the file shows up under a new name
    missing: HashMap<FileId, TrackedFile>,
    /// Harvesters no longer tied to a tracked path
    detached: Vec<oneshot::Receiver<HarvesterExit>>,
    iteration: u64,
    last_scan: SystemTime,
}

impl Prospector {
    pub fn new(
        config: ProspectorConfig,
        registrar: RegistrarHandle,
        events: mpsc::Sender<FileEvent>,
        stop: CancellationToken,
    ) -> Self {
        Self {
            config,
            registrar,
            events,
            stop,
            files: HashMap::new(),
            missing: HashMap::new(),
            detached: Vec::new(),
            iteration: 0,
            last_scan: SystemTime::now(),
        }
    }

    /// Scan once, signal `ready`, then rescan every `scan_frequency` until
    /// stopped. Returns after every harvester started here has finished.
    pub async fn run(mut self, ready: oneshot::Sender<()>) {
        info!(paths = ?self.config.paths, "Prospector started");

        self.last_scan = SystemTime::now();
        let first = self.scan().await;
        let _ = ready.send(());

        match first {
            Ok(()) => self.scan_loop().await,
            Err(e) => error!(error = %e, "Prospector cannot continue"),
        }

        self.wait_for_harvesters().await;
        info!(paths = ?self.config.paths, "Prospector stopped");
    }

    async fn scan_loop(&mut self) {
        let period = self.config.scan_frequency;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.stop.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.scan().await {
                        error!(error = %e, "Prospector cannot continue");
                        break;
                    }
                }
            }
        }
    }

    async fn scan(&mut self) -> Result<(), RegistrarClosed> {
        self.iteration += 1;
        let scan_started = SystemTime::now();

        for pattern in self.config.paths.clone() {
            let matches = match glob::glob(&pattern) {
                Ok(matches) => matches,
                Err(e) => {
                    warn!(pattern = %pattern, error = %e, "Invalid glob pattern");
                    continue;
                }
            };

            for entry in matches {
                if self.stop.is_cancelled() {
                    return Ok(());
                }

                let path = match entry {
                    Ok(path) => path,
                    Err(e) => {
                        warn!(error = %e, "Failed to read glob match");
                        continue;
                    }
                };

                // Follows symlinks
                let metadata = match std::fs::metadata(&path) {
                    Ok(metadata) => metadata,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Failed to stat file");
                        continue;
                    }
                };

                // Directories, FIFOs and devices; opening a FIFO would block
                if !metadata.is_file() {
                    debug!(path = %path.display(), "Skipping non-regular file");
                    continue;
                }

                self.check_file(path, &metadata).await?;
            }
        }

        self.prune();
        self.last_scan = scan_started;
        Ok(())
    }

    async fn check_file(
        &mut self,
        path: PathBuf,
        metadata: &Metadata,
    ) -> Result<(), RegistrarClosed> {
        let file_id = FileId::from_metadata(metadata);
        let iteration = self.iteration;

        let Some(entry) = self.files.get_mut(&path) else {
            return self.check_new_file(path, file_id, metadata).await;
        };
        entry.last_iteration = iteration;

        if entry.file_id != file_id {
            self.check_replaced_file(path, file_id, metadata);
            return Ok(());
        }

        self.resume_if_changed(&path, metadata);
        Ok(())
    }

    /// Restart a finished harvester when the file changed since it was last
    /// seen, or when it stopped short of the end. Ignored files only wait for
    /// a change.
    fn resume_if_changed(&mut self, path: &Path, metadata: &Metadata) {
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let Some(entry) = self.files.get_mut(path) else {
            return;
        };

        let running = entry.is_running();
        let changed = entry.modified != modified;
        entry.modified = modified;

        let grown = !entry.ignored && metadata.len() > entry.offset;
        if running || !(changed || grown) {
            return;
        }

        debug!(
            path = %path.display(),
            offset = entry.offset,
            "Resuming harvester for changed file"
        );
        let offset = entry.offset;
        let harvester = self.start_harvester(path, offset);
        if let Some(entry) = self.files.get_mut(path) {
            entry.harvester = harvester;
            entry.ignored = false;
        }
    }

    async fn check_new_file(
        &mut self,
        path: PathBuf,
        file_id: FileId,
        metadata: &Metadata,
    ) -> Result<(), RegistrarClosed> {
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let is_old = modified < self.last_scan
            && modified
                .elapsed()
                .map_or(false, |age| age > self.config.ignore_older);

        if is_old {
            let (offset, resuming) = self.registrar.fetch_state(&path, file_id).await?;
            if resuming {
                info!(path = %path.display(), offset, "Resuming old file");
                let harvester = self.start_harvester(&path, offset);
                self.track(path, file_id, modified, offset, harvester, false);
            } else {
                debug!(path = %path.display(), "Skipping file older than ignore_older");
                self.registrar
                    .persist(FileState::new(&path, 0, file_id))
                    .await?;
                self.track(path, file_id, modified, 0, None, true);
            }
            return Ok(());
        }

        if self.move_entry(file_id, &path) {
            info!(path = %path.display(), file_id = %file_id, "File was renamed");
            self.resume_if_changed(&path, metadata);
            return Ok(());
        }

        let (offset, resuming) = self.registrar.fetch_state(&path, file_id).await?;
        if resuming {
            info!(path = %path.display(), offset, "Resuming file from registry");
        } else {
            info!(path = %path.display(), "Start harvesting new file");
        }
        let harvester = self.start_harvester(&path, offset);
        self.track(path, file_id, modified, offset, harvester, false);
        Ok(())
    }

    /// `path` is tracked but now refers to a different file.
    fn check_replaced_file(&mut self, path: PathBuf, file_id: FileId, metadata: &Metadata) {
        if let Some(old) = self.files.remove(&path) {
            debug!(
                path = %path.display(),
                old = %old.file_id,
                new = %file_id,
                "File was replaced"
            );
            self.missing.insert(old.file_id, old);
        }

        if self.move_entry(file_id, &path) {
            info!(path = %path.display(), file_id = %file_id, "File was moved onto tracked path");
            self.resume_if_changed(&path, metadata);
            return;
        }

        info!(
            path = %path.display(),
            file_id = %file_id,
            "File was rotated, start harvesting new file"
        );
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let harvester = self.start_harvester(&path, 0);
        self.track(path, file_id, modified, 0, harvester, false);
    }

    /// Re-key the entry for `file_id` under `path`, keeping what was last
    /// seen of it so a change made along with the move is still noticed.
    fn move_entry(&mut self, file_id: FileId, path: &Path) -> bool {
        let Some(mut entry) = self.take_by_id(file_id, path) else {
            return false;
        };
        entry.last_iteration = self.iteration;
        self.files.insert(path.to_path_buf(), entry);
        true
    }

    /// Remove and return the entry for `file_id` tracked under a path other
    /// than `path`, or waiting in the missing set.
    fn take_by_id(&mut self, file_id: FileId, path: &Path) -> Option<TrackedFile> {
        let other = self
            .files
            .iter()
            .find(|(p, e)| e.file_id == file_id && p.as_path() != path)
            .map(|(p, _)| p.clone());

        match other {
            Some(other) => self.files.remove(&other),
            None => self.missing.remove(&file_id),
        }
    }

    fn track(
        &mut self,
        path: PathBuf,
        file_id: FileId,
        modified: SystemTime,
        offset: u64,
        harvester: Option<oneshot::Receiver<HarvesterExit>>,
        ignored: bool,
    ) {
        self.files.insert(
            path,
            TrackedFile {
                file_id,
                modified,
                last_iteration: self.iteration,
                offset,
                harvester,
                ignored,
            },
        );
    }

    fn start_harvester(
        &self,
        path: &Path,
        offset: u64,
    ) -> Option<oneshot::Receiver<HarvesterExit>> {
        match Harvester::new(
            path,
            &self.config.harvester,
            self.config.ignore_older,
            offset,
            self.events.clone(),
            self.stop.clone(),
        ) {
            Ok(harvester) => Some(harvester.spawn()),
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to create harvester");
                None
            }
        }
    }

    /// Forget paths not seen in this scan once nothing reads them any more.
    fn prune(&mut self) {
        let iteration = self.iteration;
        self.files.retain(|path, entry| {
            if entry.last_iteration >= iteration || entry.is_running() {
                return true;
            }
            debug!(path = %path.display(), "No longer tracking file");
            false
        });

        for (_, mut entry) in self.missing.drain() {
            if let Some(rx) = entry.harvester.take() {
                self.detached.push(rx);
            }
        }

        self.detached.retain_mut(|rx| matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    async fn wait_for_harvesters(&mut self) {
        let mut pending: Vec<_> = self
            .files
            .values_mut()
            .chain(self.missing.values_mut())
            .filter_map(|entry| entry.harvester.take())
            .collect();
        pending.append(&mut self.detached);

        if !pending.is_empty() {
            debug!(harvesters = pending.len(), "Waiting for harvesters to finish");
            join_all(pending).await;
        }
    }

    #[cfg(test)]
    fn tracked(&self, path: &Path) -> Option<(FileId, bool)> {
        self.files.get(path).map(|e| (e.file_id, e.harvester.is_some()))
    }
}
