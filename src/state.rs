use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crossbeam_channel::Sender;

use crate::context::{LayoutConfig, PipelineConfig};
use crate::error::SortError;
use crate::launcher::PlayerLauncher;
use crate::mover::{self, MovedPair};
use crate::prepare::{PrepareJob, PreparedImage, TargetSize};
use crate::queue::{LoadReceiver, LoadResult};
use crate::workset::{Category, FilePair, WorkingSet};

#[derive(Debug, Clone, PartialEq)]
pub enum InputIntent {
    NextItem,
    PrevItem,
    Categorize(Category),
    BatchStart,   // Batch modifier pressed
    BatchEnd,     // Batch modifier released
    Play,
    Resize(TargetSize),
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Empty,
    Ready,
    AwaitingImage,
    BatchPending,
    Closed,
}

#[derive(Debug, Clone)]
pub enum CacheEntry {
    Ready(PreparedImage),
    /// Decode failed. Permanent for the session.
    Failed(String),
}

/// What the front end should draw for the current pair.
pub enum CurrentView<'a> {
    Empty,
    Loading(&'a FilePair),
    Ready(&'a FilePair, &'a PreparedImage),
    Unavailable(&'a FilePair, &'a str),
}

#[derive(Debug, Default)]
pub struct CategorizeReport {
    /// In ascending former-index order.
    pub moved: Vec<MovedPair>,
    pub failed: Vec<(PathBuf, SortError)>,
    pub cleaned_dirs: usize,
}

/// Things the viewer talks to but does not own the lifecycle of.
pub struct Collaborators {
    pub jobs: Sender<PrepareJob>,
    pub results: LoadReceiver,
    pub launcher: Box<dyn PlayerLauncher>,
}

/// Viewer state. Lives on the UI thread; workers only see it through the
/// job channel and the load queue.
pub struct ViewerState {
    root: PathBuf,
    layout: LayoutConfig,
    pipeline: PipelineConfig,
    set: WorkingSet,
    cursor: Option<usize>,
    cache: HashMap<PathBuf, CacheEntry>,
    in_flight: HashSet<(PathBuf, TargetSize)>,
    batch_active: bool,
    pending: HashSet<PathBuf>,
    target: TargetSize,
    jobs: Sender<PrepareJob>,
    results: LoadReceiver,
    launcher: Box<dyn PlayerLauncher>,
    closed: bool,
    depth_warned: bool,
    jobs_disconnected: bool,
    moved_total: usize,

    pub status_message: Option<(String, bool)>,
    pub exit_requested: bool,
    pub selection_changed: bool,
}

impl ViewerState {
    pub fn new(
        root: PathBuf,
        pairs: Vec<FilePair>,
        layout: LayoutConfig,
        pipeline: PipelineConfig,
        target: TargetSize,
        collab: Collaborators,
    ) -> Self {
        let set = WorkingSet::new(pairs);
        let cursor = if set.is_empty() { None } else { Some(0) };
        let mut state = Self {
            root,
            layout,
            pipeline,
            set,
            cursor,
            cache: HashMap::new(),
            in_flight: HashSet::new(),
            batch_active: false,
            pending: HashSet::new(),
            target,
            jobs: collab.jobs,
            results: collab.results,
            launcher: collab.launcher,
            closed: false,
            depth_warned: false,
            jobs_disconnected: false,
            moved_total: 0,
            status_message: None,
            exit_requested: false,
            selection_changed: true,
        };
        state.prefetch();
        state
    }

    pub fn handle_input(&mut self, intent: InputIntent) {
        self.selection_changed = false;
        if self.closed {
            return;
        }

        match intent {
            InputIntent::Quit => {
                self.close();
                self.exit_requested = true;
            }
            InputIntent::NextItem => self.selection_changed = self.advance(Direction::Forward),
            InputIntent::PrevItem => self.selection_changed = self.advance(Direction::Backward),
            InputIntent::Categorize(category) => {
                if let Err(e) = self.categorize(category) {
                    self.set_status(e.to_string(), true);
                }
            }
            InputIntent::BatchStart => self.request_batch_start(),
            InputIntent::BatchEnd => self.request_batch_end(),
            InputIntent::Play => self.play(),
            InputIntent::Resize(size) => self.on_resize(size),
        }
    }

    fn set_status(&mut self, msg: String, is_error: bool) {
        self.status_message = Some((msg, is_error));
    }

    // --- Queries ---

    pub fn phase(&self) -> Phase {
        if self.closed {
            return Phase::Closed;
        }
        let Some(id) = self.current_id() else { return Phase::Empty };
        if self.batch_active {
            return Phase::BatchPending;
        }
        match self.cache.get(id) {
            Some(_) => Phase::Ready,
            None => Phase::AwaitingImage,
        }
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    pub fn pairs(&self) -> impl Iterator<Item = &FilePair> {
        self.set.iter()
    }

    pub fn current_pair(&self) -> Option<&FilePair> {
        self.cursor.and_then(|i| self.set.get(i))
    }

    fn current_id(&self) -> Option<&PathBuf> {
        self.cursor.and_then(|i| self.set.id_at(i))
    }

    pub fn cached(&self, id: &Path) -> Option<&CacheEntry> {
        self.cache.get(id)
    }

    pub fn cached_ids(&self) -> impl Iterator<Item = &PathBuf> {
        self.cache.keys()
    }

    pub fn target(&self) -> TargetSize {
        self.target
    }

    pub fn is_batch_active(&self) -> bool {
        self.batch_active
    }

    /// Indices accumulated in batch mode, ascending.
    pub fn pending_indices(&self) -> Vec<usize> {
        let mut idx: Vec<usize> = self.pending.iter().filter_map(|id| self.set.index_of(id)).collect();
        idx.sort_unstable();
        idx
    }

    /// True while results are still expected from the workers.
    pub fn has_pending_work(&self) -> bool {
        !self.in_flight.is_empty() || self.results.depth() > 0
    }

    pub fn current_view(&self) -> CurrentView<'_> {
        let Some(pair) = self.current_pair() else { return CurrentView::Empty };
        match self.cache.get(pair.id()) {
            Some(CacheEntry::Ready(img)) => CurrentView::Ready(pair, img),
            Some(CacheEntry::Failed(reason)) => CurrentView::Unavailable(pair, reason),
            None => CurrentView::Loading(pair),
        }
    }

    pub fn status_line(&self) -> String {
        let Some(cursor) = self.cursor else {
            return format!("All files processed! ({} sorted)", self.moved_total);
        };
        let name = self.current_pair().map(|p| p.video_name()).unwrap_or_default();
        let mut line = format!("Remaining: {} | [{}/{}] | Current: {}", self.set.len(), cursor + 1, self.set.len(), name);
        if self.batch_active {
            line.push_str(&format!(" | Batch: {}", self.pending.len()));
        }
        line
    }

    // --- Navigation ---

    /// Move the cursor one step. Saturates at both ends.
    pub fn advance(&mut self, direction: Direction) -> bool {
        if self.closed {
            return false;
        }
        let Some(cur) = self.cursor else { return false };
        let next = match direction {
            Direction::Forward if cur + 1 < self.set.len() => cur + 1,
            Direction::Backward if cur > 0 => cur - 1,
            _ => return false,
        };
        self.cursor = Some(next);

        if self.batch_active
            && let Some(id) = self.set.id_at(next)
        {
            self.pending.insert(id.clone());
        }
        self.prefetch();
        true
    }

    // --- Batch mode ---

    pub fn request_batch_start(&mut self) {
        if self.closed || self.batch_active {
            return;
        }
        self.batch_active = true;
        self.pending.clear();
        if let Some(id) = self.current_id().cloned() {
            self.pending.insert(id);
        }
    }

    /// Leave batch mode, discarding whatever was accumulated.
    pub fn request_batch_end(&mut self) {
        self.batch_active = false;
        self.pending.clear();
    }

    // --- Sorting ---

    /// Move the current pair (plus the accumulated batch, if any) into
    /// `category`. Per-pair failures are reported, not raised.
    pub fn categorize(&mut self, category: Category) -> Result<CategorizeReport, SortError> {
        if self.closed {
            return Err(SortError::Closed);
        }
        let cur = self.cursor.ok_or(SortError::NoCurrentPair)?;

        let mut indices = if self.batch_active { self.pending_indices() } else { Vec::new() };
        indices.push(cur);
        indices.sort_unstable();
        indices.dedup();

        let targets: Vec<(usize, FilePair)> =
            indices.iter().filter_map(|&i| self.set.get(i).map(|p| (i, p.clone()))).collect();

        let mut report = CategorizeReport::default();
        let mut moved_ids = HashSet::new();
        let mut removed_before = 0usize;

        for (idx, pair) in targets {
            match mover::move_pair(&self.root, &self.layout, &pair, category) {
                Ok(moved) => {
                    if idx < cur {
                        removed_before += 1;
                    }
                    moved_ids.insert(pair.video_path.clone());
                    report.moved.push(moved);
                }
                Err(e) => {
                    log::warn!("Move failed for {:?}: {}", pair.video_path, e);
                    report.failed.push((pair.video_path.clone(), e));
                }
            }
        }

        self.set.remove_all(&moved_ids);
        self.cache.retain(|id, _| !moved_ids.contains(id));
        self.in_flight.retain(|(id, _)| !moved_ids.contains(id));
        self.moved_total += report.moved.len();

        // Land on the first surviving pair at or after the old position.
        self.cursor = match self.set.len() {
            0 => None,
            len => Some((cur - removed_before).min(len - 1)),
        };

        self.pending.clear();
        if self.batch_active
            && let Some(id) = self.current_id().cloned()
        {
            self.pending.insert(id);
        }

        if !report.moved.is_empty() {
            report.cleaned_dirs = mover::cleanup_empty_dirs(&self.root, &self.layout);
        }

        if report.failed.is_empty() {
            self.set_status(format!("Moved {} to {}", report.moved.len(), category.label()), false);
        } else {
            let mut msg = format!("Failed to move {} of {}:", report.failed.len(), report.failed.len() + report.moved.len());
            for (path, e) in report.failed.iter().take(3) {
                let name = path.file_name().unwrap_or_default().to_string_lossy();
                msg.push_str(&format!("\n• {}: {}", name, e));
            }
            if report.failed.len() > 3 {
                msg.push_str("\n...and others.");
            }
            self.set_status(msg, true);
        }

        log::info!(
            "Categorized as {}: {} moved, {} failed, {} remaining",
            category.label(),
            report.moved.len(),
            report.failed.len(),
            self.set.len()
        );

        self.selection_changed = true;
        self.prefetch();
        Ok(report)
    }

    pub fn play(&mut self) {
        let Some(video) = self.current_pair().map(|p| p.video_path.clone()) else { return };
        match self.launcher.launch(&video) {
            Ok(()) => {
                let name = video.file_name().unwrap_or_default().to_string_lossy().to_string();
                self.set_status(format!("Playing {}", name), false);
            }
            Err(e) => {
                log::warn!("{}", e);
                self.set_status(e.to_string(), true);
            }
        }
    }

    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.batch_active = false;
        self.pending.clear();
        log::info!("Viewer closed with {} pairs left, {} sorted", self.set.len(), self.moved_total);
    }

    // --- Image pipeline ---

    /// Drain a bounded batch of finished images. Returns true if the current
    /// pair changed and needs a redraw. Never blocks.
    pub fn tick(&mut self) -> bool {
        if self.closed {
            return false;
        }

        let depth = self.results.depth();
        let high_water = self.results.capacity() / 2;
        if depth > high_water && !self.depth_warned {
            log::warn!("Load queue depth {}/{}", depth, self.results.capacity());
            self.depth_warned = true;
        } else if depth <= high_water {
            self.depth_warned = false;
        }

        let mut redraw = false;
        for result in self.results.drain(self.pipeline.drain_batch.max(1)) {
            redraw |= self.on_image_ready(result);
        }
        redraw
    }

    /// Store a worker result.
    ///
    /// Results for pairs that are gone are dropped. A result prepared for an
    /// older target box is kept only until one for the current box arrives.
    pub fn on_image_ready(&mut self, result: LoadResult) -> bool {
        self.in_flight.remove(&(result.identity.clone(), result.target));

        if self.closed {
            return false;
        }
        let Some(idx) = self.set.index_of(&result.identity) else {
            log::debug!("Dropping result for removed pair {:?}", result.identity);
            return false;
        };
        if let Some(cur) = self.cursor
            && cur.abs_diff(idx) > self.window_radius()
        {
            return false;
        }

        let fresh = result.target == self.target;
        if !fresh
            && let Some(CacheEntry::Ready(existing)) = self.cache.get(&result.identity)
            && existing.target == self.target
        {
            return false;
        }

        let entry = match result.outcome {
            Ok(img) => CacheEntry::Ready(img),
            Err(reason) => {
                log::warn!("No preview for {:?}: {}", result.identity, reason);
                CacheEntry::Failed(reason)
            }
        };

        let is_current = self.current_id() == Some(&result.identity);
        self.cache.insert(result.identity, entry);
        is_current
    }

    /// New display box. Re-requests everything in the preload window whose
    /// image was prepared for another size, current pair first.
    pub fn on_resize(&mut self, size: TargetSize) {
        if self.closed || size == self.target {
            return;
        }
        log::debug!("Target size {}x{} -> {}x{}", self.target.width, self.target.height, size.width, size.height);
        self.target = size;
        self.prefetch();
    }

    fn needs_request(&self, id: &PathBuf) -> bool {
        let cached_ok = match self.cache.get(id) {
            Some(CacheEntry::Ready(img)) => img.target == self.target,
            Some(CacheEntry::Failed(_)) => true,
            None => false,
        };
        !cached_ok && !self.in_flight.contains(&(id.clone(), self.target))
    }

    /// Request the window around the cursor and evict what fell out of it.
    fn prefetch(&mut self) {
        let Some(cur) = self.cursor else { return };
        let len = self.set.len();

        let ahead = (cur + 1..len).take(self.pipeline.preload_ahead);
        let behind = (0..cur).rev().take(self.pipeline.preload_behind);
        let order: Vec<usize> = std::iter::once(cur).chain(ahead).chain(behind).collect();

        for idx in order {
            let Some(pair) = self.set.get(idx) else { continue };
            if !self.needs_request(&pair.video_path) {
                continue;
            }
            let job = PrepareJob {
                identity: pair.video_path.clone(),
                source: pair.image_path.clone(),
                target: self.target,
            };
            let key = (job.identity.clone(), job.target);
            if self.jobs.send(job).is_err() {
                if !self.jobs_disconnected {
                    log::warn!("Prepare workers are gone, previews disabled");
                    self.jobs_disconnected = true;
                }
                return;
            }
            self.in_flight.insert(key);
        }

        self.evict_outside(cur);
    }

    /// Cache radius, widened to cover the preload window.
    fn window_radius(&self) -> usize {
        self.pipeline.cache_radius.max(self.pipeline.preload_ahead).max(self.pipeline.preload_behind)
    }

    fn evict_outside(&mut self, cur: usize) {
        let radius = self.window_radius();
        let lo = cur.saturating_sub(radius);
        let hi = (cur + radius).min(self.set.len().saturating_sub(1));
        let keep: HashSet<&PathBuf> = (lo..=hi).filter_map(|i| self.set.id_at(i)).collect();
        let before = self.cache.len();
        self.cache.retain(|id, _| keep.contains(id));
        if self.cache.len() < before {
            log::debug!("Evicted {} cached images", before - self.cache.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prepare::prepare_image;
    use crate::prepare::tests::write_png;
    use crate::queue::{LoadSender, load_queue};
    use crossbeam_channel::{Receiver, unbounded};
    use std::cell::RefCell;
    use std::fs;
    use std::rc::Rc;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    #[derive(Clone, Default)]
    struct RecordingLauncher {
        launched: Rc<RefCell<Vec<PathBuf>>>,
        fail: bool,
    }

    impl PlayerLauncher for RecordingLauncher {
        fn launch(&self, video: &Path) -> Result<(), SortError> {
            if self.fail {
                return Err(SortError::Launch { path: video.to_path_buf(), reason: "no player".into() });
            }
            self.launched.borrow_mut().push(video.to_path_buf());
            Ok(())
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        root: PathBuf,
        state: ViewerState,
        jobs: Receiver<PrepareJob>,
        results: LoadSender,
        launcher: RecordingLauncher,
    }

    impl Harness {
        /// Answer every queued job synchronously, then drain.
        fn fulfil(&mut self) {
            for job in self.jobs.try_iter().collect::<Vec<_>>() {
                self.results.send(run_job(&job)).unwrap();
            }
            while self.state.tick() || self.state.results.depth() > 0 {}
        }

        fn name_at(&self, idx: usize) -> String {
            self.state.set.get(idx).unwrap().video_name()
        }
    }

    fn run_job(job: &PrepareJob) -> LoadResult {
        LoadResult {
            identity: job.identity.clone(),
            target: job.target,
            outcome: prepare_image(&job.source, job.target),
        }
    }

    fn pipeline() -> PipelineConfig {
        PipelineConfig {
            workers: Some(1),
            queue_capacity: 64,
            drain_batch: 4,
            preload_ahead: 2,
            preload_behind: 1,
            cache_radius: 3,
            poll_interval_ms: 10,
        }
    }

    fn harness_with(n: usize, pipeline: PipelineConfig, launcher: RecordingLauncher) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let shots = root.join("customScreens_");
        fs::create_dir(&shots).unwrap();

        let mut pairs = Vec::new();
        for i in 0..n {
            let video = root.join(format!("v{}.mp4", i));
            let image = shots.join(format!("v{}.mp4.jpg", i));
            fs::write(&video, b"video").unwrap();
            // PNG bytes behind a .jpg name: the decoder sniffs the content.
            write_png(&root.join("tmp.png"), 64 + i as u32, 32);
            fs::rename(root.join("tmp.png"), &image).unwrap();
            pairs.push(FilePair::new(video, image));
        }

        let (job_tx, job_rx) = unbounded();
        let (res_tx, res_rx) = load_queue(pipeline.queue_capacity, Arc::new(AtomicBool::new(false)));
        let collab = Collaborators { jobs: job_tx, results: res_rx, launcher: Box::new(launcher.clone()) };
        let state = ViewerState::new(
            root.clone(),
            pairs,
            LayoutConfig::default(),
            pipeline,
            TargetSize::new(32, 32),
            collab,
        );
        Harness { _dir: dir, root, state, jobs: job_rx, results: res_tx, launcher }
    }

    fn harness(n: usize) -> Harness {
        harness_with(n, pipeline(), RecordingLauncher::default())
    }

    fn assert_invariants(s: &ViewerState) {
        match s.cursor() {
            None => assert!(s.is_empty()),
            Some(c) => assert!(c < s.len(), "cursor {} out of range {}", c, s.len()),
        }
        for id in s.cached_ids() {
            assert!(s.set.contains(id), "cache holds removed pair {:?}", id);
        }
    }

    #[test]
    fn starts_on_first_pair_awaiting_image() {
        let h = harness(3);
        assert_eq!(h.state.cursor(), Some(0));
        assert_eq!(h.state.phase(), Phase::AwaitingImage);
        assert!(matches!(h.state.current_view(), CurrentView::Loading(_)));

        let jobs: Vec<PrepareJob> = h.jobs.try_iter().collect();
        assert_eq!(jobs[0].identity, h.root.join("v0.mp4"), "current pair first");
        assert_eq!(jobs.len(), 3);
    }

    #[test]
    fn empty_set_has_no_cursor() {
        let h = harness(0);
        assert_eq!(h.state.cursor(), None);
        assert_eq!(h.state.phase(), Phase::Empty);
        assert!(h.state.status_line().starts_with("All files processed!"));
    }

    #[test]
    fn navigation_saturates() {
        let mut h = harness(2);
        assert!(!h.state.advance(Direction::Backward));
        assert_eq!(h.state.cursor(), Some(0));
        assert!(h.state.advance(Direction::Forward));
        assert!(!h.state.advance(Direction::Forward));
        assert_eq!(h.state.cursor(), Some(1));
    }

    #[test]
    fn ready_image_shows_and_triggers_redraw() {
        let mut h = harness(2);
        h.fulfil();
        assert_eq!(h.state.phase(), Phase::Ready);
        match h.state.current_view() {
            CurrentView::Ready(pair, img) => {
                assert_eq!(pair.video_name(), "v0.mp4");
                assert_eq!((img.width, img.height), (32, 16));
            }
            _ => panic!("expected ready image"),
        }
        assert!(!h.state.has_pending_work());
    }

    #[test]
    fn result_for_unknown_pair_is_dropped() {
        let mut h = harness(1);
        let redraw = h.state.on_image_ready(LoadResult {
            identity: PathBuf::from("/not/here.mp4"),
            target: h.state.target(),
            outcome: Err("x".into()),
        });
        assert!(!redraw);
        assert!(h.state.cached(Path::new("/not/here.mp4")).is_none());
    }

    #[test]
    fn categorize_moves_current_and_keeps_position() {
        let mut h = harness(3);
        h.fulfil();
        h.state.advance(Direction::Forward);

        let report = h.state.categorize(Category::A).unwrap();
        assert_eq!(report.moved.len(), 1);
        assert!(report.failed.is_empty());
        assert!(h.root.join("keep/A/v1.mp4").exists());
        assert!(h.root.join("keep/A/v1.mp4.jpg").exists());

        assert_eq!(h.state.len(), 2);
        assert_eq!(h.state.cursor(), Some(1));
        assert_eq!(h.name_at(1), "v2.mp4");
        assert!(h.state.cached(&h.root.join("v1.mp4")).is_none());
        assert_invariants(&h.state);
    }

    #[test]
    fn categorize_last_pair_clamps_cursor() {
        let mut h = harness(2);
        h.state.advance(Direction::Forward);
        h.state.categorize(Category::R).unwrap();
        assert_eq!(h.state.cursor(), Some(0));
        h.state.categorize(Category::R).unwrap();
        assert_eq!(h.state.cursor(), None);
        assert_eq!(h.state.phase(), Phase::Empty);
        assert!(matches!(h.state.categorize(Category::R), Err(SortError::NoCurrentPair)));
        // Nothing left in the sheets folder, so it was cleaned up.
        assert!(!h.root.join("customScreens_").exists());
        assert!(h.root.join("keep/R").exists());
    }

    #[test]
    fn batch_moves_accumulated_pairs_in_order() {
        let mut h = harness(4);
        h.fulfil();
        h.state.request_batch_start();
        assert_eq!(h.state.phase(), Phase::BatchPending);
        h.state.advance(Direction::Forward);
        h.state.advance(Direction::Forward);
        assert_eq!(h.state.pending_indices(), vec![0, 1, 2]);
        assert_eq!(h.state.cursor(), Some(2));

        let report = h.state.categorize(Category::F).unwrap();
        let names: Vec<String> = report.moved.iter().map(|m| m.pair.video_name()).collect();
        assert_eq!(names, ["v0.mp4", "v1.mp4", "v2.mp4"]);
        assert!(report.moved.iter().all(|m| m.pair.category == Some(Category::F)));

        assert_eq!(h.state.len(), 1);
        assert_eq!(h.state.cursor(), Some(0));
        assert_eq!(h.name_at(0), "v3.mp4");
        assert_eq!(h.state.pending_indices(), vec![0], "accumulation restarts at the cursor");
        assert_invariants(&h.state);
    }

    #[test]
    fn batch_covering_everything_empties_the_set() {
        let mut h = harness(3);
        h.state.request_batch_start();
        h.state.advance(Direction::Forward);
        h.state.advance(Direction::Forward);
        h.state.categorize(Category::A).unwrap();
        assert_eq!(h.state.cursor(), None);
        assert_eq!(h.state.len(), 0);
    }

    #[test]
    fn batch_release_discards_without_side_effects() {
        let mut h = harness(3);
        h.state.request_batch_start();
        h.state.advance(Direction::Forward);
        h.state.request_batch_end();
        assert!(h.state.pending_indices().is_empty());

        let report = h.state.categorize(Category::A).unwrap();
        assert_eq!(report.moved.len(), 1);
        assert!(h.root.join("v0.mp4").exists(), "accumulated pair untouched");
    }

    #[test]
    fn conflict_leaves_pair_in_place() {
        let mut h = harness(2);
        h.fulfil();
        let dest = h.root.join("keep/A");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("v0.mp4"), b"other").unwrap();

        let report = h.state.categorize(Category::A).unwrap();
        assert!(report.moved.is_empty());
        assert!(matches!(report.failed[0].1, SortError::MoveConflict(_)));
        assert_eq!(h.state.len(), 2);
        assert_eq!(h.state.cursor(), Some(0));
        assert!(h.state.cached(&h.root.join("v0.mp4")).is_some(), "cache kept for failed pair");
        assert!(h.root.join("v0.mp4").exists());
        assert!(h.root.join("customScreens_/v0.mp4.jpg").exists());
        assert!(matches!(h.state.status_message, Some((_, true))));
    }

    #[test]
    fn partial_batch_failure_keeps_failed_pair() {
        let mut h = harness(4);
        let dest = h.root.join("keep/R");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("v1.mp4.jpg"), b"other").unwrap();

        h.state.request_batch_start();
        h.state.advance(Direction::Forward);
        h.state.advance(Direction::Forward);
        let report = h.state.categorize(Category::R).unwrap();
        assert_eq!(report.moved.len(), 2);
        assert_eq!(report.failed.len(), 1);

        assert_eq!(h.state.len(), 2);
        assert_eq!(h.name_at(0), "v1.mp4");
        assert_eq!(h.state.cursor(), Some(1));
        assert_eq!(h.name_at(1), "v3.mp4");
        assert_invariants(&h.state);
    }

    #[test]
    fn late_result_after_move_is_discarded() {
        let mut h = harness(2);
        let pending: Vec<PrepareJob> = h.jobs.try_iter().collect();
        h.state.categorize(Category::A).unwrap();

        for job in &pending {
            h.results.send(run_job(job)).unwrap();
        }
        while h.state.tick() || h.state.results.depth() > 0 {}
        assert!(h.state.cached(&h.root.join("v0.mp4")).is_none());
        assert_invariants(&h.state);
    }

    #[test]
    fn decode_failure_is_unavailable_but_sortable() {
        let mut h = harness(2);
        fs::write(h.root.join("customScreens_/v0.mp4.jpg"), b"broken").unwrap();
        h.fulfil();

        assert!(matches!(h.state.current_view(), CurrentView::Unavailable(_, _)));
        assert_eq!(h.state.phase(), Phase::Ready);

        // Not re-requested on resize.
        h.state.on_resize(TargetSize::new(16, 16));
        let jobs: Vec<PrepareJob> = h.jobs.try_iter().collect();
        assert!(jobs.iter().all(|j| j.identity != h.root.join("v0.mp4")));

        h.state.categorize(Category::F).unwrap();
        assert!(h.root.join("keep/F/v0.mp4").exists());
    }

    #[test]
    fn resize_reissues_and_prefers_current_size() {
        let mut h = harness(2);
        h.fulfil();
        let id = h.root.join("v0.mp4");
        let old = h.state.target();

        let half = TargetSize::new(old.width / 2, old.height);
        h.state.handle_input(InputIntent::Resize(half));
        let jobs: Vec<PrepareJob> = h.jobs.try_iter().collect();
        assert_eq!(jobs[0].identity, id, "current pair re-prepared first");
        assert!(jobs.iter().all(|j| j.target == half));

        // Stale image stays on screen until the fresh one lands.
        assert!(matches!(h.state.current_view(), CurrentView::Ready(_, img) if img.target == old));

        let fresh = run_job(&jobs[0]);
        assert!(h.state.on_image_ready(fresh));
        let (w, h_px) = match h.state.cached(&id) {
            Some(CacheEntry::Ready(img)) => (img.width, img.height),
            _ => panic!("expected image"),
        };
        assert_eq!((w, h_px), (16, 8));

        // A straggler at the old size must not replace it.
        let stale = run_job(&PrepareJob { identity: id.clone(), source: jobs[0].source.clone(), target: old });
        assert!(!h.state.on_image_ready(stale));
        assert!(matches!(h.state.cached(&id), Some(CacheEntry::Ready(img)) if img.target == half));
    }

    #[test]
    fn same_size_resize_is_noop() {
        let mut h = harness(1);
        h.fulfil();
        h.state.on_resize(h.state.target());
        assert_eq!(h.jobs.try_iter().count(), 0);
    }

    #[test]
    fn cache_is_bounded_to_window() {
        let mut p = pipeline();
        p.preload_ahead = 1;
        p.preload_behind = 0;
        p.cache_radius = 1;
        let mut h = harness_with(6, p, RecordingLauncher::default());
        for _ in 0..5 {
            h.fulfil();
            h.state.advance(Direction::Forward);
        }
        h.fulfil();
        assert!(h.state.cached_ids().count() <= 3);
        assert!(h.state.cached(&h.root.join("v0.mp4")).is_none());
        assert!(h.state.cached(&h.root.join("v5.mp4")).is_some());
    }

    fn snapshot(state: &ViewerState) -> Vec<(String, u32, u32, Arc<[u8]>)> {
        state
            .pairs()
            .filter_map(|p| match state.cached(p.id()) {
                Some(CacheEntry::Ready(img)) => Some((p.video_name(), img.width, img.height, img.pixels.clone())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn out_of_order_results_converge() {
        let mut forward = harness(3);
        let mut backward = harness(3);

        let results: Vec<LoadResult> = forward.jobs.try_iter().map(|j| run_job(&j)).collect();
        for r in results {
            forward.state.on_image_ready(r);
        }
        let results: Vec<LoadResult> = backward.jobs.try_iter().map(|j| run_job(&j)).collect();
        for r in results.into_iter().rev() {
            backward.state.on_image_ready(r);
        }

        let a = snapshot(&forward.state);
        assert_eq!(a.len(), 3);
        assert_eq!(a, snapshot(&backward.state));
    }

    #[test]
    fn two_workers_either_order_same_cache() {
        use crate::prepare::PreparePool;
        use std::time::{Duration, Instant};

        let collect = |reverse: bool| {
            let mut h = harness(2);
            let mut jobs: Vec<PrepareJob> = h.jobs.try_iter().collect();
            if reverse {
                jobs.reverse();
            }

            let quit = Arc::new(AtomicBool::new(false));
            let mut pool = PreparePool::start(2, h.results.clone(), quit).unwrap();
            let tx = pool.sender();
            for job in jobs {
                tx.send(job).unwrap();
            }

            let deadline = Instant::now() + Duration::from_secs(10);
            while h.state.cached_ids().count() < 2 && Instant::now() < deadline {
                h.state.tick();
                std::thread::sleep(Duration::from_millis(5));
            }
            pool.shutdown();
            assert_invariants(&h.state);
            snapshot(&h.state)
        };

        let first = collect(false);
        assert_eq!(first.len(), 2);
        assert_eq!(first, collect(true));
    }

    #[test]
    fn random_walk_keeps_invariants() {
        let mut h = harness(8);
        let dest = h.root.join("keep/A");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("v5.mp4"), b"blocker").unwrap();

        let mut moved = 0usize;
        let initial = h.state.len();
        let script = "nnAbnnpAenApnAAnbnnAAAeAAAA";
        for step in script.chars() {
            match step {
                'n' => { h.state.handle_input(InputIntent::NextItem); }
                'p' => { h.state.handle_input(InputIntent::PrevItem); }
                'b' => { h.state.handle_input(InputIntent::BatchStart); }
                'e' => { h.state.handle_input(InputIntent::BatchEnd); }
                c => {
                    let cat = Category::from_char(c).unwrap();
                    if let Ok(r) = h.state.categorize(cat) {
                        moved += r.moved.len();
                    }
                }
            }
            if step == 'n' || step == 'p' {
                h.fulfil();
            }
            assert_invariants(&h.state);
            assert_eq!(h.state.len(), initial - moved);
        }
        assert!(h.state.pairs().any(|p| p.video_name() == "v5.mp4"), "blocked pair must remain");
    }

    #[test]
    fn play_hands_current_video_to_launcher() {
        let mut h = harness(2);
        h.state.handle_input(InputIntent::NextItem);
        h.state.handle_input(InputIntent::Play);
        assert_eq!(h.launcher.launched.borrow().as_slice(), [h.root.join("v1.mp4")]);
        assert!(matches!(h.state.status_message, Some((_, false))));
    }

    #[test]
    fn play_failure_is_reported_not_fatal() {
        let launcher = RecordingLauncher { fail: true, ..Default::default() };
        let mut h = harness_with(1, pipeline(), launcher);
        h.state.handle_input(InputIntent::Play);
        assert!(matches!(h.state.status_message, Some((_, true))));
        assert_eq!(h.state.phase(), Phase::AwaitingImage);
    }

    #[test]
    fn closed_viewer_refuses_work() {
        let mut h = harness(2);
        h.state.handle_input(InputIntent::Quit);
        assert!(h.state.exit_requested);
        assert_eq!(h.state.phase(), Phase::Closed);
        assert!(matches!(h.state.categorize(Category::A), Err(SortError::Closed)));
        assert!(!h.state.advance(Direction::Forward));
        assert!(h.root.join("v0.mp4").exists());
    }
}
