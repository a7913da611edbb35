//! 预取队列
//!
//! 每次导航都会推进代数、清空旧任务，再把当前位置附近（按过滤条件）的条目入队。
//! 工作线程按优先级取任务，过期任务直接丢弃。

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use super::preview_cache::{PreviewCache, WarmOutcome};
use crate::events::{
    EventSinkExt, PreviewFailedPayload, PreviewReadyPayload, SharedEventSink, PREVIEW_FAILED,
    PREVIEW_READY,
};
use crate::jobs::{Generation, GenerationClock, GenerationToken};
use crate::models::{CacheKey, Catalog, Direction, FilterState, PrefetchSettings};

/// 预取配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefetchOptions {
    /// 当前位置前后各预取多少个（过滤后的）条目
    pub radius: usize,
    pub workers: usize,
}

impl Default for PrefetchOptions {
    fn default() -> Self {
        Self { radius: 3, workers: 2 }
    }
}

impl From<&PrefetchSettings> for PrefetchOptions {
    fn from(settings: &PrefetchSettings) -> Self {
        Self {
            radius: settings.radius,
            workers: settings.workers,
        }
    }
}

#[derive(Debug, Clone)]
struct PrefetchTask {
    key: CacheKey,
    token: GenerationToken,
    /// 数字越小越先处理：已缓存的排最后，其余按距离
    rank: usize,
    seq: u64,
}

impl PartialEq for PrefetchTask {
    fn eq(&self, other: &Self) -> bool {
        self.rank == other.rank && self.seq == other.seq
    }
}

impl Eq for PrefetchTask {}

impl PartialOrd for PrefetchTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PrefetchTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap 是大顶堆，rank 小、序号小的先出
        self.rank.cmp(&other.rank).then(self.seq.cmp(&other.seq)).reverse()
    }
}

struct Queue {
    heap: BinaryHeap<PrefetchTask>,
    seq: u64,
    stopped: bool,
}

/// 预取服务（多工作线程）
pub struct Prefetcher {
    cache: PreviewCache,
    options: PrefetchOptions,
    clock: GenerationClock,
    queue: Arc<(Mutex<Queue>, Condvar)>,
    workers: Vec<JoinHandle<()>>,
}

impl Prefetcher {
    pub fn new(cache: PreviewCache, options: PrefetchOptions, events: SharedEventSink) -> Self {
        let count = options.workers.clamp(1, 8);
        let queue = Arc::new((
            Mutex::new(Queue {
                heap: BinaryHeap::new(),
                seq: 0,
                stopped: false,
            }),
            Condvar::new(),
        ));

        let workers = (0..count)
            .filter_map(|id| {
                let queue = Arc::clone(&queue);
                let cache = cache.clone();
                let events = Arc::clone(&events);
                thread::Builder::new()
                    .name(format!("prefetch-{}", id))
                    .spawn(move || run_worker(id, queue, cache, events))
                    .map_err(|e| tracing::error!("无法启动预取线程 {}: {}", id, e))
                    .ok()
            })
            .collect();

        Self {
            cache,
            options,
            clock: GenerationClock::new(),
            queue,
            workers,
        }
    }

    pub fn options(&self) -> PrefetchOptions {
        self.options
    }

    pub fn generation(&self) -> Generation {
        self.clock.current()
    }

    /// 导航后调用：作废旧任务并按新位置重新排队
    pub fn on_navigate(&self, catalog: &Catalog, current: usize, filter: FilterState) -> Generation {
        let token = self.clock.advance();
        let window = prefetch_window(catalog, current, filter, self.options.radius);

        let (lock, cvar) = &*self.queue;
        let mut queue = lock.lock().unwrap_or_else(|e| e.into_inner());
        queue.heap.clear();
        if queue.stopped {
            return token.generation();
        }

        for (distance, index) in window.into_iter().enumerate() {
            let Some(entry) = catalog.get(index) else { continue };
            let key = entry.cache_key();
            let rank = if self.cache.contains(&key) {
                distance + self.options.radius * 2
            } else {
                distance
            };
            queue.seq += 1;
            let seq = queue.seq;
            queue.heap.push(PrefetchTask {
                key,
                token: token.clone(),
                rank,
                seq,
            });
        }
        tracing::debug!(
            "预取第 {} 代: 位置 {}, {} 个任务",
            token.generation(),
            current,
            queue.heap.len()
        );
        cvar.notify_all();
        token.generation()
    }

    /// 队列中尚未开始的任务数
    pub fn pending(&self) -> usize {
        let (lock, _) = &*self.queue;
        lock.lock().unwrap_or_else(|e| e.into_inner()).heap.len()
    }

    /// 停止所有工作线程（正在进行的提取会先完成）
    pub fn stop(&mut self) {
        {
            let (lock, cvar) = &*self.queue;
            let mut queue = lock.lock().unwrap_or_else(|e| e.into_inner());
            queue.stopped = true;
            queue.heap.clear();
            cvar.notify_all();
        }
        // 让正在等待前台空闲的任务立即返回
        self.clock.advance();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("预取线程异常退出");
            }
        }
    }
}

impl Drop for Prefetcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// 以 `current` 为中心、按 +1, -1, +2, -2... 的顺序列出通过过滤的邻居
pub fn prefetch_window(catalog: &Catalog, current: usize, filter: FilterState, radius: usize) -> Vec<usize> {
    let min = filter.min_rating;
    let mut forward = Vec::with_capacity(radius);
    let mut from = current.saturating_add(1);
    while forward.len() < radius {
        match catalog.nearest_filtered(from, Direction::Forward, min) {
            Some(i) => {
                forward.push(i);
                from = i + 1;
            }
            None => break,
        }
    }

    let mut backward = Vec::with_capacity(radius);
    let mut from = current;
    while backward.len() < radius && from > 0 {
        match catalog.nearest_filtered(from - 1, Direction::Backward, min) {
            Some(i) => {
                backward.push(i);
                from = i;
            }
            None => break,
        }
    }

    let mut window = Vec::with_capacity(forward.len() + backward.len());
    for step in 0..radius {
        window.extend(forward.get(step).copied());
        window.extend(backward.get(step).copied());
    }
    window
}

fn run_worker(
    id: usize,
    queue: Arc<(Mutex<Queue>, Condvar)>,
    cache: PreviewCache,
    events: SharedEventSink,
) {
    tracing::debug!("预取线程 {} 启动", id);
    loop {
        let task = {
            let (lock, cvar) = &*queue;
            let mut state = lock.lock().unwrap_or_else(|e| e.into_inner());
            while state.heap.is_empty() && !state.stopped {
                state = cvar.wait(state).unwrap_or_else(|e| e.into_inner());
            }
            if state.stopped {
                tracing::debug!("预取线程 {} 退出", id);
                return;
            }
            state.heap.pop()
        };
        let Some(task) = task else { continue };

        if task.token.is_stale() {
            tracing::debug!("跳过过期预取: {:?}", task.key.path);
            continue;
        }

        let generation = task.token.generation();
        match cache.warm(&task.key, &task.token) {
            WarmOutcome::AlreadyCached | WarmOutcome::Stale => {}
            WarmOutcome::Loaded(image) => {
                events.emit_typed(
                    PREVIEW_READY,
                    &PreviewReadyPayload {
                        path: task.key.path.clone(),
                        width: image.width(),
                        height: image.height(),
                        generation,
                    },
                );
            }
            WarmOutcome::Failed(error) => {
                tracing::warn!("预取失败: {} -> {}", task.key.path.display(), error);
                events.emit_typed(
                    PREVIEW_FAILED,
                    &PreviewFailedPayload {
                        path: task.key.path.clone(),
                        error,
                        generation,
                    },
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::testing::RecordingEventSink;
    use crate::events::NoOpEventSink;
    use crate::models::{ImageEntry, Rating};
    use crate::services::preview_cache::CacheOptions;
    use crate::test_support::{entry_for, write_file, Gate, MockExtractor};
    use std::path::PathBuf;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn catalog_of(tmp: &TempDir, ratings: &[u8]) -> Catalog {
        let entries: Vec<ImageEntry> = ratings
            .iter()
            .enumerate()
            .map(|(i, &r)| {
                let mut entry = entry_for(&write_file(tmp, &format!("IMG_{:02}.nef", i), b"raw"));
                entry.rating = Rating::new(r as i64).unwrap();
                entry
            })
            .collect();
        Catalog::new(tmp.path().to_path_buf(), entries, Vec::new())
    }

    fn wait_until(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        done()
    }

    #[test]
    fn test_window_alternates_directions() {
        let tmp = TempDir::new().unwrap();
        let catalog = catalog_of(&tmp, &[0; 10]);
        let window = prefetch_window(&catalog, 5, FilterState::default(), 3);
        assert_eq!(window, vec![6, 4, 7, 3, 8, 2]);
    }

    #[test]
    fn test_window_respects_filter_and_edges() {
        let tmp = TempDir::new().unwrap();
        let catalog = catalog_of(&tmp, &[3, 0, 0, 4, 0, 5, 0]);
        let filter = FilterState::new(Rating::new(3).unwrap());

        assert_eq!(prefetch_window(&catalog, 3, filter, 3), vec![5, 0]);
        assert_eq!(prefetch_window(&catalog, 0, filter, 1), vec![3]);
        assert!(prefetch_window(&catalog, 0, FilterState::default(), 0).is_empty());
    }

    #[test]
    fn test_task_ordering_is_rank_then_fifo() {
        let clock = GenerationClock::new();
        let token = clock.token();
        let key = CacheKey::new(PathBuf::from("a"), Default::default());
        let task = |rank, seq| PrefetchTask {
            key: key.clone(),
            token: token.clone(),
            rank,
            seq,
        };

        let mut heap = BinaryHeap::new();
        heap.push(task(2, 1));
        heap.push(task(0, 3));
        heap.push(task(0, 2));
        heap.push(task(1, 4));
        let order: Vec<(usize, u64)> = std::iter::from_fn(|| heap.pop().map(|t| (t.rank, t.seq))).collect();
        assert_eq!(order, vec![(0, 2), (0, 3), (1, 4), (2, 1)]);
    }

    #[test]
    fn test_prefetch_fills_cache_and_emits_ready() {
        let tmp = TempDir::new().unwrap();
        let catalog = catalog_of(&tmp, &[0; 6]);
        let mock = Arc::new(MockExtractor::new());
        let cache = PreviewCache::new(mock.clone(), CacheOptions::default());
        let sink = Arc::new(RecordingEventSink::default());
        let prefetcher = Prefetcher::new(
            cache.clone(),
            PrefetchOptions { radius: 2, workers: 2 },
            sink.clone(),
        );

        prefetcher.on_navigate(&catalog, 2, FilterState::default());

        let wanted = [0usize, 1, 3, 4];
        assert!(wait_until(|| wanted
            .iter()
            .all(|&i| cache.contains(&catalog.get(i).unwrap().cache_key()))));
        assert!(!cache.contains(&catalog.get(2).unwrap().cache_key()));
        assert!(!cache.contains(&catalog.get(5).unwrap().cache_key()));
        assert!(wait_until(|| sink.payloads(PREVIEW_READY).len() == 4));
    }

    #[test]
    fn test_failure_emits_preview_failed() {
        let tmp = TempDir::new().unwrap();
        let catalog = catalog_of(&tmp, &[0, 0]);
        let mock = Arc::new(MockExtractor::new());
        mock.fail_on(&catalog.get(1).unwrap().path);
        let cache = PreviewCache::new(mock.clone(), CacheOptions::default());
        let sink = Arc::new(RecordingEventSink::default());
        let prefetcher = Prefetcher::new(cache, PrefetchOptions { radius: 1, workers: 1 }, sink.clone());

        prefetcher.on_navigate(&catalog, 0, FilterState::default());

        assert!(wait_until(|| !sink.payloads(PREVIEW_FAILED).is_empty()));
        let payload = &sink.payloads(PREVIEW_FAILED)[0];
        assert_eq!(payload["error"]["kind"], "corruptFile");
        assert!(sink.names().iter().all(|n| n != PREVIEW_READY));
    }

    #[test]
    fn test_stale_tasks_are_never_extracted() {
        let tmp = TempDir::new().unwrap();
        let catalog = catalog_of(&tmp, &[0; 20]);
        let gate = Gate::new();
        let (started_tx, started_rx) = mpsc::channel();
        let mock = Arc::new(MockExtractor::new().gated(gate.clone(), started_tx));
        let cache = PreviewCache::new(mock.clone(), CacheOptions::default());
        let prefetcher = Prefetcher::new(
            cache.clone(),
            PrefetchOptions { radius: 2, workers: 1 },
            Arc::new(NoOpEventSink),
        );

        // 单线程：第一个任务阻塞在闸门上，其余任务还在队列里
        prefetcher.on_navigate(&catalog, 2, FilterState::default());
        let first = started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first, catalog.get(3).unwrap().path);

        prefetcher.on_navigate(&catalog, 15, FilterState::default());
        gate.open();

        let fresh: Vec<PathBuf> = [16usize, 14, 17, 13]
            .iter()
            .map(|&i| catalog.get(i).unwrap().path.clone())
            .collect();
        assert!(wait_until(|| fresh
            .iter()
            .all(|p| cache.contains(&entry_for(p).cache_key()))));

        let extracted = mock.extracted();
        // 已开始的旧任务允许完成，其余旧任务（1, 4, 0）从未被提取
        assert!(extracted.contains(&first));
        for stale in [1usize, 4, 0] {
            assert!(!extracted.contains(&catalog.get(stale).unwrap().path));
        }
        assert_eq!(extracted.len(), 5);
    }

    #[test]
    fn test_stop_joins_workers_and_drops_queue() {
        let tmp = TempDir::new().unwrap();
        let catalog = catalog_of(&tmp, &[0; 4]);
        let mock = Arc::new(MockExtractor::new());
        let cache = PreviewCache::new(mock, CacheOptions::default());
        let mut prefetcher = Prefetcher::new(cache, PrefetchOptions::default(), Arc::new(NoOpEventSink));

        prefetcher.stop();
        prefetcher.on_navigate(&catalog, 0, FilterState::default());
        assert_eq!(prefetcher.pending(), 0);
    }
}
