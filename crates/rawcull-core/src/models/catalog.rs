//! 目录索引数据模型：有序条目、过滤与邻近查找

use std::cmp::Ordering;
use std::collections::HashMap;
use std::iter::FusedIterator;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::entry::{ImageEntry, Rating};

/// 查找方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// 排序方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortOrder {
    /// 按路径自然排序（不区分大小写，IMG_2 在 IMG_10 之前）
    #[default]
    Name,
    /// 按 EXIF 拍摄时间，缺失时回退到修改时间
    CaptureTime,
}

/// 当前的评分过滤条件（会话级，不持久化）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FilterState {
    pub min_rating: Rating,
}

impl FilterState {
    pub fn new(min_rating: Rating) -> Self {
        Self { min_rating }
    }

    pub fn passes(&self, entry: &ImageEntry) -> bool {
        entry.rating >= self.min_rating
    }
}

/// 扫描警告类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ScanWarningKind {
    UnreadableDirectory,
    UnreadableFile,
    CorruptSidecar,
}

/// 扫描过程中的非致命问题
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanWarning {
    pub path: PathBuf,
    pub kind: ScanWarningKind,
    pub message: String,
}

/// 一次扫描得到的有序图片列表
///
/// 同时维护路径到下标、去掉扩展名的路径到下标的索引，文件监控事件按路径查找时不必遍历。
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    root: PathBuf,
    entries: Vec<ImageEntry>,
    warnings: Vec<ScanWarning>,
    by_path: HashMap<PathBuf, usize>,
    by_stem: HashMap<PathBuf, Vec<usize>>,
}

impl Catalog {
    /// 条目需要已按目标顺序排好且路径唯一
    pub fn new(root: PathBuf, entries: Vec<ImageEntry>, warnings: Vec<ScanWarning>) -> Self {
        let mut by_path = HashMap::with_capacity(entries.len());
        let mut by_stem: HashMap<PathBuf, Vec<usize>> = HashMap::new();
        for (index, entry) in entries.iter().enumerate() {
            by_path.insert(entry.path.clone(), index);
            by_stem
                .entry(entry.path.with_extension(""))
                .or_default()
                .push(index);
        }
        Self {
            root,
            entries,
            warnings,
            by_path,
            by_stem,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ImageEntry> {
        self.entries.get(index)
    }

    /// 调用方不得修改 `path`，否则路径索引失效
    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut ImageEntry> {
        self.entries.get_mut(index)
    }

    pub fn entries(&self) -> &[ImageEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ImageEntry> {
        self.entries.iter()
    }

    pub fn warnings(&self) -> &[ScanWarning] {
        &self.warnings
    }

    pub(crate) fn push_warning(&mut self, warning: ScanWarning) {
        self.warnings.push(warning);
    }

    pub fn position_of(&self, path: &Path) -> Option<usize> {
        self.by_path.get(path).copied()
    }

    pub fn contains_path(&self, path: &Path) -> bool {
        self.by_path.contains_key(path)
    }

    /// 去掉扩展名后等于 `stem` 的条目下标（如 `/s/IMG_1` 对应 `IMG_1.CR2` 和 `IMG_1.JPG`）
    pub fn indices_with_stem(&self, stem: &Path) -> &[usize] {
        self.by_stem.get(stem).map_or(&[], Vec::as_slice)
    }

    /// 评分不低于 `min` 的条目下标，升序、惰性、可重复迭代
    pub fn filtered_indices(&self, min: Rating) -> FilteredIndices<'_> {
        FilteredIndices {
            entries: &self.entries,
            front: 0,
            back: self.entries.len(),
            min,
        }
    }

    pub fn count_filtered(&self, min: Rating) -> usize {
        self.filtered_indices(min).count()
    }

    /// 从 `from`（含）开始按方向查找第一个通过过滤的条目
    ///
    /// `Backward` 时 `from` 超出末尾会从最后一项开始；`Forward` 时返回 `None`。
    pub fn nearest_filtered(&self, from: usize, direction: Direction, min: Rating) -> Option<usize> {
        let len = self.entries.len();
        if len == 0 {
            return None;
        }
        match direction {
            Direction::Forward => {
                if from >= len {
                    return None;
                }
                (from..len).find(|&i| self.entries[i].rating >= min)
            }
            Direction::Backward => {
                let start = from.min(len - 1);
                (0..=start).rev().find(|&i| self.entries[i].rating >= min)
            }
        }
    }

    pub fn first_filtered(&self, min: Rating) -> Option<usize> {
        self.nearest_filtered(0, Direction::Forward, min)
    }

    pub fn last_filtered(&self, min: Rating) -> Option<usize> {
        self.nearest_filtered(usize::MAX, Direction::Backward, min)
    }
}

/// [`Catalog::filtered_indices`] 返回的迭代器
#[derive(Debug, Clone)]
pub struct FilteredIndices<'a> {
    entries: &'a [ImageEntry],
    front: usize,
    back: usize,
    min: Rating,
}

impl Iterator for FilteredIndices<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        while self.front < self.back {
            let i = self.front;
            self.front += 1;
            if self.entries[i].rating >= self.min {
                return Some(i);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.back - self.front))
    }
}

impl DoubleEndedIterator for FilteredIndices<'_> {
    fn next_back(&mut self) -> Option<usize> {
        while self.back > self.front {
            self.back -= 1;
            if self.entries[self.back].rating >= self.min {
                return Some(self.back);
            }
        }
        None
    }
}

impl FusedIterator for FilteredIndices<'_> {}

/// 路径自然排序：逐级比较路径组件，数字按数值、字母不区分大小写
///
/// 完全相同时按原始字节比较，保证是全序。
pub fn natural_path_cmp(a: &Path, b: &Path) -> Ordering {
    let mut ca = a.components();
    let mut cb = b.components();
    loop {
        match (ca.next(), cb.next()) {
            (Some(x), Some(y)) => {
                let xs = x.as_os_str().to_string_lossy();
                let ys = y.as_os_str().to_string_lossy();
                match natord::compare_ignore_case(&xs, &ys) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (None, None) => break,
        }
    }
    a.as_os_str().cmp(b.as_os_str())
}

/// 按指定方式排序
pub fn sort_entries(entries: &mut [ImageEntry], order: SortOrder) {
    match order {
        SortOrder::Name => entries.sort_by(|a, b| natural_path_cmp(&a.path, &b.path)),
        SortOrder::CaptureTime => entries.sort_by(|a, b| {
            let ta = a.captured_at.unwrap_or_else(|| a.signature.modified_secs());
            let tb = b.captured_at.unwrap_or_else(|| b.signature.modified_secs());
            ta.cmp(&tb).then_with(|| natural_path_cmp(&a.path, &b.path))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::entry::ModSignature;

    fn catalog_with(ratings: &[i64]) -> Catalog {
        let entries = ratings
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let mut e = ImageEntry::new(
                    PathBuf::from(format!("/shoot/IMG_{i}.NEF")),
                    ModSignature::default(),
                );
                e.rating = Rating::new(*r).unwrap();
                e
            })
            .collect();
        Catalog::new(PathBuf::from("/shoot"), entries, Vec::new())
    }

    fn r(v: i64) -> Rating {
        Rating::new(v).unwrap()
    }

    #[test]
    fn test_nearest_filtered_forward() {
        let catalog = catalog_with(&[0, 0, 3, 0, 5]);
        assert_eq!(catalog.nearest_filtered(0, Direction::Forward, r(1)), Some(2));
        assert_eq!(catalog.nearest_filtered(3, Direction::Forward, r(1)), Some(4));
        assert_eq!(catalog.nearest_filtered(2, Direction::Forward, r(4)), Some(4));
        assert_eq!(catalog.nearest_filtered(5, Direction::Forward, r(1)), None);
    }

    #[test]
    fn test_nearest_filtered_backward() {
        let catalog = catalog_with(&[0, 0, 3, 0, 5]);
        assert_eq!(catalog.nearest_filtered(3, Direction::Backward, r(1)), Some(2));
        assert_eq!(catalog.nearest_filtered(1, Direction::Backward, r(1)), None);
        assert_eq!(catalog.nearest_filtered(100, Direction::Backward, r(1)), Some(4));
    }

    #[test]
    fn test_last_filtered_jumps_to_last_rated() {
        let catalog = catalog_with(&[1, 0, 3, 0, 0]);
        assert_eq!(catalog.last_filtered(r(1)), Some(2));
        assert_eq!(catalog_with(&[0, 0]).last_filtered(r(1)), None);
        assert_eq!(Catalog::default().last_filtered(r(0)), None);
    }

    #[test]
    fn test_filtered_indices_are_strictly_increasing() {
        let catalog = catalog_with(&[2, 0, 5, 1, 1, 0, 4, 3, 0, 5]);
        for min in 0..=5 {
            let indices: Vec<usize> = catalog.filtered_indices(r(min)).collect();
            assert!(indices.windows(2).all(|w| w[0] < w[1]));
            for (i, e) in catalog.iter().enumerate() {
                assert_eq!(indices.contains(&i), e.rating.value() as i64 >= min);
            }
        }
    }

    #[test]
    fn test_filtered_indices_restartable_and_reversible() {
        let catalog = catalog_with(&[0, 2, 0, 4]);
        let iter = catalog.filtered_indices(r(1));
        assert_eq!(iter.clone().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(iter.clone().rev().collect::<Vec<_>>(), vec![3, 1]);
        assert_eq!(iter.count(), 2);
        assert_eq!(catalog.count_filtered(r(0)), 4);
    }

    #[test]
    fn test_path_and_stem_lookup() {
        let catalog = catalog_with(&[0, 1, 2]);
        assert_eq!(catalog.position_of(Path::new("/shoot/IMG_2.NEF")), Some(2));
        assert_eq!(catalog.position_of(Path::new("/shoot/IMG_9.NEF")), None);
        assert!(catalog.contains_path(Path::new("/shoot/IMG_0.NEF")));
        assert_eq!(catalog.indices_with_stem(Path::new("/shoot/IMG_1")), &[1]);
        assert!(catalog.indices_with_stem(Path::new("/shoot/IMG_7")).is_empty());
    }

    #[test]
    fn test_natural_path_order() {
        let mut paths = vec![
            PathBuf::from("/s/img_10.cr2"),
            PathBuf::from("/s/IMG_2.cr2"),
            PathBuf::from("/s/b/IMG_1.cr2"),
            PathBuf::from("/s/IMG_1.cr2"),
        ];
        paths.sort_by(|a, b| natural_path_cmp(a, b));
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/s/b/IMG_1.cr2"),
                PathBuf::from("/s/IMG_1.cr2"),
                PathBuf::from("/s/IMG_2.cr2"),
                PathBuf::from("/s/img_10.cr2"),
            ]
        );
    }

    #[test]
    fn test_natural_order_is_total_for_case_variants() {
        let a = Path::new("/s/A.nef");
        let b = Path::new("/s/a.nef");
        assert_ne!(natural_path_cmp(a, b), Ordering::Equal);
        assert_eq!(natural_path_cmp(a, b), natural_path_cmp(b, a).reverse());
    }

    #[test]
    fn test_capture_time_sort_falls_back_to_mtime() {
        let mut a = ImageEntry::new(
            PathBuf::from("/s/a.nef"),
            ModSignature { modified_ns: 50 * 1_000_000_000, size: 1 },
        );
        a.captured_at = Some(100);
        let b = ImageEntry::new(
            PathBuf::from("/s/b.nef"),
            ModSignature { modified_ns: 10 * 1_000_000_000, size: 1 },
        );
        let mut entries = vec![a, b];
        sort_entries(&mut entries, SortOrder::CaptureTime);
        assert_eq!(entries[0].path, PathBuf::from("/s/b.nef"));
    }
}
