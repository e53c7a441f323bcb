//! Message windowing for display. Page 1 is the newest window.

/// Default number of messages per page.
pub const DEFAULT_PER_PAGE: usize = 10;

/// Maximum number of page links offered at once.
const MAX_PAGE_LINKS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    total: usize,
    per_page: usize,
}

impl Pagination {
    pub fn new(total: usize, per_page: usize) -> Self {
        Self {
            total,
            per_page: per_page.max(1),
        }
    }

    pub fn total_pages(&self) -> usize {
        self.total.div_ceil(self.per_page)
    }

    /// Pagination controls only make sense with more than one page.
    pub fn is_needed(&self) -> bool {
        self.total_pages() > 1
    }

    /// Items on `page` (1-based), newest first. `None` when out of range.
    pub fn page<'a, T>(&self, items: &'a [T], page: usize) -> Option<Vec<&'a T>> {
        if page == 0 || page > self.total_pages() {
            return None;
        }
        let len = items.len().min(self.total);
        let end = len.saturating_sub((page - 1) * self.per_page);
        let start = len.saturating_sub(page * self.per_page);
        Some(items[start..end].iter().rev().collect())
    }

    /// Up to five page numbers around `current`.
    pub fn page_numbers(&self, current: usize) -> Vec<usize> {
        let total = self.total_pages();
        if total <= MAX_PAGE_LINKS {
            return (1..=total).collect();
        }
        let first = if current <= 3 {
            1
        } else if current >= total - 2 {
            total - (MAX_PAGE_LINKS - 1)
        } else {
            current - 2
        };
        (first..first + MAX_PAGE_LINKS).collect()
    }
}

/// The most recent `per_page` items in chronological order.
pub fn latest_window<T>(items: &[T], per_page: usize) -> &[T] {
    let start = items.len().saturating_sub(per_page.max(1));
    &items[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_count_from_newest() {
        let items: Vec<u32> = (1..=23).collect();
        let p = Pagination::new(items.len(), 10);
        assert_eq!(p.total_pages(), 3);
        assert!(p.is_needed());
        let first: Vec<u32> = p.page(&items, 1).unwrap().into_iter().copied().collect();
        assert_eq!(first, (14..=23).rev().collect::<Vec<_>>());
        let last: Vec<u32> = p.page(&items, 3).unwrap().into_iter().copied().collect();
        assert_eq!(last, vec![3, 2, 1]);
        assert!(p.page(&items, 0).is_none());
        assert!(p.page(&items, 4).is_none());
    }

    #[test]
    fn single_page_needs_no_controls() {
        let p = Pagination::new(10, 10);
        assert_eq!(p.total_pages(), 1);
        assert!(!p.is_needed());
        assert!(!Pagination::new(0, 10).is_needed());
        assert!(Pagination::new(0, 10).page::<u8>(&[], 1).is_none());
    }

    #[test]
    fn page_numbers_slide_with_current_page() {
        let p = Pagination::new(95, 10);
        assert_eq!(p.total_pages(), 10);
        assert_eq!(p.page_numbers(1), vec![1, 2, 3, 4, 5]);
        assert_eq!(p.page_numbers(3), vec![1, 2, 3, 4, 5]);
        assert_eq!(p.page_numbers(6), vec![4, 5, 6, 7, 8]);
        assert_eq!(p.page_numbers(9), vec![6, 7, 8, 9, 10]);
        assert_eq!(Pagination::new(30, 10).page_numbers(2), vec![1, 2, 3]);
    }

    #[test]
    fn latest_window_is_chronological() {
        let items: Vec<u32> = (1..=12).collect();
        assert_eq!(latest_window(&items, 10), &items[2..]);
        assert_eq!(latest_window(&items[..3], 10), &items[..3]);
    }
}
