use serde::Deserialize;

/// Query string shared by every paginated page: `?page=N` and, for search, `?q=...`.
///
/// `page` is kept as a raw string so that garbage falls back to page 1 instead
/// of failing extraction.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
    pub q: Option<String>,
}

impl PageQuery {
    pub fn page(&self) -> usize {
        self.page
            .as_deref()
            .and_then(|s| s.trim().parse::<usize>().ok())
            .unwrap_or(1)
            .max(1)
    }

    pub fn search_terms(&self) -> Option<&str> {
        self.q.as_deref().map(str::trim).filter(|q| !q.is_empty())
    }
}

/// One page of an ordered collection.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
}

impl<T> Page<T> {
    /// Slices `all` into the requested page. Pages past the end are empty
    /// rather than an error.
    pub fn paginate(all: Vec<T>, page: usize, per_page: usize) -> Self {
        let page = page.max(1);
        let per_page = per_page.max(1);
        let total = all.len();
        let items = all
            .into_iter()
            .skip((page - 1).saturating_mul(per_page))
            .take(per_page)
            .collect();
        Self {
            items,
            page,
            per_page,
            total,
        }
    }

    /// Builds a page whose items were already sliced elsewhere.
    pub fn from_parts(items: Vec<T>, page: usize, per_page: usize, total: usize) -> Self {
        Self {
            items,
            page: page.max(1),
            per_page: per_page.max(1),
            total,
        }
    }

    pub fn has_next(&self) -> bool {
        self.total > self.page * self.per_page
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }

    pub fn next_num(&self) -> Option<usize> {
        self.has_next().then(|| self.page + 1)
    }

    pub fn prev_num(&self) -> Option<usize> {
        self.has_prev().then(|| self.page - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_param_falls_back_to_one() {
        let q = PageQuery {
            page: Some("abc".to_string()),
            q: None,
        };
        assert_eq!(q.page(), 1);
        let q = PageQuery {
            page: Some("0".to_string()),
            q: None,
        };
        assert_eq!(q.page(), 1);
        let q = PageQuery {
            page: Some("3".to_string()),
            q: None,
        };
        assert_eq!(q.page(), 3);
    }

    #[test]
    fn blank_search_is_none() {
        let q = PageQuery {
            page: None,
            q: Some("   ".to_string()),
        };
        assert_eq!(q.search_terms(), None);
    }

    #[test]
    fn middle_page_links_both_ways() {
        let page = Page::paginate((1..=7).collect::<Vec<_>>(), 2, 3);
        assert_eq!(page.items, vec![4, 5, 6]);
        assert_eq!(page.next_num(), Some(3));
        assert_eq!(page.prev_num(), Some(1));
    }

    #[test]
    fn last_page_has_no_next() {
        let page = Page::paginate((1..=6).collect::<Vec<_>>(), 2, 3);
        assert_eq!(page.items, vec![4, 5, 6]);
        assert!(!page.has_next());
        assert_eq!(page.next_num(), None);
    }

    #[test]
    fn page_past_end_is_empty() {
        let page = Page::paginate(vec![1, 2], 5, 3);
        assert!(page.items.is_empty());
        assert_eq!(page.total, 2);
        assert!(page.has_prev());
    }
}
