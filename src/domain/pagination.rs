//! Page-number resolution for the transaction history.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    /// 1-based page number actually shown.
    pub number: usize,
    pub num_pages: usize,
    pub per_page: usize,
    pub total: usize,
}

impl PageWindow {
    /// Resolves a raw `?page=` value leniently.
    ///
    /// Missing, non-numeric or non-positive values give page 1; numbers past
    /// the end give the last page. An empty result set still has one page.
    pub fn resolve(raw: Option<&str>, total: usize, per_page: usize) -> Self {
        let per_page = per_page.max(1);
        let num_pages = total.div_ceil(per_page).max(1);
        let number = raw.map_or(1, requested_page).min(num_pages);
        Self {
            number,
            num_pages,
            per_page,
            total,
        }
    }

    pub fn offset(&self) -> usize {
        (self.number - 1) * self.per_page
    }

    pub fn limit(&self) -> usize {
        self.per_page
    }

    pub fn has_previous(&self) -> bool {
        self.number > 1
    }

    pub fn has_next(&self) -> bool {
        self.number < self.num_pages
    }

    pub fn previous_number(&self) -> usize {
        self.number.saturating_sub(1).max(1)
    }

    pub fn next_number(&self) -> usize {
        (self.number + 1).min(self.num_pages)
    }
}

/// Digits-only values too large for `usize` still mean "past the end".
fn requested_page(raw: &str) -> usize {
    let raw = raw.trim();
    match raw.parse::<usize>() {
        Ok(0) => 1,
        Ok(n) => n,
        Err(_) if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) => usize::MAX,
        Err(_) => 1,
    }
}
