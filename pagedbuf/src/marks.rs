// SPDX-License-Identifier: MPL-2.0

//! Named marks in page-relative coordinates.
//!
//! A mark is stored as `(PageKey, offset)`, so content edits on other pages
//! cannot disturb it, and page-structure events touch only the marks of the
//! affected page (found through a per-page name index) instead of the whole
//! registry.

use crate::{events::PageEventListener, prelude::*, store::PageKey};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct MarkPos {
    pub page: PageKey,
    pub offset: usize,
}

#[derive(Default)]
pub(crate) struct MarkRegistry {
    marks: HashMap<String, MarkPos>,
    by_page: HashMap<PageKey, HashSet<String>>,
}

impl MarkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, pos: MarkPos) {
        if let Some(old) = self.marks.get(name) {
            let stale = if let Some(names) = self.by_page.get_mut(&old.page) {
                names.remove(name);
                names.is_empty()
            } else {
                false
            };
            if stale {
                self.by_page.remove(&old.page);
            }
        }
        self.by_page
            .entry(pos.page)
            .or_default()
            .insert(name.to_owned());
        self.marks.insert(name.to_owned(), pos);
    }

    pub fn get(&self, name: &str) -> Option<MarkPos> {
        self.marks.get(name).copied()
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let Some(pos) = self.marks.remove(name) else {
            return false;
        };
        if let Some(names) = self.by_page.get_mut(&pos.page) {
            names.remove(name);
            if names.is_empty() {
                self.by_page.remove(&pos.page);
            }
        }
        true
    }

    pub fn clear(&mut self) {
        self.marks.clear();
        self.by_page.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MarkPos)> {
        self.marks.iter()
    }

    pub fn names_on_page(&self, key: PageKey) -> Vec<String> {
        self.by_page
            .get(&key)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl PageEventListener for MarkRegistry {
    fn on_split(&mut self, orig: PageKey, fresh: PageKey, split_offset: usize) {
        for name in self.names_on_page(orig) {
            let Some(pos) = self.get(&name) else {
                continue;
            };
            if pos.offset >= split_offset {
                self.set(
                    &name,
                    MarkPos {
                        page: fresh,
                        offset: pos.offset - split_offset,
                    },
                );
            }
        }
    }

    fn on_merge(&mut self, absorbed: PageKey, target: PageKey, insert_offset: usize) {
        for name in self.names_on_page(absorbed) {
            let Some(pos) = self.get(&name) else {
                continue;
            };
            self.set(
                &name,
                MarkPos {
                    page: target,
                    offset: insert_offset + pos.offset,
                },
            );
        }
    }
}

impl Debug for MarkRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarkRegistry")
            .field("marks", &self.marks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(page: u64, offset: usize) -> MarkPos {
        MarkPos {
            page: PageKey::new(page),
            offset,
        }
    }

    #[test]
    fn registry_fns() {
        let mut registry = MarkRegistry::new();
        registry.set("a", pos(1, 3));
        registry.set("b", pos(1, 7));
        registry.set("c", pos(2, 0));
        assert_eq!(registry.iter().count(), 3);
        assert_eq!(registry.get("a"), Some(pos(1, 3)));

        // Re-setting moves the mark between pages.
        registry.set("a", pos(2, 5));
        assert_eq!(registry.get("a"), Some(pos(2, 5)));
        assert!(!registry.names_on_page(PageKey::new(1)).contains(&"a".to_owned()));

        assert!(registry.remove("b"));
        assert!(!registry.remove("b"));
        assert!(registry.names_on_page(PageKey::new(1)).is_empty());
    }

    #[test]
    fn split_moves_marks_past_the_cut() {
        let mut registry = MarkRegistry::new();
        registry.set("before", pos(1, 3));
        registry.set("at", pos(1, 10));
        registry.set("after", pos(1, 17));

        registry.on_split(PageKey::new(1), PageKey::new(2), 10);
        assert_eq!(registry.get("before"), Some(pos(1, 3)));
        assert_eq!(registry.get("at"), Some(pos(2, 0)));
        assert_eq!(registry.get("after"), Some(pos(2, 7)));
    }

    #[test]
    fn merge_rebases_absorbed_marks() {
        let mut registry = MarkRegistry::new();
        registry.set("left", pos(1, 2));
        registry.set("right", pos(2, 4));

        registry.on_merge(PageKey::new(2), PageKey::new(1), 10);
        assert_eq!(registry.get("left"), Some(pos(1, 2)));
        assert_eq!(registry.get("right"), Some(pos(1, 14)));
    }
}
