//! Message category registry.
//!
//! Every message carries a category name that is handed to the stream's
//! formatter and writer. Producers typically use a handful of distinct
//! categories, so names are interned once per process and afterwards a
//! `Category` is a copyable reference with no per-message allocation.
//!
//! # Thread Safety
//!
//! The registry is shared by all producer threads and guarded by a mutex.
//! Only interning takes the lock; copying or reading a `Category` does not.

use std::collections::HashSet;
use std::fmt;
use lazy_static::lazy_static;
use parking_lot::Mutex;

lazy_static! {
    /// Interned category names. Entries are leaked and never removed.
    static ref CATEGORIES: Mutex<HashSet<&'static str>> = Mutex::new(HashSet::new());
}

/// An interned message category.
///
/// # Examples
///
/// ```
/// # use multi_stream_logger::Category;
/// let a = Category::new("audit");
/// let b = Category::new("audit");
/// assert_eq!(a, b);
/// assert_eq!(a.as_str(), "audit");
/// assert!(Category::NONE.is_empty());
/// ```
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Category(&'static str);

impl Category {
    /// The empty category, used when a message has none.
    pub const NONE: Category = Category("");

    /// Interns `name` and returns its category.
    ///
    /// The first registration of a name allocates and leaks one copy of it;
    /// later calls with the same name return the existing entry.
    pub fn new(name: &str) -> Self {
        if name.is_empty() {
            return Self::NONE;
        }

        let mut registry = CATEGORIES.lock();
        if let Some(&interned) = registry.get(name) {
            return Category(interned);
        }

        let interned: &'static str = Box::leak(name.to_owned().into_boxed_str());
        registry.insert(interned);
        Category(interned)
    }

    /// Wraps a static name. Equal to `Category::new(name)` for equality
    /// purposes since comparison is by content.
    pub const fn from_static(name: &'static str) -> Self {
        Category(name)
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Number of distinct names interned so far.
pub fn registered_categories() -> usize {
    CATEGORIES.lock().len()
}

impl From<&str> for Category {
    fn from(name: &str) -> Self {
        Category::new(name)
    }
}

impl fmt::Debug for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Category({:?})", self.0)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_interning_is_shared() {
        let a = Category::new("interning-shared");
        let b = Category::new(&String::from("interning-shared"));
        assert!(std::ptr::eq(a.as_str(), b.as_str()));
    }

    #[test]
    fn test_empty_name_is_none() {
        assert_eq!(Category::new(""), Category::NONE);
        assert_eq!(Category::default(), Category::NONE);
    }

    #[test]
    fn test_static_equals_interned() {
        assert_eq!(Category::from_static("static-cat"), Category::new("static-cat"));
    }

    #[test]
    fn test_concurrent_interning() {
        let handle = thread::spawn(|| Category::new("concurrent-cat"));
        let a = Category::new("concurrent-cat");
        let b = handle.join().unwrap();
        assert!(std::ptr::eq(a.as_str(), b.as_str()));
        assert!(registered_categories() >= 1);
    }
}
