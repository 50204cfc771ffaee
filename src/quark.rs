//! Interned identifiers ("quarks") for kernel argument and symbol names.
//!
//! A [`Quark`] is a small, `Copy` integer handle that compares equal iff the
//! underlying strings are equal. The table only ever grows for the lifetime
//! of the process, matching the data-model invariant that quark equality
//! implies string equality.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quark(u32);

struct Table {
    strings: Vec<Box<str>>,
    by_str: HashMap<Box<str>, Quark>,
}

fn table() -> &'static Mutex<Table> {
    static TABLE: OnceLock<Mutex<Table>> = OnceLock::new();
    TABLE.get_or_init(|| {
        Mutex::new(Table {
            strings: Vec::new(),
            by_str: HashMap::new(),
        })
    })
}

impl Quark {
    /// Intern `s`, returning the same `Quark` for equal strings across the
    /// whole process.
    pub fn new(s: &str) -> Quark {
        let mut t = table().lock().expect("quark table poisoned");
        if let Some(q) = t.by_str.get(s) {
            return *q;
        }
        let id = t.strings.len() as u32;
        let boxed: Box<str> = s.into();
        t.strings.push(boxed.clone());
        let q = Quark(id);
        t.by_str.insert(boxed, q);
        q
    }

    /// The raw 32-bit id, suitable for embedding as a constant in generated
    /// code (it is what the specialiser switches on for `sample`/
    /// `samplerTransform`/`samplerExtent`).
    pub fn id(self) -> u32 {
        self.0
    }

    pub fn as_string(self) -> String {
        let t = table().lock().expect("quark table poisoned");
        t.strings[self.0 as usize].to_string()
    }
}

impl std::fmt::Display for Quark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_string())
    }
}

impl std::fmt::Debug for Quark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Quark({}, {:?})", self.0, self.as_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_strings_intern_to_equal_quarks() {
        let a = Quark::new("src");
        let b = Quark::new("src");
        assert_eq!(a, b);
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn different_strings_intern_to_different_quarks() {
        let a = Quark::new("a-unique-name-1");
        let b = Quark::new("a-unique-name-2");
        assert_ne!(a, b);
    }

    #[test]
    fn round_trips_through_as_string() {
        let q = Quark::new("round-trip-name");
        assert_eq!(q.as_string(), "round-trip-name");
    }
}
