//! Label table: append-only, first match wins.
//!
//! Labels bind a name to a bit offset during loading and are the targets of
//! jumps and macro calls. Lookup is a linear scan over insertion order, so
//! the first definition of a name wins; redefinitions are silently ignored.
//! A failed lookup is reported to the caller as `None` and turned into the
//! [`UNRESOLVED`] sentinel by the loader, never into a hard failure.

/// Sentinel address carried by references that never resolved.
pub const UNRESOLVED: i64 = -1;

/// Append-only name-to-address table.
#[derive(Debug, Default)]
pub struct LabelTable {
    entries: Vec<(String, i64)>,
}

impl LabelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the first address bound to `name`, if any.
    pub fn lookup(&self, name: &str) -> Option<i64> {
        let name = name.trim();
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|&(_, addr)| addr)
    }

    /// Binds `name` to `addr` unless an earlier binding exists.
    pub fn define(&mut self, name: &str, addr: i64) {
        if self.lookup(name).is_none() {
            self.entries.push((name.trim().to_string(), addr));
        }
    }

    /// Number of distinct bindings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_missing_is_none() {
        let table = LabelTable::new();
        assert_eq!(table.lookup("nowhere"), None);
    }

    #[test]
    fn first_definition_wins() {
        let mut table = LabelTable::new();
        table.define("loop", 8);
        table.define("loop", 64);
        assert_eq!(table.lookup("loop"), Some(8));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn lookup_trims_whitespace() {
        let mut table = LabelTable::new();
        table.define(" end ", 40);
        assert_eq!(table.lookup("end"), Some(40));
        assert_eq!(table.lookup("  end\n"), Some(40));
    }
}
