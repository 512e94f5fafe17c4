//! Advisory name generation for nodegroups and nodes.

/// Monotonic counter yielding `<prefix>-<n>` names.
///
/// Suggestions are not reserved: a caller may ignore them, and a suggested
/// name may collide with one a caller picked by hand.
#[derive(Debug, Clone)]
pub struct NameCounter {
    prefix: &'static str,
    next: u64,
}

impl NameCounter {
    pub const fn new(prefix: &'static str) -> Self {
        Self { prefix, next: 0 }
    }

    pub fn next_name(&mut self) -> String {
        let name = format!("{}-{}", self.prefix, self.next);
        self.next += 1;
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_sequential() {
        let mut counter = NameCounter::new("nodegroup");
        assert_eq!(counter.next_name(), "nodegroup-0");
        assert_eq!(counter.next_name(), "nodegroup-1");
        assert_eq!(counter.next_name(), "nodegroup-2");
    }

    #[test]
    fn test_counters_are_independent() {
        let mut groups = NameCounter::new("nodegroup");
        let mut nodes = NameCounter::new("node");
        groups.next_name();
        groups.next_name();
        assert_eq!(nodes.next_name(), "node-0");
        assert_eq!(groups.next_name(), "nodegroup-2");
    }
}
