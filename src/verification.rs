use std::collections::BTreeMap;
use std::fmt;

/// The test doubles registered for one expected request that were never consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UncalledEntry {
    /// The expected request, as it was declared.
    pub request: String,
    /// The unconsumed doubles, in declaration order.
    pub doubles: Vec<String>,
}

/// A report produced by the teardown audit detailing, per factory, which expected
/// requests still had unconsumed test doubles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UncalledReport {
    entries: BTreeMap<String, Vec<UncalledEntry>>,
}

impl UncalledReport {
    pub(crate) fn push(&mut self, factory_name: &str, request: String, doubles: Vec<String>) {
        self.entries
            .entry(factory_name.to_owned())
            .or_default()
            .push(UncalledEntry { request, doubles });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names of the factories with at least one uncalled double.
    pub fn factories(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn get(&self, factory_name: &str) -> Option<&[UncalledEntry]> {
        self.entries.get(factory_name).map(Vec::as_slice)
    }

    /// Total number of unconsumed doubles across all factories.
    pub fn n_uncalled(&self) -> usize {
        self.entries
            .values()
            .flatten()
            .map(|entry| entry.doubles.len())
            .sum()
    }
}

impl fmt::Display for UncalledReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (factory_name, entries) in &self.entries {
            writeln!(f, "- {}", factory_name)?;
            for entry in entries {
                writeln!(f, "\t{}", entry.request)?;
                for double in &entry.doubles {
                    writeln!(f, "\t\t{}", double)?;
                }
            }
        }
        Ok(())
    }
}
