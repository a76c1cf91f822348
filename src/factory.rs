use std::fmt;

use log::debug;

use crate::comparison::{compare, WildcardFields};
use crate::matchers::{Match, Matcher};
use crate::plugin::PluginRouter;
use crate::request::CanonicalRequest;
use crate::tracked::ResponseTrackingList;

/// What an expectation is keyed on.
#[derive(Debug, Clone)]
pub enum RequestKey {
    /// Matches any actual request whose target contains this string.
    Pattern(String),
    /// Matches actual requests that [`compare`] equal to this one.
    Request(CanonicalRequest),
}

impl RequestKey {
    fn matches(&self, actual: &CanonicalRequest, wildcard_fields: &WildcardFields) -> bool {
        match self {
            RequestKey::Pattern(pattern) => actual.target.contains(pattern.as_str()),
            RequestKey::Request(expected) => compare(expected, actual, wildcard_fields),
        }
    }

    /// Whether two keys describe the same logical request.
    fn equivalent(&self, other: &RequestKey, wildcard_fields: &WildcardFields) -> bool {
        match (self, other) {
            (RequestKey::Pattern(a), RequestKey::Pattern(b)) => a == b,
            (RequestKey::Request(request), pattern @ RequestKey::Pattern(_))
            | (pattern @ RequestKey::Pattern(_), RequestKey::Request(request)) => {
                pattern.matches(request, wildcard_fields)
            }
            (RequestKey::Request(a), RequestKey::Request(b)) => compare(a, b, wildcard_fields),
        }
    }

    pub fn as_request(&self) -> Option<&CanonicalRequest> {
        match self {
            RequestKey::Request(request) => Some(request),
            RequestKey::Pattern(_) => None,
        }
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKey::Pattern(pattern) => write!(f, "*{}*", pattern),
            RequestKey::Request(request) => write!(f, "{}", request),
        }
    }
}

impl From<&str> for RequestKey {
    fn from(pattern: &str) -> Self {
        RequestKey::Pattern(pattern.to_owned())
    }
}

impl From<String> for RequestKey {
    fn from(pattern: String) -> Self {
        RequestKey::Pattern(pattern)
    }
}

impl From<CanonicalRequest> for RequestKey {
    fn from(request: CanonicalRequest) -> Self {
        RequestKey::Request(request)
    }
}

/// The expected request a set of test doubles answers: a [`RequestKey`] plus optional
/// extra [`Match`] constraints that must all hold.
#[derive(Debug)]
pub struct Expectation {
    key: RequestKey,
    matchers: Vec<Matcher>,
}

impl Expectation {
    pub fn given(key: impl Into<RequestKey>) -> Self {
        Self {
            key: key.into(),
            matchers: Vec::new(),
        }
    }

    /// Add a constraint on top of target comparison.
    pub fn and<M: Match + 'static>(mut self, matcher: M) -> Self {
        self.matchers.push(Matcher::new(matcher));
        self
    }

    pub fn key(&self) -> &RequestKey {
        &self.key
    }

    pub fn matches(&self, actual: &CanonicalRequest, wildcard_fields: &WildcardFields) -> bool {
        self.key.matches(actual, wildcard_fields)
            && self.matchers.iter().all(|matcher| matcher.matches(actual))
    }

    /// Expectations carrying extra matchers are never merged: their constraints cannot be
    /// compared with each other.
    fn equivalent(&self, other: &Expectation, wildcard_fields: &WildcardFields) -> bool {
        self.matchers.is_empty()
            && other.matchers.is_empty()
            && self.key.equivalent(&other.key, wildcard_fields)
    }
}

impl From<RequestKey> for Expectation {
    fn from(key: RequestKey) -> Self {
        Expectation::given(key)
    }
}

impl From<CanonicalRequest> for Expectation {
    fn from(request: CanonicalRequest) -> Self {
        Expectation::given(request)
    }
}

impl From<&str> for Expectation {
    fn from(pattern: &str) -> Self {
        Expectation::given(pattern)
    }
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)?;
        if !self.matchers.is_empty() {
            write!(f, " (+{} matchers)", self.matchers.len())?;
        }
        Ok(())
    }
}

/// The declaration scope an expectation was registered at.
///
/// When two registrations target equivalent requests in the same factory, the one with
/// the more specific scope wins regardless of registration order; at equal scope the
/// first registration wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Scope {
    /// Defaults configured for a test directory (or for every directory).
    Directory,
    /// Shared by a group of tests.
    Group,
    /// Declared on the test itself.
    #[default]
    Test,
}

/// What an expectation resolves to.
pub enum Entry {
    Tracked(ResponseTrackingList),
    Plugin(Box<dyn PluginRouter>),
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entry::Tracked(list) => f.debug_tuple("Tracked").field(list).finish(),
            Entry::Plugin(plugin) => write!(f, "Plugin({})", plugin.name()),
        }
    }
}

impl From<ResponseTrackingList> for Entry {
    fn from(list: ResponseTrackingList) -> Self {
        Entry::Tracked(list)
    }
}

#[derive(Debug)]
pub(crate) struct Slot {
    pub(crate) expectation: Expectation,
    pub(crate) scope: Scope,
    pub(crate) entry: Entry,
}

/// Outcome of [`FactoryTable::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    /// No equivalent expectation existed.
    Added,
    /// An equivalent expectation from a less specific scope was overridden.
    Replaced,
    /// An equivalent expectation existed with no doubles and was filled in.
    Filled,
    /// An equivalent expectation from the same or a more specific scope was kept.
    Ignored,
}

/// The expectations registered for one integration point, in declaration order.
#[derive(Debug, Default)]
pub struct FactoryTable {
    slots: Vec<Slot>,
}

impl FactoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Register `entry` for `expectation`, merging with an equivalent expectation if one
    /// is already present.
    pub fn insert(
        &mut self,
        expectation: Expectation,
        scope: Scope,
        entry: Entry,
        wildcard_fields: &WildcardFields,
    ) -> Insertion {
        let existing = self
            .slots
            .iter_mut()
            .find(|slot| slot.expectation.equivalent(&expectation, wildcard_fields));
        let Some(slot) = existing else {
            self.slots.push(Slot {
                expectation,
                scope,
                entry,
            });
            return Insertion::Added;
        };

        let outcome = match &slot.entry {
            Entry::Tracked(list) if list.is_empty() => Insertion::Filled,
            _ if scope > slot.scope => Insertion::Replaced,
            _ => Insertion::Ignored,
        };
        if outcome == Insertion::Ignored {
            debug!(
                "Kept the existing test doubles for {}: an equivalent expectation is already registered.",
                slot.expectation
            );
        } else {
            slot.expectation = expectation;
            slot.scope = scope.max(slot.scope);
            slot.entry = entry;
        }
        outcome
    }

    /// The first expectation, in declaration order, that `actual` is routed to.
    pub(crate) fn route(
        &mut self,
        actual: &CanonicalRequest,
        wildcard_fields: &WildcardFields,
    ) -> Option<&mut Slot> {
        self.slots
            .iter_mut()
            .find(|slot| slot.expectation.matches(actual, wildcard_fields))
    }

    pub(crate) fn slots(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter()
    }

    /// The tracking list registered for an expectation equivalent to `key`, if any.
    pub fn get(&self, key: &RequestKey, wildcard_fields: &WildcardFields) -> Option<&ResponseTrackingList> {
        self.slots.iter().find_map(|slot| match &slot.entry {
            Entry::Tracked(list)
                if slot.expectation.matchers.is_empty()
                    && slot.expectation.key.equivalent(key, wildcard_fields) =>
            {
                Some(list)
            }
            _ => None,
        })
    }

    /// The scope the expectation equivalent to `key` is currently held at.
    pub fn scope_of(&self, key: &RequestKey, wildcard_fields: &WildcardFields) -> Option<Scope> {
        self.slots
            .iter()
            .find(|slot| slot.expectation.key.equivalent(key, wildcard_fields))
            .map(|slot| slot.scope)
    }
}
