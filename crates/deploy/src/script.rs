//! Scripts: ordered steps plus tag and network-condition metadata.

use std::{collections::BTreeSet, fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{NetworkContext, step::Step};

/// Pure predicate over the active network; `true` means the script is skipped.
pub type SkipPredicate = Arc<dyn Fn(&NetworkContext) -> bool + Send + Sync>;

/// An ordered group of steps.
#[derive(Clone)]
pub struct Script {
    pub name: String,
    pub tags: BTreeSet<String>,
    pub steps: Vec<Step>,
    skip: SkipPredicate,
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Script")
            .field("name", &self.name)
            .field("tags", &self.tags)
            .field("steps", &self.steps)
            .finish_non_exhaustive()
    }
}

impl Script {
    /// A script with no tags, no steps, and a predicate that never skips.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: BTreeSet::new(),
            steps: Vec::new(),
            skip: Arc::new(|_: &NetworkContext| false),
        }
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn step(mut self, step: impl Into<Step>) -> Self {
        self.steps.push(step.into());
        self
    }

    /// Set the skip predicate.
    pub fn skip_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&NetworkContext) -> bool + Send + Sync + 'static,
    {
        self.skip = Arc::new(predicate);
        self
    }

    /// Set an already boxed skip predicate.
    pub fn skip_predicate(mut self, predicate: SkipPredicate) -> Self {
        self.skip = predicate;
        self
    }

    /// True iff the script shares at least one tag with `requested`.
    pub fn matches(&self, requested: &BTreeSet<String>) -> bool {
        !self.tags.is_disjoint(requested)
    }

    pub fn should_skip(&self, network: &NetworkContext) -> bool {
        (self.skip)(network)
    }
}

/// Which scripts a run selects by tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagFilter {
    /// Every script, regardless of its tags.
    All,
    /// Scripts sharing at least one tag with the set. An empty set selects nothing.
    Any(BTreeSet<String>),
}

impl TagFilter {
    pub fn any<I, T>(tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        TagFilter::Any(tags.into_iter().map(Into::into).collect())
    }

    pub fn admits(&self, script: &Script) -> bool {
        match self {
            TagFilter::All => true,
            TagFilter::Any(tags) => script.matches(tags),
        }
    }
}

impl fmt::Display for TagFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagFilter::All => write!(f, "*"),
            TagFilter::Any(tags) => {
                write!(f, "{}", tags.iter().cloned().collect::<Vec<_>>().join(","))
            }
        }
    }
}

/// Declarative skip conditions, combined with OR.
///
/// ```toml
/// [skip]
/// unless_network = ["matic"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SkipRules {
    /// Skip unless the active network is one of these.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unless_network: Vec<String>,
    /// Skip on these networks.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<String>,
    /// Skip when the network's live flag equals this value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live: Option<bool>,
}

impl SkipRules {
    pub fn is_empty(&self) -> bool {
        self.unless_network.is_empty() && self.networks.is_empty() && self.live.is_none()
    }

    pub fn evaluate(&self, network: &NetworkContext) -> bool {
        (!self.unless_network.is_empty() && !self.unless_network.contains(&network.name))
            || self.networks.contains(&network.name)
            || self.live == Some(network.live)
    }

    pub fn into_predicate(self) -> SkipPredicate {
        Arc::new(move |network: &NetworkContext| self.evaluate(network))
    }
}
