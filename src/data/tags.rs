use regex::Regex;

use crate::config::TagPolicyConfig;
use crate::errors::Result;

/// A single key/value pair.
#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Default, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[archive(check_bytes)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Tag {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Decides which keys take part in tag comparisons.
///
/// Discardable keys (`created_by`, `source`, `tiger:*` by default) are ignored
/// when comparing or checking for collisions. Trivial keys (`created_by` by
/// default) do not make an object count as tagged.
#[derive(Debug, Clone)]
pub struct TagPolicy {
    discardable: Option<Regex>,
    trivial: Option<Regex>,
}

pub const DEFAULT_DISCARDABLE: [&str; 3] = ["created_by", "source", "tiger:*"];
pub const DEFAULT_TRIVIAL: [&str; 1] = ["created_by"];

fn compile_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Option<Regex>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let alternatives: Vec<String> = patterns.iter()
        .map(|p| regex::escape(p.as_ref()).replace(r"\*", ".*"))
        .collect();
    let re = Regex::new(&format!("^(?:{})$", alternatives.join("|")))?;
    Ok(Some(re))
}

impl TagPolicy {
    pub fn new<S: AsRef<str>>(discardable: &[S], trivial: &[S]) -> Result<Self> {
        Ok(TagPolicy {
            discardable: compile_patterns(discardable)?,
            trivial: compile_patterns(trivial)?,
        })
    }

    pub fn from_config(config: &TagPolicyConfig) -> Result<Self> {
        TagPolicy::new(&config.discardable, &config.trivial)
    }

    pub fn is_discardable(&self, key: &str) -> bool {
        self.discardable.as_ref().is_some_and(|re| re.is_match(key))
    }

    pub fn is_trivial(&self, key: &str) -> bool {
        self.trivial.as_ref().is_some_and(|re| re.is_match(key))
    }
}

impl Default for TagPolicy {
    fn default() -> Self {
        TagPolicy::new(&DEFAULT_DISCARDABLE, &DEFAULT_TRIVIAL).expect("default tag patterns compile")
    }
}

/// Tags of one object, in insertion order.
///
/// Keys are unique except after a colliding [`TagSet::merge`], which keeps
/// both values until the caller resolves them.
#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Default, Clone)]
#[archive(check_bytes)]
pub struct TagSet {
    tags: Vec<Tag>,
}

impl TagSet {
    pub fn new() -> Self {
        TagSet::default()
    }

    pub fn from_pairs<K: Into<String>, V: Into<String>>(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        let mut set = TagSet::new();
        for (key, value) in pairs {
            set.insert(key, value);
        }
        set
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.tags.iter()
    }

    pub(crate) fn tags_mut(&mut self) -> &mut Vec<Tag> {
        &mut self.tags
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.tags.iter()
            .find(|tag| tag.key == key)
            .map(|tag| tag.value.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.tags.iter().any(|tag| tag.key == key)
    }

    /// Sets `key` to `value`, dropping every other value the key had.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        let value = value.into();
        let previous = self.get(&key).map(str::to_string);
        match self.tags.iter().position(|tag| tag.key == key) {
            Some(idx) => {
                self.tags[idx].value = value;
                let mut seen = false;
                self.tags.retain(|tag| {
                    if tag.key != key {
                        return true;
                    }
                    let keep = !seen;
                    seen = true;
                    keep
                });
            }
            None => self.tags.push(Tag { key, value }),
        }
        previous
    }

    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.tags.len();
        self.tags.retain(|tag| tag.key != key);
        before != self.tags.len()
    }

    pub fn clear(&mut self) {
        self.tags.clear();
    }

    pub fn replace(&mut self, other: TagSet) {
        self.tags.clear();
        for tag in other.tags {
            self.insert(tag.key, tag.value);
        }
    }

    /// Unions `other` into this set. Returns true if a non-discardable key
    /// ended up with two different values; both are kept.
    pub fn merge(&mut self, other: &TagSet, policy: &TagPolicy) -> bool {
        let mut collision = false;
        for tag in &other.tags {
            if self.tags.contains(tag) {
                continue;
            }
            if self.contains_key(&tag.key) {
                if policy.is_discardable(&tag.key) {
                    continue;
                }
                collision = true;
            }
            self.tags.push(tag.clone());
        }
        collision
    }

    fn significant(&self, policy: &TagPolicy) -> Vec<&Tag> {
        let mut tags: Vec<&Tag> = self.tags.iter()
            .filter(|tag| !policy.is_discardable(&tag.key))
            .collect();
        tags.sort();
        tags.dedup();
        tags
    }

    /// Order-independent comparison ignoring discardable tags.
    pub fn equals(&self, other: &TagSet, policy: &TagPolicy) -> bool {
        self.significant(policy) == other.significant(policy)
    }

    pub fn has_tag_collisions(&self, policy: &TagPolicy) -> bool {
        let significant = self.significant(policy);
        significant.windows(2).any(|pair| pair[0].key == pair[1].key)
    }

    pub fn has_real_tags(&self, policy: &TagPolicy) -> bool {
        self.tags.iter().any(|tag| !policy.is_trivial(&tag.key))
    }

    pub fn has_non_discardable_tags(&self, policy: &TagPolicy) -> bool {
        self.tags.iter().any(|tag| !policy.is_discardable(&tag.key))
    }

    /// The only non-trivial tag, if there is exactly one.
    pub fn single_tag(&self, policy: &TagPolicy) -> Option<&Tag> {
        let mut real = self.tags.iter().filter(|tag| !policy.is_trivial(&tag.key));
        let first = real.next()?;
        match real.next() {
            Some(_) => None,
            None => Some(first),
        }
    }
}
