use crate::archiver::store::compare_message_names;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Message name wrapper ordering mlmmj's numeric names by value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageName(pub String);

impl Ord for MessageName {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_message_names(&self.0, &other.0)
    }
}

impl PartialOrd for MessageName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// `year -> month -> names`, as collected from one incoming store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketMap {
    years: BTreeMap<u32, BTreeMap<u32, Vec<MessageName>>>,
}

impl BucketMap {
    pub fn insert(&mut self, name: impl Into<String>, year: u32, month: u32) {
        let names = self
            .years
            .entry(year)
            .or_default()
            .entry(month)
            .or_default();
        let name = MessageName(name.into());
        let pos = names.partition_point(|existing| existing <= &name);
        names.insert(pos, name);
    }

    /// Buckets in ascending `(year, month)` order.
    pub fn months(&self) -> impl Iterator<Item = (u32, u32, &[MessageName])> {
        self.years.iter().flat_map(|(year, months)| {
            months
                .iter()
                .map(move |(month, names)| (*year, *month, names.as_slice()))
        })
    }

    pub fn len(&self) -> usize {
        self.years.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.years.is_empty()
    }

    pub fn message_count(&self) -> usize {
        self.years
            .values()
            .flat_map(BTreeMap::values)
            .map(Vec::len)
            .sum()
    }
}

pub fn bucket_messages<I, S>(messages: I) -> BucketMap
where
    I: IntoIterator<Item = (S, u32, u32)>,
    S: Into<String>,
{
    let mut out = BucketMap::default();
    for (name, year, month) in messages {
        out.insert(name, year, month);
    }
    out
}
