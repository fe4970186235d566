use std::ops::Bound;

use prost_types::ListValue;

use crate::proto::google::spanner::v1 as proto;
use crate::{Error, ToSpanner, Value};

/// A row key: the values of a table's (or index's) primary key columns, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Key(Vec<Value>);

impl Key {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// Creates a key from a single primary key column value.
    pub fn of<T: ToSpanner + ?Sized>(value: &T) -> Result<Self, Error> {
        value.to_spanner().map(|v| Key(vec![v]))
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }
}

impl From<Value> for Key {
    fn from(v: Value) -> Self {
        Key(vec![v])
    }
}

impl From<Vec<Value>> for Key {
    fn from(values: Vec<Value>) -> Self {
        Key(values)
    }
}

impl From<(Value, Value)> for Key {
    fn from(v: (Value, Value)) -> Self {
        let (a, b) = v;
        Key(vec![a, b])
    }
}

impl From<Key> for ListValue {
    fn from(key: Key) -> Self {
        ListValue {
            values: key.0.into_iter().map(Into::into).collect(),
        }
    }
}

/// A range of keys. An unbounded side is sent as an empty closed key, which matches every key on that side.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyRange {
    start: Bound<Key>,
    end: Bound<Key>,
}

impl KeyRange {
    pub fn new(start: Bound<Key>, end: Bound<Key>) -> Self {
        Self { start, end }
    }

    /// All keys starting with the provided prefix.
    pub fn prefix(prefix: Key) -> Self {
        Self::new(Bound::Included(prefix.clone()), Bound::Included(prefix))
    }
}

impl From<KeyRange> for proto::KeyRange {
    fn from(range: KeyRange) -> Self {
        use proto::key_range::{EndKeyType, StartKeyType};
        let start = match range.start {
            Bound::Included(key) => StartKeyType::StartClosed(key.into()),
            Bound::Excluded(key) => StartKeyType::StartOpen(key.into()),
            Bound::Unbounded => StartKeyType::StartClosed(ListValue::default()),
        };
        let end = match range.end {
            Bound::Included(key) => EndKeyType::EndClosed(key.into()),
            Bound::Excluded(key) => EndKeyType::EndOpen(key.into()),
            Bound::Unbounded => EndKeyType::EndClosed(ListValue::default()),
        };
        proto::KeyRange {
            start_key_type: Some(start),
            end_key_type: Some(end),
        }
    }
}

/// Identifies rows to read or delete: individual keys, key ranges or the whole table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeySet {
    keys: Vec<Key>,
    ranges: Vec<KeyRange>,
    all: bool,
}

impl KeySet {
    /// Every row of the table or index.
    pub fn all() -> Self {
        Self {
            all: true,
            ..Default::default()
        }
    }

    pub fn with_key(mut self, key: Key) -> Self {
        self.keys.push(key);
        self
    }

    pub fn with_range(mut self, range: KeyRange) -> Self {
        self.ranges.push(range);
        self
    }
}

impl From<Vec<Key>> for KeySet {
    fn from(keys: Vec<Key>) -> Self {
        Self {
            keys,
            ..Default::default()
        }
    }
}

impl From<KeyRange> for KeySet {
    fn from(range: KeyRange) -> Self {
        Self {
            ranges: vec![range],
            ..Default::default()
        }
    }
}

impl From<KeySet> for proto::KeySet {
    fn from(key_set: KeySet) -> Self {
        proto::KeySet {
            all: key_set.all,
            keys: key_set.keys.into_iter().map(Into::into).collect(),
            ranges: key_set.ranges.into_iter().map(Into::into).collect(),
        }
    }
}
