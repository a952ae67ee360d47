//! Ordered, hashable identifier wrapper.
//!
//! `Id<T, V>` pairs a raw value with a zero-sized tag so that, for example, an
//! endpoint id and a message id never compare against each other even when they
//! wrap the same primitive. Equality, ordering and hashing all delegate to the
//! wrapped value; the tag only contributes its name to `Debug` output.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Marker implemented by the zero-sized tag types that name an id family.
pub trait IdTag {
    const NAME: &'static str;
}

pub struct Id<T: IdTag, V> {
    value: V,
    _tag: PhantomData<fn() -> T>,
}

impl<T: IdTag, V> Id<T, V> {
    pub const fn new(value: V) -> Self {
        Self {
            value,
            _tag: PhantomData,
        }
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn into_value(self) -> V {
        self.value
    }
}

impl<T: IdTag, V: Clone> Clone for Id<T, V> {
    fn clone(&self) -> Self {
        Self::new(self.value.clone())
    }
}

impl<T: IdTag, V: Copy> Copy for Id<T, V> {}

impl<T: IdTag, V: PartialEq> PartialEq for Id<T, V> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T: IdTag, V: Eq> Eq for Id<T, V> {}

impl<T: IdTag, V: PartialOrd> PartialOrd for Id<T, V> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.value.partial_cmp(&other.value)
    }
}

impl<T: IdTag, V: Ord> Ord for Id<T, V> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value.cmp(&other.value)
    }
}

impl<T: IdTag, V: Hash> Hash for Id<T, V> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl<T: IdTag, V: fmt::Debug> fmt::Debug for Id<T, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:?})", T::NAME, self.value)
    }
}

impl<T: IdTag, V: fmt::Display> fmt::Display for Id<T, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value.fmt(f)
    }
}

impl<T: IdTag, V: Serialize> Serialize for Id<T, V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.value.serialize(serializer)
    }
}

impl<'de, T: IdTag, V: Deserialize<'de>> Deserialize<'de> for Id<T, V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        V::deserialize(deserializer).map(Self::new)
    }
}
