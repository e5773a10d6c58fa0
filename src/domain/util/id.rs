use std::fmt;
use std::marker::PhantomData;

use serde::Serialize;

/// String identifier carrying a phantom tag, so an aggregate URL and a path
/// name cannot be swapped by accident even though both are strings on the
/// wire.
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Hash, Serialize)]
pub struct Id<T> {
    id: String,
    _marker: PhantomData<T>,
}

impl<T> Id<T> {
    pub fn new(id: impl Into<String>) -> Self {
        Id { id: id.into(), _marker: PhantomData }
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }
}

impl<T> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl<T> From<Id<T>> for String {
    fn from(id: Id<T>) -> Self {
        id.id
    }
}

impl<T> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = std::any::type_name::<T>();
        let tag = tag.split("::").last().unwrap_or(tag);
        write!(f, "{}: {:?}", tag.replace("Tag", "Id"), self.id)
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Hash, Copy)]
pub struct AggregateTag;
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Hash, Copy)]
pub struct PathTag;
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Hash, Copy)]
pub struct NodeTag;
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Hash, Copy)]
pub struct LinkTag;
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Hash, Copy)]
pub struct SliceTag;

/// Identifies an aggregate by its service URL.
pub type AggregateId = Id<AggregateTag>;
/// Identifies a stitching path; matches the client id of the link it realizes.
pub type PathId = Id<PathTag>;
pub type NodeId = Id<NodeTag>;
pub type LinkId = Id<LinkTag>;
pub type SliceId = Id<SliceTag>;
