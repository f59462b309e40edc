//! Return types shared by cache mutations and lookups

use chorus_core::Message;

/// Result of an insert-or-update: the previous snapshot (if any) and the stored value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upserted<T> {
    pub old: Option<T>,
    pub new: T,
}

impl<T> Upserted<T> {
    pub fn inserted(new: T) -> Self {
        Self { old: None, new }
    }

    pub fn replaced(old: T, new: T) -> Self {
        Self {
            old: Some(old),
            new,
        }
    }

    /// Nothing was cached before
    #[inline]
    pub fn is_new(&self) -> bool {
        self.old.is_none()
    }

    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> Upserted<U> {
        Upserted {
            old: self.old.map(&mut f),
            new: f(self.new),
        }
    }
}

impl<T: PartialEq> Upserted<T> {
    /// The stored value differs from what was there before
    pub fn changed(&self) -> bool {
        self.old.as_ref() != Some(&self.new)
    }
}

/// Outcome of a message lookup
///
/// A miss is a normal outcome (the buffer is bounded), not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageLookup {
    Cached(Message),
    Uncached,
}

impl MessageLookup {
    #[inline]
    pub fn is_cached(&self) -> bool {
        matches!(self, Self::Cached(_))
    }

    pub fn into_option(self) -> Option<Message> {
        match self {
            Self::Cached(message) => Some(message),
            Self::Uncached => None,
        }
    }
}

impl From<Option<Message>> for MessageLookup {
    fn from(message: Option<Message>) -> Self {
        message.map_or(Self::Uncached, Self::Cached)
    }
}
