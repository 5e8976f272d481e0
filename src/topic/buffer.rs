//! Bounded topic path builder

use std::fmt;

/// Capacity of the topic buffer used by the dispatcher
pub const DEFAULT_TOPIC_CAPACITY: usize = 1024;

/// Restore point returned by [`TopicBuffer::mark`] and [`TopicBuffer::push_segment`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TopicMark(usize);

impl TopicMark {
    /// Byte offset of the mark within the path
    pub fn position(self) -> usize {
        self.0
    }
}

/// A reusable topic path with a hard capacity
///
/// Appends are all-or-nothing: an append that would exceed the capacity
/// fails and leaves the path unchanged.
#[derive(Debug, Clone)]
pub struct TopicBuffer {
    path: String,
    capacity: usize,
}

impl Default for TopicBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_TOPIC_CAPACITY)
    }
}

impl TopicBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            path: String::with_capacity(capacity),
            capacity,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current end of the path
    pub fn mark(&self) -> TopicMark {
        TopicMark(self.path.len())
    }

    /// Pop back to a previous mark
    pub fn truncate(&mut self, mark: TopicMark) {
        self.path.truncate(mark.0);
    }

    pub fn clear(&mut self) {
        self.path.clear();
    }

    pub fn push_str(&mut self, s: &str) -> Result<(), TopicError> {
        self.reserve(s.len())?;
        self.path.push_str(s);
        Ok(())
    }

    pub fn push_char(&mut self, c: char) -> Result<(), TopicError> {
        self.reserve(c.len_utf8())?;
        self.path.push(c);
        Ok(())
    }

    /// Append `/segment`, returning the mark to pop back to
    pub fn push_segment(&mut self, segment: &str) -> Result<TopicMark, TopicError> {
        let mark = self.mark();
        self.reserve(1 + segment.len())?;
        self.path.push('/');
        self.path.push_str(segment);
        Ok(mark)
    }

    fn reserve(&self, additional: usize) -> Result<(), TopicError> {
        let needed = self.path.len() + additional;
        if needed > self.capacity {
            return Err(TopicError::Overflow {
                capacity: self.capacity,
                needed,
            });
        }
        Ok(())
    }
}

impl fmt::Display for TopicBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// Topic building errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicError {
    /// The topic would exceed the buffer capacity
    Overflow { capacity: usize, needed: usize },
}

impl fmt::Display for TopicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overflow { capacity, needed } => write!(
                f,
                "topic needs {} bytes, capacity is {}",
                needed, capacity
            ),
        }
    }
}

impl std::error::Error for TopicError {}
