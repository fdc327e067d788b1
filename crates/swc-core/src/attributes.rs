//! Published attribute set of a peripheral.

use thiserror::Error;
use tracing::error;

use crate::bitops::Polarity;
use crate::resolver::ResolvedDependency;

/// Upper bound on the attributes one peripheral publishes.
pub const MAX_ATTRIBUTES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

impl Access {
    pub fn is_writable(self) -> bool {
        matches!(self, Access::ReadWrite)
    }
}

/// A published attribute and the register field backing it.
#[derive(Debug, Clone)]
pub struct AttributeDescriptor {
    pub name: String,
    pub access: Access,
    pub backing: ResolvedDependency,
    pub polarity: Polarity,
}

/// The attribute set is full; the rejected attribute is not published.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("attribute array too small, dropping '{name}' (capacity {capacity})")]
pub struct CapacityExceeded {
    pub name: String,
    pub capacity: usize,
}

/// Ordered, capped list of published attributes.
#[derive(Debug, Clone)]
pub struct AttributeRegistry {
    attrs: Vec<AttributeDescriptor>,
    capacity: usize,
    dropped: usize,
}

impl Default for AttributeRegistry {
    fn default() -> Self {
        Self::with_capacity(MAX_ATTRIBUTES)
    }
}

impl AttributeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            attrs: Vec::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    /// Append `attr`, preserving insertion order. Overflow is logged and the
    /// attribute dropped.
    pub fn push(&mut self, attr: AttributeDescriptor) -> Result<(), CapacityExceeded> {
        if self.attrs.len() >= self.capacity {
            let err = CapacityExceeded {
                name: attr.name,
                capacity: self.capacity,
            };
            error!(attribute = %err.name, capacity = err.capacity, "attr array too small");
            self.dropped += 1;
            return Err(err);
        }
        self.attrs.push(attr);
        Ok(())
    }

    pub fn list(&self) -> &[AttributeDescriptor] {
        &self.attrs
    }

    pub fn get(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.attrs.iter().find(|attr| attr.name == name)
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    /// Number of attributes rejected by the capacity check.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Unpublish everything at once, handing the descriptors back.
    pub fn clear(&mut self) -> Vec<AttributeDescriptor> {
        std::mem::take(&mut self.attrs)
    }
}
