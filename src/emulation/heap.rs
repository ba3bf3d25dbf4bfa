//! Simulated managed heap.

use std::collections::HashMap;

use crate::{
    emulation::{EmValue, EmulationError, HeapRef},
    metadata::signatures::{TypeRef, TypeSig},
};

/// An object living on the heap
#[derive(Clone, Debug, PartialEq)]
pub enum HeapObject {
    /// Immutable string
    String(String),
    /// Single-dimension array
    Array {
        /// Element type
        element: TypeSig,
        /// Elements
        elements: Vec<EmValue>,
    },
    /// Instance of a class, fields by name
    Object {
        /// Canonical type identity
        type_ref: TypeRef,
        /// Field values
        fields: HashMap<String, EmValue>,
    },
    /// A boxed value type
    Boxed {
        /// Static type of the value
        sig: TypeSig,
        /// The value
        value: EmValue,
    },
}

/// Append-only object store; objects live as long as the heap
#[derive(Debug)]
pub struct ManagedHeap {
    objects: Vec<HeapObject>,
    max_objects: usize,
}

impl ManagedHeap {
    /// A heap holding at most `max_objects` objects
    #[must_use]
    pub fn new(max_objects: usize) -> Self {
        ManagedHeap {
            objects: Vec::new(),
            max_objects,
        }
    }

    /// Stores `object`
    ///
    /// # Errors
    /// Returns [`EmulationError::HeapLimitExceeded`] if the heap is full.
    pub fn alloc(&mut self, object: HeapObject) -> Result<HeapRef, EmulationError> {
        if self.objects.len() >= self.max_objects {
            return Err(EmulationError::HeapLimitExceeded(self.max_objects));
        }
        self.objects.push(object);
        Ok(HeapRef(self.objects.len() - 1))
    }

    /// The object behind `r`
    ///
    /// # Errors
    /// Returns [`EmulationError::InvalidHeapReference`] for a dangling handle.
    pub fn get(&self, r: HeapRef) -> Result<&HeapObject, EmulationError> {
        self.objects
            .get(r.0)
            .ok_or(EmulationError::InvalidHeapReference(r.0))
    }

    /// Mutable access to the object behind `r`
    ///
    /// # Errors
    /// Returns [`EmulationError::InvalidHeapReference`] for a dangling handle.
    pub fn get_mut(&mut self, r: HeapRef) -> Result<&mut HeapObject, EmulationError> {
        self.objects
            .get_mut(r.0)
            .ok_or(EmulationError::InvalidHeapReference(r.0))
    }

    /// Number of live objects
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// True if nothing was allocated
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
