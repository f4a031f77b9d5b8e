//! Per-worker reusable objects.
//!
//! Compute workers reuse a scratch buffer, a record decoder, and prototype
//! records per schema so that steady-state request handling allocates
//! nothing on the value path. Scratch is owned by exactly one worker at a
//! time; the pool checks spaces out per task and never shares them across
//! concurrent workers.

use crate::schema::codec::{RecordDecoder, RecordSerializer};
use crate::schema::record::{Record, RecordSchema};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Capacity of the reusable serialization buffer.
pub const SCRATCH_BUFFER_CAPACITY: usize = 1024 * 1024;

/// Capacity of each schema-to-prototype record cache.
pub const PROTOTYPE_CACHE_CAPACITY: usize = 100;

/// Bounded LRU cache of prototype records keyed by schema.
#[derive(Debug)]
pub struct PrototypeCache {
    capacity: usize,
    entries: VecDeque<(Arc<RecordSchema>, Record)>,
}

impl PrototypeCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get the prototype record for a schema, creating it on first use.
    /// The returned record keeps whatever state the last use left in it;
    /// callers clear it before reuse.
    pub fn get_or_create(&mut self, schema: &Arc<RecordSchema>) -> &mut Record {
        let found = self
            .entries
            .iter()
            .position(|(s, _)| Arc::ptr_eq(s, schema) || **s == **schema);
        match found {
            Some(index) => {
                if index != 0 {
                    if let Some(entry) = self.entries.remove(index) {
                        self.entries.push_front(entry);
                    }
                }
            }
            None => {
                if self.entries.len() >= self.capacity {
                    self.entries.pop_back();
                }
                self.entries
                    .push_front((schema.clone(), Record::new(schema.clone())));
            }
        }
        &mut self.entries[0].1
    }
}

/// Mutable views into a worker's scratch for one compute key.
pub struct ComputeScratch<'a> {
    pub value_record: &'a mut Record,
    pub result_record: &'a mut Record,
    pub decoder: &'a mut RecordDecoder,
    pub serializer: &'a RecordSerializer,
    pub buffer: &'a mut Vec<u8>,
}

/// Per-worker scratch space.
pub struct ScratchSpace {
    buffer: Vec<u8>,
    decoder: RecordDecoder,
    serializer: RecordSerializer,
    value_prototypes: PrototypeCache,
    result_prototypes: PrototypeCache,
}

impl ScratchSpace {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(SCRATCH_BUFFER_CAPACITY),
            decoder: RecordDecoder::new(),
            serializer: RecordSerializer::new(),
            value_prototypes: PrototypeCache::new(PROTOTYPE_CACHE_CAPACITY),
            result_prototypes: PrototypeCache::new(PROTOTYPE_CACHE_CAPACITY),
        }
    }

    /// Borrow the scratch views needed to compute one request.
    pub fn for_compute(
        &mut self,
        value_schema: &Arc<RecordSchema>,
        result_schema: &Arc<RecordSchema>,
    ) -> ComputeScratch<'_> {
        ComputeScratch {
            value_record: self.value_prototypes.get_or_create(value_schema),
            result_record: self.result_prototypes.get_or_create(result_schema),
            decoder: &mut self.decoder,
            serializer: &self.serializer,
            buffer: &mut self.buffer,
        }
    }
}

impl Default for ScratchSpace {
    fn default() -> Self {
        Self::new()
    }
}

/// Pool of scratch spaces, one checked out per in-flight compute task.
pub struct ScratchPool {
    spaces: Mutex<Vec<ScratchSpace>>,
}

impl ScratchPool {
    pub fn new() -> Self {
        Self {
            spaces: Mutex::new(Vec::new()),
        }
    }

    pub fn acquire(&self) -> ScratchSpace {
        self.spaces.lock().pop().unwrap_or_default()
    }

    pub fn release(&self, space: ScratchSpace) {
        self.spaces.lock().push(space);
    }
}

impl Default for ScratchPool {
    fn default() -> Self {
        Self::new()
    }
}
