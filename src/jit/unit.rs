use std::sync::Arc;
use std::sync::atomic::Ordering;

use libloading::Library;

use crate::bytecode::iseq::{IseqBody, NO_UNIT};

/// Engine bookkeeping for one body's JIT lifecycle. The body reference is
/// cleared when the host frees the body; the loaded library handle is
/// retained until the unit unloads so the published function stays valid.
pub struct Unit {
    pub id: u32,
    pub body: Option<Arc<IseqBody>>,
    pub handle: Option<Library>,
    pub compiled: bool,
}

/// Unit records plus the compilation queue, all mutated under the engine
/// mutex. The queue keeps insertion order; dequeueing scans for the body
/// with the most observed calls, so the queue acts as a priority queue
/// without extra structure.
#[derive(Default)]
pub struct UnitStore {
    units: Vec<Option<Unit>>,
    queue: Vec<u32>,
}

impl UnitStore {
    pub fn new() -> Self {
        UnitStore::default()
    }

    /// Create a unit for `body` and append it to the queue. At most one unit
    /// may exist per body; the caller checks `body.jit_unit` first.
    pub fn enqueue(&mut self, body: Arc<IseqBody>) -> u32 {
        let id = self.units.len() as u32;
        body.jit_unit.store(id, Ordering::Release);
        self.units.push(Some(Unit {
            id,
            body: Some(body),
            handle: None,
            compiled: false,
        }));
        self.queue.push(id);
        id
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Pick the queued unit whose body has the largest call count, ties
    /// broken by insertion order. Units whose body was freed are reaped on
    /// the way.
    pub fn dequeue_best(&mut self) -> Option<u32> {
        self.queue.retain(|id| {
            let alive = matches!(&self.units[*id as usize], Some(u) if u.body.is_some());
            if !alive {
                self.units[*id as usize] = None;
            }
            alive
        });

        let mut best: Option<(usize, u64)> = None;
        for (i, id) in self.queue.iter().enumerate() {
            let unit = self.units[*id as usize].as_ref().expect("queued unit");
            let calls = unit
                .body
                .as_ref()
                .map(|b| b.total_calls.load(Ordering::Relaxed))
                .unwrap_or(0);
            match best {
                Some((_, top)) if calls <= top => {}
                _ => best = Some((i, calls)),
            }
        }
        let (i, _) = best?;
        Some(self.queue.remove(i))
    }

    pub fn unit(&self, id: u32) -> Option<&Unit> {
        self.units.get(id as usize).and_then(|u| u.as_ref())
    }

    pub fn unit_mut(&mut self, id: u32) -> Option<&mut Unit> {
        self.units.get_mut(id as usize).and_then(|u| u.as_mut())
    }

    /// Clear the body pointer; the worker will discard the unit.
    pub fn clear_body(&mut self, id: u32) {
        if let Some(unit) = self.unit_mut(id) {
            if let Some(body) = unit.body.take() {
                body.jit_unit.store(NO_UNIT, Ordering::Release);
            }
        }
    }

    pub fn compiled_count(&self) -> usize {
        self.units
            .iter()
            .flatten()
            .filter(|u| u.compiled && u.handle.is_some())
            .count()
    }

    /// Release library handles of compiled units whose body is gone,
    /// smallest id first, until at most `max` compiled units remain.
    /// Returns how many were unloaded.
    pub fn unload_freed_over(&mut self, max: usize) -> usize {
        let mut resident = self.compiled_count();
        if resident <= max {
            return 0;
        }
        let mut unloaded = 0;
        for slot in self.units.iter_mut() {
            if resident <= max {
                break;
            }
            let unloadable = slot
                .as_ref()
                .map(|u| u.compiled && u.handle.is_some() && u.body.is_none())
                .unwrap_or(false);
            if unloadable {
                *slot = None;
                resident -= 1;
                unloaded += 1;
            }
        }
        unloaded
    }

    /// Drop every unit record, releasing loaded handles. Used at engine
    /// finish so no loader handles outlive the engine.
    pub fn drain(&mut self) {
        self.queue.clear();
        for slot in self.units.iter_mut() {
            if let Some(unit) = slot.take() {
                if let Some(body) = unit.body {
                    body.jit_unit.store(NO_UNIT, Ordering::Release);
                }
                drop(unit.handle);
            }
        }
    }
}

