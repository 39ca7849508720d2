//! The method JIT engine.
//!
//! One background worker thread turns hot bytecode bodies into C, drives an
//! external C compiler, and publishes the loaded entry points into the
//! bodies' atomic function slots. The engine never raises into the host:
//! every failure either disables the engine or marks one body as not
//! compilable.

pub mod options;
pub mod toolchain;
pub mod translator;
pub mod unit;
mod worker;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::bytecode::iseq::{IseqBody, IseqType, JitFuncState, NO_UNIT};
use crate::runtime::context::{ControlFrame, ExecutionContext};
use crate::runtime::value::Value;

use options::JitOptions;
use unit::UnitStore;

/// Call count at which a body is queued for compilation.
pub const CALLS_TO_JIT: u64 = 5;
/// Bodies at least this large stay interpreted; they take too long to build.
pub const ISEQ_SIZE_THRESHOLD: usize = 1000;

/// One-shot state of the precompiled header build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PchStatus {
    NotReady,
    Failed,
    Success,
}

pub(crate) struct EngineState {
    pub units: UnitStore,
    pub pch_status: PchStatus,
    pub finish_requested: bool,
    pub worker_finished: bool,
    pub in_gc: bool,
    pub in_jit: bool,
}

/// Engine handle shared between the host and the worker thread. All mutable
/// state lives behind one mutex; the four condvars provide directed wakeups
/// (PCH decided, client may continue, worker has work, GC finished).
pub struct Jit {
    pub(crate) opts: JitOptions,
    init_pid: u32,
    active: AtomicBool,
    finished: AtomicBool,
    pub(crate) header_path: PathBuf,
    pub(crate) pch_path: PathBuf,
    pub(crate) cc_path: PathBuf,
    pub(crate) state: Mutex<EngineState>,
    pub(crate) pch_cond: Condvar,
    pub(crate) client_cond: Condvar,
    pub(crate) worker_cond: Condvar,
    pub(crate) gc_cond: Condvar,
}

pub type JitFunc = extern "C" fn(*mut ExecutionContext, *mut ControlFrame) -> Value;

impl Jit {
    /// Bring the engine up: resolve the compiler and header, then spawn the
    /// detached worker. Any failure rolls back and the host runs without
    /// the JIT.
    pub fn init(opts: JitOptions) -> Result<Arc<Jit>, String> {
        if !opts.on {
            return Err("JIT is not enabled".to_string());
        }
        let cc_path = toolchain::resolve_cc(opts.cc)?;
        let header_path = toolchain::temp_path(toolchain::PCH_PREFIX, 0, ".h");
        let pch_path = toolchain::temp_path(toolchain::PCH_PREFIX, 0, toolchain::pch_suffix(opts.cc));
        toolchain::resolve_header(&header_path)?;

        let jit = Arc::new(Jit {
            opts,
            init_pid: std::process::id(),
            active: AtomicBool::new(true),
            finished: AtomicBool::new(false),
            header_path,
            pch_path,
            cc_path,
            state: Mutex::new(EngineState {
                units: UnitStore::new(),
                pch_status: PchStatus::NotReady,
                finish_requested: false,
                worker_finished: false,
                in_gc: false,
                in_jit: false,
            }),
            pch_cond: Condvar::new(),
            client_cond: Condvar::new(),
            worker_cond: Condvar::new(),
            gc_cond: Condvar::new(),
        });

        let worker_jit = jit.clone();
        if let Err(e) = std::thread::Builder::new()
            .name("ember-jit-worker".to_string())
            .spawn(move || worker::run(worker_jit))
        {
            toolchain::remove_file(&jit.header_path);
            return Err(format!("cannot spawn JIT worker: {}", e));
        }

        jit.verbose(1, "initialized");
        Ok(jit)
    }

    pub fn active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn disable(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Try to run the current frame natively. Counts the call, queues the
    /// body once it turns hot, and tail-calls published code; `UNDEF` tells
    /// the caller to interpret.
    pub fn exec(&self, ec: &mut ExecutionContext) -> Value {
        if !self.active() {
            return Value::UNDEF;
        }
        if std::process::id() != self.init_pid {
            // forked child: the worker thread was not inherited
            self.disable();
            self.finished.store(true, Ordering::Release);
            return Value::UNDEF;
        }

        let body = ec.current_iseq().clone();
        let total = body.total_calls.fetch_add(1, Ordering::Relaxed) + 1;

        match body.jit_state() {
            JitFuncState::NotAdded => {
                if total == CALLS_TO_JIT
                    && matches!(body.iseq_type, IseqType::Method | IseqType::Block)
                    && body.iseq_size < ISEQ_SIZE_THRESHOLD
                {
                    body.mark_queued();
                    self.add_body_to_process(&body);
                }
                Value::UNDEF
            }
            JitFuncState::NotReady | JitFuncState::NotCompilable => Value::UNDEF,
            JitFuncState::Func(ptr) => {
                let func: JitFunc = unsafe { std::mem::transmute(ptr as usize) };
                let cfp = ec.cfp;
                func(ec as *mut ExecutionContext, cfp)
            }
        }
    }

    /// Track `body` and wake the worker. At most one unit exists per body.
    pub fn add_body_to_process(&self, body: &Arc<IseqBody>) {
        if !self.active() {
            return;
        }
        let mut state = self.state.lock().unwrap();
        if state.finish_requested {
            return;
        }
        if body.jit_unit.load(Ordering::Acquire) != NO_UNIT {
            return;
        }
        state.units.enqueue(body.clone());
        let unloaded = state.units.unload_freed_over(self.opts.max_cache_size);
        if unloaded > 0 {
            log::debug!("unloaded {} stale compiled units", unloaded);
        }
        drop(state);
        self.worker_cond.notify_all();
    }

    /// The body is being collected; the worker must no longer look at it.
    pub fn free_body(&self, body: &IseqBody) {
        let id = body.jit_unit.load(Ordering::Acquire);
        if id == NO_UNIT {
            return;
        }
        let mut state = self.state.lock().unwrap();
        state.units.clear_body(id);
    }

    /// Block the collector out of the worker's translation batches.
    pub fn gc_start_hook(&self) {
        if !self.active() {
            return;
        }
        let mut state = self.state.lock().unwrap();
        while state.in_jit {
            state = self.client_cond.wait(state).unwrap();
        }
        state.in_gc = true;
    }

    pub fn gc_finish_hook(&self) {
        let mut state = self.state.lock().unwrap();
        state.in_gc = false;
        drop(state);
        self.gc_cond.notify_all();
    }

    /// Cooperative shutdown: wait out the PCH decision, ask the worker to
    /// stop, drain every unit (releasing loaded handles), and delete the
    /// scratch artifacts unless save-temps is on.
    pub fn finish(&self) {
        if self.finished.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut state = self.state.lock().unwrap();
        while state.pch_status == PchStatus::NotReady {
            state = self.pch_cond.wait(state).unwrap();
        }
        state.finish_requested = true;
        while !state.worker_finished {
            self.worker_cond.notify_all();
            let (s, _) = self
                .client_cond
                .wait_timeout(state, Duration::from_millis(10))
                .unwrap();
            state = s;
        }
        state.units.drain();
        drop(state);

        if !self.opts.save_temps {
            toolchain::remove_file(&self.pch_path);
            toolchain::remove_file(&self.header_path);
        }
        self.disable();
        self.verbose(1, "finish");
    }

    pub(crate) fn verbose(&self, level: u8, msg: &str) {
        if self.opts.verbose >= level {
            eprintln!("JIT: {}", msg);
        }
        log::debug!("JIT: {}", msg);
    }

    /// Diagnostic line gated the way per-unit failures are reported.
    pub(crate) fn diagnose(&self, msg: &str) {
        if self.opts.warnings || self.opts.verbose >= 1 {
            eprintln!("JIT warning: {}", msg);
        }
        log::warn!("JIT: {}", msg);
    }
}

#[cfg(test)]
mod options_test;
#[cfg(test)]
mod toolchain_test;
#[cfg(test)]
mod translator_test;
