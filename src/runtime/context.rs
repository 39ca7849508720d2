use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use crate::bytecode::iseq::{IseqBody, NO_METHOD};
use crate::jit::Jit;
use crate::runtime::heap::{ClassId, Heap};
use crate::runtime::method::MethodTable;
use crate::runtime::value::Value;

pub const VM_STACK_CAPACITY: usize = 2048;
pub const FRAME_CAPACITY: usize = 128;

/// One activation record. The leading fields are mirrored by
/// `em_control_frame_t` in `ember.h`; generated C reads and writes them
/// directly, so layout changes must be applied to both.
#[repr(C)]
pub struct ControlFrame {
    /// Byte offset into the body's instruction stream.
    pub pc: u64,
    pub sp: *mut Value,
    /// Points at the env slot holding the parent ep; locals sit below it.
    pub ep: *mut Value,
    pub self_val: Value,
    /// First operand-stack slot of this frame (`ep + 1`).
    pub stack_bottom: *mut Value,
    pub iseq: *const IseqBody,
    pub block: Value,
    pub method_entry: u32,
    /// When set, `vm_exec` returns to its caller once this frame pops.
    pub finish: u32,
}

impl ControlFrame {
    pub fn body(&self) -> &IseqBody {
        unsafe { &*self.iseq }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceEvent {
    pub flag: u8,
    pub pc: u64,
}

/// Host-side interpreter state: everything the engine and generated code
/// reach through an `ExecutionContext` pointer but C never touches directly.
pub struct HostState {
    pub heap: Heap,
    pub methods: MethodTable,
    pub globals: HashMap<String, Value>,
    pub constants: HashMap<String, Value>,
    /// Bumped on every constant write; inline caches compare against it.
    pub constant_serial: AtomicU64,
    pub class_vars: HashMap<(ClassId, String), Value>,
    /// Instance variables of non-heap receivers.
    pub generic_ivars: HashMap<(u64, String), Value>,
    symbols: Vec<String>,
    symbol_lookup: HashMap<String, u32>,
    pub trace_events: Vec<TraceEvent>,
    pub interrupt_checks: u64,
    /// Lines written by `puts`; echoed to stdout when `echo_output` is set.
    pub output: Vec<String>,
    pub echo_output: bool,
    pub error: Option<String>,
    pub throw_pending: Option<(u32, Value)>,
    pub jit: Option<Arc<Jit>>,
}

impl Default for HostState {
    fn default() -> Self {
        HostState {
            heap: Heap::new(),
            methods: MethodTable::new(),
            globals: HashMap::new(),
            constants: HashMap::new(),
            constant_serial: AtomicU64::new(1),
            class_vars: HashMap::new(),
            generic_ivars: HashMap::new(),
            symbols: Vec::new(),
            symbol_lookup: HashMap::new(),
            trace_events: Vec::new(),
            interrupt_checks: 0,
            output: Vec::new(),
            echo_output: false,
            error: None,
            throw_pending: None,
            jit: None,
        }
    }
}

impl HostState {
    pub fn intern(&mut self, name: &str) -> Value {
        if let Some(&id) = self.symbol_lookup.get(name) {
            return Value::symbol(id);
        }
        let id = self.symbols.len() as u32;
        self.symbols.push(name.to_string());
        self.symbol_lookup.insert(name.to_string(), id);
        Value::symbol(id)
    }

    pub fn symbol_name(&self, id: u32) -> Option<&str> {
        self.symbols.get(id as usize).map(|s| s.as_str())
    }
}

/// The mutator's execution state. The first three fields are mirrored by
/// `struct em_execution_context` in `ember.h`. The VM stack and frame array
/// have fixed capacity so raw pointers held by frames and generated code
/// stay valid for the context's lifetime.
#[repr(C)]
pub struct ExecutionContext {
    pub cfp: *mut ControlFrame,
    pub errinfo: Value,
    pub interrupt_flag: u32,
    _pad: u32,
    vm_stack: Box<[Value]>,
    frames: Box<[ControlFrame]>,
    frame_count: usize,
    iseq_refs: Vec<Arc<IseqBody>>,
    pub host: HostState,
}

impl ExecutionContext {
    pub fn new() -> Box<ExecutionContext> {
        let vm_stack = vec![Value::NIL; VM_STACK_CAPACITY].into_boxed_slice();
        let frames = (0..FRAME_CAPACITY)
            .map(|_| ControlFrame {
                pc: 0,
                sp: std::ptr::null_mut(),
                ep: std::ptr::null_mut(),
                self_val: Value::NIL,
                stack_bottom: std::ptr::null_mut(),
                iseq: std::ptr::null(),
                block: Value::NIL,
                method_entry: NO_METHOD,
                finish: 0,
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Box::new(ExecutionContext {
            cfp: std::ptr::null_mut(),
            errinfo: Value::NIL,
            interrupt_flag: 0,
            _pad: 0,
            vm_stack,
            frames,
            frame_count: 0,
            iseq_refs: Vec::new(),
            host: HostState::default(),
        })
    }

    pub fn frame_depth(&self) -> usize {
        self.frame_count
    }

    pub fn frames_in_use(&self) -> &[ControlFrame] {
        &self.frames[..self.frame_count]
    }

    /// Owning reference for the current frame's body.
    pub fn current_iseq(&self) -> &Arc<IseqBody> {
        self.iseq_refs.last().expect("no frame")
    }

    pub fn current_frame(&self) -> &ControlFrame {
        debug_assert!(self.frame_count > 0);
        unsafe { &*self.cfp }
    }

    pub fn current_frame_mut(&mut self) -> &mut ControlFrame {
        debug_assert!(self.frame_count > 0);
        unsafe { &mut *self.cfp }
    }

    pub fn stack_base(&mut self) -> *mut Value {
        self.vm_stack.as_mut_ptr()
    }

    fn next_sp(&mut self) -> *mut Value {
        if self.frame_count == 0 {
            self.stack_base()
        } else {
            self.current_frame().sp
        }
    }

    /// Push an activation for `iseq`. `argc` argument slots directly below
    /// the current sp become the leading locals; remaining locals are
    /// nil-filled, then the env slot linking to `parent_ep` (block frames)
    /// is pushed.
    pub fn push_frame(
        &mut self,
        iseq: Arc<IseqBody>,
        self_val: Value,
        argc: usize,
        block: Value,
        method_entry: u32,
        parent_ep: Option<*mut Value>,
    ) -> Result<(), String> {
        if self.frame_count >= FRAME_CAPACITY {
            return Err("stack level too deep".to_string());
        }
        let sp = self.next_sp();
        let base = unsafe { sp.sub(argc) };
        let stack_start = self.stack_base();
        let needed = iseq.local_size + 1 + iseq.stack_max;
        let base_idx = (base as usize - stack_start as usize) / size_of::<Value>();
        if base_idx + needed > VM_STACK_CAPACITY {
            return Err("stack overflow".to_string());
        }

        unsafe {
            for i in argc..iseq.local_size {
                *base.add(i) = Value::NIL;
            }
            let ep = base.add(iseq.local_size);
            *ep = Value(parent_ep.map_or(0, |p| p as u64));

            let frame = &mut self.frames[self.frame_count];
            frame.pc = iseq.entry_pc(argc);
            frame.sp = ep.add(1);
            frame.ep = ep;
            frame.self_val = self_val;
            frame.stack_bottom = ep.add(1);
            frame.iseq = Arc::as_ptr(&iseq);
            frame.block = block;
            frame.method_entry = method_entry;
            frame.finish = 0;
            self.cfp = frame as *mut ControlFrame;
        }
        self.iseq_refs.push(iseq);
        self.frame_count += 1;
        Ok(())
    }

    /// Drop every frame, e.g. after an error aborted a run.
    pub fn reset_frames(&mut self) {
        self.frame_count = 0;
        self.iseq_refs.clear();
        self.cfp = std::ptr::null_mut();
    }

    pub fn pop_frame(&mut self) {
        debug_assert!(self.frame_count > 0);
        self.frame_count -= 1;
        self.iseq_refs.pop();
        self.cfp = if self.frame_count == 0 {
            std::ptr::null_mut()
        } else {
            &mut self.frames[self.frame_count - 1] as *mut ControlFrame
        };
    }

    /// Environment pointer `level` lexical scopes up from `ep`.
    pub fn ep_at_level(ep: *mut Value, level: usize) -> *mut Value {
        let mut ep = ep;
        for _ in 0..level {
            ep = unsafe { (*ep).0 as *mut Value };
        }
        ep
    }

    /// Interrupt check point; branches and returns funnel through here.
    pub fn check_ints(&mut self) {
        self.host.interrupt_checks += 1;
    }

    pub fn raise(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        self.errinfo = self.host.heap.alloc_string(msg.clone());
        self.host.error = Some(msg);
    }

    pub fn take_error(&mut self) -> Option<String> {
        self.errinfo = Value::NIL;
        self.host.error.take()
    }

    pub fn errored(&self) -> bool {
        self.host.error.is_some()
    }
}

