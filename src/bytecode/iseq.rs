use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::bytecode::op_code::{Instructions, OpCode, decode, make, operand_widths};
use crate::runtime::value::Value;

/// Entry-point slot states below `FIRST_FUNC`. Anything at or above
/// `FIRST_FUNC` is a function pointer published by the JIT worker.
/// Transitions only move forward: not-added -> queued -> {not-compilable, ptr}.
pub const NOT_ADDED_FUNC: u64 = 0;
pub const NOT_READY_FUNC: u64 = 1;
pub const NOT_COMPILABLE_FUNC: u64 = 2;
pub const FIRST_FUNC: u64 = 3;

pub const NO_UNIT: u32 = u32::MAX;
pub const NO_METHOD: u32 = u32::MAX;

/// `CallInfo` flag: receiver-less call on self.
pub const CI_FCALL: u32 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IseqType {
    Top,
    Method,
    Block,
}

/// Per-call-site static information.
pub struct CallInfo {
    /// Index into the body's `ids` pool naming the method.
    pub mid: u32,
    pub argc: u32,
    pub flags: u32,
    /// Block body attached to a `Send`.
    pub block: Option<Arc<IseqBody>>,
}

/// Resolved-method shape recorded in a call cache, readable from the JIT
/// worker without touching the method registry.
pub const CC_KIND_EMPTY: u32 = 0;
pub const CC_KIND_NATIVE: u32 = 1;
pub const CC_KIND_ISEQ_SIMPLE: u32 = 2;
pub const CC_KIND_OTHER: u32 = 3;

/// Per-call-site cache filled by the interpreter on dispatch and read by the
/// translator at compile time. A generated guard compares the recorded
/// snapshot against the live global method state and receiver class serial.
#[derive(Default)]
pub struct CallCache {
    pub method_state: AtomicU64,
    pub class_serial: AtomicU64,
    pub method_idx: AtomicU32,
    pub method_kind: AtomicU32,
}

impl CallCache {
    pub fn empty() -> Self {
        CallCache {
            method_state: AtomicU64::new(0),
            class_serial: AtomicU64::new(0),
            method_idx: AtomicU32::new(NO_METHOD),
            method_kind: AtomicU32::new(CC_KIND_EMPTY),
        }
    }

    pub fn fill(&self, method_state: u64, class_serial: u64, method_idx: u32, kind: u32) {
        self.method_idx.store(method_idx, Ordering::Relaxed);
        self.method_kind.store(kind, Ordering::Relaxed);
        self.method_state.store(method_state, Ordering::Relaxed);
        self.class_serial.store(class_serial, Ordering::Relaxed);
    }
}

/// Constant inline cache: valid while `serial` matches the host's global
/// constant serial. Serial 0 means never filled.
#[derive(Default)]
pub struct InlineCache {
    pub value: AtomicU64,
    pub serial: AtomicU64,
}

/// Case-dispatch table: immediate value bits to branch byte offset. Keys are
/// restricted to immediates so compiled code stays position-independent.
pub struct CaseTable {
    pub entries: Vec<(u64, u32)>,
}

/// The compiled form of one method, block, or toplevel script. Immutable
/// after [`BodyBuilder::build`] apart from the three atomic engine fields.
pub struct IseqBody {
    pub name: String,
    pub iseq_type: IseqType,
    pub iseq_encoded: Instructions,
    pub iseq_size: usize,
    pub stack_max: usize,
    /// Locals including leading parameters.
    pub local_size: usize,
    pub lead_num: usize,
    /// Optional-parameter entry offsets; `opt_table[i]` is the resume pc when
    /// `lead_num + i` arguments were supplied. Empty when no optionals.
    pub opt_table: Vec<u32>,
    pub consts: Vec<Value>,
    pub ids: Vec<String>,
    pub call_infos: Vec<CallInfo>,
    pub call_caches: Vec<CallCache>,
    pub inline_caches: Vec<InlineCache>,
    pub case_tables: Vec<CaseTable>,

    /// Entry-point slot, published with a release store and read with an
    /// acquire load; see the `*_FUNC` constants.
    pub jit_func: AtomicU64,
    /// Id of the engine unit tracking this body, `NO_UNIT` when untracked.
    pub jit_unit: AtomicU32,
    pub total_calls: AtomicU64,
}

/// Decoded entry-point slot.
pub enum JitFuncState {
    NotAdded,
    NotReady,
    NotCompilable,
    Func(u64),
}

impl IseqBody {
    pub fn has_opt(&self) -> bool {
        !self.opt_table.is_empty()
    }

    pub fn opt_num(&self) -> usize {
        self.opt_table.len().saturating_sub(1)
    }

    /// Entry pc for a call supplying `argc` arguments.
    pub fn entry_pc(&self, argc: usize) -> u64 {
        if self.has_opt() && argc >= self.lead_num {
            self.opt_table[argc - self.lead_num] as u64
        } else {
            0
        }
    }

    pub fn jit_state(&self) -> JitFuncState {
        match self.jit_func.load(Ordering::Acquire) {
            NOT_ADDED_FUNC => JitFuncState::NotAdded,
            NOT_READY_FUNC => JitFuncState::NotReady,
            NOT_COMPILABLE_FUNC => JitFuncState::NotCompilable,
            ptr => JitFuncState::Func(ptr),
        }
    }

    pub fn mark_queued(&self) {
        self.jit_func.store(NOT_READY_FUNC, Ordering::Release);
    }

    pub fn mark_not_compilable(&self) {
        self.jit_func.store(NOT_COMPILABLE_FUNC, Ordering::Release);
    }

    pub fn publish_func(&self, ptr: u64) {
        debug_assert!(ptr >= FIRST_FUNC);
        self.jit_func.store(ptr, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// Assembles an [`IseqBody`]: interns pools, resolves labels, and computes
/// the maximum operand-stack depth by walking every branch.
pub struct BodyBuilder {
    name: String,
    iseq_type: IseqType,
    lead_num: usize,
    local_size: usize,
    stack_max_override: Option<usize>,
    code: Instructions,
    consts: Vec<Value>,
    ids: Vec<String>,
    call_infos: Vec<CallInfo>,
    case_tables: Vec<CaseTable>,
    inline_cache_count: usize,
    labels: Vec<Option<usize>>,
    // (operand byte offset, label) pairs patched at build time
    patches: Vec<(usize, Label)>,
    opt_table: Vec<Label>,
}

impl BodyBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        BodyBuilder {
            name: name.into(),
            iseq_type: IseqType::Top,
            lead_num: 0,
            local_size: 0,
            stack_max_override: None,
            code: Vec::new(),
            consts: Vec::new(),
            ids: Vec::new(),
            call_infos: Vec::new(),
            case_tables: Vec::new(),
            inline_cache_count: 0,
            labels: Vec::new(),
            patches: Vec::new(),
            opt_table: Vec::new(),
        }
    }

    pub fn iseq_type(&mut self, t: IseqType) -> &mut Self {
        self.iseq_type = t;
        self
    }

    /// Declare `lead` required parameters out of `locals` total local slots.
    pub fn params(&mut self, lead: usize, locals: usize) -> &mut Self {
        assert!(lead <= locals);
        self.lead_num = lead;
        self.local_size = locals;
        self
    }

    pub fn stack_max(&mut self, n: usize) -> &mut Self {
        self.stack_max_override = Some(n);
        self
    }

    pub fn add_const(&mut self, v: Value) -> usize {
        self.consts.push(v);
        self.consts.len() - 1
    }

    pub fn add_id(&mut self, id: impl Into<String>) -> usize {
        let id = id.into();
        if let Some(i) = self.ids.iter().position(|x| *x == id) {
            return i;
        }
        self.ids.push(id);
        self.ids.len() - 1
    }

    pub fn add_call_info(
        &mut self,
        mid: impl Into<String>,
        argc: u32,
        flags: u32,
        block: Option<Arc<IseqBody>>,
    ) -> usize {
        let mid = self.add_id(mid) as u32;
        self.call_infos.push(CallInfo {
            mid,
            argc,
            flags,
            block,
        });
        self.call_infos.len() - 1
    }

    pub fn add_case_table(&mut self, entries: Vec<(Value, Label)>) -> usize {
        for (k, _) in &entries {
            assert!(
                k.is_special_const(),
                "case table keys must be immediates"
            );
        }
        self.case_tables.push(CaseTable {
            entries: entries.iter().map(|(k, l)| (k.0, l.0 as u32)).collect(),
        });
        self.case_tables.len() - 1
    }

    pub fn new_inline_cache(&mut self) -> usize {
        self.inline_cache_count += 1;
        self.inline_cache_count - 1
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    pub fn place(&mut self, label: Label) -> &mut Self {
        assert!(self.labels[label.0].is_none(), "label placed twice");
        self.labels[label.0] = Some(self.code.len());
        self
    }

    /// Mark an optional-parameter entry point at the current position. The
    /// final call must mark the post-defaults body start.
    pub fn opt_entry(&mut self) -> &mut Self {
        let l = self.new_label();
        self.place(l);
        self.opt_table.push(l);
        self
    }

    pub fn emit(&mut self, op: OpCode, operands: &[usize]) -> &mut Self {
        self.code.extend(make(op, operands));
        self
    }

    /// Emit an instruction whose last operand is a branch target.
    pub fn emit_branch(&mut self, op: OpCode, operands: &[usize], target: Label) -> &mut Self {
        let widths = operand_widths(op);
        assert_eq!(widths.last(), Some(&2), "branch operand must be 2 bytes");
        let mut full = operands.to_vec();
        full.push(0xffff);
        let at = self.code.len() + 1 + widths[..widths.len() - 1].iter().sum::<usize>();
        self.code.extend(make(op, &full));
        self.patches.push((at, target));
        self
    }

    pub fn build(&mut self) -> Result<Arc<IseqBody>, String> {
        let mut code = std::mem::take(&mut self.code);
        for (at, label) in &self.patches {
            let pos = self.labels[label.0]
                .ok_or_else(|| format!("unplaced label in {}", self.name))?;
            if pos > u16::MAX as usize {
                return Err(format!("branch target out of range in {}", self.name));
            }
            code[*at] = (pos >> 8) as u8;
            code[*at + 1] = pos as u8;
        }
        let case_tables = self
            .case_tables
            .drain(..)
            .map(|t| {
                let entries = t
                    .entries
                    .iter()
                    .map(|(k, l)| {
                        let pos = self.labels[*l as usize]
                            .ok_or_else(|| format!("unplaced case label in {}", self.name))?;
                        Ok((*k, pos as u32))
                    })
                    .collect::<Result<Vec<_>, String>>()?;
                Ok(CaseTable { entries })
            })
            .collect::<Result<Vec<_>, String>>()?;
        let opt_table = self
            .opt_table
            .iter()
            .map(|l| {
                self.labels[l.0]
                    .map(|p| p as u32)
                    .ok_or_else(|| format!("unplaced opt entry in {}", self.name))
            })
            .collect::<Result<Vec<_>, String>>()?;

        let call_infos = std::mem::take(&mut self.call_infos);
        let stack_max = match self.stack_max_override {
            Some(n) => n,
            None => compute_stack_max(&code, &call_infos, &case_tables)?,
        };

        let iseq_size = code.len();
        let call_caches = (0..call_infos.len()).map(|_| CallCache::empty()).collect();
        let inline_caches = (0..self.inline_cache_count)
            .map(|_| InlineCache::default())
            .collect();

        Ok(Arc::new(IseqBody {
            name: std::mem::take(&mut self.name),
            iseq_type: self.iseq_type,
            iseq_encoded: code,
            iseq_size,
            stack_max,
            local_size: self.local_size,
            lead_num: self.lead_num,
            opt_table,
            consts: std::mem::take(&mut self.consts),
            ids: std::mem::take(&mut self.ids),
            call_infos,
            call_caches,
            inline_caches,
            case_tables,
            jit_func: AtomicU64::new(NOT_ADDED_FUNC),
            jit_unit: AtomicU32::new(NO_UNIT),
            total_calls: AtomicU64::new(0),
        }))
    }
}

/// (pops, pushes) of one instruction.
pub(crate) fn stack_effect(op: OpCode, operands: &[usize], call_infos: &[CallInfo]) -> (usize, usize) {
    use OpCode::*;
    match op {
        Nop | Jump | Trace => (0, 0),
        PutNil | PutSelf | PutObject | PutString | DupArray | OptStrFreeze | OptStrUminus
        | GetLocal | GetLocal0 | GetLocal1 | GetInstanceVariable | GetClassVariable
        | GetGlobal | GetInlineCache | CheckKeyword | GetBlockParamProxy => (0, 1),
        Dup => (1, 2),
        DupN => (operands[0], operands[0] * 2),
        Swap => (2, 2),
        Pop | SetLocal | SetLocal0 | SetLocal1 | SetInstanceVariable | SetClassVariable
        | SetGlobal | BranchIf | BranchUnless | BranchNil | BranchIfType | OptCaseDispatch => {
            (1, 0)
        }
        TopN => (0, 1),
        SetN => (1, 1),
        Reverse => (operands[0], operands[0]),
        AdjustStack => (operands[0], 0),
        NewArray | NewHash | ConcatStrings => (operands[0], 1),
        NewRange | ConcatArray | CheckMatch | OptRegexpMatch2 => (2, 1),
        SplatArray | ToString | FreezeString | Intern | GetConstant | SetInlineCache
        | OptArefWith | OptLength | OptSize | OptEmptyP | OptSucc | OptNot
        | OptRegexpMatch1 | Defined => (1, 1),
        SetConstant => (2, 0),
        ExpandArray => (1, operands[0] + (operands[1] & 1)),
        ToRegexp => (operands[1], 1),
        Send | OptSendWithoutBlock | InvokeSuper => {
            let argc = call_infos[operands[0]].argc as usize;
            (argc + 1, 1)
        }
        InvokeBlock => {
            let argc = call_infos[operands[0]].argc as usize;
            (argc, 1)
        }
        OptPlus | OptMinus | OptMult | OptDiv | OptMod | OptEq | OptNeq | OptLt | OptLe
        | OptGt | OptGe | OptLtLt | OptAref => (2, 1),
        OptAset => (3, 1),
        OptAsetWith => (2, 1),
        Leave | Throw => (1, 0),
        DefineClass | OptCallCFunction => (0, 1),
    }
}

/// Walks every reachable branch and returns the maximum operand-stack depth.
fn compute_stack_max(
    code: &Instructions,
    call_infos: &[CallInfo],
    case_tables: &[CaseTable],
) -> Result<usize, String> {
    let mut max = 0usize;
    let mut seen = vec![false; code.len()];
    let mut work = vec![(0usize, 0usize)];

    while let Some((mut pos, mut depth)) = work.pop() {
        while pos < code.len() && !seen[pos] {
            seen[pos] = true;
            let (op, operands, next) = decode(code, pos);
            let (pops, pushes) = stack_effect(op, &operands, call_infos);
            if depth < pops {
                return Err(format!("stack underflow at {} ({})", pos, op));
            }
            depth = depth - pops + pushes;
            max = max.max(depth);
            match op {
                OpCode::Leave | OpCode::Throw => break,
                OpCode::Jump => {
                    pos = operands[0];
                }
                OpCode::BranchIf
                | OpCode::BranchUnless
                | OpCode::BranchNil => {
                    work.push((operands[0], depth));
                    pos = next;
                }
                OpCode::BranchIfType => {
                    work.push((operands[1], depth));
                    pos = next;
                }
                OpCode::GetInlineCache => {
                    work.push((operands[1], depth));
                    pos = next;
                }
                OpCode::OptCaseDispatch => {
                    // all case-table edges carry the same post-pop depth
                    for (_, target) in &case_tables[operands[0]].entries {
                        work.push((*target as usize, depth));
                    }
                    work.push((operands[1], depth));
                    break;
                }
                _ => pos = next,
            }
        }
    }
    Ok(max)
}

