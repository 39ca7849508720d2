//! Bytecode-to-C translator.
//!
//! `compile` writes one self-contained translation unit exposing
//! `VALUE <funcname>(em_execution_context_t *, em_control_frame_t *)`.
//! The generated function mirrors the operand stack in a local `stack`
//! array sized by the body's `stack_max`; the interpreter's stack is only
//! written before re-entering the host and in the trailing `cancel:` block,
//! which restores every slot and returns the undefined sentinel.
//!
//! Branches are translated by emitting the taken edge as a `goto` and then
//! recursively compiling the fall-through before the taken target, so each
//! branch is entered with the stack depth it was reached with. Positions
//! already emitted become `goto label_<pos>`.

use std::io::{self, Write};
use std::sync::atomic::Ordering;

use crate::bytecode::iseq::{
    CC_KIND_ISEQ_SIMPLE, CC_KIND_NATIVE, IseqBody, stack_effect,
};
use crate::bytecode::op_code::{OpCode, decode};
use crate::jit::options::JitOptions;

/// State global to one `compile` call.
struct CompileStatus<'a> {
    success: bool,
    compiled_for_pos: Vec<bool>,
    opts: &'a JitOptions,
}

impl CompileStatus<'_> {
    fn fail(&mut self, body: &IseqBody, msg: &str) {
        if self.opts.warnings || self.opts.verbose >= 3 {
            eprintln!("JIT warning: {} ({})", msg, body.name);
        }
        self.success = false;
    }
}

/// State local to one branch of control flow.
struct CompileBranch {
    stack_size: usize,
    finish: bool,
}

/// Trace flags that carry the current stack top as the event value.
const TRACE_RETURN_FLAGS: usize = 0x04 | 0x20;

/// Translate `body` into C, returning the success flag. On failure the
/// emitted text is garbage and the caller discards the file.
pub fn compile(
    f: &mut dyn Write,
    body: &IseqBody,
    funcname: &str,
    opts: &JitOptions,
) -> io::Result<bool> {
    let mut status = CompileStatus {
        success: true,
        compiled_for_pos: vec![false; body.iseq_size],
        opts,
    };

    writeln!(f, "/* {}: {} */", funcname, body.name)?;
    writeln!(f, "struct em_helper_table em_helpers;")?;
    writeln!(f)?;
    writeln!(
        f,
        "VALUE {}(em_execution_context_t *ec, em_control_frame_t *cfp) {{",
        funcname
    )?;
    if body.stack_max > 0 {
        writeln!(f, "  VALUE stack[{}];", body.stack_max)?;
    }
    writeln!(f, "  VALUE v;")?;
    writeln!(f, "  int64_t t;")?;

    // optional-argument prologue: resume at the entry the caller's argc chose
    if body.has_opt() {
        for off in &body.opt_table {
            writeln!(f, "  if (cfp->pc == {}) goto label_{};", off, off)?;
        }
    }

    compile_insns(f, body, 0, 0, &mut status)?;
    if body.has_opt() {
        for off in body.opt_table.clone() {
            let off = off as usize;
            if !status.compiled_for_pos[off] {
                compile_insns(f, body, 0, off, &mut status)?;
            }
        }
    }

    writeln!(f)?;
    writeln!(f, "cancel:")?;
    for i in 0..body.stack_max {
        writeln!(f, "  cfp->stack_bottom[{}] = stack[{}];", i, i)?;
    }
    writeln!(f, "  return EM_QUNDEF;")?;
    writeln!(f, "}}")?;

    Ok(status.success)
}

/// Compile one straight-line branch starting at `pos` with depth
/// `stack_size`; conditional instructions recurse for their edges.
fn compile_insns(
    f: &mut dyn Write,
    body: &IseqBody,
    stack_size: usize,
    pos: usize,
    status: &mut CompileStatus,
) -> io::Result<()> {
    let mut b = CompileBranch {
        stack_size,
        finish: false,
    };
    let mut pos = pos;

    while pos < body.iseq_size && !status.compiled_for_pos[pos] && !b.finish {
        status.compiled_for_pos[pos] = true;
        let (op, operands, next) = decode(&body.iseq_encoded, pos);

        writeln!(f)?;
        writeln!(f, "label_{}: /* {} */", pos, op)?;
        pos = compile_insn(f, body, op, &operands, pos, next, status, &mut b)?;

        if status.success && b.stack_size > body.stack_max {
            status.fail(body, "stack size exceeded its max");
        }
        if !status.success {
            break;
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn compile_insn(
    f: &mut dyn Write,
    body: &IseqBody,
    op: OpCode,
    operands: &[usize],
    pos: usize,
    next: usize,
    status: &mut CompileStatus,
    b: &mut CompileBranch,
) -> io::Result<usize> {
    // keep the frame pc coherent for traces, caches, and deoptimization
    writeln!(f, "  cfp->pc = {};", pos)?;

    let (pops, _) = stack_effect(op, operands, &body.call_infos);
    if b.stack_size < pops {
        status.fail(body, "stack underflow during translation");
        return Ok(next);
    }
    let ss = b.stack_size;

    match op {
        OpCode::Nop => {}
        OpCode::PutNil => {
            writeln!(f, "  stack[{}] = EM_QNIL;", ss)?;
            b.stack_size += 1;
        }
        OpCode::PutSelf => {
            writeln!(f, "  stack[{}] = cfp->self;", ss)?;
            b.stack_size += 1;
        }
        OpCode::PutObject => {
            writeln!(f, "  stack[{}] = em_helpers.iseq_const(cfp, {});", ss, operands[0])?;
            b.stack_size += 1;
        }
        OpCode::PutString => {
            writeln!(
                f,
                "  stack[{}] = em_helpers.str_resurrect(ec, cfp, {});",
                ss, operands[0]
            )?;
            b.stack_size += 1;
        }
        OpCode::Dup => {
            writeln!(f, "  stack[{}] = stack[{}];", ss, ss - 1)?;
            b.stack_size += 1;
        }
        OpCode::DupN => {
            let n = operands[0];
            for i in 0..n {
                writeln!(f, "  stack[{}] = stack[{}];", ss + i, ss - n + i)?;
            }
            b.stack_size += n;
        }
        OpCode::Swap => {
            writeln!(f, "  v = stack[{}];", ss - 1)?;
            writeln!(f, "  stack[{}] = stack[{}];", ss - 1, ss - 2)?;
            writeln!(f, "  stack[{}] = v;", ss - 2)?;
        }
        OpCode::Pop => {
            b.stack_size -= 1;
        }
        OpCode::TopN => {
            writeln!(f, "  stack[{}] = stack[{}];", ss, ss - 1 - operands[0])?;
            b.stack_size += 1;
        }
        OpCode::SetN => {
            writeln!(f, "  stack[{}] = stack[{}];", ss - 1 - operands[0], ss - 1)?;
        }
        OpCode::Reverse => {
            let n = operands[0];
            for i in 0..n / 2 {
                writeln!(f, "  v = stack[{}];", ss - 1 - i)?;
                writeln!(f, "  stack[{}] = stack[{}];", ss - 1 - i, ss - n + i)?;
                writeln!(f, "  stack[{}] = v;", ss - n + i)?;
            }
        }
        OpCode::AdjustStack => {
            b.stack_size -= operands[0];
        }

        OpCode::GetLocal | OpCode::GetLocal0 | OpCode::GetLocal1 => {
            let (idx, level) = local_operands(op, operands);
            writeln!(f, "  stack[{}] = *({} - {});", ss, ep_expr(level), idx)?;
            b.stack_size += 1;
        }
        OpCode::SetLocal | OpCode::SetLocal0 | OpCode::SetLocal1 => {
            let (idx, level) = local_operands(op, operands);
            writeln!(f, "  *({} - {}) = stack[{}];", ep_expr(level), idx, ss - 1)?;
            b.stack_size -= 1;
        }

        OpCode::NewArray => {
            let n = operands[0];
            writeln!(
                f,
                "  v = em_helpers.new_array(ec, stack + {}, {});",
                ss - n,
                n
            )?;
            writeln!(f, "  stack[{}] = v;", ss - n)?;
            b.stack_size = ss - n + 1;
        }
        OpCode::NewHash => {
            let n = operands[0];
            writeln!(f, "  v = em_helpers.new_hash(ec, stack + {}, {});", ss - n, n)?;
            writeln!(f, "  stack[{}] = v;", ss - n)?;
            b.stack_size = ss - n + 1;
        }
        OpCode::NewRange => {
            writeln!(
                f,
                "  v = em_helpers.new_range(ec, stack[{}], stack[{}], {});",
                ss - 2,
                ss - 1,
                operands[0]
            )?;
            writeln!(f, "  stack[{}] = v;", ss - 2)?;
            b.stack_size -= 1;
        }
        OpCode::DupArray => {
            writeln!(
                f,
                "  stack[{}] = em_helpers.dup_array(ec, cfp, {});",
                ss, operands[0]
            )?;
            b.stack_size += 1;
        }
        OpCode::SplatArray => {
            writeln!(
                f,
                "  stack[{}] = em_helpers.splat_array(ec, stack[{}], {});",
                ss - 1,
                ss - 1,
                operands[0]
            )?;
        }
        OpCode::ConcatArray => {
            writeln!(
                f,
                "  v = em_helpers.concat_array(ec, stack[{}], stack[{}]);",
                ss - 2,
                ss - 1
            )?;
            writeln!(f, "  stack[{}] = v;", ss - 2)?;
            b.stack_size -= 1;
        }
        OpCode::ExpandArray => {
            let n = operands[0];
            let flag = operands[1];
            let new_ss = ss - 1 + n + (flag & 1);
            writeln!(f, "  cfp->stack_bottom[{}] = stack[{}];", ss - 1, ss - 1)?;
            writeln!(f, "  cfp->sp = cfp->stack_bottom + {};", ss)?;
            writeln!(f, "  em_helpers.expand_array(ec, cfp, {}, {});", n, flag)?;
            for i in (ss - 1)..new_ss {
                writeln!(f, "  stack[{}] = cfp->stack_bottom[{}];", i, i)?;
            }
            b.stack_size = new_ss;
        }
        OpCode::ToRegexp => {
            let n = operands[1];
            writeln!(
                f,
                "  v = em_helpers.to_regexp(ec, stack + {}, {}, {});",
                ss - n,
                n,
                operands[0]
            )?;
            writeln!(f, "  if (v == EM_QUNDEF) {{")?;
            writeln!(f, "    cfp->sp = cfp->stack_bottom + {};", ss - n)?;
            writeln!(f, "    return EM_QUNDEF;")?;
            writeln!(f, "  }}")?;
            writeln!(f, "  stack[{}] = v;", ss - n)?;
            b.stack_size = ss - n + 1;
        }

        OpCode::ConcatStrings => {
            let n = operands[0];
            writeln!(
                f,
                "  v = em_helpers.concat_strings(ec, stack + {}, {});",
                ss - n,
                n
            )?;
            writeln!(f, "  stack[{}] = v;", ss - n)?;
            b.stack_size = ss - n + 1;
        }
        OpCode::ToString => {
            writeln!(
                f,
                "  stack[{}] = em_helpers.obj_to_string(ec, stack[{}]);",
                ss - 1,
                ss - 1
            )?;
        }
        OpCode::FreezeString => {
            writeln!(
                f,
                "  stack[{}] = em_helpers.str_freeze(ec, stack[{}]);",
                ss - 1,
                ss - 1
            )?;
        }
        OpCode::Intern => {
            writeln!(
                f,
                "  stack[{}] = em_helpers.str_intern(ec, stack[{}]);",
                ss - 1,
                ss - 1
            )?;
        }
        OpCode::OptStrFreeze | OpCode::OptStrUminus => {
            let helper = if op == OpCode::OptStrFreeze {
                "opt_str_freeze"
            } else {
                "opt_str_uminus"
            };
            writeln!(f, "  v = em_helpers.{}(ec, cfp, {});", helper, operands[0])?;
            emit_cancel_guard(f, ss)?;
            writeln!(f, "  stack[{}] = v;", ss)?;
            b.stack_size += 1;
        }

        OpCode::GetInstanceVariable => {
            writeln!(
                f,
                "  stack[{}] = em_helpers.getivar(ec, cfp, {});",
                ss, operands[0]
            )?;
            b.stack_size += 1;
        }
        OpCode::SetInstanceVariable => {
            writeln!(
                f,
                "  em_helpers.setivar(ec, cfp, {}, stack[{}]);",
                operands[0],
                ss - 1
            )?;
            b.stack_size -= 1;
        }
        OpCode::GetClassVariable => {
            writeln!(f, "  v = em_helpers.getcvar(ec, cfp, {});", operands[0])?;
            emit_cancel_guard(f, ss)?;
            writeln!(f, "  stack[{}] = v;", ss)?;
            b.stack_size += 1;
        }
        OpCode::SetClassVariable => {
            writeln!(
                f,
                "  em_helpers.setcvar(ec, cfp, {}, stack[{}]);",
                operands[0],
                ss - 1
            )?;
            b.stack_size -= 1;
        }
        OpCode::GetConstant => {
            writeln!(
                f,
                "  v = em_helpers.getconst(ec, cfp, {}, stack[{}]);",
                operands[0],
                ss - 1
            )?;
            emit_cancel_guard(f, ss)?;
            writeln!(f, "  stack[{}] = v;", ss - 1)?;
        }
        OpCode::SetConstant => {
            writeln!(
                f,
                "  if (!em_helpers.setconst(ec, cfp, {}, stack[{}], stack[{}])) {{",
                operands[0],
                ss - 2,
                ss - 1
            )?;
            writeln!(f, "    cfp->sp = cfp->stack_bottom + {};", ss)?;
            writeln!(f, "    goto cancel;")?;
            writeln!(f, "  }}")?;
            b.stack_size -= 2;
        }
        OpCode::GetGlobal => {
            writeln!(
                f,
                "  stack[{}] = em_helpers.getglobal(ec, cfp, {});",
                ss, operands[0]
            )?;
            b.stack_size += 1;
        }
        OpCode::SetGlobal => {
            writeln!(
                f,
                "  em_helpers.setglobal(ec, cfp, {}, stack[{}]);",
                operands[0],
                ss - 1
            )?;
            b.stack_size -= 1;
        }

        OpCode::GetInlineCache => {
            let dst = operands[1];
            writeln!(f, "  if (em_helpers.ic_hit(ec, cfp, {})) {{", operands[0])?;
            writeln!(f, "    stack[{}] = em_helpers.ic_get(cfp, {});", ss, operands[0])?;
            writeln!(f, "    em_helpers.check_ints(ec);")?;
            writeln!(f, "    goto label_{};", dst)?;
            writeln!(f, "  }}")?;
            writeln!(f, "  stack[{}] = EM_QNIL;", ss)?;
            b.stack_size += 1;
            return branch_edges(f, body, b.stack_size, next, dst, status, b).map(|_| next);
        }
        OpCode::SetInlineCache => {
            writeln!(
                f,
                "  em_helpers.ic_update(ec, cfp, {}, stack[{}]);",
                operands[0],
                ss - 1
            )?;
        }

        OpCode::Jump => {
            let dst = operands[0];
            writeln!(f, "  em_helpers.check_ints(ec);")?;
            writeln!(f, "  goto label_{};", dst)?;
            if !status.compiled_for_pos[dst] {
                compile_insns(f, body, b.stack_size, dst, status)?;
            }
            b.finish = true;
        }
        OpCode::BranchIf | OpCode::BranchUnless | OpCode::BranchNil => {
            let dst = operands[0];
            let test = match op {
                OpCode::BranchIf => format!("EM_RTEST(stack[{}])", ss - 1),
                OpCode::BranchUnless => format!("!EM_RTEST(stack[{}])", ss - 1),
                _ => format!("EM_NIL_P(stack[{}])", ss - 1),
            };
            writeln!(f, "  if ({}) {{", test)?;
            writeln!(f, "    em_helpers.check_ints(ec);")?;
            writeln!(f, "    goto label_{};", dst)?;
            writeln!(f, "  }}")?;
            b.stack_size -= 1;
            return branch_edges(f, body, b.stack_size, next, dst, status, b).map(|_| next);
        }
        OpCode::BranchIfType => {
            let dst = operands[1];
            writeln!(
                f,
                "  if (em_helpers.value_class(stack[{}]) == {}) {{",
                ss - 1,
                operands[0]
            )?;
            writeln!(f, "    em_helpers.check_ints(ec);")?;
            writeln!(f, "    goto label_{};", dst)?;
            writeln!(f, "  }}")?;
            b.stack_size -= 1;
            return branch_edges(f, body, b.stack_size, next, dst, status, b).map(|_| next);
        }
        OpCode::OptCaseDispatch => {
            let table = &body.case_tables[operands[0]];
            let else_dst = operands[1];
            writeln!(
                f,
                "  t = em_helpers.case_lookup(cfp, {}, stack[{}]);",
                operands[0],
                ss - 1
            )?;
            writeln!(f, "  em_helpers.check_ints(ec);")?;
            b.stack_size -= 1;
            let mut targets: Vec<usize> = table.entries.iter().map(|(_, t)| *t as usize).collect();
            targets.sort_unstable();
            targets.dedup();
            for target in &targets {
                writeln!(f, "  if (t == {}) goto label_{};", target, target)?;
            }
            writeln!(f, "  goto label_{};", else_dst)?;
            let depth = b.stack_size;
            for target in targets.into_iter().chain(std::iter::once(else_dst)) {
                if !status.compiled_for_pos[target] {
                    compile_insns(f, body, depth, target, status)?;
                }
            }
            b.finish = true;
        }

        OpCode::Send | OpCode::OptSendWithoutBlock => {
            compile_send(f, body, operands[0], op == OpCode::Send, status, b)?;
        }
        OpCode::InvokeSuper => {
            let argc = body.call_infos[operands[0]].argc as usize;
            emit_stack_writeback(f, ss)?;
            writeln!(f, "  v = em_helpers.invokesuper(ec, cfp, {});", operands[0])?;
            emit_undef_return(f, ss - argc - 1)?;
            writeln!(f, "  stack[{}] = v;", ss - argc - 1)?;
            b.stack_size = ss - argc;
        }
        OpCode::InvokeBlock => {
            let argc = body.call_infos[operands[0]].argc as usize;
            emit_stack_writeback(f, ss)?;
            writeln!(f, "  v = em_helpers.invokeblock(ec, cfp, {});", operands[0])?;
            emit_undef_return(f, ss - argc)?;
            writeln!(f, "  stack[{}] = v;", ss - argc)?;
            b.stack_size = ss - argc + 1;
        }

        OpCode::OptPlus
        | OpCode::OptMinus
        | OpCode::OptMult
        | OpCode::OptDiv
        | OpCode::OptMod
        | OpCode::OptEq
        | OpCode::OptNeq
        | OpCode::OptLt
        | OpCode::OptLe
        | OpCode::OptGt
        | OpCode::OptGe
        | OpCode::OptLtLt
        | OpCode::OptAref
        | OpCode::OptRegexpMatch2 => {
            writeln!(
                f,
                "  v = em_helpers.{}(ec, stack[{}], stack[{}]);",
                opt_helper_name(op),
                ss - 2,
                ss - 1
            )?;
            emit_cancel_guard(f, ss)?;
            writeln!(f, "  stack[{}] = v;", ss - 2)?;
            b.stack_size -= 1;
        }
        OpCode::OptAset => {
            writeln!(
                f,
                "  v = em_helpers.opt_aset(ec, stack[{}], stack[{}], stack[{}]);",
                ss - 3,
                ss - 2,
                ss - 1
            )?;
            emit_cancel_guard(f, ss)?;
            writeln!(f, "  stack[{}] = v;", ss - 3)?;
            b.stack_size -= 2;
        }
        OpCode::OptArefWith => {
            writeln!(
                f,
                "  v = em_helpers.opt_aref_with(ec, cfp, {}, stack[{}]);",
                operands[0],
                ss - 1
            )?;
            emit_cancel_guard(f, ss)?;
            writeln!(f, "  stack[{}] = v;", ss - 1)?;
        }
        OpCode::OptAsetWith => {
            writeln!(
                f,
                "  v = em_helpers.opt_aset_with(ec, cfp, {}, stack[{}], stack[{}]);",
                operands[0],
                ss - 2,
                ss - 1
            )?;
            emit_cancel_guard(f, ss)?;
            writeln!(f, "  stack[{}] = v;", ss - 2)?;
            b.stack_size -= 1;
        }
        OpCode::OptLength
        | OpCode::OptSize
        | OpCode::OptEmptyP
        | OpCode::OptSucc
        | OpCode::OptNot => {
            writeln!(
                f,
                "  v = em_helpers.{}(ec, stack[{}]);",
                opt_helper_name(op),
                ss - 1
            )?;
            emit_cancel_guard(f, ss)?;
            writeln!(f, "  stack[{}] = v;", ss - 1)?;
        }
        OpCode::OptRegexpMatch1 => {
            writeln!(
                f,
                "  v = em_helpers.opt_rx_match1(ec, cfp, {}, stack[{}]);",
                operands[0],
                ss - 1
            )?;
            emit_cancel_guard(f, ss)?;
            writeln!(f, "  stack[{}] = v;", ss - 1)?;
        }

        OpCode::Trace => {
            let flag = operands[0];
            if flag & TRACE_RETURN_FLAGS != 0 && ss > 0 {
                writeln!(f, "  em_helpers.trace(ec, cfp, {}, stack[{}]);", flag, ss - 1)?;
            } else {
                writeln!(f, "  em_helpers.trace(ec, cfp, {}, EM_QUNDEF);", flag)?;
            }
        }
        OpCode::Defined => {
            writeln!(
                f,
                "  stack[{}] = em_helpers.defined(ec, cfp, {}, {}, stack[{}]);",
                ss - 1,
                operands[0],
                operands[1],
                ss - 1
            )?;
        }
        OpCode::CheckMatch => {
            writeln!(
                f,
                "  v = em_helpers.check_match(ec, stack[{}], stack[{}], {});",
                ss - 2,
                ss - 1,
                operands[0]
            )?;
            writeln!(f, "  stack[{}] = v;", ss - 2)?;
            b.stack_size -= 1;
        }
        OpCode::CheckKeyword => {
            writeln!(
                f,
                "  stack[{}] = em_helpers.check_keyword(cfp, {}, {});",
                ss, operands[0], operands[1]
            )?;
            b.stack_size += 1;
        }

        OpCode::Leave => {
            if b.stack_size != 1 {
                status.fail(body, "unexpected stack size on leave");
                return Ok(next);
            }
            writeln!(f, "  em_helpers.check_ints(ec);")?;
            writeln!(f, "  em_helpers.pop_frame(ec);")?;
            writeln!(f, "  return stack[0];")?;
            b.finish = true;
        }
        OpCode::Throw => {
            writeln!(f, "  cfp->sp = cfp->stack_bottom + {};", ss - 1)?;
            writeln!(
                f,
                "  return em_helpers.vm_throw(ec, cfp, {}, stack[{}]);",
                operands[0],
                ss - 1
            )?;
            b.finish = true;
        }

        OpCode::GetBlockParamProxy | OpCode::DefineClass | OpCode::OptCallCFunction => {
            status.fail(body, &format!("failed to compile instruction: {}", op));
            return Ok(next);
        }
    }

    // fall-through into an already-compiled position must jump to its label
    if !b.finish && next < body.iseq_size && status.compiled_for_pos[next] {
        writeln!(f, "  goto label_{};", next)?;
        b.finish = true;
    }

    Ok(next)
}

/// Call-site emission. Shape depends on what the interpreter's call cache
/// observed: a cached native method gets a guarded direct call, a cached
/// simple bytecode method gets a guarded inline frame push, everything else
/// (including sends with blocks) goes through the generic dispatcher.
fn compile_send(
    f: &mut dyn Write,
    body: &IseqBody,
    ci_idx: usize,
    with_block: bool,
    _status: &mut CompileStatus,
    b: &mut CompileBranch,
) -> io::Result<()> {
    let ss = b.stack_size;
    let argc = body.call_infos[ci_idx].argc as usize;
    let has_block = with_block && body.call_infos[ci_idx].block.is_some();
    let kind = body.call_caches[ci_idx].method_kind.load(Ordering::Relaxed);
    let recv_slot = ss - argc - 1;

    emit_stack_writeback(f, ss)?;

    if !has_block && kind == CC_KIND_NATIVE {
        writeln!(
            f,
            "  if (em_helpers.cc_invalid_p(ec, cfp, {}, stack[{}])) goto cancel;",
            ci_idx, recv_slot
        )?;
        writeln!(f, "  v = em_helpers.call_cached_native(ec, cfp, {});", ci_idx)?;
        writeln!(f, "  if (v == EM_QUNDEF) {{")?;
        writeln!(f, "    if (ec->errinfo != EM_QNIL) {{")?;
        writeln!(f, "      cfp->sp = cfp->stack_bottom + {};", recv_slot)?;
        writeln!(f, "      return EM_QUNDEF;")?;
        writeln!(f, "    }}")?;
        writeln!(f, "    goto cancel;")?;
        writeln!(f, "  }}")?;
    } else if !has_block && kind == CC_KIND_ISEQ_SIMPLE {
        writeln!(
            f,
            "  if (em_helpers.cc_invalid_p(ec, cfp, {}, stack[{}])) goto cancel;",
            ci_idx, recv_slot
        )?;
        writeln!(f, "  if (!em_helpers.push_iseq_frame(ec, cfp, {})) {{", ci_idx)?;
        writeln!(f, "    cfp->sp = cfp->stack_bottom + {};", ss)?;
        writeln!(f, "    return EM_QUNDEF;")?;
        writeln!(f, "  }}")?;
        writeln!(f, "  v = em_helpers.jit_exec(ec);")?;
        writeln!(f, "  if (v == EM_QUNDEF)")?;
        writeln!(f, "    v = em_helpers.exec_finish(ec);")?;
        emit_undef_return(f, recv_slot)?;
    } else {
        writeln!(
            f,
            "  v = em_helpers.call_general(ec, cfp, {}, {});",
            ci_idx,
            if has_block { 1 } else { 0 }
        )?;
        emit_undef_return(f, recv_slot)?;
    }

    writeln!(f, "  stack[{}] = v;", recv_slot)?;
    b.stack_size = ss - argc;
    Ok(())
}

/// Compile the fall-through edge, then the taken edge, each with the depth
/// the branch leaves behind. Already-compiled targets keep their labels.
#[allow(clippy::too_many_arguments)]
fn branch_edges(
    f: &mut dyn Write,
    body: &IseqBody,
    stack_size: usize,
    fallthrough: usize,
    taken: usize,
    status: &mut CompileStatus,
    b: &mut CompileBranch,
) -> io::Result<()> {
    if status.compiled_for_pos[fallthrough] {
        writeln!(f, "  goto label_{};", fallthrough)?;
    } else {
        compile_insns(f, body, stack_size, fallthrough, status)?;
    }
    if status.success && !status.compiled_for_pos[taken] {
        compile_insns(f, body, stack_size, taken, status)?;
    }
    b.finish = true;
    Ok(())
}

/// Guard after a helper that signals "unsupported shape" with the sentinel:
/// restore sp for the un-executed instruction and deoptimize.
fn emit_cancel_guard(f: &mut dyn Write, ss: usize) -> io::Result<()> {
    writeln!(f, "  if (v == EM_QUNDEF) {{")?;
    writeln!(f, "    cfp->sp = cfp->stack_bottom + {};", ss)?;
    writeln!(f, "    goto cancel;")?;
    writeln!(f, "  }}")?;
    Ok(())
}

/// Guard after a completed call: the sentinel here means an error or throw
/// is propagating, so hand control straight back to the host.
fn emit_undef_return(f: &mut dyn Write, sp: usize) -> io::Result<()> {
    writeln!(f, "  if (v == EM_QUNDEF) {{")?;
    writeln!(f, "    cfp->sp = cfp->stack_bottom + {};", sp)?;
    writeln!(f, "    return EM_QUNDEF;")?;
    writeln!(f, "  }}")?;
    Ok(())
}

fn emit_stack_writeback(f: &mut dyn Write, ss: usize) -> io::Result<()> {
    for i in 0..ss {
        writeln!(f, "  cfp->stack_bottom[{}] = stack[{}];", i, i)?;
    }
    writeln!(f, "  cfp->sp = cfp->stack_bottom + {};", ss)?;
    Ok(())
}

fn local_operands(op: OpCode, operands: &[usize]) -> (usize, usize) {
    match op {
        OpCode::GetLocal | OpCode::SetLocal => (operands[0], operands[1]),
        OpCode::GetLocal0 | OpCode::SetLocal0 => (operands[0], 0),
        _ => (operands[0], 1),
    }
}

fn ep_expr(level: usize) -> String {
    if level == 0 {
        "cfp->ep".to_string()
    } else {
        format!("em_helpers.ep_at(cfp, {})", level)
    }
}

fn opt_helper_name(op: OpCode) -> &'static str {
    match op {
        OpCode::OptPlus => "opt_plus",
        OpCode::OptMinus => "opt_minus",
        OpCode::OptMult => "opt_mult",
        OpCode::OptDiv => "opt_div",
        OpCode::OptMod => "opt_mod",
        OpCode::OptEq => "opt_eq",
        OpCode::OptNeq => "opt_neq",
        OpCode::OptLt => "opt_lt",
        OpCode::OptLe => "opt_le",
        OpCode::OptGt => "opt_gt",
        OpCode::OptGe => "opt_ge",
        OpCode::OptLtLt => "opt_ltlt",
        OpCode::OptAref => "opt_aref",
        OpCode::OptRegexpMatch2 => "opt_rx_match2",
        OpCode::OptLength => "opt_length",
        OpCode::OptSize => "opt_size",
        OpCode::OptEmptyP => "opt_empty_p",
        OpCode::OptSucc => "opt_succ",
        OpCode::OptNot => "opt_not",
        _ => unreachable!(),
    }
}

