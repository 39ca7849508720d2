//! End-to-end engine tests: real C compiler, real shared objects, real
//! native re-entry. Every test that needs the external toolchain skips
//! cleanly when no compiler is installed, so the suite stays green on
//! minimal machines.
//!
//! Engine instances share pid-scoped scratch names, so tests that bring up
//! an engine serialize on one lock.

use std::sync::atomic::Ordering;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::{Duration, Instant};

use ember::bytecode::iseq::{
    BodyBuilder, CI_FCALL, FIRST_FUNC, IseqBody, IseqType, NOT_COMPILABLE_FUNC,
};
use ember::bytecode::op_code::OpCode;
use ember::jit::options::{JitCc, JitOptions};
use ember::jit::toolchain::resolve_cc;
use ember::jit::{CALLS_TO_JIT, Jit};
use ember::runtime::builtins::register_builtins;
use ember::runtime::context::ExecutionContext;
use ember::runtime::heap::ClassId;
use ember::runtime::method::Visibility;
use ember::runtime::value::Value;
use ember::runtime::vm::run_body;

static ENGINE_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

fn compiler_available() -> bool {
    resolve_cc(JitCc::Gcc).is_ok()
}

fn new_ec() -> Box<ExecutionContext> {
    let mut ec = ExecutionContext::new();
    register_builtins(&mut ec.host.methods);
    ec
}

fn start_engine(extra: &str) -> Arc<Jit> {
    let opts = JitOptions::parse(&format!("on{}", extra)).unwrap();
    Jit::init(opts).expect("engine init")
}

/// def double(x) = x + x
fn double_method() -> Arc<IseqBody> {
    let mut b = BodyBuilder::new("double");
    b.iseq_type(IseqType::Method);
    b.params(1, 1);
    let ci = b.add_call_info("+", 1, 0, None);
    b.emit(OpCode::GetLocal0, &[1]);
    b.emit(OpCode::GetLocal0, &[1]);
    b.emit(OpCode::OptPlus, &[ci]);
    b.emit(OpCode::Leave, &[]);
    b.build().unwrap()
}

fn caller_of(name: &str, arg: i64) -> Arc<IseqBody> {
    let mut b = BodyBuilder::new("caller");
    let c = b.add_const(Value::fixnum(arg));
    let ci = b.add_call_info(name, 1, CI_FCALL, None);
    b.emit(OpCode::PutSelf, &[]);
    b.emit(OpCode::PutObject, &[c]);
    b.emit(OpCode::OptSendWithoutBlock, &[ci]);
    b.emit(OpCode::Leave, &[]);
    b.build().unwrap()
}

fn wait_for_slot(body: &IseqBody, pred: impl Fn(u64) -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(60);
    while Instant::now() < deadline {
        if pred(body.jit_func.load(Ordering::Acquire)) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    false
}

#[test]
fn engine_starts_and_finishes_with_no_work() {
    let _guard = ENGINE_LOCK.lock().unwrap();
    if !compiler_available() {
        eprintln!("skipping: no C compiler on PATH");
        return;
    }
    let jit = start_engine("");
    assert!(jit.active());
    jit.finish();
    assert!(!jit.active());
    // finish is idempotent
    jit.finish();
}

#[test]
fn hot_method_compiles_and_returns_the_same_result() {
    let _guard = ENGINE_LOCK.lock().unwrap();
    if !compiler_available() {
        eprintln!("skipping: no C compiler on PATH");
        return;
    }

    let mut ec = new_ec();
    let double = double_method();
    ec.host.methods.define_iseq(
        ClassId::NilClass,
        "double",
        Visibility::Public,
        double.clone(),
    );
    let jit = start_engine("");
    ec.host.jit = Some(jit.clone());

    // interpret until the call-count threshold queues the body
    for _ in 0..CALLS_TO_JIT + 1 {
        let v = run_body(&mut ec, caller_of("double", 21)).unwrap();
        assert_eq!(v, Value::fixnum(42));
    }
    assert!(
        wait_for_slot(&double, |slot| slot >= FIRST_FUNC),
        "double was never compiled"
    );

    // now the call runs through the published native function
    for _ in 0..3 {
        let v = run_body(&mut ec, caller_of("double", 21)).unwrap();
        assert_eq!(v, Value::fixnum(42));
    }

    jit.finish();
}

#[test]
fn native_code_deoptimizes_when_a_basic_op_is_redefined() {
    let _guard = ENGINE_LOCK.lock().unwrap();
    if !compiler_available() {
        eprintln!("skipping: no C compiler on PATH");
        return;
    }

    let mut ec = new_ec();
    let double = double_method();
    ec.host.methods.define_iseq(
        ClassId::NilClass,
        "double",
        Visibility::Public,
        double.clone(),
    );
    let jit = start_engine("");
    ec.host.jit = Some(jit.clone());

    for _ in 0..CALLS_TO_JIT + 1 {
        run_body(&mut ec, caller_of("double", 21)).unwrap();
    }
    assert!(wait_for_slot(&double, |slot| slot >= FIRST_FUNC));
    assert_eq!(
        run_body(&mut ec, caller_of("double", 21)).unwrap(),
        Value::fixnum(42)
    );

    // redefining Integer#+ must make the compiled opt_plus cancel and the
    // interpreter dispatch the new method instead
    fn always_seven(
        _: &mut ExecutionContext,
        _: Value,
        _: &[Value],
    ) -> Result<Value, String> {
        Ok(Value::fixnum(7))
    }
    ec.host
        .methods
        .define_native(ClassId::Integer, "+", Visibility::Public, always_seven);

    assert_eq!(
        run_body(&mut ec, caller_of("double", 21)).unwrap(),
        Value::fixnum(7)
    );

    jit.finish();
}

#[test]
fn unsupported_instruction_marks_body_not_compilable() {
    let _guard = ENGINE_LOCK.lock().unwrap();
    if !compiler_available() {
        eprintln!("skipping: no C compiler on PATH");
        return;
    }

    // getblockparamproxy keeps the body interpreter-only
    let mut m = BodyBuilder::new("uses_proxy");
    m.iseq_type(IseqType::Method);
    m.emit(OpCode::GetBlockParamProxy, &[]);
    m.emit(OpCode::Leave, &[]);
    let method = m.build().unwrap();

    let mut ec = new_ec();
    ec.host.methods.define_iseq(
        ClassId::NilClass,
        "uses_proxy",
        Visibility::Public,
        method.clone(),
    );
    let jit = start_engine("");
    ec.host.jit = Some(jit.clone());

    let mut b = BodyBuilder::new("caller");
    let ci = b.add_call_info("uses_proxy", 0, CI_FCALL, None);
    b.emit(OpCode::PutSelf, &[]);
    b.emit(OpCode::OptSendWithoutBlock, &[ci]);
    b.emit(OpCode::Leave, &[]);
    let caller = b.build().unwrap();

    for _ in 0..CALLS_TO_JIT + 1 {
        assert_eq!(run_body(&mut ec, caller.clone()).unwrap(), Value::NIL);
    }
    assert!(
        wait_for_slot(&method, |slot| slot == NOT_COMPILABLE_FUNC),
        "body was not rejected"
    );
    // still runs fine under the interpreter
    assert_eq!(run_body(&mut ec, caller).unwrap(), Value::NIL);

    jit.finish();
}

#[test]
fn gc_hooks_exclude_translation_batches() {
    let _guard = ENGINE_LOCK.lock().unwrap();
    if !compiler_available() {
        eprintln!("skipping: no C compiler on PATH");
        return;
    }

    let mut ec = new_ec();
    let double = double_method();
    ec.host.methods.define_iseq(
        ClassId::NilClass,
        "double",
        Visibility::Public,
        double.clone(),
    );
    let jit = start_engine("");
    ec.host.jit = Some(jit.clone());

    // hold the GC side while the body turns hot; the worker must wait and
    // still make progress after the collector releases it
    jit.gc_start_hook();
    for _ in 0..CALLS_TO_JIT + 1 {
        run_body(&mut ec, caller_of("double", 3)).unwrap();
    }
    std::thread::sleep(Duration::from_millis(100));
    jit.gc_finish_hook();

    assert!(wait_for_slot(&double, |slot| slot >= FIRST_FUNC));
    assert_eq!(
        run_body(&mut ec, caller_of("double", 3)).unwrap(),
        Value::fixnum(6)
    );
    jit.finish();
}

#[test]
fn freed_body_is_discarded_by_the_worker() {
    let _guard = ENGINE_LOCK.lock().unwrap();
    if !compiler_available() {
        eprintln!("skipping: no C compiler on PATH");
        return;
    }

    let mut ec = new_ec();
    let doomed = double_method();
    ec.host.methods.define_iseq(
        ClassId::NilClass,
        "doomed",
        Visibility::Public,
        doomed.clone(),
    );
    let jit = start_engine("");
    ec.host.jit = Some(jit.clone());

    // block the worker behind the GC gate so the unit stays queued
    jit.gc_start_hook();
    for _ in 0..CALLS_TO_JIT + 1 {
        run_body(&mut ec, caller_of("doomed", 1)).unwrap();
    }
    // the host collects the body while it is still in the queue
    jit.free_body(&doomed);
    jit.gc_finish_hook();

    // the worker drops the unit instead of compiling it
    std::thread::sleep(Duration::from_millis(200));
    assert!(doomed.jit_func.load(Ordering::Acquire) < FIRST_FUNC);
    jit.finish();
}

#[test]
fn finish_blocks_until_the_worker_exits() {
    let _guard = ENGINE_LOCK.lock().unwrap();
    if !compiler_available() {
        eprintln!("skipping: no C compiler on PATH");
        return;
    }

    let mut ec = new_ec();
    let double = double_method();
    ec.host.methods.define_iseq(
        ClassId::NilClass,
        "double",
        Visibility::Public,
        double.clone(),
    );
    let jit = start_engine("");
    ec.host.jit = Some(jit.clone());
    for _ in 0..CALLS_TO_JIT + 1 {
        run_body(&mut ec, caller_of("double", 2)).unwrap();
    }
    // shut down while a unit may be in flight; finish must not hang or leak
    jit.finish();
    assert!(!jit.active());
}
