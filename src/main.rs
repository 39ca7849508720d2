use std::env;
use std::sync::Arc;

use ember::bytecode::iseq::{BodyBuilder, CI_FCALL, IseqBody, IseqType};
use ember::bytecode::op_code::{OpCode, disassemble};
use ember::jit::Jit;
use ember::jit::options::JitOptions;
use ember::runtime::builtins::register_builtins;
use ember::runtime::context::ExecutionContext;
use ember::runtime::heap::ClassId;
use ember::runtime::method::Visibility;
use ember::runtime::value::Value;
use ember::runtime::vm::run_body;

fn main() {
    env_logger::init();

    let mut args: Vec<String> = env::args().collect();
    let mut jit_opts: Option<JitOptions> = None;
    let mut dump = false;

    args.retain(|arg| {
        if arg == "--jit" {
            jit_opts = Some(JitOptions {
                on: true,
                ..JitOptions::default()
            });
            return false;
        }
        if let Some(rest) = arg.strip_prefix("--jit=") {
            match JitOptions::parse(&format!("on,{}", rest)) {
                Ok(opts) => jit_opts = Some(opts),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(2);
                }
            }
            return false;
        }
        if arg == "--dump" {
            dump = true;
            return false;
        }
        true
    });

    if args.len() < 2 {
        print_help();
        return;
    }

    let (program, iterations) = match args[1].as_str() {
        "-h" | "--help" | "help" => {
            print_help();
            return;
        }
        "fib" => {
            let n = args
                .get(2)
                .and_then(|s| s.parse::<i64>().ok())
                .unwrap_or(20);
            (DemoProgram::Fib, n)
        }
        "sum" => {
            let n = args
                .get(2)
                .and_then(|s| s.parse::<i64>().ok())
                .unwrap_or(1000);
            (DemoProgram::Sum, n)
        }
        other => {
            eprintln!("Error: unknown demo: {}", other);
            print_help();
            std::process::exit(2);
        }
    };

    let mut ec = ExecutionContext::new();
    ec.host.echo_output = true;
    register_builtins(&mut ec.host.methods);

    if let Some(opts) = jit_opts {
        match Jit::init(opts) {
            Ok(jit) => ec.host.jit = Some(jit),
            Err(e) => eprintln!("JIT disabled: {}", e),
        }
    }

    let body = match program {
        DemoProgram::Fib => build_fib(&mut ec, iterations),
        DemoProgram::Sum => build_sum(iterations),
    };
    let body = match body {
        Ok(b) => b,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if dump {
        print!("{}", disassemble(&body.iseq_encoded));
    }

    match run_body(&mut ec, body) {
        Ok(v) => println!("=> {:?}", v),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }

    if let Some(jit) = ec.host.jit.take() {
        jit.finish();
    }
}

enum DemoProgram {
    Fib,
    Sum,
}

fn print_help() {
    println!("Usage: ember <demo> [n] [--jit[=opts]] [--dump]");
    println!();
    println!("Demos:");
    println!("  fib [n]     recursive fibonacci via a bytecode method (default 20)");
    println!("  sum [n]     loop summing 1..n in bytecode (default 1000)");
    println!();
    println!("JIT options (comma separated after --jit=):");
    println!("  llvm, save-temps, warnings, debug, verbose=<0..3>, max-cache-size=<n>");
}

/// def fib(n) = n < 2 ? n : fib(n - 1) + fib(n - 2)
fn build_fib(ec: &mut ExecutionContext, n: i64) -> Result<Arc<IseqBody>, String> {
    let mut m = BodyBuilder::new("fib");
    m.iseq_type(IseqType::Method);
    m.params(1, 1);
    let one = m.add_const(Value::fixnum(1));
    let two = m.add_const(Value::fixnum(2));
    let ci_lt = m.add_call_info("<", 1, 0, None);
    let ci_minus = m.add_call_info("-", 1, 0, None);
    let ci_plus = m.add_call_info("+", 1, 0, None);
    let ci_fib = m.add_call_info("fib", 1, CI_FCALL, None);
    let recurse = m.new_label();

    m.emit(OpCode::GetLocal0, &[1]);
    m.emit(OpCode::PutObject, &[two]);
    m.emit(OpCode::OptLt, &[ci_lt]);
    m.emit_branch(OpCode::BranchUnless, &[], recurse);
    m.emit(OpCode::GetLocal0, &[1]);
    m.emit(OpCode::Leave, &[]);
    m.place(recurse);
    m.emit(OpCode::PutSelf, &[]);
    m.emit(OpCode::GetLocal0, &[1]);
    m.emit(OpCode::PutObject, &[one]);
    m.emit(OpCode::OptMinus, &[ci_minus]);
    m.emit(OpCode::OptSendWithoutBlock, &[ci_fib]);
    m.emit(OpCode::PutSelf, &[]);
    m.emit(OpCode::GetLocal0, &[1]);
    m.emit(OpCode::PutObject, &[two]);
    m.emit(OpCode::OptMinus, &[ci_minus]);
    m.emit(OpCode::OptSendWithoutBlock, &[ci_fib]);
    m.emit(OpCode::OptPlus, &[ci_plus]);
    m.emit(OpCode::Leave, &[]);
    let fib = m.build()?;
    ec.host
        .methods
        .define_iseq(ClassId::NilClass, "fib", Visibility::Public, fib);

    let mut b = BodyBuilder::new("main");
    let arg = b.add_const(Value::fixnum(n));
    let ci = b.add_call_info("fib", 1, CI_FCALL, None);
    b.emit(OpCode::PutSelf, &[]);
    b.emit(OpCode::PutObject, &[arg]);
    b.emit(OpCode::OptSendWithoutBlock, &[ci]);
    b.emit(OpCode::Leave, &[]);
    b.build()
}

/// i = 0; total = 0; while i < n { i += 1; total += i }; total
fn build_sum(n: i64) -> Result<Arc<IseqBody>, String> {
    let mut b = BodyBuilder::new("sum");
    b.params(0, 2);
    let zero = b.add_const(Value::fixnum(0));
    let one = b.add_const(Value::fixnum(1));
    let limit = b.add_const(Value::fixnum(n));
    let ci_lt = b.add_call_info("<", 1, 0, None);
    let ci_plus = b.add_call_info("+", 1, 0, None);
    let top = b.new_label();
    let done = b.new_label();

    b.emit(OpCode::PutObject, &[zero]);
    b.emit(OpCode::SetLocal0, &[2]);
    b.emit(OpCode::PutObject, &[zero]);
    b.emit(OpCode::SetLocal0, &[1]);
    b.place(top);
    b.emit(OpCode::GetLocal0, &[2]);
    b.emit(OpCode::PutObject, &[limit]);
    b.emit(OpCode::OptLt, &[ci_lt]);
    b.emit_branch(OpCode::BranchUnless, &[], done);
    b.emit(OpCode::GetLocal0, &[2]);
    b.emit(OpCode::PutObject, &[one]);
    b.emit(OpCode::OptPlus, &[ci_plus]);
    b.emit(OpCode::SetLocal0, &[2]);
    b.emit(OpCode::GetLocal0, &[1]);
    b.emit(OpCode::GetLocal0, &[2]);
    b.emit(OpCode::OptPlus, &[ci_plus]);
    b.emit(OpCode::SetLocal0, &[1]);
    b.emit_branch(OpCode::Jump, &[], top);
    b.place(done);
    b.emit(OpCode::GetLocal0, &[1]);
    b.emit(OpCode::Leave, &[]);
    b.build()
}
