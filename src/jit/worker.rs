//! The background compilation worker: one thread that builds the
//! precompiled header, then drains the unit queue until the engine asks it
//! to finish. Cancellation is honored only between units; a unit in flight
//! always runs to completion so the external compiler never leaks files.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;

use crate::bytecode::iseq::IseqBody;
use crate::jit::options::JitOptions;
use crate::jit::toolchain::{self, UNIT_PREFIX};
use crate::jit::translator;
use crate::jit::{Jit, PchStatus};

pub(super) fn run(jit: Arc<Jit>) {
    if !build_pch(&jit) {
        return;
    }

    loop {
        let mut state = jit.state.lock().unwrap();
        let id = loop {
            if state.finish_requested {
                state.worker_finished = true;
                jit.client_cond.notify_all();
                log::debug!("JIT worker finished");
                return;
            }
            if let Some(id) = state.units.dequeue_best() {
                break id;
            }
            state = jit.worker_cond.wait(state).unwrap();
        };

        // a translation batch never overlaps a GC cycle
        while state.in_gc {
            state = jit.gc_cond.wait(state).unwrap();
        }
        // the GC wait releases the lock, so the body may be freed in between
        let Some(body) = state.units.unit(id).and_then(|u| u.body.clone()) else {
            continue;
        };
        state.in_jit = true;
        drop(state);

        let funcname = format!("{}_{}", UNIT_PREFIX, id);
        let c_path = toolchain::temp_path(UNIT_PREFIX, id as u64, ".c");
        let so_path = toolchain::temp_path(UNIT_PREFIX, id as u64, ".so");

        let translated = translate_to_file(&c_path, &body, &funcname, &jit.opts);

        {
            let mut state = jit.state.lock().unwrap();
            state.in_jit = false;
        }
        jit.client_cond.notify_all();

        match translated {
            Ok(true) => {}
            Ok(false) => {
                body.mark_not_compilable();
                cleanup(&jit.opts, &c_path, None);
                jit.verbose(2, &format!("failed to translate {}", body.name));
                continue;
            }
            Err(e) => {
                body.mark_not_compilable();
                cleanup(&jit.opts, &c_path, None);
                jit.diagnose(&format!("cannot write C source for {}: {}", body.name, e));
                continue;
            }
        }

        let args = toolchain::so_args(&jit.opts, &jit.header_path, &jit.pch_path, &c_path, &so_path);
        if let Err(e) = toolchain::run_compiler(&jit.cc_path, &args, jit.opts.verbose) {
            body.mark_not_compilable();
            cleanup(&jit.opts, &c_path, None);
            jit.diagnose(&format!("compile failed for {}: {}", body.name, e));
            continue;
        }

        match toolchain::load_func(&so_path, &funcname) {
            Ok((lib, addr)) => {
                let mut state = jit.state.lock().unwrap();
                if let Some(unit) = state.units.unit_mut(id) {
                    unit.handle = Some(lib);
                    unit.compiled = true;
                    drop(state);
                    body.publish_func(addr);
                    jit.verbose(1, &format!("success: {} -> {}", body.name, funcname));
                } else {
                    // the engine dropped the unit while we were compiling;
                    // the function was never published, so the handle may go
                    drop(state);
                    drop(lib);
                    body.mark_not_compilable();
                }
            }
            Err(e) => {
                body.mark_not_compilable();
                jit.diagnose(&format!("load failed for {}: {}", body.name, e));
            }
        }

        cleanup(&jit.opts, &c_path, Some(&so_path));
    }
}

/// Build the PCH once. A failure disables the engine for the rest of the
/// process; queued bodies simply stay interpreted.
fn build_pch(jit: &Arc<Jit>) -> bool {
    let args = toolchain::pch_args(&jit.opts, &jit.header_path, &jit.pch_path);
    let result = toolchain::run_compiler(&jit.cc_path, &args, jit.opts.verbose);

    let mut state = jit.state.lock().unwrap();
    match result {
        Ok(()) => {
            state.pch_status = PchStatus::Success;
            drop(state);
            jit.pch_cond.notify_all();
            jit.verbose(2, "precompiled header ready");
            true
        }
        Err(e) => {
            state.pch_status = PchStatus::Failed;
            state.worker_finished = true;
            drop(state);
            jit.disable();
            jit.pch_cond.notify_all();
            jit.client_cond.notify_all();
            jit.diagnose(&format!("precompiled header build failed: {}", e));
            false
        }
    }
}

fn translate_to_file(
    c_path: &Path,
    body: &IseqBody,
    funcname: &str,
    opts: &JitOptions,
) -> std::io::Result<bool> {
    let file = File::create(c_path)?;
    let mut out = BufWriter::new(file);
    let success = translator::compile(&mut out, body, funcname, opts)?;
    use std::io::Write;
    out.flush()?;
    Ok(success)
}

fn cleanup(opts: &JitOptions, c_path: &Path, so_path: Option<&Path>) {
    if opts.save_temps {
        return;
    }
    toolchain::remove_file(c_path);
    if let Some(so) = so_path {
        toolchain::remove_file(so);
    }
}
