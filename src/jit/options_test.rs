use crate::jit::options::{JitCc, JitOptions};

#[test]
fn defaults_are_off_and_gcc() {
    let opts = JitOptions::default();
    assert!(!opts.on);
    assert_eq!(opts.cc, JitCc::Gcc);
    assert!(!opts.save_temps);
    assert_eq!(opts.verbose, 0);
    assert_eq!(opts.max_cache_size, 1000);
}

#[test]
fn parses_full_option_list() {
    let opts =
        JitOptions::parse("on,llvm,save-temps,warnings,debug,verbose=2,max-cache-size=32").unwrap();
    assert!(opts.on);
    assert_eq!(opts.cc, JitCc::Clang);
    assert!(opts.save_temps);
    assert!(opts.warnings);
    assert!(opts.debug);
    assert_eq!(opts.verbose, 2);
    assert_eq!(opts.max_cache_size, 32);
}

#[test]
fn empty_items_are_skipped() {
    let opts = JitOptions::parse("on,,verbose=1,").unwrap();
    assert!(opts.on);
    assert_eq!(opts.verbose, 1);
}

#[test]
fn unknown_option_is_rejected() {
    assert!(JitOptions::parse("on,turbo").is_err());
}

#[test]
fn bad_numbers_are_rejected() {
    assert!(JitOptions::parse("verbose=lots").is_err());
    assert!(JitOptions::parse("max-cache-size=-3").is_err());
}
