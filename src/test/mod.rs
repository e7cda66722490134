use crate::asm::*;
use crate::exec::*;

/// Assembles the source, which must be valid.
macro_rules! asm_unwrap {
    ($asm:expr) => {
        match crate::load_program($asm) {
            Ok(p) => p,
            Err(e) => panic!("{}", e),
        }
    };
}

/// Assembles and runs the source on a fresh state, handing back the state and the run result.
/// The optional setup closure runs on the state before execution, e.g. to load arguments.
macro_rules! run_asm {
    ($asm:expr) => { run_asm!($asm, |_: &mut ExecutionState| ()) };
    ($asm:expr, $setup:expr) => {{
        let program = asm_unwrap!($asm);
        let mut state = ExecutionState::new(&StateArgs { memory_size: Some(4096), ..Default::default() });
        let setup = $setup;
        setup(&mut state);
        let res = state.run(&program, Some(10_000));
        (state, res)
    }};
}

/// Like `run_asm!` but the program must halt by returning from its entry point.
macro_rules! run_asm_ok {
    ($($t:tt)*) => {{
        let (state, res) = run_asm!($($t)*);
        match &res.outcome {
            Ok(HaltReason::Returned) => (),
            other => panic!("expected a normal return, got {:?}", other),
        }
        state
    }};
}

/// Asserts the state of the five condition flags.
fn assert_flags(state: &ExecutionState, zf: bool, sf: bool, cf: bool, of: bool, pf: bool) {
    let f = state.flags;
    assert_eq!((f.get_zf(), f.get_sf(), f.get_cf(), f.get_of(), f.get_pf()), (zf, sf, cf, of, pf), "flags (zf, sf, cf, of, pf)");
}

mod exe_tests;
mod routine_tests;
