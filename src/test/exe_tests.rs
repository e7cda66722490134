use super::*;
use crate::exec::registers::Register;

use pretty_assertions::assert_eq;

#[test]
fn test_mov_widths() {
    let s = run_asm_ok!(r"
    mov rax, -1
    mov eax, 5
    mov rbx, -1
    mov bx, 0x1234
    mov rcx, -1
    mov cl, 0
    mov edx, 0
    mov dh, 0xab
    mov dl, 0x80
    movsx rsi, dl
    movzx edi, dl
    movsxd r8, esi
    movsx r9w, byte ptr [r15 + 0x10000]
    mov r10, 0x123456789abcdef0
    ret
    ");
    assert_eq!(s.regs.get_rax(), 5);
    assert_eq!(s.regs.get_rbx(), 0xffff_ffff_ffff_1234);
    assert_eq!(s.regs.get_rcx(), 0xffff_ffff_ffff_ff00);
    assert_eq!(s.regs.get_rdx(), 0xab80);
    assert_eq!(s.regs.get_rsi(), 0xffff_ffff_ffff_ff80);
    assert_eq!(s.regs.get_rdi(), 0x80);
    assert_eq!(s.regs.get_r8(), (-128i64) as u64);
    assert_eq!(s.regs.get_r9(), 0);
    assert_eq!(s.regs.get_r10(), 0x1234_5678_9abc_def0);
}

#[test]
fn test_memory_operands() {
    let s = run_asm_ok!(r"
    mov rbx, 0x10000
    mov qword ptr [rbx + 8], -2
    mov dword [rbx + 16], 0x11223344
    mov rcx, 1
    mov al, byte [rbx + rcx*8 + 8]
    mov edx, [rbx + 16]
    add word [rbx + 16], 1
    mov r8, [rbx + 8]
    lea r9, [rbx + rcx*4 - 3]
    ret
    ");
    assert_eq!(s.regs.get_al(), 0x44);
    assert_eq!(s.regs.get_rdx(), 0x11223344);
    assert_eq!(s.memory.get_u32(0x10010).unwrap(), 0x11223345);
    assert_eq!(s.regs.get_r8(), (-2i64) as u64);
    assert_eq!(s.regs.get_r9(), 0x10001);
}

#[test]
fn test_xchg_push_pop() {
    let s = run_asm_ok!(r"
    mov rax, 5
    mov rbx, 6
    xchg rax, rbx
    push rax
    push 7
    push qword ptr [rsp]
    pop rcx
    pop rdx
    pop rsi
    ret
    ");
    assert_eq!(s.regs.get_rax(), 6);
    assert_eq!(s.regs.get_rbx(), 5);
    assert_eq!(s.regs.get_rcx(), 7);
    assert_eq!(s.regs.get_rdx(), 7);
    assert_eq!(s.regs.get_rsi(), 6);
    assert_eq!(s.regs.get_rsp(), s.memory.end());
}

#[test]
fn test_arithmetic_flags() {
    let s = run_asm_ok!("mov al, 0x7f\nadd al, 1\nret");
    assert_eq!(s.regs.get_rax(), 0x80);
    assert_flags(&s, false, true, false, true, false);

    let s = run_asm_ok!("mov ax, 0xffff\nadd ax, 1\nret");
    assert_eq!(s.regs.get_rax(), 0);
    assert_flags(&s, true, false, true, false, true);

    let s = run_asm_ok!("mov eax, 0x80000000\nsub eax, 1\nret");
    assert_eq!(s.regs.get_rax(), 0x7fff_ffff);
    assert_flags(&s, false, false, false, true, true);

    let s = run_asm_ok!("mov rax, 0\nsub rax, 1\nret");
    assert_eq!(s.regs.get_rax(), !0);
    assert_flags(&s, false, true, true, false, true);

    let s = run_asm_ok!("mov rax, 5\ncmp rax, 5\nret");
    assert_eq!(s.regs.get_rax(), 5);
    assert_flags(&s, true, false, false, false, true);

    let s = run_asm_ok!("mov eax, 5\nneg eax\nret");
    assert_eq!(s.regs.get_rax(), 0xffff_fffb);
    assert_flags(&s, false, true, true, false, false);

    let s = run_asm_ok!("stc\nmov rax, 1\nadc rax, 1\nstc\nmov rbx, 5\nsbb rbx, 2\nret");
    assert_eq!(s.regs.get_rax(), 3);
    assert_eq!(s.regs.get_rbx(), 2);
}

#[test]
fn test_inc_dec_preserve_carry() {
    let s = run_asm_ok!("stc\nmov rax, -1\ninc rax\nret");
    assert_eq!(s.regs.get_rax(), 0);
    assert_flags(&s, true, false, true, false, true);

    let s = run_asm_ok!("clc\nmov cl, 0x80\ndec cl\nret");
    assert_eq!(s.regs.get_rcx(), 0x7f);
    assert_flags(&s, false, false, false, true, false);
}

#[test]
fn test_logic_flags() {
    let s = run_asm_ok!("stc\nmov al, 0x0f\nand al, 0xf0\nret");
    assert_eq!(s.regs.get_rax(), 0);
    assert_flags(&s, true, false, false, false, true);

    let s = run_asm_ok!("mov rax, -1\nxor eax, eax\nnot rbx\ntest rbx, rbx\nret");
    assert_eq!(s.regs.get_rax(), 0);
    assert_eq!(s.regs.get_rbx(), !0);
    assert_flags(&s, false, true, false, false, true);
}

#[test]
fn test_multiply() {
    let s = run_asm_ok!("mov rax, 0xffffffffffffffff\nmov rbx, 2\nmul rbx\nret");
    assert_eq!(s.regs.get_rax(), 0xffff_ffff_ffff_fffe);
    assert_eq!(s.regs.get_rdx(), 1);
    assert!(s.flags.get_cf() && s.flags.get_of());

    let s = run_asm_ok!("mov al, 200\nmov bl, 2\nmul bl\nret");
    assert_eq!(s.regs.get_rax(), 400);
    assert!(s.flags.get_cf());

    let s = run_asm_ok!("mov eax, 3\nmov ecx, 4\nmul ecx\nret");
    assert_eq!(s.regs.get_rax(), 12);
    assert_eq!(s.regs.get_rdx(), 0);
    assert!(!s.flags.get_cf() && !s.flags.get_of());

    let s = run_asm_ok!(r"
    mov rcx, -7
    imul rax, rcx, 6
    mov rbx, 3
    mov rdx, -4
    imul rbx, rdx
    mov r8, -1
    mov r9, 2
    mov rax, r8
    imul r9
    ret
    ");
    assert_eq!(s.regs.get_rbx(), (-12i64) as u64);
    assert_eq!(s.regs.get_rax(), (-2i64) as u64);
    assert_eq!(s.regs.get_rdx(), !0);
    assert!(!s.flags.get_cf());
}

#[test]
fn test_divide() {
    let s = run_asm_ok!("mov rdx, 0\nmov rax, 100\nmov rcx, 7\ndiv rcx\nret");
    assert_eq!((s.regs.get_rax(), s.regs.get_rdx()), (14, 2));

    let s = run_asm_ok!("mov rax, -100\ncqo\nmov rcx, 7\nidiv rcx\nret");
    assert_eq!((s.regs.get_rax() as i64, s.regs.get_rdx() as i64), (-14, -2));

    let s = run_asm_ok!("mov ax, 100\nmov bl, 7\ndiv bl\nret");
    assert_eq!(s.regs.get_rax(), 0x020e);

    let s = run_asm_ok!("mov eax, -9\ncdq\nmov ecx, 2\nidiv ecx\nret");
    assert_eq!((s.regs.get_eax() as i32, s.regs.get_edx() as i32), (-4, -1));
}

#[test]
fn test_divide_by_zero_is_atomic() {
    let (s, res) = run_asm!(r"
    mov rax, 10
    mov rdx, 3
    mov rcx, 0
    div rcx
    mov rax, 99
    ret
    ");
    assert_eq!(res.steps, 3);
    let fault = res.outcome.unwrap_err();
    assert_eq!(fault.error, ExecError::DivisionByZero);
    assert_eq!(fault.context, Some(FaultContext { ip: 3, line_num: 5, instruction: "div rcx".into(), operands: vec![Some(0)] }));
    assert_eq!(s.status(), Status::Faulted(ExecError::DivisionByZero));
    assert_eq!((s.regs.get_rax(), s.regs.get_rdx()), (10, 3));
    assert_eq!(s.ip(), 3);
}

#[test]
fn test_divide_overflow() {
    let (s, res) = run_asm!("mov rdx, 1\nmov rax, 0\nmov rcx, 1\ndiv rcx\nret");
    assert_eq!(res.outcome.unwrap_err().error, ExecError::DivisionOverflow);
    assert_eq!(s.regs.get_rdx(), 1);

    let (_, res) = run_asm!("mov rax, 0x8000000000000000\ncqo\nmov rcx, -1\nidiv rcx\nret");
    assert_eq!(res.outcome.unwrap_err().error, ExecError::DivisionOverflow);

    let (_, res) = run_asm!("mov ax, 0x4000\nmov cl, 2\ndiv cl\nret");
    assert_eq!(res.outcome.unwrap_err().error, ExecError::DivisionOverflow);
}

#[test]
fn test_sign_extension() {
    let s = run_asm_ok!(r"
    mov rax, 0x80
    cbw
    mov rbx, rax
    mov eax, 0x8000
    cwde
    mov rcx, rax
    mov eax, 0x80000000
    cdqe
    ret
    ");
    assert_eq!(s.regs.get_rbx(), 0xff80);
    assert_eq!(s.regs.get_rcx(), 0xffff_8000);
    assert_eq!(s.regs.get_rax(), 0xffff_ffff_8000_0000);
}

#[test]
fn test_shifts() {
    let s = run_asm_ok!("mov al, 0x81\nshl al, 1\nret");
    assert_eq!(s.regs.get_rax(), 0x02);
    assert!(s.flags.get_cf() && s.flags.get_of());

    let s = run_asm_ok!("mov eax, 0x80000000\nsar eax, 31\nret");
    assert_eq!(s.regs.get_rax(), 0xffff_ffff);
    assert!(!s.flags.get_cf());
    assert!(s.flags.get_sf());

    let s = run_asm_ok!("mov rax, 0xf0\nmov cl, 4\nshr rax, cl\nshr rax\nret");
    assert_eq!(s.regs.get_rax(), 0x7);
    assert!(s.flags.get_cf());

    // a masked count of zero changes nothing, flags included
    let s = run_asm_ok!("stc\nmov rax, 1\nshl rax, 64\nret");
    assert_eq!(s.regs.get_rax(), 1);
    assert!(s.flags.get_cf());

    let s = run_asm_ok!("mov ebx, 1\nshl ebx, 33\nret");
    assert_eq!(s.regs.get_rbx(), 2);
}

#[test]
fn test_rotates() {
    let s = run_asm_ok!("mov rax, 0x8000000000000001\nrol rax, 1\nret");
    assert_eq!(s.regs.get_rax(), 3);
    assert!(s.flags.get_cf());

    // rotates leave ZF SF PF alone
    let s = run_asm_ok!("xor eax, eax\nmov rax, 1\nror rax, 1\nret");
    assert_eq!(s.regs.get_rax(), 0x8000_0000_0000_0000);
    assert!(s.flags.get_cf());
    assert!(s.flags.get_zf());
    assert!(!s.flags.get_sf());

    let s = run_asm_ok!("mov bl, 0x81\nror bl, 9\nret");
    assert_eq!(s.regs.get_rbx(), 0xc0);

    // a count that is a multiple of the width leaves the value but still sets CF
    let s = run_asm_ok!("clc\nmov al, 0x81\nmov cl, 8\nrol al, cl\nret");
    assert_eq!(s.regs.get_rax(), 0x81);
    assert!(s.flags.get_cf());
    let s = run_asm_ok!("stc\nmov al, 0x01\nror al, 16\nret");
    assert_eq!(s.regs.get_rax(), 0x01);
    assert!(!s.flags.get_cf());

    // a masked count of zero touches nothing
    let s = run_asm_ok!("stc\nmov al, 0x02\nrol al, 32\nret");
    assert_eq!(s.regs.get_rax(), 0x02);
    assert!(s.flags.get_cf());
}

#[test]
fn test_bit_instructions() {
    let s = run_asm_ok!("mov rax, 4\nbt rax, 2\nret");
    assert!(s.flags.get_cf());

    let s = run_asm_ok!("mov rax, 4\nbts rax, 0\nbtr rax, 2\nbtc rax, 63\nret");
    assert_eq!(s.regs.get_rax(), 0x8000_0000_0000_0001);
    assert!(!s.flags.get_cf());

    let s = run_asm_ok!("mov rax, 0xb\npopcnt rbx, rax\npopcnt rcx, rdx\nret");
    assert_eq!(s.regs.get_rbx(), 3);
    assert_eq!(s.regs.get_rcx(), 0);
    assert!(s.flags.get_zf());

    let s = run_asm_ok!("mov rax, 12\nblsr rbx, rax\nret");
    assert_eq!(s.regs.get_rbx(), 8);
    assert!(!s.flags.get_cf() && !s.flags.get_zf());

    let s = run_asm_ok!("mov eax, 0xdeadbeef\nmov ecx, 0x0808\nbextr ebx, eax, ecx\nret");
    assert_eq!(s.regs.get_rbx(), 0xbe);
}

#[test]
fn test_bit_test_memory_offset() {
    let (s, res) = run_asm!("bt qword ptr [rdi], rcx\nsetc al\nret", |s: &mut ExecutionState| {
        let p = s.memory.alloc_bytes(&[0, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0], 8).unwrap();
        s.regs.set_rdi(p);
        s.regs.set_rcx(64);
    });
    assert_eq!(res.outcome, Ok(HaltReason::Returned));
    assert_eq!(s.regs.get_al(), 1);
}

#[test]
fn test_cmov_setcc() {
    let s = run_asm_ok!(r"
    mov rax, 1
    mov rbx, 2
    cmp rax, rbx
    cmovg rax, rbx
    cmovl rcx, rbx
    setl dl
    setg dh
    ret
    ");
    assert_eq!(s.regs.get_rax(), 1);
    assert_eq!(s.regs.get_rcx(), 2);
    assert_eq!(s.regs.get_rdx(), 0x0001);

    // a false 32-bit cmov does not write its destination at all
    let s = run_asm_ok!("mov rax, -1\nmov ebx, 5\ncmp ebx, 5\ncmovne eax, ebx\nret");
    assert_eq!(s.regs.get_rax(), !0);

    let s = run_asm_ok!("mov rax, -1\ncmp rax, 0\nsetl al\nret");
    assert_eq!(s.regs.get_rax(), 0xffff_ffff_ffff_ff01);
}

#[test]
fn test_cmov_repeated_is_stable() {
    let s = run_asm_ok!(r"
    mov rax, 4
    mov rbx, 9
    cmp rbx, rax
    cmovg rax, rbx
    mov rcx, rax
    cmp rbx, rax
    cmovg rax, rbx
    cmp rbx, rax
    cmovg rax, rbx
    ret
    ");
    assert_eq!(s.regs.get_rcx(), 9);
    assert_eq!(s.regs.get_rax(), 9);
    assert_flags(&s, true, false, false, false, true);
}

#[test]
fn test_cmov_reads_source_regardless() {
    let (s, res) = run_asm!("xor eax, eax\ncmovnz rax, qword ptr [8]\nret");
    assert_eq!(res.outcome.unwrap_err().error, ExecError::OutOfBounds);
    assert_eq!(s.status(), Status::Stopped(ExecError::OutOfBounds));
}

#[test]
fn test_jumps_and_loops() {
    let s = run_asm_ok!(r"
    mov rcx, 5
    xor eax, eax
1:  add rax, 2
    loop 1b
    jrcxz 1f
    mov rax, 99
1:  mov rbx, 3
    cmp rbx, 3
    je .done
    mov rbx, 99
.done:
    ret
    ");
    assert_eq!(s.regs.get_rax(), 10);
    assert_eq!(s.regs.get_rcx(), 0);
    assert_eq!(s.regs.get_rbx(), 3);

    let s = run_asm_ok!(r"
    mov rcx, 10
    mov rax, 0
1:  inc rax
    cmp rax, 3
    loopne 1b
    ret
    ");
    assert_eq!(s.regs.get_rax(), 3);
    assert_eq!(s.regs.get_rcx(), 7);
}

#[test]
fn test_unsigned_and_signed_conditions() {
    let s = run_asm_ok!(r"
    mov rax, -1
    cmp rax, 1
    seta bl
    setg cl
    setb dl
    setle sil
    ret
    ");
    assert_eq!(s.regs.get_rbx(), 1);
    assert_eq!(s.regs.get_rcx(), 0);
    assert_eq!(s.regs.get_rdx(), 0);
    assert_eq!(s.regs.get_rsi(), 1);
}

#[test]
fn test_call_ret() {
    let program = asm_unwrap!(r"
    entry main
    double:
        lea rax, [rdi + rdi]
        ret
    main:
        mov rdi, 21
        call double
        ret
    ");
    assert_eq!(program.entry(), 2);
    let mut s = ExecutionState::default();
    let res = s.run(&program, None);
    assert_eq!(res, RunResult { steps: 5, outcome: Ok(HaltReason::Returned) });
    assert_eq!(s.regs.get_rax(), 42);
    assert_eq!(s.peak_call_depth(), 1);
    assert_eq!(s.call_depth(), 0);
    assert_eq!(s.status(), Status::Halted(HaltReason::Returned));

    // a finished state must be rerun rather than resumed
    let res = s.resume(&program, None);
    assert_eq!(res.steps, 0);
    assert_eq!(res.outcome, Err(Fault { error: ExecError::NotRunning, context: None }));
    assert_eq!(s.run(&program, None).outcome, Ok(HaltReason::Returned));
}

#[test]
fn test_call_depth_limit() {
    let program = asm_unwrap!("1: call 1b");
    let mut s = ExecutionState::new(&StateArgs { max_call_depth: Some(10), ..Default::default() });
    let res = s.run(&program, Some(1000));
    assert_eq!(res.steps, 10);
    assert_eq!(res.outcome.unwrap_err().error, ExecError::StackOverflow);
    assert_eq!(s.status(), Status::Faulted(ExecError::StackOverflow));
    assert_eq!(s.call_depth(), 10);
    assert_eq!(s.peak_call_depth(), 10);
}

#[test]
fn test_stack_overflow_underflow() {
    let (s, res) = run_asm!("1: push rax\njmp 1b");
    assert_eq!(res.steps, 512);
    assert_eq!(res.outcome.unwrap_err().error, ExecError::StackOverflow);
    assert_eq!(s.regs.get_rsp(), s.memory.stack_limit());

    let (s, res) = run_asm!("pop rax\nret");
    assert_eq!(res.steps, 0);
    assert_eq!(res.outcome.unwrap_err().error, ExecError::StackUnderflow);
    assert_eq!(s.regs.get_rsp(), s.memory.end());
}

#[test]
fn test_step_unmatched_ret() {
    let program = asm_unwrap!("ret");
    let mut s = ExecutionState::default();
    assert_eq!(s.status(), Status::Ready);
    let fault = s.step(&program).unwrap_err();
    assert_eq!(fault.error, ExecError::StackUnderflow);
    assert_eq!(s.status(), Status::Faulted(ExecError::StackUnderflow));
    assert_eq!(s.step(&program).unwrap_err().error, ExecError::NotRunning);
}

#[test]
fn test_single_stepping() {
    let program = asm_unwrap!("mov rax, 1\nadd rax, 2\nhlt\nmov rax, 0");
    let mut s = ExecutionState::default();
    assert_eq!(s.step(&program), Ok(None));
    assert_eq!(s.ip(), 1);
    assert_eq!(s.status(), Status::Running);
    assert_eq!(s.step(&program), Ok(None));
    assert_eq!(s.step(&program), Ok(Some(HaltReason::Halt)));
    assert_eq!(s.regs.get_rax(), 3);
    assert_eq!(s.status(), Status::Halted(HaltReason::Halt));
}

#[test]
fn test_step_limit_and_resume() {
    let program = asm_unwrap!(r"
    mov rcx, 0
1:  inc rcx
    cmp rcx, 100
    jne 1b
    ret
    ");
    let mut s = ExecutionState::default();
    let res = s.run(&program, Some(10));
    assert_eq!(res.steps, 10);
    assert_eq!(res.outcome.unwrap_err().error, ExecError::StepLimitExceeded);
    assert_eq!(s.status(), Status::Stopped(ExecError::StepLimitExceeded));

    let res = s.resume(&program, None);
    assert_eq!(res, RunResult { steps: 292, outcome: Ok(HaltReason::Returned) });
    assert_eq!(s.regs.get_rcx(), 100);

    let (_, res) = run_asm!("1: jmp 1b");
    assert_eq!(res.steps, 10_000);
    assert_eq!(res.outcome.unwrap_err().error, ExecError::StepLimitExceeded);
}

#[test]
fn test_recoverable_fault_can_resume() {
    let program = asm_unwrap!("mov rax, [rbx]\nret");
    let mut s = ExecutionState::default();
    let res = s.run(&program, None);
    assert_eq!(res.outcome.unwrap_err().error, ExecError::OutOfBounds);
    assert_eq!(s.status(), Status::Stopped(ExecError::OutOfBounds));

    let p = s.memory.alloc_bytes(&77u64.to_le_bytes(), 8).unwrap();
    s.regs.set_rbx(p);
    let res = s.resume(&program, None);
    assert_eq!(res, RunResult { steps: 2, outcome: Ok(HaltReason::Returned) });
    assert_eq!(s.regs.get_rax(), 77);
}

#[test]
fn test_end_of_program() {
    let (s, res) = run_asm!("mov rax, 1");
    assert_eq!(res, RunResult { steps: 1, outcome: Ok(HaltReason::EndOfProgram) });
    assert_eq!(s.status(), Status::Halted(HaltReason::EndOfProgram));

    let (_, res) = run_asm!("; nothing to do");
    assert_eq!(res, RunResult { steps: 0, outcome: Ok(HaltReason::EndOfProgram) });

    let (s, res) = run_asm!("mov rax, 1\nhlt\nmov rax, 2");
    assert_eq!(res, RunResult { steps: 2, outcome: Ok(HaltReason::Halt) });
    assert_eq!(s.regs.get_rax(), 1);
}

#[test]
fn test_fault_context() {
    let (_, res) = run_asm!("mov rbx, 8\n\n  mov rax, qword ptr [rbx]  ; oops\nret");
    let fault = res.outcome.unwrap_err();
    assert_eq!(fault.context, Some(FaultContext {
        ip: 1,
        line_num: 3,
        instruction: "mov rax, qword ptr [rbx]".into(),
        operands: vec![Some(0), None],
    }));
    assert_eq!(fault.to_string(), "memory access out of bounds at instruction 1 (line 3): `mov rax, qword ptr [rbx]` [0x0, ?]");
}

#[test]
fn test_string_instructions() {
    let (s, res) = run_asm!("cld\nrep movsb\nret", |s: &mut ExecutionState| {
        let src = s.memory.alloc_bytes(b"hello", 1).unwrap();
        let dst = s.memory.alloc(8, 1).unwrap();
        s.regs.set_rsi(src);
        s.regs.set_rdi(dst);
        s.regs.set_rcx(5);
    });
    assert_eq!(res, RunResult { steps: 3, outcome: Ok(HaltReason::Returned) });
    assert_eq!(s.memory.get(0x10005, 5).unwrap(), &b"hello"[..]);
    assert_eq!(s.regs.get_rcx(), 0);
    assert_eq!((s.regs.get_rsi(), s.regs.get_rdi()), (0x10005, 0x1000a));
}

#[test]
fn test_string_zero_count() {
    let (s, res) = run_asm!("mov rcx, 0\nmov rax, 7\nrep stosq\nrepe cmpsb\nret", |s: &mut ExecutionState| {
        s.regs.set_rdi(0x10100);
        s.regs.set_rsi(0x10200);
    });
    assert_eq!(res.outcome, Ok(HaltReason::Returned));
    assert_eq!(s.regs.get_rdi(), 0x10100);
    assert_eq!(s.regs.get_rsi(), 0x10200);
    assert_eq!(s.memory.get_u64(0x10100).unwrap(), 0);
}

#[test]
fn test_string_compare_and_scan() {
    let (s, _) = run_asm!("cld\nrepe cmpsb\nret", |s: &mut ExecutionState| {
        let a = s.memory.alloc_bytes(b"abcx", 1).unwrap();
        let b = s.memory.alloc_bytes(b"abcy", 1).unwrap();
        s.regs.set_rsi(a);
        s.regs.set_rdi(b);
        s.regs.set_rcx(10);
    });
    assert_eq!(s.regs.get_rcx(), 6);
    assert!(!s.flags.get_zf());
    assert!(s.flags.get_cf()); // 'x' < 'y'

    let (s, _) = run_asm!("mov al, 'c'\nrepne scasb\nret", |s: &mut ExecutionState| {
        let p = s.memory.alloc_bytes(b"abcdef", 1).unwrap();
        s.regs.set_rdi(p);
        s.regs.set_rcx(6);
    });
    assert_eq!(s.regs.get_rcx(), 3);
    assert_eq!(s.regs.get_rdi(), 0x10003);
    assert!(s.flags.get_zf());
}

#[test]
fn test_rep_fault_keeps_completed_iterations() {
    let program = asm_unwrap!("mov al, 'A'\nrep stosb\nret");
    let mut s = ExecutionState::new(&StateArgs { memory_size: Some(4096), ..Default::default() });
    let end = s.memory.end();
    s.regs.set_rdi(end - 4);
    s.regs.set_rcx(100);

    let res = s.run(&program, None);
    assert_eq!(res.steps, 1);
    let fault = res.outcome.unwrap_err();
    assert_eq!(fault.error, ExecError::OutOfBounds);
    assert_eq!(fault.context.map(|c| c.ip), Some(1));
    assert_eq!(s.status(), Status::Stopped(ExecError::OutOfBounds));
    assert_eq!(s.regs.get_rcx(), 96);
    assert_eq!(s.regs.get_rdi(), end);
    assert_eq!(s.memory.get(end - 4, 4).unwrap(), &b"AAAA"[..]);

    // resuming picks up with the remaining count
    s.regs.set_rdi(s.memory.base());
    let res = s.resume(&program, None);
    assert_eq!(res, RunResult { steps: 2, outcome: Ok(HaltReason::Returned) });
    assert_eq!(s.regs.get_rcx(), 0);
    assert_eq!(s.regs.get_rdi(), s.memory.base() + 96);
    assert!(s.memory.get(s.memory.base(), 96).unwrap().iter().all(|&b| b == b'A'));
    assert_eq!(s.memory.get_u8(s.memory.base() + 96).unwrap(), 0);
}

#[test]
fn test_string_direction_flag() {
    let (s, _) = run_asm!("std\nlodsw\nlodsw\nstosb\ncld\nret", |s: &mut ExecutionState| {
        let p = s.memory.alloc_bytes(&[1, 2, 3, 4, 5, 6], 2).unwrap();
        s.regs.set_rsi(p + 4);
        s.regs.set_rdi(p + 5);
    });
    assert_eq!(s.regs.get_rax(), 0x0403);
    assert_eq!(s.regs.get_rsi(), 0x10000);
    assert_eq!(s.regs.get_rdi(), 0x10004);
    assert_eq!(s.memory.get(0x10000, 6).unwrap(), &[1u8, 2, 3, 4, 5, 3][..]);
    assert!(!s.flags.get_df());
}

#[test]
fn test_states_are_independent() {
    let program = asm_unwrap!("add rax, rdi\nret");
    let mut a = ExecutionState::default();
    let mut b = ExecutionState::default();
    a.regs.set_rdi(1);
    b.regs.set_rdi(100);
    for _ in 0..3 {
        assert_eq!(a.run(&program, None).outcome, Ok(HaltReason::Returned));
    }
    assert_eq!(b.run(&program, None).outcome, Ok(HaltReason::Returned));
    assert_eq!(a.regs.get_rax(), 3);
    assert_eq!(b.regs.get_rax(), 100);

    a.reset();
    assert_eq!(a.regs.gp[Register::RDI as usize].0, 0);
    assert_eq!(a.regs.get_rsp(), a.memory.end());
    assert_eq!(a.status(), Status::Ready);
}
