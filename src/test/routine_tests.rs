use crate::exec::{ExecError, ExecutionState, StateArgs};
use crate::new_execution_state;
use crate::routines::*;

use pretty_assertions::assert_eq;

fn state() -> ExecutionState {
    new_execution_state(64 * 1024)
}

#[test]
fn test_integer_arithmetic() {
    let mut s = state();
    assert_eq!(add_asm(&mut s, 2, 3).unwrap(), 5);
    assert_eq!(add_asm(&mut s, -7, 3).unwrap(), -4);
    assert_eq!(add_asm(&mut s, i64::MAX, 1).unwrap(), i64::MIN);

    assert_eq!(max_asm(&mut s, -3, 7).unwrap(), 7);
    assert_eq!(max_asm(&mut s, 9, -1).unwrap(), 9);
    assert_eq!(max_asm(&mut s, 5, 5).unwrap(), 5);
    assert_eq!(max_asm(&mut s, i64::MIN, -1).unwrap(), -1);

    assert_eq!(multiply_add_asm(&mut s, 5, 6, 10).unwrap(), 40);
    assert_eq!(multiply_add_asm(&mut s, -3, 4, 2).unwrap(), -10);

    assert_eq!(complex_calculation(&mut s, 3, 4, 5).unwrap(), 22);
    assert_eq!(complex_calculation(&mut s, -2, 3, -1).unwrap(), -8);
}

#[test]
fn test_factorial() {
    let mut s = state();
    let expected = [1u64, 1, 2, 6, 24, 120, 720, 5040, 40320, 362880, 3628800];
    for (n, e) in expected.iter().enumerate() {
        assert_eq!(factorial_asm(&mut s, n as u64).unwrap(), *e, "{}!", n);
    }
    assert_eq!(factorial_asm(&mut s, 20).unwrap(), 2432902008176640000);
}

#[test]
fn test_fibonacci() {
    let mut s = state();
    let expected = [0i64, 1, 1, 2, 3, 5, 8, 13, 21, 34, 55];
    for (n, e) in expected.iter().enumerate() {
        assert_eq!(fibonacci_asm(&mut s, n as i64).unwrap(), *e, "fib({})", n);
        assert_eq!(s.peak_call_depth(), n.saturating_sub(1), "depth of fib({})", n);
        assert_eq!(s.call_depth(), 0);
        assert_eq!(s.regs.get_rsp(), s.memory.end());
    }
    assert_eq!(fibonacci_asm(&mut s, 20).unwrap(), 6765);
}

#[test]
fn test_fibonacci_depth_limit() {
    let mut s = ExecutionState::new(&StateArgs { memory_size: Some(64 * 1024), max_call_depth: Some(8), ..Default::default() });
    assert_eq!(fibonacci_asm(&mut s, 9).unwrap(), 34);
    assert_eq!(s.peak_call_depth(), 8);

    let fault = fibonacci_asm(&mut s, 10).unwrap_err();
    assert_eq!(fault.error, ExecError::StackOverflow);
    assert_eq!(s.call_depth(), 8);

    // the next call resets the state
    assert_eq!(fibonacci_asm(&mut s, 7).unwrap(), 13);
}

#[test]
fn test_strings() {
    let mut s = state();
    assert_eq!(strlen_asm(&mut s, b"Hello Assembly").unwrap(), 14);
    assert_eq!(strlen_asm(&mut s, b"").unwrap(), 0);
    assert_eq!(strlen_asm(&mut s, b"x").unwrap(), 1);

    assert_eq!(strcpy_asm(&mut s, b"Hello").unwrap(), b"Hello".to_vec());
    assert_eq!(strcpy_asm(&mut s, b"").unwrap(), Vec::<u8>::new());

    assert_eq!(memcmp_asm(&mut s, b"ABC", b"ABD", 3).unwrap(), -1);
    assert_eq!(memcmp_asm(&mut s, b"ABD", b"ABC", 3).unwrap(), 1);
    assert_eq!(memcmp_asm(&mut s, b"ABC", b"ABC", 3).unwrap(), 0);
    assert_eq!(memcmp_asm(&mut s, b"ABC", b"ABD", 2).unwrap(), 0);
    assert_eq!(memcmp_asm(&mut s, b"A", b"Z", 0).unwrap(), 0);
    assert_eq!(memcmp_asm(&mut s, &[0x80], &[0x7f], 1).unwrap(), 1);
}

#[test]
fn test_arrays() {
    let mut s = state();
    let data = [5i64, 12, 8, 3, 17, 9, 1, 15];

    assert_eq!(array_sum_asm(&mut s, &data).unwrap(), 70);
    assert_eq!(array_sum_asm(&mut s, &[]).unwrap(), 0);
    assert_eq!(array_sum_asm(&mut s, &[-5, 3]).unwrap(), -2);

    assert_eq!(array_search_asm(&mut s, &data, 17).unwrap(), 4);
    assert_eq!(array_search_asm(&mut s, &data, 5).unwrap(), 0);
    assert_eq!(array_search_asm(&mut s, &data, 99).unwrap(), -1);
    assert_eq!(array_search_asm(&mut s, &[], 0).unwrap(), -1);
    assert_eq!(array_search_asm(&mut s, &[2, 7, 7], 7).unwrap(), 1);

    assert_eq!(array_max_asm(&mut s, &data).unwrap(), 17);
    assert_eq!(array_max_asm(&mut s, &[-8, -3, -20]).unwrap(), -3);
    assert_eq!(array_max_asm(&mut s, &[42]).unwrap(), 42);
    assert_eq!(array_max_asm(&mut s, &[]).unwrap(), 0);
}

#[test]
fn test_matrix_get() {
    let mut s = state();
    let m = [1i64, 2, 3, 4, 5, 6, 7, 8, 9];
    assert_eq!(matrix_get_asm(&mut s, &m, 3, 3, 1, 2).unwrap(), 6);
    assert_eq!(matrix_get_asm(&mut s, &m, 3, 3, 0, 0).unwrap(), 1);
    assert_eq!(matrix_get_asm(&mut s, &m, 3, 3, 2, 2).unwrap(), 9);

    let m = [10i64, 11, 12, 13, 14, 15, 16, 17];
    assert_eq!(matrix_get_asm(&mut s, &m, 2, 4, 1, 3).unwrap(), 17);

    // no bounds checking beyond what memory itself provides
    let mut s = new_execution_state(4096);
    let fault = matrix_get_asm(&mut s, &m, 2, 4, 1000, 0).unwrap_err();
    assert_eq!(fault.error, ExecError::OutOfBounds);
    let ctx = fault.context.unwrap();
    assert_eq!(ctx.ip, 4);
    assert_eq!(ctx.instruction, "mov rax, qword ptr [rsi]");
}

#[test]
fn test_popcount() {
    let mut s = state();
    assert_eq!(popcount_asm(&mut s, 0).unwrap(), (0, 6));
    assert_eq!(popcount_asm(&mut s, 1).unwrap(), (1, 12));
    assert_eq!(popcount_asm(&mut s, 0xff).unwrap(), (8, 54));
    assert_eq!(popcount_asm(&mut s, 0x8000_0000_0000_0001).unwrap(), (2, 18));
    assert_eq!(popcount_asm(&mut s, u64::MAX).unwrap(), (64, 390));

    let v = 0xDEAD_BEEF_CAFE_BABE;
    assert_eq!(popcount_asm(&mut s, v).unwrap(), (v.count_ones() as i32, 6 + 6 * v.count_ones() as u64));
    assert_eq!(v.count_ones(), 46);
}

#[test]
fn test_bit_manipulation() {
    let mut s = state();
    assert_eq!(extract_bits_asm(&mut s, 0xDEAD_BEEF_CAFE_BABE, 8, 8).unwrap(), 0xBA);
    assert_eq!(extract_bits_asm(&mut s, 0xF0, 4, 4).unwrap(), 0xF);
    assert_eq!(extract_bits_asm(&mut s, 0xDEAD_BEEF_CAFE_BABE, 32, 16).unwrap(), 0xBEEF);

    assert_eq!(set_bit_asm(&mut s, 0, 63).unwrap(), 1 << 63);
    assert_eq!(set_bit_asm(&mut s, 0b0101, 1).unwrap(), 0b0111);
    assert_eq!(set_bit_asm(&mut s, 8, 3).unwrap(), 8);

    assert_eq!(clear_bit_asm(&mut s, 0xff, 0).unwrap(), 0xfe);
    assert_eq!(clear_bit_asm(&mut s, u64::MAX, 63).unwrap(), i64::MAX as u64);
    assert_eq!(clear_bit_asm(&mut s, 0b1000, 2).unwrap(), 0b1000);

    assert_eq!(rotate_left_asm(&mut s, 0x8000_0000_0000_0001, 1).unwrap(), 3);
    assert_eq!(rotate_left_asm(&mut s, 0x0123_4567_89AB_CDEF, 8).unwrap(), 0x2345_6789_ABCD_EF01);
    assert_eq!(rotate_left_asm(&mut s, 0x1234, 64).unwrap(), 0x1234);

    assert_eq!(is_power_of_2_asm(&mut s, 16).unwrap(), 1);
    assert_eq!(is_power_of_2_asm(&mut s, 17).unwrap(), 0);
    assert_eq!(is_power_of_2_asm(&mut s, 0).unwrap(), 0);
    assert_eq!(is_power_of_2_asm(&mut s, 1).unwrap(), 1);
    assert_eq!(is_power_of_2_asm(&mut s, 1 << 63).unwrap(), 1);
}

#[test]
fn test_scalar_float() {
    let mut s = state();
    assert_eq!(add_floats_sse(&mut s, 1.5, 2.25).unwrap(), 3.75);
    assert_eq!(add_floats_sse(&mut s, 0.1, 0.2).unwrap(), 0.1f32 + 0.2f32);

    assert_eq!(compare_floats_sse(&mut s, 1.0, 2.0).unwrap(), -1);
    assert_eq!(compare_floats_sse(&mut s, 2.0, 1.0).unwrap(), 1);
    assert_eq!(compare_floats_sse(&mut s, 3.0, 3.0).unwrap(), 0);
    assert_eq!(compare_floats_sse(&mut s, f32::NAN, 1.0).unwrap(), 0);

    assert_eq!(sqrt_sse(&mut s, 16.0).unwrap(), 4.0);
    assert_eq!(sqrt_sse(&mut s, 2.0).unwrap(), 2.0f32.sqrt());
    assert!(sqrt_sse(&mut s, -1.0).unwrap().is_nan());

    assert_eq!(fast_inv_sqrt_sse(&mut s, 4.0).unwrap(), 0.5);
    assert_eq!(fast_inv_sqrt_sse(&mut s, 16.0).unwrap(), 0.25);
}

#[test]
fn test_packed_float() {
    let mut s = state();
    assert_eq!(add_vectors_sse(&mut s, [1.0, 2.0, 3.0, 4.0], [5.0, 6.0, 7.0, 8.0]).unwrap(), [6.0, 8.0, 10.0, 12.0]);
    assert_eq!(add_vectors_sse(&mut s, [0.5, -1.0, 0.0, 1e3], [0.5, 1.0, -0.0, 1e3]).unwrap(), [1.0, 0.0, 0.0, 2e3]);

    let a = [1.0f32, 2.0, 3.0, 4.0, 100.0, 100.0];
    let b = [5.0f32, 6.0, 7.0, 8.0, 100.0, 100.0];
    assert_eq!(dot_product_sse(&mut s, &a[..4], &b[..4], 4).unwrap(), 70.0);
    assert_eq!(dot_product_sse(&mut s, &a, &b, 6).unwrap(), 70.0);
    assert_eq!(dot_product_sse(&mut s, &a, &b, 0).unwrap(), 0.0);
    assert_eq!(dot_product_sse(&mut s, &[1.0; 8], &[2.0; 8], 8).unwrap(), 16.0);
}

#[test]
fn test_state_reuse() {
    // wrappers reset the state, so earlier calls leave nothing behind
    let mut s = state();
    assert_eq!(strlen_asm(&mut s, b"some text").unwrap(), 9);
    assert_eq!(array_sum_asm(&mut s, &[1, 2, 3]).unwrap(), 6);
    assert_eq!(add_floats_sse(&mut s, 1.0, 1.0).unwrap(), 2.0);
    assert_eq!(s.regs.get_rdi(), 0);
    assert_eq!(max_asm(&mut s, 1, 2).unwrap(), 2);
    assert_eq!(s.regs.xmm[0].get_f32(0), 0.0);

    // the programs are shared between independent states
    let mut other = state();
    assert_eq!(fibonacci_asm(&mut other, 8).unwrap(), 21);
    assert_eq!(fibonacci_asm(&mut s, 6).unwrap(), 8);
    assert_eq!(other.regs.get_rax(), 21);
}
