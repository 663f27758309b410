//! End-to-end scenarios: MCL source through the compiler, loader and
//! machine, checked against the architectural contract.

use pretty_assertions::assert_eq;

use mcl_emulator::host::input::QueuedKeys;
use mcl_emulator::host::{RunOutcome, VmHost};
use mcl_emulator::runtime::{FaultKind, KeySource, NoInput};
use mcl_emulator::{compile, load};

/// Compile, load and run MCL source; the machine state is left for
/// inspection.
fn run_mcl_with(source: &str, keys: Box<dyn KeySource>) -> VmHost {
    let assembly = compile(source).expect("compiles");
    let program = load(&assembly).expect("loads");
    let mut host = VmHost::new(program, keys);
    match host.run() {
        RunOutcome::Halted => host,
        other => panic!("program did not halt cleanly: {other:?}\n{assembly}"),
    }
}

fn run_mcl(source: &str) -> VmHost {
    run_mcl_with(source, Box::new(NoInput))
}

/// `main`'s result, which the generated code leaves in R0 at HALT.
fn result_of(source: &str) -> u16 {
    run_mcl(source).read_register(0)
}

fn run_asm(text: &str) -> VmHost {
    let program = load(text).expect("loads");
    let mut host = VmHost::new(program, Box::new(NoInput));
    match host.run() {
        RunOutcome::Halted => host,
        other => panic!("program did not halt cleanly: {other:?}"),
    }
}

#[test]
fn arithmetic_scenario_test() {
    assert_eq!(result_of("function main() { return 10 + 5 * 2 - 8 / 2; }"), 16);
}

#[test]
fn factorial_scenario_test() {
    let source = "
function f(n: int) {
    if (n <= 1) return 1;
    return n * f(n - 1);
}
function main() { return f(5); }";
    assert_eq!(result_of(source), 120);
}

#[test]
fn keyin_scenario_test() {
    let text = "
KEYIN i:0x1000
KEYIN i:0x1001
READ i:0x1000, 5
READ i:0x1001, 6
ADD 5, 6
HALT";
    let program = load(text).unwrap();
    let mut host = VmHost::new(program, Box::new(QueuedKeys::new([7, 4])));
    assert_eq!(host.run(), RunOutcome::Halted);
    assert_eq!(host.read_register(0), 11);
    assert_eq!(host.read_register(5), 7);
    assert_eq!(host.read_register(6), 4);
    assert_eq!(host.read_ram(0x1000), 7);
    assert_eq!(host.read_ram(0x1001), 4);
}

#[test]
fn gpu_diagonal_scenario_test() {
    let host = run_asm("CLRGRID i:0, i:0, i:32, i:32\nDRLINE i:0, i:0, i:31, i:31\nHALT");
    let frame = host.machine().gpu.edit_frame();
    for y in 0..32 {
        assert_eq!(frame[y], 1 << (31 - y), "row {y}");
    }
}

#[test]
fn selector_scenario_test() {
    let host = run_asm("MVR i:0x00010001, GPU\nHALT");
    assert_eq!(host.machine().gpu.selector(), 0x0001_0001);
}

#[test]
fn div_by_zero_scenario_test() {
    let program = load("MVR i:5, 4\nMVR i:0, 5\nDIV 4, 5").unwrap();
    let mut host = VmHost::new(program, Box::new(NoInput));
    match host.run() {
        RunOutcome::Fault(fault) => {
            assert_eq!(fault.kind, FaultKind::DivByZero);
            assert_eq!(fault.pc, 2);
        }
        other => panic!("expected fault, got {other:?}"),
    }
}

// ---------------------------------------------------------------------
// Compiler round-trips
// ---------------------------------------------------------------------

#[test]
fn compilation_is_deterministic_test() {
    let source = "
function helper(a: int, b: int) { return a * b + 1; }
function main() {
    var total: int = 0;
    for (var i: int = 0; i < 4; i = i + 1) {
        total = total + helper(i, i);
    }
    return total;
}";
    assert_eq!(compile(source).unwrap(), compile(source).unwrap());
}

/// Every operator, routed through variables so the lowering (not the
/// constant folder) is what runs.
#[test]
fn operator_table_test() {
    let cases: &[(&str, u16, u16, u16)] = &[
        ("a + b", 7, 5, 12),
        ("a + b", 0xFFFF, 1, 0),
        ("a - b", 5, 7, 0xFFFE),
        ("a * b", 300, 300, (300u32 * 300) as u16),
        ("a / b", 17, 5, 3),
        ("a % b", 17, 5, 2),
        ("a & b", 0b1100, 0b1010, 0b1000),
        ("a | b", 0b1100, 0b1010, 0b1110),
        ("a ^ b", 0b1100, 0b1010, 0b0110),
        ("a << b", 1, 3, 8),
        ("a >> b", 8, 2, 2),
        ("a == b", 4, 4, 1),
        ("a == b", 4, 5, 0),
        ("a != b", 4, 5, 1),
        ("a < b", 3, 4, 1),
        ("a < b", 4, 3, 0),
        ("a > b", 4, 3, 1),
        ("a <= b", 4, 4, 1),
        ("a >= b", 3, 4, 0),
        ("a && b", 2, 3, 1),
        ("a && b", 0, 3, 0),
        ("a || b", 0, 3, 1),
        ("a || b", 0, 0, 0),
    ];
    for &(expr, a, b, expected) in cases {
        let source = format!(
            "function main() {{ var a: int = {a}; var b: int = {b}; return {expr}; }}"
        );
        assert_eq!(result_of(&source), expected, "{expr} with a={a}, b={b}");
    }
}

#[test]
fn signed_comparison_test() {
    // -5 < 3 via the sign bit of the difference.
    let source = "function main() { var a: int = 0 - 5; var b: int = 3; return a < b; }";
    assert_eq!(result_of(source), 1);
}

#[test]
fn unary_operator_test() {
    assert_eq!(
        result_of("function main() { var a: int = 5; return -a + 6; }"),
        1
    );
    assert_eq!(
        result_of("function main() { var a: int = 0xFF00; return ~a; }"),
        0x00FF
    );
    assert_eq!(result_of("function main() { var a: int = 0; return !a; }"), 1);
    assert_eq!(result_of("function main() { var a: int = 2; return !a; }"), 0);
}

#[test]
fn while_loop_test() {
    let source = "
function main() {
    var total: int = 0;
    var i: int = 1;
    while (i <= 10) {
        total = total + i;
        i = i + 1;
    }
    return total;
}";
    assert_eq!(result_of(source), 55);
}

#[test]
fn for_loop_with_break_continue_test() {
    let source = "
function main() {
    var total: int = 0;
    for (var i: int = 0; i < 100; i = i + 1) {
        if (i == 7) continue;
        if (i == 10) break;
        total = total + i;
    }
    return total;
}";
    // 0..9 minus 7.
    assert_eq!(result_of(source), 45 - 7);
}

#[test]
fn switch_test() {
    let source = "
function pick(x: int) {
    switch (x) {
        case 1: return 10;
        case 3: return 30;
        default: return 99;
    }
}
function main() { return pick(3) + pick(2); }";
    assert_eq!(result_of(source), 129);
}

#[test]
fn switch_fallthrough_test() {
    let source = "
function main() {
    var y: int = 0;
    switch (1) {
        case 1: y = y + 1;
        case 2: y = y + 2; break;
        default: y = 100;
    }
    return y;
}";
    assert_eq!(result_of(source), 3);
}

#[test]
fn arrays_test() {
    let source = "
function main() {
    var arr: int[4];
    arr[0] = 10;
    arr[1] = 20;
    arr[2] = 30;
    var i: int = 1;
    return arr[i] + arr[2];
}";
    assert_eq!(result_of(source), 50);
}

#[test]
fn pointers_test() {
    let source = "
function main() {
    var x: int = 5;
    var p: int* = @x;
    *p = 42;
    return x;
}";
    assert_eq!(result_of(source), 42);
}

#[test]
fn pointer_arithmetic_test() {
    let source = "
function main() {
    var arr: int[2];
    var p: int* = @arr[0];
    *p = 7;
    *(p + 1) = 8;
    return arr[1];
}";
    assert_eq!(result_of(source), 8);
}

#[test]
fn array_as_argument_test() {
    let source = "
function set_first(arr: int*) {
    arr[0] = 123;
}
function main() {
    var arr: int[3];
    set_first(arr);
    return arr[0];
}";
    assert_eq!(result_of(source), 123);
}

#[test]
fn pointer_argument_test() {
    let source = "
function set_value(p: int*) { *p = 77; }
function main() {
    var x: int = 0;
    set_value(@x);
    return x;
}";
    assert_eq!(result_of(source), 77);
}

#[test]
fn nested_calls_test() {
    let source = "
function add(a: int, b: int) { return a + b; }
function twice(n: int) { return add(n, n); }
function main() { return twice(add(3, 4)); }";
    assert_eq!(result_of(source), 14);
}

#[test]
fn fibonacci_test() {
    let source = "
function fib(n: int) {
    if (n < 2) return n;
    return fib(n - 1) + fib(n - 2);
}
function main() { return fib(10); }";
    assert_eq!(result_of(source), 55);
}

#[test]
fn globals_test() {
    let source = "
var counter: int = 3;
function bump() { counter = counter + 1; return 0; }
function main() {
    bump();
    bump();
    return counter;
}";
    assert_eq!(result_of(source), 5);
}

#[test]
fn malloc_test() {
    let source = "
function main() {
    var p: int* = malloc(4);
    var q: int* = malloc(2);
    *p = 11;
    *q = 22;
    free(p);
    return *p + *q;
}";
    // Distinct allocations; free is a compile-time no-op.
    assert_eq!(result_of(source), 33);
}

#[test]
fn read_char_test() {
    let source = "function main() { return readChar() + readChar(); }";
    let host = run_mcl_with(source, Box::new(QueuedKeys::new([7, 4])));
    assert_eq!(host.read_register(0), 11);
}

#[test]
fn char_literals_test() {
    assert_eq!(result_of("function main() { return 'H'; }"), 7);
    assert_eq!(result_of("function main() { return 'e'; }"), 4);
}

#[test]
fn gpu_builtins_test() {
    let source = "
function main() {
    clearGrid(0, 0, 32, 32);
    fillGrid(0, 0, 4, 2);
    drawLine(0, 10, 31, 10);
    return 0;
}";
    let host = run_mcl(source);
    let frame = host.machine().gpu.edit_frame();
    assert_eq!(frame[0] >> 28, 0b1111);
    assert_eq!(frame[1] >> 28, 0b1111);
    assert_eq!(frame[10], u32::MAX);
}

#[test]
fn gpu_selector_helpers_test() {
    let source = "
function main() {
    setGPUBuffer(0, 1);
    setGPUBuffer(1, 1);
    return getGPUBuffer(0) + getGPUBuffer(1) * 2;
}";
    let host = run_mcl(source);
    assert_eq!(host.machine().gpu.selector(), 0x0001_0001);
    assert_eq!(host.read_register(0), 3);
}

#[test]
fn selector_helper_preserves_other_field_test() {
    // A raw wide write, then a helper touching only the edit side: the
    // display side must survive. Last write wins across both styles.
    let source = "
function main() {
    setGPUBuffer(1, 1);
    setGPUBuffer(0, 1);
    setGPUBuffer(0, 0);
    return getGPUBuffer(1);
}";
    let host = run_mcl(source);
    assert_eq!(host.read_register(0), 1);
    assert_eq!(host.machine().gpu.selector(), 0x0001_0000);
}

#[test]
fn dynamic_selector_index_test() {
    let source = "
function main() {
    var on: int = 1;
    setGPUBuffer(1, on);
    return getGPUBuffer(1);
}";
    assert_eq!(result_of(source), 1);
}

#[test]
fn sprite_drawing_from_mcl_test() {
    let source = "
function main() {
    loadSprite(2, 0x7FFF);
    drawSprite(2, 1, 1);
    return 0;
}";
    let host = run_mcl(source);
    let frame = host.machine().gpu.edit_frame();
    // Rows 1..3, columns 1..5 are lit.
    for y in 1..=3 {
        assert_eq!(frame[y], 0b11111 << (31 - 5), "row {y}");
    }
    assert_eq!(frame[0], 0);
}

#[test]
fn scroll_from_mcl_test() {
    let source = "
function main() {
    fillGrid(4, 4, 1, 1);
    scrollBuffer(0, 2);
    return 0;
}";
    let host = run_mcl(source);
    assert_eq!(host.machine().gpu.edit_frame()[2], 1 << (31 - 4));
}

#[test]
fn compile_errors_test() {
    assert!(compile("function main() { return missing; }").is_err());
    assert!(compile("function f() { return 0; } function main() { return f(1); }").is_err());
    assert!(compile("function main() { break; }").is_err());
    assert!(compile("function main() { return malloc(n); }").is_err());
    assert!(compile("function f() { return 0; }").is_err()); // no main
}

#[test]
fn deep_expression_test() {
    // Exercises temporary churn without exhausting the register file.
    let source = "
function main() {
    var a: int = 1;
    var b: int = 2;
    var c: int = 3;
    var d: int = 4;
    return (a + b) * (c + d) + (a * d - b) * (c - a + (b * (d + a)));
}";
    let expected = (1 + 2) * (3 + 4) + (1 * 4 - 2) * (3 - 1 + (2 * (4 + 1)));
    assert_eq!(result_of(source), expected as u16);
}

#[test]
fn logic_short_circuit_effects_test() {
    // The right operand of && must not run when the left is false.
    let source = "
var touched: int = 0;
function mark() { touched = 1; return 1; }
function main() {
    var zero: int = 0;
    if (zero && mark()) { return 100; }
    return touched;
}";
    assert_eq!(result_of(source), 0);
}
