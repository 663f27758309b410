/// Machine word. All guest arithmetic wraps modulo 2^16.
pub type Word = u16;

/// The GPU selector register is wider than the general-purpose file.
pub type Wide = u32;

/// RAM address. The address space is exactly one word wide.
pub type Address = u16;

/// Number of general-purpose registers (R0..R31).
pub const REGISTER_COUNT: usize = 32;

/// Total size of RAM, in words.
pub const RAM_SIZE: usize = 1 << 16;

/// R0: primary ALU output, overwritten by every binary ALU op.
pub const ALU_OUT: u8 = 0;

/// R1: secondary ALU output (MULT high word, DIV remainder).
pub const ALU_AUX: u8 = 1;

/// R2: link register, written by JAL.
pub const LINK: u8 = 2;

/// R3: software-convention stack pointer.
pub const STACK_POINTER: u8 = 3;

/// R4: first argument register of the calling convention.
pub const ARG_BASE: u8 = 4;

/// Registers the code generator hands out to variables and temporaries.
pub const ALLOC_FIRST: u8 = 5;
pub const ALLOC_LAST: u8 = 31;

/// At most this many positional arguments fit in the R4.. window.
pub const MAX_ARGS: usize = 27;

/// Initial stack pointer; the software stack grows downward from here.
pub const STACK_TOP: Word = 0x7FFF;

/// First address handed out by the compile-time allocator (globals, spill
/// slots, `malloc`).
pub const HEAP_START: Address = 0x1000;

/// The compile-time allocator must not grow into the stack region.
pub const HEAP_END: Address = 0x7000;

/// Display dimensions, in pixels. Each buffer row is one 32-bit word.
pub const SCREEN_SIZE: usize = 32;

/// Sprite table capacity (5-bit ids).
pub const SPRITE_SLOTS: usize = 32;

/// Text table capacity (14-bit ids).
pub const TEXT_SLOTS: usize = 16384;
