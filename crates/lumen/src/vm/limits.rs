// Fixed execution limits and GC tuning
//
// Stack storage is pre-allocated and bounded; overflow and underflow are
// fatal runtime errors rather than reallocation points.

/// Operand stack depth.
pub const STACK_MAX: usize = 4096;

/// Call frame depth. Function calls nest the dispatch loop, so this also
/// bounds native recursion.
pub const FRAME_MAX: usize = 256;

/// Iterator stack depth (nested for-loops).
pub const ITER_MAX: usize = 256;

/// Initial per-opcode collection threshold.
pub const GC_NEXT_DEFAULT: u64 = 4096;

/// Adaptive threshold window.
pub const GC_NEXT_MIN: u64 = 1024;
pub const GC_NEXT_MAX: u64 = 1 << 20;

/// A cycle freeing at least this many objects counts as effective and
/// halves the threshold; anything less doubles it.
pub const GC_EFFECTIVE_FREES: usize = 128;

/// Default host frame-rate target, read by host-provided natives.
pub const TARGET_FPS: u32 = 60;
