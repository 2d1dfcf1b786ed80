// Interpreter limits, mirroring the constants luaconf.h pins down.

/// Maximum number of value-stack slots a single thread may grow to.
pub const MAX_STACK: usize = 1_000_000;

/// Extra slots kept available while handling an error, so the message
/// handler itself has room to run.
pub const ERROR_STACK_EXTRA: usize = 200;

/// Maximum re-entry depth through native functions (the C-call boundary).
pub const MAX_NATIVE_DEPTH: u32 = 200;

/// Strings at or below this length are interned.
pub const MAX_SHORT_LEN: usize = 40;

/// Maximum registers addressable by one function.
pub const MAX_REGS: usize = 255;

/// Maximum local variables per function.
pub const MAX_LOCALS: usize = 200;

/// Maximum upvalues per function.
pub const MAX_UPVALS: usize = 255;

/// Bound on `__index`/`__newindex` chains before "loop" is reported.
pub const MAX_TAG_LOOP: usize = 2000;

/// Heap bytes allocated before the first collection cycle triggers.
pub const GC_INITIAL_THRESHOLD: usize = 1 << 20;

/// Growth factor applied to the GC threshold after each cycle (percent).
pub const GC_PAUSE_PERCENT: usize = 200;

/// Items flushed per `SETLIST` batch.
pub const FIELDS_PER_FLUSH: usize = 50;
