// Typed handles into the GC pool. Values carry these instead of pointers;
// the pool maps them back to objects.

macro_rules! define_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            #[inline(always)]
            pub fn index(self) -> u32 {
                self.0
            }
        }
    };
}

define_id!(
    /// An interned or long string.
    StrId
);
define_id!(
    /// A table.
    TableId
);
define_id!(
    /// A function: bytecode closure or native closure.
    FnId
);
define_id!(
    /// A full userdata.
    UserdataId
);
define_id!(
    /// A thread (coroutine or the main thread).
    ThreadId
);
define_id!(
    /// An upvalue cell.
    UpvalId
);

/// Untyped id used by the collector's worklists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GcId {
    Str(StrId),
    Table(TableId),
    Function(FnId),
    Userdata(UserdataId),
    Thread(ThreadId),
    Upval(UpvalId),
}

impl GcId {
    #[inline(always)]
    pub fn index(self) -> u32 {
        match self {
            GcId::Str(id) => id.0,
            GcId::Table(id) => id.0,
            GcId::Function(id) => id.0,
            GcId::Userdata(id) => id.0,
            GcId::Thread(id) => id.0,
            GcId::Upval(id) => id.0,
        }
    }
}
