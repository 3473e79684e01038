//! YASL VM - bytecode execution for the YASL scripting language.
//!
//! Values are reference counted; a fatal error stops the run and everything
//! the VM still holds is released when it is dropped.

pub mod builtins;
pub mod frame;
pub mod value;
pub mod vm;

pub use builtins::{create_builtins, MethodTable};
pub use frame::{Frame, LoopIter};
pub use value::{Builtin, BuiltinFn, FloatKey, Function, Key, List, Table, Value, ValueKind};
pub use vm::{VMConfig, VMError, DEFAULT_MAX_FRAME_DEPTH, DEFAULT_MAX_STACK_DEPTH, VM};
