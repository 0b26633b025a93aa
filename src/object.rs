use std::{fmt, rc::Rc};

use crate::{Chunk, ObjRef, Table, Value};

/// An immutable interned string.
///
/// The hash is FNV-1a over the bytes and is computed once, when the string
/// enters the intern table.
#[derive(Debug)]
pub struct ObjStr {
    /// The string's content
    pub data: Box<str>,
    /// FNV-1a hash of the content
    pub hash: u32,
}

/// A function object that holds the bytecode of the function along with other metadata.
///
/// Functions are immutable once compilation finishes. The chunk is shared
/// through an `Rc` so a call frame can keep the running chunk alive without
/// holding a borrow of the heap.
#[derive(Debug)]
pub struct ObjFun {
    /// The name of the function, or `None` for the top-level script
    pub name: Option<ObjRef>,
    /// Number of parameters the function has
    pub arity: u8,
    /// Number of variables the function captures from enclosing scopes
    pub upvalue_count: usize,
    /// The bytecode chunk of this function
    pub chunk: Rc<Chunk>,
}

/// A native function
#[derive(Clone)]
pub struct NativeFun {
    /// Function's name
    pub name: ObjRef,
    /// Number of parameters
    pub arity: u8,
    /// Native function reference
    pub call: fn(&[Value]) -> Value,
}

impl fmt::Debug for NativeFun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<native fn>")
    }
}

/// A structure for managing a closed-over value.
#[derive(Debug)]
pub enum ObjUpvalue {
    /// This field stores a slot offset which points to a value that was captured
    Open(usize),
    /// This stores the closed over value
    Closed(Value),
}

/// A function that captures its surrounding environment.
#[derive(Debug)]
pub struct ObjClosure {
    /// The base function of this closure
    pub fun: ObjRef,
    /// Upvalues for indirect access to closed-over variables
    pub upvalues: Vec<ObjRef>,
}

/// A class object, holding the methods bound to it so far.
#[derive(Debug)]
pub struct ObjClass {
    /// The name of the class
    pub name: ObjRef,
    /// Mapping from method name to closure
    pub methods: Table,
}

/// A class instance.
#[derive(Debug)]
pub struct ObjInstance {
    /// The class this object is an instance of
    pub class: ObjRef,
    /// The fields stored on this instance
    pub fields: Table,
}

/// A method closure paired with the instance it was accessed through.
#[derive(Debug)]
pub struct ObjBoundMethod {
    /// The instance the method was loaded from
    pub receiver: Value,
    /// The closure implementing the method
    pub method: ObjRef,
}

/// The content of a heap object slot.
#[derive(Debug)]
pub enum ObjBody {
    /// An interned string
    Str(ObjStr),
    /// A compiled function
    Fun(ObjFun),
    /// A native function
    Native(NativeFun),
    /// A closure over a compiled function
    Closure(ObjClosure),
    /// A captured variable
    Upvalue(ObjUpvalue),
    /// A class
    Class(ObjClass),
    /// An instance of a class
    Instance(ObjInstance),
    /// A method bound to an instance
    BoundMethod(ObjBoundMethod),
}

impl ObjBody {
    /// A short human readable name for the object's kind, used by the
    /// collector's logging.
    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::Fun(_) => "function",
            Self::Native(_) => "native",
            Self::Closure(_) => "closure",
            Self::Upvalue(_) => "upvalue",
            Self::Class(_) => "class",
            Self::Instance(_) => "instance",
            Self::BoundMethod(_) => "bound method",
        }
    }
}
