use std::{
    io::{self, Write},
    rc::Rc,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::{
    compile, Chunk, Error, Heap, NativeFun, ObjBody, ObjBoundMethod, ObjClass, ObjClosure,
    ObjInstance, ObjRef, ObjUpvalue, OpCode, RuntimeError, Table, Value, MAX_FRAMES, MAX_STACK,
};

#[cfg(feature = "trace_execution")]
use crate::disassemble_instruction;

/// Per-invocation record holding the executing closure, its bytecode, the
/// instruction pointer, and the base of the frame's stack window.
#[derive(Debug)]
struct CallFrame {
    closure: ObjRef,
    chunk: Rc<Chunk>,
    ip: usize,
    base: usize,
}

/// A bytecode virtual machine for the Lox programming language.
///
/// The machine owns the heap, the globals, the value and call stacks, and
/// the open-upvalue list; together those are also the garbage collector's
/// root set. Everything `print` writes goes to the output sink given at
/// construction.
#[derive(Debug)]
pub struct VM<W = io::Stdout> {
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: Table,
    // Sorted by stack slot, so the list is closed from the back.
    open_upvalues: Vec<ObjRef>,
    heap: Heap,
    init_string: ObjRef,
    out: W,
}

impl Default for VM<io::Stdout> {
    fn default() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> VM<W> {
    /// Create a virtual machine writing `print` output to the given sink.
    pub fn new(out: W) -> Self {
        let mut heap = Heap::new();
        let init_string = heap.intern("init");
        let mut vm = Self {
            stack: Vec::with_capacity(MAX_STACK),
            frames: Vec::with_capacity(MAX_FRAMES),
            globals: Table::new(),
            open_upvalues: Vec::new(),
            heap,
            init_string,
            out,
        };
        vm.define_native("clock", 0, native_clock);
        vm
    }

    /// The output sink `print` writes to.
    pub fn output(&self) -> &W {
        &self.out
    }

    /// Compile and run the given source. Globals persist across calls, so
    /// a REPL can keep feeding lines into one machine.
    pub fn interpret(&mut self, src: &str) -> Result<(), Error> {
        let fun = compile(src, &mut self.heap)?;
        // Allocated straight on the heap: collection only happens at the
        // VM's own safepoints, and the closure is rooted on the stack
        // before the first one is reached.
        let closure = self.heap.alloc(ObjBody::Closure(ObjClosure {
            fun,
            upvalues: Vec::new(),
        }));
        match self.run_closure(closure) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.report_runtime_error(&err);
                self.reset();
                Err(Error::Runtime)
            }
        }
    }

    fn run_closure(&mut self, closure: ObjRef) -> Result<(), RuntimeError> {
        self.push(Value::from(closure))?;
        self.call_closure(closure, 0)?;
        self.run()
    }

    fn reset(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
    }

    fn report_runtime_error(&self, err: &RuntimeError) {
        eprintln!("{}", err);
        for frame in self.frames.iter().rev() {
            // The instruction pointer has moved past the failing
            // instruction (or past the call, for outer frames).
            let pos = frame.chunk.position(frame.ip.saturating_sub(1));
            let fun = self.heap.fun(self.heap.closure(frame.closure).fun);
            match fun.name {
                Some(name) => eprintln!("{} in {}()", pos, self.heap.str(name)),
                None => eprintln!("{} in script", pos),
            }
        }
    }

    fn run(&mut self) -> Result<(), RuntimeError> {
        loop {
            #[cfg(feature = "trace_execution")]
            {
                print!("          ");
                for &value in &self.stack {
                    print!("[ {} ]", self.heap.value_to_string(value));
                }
                println!();
                let frame = self.frames.last().expect("A frame is active while the VM runs.");
                let _ = disassemble_instruction(&frame.chunk, frame.ip, &self.heap, &mut io::stdout());
            }

            let op = {
                let frame = self
                    .frames
                    .last_mut()
                    .expect("A frame is active while the VM runs.");
                let (op, _) = frame.chunk.read_instruction(frame.ip);
                frame.ip += 1;
                op.clone()
            };

            match op {
                OpCode::Constant(id) => {
                    let value = self.read_const(id);
                    self.push(value)?;
                }
                OpCode::Nil => self.push(Value::nil())?,
                OpCode::True => self.push(Value::from(true))?,
                OpCode::False => self.push(Value::from(false))?,
                OpCode::Pop => {
                    self.pop()?;
                }
                OpCode::GetLocal(slot) => {
                    let local = self.stack[self.frame().base + usize::from(slot)];
                    self.push(local)?;
                }
                OpCode::SetLocal(slot) => {
                    let value = self.peek(0)?;
                    let slot = self.frame().base + usize::from(slot);
                    self.stack[slot] = value;
                }
                OpCode::GetGlobal(id) => {
                    let name = self.read_const(id).as_obj();
                    let hash = self.heap.str_hash(name);
                    let value = self.globals.get(name, hash).ok_or_else(|| {
                        RuntimeError::UndefinedVariable(self.heap.str(name).to_string())
                    })?;
                    self.push(value)?;
                }
                OpCode::DefineGlobal(id) => {
                    let name = self.read_const(id).as_obj();
                    let hash = self.heap.str_hash(name);
                    let value = self.peek(0)?;
                    self.globals.set(name, hash, value);
                    self.pop()?;
                }
                OpCode::SetGlobal(id) => {
                    let name = self.read_const(id).as_obj();
                    let hash = self.heap.str_hash(name);
                    let value = self.peek(0)?;
                    if self.globals.set(name, hash, value) {
                        // Assignment must not create the variable; undo the
                        // insert before reporting.
                        self.globals.remove(name, hash);
                        return Err(RuntimeError::UndefinedVariable(
                            self.heap.str(name).to_string(),
                        ));
                    }
                }
                OpCode::GetUpvalue(index) => {
                    let upvalue = self.current_upvalue(index);
                    let value = match self.heap.upvalue(upvalue) {
                        ObjUpvalue::Open(slot) => self.stack[*slot],
                        ObjUpvalue::Closed(value) => *value,
                    };
                    self.push(value)?;
                }
                OpCode::SetUpvalue(index) => {
                    let value = self.peek(0)?;
                    let upvalue = self.current_upvalue(index);
                    match self.heap.upvalue_mut(upvalue) {
                        ObjUpvalue::Open(slot) => {
                            let slot = *slot;
                            self.stack[slot] = value;
                        }
                        ObjUpvalue::Closed(closed) => *closed = value,
                    }
                }
                OpCode::GetProperty(id) => {
                    let name = self.read_const(id).as_obj();
                    let hash = self.heap.str_hash(name);
                    let instance = self
                        .as_instance(self.peek(0)?)
                        .ok_or(RuntimeError::NoProperties)?;
                    let field = self.heap.instance(instance).fields.get(name, hash);
                    match field {
                        Some(value) => {
                            self.pop()?;
                            self.push(value)?;
                        }
                        None => {
                            let class = self.heap.instance(instance).class;
                            self.bind_method(class, name, hash)?;
                        }
                    }
                }
                OpCode::SetProperty(id) => {
                    let name = self.read_const(id).as_obj();
                    let hash = self.heap.str_hash(name);
                    let instance = self
                        .as_instance(self.peek(1)?)
                        .ok_or(RuntimeError::NoFields)?;
                    let value = self.peek(0)?;
                    self.heap.instance_mut(instance).fields.set(name, hash, value);
                    let value = self.pop()?;
                    self.pop()?;
                    self.push(value)?;
                }
                OpCode::GetSuper(id) => {
                    let name = self.read_const(id).as_obj();
                    let hash = self.heap.str_hash(name);
                    let superclass = self.pop()?.as_obj();
                    self.bind_method(superclass, name, hash)?;
                }
                OpCode::Equal => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.push(Value::from(a == b))?;
                }
                OpCode::Greater => self.binary_number_op(|a, b| Value::from(a > b))?,
                OpCode::Less => self.binary_number_op(|a, b| Value::from(a < b))?,
                OpCode::Add => {
                    let b = self.peek(0)?;
                    let a = self.peek(1)?;
                    if a.is_number() && b.is_number() {
                        self.pop()?;
                        self.pop()?;
                        self.push(Value::from(a.as_number() + b.as_number()))?;
                    } else if self.is_str(a) && self.is_str(b) {
                        // Both operands stay on the stack while the result
                        // is interned, keeping them visible to a collection
                        // triggered by the allocation.
                        let mut result = self.heap.str(a.as_obj()).to_string();
                        result.push_str(self.heap.str(b.as_obj()));
                        let obj = self.take_string(result);
                        self.pop()?;
                        self.pop()?;
                        self.push(Value::from(obj))?;
                    } else {
                        return Err(RuntimeError::InvalidAddOperands);
                    }
                }
                OpCode::Subtract => self.binary_number_op(|a, b| Value::from(a - b))?,
                OpCode::Multiply => self.binary_number_op(|a, b| Value::from(a * b))?,
                OpCode::Divide => self.binary_number_op(|a, b| Value::from(a / b))?,
                OpCode::Not => {
                    let value = self.pop()?;
                    self.push(Value::from(value.is_falsey()))?;
                }
                OpCode::Negate => {
                    let value = self.peek(0)?;
                    if !value.is_number() {
                        return Err(RuntimeError::OperandMustBeNumber);
                    }
                    self.pop()?;
                    self.push(Value::from(-value.as_number()))?;
                }
                OpCode::Print => {
                    let value = self.pop()?;
                    let text = self.heap.value_to_string(value);
                    let _ = writeln!(self.out, "{}", text);
                }
                OpCode::Jump(offset) => {
                    self.frame_mut().ip += usize::from(offset);
                }
                OpCode::JumpIfFalse(offset) => {
                    if self.peek(0)?.is_falsey() {
                        self.frame_mut().ip += usize::from(offset);
                    }
                }
                OpCode::Loop(offset) => {
                    self.frame_mut().ip -= usize::from(offset);
                }
                OpCode::Call(argc) => {
                    let callee = self.peek(usize::from(argc))?;
                    self.call_value(callee, argc)?;
                }
                OpCode::Invoke(id, argc) => {
                    let name = self.read_const(id).as_obj();
                    let hash = self.heap.str_hash(name);
                    let receiver = self.peek(usize::from(argc))?;
                    let instance = self.as_instance(receiver).ok_or(RuntimeError::NoMethods)?;
                    // A field holding a callable shadows any method of the
                    // same name.
                    let field = self.heap.instance(instance).fields.get(name, hash);
                    match field {
                        Some(value) => {
                            let slot = self.stack.len() - 1 - usize::from(argc);
                            self.stack[slot] = value;
                            self.call_value(value, argc)?;
                        }
                        None => {
                            let class = self.heap.instance(instance).class;
                            self.invoke_from_class(class, name, hash, argc)?;
                        }
                    }
                }
                OpCode::SuperInvoke(id, argc) => {
                    let name = self.read_const(id).as_obj();
                    let hash = self.heap.str_hash(name);
                    let superclass = self.pop()?.as_obj();
                    self.invoke_from_class(superclass, name, hash, argc)?;
                }
                OpCode::Closure(id, upvalue_refs) => {
                    let fun = self.read_const(id).as_obj();
                    let closure = self.alloc(ObjBody::Closure(ObjClosure {
                        fun,
                        upvalues: Vec::with_capacity(upvalue_refs.len()),
                    }));
                    // Root the closure before capturing: every capture may
                    // allocate an upvalue and trigger a collection.
                    self.push(Value::from(closure))?;
                    for upvalue_ref in upvalue_refs {
                        let upvalue = if upvalue_ref.is_local {
                            let slot = self.frame().base + usize::from(upvalue_ref.index);
                            self.capture_upvalue(slot)
                        } else {
                            self.current_upvalue(upvalue_ref.index)
                        };
                        self.heap.closure_mut(closure).upvalues.push(upvalue);
                    }
                }
                OpCode::CloseUpvalue => {
                    self.close_upvalues(self.stack.len() - 1);
                    self.pop()?;
                }
                OpCode::Return => {
                    let result = self.pop()?;
                    let frame = self
                        .frames
                        .pop()
                        .expect("A frame is active while the VM runs.");
                    self.close_upvalues(frame.base);
                    self.stack.truncate(frame.base);
                    if self.frames.is_empty() {
                        return Ok(());
                    }
                    self.push(result)?;
                }
                OpCode::Class(id) => {
                    let name = self.read_const(id).as_obj();
                    let class = self.alloc(ObjBody::Class(ObjClass {
                        name,
                        methods: Table::new(),
                    }));
                    self.push(Value::from(class))?;
                }
                OpCode::Inherit => {
                    let superclass = self.peek(1)?;
                    let superclass = self
                        .as_class(superclass)
                        .ok_or(RuntimeError::InvalidSuperclass)?;
                    let subclass = self.peek(0)?.as_obj();
                    // Copy-down inheritance: methods declared later on the
                    // subclass override the copies.
                    let methods: Vec<(ObjRef, Value)> =
                        self.heap.class(superclass).methods.iter().collect();
                    for (name, method) in methods {
                        let hash = self.heap.str_hash(name);
                        self.heap.class_mut(subclass).methods.set(name, hash, method);
                    }
                    self.pop()?;
                }
                OpCode::Method(id) => {
                    let name = self.read_const(id).as_obj();
                    let hash = self.heap.str_hash(name);
                    let method = self.peek(0)?;
                    let class = self.peek(1)?.as_obj();
                    self.heap.class_mut(class).methods.set(name, hash, method);
                    self.pop()?;
                }
            }
        }
    }

    fn call_value(&mut self, callee: Value, argc: u8) -> Result<(), RuntimeError> {
        enum Callee {
            Closure,
            Native(NativeFun),
            Class,
            Bound(Value, ObjRef),
            Other,
        }

        if !callee.is_obj() {
            return Err(RuntimeError::InvalidCallee);
        }
        let obj = callee.as_obj();
        let kind = match self.heap.body(obj) {
            ObjBody::Closure(_) => Callee::Closure,
            ObjBody::Native(native) => Callee::Native(native.clone()),
            ObjBody::Class(_) => Callee::Class,
            ObjBody::BoundMethod(bound) => Callee::Bound(bound.receiver, bound.method),
            _ => Callee::Other,
        };
        match kind {
            Callee::Closure => self.call_closure(obj, argc),
            Callee::Native(native) => self.call_native(&native, argc),
            Callee::Class => self.call_class(obj, argc),
            Callee::Bound(receiver, method) => {
                let slot = self.stack.len() - 1 - usize::from(argc);
                self.stack[slot] = receiver;
                self.call_closure(method, argc)
            }
            Callee::Other => Err(RuntimeError::InvalidCallee),
        }
    }

    fn call_closure(&mut self, closure: ObjRef, argc: u8) -> Result<(), RuntimeError> {
        let fun = self.heap.closure(closure).fun;
        let (arity, chunk) = {
            let fun = self.heap.fun(fun);
            (fun.arity, Rc::clone(&fun.chunk))
        };
        if argc != arity {
            return Err(RuntimeError::ArityMismatch(arity, argc));
        }
        if self.frames.len() == MAX_FRAMES {
            return Err(RuntimeError::StackOverflow);
        }
        let base = self.stack.len() - usize::from(argc) - 1;
        self.frames.push(CallFrame {
            closure,
            chunk,
            ip: 0,
            base,
        });
        Ok(())
    }

    fn call_native(&mut self, native: &NativeFun, argc: u8) -> Result<(), RuntimeError> {
        if argc != native.arity {
            return Err(RuntimeError::ArityMismatch(native.arity, argc));
        }
        let first_arg = self.stack.len() - usize::from(argc);
        let result = (native.call)(&self.stack[first_arg..]);
        self.stack.truncate(first_arg - 1);
        self.push(result)
    }

    fn call_class(&mut self, class: ObjRef, argc: u8) -> Result<(), RuntimeError> {
        let instance = self.alloc(ObjBody::Instance(ObjInstance {
            class,
            fields: Table::new(),
        }));
        let slot = self.stack.len() - 1 - usize::from(argc);
        self.stack[slot] = Value::from(instance);
        let hash = self.heap.str_hash(self.init_string);
        let init = self.heap.class(class).methods.get(self.init_string, hash);
        match init {
            Some(init) => self.call_closure(init.as_obj(), argc),
            None if argc != 0 => Err(RuntimeError::ArityMismatch(0, argc)),
            None => Ok(()),
        }
    }

    fn invoke_from_class(
        &mut self,
        class: ObjRef,
        name: ObjRef,
        hash: u32,
        argc: u8,
    ) -> Result<(), RuntimeError> {
        let method = self
            .heap
            .class(class)
            .methods
            .get(name, hash)
            .ok_or_else(|| RuntimeError::UndefinedProperty(self.heap.str(name).to_string()))?;
        self.call_closure(method.as_obj(), argc)
    }

    fn bind_method(&mut self, class: ObjRef, name: ObjRef, hash: u32) -> Result<(), RuntimeError> {
        let method = self
            .heap
            .class(class)
            .methods
            .get(name, hash)
            .ok_or_else(|| RuntimeError::UndefinedProperty(self.heap.str(name).to_string()))?;
        let receiver = self.peek(0)?;
        let bound = self.alloc(ObjBody::BoundMethod(ObjBoundMethod {
            receiver,
            method: method.as_obj(),
        }));
        self.pop()?;
        self.push(Value::from(bound))
    }

    fn capture_upvalue(&mut self, slot: usize) -> ObjRef {
        let heap = &self.heap;
        match self
            .open_upvalues
            .binary_search_by(|&upvalue| open_upvalue_slot(heap, upvalue).cmp(&slot))
        {
            // Sibling closures capturing the same variable share one
            // upvalue object, so writes through either stay visible.
            Ok(found) => self.open_upvalues[found],
            Err(insert_at) => {
                let upvalue = self.alloc(ObjBody::Upvalue(ObjUpvalue::Open(slot)));
                self.open_upvalues.insert(insert_at, upvalue);
                upvalue
            }
        }
    }

    fn close_upvalues(&mut self, from: usize) {
        while let Some(&upvalue) = self.open_upvalues.last() {
            let slot = open_upvalue_slot(&self.heap, upvalue);
            if slot < from {
                break;
            }
            let value = self.stack[slot];
            *self.heap.upvalue_mut(upvalue) = ObjUpvalue::Closed(value);
            self.open_upvalues.pop();
        }
    }

    fn current_upvalue(&self, index: u8) -> ObjRef {
        let frame = self.frame();
        self.heap.closure(frame.closure).upvalues[usize::from(index)]
    }

    fn binary_number_op(&mut self, op: fn(f64, f64) -> Value) -> Result<(), RuntimeError> {
        let b = self.peek(0)?;
        let a = self.peek(1)?;
        if !a.is_number() || !b.is_number() {
            return Err(RuntimeError::OperandsMustBeNumbers);
        }
        self.pop()?;
        self.pop()?;
        self.push(op(a.as_number(), b.as_number()))
    }

    fn as_instance(&self, value: Value) -> Option<ObjRef> {
        if value.is_obj() {
            let obj = value.as_obj();
            if matches!(self.heap.body(obj), ObjBody::Instance(_)) {
                return Some(obj);
            }
        }
        None
    }

    fn as_class(&self, value: Value) -> Option<ObjRef> {
        if value.is_obj() {
            let obj = value.as_obj();
            if matches!(self.heap.body(obj), ObjBody::Class(_)) {
                return Some(obj);
            }
        }
        None
    }

    fn is_str(&self, value: Value) -> bool {
        value.is_obj() && matches!(self.heap.body(value.as_obj()), ObjBody::Str(_))
    }

    fn read_const(&self, id: u8) -> Value {
        self.frame().chunk.read_const(usize::from(id))
    }

    fn frame(&self) -> &CallFrame {
        self.frames
            .last()
            .expect("A frame is active while the VM runs.")
    }

    fn frame_mut(&mut self) -> &mut CallFrame {
        self.frames
            .last_mut()
            .expect("A frame is active while the VM runs.")
    }

    /// Allocation safepoint: a collection may run here, right before the
    /// new object exists. Everything live must already be reachable from
    /// the roots.
    fn alloc(&mut self, body: ObjBody) -> ObjRef {
        self.maybe_collect();
        self.heap.alloc(body)
    }

    fn take_string(&mut self, text: String) -> ObjRef {
        self.maybe_collect();
        self.heap.take(text)
    }

    fn maybe_collect(&mut self) {
        if cfg!(feature = "stress_gc") || self.heap.should_collect() {
            self.collect_garbage();
        }
    }

    fn collect_garbage(&mut self) {
        #[cfg(feature = "log_gc")]
        let before = self.heap.bytes_allocated();
        #[cfg(feature = "log_gc")]
        eprintln!("-- gc begin");

        for &value in &self.stack {
            self.heap.mark_value(value);
        }
        for frame in &self.frames {
            self.heap.mark_object(frame.closure);
        }
        for &upvalue in &self.open_upvalues {
            self.heap.mark_object(upvalue);
        }
        for (name, value) in self.globals.iter() {
            self.heap.mark_object(name);
            self.heap.mark_value(value);
        }
        self.heap.mark_object(self.init_string);

        self.heap.trace();
        self.heap.remove_white_strings();
        self.heap.sweep();

        #[cfg(feature = "log_gc")]
        {
            eprintln!("-- gc end");
            eprintln!(
                "   collected {} bytes (from {} to {}) next collection at {}",
                before - self.heap.bytes_allocated(),
                before,
                self.heap.bytes_allocated(),
                self.heap.bytes_allocated() * 2,
            );
        }
    }

    fn define_native(&mut self, name: &str, arity: u8, call: fn(&[Value]) -> Value) {
        let name = self.heap.intern(name);
        let hash = self.heap.str_hash(name);
        let native = self.heap.alloc(ObjBody::Native(NativeFun { name, arity, call }));
        self.globals.set(name, hash, Value::from(native));
    }

    fn peek(&self, steps: usize) -> Result<Value, RuntimeError> {
        self.stack
            .len()
            .checked_sub(1 + steps)
            .and_then(|idx| self.stack.get(idx))
            .copied()
            .ok_or(RuntimeError::StackUnderflow)
    }

    fn push(&mut self, val: Value) -> Result<(), RuntimeError> {
        if self.stack.len() == MAX_STACK {
            return Err(RuntimeError::StackOverflow);
        }
        self.stack.push(val);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack.pop().ok_or(RuntimeError::StackUnderflow)
    }
}

fn open_upvalue_slot(heap: &Heap, upvalue: ObjRef) -> usize {
    match heap.upvalue(upvalue) {
        ObjUpvalue::Open(slot) => *slot,
        ObjUpvalue::Closed(_) => unreachable!("Closed upvalues are not in the open list."),
    }
}

/// Seconds since an unspecified epoch, as a double.
fn native_clock(_args: &[Value]) -> Value {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or_default();
    Value::from(seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(src: &str) -> (Result<(), Error>, String) {
        let mut vm = VM::new(Vec::new());
        let result = vm.interpret(src);
        let output = String::from_utf8(vm.output().clone()).expect("output is valid utf-8");
        (result, output)
    }

    fn run_ok(src: &str) -> String {
        let (result, output) = run(src);
        assert!(result.is_ok(), "program failed: {:?}", result);
        output
    }

    fn run_err(src: &str) -> Error {
        let (result, _) = run(src);
        result.expect_err("program was expected to fail")
    }

    #[test]
    fn arithmetic() {
        assert_eq!(run_ok("print 1 + 2 * 3;"), "7\n");
        assert_eq!(run_ok("print (1 + 2) * 3;"), "9\n");
        assert_eq!(run_ok("print 1 - 2 - 3;"), "-4\n");
        assert_eq!(run_ok("print 10 / 4;"), "2.5\n");
        assert_eq!(run_ok("print -(3 + 4);"), "-7\n");
    }

    #[test]
    fn comparison_and_equality() {
        assert_eq!(run_ok("print 1 < 2;"), "true\n");
        assert_eq!(run_ok("print 1 > 2;"), "false\n");
        assert_eq!(run_ok("print 1 <= 1;"), "true\n");
        assert_eq!(run_ok("print 2 >= 3;"), "false\n");
        assert_eq!(run_ok("print 1 == 1;"), "true\n");
        assert_eq!(run_ok("print 1 != 2;"), "true\n");
        assert_eq!(run_ok("print nil == false;"), "false\n");
        assert_eq!(run_ok("print \"a\" == \"a\";"), "true\n");
        assert_eq!(run_ok("print !nil;"), "true\n");
    }

    #[test]
    fn string_concatenation_interns_the_result() {
        assert_eq!(run_ok("var a = \"a\"; var b = \"b\"; print a + b;"), "ab\n");
        // The concatenated string is the same interned object as the
        // literal with identical content.
        assert_eq!(run_ok("print \"hello\" == \"hel\" + \"lo\";"), "true\n");
    }

    #[test]
    fn global_variables_persist_across_interprets() {
        let mut vm = VM::new(Vec::new());
        vm.interpret("var a = 1;").expect("first line runs");
        vm.interpret("print a;").expect("second line runs");
        assert_eq!(vm.output().as_slice(), b"1\n");
    }

    #[test]
    fn local_scoping() {
        assert_eq!(
            run_ok("var a = \"global\"; { var a = \"local\"; print a; } print a;"),
            "local\nglobal\n"
        );
    }

    #[test]
    fn control_flow() {
        assert_eq!(run_ok("if (1 < 2) print \"yes\"; else print \"no\";"), "yes\n");
        assert_eq!(run_ok("if (nil) print \"yes\"; else print \"no\";"), "no\n");
        assert_eq!(
            run_ok("var i = 0; while (i < 3) { print i; i = i + 1; }"),
            "0\n1\n2\n"
        );
        assert_eq!(
            run_ok("for (var i = 0; i < 3; i = i + 1) print i;"),
            "0\n1\n2\n"
        );
        assert_eq!(
            run_ok("var sum = 0; for (var i = 1; i <= 10; i = i + 1) sum = sum + i; print sum;"),
            "55\n"
        );
    }

    #[test]
    fn short_circuit() {
        assert_eq!(run_ok("print true and \"yes\";"), "yes\n");
        assert_eq!(run_ok("print false and \"yes\";"), "false\n");
        assert_eq!(run_ok("print false or \"yes\";"), "yes\n");
        assert_eq!(run_ok("print true or \"never\";"), "true\n");
    }

    #[test]
    fn functions_and_recursion() {
        assert_eq!(
            run_ok("fun add(a, b) { return a + b; } print add(1, 2);"),
            "3\n"
        );
        assert_eq!(
            run_ok(
                "fun fib(n) { if (n < 2) return n; return fib(n - 2) + fib(n - 1); } print fib(10);"
            ),
            "55\n"
        );
        assert_eq!(run_ok("fun f() {} print f();"), "nil\n");
        assert_eq!(run_ok("fun f() {} print f;"), "<fn f>\n");
    }

    #[test]
    fn closures_capture_by_reference() {
        assert_eq!(
            run_ok(
                "fun makeCounter() { var i = 0; fun count() { i = i + 1; return i; } return count; } \
                 var c = makeCounter(); print c(); print c(); print c();"
            ),
            "1\n2\n3\n"
        );
    }

    #[test]
    fn sibling_closures_share_one_upvalue() {
        assert_eq!(
            run_ok(
                "var globalSet; var globalGet; \
                 fun main() { \
                   var a = \"initial\"; \
                   fun set() { a = \"updated\"; } \
                   fun get() { print a; } \
                   globalSet = set; globalGet = get; \
                 } \
                 main(); globalGet(); globalSet(); globalGet();"
            ),
            "initial\nupdated\n"
        );
    }

    #[test]
    fn upvalues_close_at_scope_exit() {
        assert_eq!(
            run_ok(
                "var f; { var a = \"kept\"; fun inner() { print a; } f = inner; } f();"
            ),
            "kept\n"
        );
    }

    #[test]
    fn classes_with_init_and_methods() {
        assert_eq!(
            run_ok(
                "class Greeter { init(n) { this.n = n; } hi() { print \"hi \" + this.n; } } \
                 Greeter(\"lox\").hi();"
            ),
            "hi lox\n"
        );
        assert_eq!(
            run_ok("class Foo {} var foo = Foo(); foo.bar = 7; print foo.bar;"),
            "7\n"
        );
        assert_eq!(run_ok("class Foo {} print Foo;"), "Foo\n");
        assert_eq!(run_ok("class Foo {} print Foo();"), "Foo instance\n");
    }

    #[test]
    fn bound_methods_remember_their_receiver() {
        assert_eq!(
            run_ok(
                "class Person { init(name) { this.name = name; } sayName() { print this.name; } } \
                 var jane = Person(\"Jane\"); var method = jane.sayName; method();"
            ),
            "Jane\n"
        );
    }

    #[test]
    fn inheritance_and_super() {
        assert_eq!(
            run_ok(
                "class A { say() { print \"A\"; } } \
                 class B < A { say() { super.say(); print \"B\"; } } \
                 B().say();"
            ),
            "A\nB\n"
        );
        assert_eq!(
            run_ok(
                "class A { m() { print \"inherited\"; } } class B < A {} B().m();"
            ),
            "inherited\n"
        );
    }

    #[test]
    fn fields_shadow_methods_on_invoke() {
        assert_eq!(
            run_ok(
                "class Box {} fun shout() { print \"field\"; } \
                 var box = Box(); box.run = shout; box.run();"
            ),
            "field\n"
        );
    }

    #[test]
    fn undefined_variable_is_a_runtime_error() {
        assert!(matches!(run_err("print x;"), Error::Runtime));
        // Assignment must not define the variable as a side effect.
        let mut vm = VM::new(Vec::new());
        assert!(vm.interpret("x = 1;").is_err());
        assert!(vm.interpret("print x;").is_err());
    }

    #[test]
    fn type_errors_are_runtime_errors() {
        assert!(matches!(run_err("print 1 + \"a\";"), Error::Runtime));
        assert!(matches!(run_err("print -\"a\";"), Error::Runtime));
        assert!(matches!(run_err("print 1 < \"a\";"), Error::Runtime));
        assert!(matches!(run_err("var x = 1; x();"), Error::Runtime));
        assert!(matches!(run_err("fun f(a) {} f();"), Error::Runtime));
        assert!(matches!(run_err("print 1.field;"), Error::Runtime));
        assert!(matches!(run_err("class A {} A().missing;"), Error::Runtime));
        assert!(matches!(run_err("var NotAClass = 1; class B < NotAClass {}"), Error::Runtime));
        assert!(matches!(run_err("class A { init() {} } A(1);"), Error::Runtime));
    }

    #[test]
    fn deep_recursion_overflows_the_frame_stack() {
        assert!(matches!(run_err("fun f() { f(); } f();"), Error::Runtime));
    }

    #[test]
    fn compile_errors_do_not_execute() {
        let (result, output) = run("print \"before\"; print ;");
        assert!(matches!(result, Err(Error::Compile)));
        assert_eq!(output, "");
    }

    #[test]
    fn clock_native_returns_a_number() {
        assert_eq!(run_ok("print clock() >= 0;"), "true\n");
        assert!(matches!(run_err("clock(1);"), Error::Runtime));
    }

    #[test]
    fn garbage_heavy_program_stays_correct() {
        // Builds and drops many short-lived strings and instances; with the
        // stress_gc feature every allocation collects.
        assert_eq!(
            run_ok(
                "class Node { init(label) { this.label = label; } } \
                 var kept = Node(\"keep\" + \"er\"); \
                 var i = 0; \
                 while (i < 200) { \
                   var junk = Node(\"junk\" + \"junk\"); \
                   junk.next = Node(\"more\"); \
                   i = i + 1; \
                 } \
                 print kept.label;"
            ),
            "keeper\n"
        );
    }

    #[test]
    fn cyclic_instances_do_not_break_collection() {
        assert_eq!(
            run_ok(
                "class Pair {} \
                 var i = 0; \
                 while (i < 50) { \
                   var a = Pair(); var b = Pair(); \
                   a.other = b; b.other = a; \
                   i = i + 1; \
                 } \
                 print \"done\";"
            ),
            "done\n"
        );
    }
}
