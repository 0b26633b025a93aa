use std::io;

use crate::{Heap, OpCode, Position, Value};

/// A chunk holds a sequence of instructions to be executed and their data.
#[derive(Default, Debug)]
pub struct Chunk {
    instructions: Vec<OpCode>,
    constants: Vec<Value>,
    positions: Vec<Position>,
}

impl Chunk {
    /// Add a new instruction to the chunk.
    pub fn write_instruction(&mut self, code: OpCode, pos: Position) {
        self.instructions.push(code);
        self.positions.push(pos);
    }

    /// Read the instruction at the index.
    pub fn read_instruction(&self, idx: usize) -> (&OpCode, &Position) {
        (&self.instructions[idx], &self.positions[idx])
    }

    /// Return the number of written instructions.
    pub fn instructions_count(&self) -> usize {
        self.instructions.len()
    }

    /// Source position of the instruction at the index.
    pub fn position(&self, idx: usize) -> Position {
        self.positions[idx]
    }

    /// Replace the jump offset at the given jump instruction
    pub fn patch_jump_instruction(&mut self, jump: usize, offset: u16) {
        match self.instructions[jump] {
            OpCode::Jump(ref mut placeholder) | OpCode::JumpIfFalse(ref mut placeholder) => {
                *placeholder = offset;
            }
            _ => unreachable!("Instruction at the patched index must be a jump."),
        }
    }

    /// Add a constant value to the chunk and return its position in the pool
    pub fn write_const(&mut self, val: Value) -> usize {
        self.constants.push(val);
        self.constants.len() - 1
    }

    /// Read the constant at the given index
    pub fn read_const(&self, idx: usize) -> Value {
        self.constants[idx]
    }

    /// Get the number of constants stored in the chunk
    pub fn const_count(&self) -> usize {
        self.constants.len()
    }

    /// All constants in the pool, in insertion order.
    pub fn constants(&self) -> &[Value] {
        &self.constants
    }
}

/// Go through the instructions in the chunk and display them in human-readable format.
pub fn disassemble_chunk(
    chunk: &Chunk,
    name: &str,
    heap: &Heap,
    out: &mut impl io::Write,
) -> io::Result<()> {
    writeln!(out, "== {} ==", name)?;
    for i in 0..chunk.instructions.len() {
        disassemble_instruction(chunk, i, heap, out)?;
    }
    Ok(())
}

/// Display an instruction in human readable format.
pub fn disassemble_instruction(
    chunk: &Chunk,
    inst_idx: usize,
    heap: &Heap,
    out: &mut impl io::Write,
) -> io::Result<()> {
    write!(out, "{:04} ", inst_idx)?;
    if inst_idx > 0 && chunk.positions[inst_idx].line == chunk.positions[inst_idx - 1].line {
        write!(out, "   | ")?;
    } else {
        write!(out, "{:4} ", chunk.positions[inst_idx].line)?;
    }

    macro_rules! constant_instruction {
        ($op_repr:expr, $const_id:expr) => {
            writeln!(
                out,
                "{:-16} {:4} {}",
                $op_repr,
                $const_id,
                heap.value_to_string(chunk.read_const(*$const_id as usize)),
            )
        };
    }
    macro_rules! byte_instruction {
        ($op_repr:expr, $slot:expr) => {
            writeln!(out, "{:-16} {:4}", $op_repr, $slot)
        };
    }
    macro_rules! jump_instruction {
        ($op_repr:expr, $offset:expr, $fwd:expr) => {{
            // +1 since the instruction pointer is increased right after we read an opcode
            let jump_target = if $fwd {
                inst_idx + 1 + *$offset as usize
            } else {
                inst_idx + 1 - *$offset as usize
            };
            writeln!(out, "{:-16} {:4} -> {}", $op_repr, inst_idx, jump_target)
        }};
    }

    match chunk.instructions[inst_idx] {
        OpCode::Constant(ref const_id) => constant_instruction!("OP_CONSTANT", const_id),
        OpCode::Nil => writeln!(out, "OP_NIL"),
        OpCode::True => writeln!(out, "OP_TRUE"),
        OpCode::False => writeln!(out, "OP_FALSE"),
        OpCode::Pop => writeln!(out, "OP_POP"),
        OpCode::GetLocal(ref slot) => byte_instruction!("OP_GET_LOCAL", slot),
        OpCode::SetLocal(ref slot) => byte_instruction!("OP_SET_LOCAL", slot),
        OpCode::GetGlobal(ref const_id) => constant_instruction!("OP_GET_GLOBAL", const_id),
        OpCode::DefineGlobal(ref const_id) => constant_instruction!("OP_DEFINE_GLOBAL", const_id),
        OpCode::SetGlobal(ref const_id) => constant_instruction!("OP_SET_GLOBAL", const_id),
        OpCode::GetUpvalue(ref idx) => byte_instruction!("OP_GET_UPVALUE", idx),
        OpCode::SetUpvalue(ref idx) => byte_instruction!("OP_SET_UPVALUE", idx),
        OpCode::GetProperty(ref const_id) => constant_instruction!("OP_GET_PROPERTY", const_id),
        OpCode::SetProperty(ref const_id) => constant_instruction!("OP_SET_PROPERTY", const_id),
        OpCode::GetSuper(ref const_id) => constant_instruction!("OP_GET_SUPER", const_id),
        OpCode::Equal => writeln!(out, "OP_EQUAL"),
        OpCode::Greater => writeln!(out, "OP_GREATER"),
        OpCode::Less => writeln!(out, "OP_LESS"),
        OpCode::Add => writeln!(out, "OP_ADD"),
        OpCode::Subtract => writeln!(out, "OP_SUBTRACT"),
        OpCode::Multiply => writeln!(out, "OP_MULTIPLY"),
        OpCode::Divide => writeln!(out, "OP_DIVIDE"),
        OpCode::Not => writeln!(out, "OP_NOT"),
        OpCode::Negate => writeln!(out, "OP_NEGATE"),
        OpCode::Print => writeln!(out, "OP_PRINT"),
        OpCode::Jump(ref offset) => jump_instruction!("OP_JUMP", offset, true),
        OpCode::JumpIfFalse(ref offset) => jump_instruction!("OP_JUMP_IF_FALSE", offset, true),
        OpCode::Loop(ref offset) => jump_instruction!("OP_LOOP", offset, false),
        OpCode::Call(ref argc) => byte_instruction!("OP_CALL", argc),
        OpCode::Invoke(ref const_id, ref argc) => writeln!(
            out,
            "{:-16} ({} args) {:4} {}",
            "OP_INVOKE",
            argc,
            const_id,
            heap.value_to_string(chunk.read_const(*const_id as usize)),
        ),
        OpCode::SuperInvoke(ref const_id, ref argc) => writeln!(
            out,
            "{:-16} ({} args) {:4} {}",
            "OP_SUPER_INVOKE",
            argc,
            const_id,
            heap.value_to_string(chunk.read_const(*const_id as usize)),
        ),
        OpCode::Closure(ref const_id, ref upvalues) => {
            let value = chunk.read_const(*const_id as usize);
            writeln!(
                out,
                "{:-16} {:4} {}",
                "OP_CLOSURE",
                const_id,
                heap.value_to_string(value),
            )?;
            for upvalue in upvalues {
                writeln!(
                    out,
                    "{:04}      |                     {} {}",
                    inst_idx,
                    if upvalue.is_local { "local" } else { "upvalue" },
                    upvalue.index,
                )?;
            }
            Ok(())
        }
        OpCode::CloseUpvalue => writeln!(out, "OP_CLOSE_UPVALUE"),
        OpCode::Return => writeln!(out, "OP_RETURN"),
        OpCode::Class(ref const_id) => constant_instruction!("OP_CLASS", const_id),
        OpCode::Inherit => writeln!(out, "OP_INHERIT"),
        OpCode::Method(ref const_id) => constant_instruction!("OP_METHOD", const_id),
    }
}
