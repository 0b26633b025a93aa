use std::fmt::{self, Debug};

use crate::Position;

/// Lox virtual machine errors
#[derive(Debug)]
pub enum Error {
    /// A runtime error happened
    Runtime,
    /// A compilation error happened
    Compile,
}

impl std::error::Error for Error {}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Runtime => write!(f, "Runtime error(s) occured."),
            Self::Compile => write!(f, "Compilation error(s) occured."),
        }
    }
}

/// Virtual machine errors
#[derive(Debug)]
pub enum RuntimeError {
    /// Pushed on a full stack, or exceeded the maximum call depth
    StackOverflow,
    /// Popped an empty stack
    StackUnderflow,
    /// Accessing an undefined variable
    UndefinedVariable(String),
    /// Accessing a property that is neither a field nor a method
    UndefinedProperty(String),
    /// Made a call on a value that is neither a function nor a class
    InvalidCallee,
    /// Called a function with the wrong number of arguments
    ArityMismatch(u8, u8),
    /// Operand to a unary arithmetic opcode is not a number
    OperandMustBeNumber,
    /// Operands to a binary arithmetic opcode are not numbers
    OperandsMustBeNumbers,
    /// Operands to the add opcode mix numbers and strings
    InvalidAddOperands,
    /// Read a property of a value that is not an instance
    NoProperties,
    /// Wrote a field of a value that is not an instance
    NoFields,
    /// Invoked a method on a value that is not an instance
    NoMethods,
    /// Inherited from a value that is not a class
    InvalidSuperclass,
}

impl std::error::Error for RuntimeError {}
impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StackOverflow => write!(f, "Stack overflow."),
            Self::StackUnderflow => write!(f, "Stack underflow."),
            Self::UndefinedVariable(name) => write!(f, "Undefined variable '{}'.", name),
            Self::UndefinedProperty(name) => write!(f, "Undefined property '{}'.", name),
            Self::InvalidCallee => write!(f, "Can only call functions and classes."),
            Self::ArityMismatch(expected, got) => {
                write!(f, "Expected {} arguments but got {}.", expected, got)
            }
            Self::OperandMustBeNumber => write!(f, "Operand must be a number."),
            Self::OperandsMustBeNumbers => write!(f, "Operands must be numbers."),
            Self::InvalidAddOperands => {
                write!(f, "Operands must be two numbers or two strings.")
            }
            Self::NoProperties => write!(f, "Only instances have properties."),
            Self::NoFields => write!(f, "Only instances have fields."),
            Self::NoMethods => write!(f, "Only instances have methods."),
            Self::InvalidSuperclass => write!(f, "Superclass must be a class."),
        }
    }
}

/// Error found while parsing Lox source code
#[derive(Debug, Clone)]
pub enum ParseError {
    /// The token at the given position cannot be used the way it was used
    UnexpectedToken(Position, String, String),
    /// Ran out of tokens while the grammar expected more
    UnexpectedEof(Position, String),
}

impl std::error::Error for ParseError {}
impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedToken(pos, lexeme, msg) => {
                write!(f, "{} Error at '{}': {}", pos, lexeme, msg)
            }
            Self::UnexpectedEof(pos, msg) => write!(f, "{} Error at end: {}", pos, msg),
        }
    }
}
