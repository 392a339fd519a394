//! Descriptor for an assembled PIO program.

use crate::{Error, MAX_PROGRAM_LEN};

/// Wrap bounds of a loaded program.
///
/// After executing the instruction at `source`, control flow continues at
/// `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wrap {
    /// Instruction address after which execution wraps.
    pub source: u8,
    /// Instruction address execution wraps back to.
    pub target: u8,
}

/// An assembled PIO program: 1 to 31 instruction words, optionally pinned
/// to a fixed load offset.
///
/// Immutable once created. A [`StateMachine`](crate::StateMachine) owns its
/// program exclusively for as long as it is resident in instruction memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    instructions: Vec<u16>,
    origin: Option<u8>,
}

impl Program {
    /// Wrap assembled instruction words, to be loaded at any free offset.
    pub fn new(instructions: Vec<u16>) -> Result<Program, Error> {
        let length = instructions.len();
        if length == 0 || length > MAX_PROGRAM_LEN {
            return Err(Error::InvalidProgramLength { length });
        }
        Ok(Program {
            instructions,
            origin: None,
        })
    }

    /// Like [`Program::new`], but the program must be loaded at `origin`.
    pub fn with_origin(instructions: Vec<u16>, origin: u8) -> Result<Program, Error> {
        let mut program = Program::new(instructions)?;
        program.origin = Some(origin);
        Ok(program)
    }

    pub fn instructions(&self) -> &[u16] {
        &self.instructions
    }

    /// Length in instruction words.
    pub fn len(&self) -> u8 {
        self.instructions.len() as u8
    }

    /// Always false: the constructors reject empty programs.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// The fixed load offset, if the program demands one.
    pub fn origin(&self) -> Option<u8> {
        self.origin
    }

    /// Wrap bounds for this program when loaded at `offset`.
    pub fn wrap(&self, offset: u8) -> Wrap {
        Wrap {
            source: offset + self.len() - 1,
            target: offset,
        }
    }
}

#[test]
fn test_program_length_limits() {
    assert_eq!(
        Program::new(vec![]).unwrap_err(),
        Error::InvalidProgramLength { length: 0 }
    );
    assert_eq!(
        Program::new(vec![0; 32]).unwrap_err(),
        Error::InvalidProgramLength { length: 32 }
    );
    assert_eq!(Program::new(vec![0]).unwrap().len(), 1);
    assert_eq!(Program::new(vec![0; 31]).unwrap().len(), 31);
}

#[test]
fn test_wrap_spans_program() {
    let program = Program::new(vec![0; 20]).unwrap();
    assert_eq!(
        program.wrap(12),
        Wrap {
            source: 31,
            target: 12
        }
    );
    assert_eq!(
        program.wrap(0),
        Wrap {
            source: 19,
            target: 0
        }
    );
}

#[test]
fn test_single_instruction_wraps_to_itself() {
    let program = Program::new(vec![0]).unwrap();
    assert_eq!(
        program.wrap(7),
        Wrap {
            source: 7,
            target: 7
        }
    );
}
