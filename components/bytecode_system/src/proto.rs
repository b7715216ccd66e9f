//! Function prototypes
//!
//! A [`Prototype`] is the compiled, immutable description of a function body.
//! It is shared by every closure instantiated from it; nested prototypes are
//! reference counted so that the runtime can install each level once.

use crate::instruction::Instruction;
use crate::value::Constant;
use std::rc::Rc;

/// Marker in `line_info` announcing an absolute line entry.
pub const ABS_LINE_INFO: i8 = -0x80;
/// Maximum number of instructions between absolute line entries.
pub const MAX_INSTRUCTIONS_WITHOUT_ABS: usize = 128;
/// Relative line deltas must stay strictly below this magnitude.
pub const LIM_LINE_DIFF: i32 = 0x80;

/// Kind of a captured local, recorded in upvalue descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum VarKind {
    /// Ordinary variable
    #[default]
    Regular = 0,
    /// `<const>` variable
    Const = 1,
    /// `<close>` variable
    ToClose = 2,
    /// Compile-time constant
    CompileTimeConst = 3,
}

impl VarKind {
    /// Decodes the kind byte stored in chunks.
    pub fn from_u8(b: u8) -> Option<VarKind> {
        match b {
            0 => Some(VarKind::Regular),
            1 => Some(VarKind::Const),
            2 => Some(VarKind::ToClose),
            3 => Some(VarKind::CompileTimeConst),
            _ => None,
        }
    }
}

/// Descriptor for a captured variable (upvalue)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpvalueDesc {
    /// Upvalue name (debug information)
    pub name: Option<Vec<u8>>,
    /// true if the variable is a register of the enclosing function
    pub in_stack: bool,
    /// Register index (if in stack) or upvalue index of the enclosing function
    pub index: u8,
    /// Kind of the captured variable
    pub kind: VarKind,
}

impl UpvalueDesc {
    /// Captures register `index` of the enclosing function.
    pub fn local(name: impl AsRef<[u8]>, index: u8) -> Self {
        Self {
            name: Some(name.as_ref().to_vec()),
            in_stack: true,
            index,
            kind: VarKind::Regular,
        }
    }

    /// Re-captures upvalue `index` of the enclosing function.
    pub fn outer(name: impl AsRef<[u8]>, index: u8) -> Self {
        Self {
            name: Some(name.as_ref().to_vec()),
            in_stack: false,
            index,
            kind: VarKind::Regular,
        }
    }
}

/// Absolute line checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbsLineInfo {
    /// Instruction index
    pub pc: u32,
    /// Source line of that instruction
    pub line: u32,
}

/// Lifetime of a local variable, for debug information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocVar {
    /// Variable name
    pub name: Vec<u8>,
    /// First instruction where the variable is active
    pub start_pc: u32,
    /// First instruction where the variable is dead
    pub end_pc: u32,
}

/// A compiled function body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Prototype {
    /// Chunk name (`None` when stripped or inherited from the parent)
    pub source: Option<Vec<u8>>,
    /// Line where the function starts (0 for main chunks)
    pub line_defined: u32,
    /// Line where the function ends
    pub last_line_defined: u32,
    /// Number of fixed parameters
    pub num_params: u8,
    /// Whether the function takes `...`
    pub is_vararg: bool,
    /// Number of registers needed
    pub max_stack_size: u8,
    /// Instruction stream
    pub code: Vec<Instruction>,
    /// Constant pool
    pub constants: Vec<Constant>,
    /// Nested function prototypes
    pub protos: Vec<Rc<Prototype>>,
    /// Upvalue descriptors
    pub upvalues: Vec<UpvalueDesc>,
    /// Per-instruction line deltas
    pub line_info: Vec<i8>,
    /// Absolute line checkpoints
    pub abs_line_info: Vec<AbsLineInfo>,
    /// Local variable ranges
    pub loc_vars: Vec<LocVar>,
}

impl Prototype {
    /// Creates an empty prototype.
    pub fn new() -> Self {
        Self::default()
    }

    fn base_line(&self, pc: usize) -> (Option<usize>, i64) {
        match self.abs_line_info.first() {
            Some(first) if pc >= first.pc as usize => {
                let mut i = (pc / MAX_INSTRUCTIONS_WITHOUT_ABS) as isize - 1;
                while ((i + 1) as usize) < self.abs_line_info.len()
                    && pc >= self.abs_line_info[(i + 1) as usize].pc as usize
                {
                    i += 1;
                }
                let i = i.max(0) as usize;
                let entry = self.abs_line_info[i];
                (Some(entry.pc as usize), entry.line as i64)
            }
            _ => (None, self.line_defined as i64),
        }
    }

    /// Source line of instruction `pc`, or `None` without line information.
    pub fn line_at(&self, pc: usize) -> Option<u32> {
        if self.line_info.is_empty() {
            return None;
        }
        let (base_pc, mut line) = self.base_line(pc);
        let start = base_pc.map_or(0, |b| b + 1);
        for delta in &self.line_info[start.min(self.line_info.len())..=pc.min(self.line_info.len() - 1)] {
            if *delta != ABS_LINE_INFO {
                line += *delta as i64;
            }
        }
        Some(line.max(0) as u32)
    }

    /// Name of the `n`-th (1-based) local variable active at `pc`.
    pub fn local_name(&self, mut n: usize, pc: usize) -> Option<&[u8]> {
        for var in &self.loc_vars {
            if var.start_pc as usize > pc {
                break;
            }
            if pc < var.end_pc as usize {
                n -= 1;
                if n == 0 {
                    return Some(&var.name);
                }
            }
        }
        None
    }

    /// Name of upvalue `i`, if recorded.
    pub fn upvalue_name(&self, i: usize) -> Option<&[u8]> {
        self.upvalues.get(i).and_then(|u| u.name.as_deref())
    }

    /// Every source line that has code, for `activelines`.
    pub fn active_lines(&self) -> Vec<u32> {
        let mut lines: Vec<u32> = (0..self.code.len()).filter_map(|pc| self.line_at(pc)).collect();
        let skip_first = self.is_vararg && !lines.is_empty();
        if skip_first {
            lines.remove(0);
        }
        lines.sort_unstable();
        lines.dedup();
        lines
    }
}
