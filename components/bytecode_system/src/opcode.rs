//! Bytecode opcodes for the register-based VM
//!
//! Defines the full instruction set together with the static properties the
//! loader, the dispatch loop and debug introspection rely on: operand layout,
//! whether the instruction writes register A, whether it is a test followed
//! by a jump, and whether it consumes or produces a variable stack top.

/// Operand layout of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpMode {
    /// `A B C k`
    IABC,
    /// `A Bx` (unsigned 17-bit)
    IABx,
    /// `A sBx` (signed 17-bit)
    IAsBx,
    /// `Ax` (unsigned 25-bit)
    IAx,
    /// `sJ` (signed 25-bit jump)
    IsJ,
}

macro_rules! opcodes {
    ($($name:ident = $text:literal, $mode:ident, mm $mm:literal, ot $ot:literal, it $it:literal, t $t:literal, a $a:literal;)*) => {
        /// Virtual machine opcodes.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        #[allow(missing_docs)]
        pub enum OpCode {
            $($name,)*
        }

        impl OpCode {
            /// Every opcode in numeric order.
            pub const ALL: &'static [OpCode] = &[$(OpCode::$name,)*];

            /// Mnemonic as printed by listings.
            pub fn name(self) -> &'static str {
                match self {
                    $(OpCode::$name => $text,)*
                }
            }

            fn props(self) -> (OpMode, bool, bool, bool, bool, bool) {
                match self {
                    $(OpCode::$name => (OpMode::$mode, $mm != 0, $ot != 0, $it != 0, $t != 0, $a != 0),)*
                }
            }
        }
    };
}

opcodes! {
    Move = "MOVE", IABC, mm 0, ot 0, it 0, t 0, a 1;
    LoadI = "LOADI", IAsBx, mm 0, ot 0, it 0, t 0, a 1;
    LoadF = "LOADF", IAsBx, mm 0, ot 0, it 0, t 0, a 1;
    LoadK = "LOADK", IABx, mm 0, ot 0, it 0, t 0, a 1;
    LoadKX = "LOADKX", IABx, mm 0, ot 0, it 0, t 0, a 1;
    LoadFalse = "LOADFALSE", IABC, mm 0, ot 0, it 0, t 0, a 1;
    LFalseSkip = "LFALSESKIP", IABC, mm 0, ot 0, it 0, t 0, a 1;
    LoadTrue = "LOADTRUE", IABC, mm 0, ot 0, it 0, t 0, a 1;
    LoadNil = "LOADNIL", IABC, mm 0, ot 0, it 0, t 0, a 1;
    GetUpval = "GETUPVAL", IABC, mm 0, ot 0, it 0, t 0, a 1;
    SetUpval = "SETUPVAL", IABC, mm 0, ot 0, it 0, t 0, a 0;
    GetTabUp = "GETTABUP", IABC, mm 0, ot 0, it 0, t 0, a 1;
    GetTable = "GETTABLE", IABC, mm 0, ot 0, it 0, t 0, a 1;
    GetI = "GETI", IABC, mm 0, ot 0, it 0, t 0, a 1;
    GetField = "GETFIELD", IABC, mm 0, ot 0, it 0, t 0, a 1;
    SetTabUp = "SETTABUP", IABC, mm 0, ot 0, it 0, t 0, a 0;
    SetTable = "SETTABLE", IABC, mm 0, ot 0, it 0, t 0, a 0;
    SetI = "SETI", IABC, mm 0, ot 0, it 0, t 0, a 0;
    SetField = "SETFIELD", IABC, mm 0, ot 0, it 0, t 0, a 0;
    NewTable = "NEWTABLE", IABC, mm 0, ot 0, it 0, t 0, a 1;
    SelfOp = "SELF", IABC, mm 0, ot 0, it 0, t 0, a 1;
    AddI = "ADDI", IABC, mm 0, ot 0, it 0, t 0, a 1;
    AddK = "ADDK", IABC, mm 0, ot 0, it 0, t 0, a 1;
    SubK = "SUBK", IABC, mm 0, ot 0, it 0, t 0, a 1;
    MulK = "MULK", IABC, mm 0, ot 0, it 0, t 0, a 1;
    ModK = "MODK", IABC, mm 0, ot 0, it 0, t 0, a 1;
    PowK = "POWK", IABC, mm 0, ot 0, it 0, t 0, a 1;
    DivK = "DIVK", IABC, mm 0, ot 0, it 0, t 0, a 1;
    IDivK = "IDIVK", IABC, mm 0, ot 0, it 0, t 0, a 1;
    BAndK = "BANDK", IABC, mm 0, ot 0, it 0, t 0, a 1;
    BOrK = "BORK", IABC, mm 0, ot 0, it 0, t 0, a 1;
    BXorK = "BXORK", IABC, mm 0, ot 0, it 0, t 0, a 1;
    ShrI = "SHRI", IABC, mm 0, ot 0, it 0, t 0, a 1;
    ShlI = "SHLI", IABC, mm 0, ot 0, it 0, t 0, a 1;
    Add = "ADD", IABC, mm 0, ot 0, it 0, t 0, a 1;
    Sub = "SUB", IABC, mm 0, ot 0, it 0, t 0, a 1;
    Mul = "MUL", IABC, mm 0, ot 0, it 0, t 0, a 1;
    Mod = "MOD", IABC, mm 0, ot 0, it 0, t 0, a 1;
    Pow = "POW", IABC, mm 0, ot 0, it 0, t 0, a 1;
    Div = "DIV", IABC, mm 0, ot 0, it 0, t 0, a 1;
    IDiv = "IDIV", IABC, mm 0, ot 0, it 0, t 0, a 1;
    BAnd = "BAND", IABC, mm 0, ot 0, it 0, t 0, a 1;
    BOr = "BOR", IABC, mm 0, ot 0, it 0, t 0, a 1;
    BXor = "BXOR", IABC, mm 0, ot 0, it 0, t 0, a 1;
    Shl = "SHL", IABC, mm 0, ot 0, it 0, t 0, a 1;
    Shr = "SHR", IABC, mm 0, ot 0, it 0, t 0, a 1;
    MmBin = "MMBIN", IABC, mm 1, ot 0, it 0, t 0, a 0;
    MmBinI = "MMBINI", IABC, mm 1, ot 0, it 0, t 0, a 0;
    MmBinK = "MMBINK", IABC, mm 1, ot 0, it 0, t 0, a 0;
    Unm = "UNM", IABC, mm 0, ot 0, it 0, t 0, a 1;
    BNot = "BNOT", IABC, mm 0, ot 0, it 0, t 0, a 1;
    Not = "NOT", IABC, mm 0, ot 0, it 0, t 0, a 1;
    Len = "LEN", IABC, mm 0, ot 0, it 0, t 0, a 1;
    Concat = "CONCAT", IABC, mm 0, ot 0, it 0, t 0, a 1;
    Close = "CLOSE", IABC, mm 0, ot 0, it 0, t 0, a 0;
    Tbc = "TBC", IABC, mm 0, ot 0, it 0, t 0, a 0;
    Jmp = "JMP", IsJ, mm 0, ot 0, it 0, t 0, a 0;
    Eq = "EQ", IABC, mm 0, ot 0, it 0, t 1, a 0;
    Lt = "LT", IABC, mm 0, ot 0, it 0, t 1, a 0;
    Le = "LE", IABC, mm 0, ot 0, it 0, t 1, a 0;
    EqK = "EQK", IABC, mm 0, ot 0, it 0, t 1, a 0;
    EqI = "EQI", IABC, mm 0, ot 0, it 0, t 1, a 0;
    LtI = "LTI", IABC, mm 0, ot 0, it 0, t 1, a 0;
    LeI = "LEI", IABC, mm 0, ot 0, it 0, t 1, a 0;
    GtI = "GTI", IABC, mm 0, ot 0, it 0, t 1, a 0;
    GeI = "GEI", IABC, mm 0, ot 0, it 0, t 1, a 0;
    Test = "TEST", IABC, mm 0, ot 0, it 0, t 1, a 0;
    TestSet = "TESTSET", IABC, mm 0, ot 0, it 0, t 1, a 1;
    Call = "CALL", IABC, mm 0, ot 1, it 1, t 0, a 1;
    TailCall = "TAILCALL", IABC, mm 0, ot 1, it 1, t 0, a 1;
    Return = "RETURN", IABC, mm 0, ot 0, it 1, t 0, a 0;
    Return0 = "RETURN0", IABC, mm 0, ot 0, it 0, t 0, a 0;
    Return1 = "RETURN1", IABC, mm 0, ot 0, it 0, t 0, a 0;
    ForLoop = "FORLOOP", IABx, mm 0, ot 0, it 0, t 0, a 1;
    ForPrep = "FORPREP", IABx, mm 0, ot 0, it 0, t 0, a 1;
    TForPrep = "TFORPREP", IABx, mm 0, ot 0, it 0, t 0, a 0;
    TForCall = "TFORCALL", IABC, mm 0, ot 0, it 0, t 0, a 0;
    TForLoop = "TFORLOOP", IABx, mm 0, ot 0, it 0, t 0, a 1;
    SetList = "SETLIST", IABC, mm 0, ot 0, it 1, t 0, a 0;
    Closure = "CLOSURE", IABx, mm 0, ot 0, it 0, t 0, a 1;
    VarArg = "VARARG", IABC, mm 0, ot 1, it 0, t 0, a 1;
    VarArgPrep = "VARARGPREP", IABC, mm 0, ot 0, it 1, t 0, a 1;
    ExtraArg = "EXTRAARG", IAx, mm 0, ot 0, it 0, t 0, a 0;
}

/// Number of opcodes.
pub const NUM_OPCODES: usize = 83;

impl OpCode {
    /// Decodes an opcode number.
    pub fn from_u8(op: u8) -> Option<OpCode> {
        OpCode::ALL.get(op as usize).copied()
    }

    /// Operand layout.
    pub fn mode(self) -> OpMode {
        self.props().0
    }

    /// Instruction is a metamethod fallback (`MMBIN*`).
    pub fn is_mm(self) -> bool {
        self.props().1
    }

    /// Instruction sets the stack top for the next instruction.
    pub fn sets_top(self) -> bool {
        self.props().2
    }

    /// Instruction uses the stack top set by the previous instruction.
    pub fn uses_top(self) -> bool {
        self.props().3
    }

    /// Instruction is a test; the next instruction is a jump.
    pub fn is_test(self) -> bool {
        self.props().4
    }

    /// Instruction writes register A.
    pub fn sets_a(self) -> bool {
        self.props().5
    }
}
