use std::fmt;

/// Bytecode instruction set. Byte-encoded: one opcode byte followed by
/// fixed-width big-endian operands (see [`operand_widths`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Nop = 0,
    PutNil = 1,
    PutSelf = 2,
    PutObject = 3,
    Dup = 4,
    DupN = 5,
    Swap = 6,
    Pop = 7,
    TopN = 8,
    SetN = 9,
    Reverse = 10,
    AdjustStack = 11,
    GetLocal = 12,
    SetLocal = 13,
    GetLocal0 = 14,
    SetLocal0 = 15,
    GetLocal1 = 16,
    SetLocal1 = 17,
    NewArray = 18,
    NewHash = 19,
    NewRange = 20,
    DupArray = 21,
    SplatArray = 22,
    ConcatArray = 23,
    ExpandArray = 24,
    ToRegexp = 25,
    PutString = 26,
    ConcatStrings = 27,
    ToString = 28,
    FreezeString = 29,
    Intern = 30,
    OptStrFreeze = 31,
    OptStrUminus = 32,
    GetInstanceVariable = 33,
    SetInstanceVariable = 34,
    GetClassVariable = 35,
    SetClassVariable = 36,
    GetConstant = 37,
    SetConstant = 38,
    GetGlobal = 39,
    SetGlobal = 40,
    GetInlineCache = 41,
    SetInlineCache = 42,
    Jump = 43,
    BranchIf = 44,
    BranchUnless = 45,
    BranchNil = 46,
    BranchIfType = 47,
    OptCaseDispatch = 48,
    Send = 49,
    OptSendWithoutBlock = 50,
    InvokeSuper = 51,
    InvokeBlock = 52,
    OptPlus = 53,
    OptMinus = 54,
    OptMult = 55,
    OptDiv = 56,
    OptMod = 57,
    OptEq = 58,
    OptNeq = 59,
    OptLt = 60,
    OptLe = 61,
    OptGt = 62,
    OptGe = 63,
    OptLtLt = 64,
    OptAref = 65,
    OptAset = 66,
    OptArefWith = 67,
    OptAsetWith = 68,
    OptLength = 69,
    OptSize = 70,
    OptEmptyP = 71,
    OptSucc = 72,
    OptNot = 73,
    OptRegexpMatch1 = 74,
    OptRegexpMatch2 = 75,
    Trace = 76,
    Defined = 77,
    CheckMatch = 78,
    CheckKeyword = 79,
    Leave = 80,
    Throw = 81,
    GetBlockParamProxy = 82,
    DefineClass = 83,
    OptCallCFunction = 84,
}

pub const MAX_OP_CODE: u8 = OpCode::OptCallCFunction as u8;

impl From<u8> for OpCode {
    fn from(byte: u8) -> Self {
        match byte {
            0 => OpCode::Nop,
            1 => OpCode::PutNil,
            2 => OpCode::PutSelf,
            3 => OpCode::PutObject,
            4 => OpCode::Dup,
            5 => OpCode::DupN,
            6 => OpCode::Swap,
            7 => OpCode::Pop,
            8 => OpCode::TopN,
            9 => OpCode::SetN,
            10 => OpCode::Reverse,
            11 => OpCode::AdjustStack,
            12 => OpCode::GetLocal,
            13 => OpCode::SetLocal,
            14 => OpCode::GetLocal0,
            15 => OpCode::SetLocal0,
            16 => OpCode::GetLocal1,
            17 => OpCode::SetLocal1,
            18 => OpCode::NewArray,
            19 => OpCode::NewHash,
            20 => OpCode::NewRange,
            21 => OpCode::DupArray,
            22 => OpCode::SplatArray,
            23 => OpCode::ConcatArray,
            24 => OpCode::ExpandArray,
            25 => OpCode::ToRegexp,
            26 => OpCode::PutString,
            27 => OpCode::ConcatStrings,
            28 => OpCode::ToString,
            29 => OpCode::FreezeString,
            30 => OpCode::Intern,
            31 => OpCode::OptStrFreeze,
            32 => OpCode::OptStrUminus,
            33 => OpCode::GetInstanceVariable,
            34 => OpCode::SetInstanceVariable,
            35 => OpCode::GetClassVariable,
            36 => OpCode::SetClassVariable,
            37 => OpCode::GetConstant,
            38 => OpCode::SetConstant,
            39 => OpCode::GetGlobal,
            40 => OpCode::SetGlobal,
            41 => OpCode::GetInlineCache,
            42 => OpCode::SetInlineCache,
            43 => OpCode::Jump,
            44 => OpCode::BranchIf,
            45 => OpCode::BranchUnless,
            46 => OpCode::BranchNil,
            47 => OpCode::BranchIfType,
            48 => OpCode::OptCaseDispatch,
            49 => OpCode::Send,
            50 => OpCode::OptSendWithoutBlock,
            51 => OpCode::InvokeSuper,
            52 => OpCode::InvokeBlock,
            53 => OpCode::OptPlus,
            54 => OpCode::OptMinus,
            55 => OpCode::OptMult,
            56 => OpCode::OptDiv,
            57 => OpCode::OptMod,
            58 => OpCode::OptEq,
            59 => OpCode::OptNeq,
            60 => OpCode::OptLt,
            61 => OpCode::OptLe,
            62 => OpCode::OptGt,
            63 => OpCode::OptGe,
            64 => OpCode::OptLtLt,
            65 => OpCode::OptAref,
            66 => OpCode::OptAset,
            67 => OpCode::OptArefWith,
            68 => OpCode::OptAsetWith,
            69 => OpCode::OptLength,
            70 => OpCode::OptSize,
            71 => OpCode::OptEmptyP,
            72 => OpCode::OptSucc,
            73 => OpCode::OptNot,
            74 => OpCode::OptRegexpMatch1,
            75 => OpCode::OptRegexpMatch2,
            76 => OpCode::Trace,
            77 => OpCode::Defined,
            78 => OpCode::CheckMatch,
            79 => OpCode::CheckKeyword,
            80 => OpCode::Leave,
            81 => OpCode::Throw,
            82 => OpCode::GetBlockParamProxy,
            83 => OpCode::DefineClass,
            84 => OpCode::OptCallCFunction,
            _ => panic!("Unknown opcode {}", byte),
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

pub fn operand_widths(op: OpCode) -> Vec<usize> {
    match op {
        OpCode::PutObject
        | OpCode::NewArray
        | OpCode::NewHash
        | OpCode::DupArray
        | OpCode::PutString
        | OpCode::ConcatStrings
        | OpCode::OptStrFreeze
        | OpCode::OptStrUminus
        | OpCode::GetInstanceVariable
        | OpCode::SetInstanceVariable
        | OpCode::GetClassVariable
        | OpCode::SetClassVariable
        | OpCode::GetConstant
        | OpCode::SetConstant
        | OpCode::GetGlobal
        | OpCode::SetGlobal
        | OpCode::SetInlineCache
        | OpCode::Jump
        | OpCode::BranchIf
        | OpCode::BranchUnless
        | OpCode::BranchNil
        | OpCode::Send
        | OpCode::OptSendWithoutBlock
        | OpCode::InvokeSuper
        | OpCode::InvokeBlock
        | OpCode::OptPlus
        | OpCode::OptMinus
        | OpCode::OptMult
        | OpCode::OptDiv
        | OpCode::OptMod
        | OpCode::OptEq
        | OpCode::OptNeq
        | OpCode::OptLt
        | OpCode::OptLe
        | OpCode::OptGt
        | OpCode::OptGe
        | OpCode::OptLtLt
        | OpCode::OptAref
        | OpCode::OptAset
        | OpCode::OptLength
        | OpCode::OptSize
        | OpCode::OptEmptyP
        | OpCode::OptSucc
        | OpCode::OptNot
        | OpCode::OptRegexpMatch1
        | OpCode::OptRegexpMatch2
        | OpCode::DefineClass => vec![2],
        OpCode::DupN
        | OpCode::TopN
        | OpCode::SetN
        | OpCode::Reverse
        | OpCode::AdjustStack
        | OpCode::GetLocal0
        | OpCode::SetLocal0
        | OpCode::GetLocal1
        | OpCode::SetLocal1
        | OpCode::NewRange
        | OpCode::SplatArray
        | OpCode::Trace
        | OpCode::CheckMatch
        | OpCode::Throw => vec![1],
        OpCode::GetLocal
        | OpCode::SetLocal
        | OpCode::ExpandArray
        | OpCode::ToRegexp
        | OpCode::CheckKeyword => vec![1, 1],
        OpCode::GetInlineCache | OpCode::OptCaseDispatch | OpCode::OptArefWith | OpCode::OptAsetWith => {
            vec![2, 2]
        }
        OpCode::BranchIfType => vec![1, 2],
        OpCode::Defined => vec![1, 2],
        OpCode::Nop
        | OpCode::PutNil
        | OpCode::PutSelf
        | OpCode::Dup
        | OpCode::Swap
        | OpCode::Pop
        | OpCode::ConcatArray
        | OpCode::ToString
        | OpCode::FreezeString
        | OpCode::Intern
        | OpCode::Leave
        | OpCode::GetBlockParamProxy
        | OpCode::OptCallCFunction => vec![],
    }
}

/// Encoded length in bytes: opcode byte plus operands.
pub fn insn_len(op: OpCode) -> usize {
    1 + operand_widths(op).iter().sum::<usize>()
}

pub type Instructions = Vec<u8>;

pub fn make(op: OpCode, operands: &[usize]) -> Instructions {
    let widths = operand_widths(op);
    let mut instruction = vec![op as u8];

    for (i, operand) in operands.iter().enumerate() {
        let width = widths.get(i).copied().unwrap_or(0);
        match width {
            1 => instruction.push(*operand as u8),
            2 => {
                instruction.push((*operand >> 8) as u8);
                instruction.push(*operand as u8);
            }
            _ => {}
        }
    }

    instruction
}

pub fn read_u16(instructions: &[u8], offset: usize) -> u16 {
    ((instructions[offset] as u16) << 8) | (instructions[offset + 1] as u16)
}

pub fn read_u8(instructions: &[u8], offset: usize) -> u8 {
    instructions[offset]
}

/// Decode the instruction at `pos` into opcode, operands, and next position.
pub fn decode(instructions: &[u8], pos: usize) -> (OpCode, Vec<usize>, usize) {
    let op = OpCode::from(instructions[pos]);
    let mut operands = Vec::new();
    let mut offset = pos + 1;
    for width in operand_widths(op) {
        match width {
            1 => {
                operands.push(read_u8(instructions, offset) as usize);
                offset += 1;
            }
            2 => {
                operands.push(read_u16(instructions, offset) as usize);
                offset += 2;
            }
            _ => {}
        }
    }
    (op, operands, offset)
}

pub fn disassemble(instructions: &Instructions) -> String {
    let mut result = String::new();
    let mut i = 0;

    while i < instructions.len() {
        let (op, operands, next) = decode(instructions, i);
        let operand_str = operands
            .iter()
            .map(|o| o.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        result.push_str(&format!("{:04} {} {}\n", i, op, operand_str));
        i = next;
    }

    result
}

