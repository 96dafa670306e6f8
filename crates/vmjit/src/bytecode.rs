//! Component A: the bytecode iterator, plus the opcode catalog it walks.
//!
//! Bytecode is a flat `[u32]` stream, one element = one "code word". Every
//! instruction starts with a tag word whose low byte names the [`Opcode`];
//! the remaining words it occupies hold its immediate operands, and are
//! interpreted through [`BytecodeInstruction`]'s typed accessors. Size is
//! looked up from a static table indexed by opcode, never computed from the
//! operands themselves.

use std::fmt;

/// One code word. Real VMs pack operands tighter; we don't need bit-for-bit
/// compatibility with any external bytecode format, so every operand gets a
/// full word for simplicity, and the opcode tag lives alone in word 0.
pub type CodeWord = u32;

macro_rules! opcodes {
    ($($variant:ident = $layout:ident),+ $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u16)]
        pub enum Opcode {
            $($variant),+
        }

        impl Opcode {
            pub const ALL: &'static [Opcode] = &[$(Opcode::$variant),+];

            pub fn layout(self) -> ArgLayout {
                match self {
                    $(Opcode::$variant => ArgLayout::$layout),+
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(Opcode::$variant => stringify!($variant)),+
                }
            }
        }
    };
}

/// The shape of an instruction's immediate operands. Determines both its
/// word size and which [`BytecodeInstruction`] accessors are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgLayout {
    /// No operands. Size 1 (tag word only).
    NoArg,
    /// One 16-bit operand (word0). Size 2.
    Word,
    /// One 32-bit operand (dword0). Size 2.
    Dword,
    /// One 16-bit operand and one 32-bit operand. Size 3.
    WordDword,
    /// One 64-bit operand (qword0). Size 3.
    Qword,
    /// Two 32-bit operands. Size 3.
    DwordDword,
    /// Three 16-bit operands (sword0/1/2), as used by the var-var binops.
    ThreeWords,
    /// Two 16-bit operands, as used by var-to-var copies and casts.
    TwoWords,
    /// One 16-bit operand and one 64-bit operand. Size 4.
    WordQword,
    /// Two 16-bit operands and one 32-bit operand, as used by var-imm binops.
    WordWordDword,
}

impl ArgLayout {
    /// Instruction size in code words, including the tag word.
    pub const fn size(self) -> usize {
        match self {
            ArgLayout::NoArg => 1,
            ArgLayout::Word | ArgLayout::Dword => 2,
            ArgLayout::WordDword | ArgLayout::Qword | ArgLayout::DwordDword | ArgLayout::TwoWords => 3,
            ArgLayout::ThreeWords | ArgLayout::WordQword | ArgLayout::WordWordDword => 4,
        }
    }
}

opcodes! {
    // Entry dispatch / control. JitEntry's pointer-sized immediate is
    // mutated twice in its life (record address, then entry label; spec.md
    // §3) so it needs a Qword-sized slot even though no script-level
    // operand is ever read from it.
    JitEntry = Qword,
    Suspend = NoArg,
    Str = NoArg, // deprecated; always falls back

    // Push immediate / variable / pointer.
    PshC4 = Dword,
    PshC8 = Qword,
    PshV4 = Word,
    PshV8 = Word,
    PshVPtr = Word,
    Psf = Word,
    Pga = Word,
    PshGPtr = Word,
    Var = Word,

    // Pop / set / copy.
    PopPtr = NoArg,
    SetV1 = WordDword,
    SetV2 = WordDword,
    SetV4 = WordDword,
    SetV8 = WordQword,
    CpyVtoR4 = Word,
    CpyRtoV4 = Word,
    CpyVtoV4 = TwoWords,
    CpyVtoV8 = TwoWords,
    Ldv = Word,
    GetObjRef = Word,

    // Reference copy.
    RefCpyV = Word,
    Refcpy = Word,

    // Dereferenced reads.
    Rdr1 = Word,
    Rdr2 = Word,
    Rdr4 = Word,
    Rdr8 = Word,

    // Calls.
    Call = Dword,

    // Comparisons.
    CmpIi = WordDword,

    // Jumps.
    Jmp = Dword,
    Jz = Dword,
    JLowZ = Dword,
    Jnz = Dword,
    JLowNz = Dword,
    Js = Dword,
    Jns = Dword,
    Jp = Dword,
    Jnp = Dword,

    // Boolean test/set.
    Tz = NoArg,
    Tnz = NoArg,
    Ts = NoArg,
    Tns = NoArg,
    Tp = NoArg,
    Tnp = NoArg,

    Not = Word,

    // Prefix increment/decrement of the dereferenced value register.
    Inci8 = NoArg,
    Deci8 = NoArg,
    Inci16 = NoArg,
    Deci16 = NoArg,
    Inci = NoArg,
    Deci = NoArg,
    Inci64 = NoArg,
    Deci64 = NoArg,
    Incf = NoArg,
    Decf = NoArg,
    Incd = NoArg,
    Decd = NoArg,

    // Unary in-place on a frame variable.
    Negi = Word,
    Negi64 = Word,
    Negf = Word,
    Negd = Word,

    // Binary register-register.
    Addi = ThreeWords,
    Subi = ThreeWords,
    Muli = ThreeWords,
    Addi64 = ThreeWords,
    Subi64 = ThreeWords,
    Muli64 = ThreeWords,
    Addf = ThreeWords,
    Subf = ThreeWords,
    Mulf = ThreeWords,
    Addd = ThreeWords,
    Subd = ThreeWords,
    Muld = ThreeWords,
    Bnot64 = Word,
    Band64 = ThreeWords,
    Bxor64 = ThreeWords,
    Bor64 = ThreeWords,
    Bsll64 = ThreeWords,
    Bsrl64 = ThreeWords,
    Bsra64 = ThreeWords,
    Bnot = Word,
    Band = ThreeWords,
    Bxor = ThreeWords,
    Bor = ThreeWords,
    Bsll = ThreeWords,
    Bsrl = ThreeWords,
    Bsra = ThreeWords,

    // Binary register-immediate.
    Addii = WordWordDword,
    Subii = WordWordDword,
    Mulii = WordWordDword,

    // Primitive casts.
    ITof = TwoWords,
    FToi = TwoWords,
    UTof = TwoWords,
    FTou = TwoWords,
    SbToi = TwoWords,
    SwToi = TwoWords,
    UbToi = TwoWords,
    UwToi = TwoWords,
    IToB = TwoWords,
    IToW = TwoWords,
    I64Toi = TwoWords,
    UToi64 = TwoWords,
    IToi64 = TwoWords,
    FTod = TwoWords,
    DTof = TwoWords,
    FToi64 = TwoWords,
    DToi64 = TwoWords,
    FTou64 = TwoWords,
    DTou64 = TwoWords,
    I64Tof = TwoWords,
    U64Tof = TwoWords,
    I64Tod = TwoWords,
    U64Tod = TwoWords,
    DToi = TwoWords,
    DTou = TwoWords,
    IToD = TwoWords,
    UTod = TwoWords,

    // Unsupported: always falls back to the interpreter, but must still be
    // nameable by the iterator and disassembler.
    SwapPtr = NoArg,
    PshG4 = Dword,
    LdGRdR4 = WordDword,
    Ret = Word,
    IncVi = Word,
    DecVi = Word,
    Copy = WordDword,
    RdsPtr = NoArg,
    Cmpd = NoArg,
    Cmpu = ThreeWords,
    Cmpf = NoArg,
    Cmpi = ThreeWords,
    CmpIf = WordDword,
    CmpIu = WordDword,
    Jmpp = Word,
    PopRPtr = NoArg,
    PshRPtr = NoArg,
    CallSys = Dword,
    CallBnd = Dword,
    Alloc = WordDword,
    Free = Word,
    LoadObj = Word,
    StoreObj = Word,
    GetObj = Word,
    ChkRef = NoArg,
    GetRef = Word,
    PshNull = NoArg,
    ClrVPtr = Word,
    ObjType = Dword,
    TypeId = Dword,
    AddSi = WordDword,
    CpyVtoR8 = Word,
    CpyVtoG4 = WordDword,
    CpyRtoV8 = Word,
    CpyGtoV4 = WordDword,
    Wrtv1 = Word,
    Wrtv2 = Word,
    Wrtv4 = Word,
    Wrtv8 = Word,
    Ldg = Dword,
    CmpPtr = ThreeWords,
    Divi = ThreeWords,
    Modi = ThreeWords,
    Divf = ThreeWords,
    Modf = ThreeWords,
    Divd = ThreeWords,
    Modd = ThreeWords,
    AddIf = WordWordDword,
    SubIf = WordWordDword,
    MulIf = WordWordDword,
    SetG4 = WordDword,
    ChkRefS = NoArg,
    ChkNullV = Word,
    CallIntf = Dword,
    Cast = Dword,
    Divi64 = ThreeWords,
    Modi64 = ThreeWords,
    Cmpi64 = ThreeWords,
    Cmpu64 = ThreeWords,
    ChkNullS = Word,
    ClrHi = NoArg,
    CallPtr = Word,
    FuncPtr = Dword,
    LoadThisR = Dword,
    Divu = ThreeWords,
    Modu = ThreeWords,
    Divu64 = ThreeWords,
    Modu64 = ThreeWords,
    LoadRObjR = WordDword,
    LoadVObjR = WordDword,
    AllocMem = Word,
    SetListSize = WordDword,
    PshListElmnt = WordDword,
    SetListType = WordDword,
    Powi = ThreeWords,
    Powu = ThreeWords,
    Powf = ThreeWords,
    Powd = ThreeWords,
    Powdi = ThreeWords,
    Powi64 = ThreeWords,
    Powu64 = ThreeWords,
    Thiscall1 = Dword,
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The fixed list of opcodes the translator has no stencil for (spec.md §9:
/// "a substantial list of opcodes falls back"). The fallback contract makes
/// this safe; it's an incremental-delivery axis, not a correctness one.
pub fn is_always_fallback(op: Opcode) -> bool {
    use Opcode::*;
    matches!(
        op,
        Str | Suspend
            | SwapPtr
            | PshG4
            | LdGRdR4
            | Ret
            | IncVi
            | DecVi
            | Copy
            | RdsPtr
            | Cmpd
            | Cmpu
            | Cmpf
            | Cmpi
            | CmpIf
            | CmpIu
            | Jmpp
            | PopRPtr
            | PshRPtr
            | CallSys
            | CallBnd
            | Alloc
            | Free
            | LoadObj
            | StoreObj
            | GetObj
            | ChkRef
            | GetRef
            | PshNull
            | ClrVPtr
            | ObjType
            | TypeId
            | AddSi
            | CpyVtoR8
            | CpyVtoG4
            | CpyRtoV8
            | CpyGtoV4
            | Wrtv1
            | Wrtv2
            | Wrtv4
            | Wrtv8
            | Ldg
            | CmpPtr
            | Divi
            | Modi
            | Divf
            | Modf
            | Divd
            | Modd
            | AddIf
            | SubIf
            | MulIf
            | SetG4
            | ChkRefS
            | ChkNullV
            | CallIntf
            | Cast
            | Divi64
            | Modi64
            | Cmpi64
            | Cmpu64
            | ChkNullS
            | ClrHi
            | CallPtr
            | FuncPtr
            | LoadThisR
            | Divu
            | Modu
            | Divu64
            | Modu64
            | LoadRObjR
            | LoadVObjR
            | AllocMem
            | SetListSize
            | PshListElmnt
            | SetListType
            | Powi
            | Powu
            | Powf
            | Powd
            | Powdi
            | Powi64
            | Powu64
            | Thiscall1
    )
}

/// A non-owning view of one instruction: a byte offset (in code words) into
/// a function's bytecode, plus the opcode and accessors over its operands.
#[derive(Debug, Clone, Copy)]
pub struct BytecodeInstruction<'a> {
    code: &'a [CodeWord],
    pub offset: usize,
    pub opcode: Opcode,
}

impl<'a> BytecodeInstruction<'a> {
    pub fn size(&self) -> usize {
        self.opcode.layout().size()
    }

    fn operand(&self, idx: usize) -> CodeWord {
        self.code[self.offset + 1 + idx]
    }

    pub fn word0(&self) -> u16 {
        self.operand(0) as u16
    }

    pub fn sword0(&self) -> i16 {
        self.operand(0) as i16
    }

    pub fn sword1(&self) -> i16 {
        self.operand(1) as i16
    }

    pub fn sword2(&self) -> i16 {
        self.operand(2) as i16
    }

    pub fn dword0(&self) -> u32 {
        self.operand(0)
    }

    /// The 32-bit immediate at operand index `idx`, as used by the var-imm
    /// binops where the constant sits after the two word operands.
    pub fn dword_at(&self, idx: usize) -> u32 {
        self.operand(idx)
    }

    pub fn int0(&self) -> i32 {
        self.operand(0) as i32
    }

    pub fn int_at(&self, idx: usize) -> i32 {
        self.operand(idx) as i32
    }

    pub fn qword0(&self) -> u64 {
        self.qword_at(0)
    }

    /// The 64-bit immediate starting at operand index `idx`, as used by
    /// `SetV8` where the qword follows a leading word operand.
    pub fn qword_at(&self, idx: usize) -> u64 {
        (self.operand(idx) as u64) | ((self.operand(idx + 1) as u64) << 32)
    }

    pub fn pword0(&self) -> usize {
        self.qword0() as usize
    }

    pub fn float0(&self) -> f32 {
        f32::from_bits(self.operand(0))
    }
}

/// Mutates the pointer-sized immediate of an instruction in place. Used
/// twice in a JitEntry's life: once to stash a lazy-function record address
/// at registration, once to stash its entry label at translation (spec.md
/// §3's invariant on `JitEntry` immediates).
pub fn set_pword0(code: &mut [CodeWord], offset: usize, value: usize) {
    let value = value as u64;
    code[offset + 1] = value as u32;
    code[offset + 2] = (value >> 32) as u32;
}

/// Walks a contiguous span of code words, yielding one [`BytecodeInstruction`]
/// per step and advancing by its opcode's size. Finite and non-restartable,
/// matching the interpreter's own walk.
pub struct BytecodeIter<'a> {
    code: &'a [CodeWord],
    pos: usize,
}

impl<'a> BytecodeIter<'a> {
    pub fn new(code: &'a [CodeWord]) -> Self {
        BytecodeIter { code, pos: 0 }
    }
}

impl<'a> Iterator for BytecodeIter<'a> {
    type Item = BytecodeInstruction<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.code.len() {
            return None;
        }
        let tag = self.code[self.pos] as u16;
        let opcode = *Opcode::ALL.get(tag as usize)?;
        let ins = BytecodeInstruction {
            code: self.code,
            offset: self.pos,
            opcode,
        };
        self.pos += ins.size();
        Some(ins)
    }
}

/// Encodes `opcode` followed by its operand words (already packed into
/// `CodeWord`s by the caller) and returns the number of words written. The
/// inverse of [`BytecodeIter`]; exists mainly so tests can build bytecode
/// without replicating the layout table by hand.
pub fn encode(buf: &mut Vec<CodeWord>, opcode: Opcode, operands: &[CodeWord]) {
    let start = buf.len();
    buf.push(opcode as u16 as u32);
    buf.extend_from_slice(operands);
    let expected = opcode.layout().size();
    debug_assert_eq!(buf.len() - start, expected, "operand count mismatch for {opcode:?}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iterates_fixed_size_instructions() {
        let mut code = Vec::new();
        encode(&mut code, Opcode::JitEntry, &[0, 0]);
        encode(&mut code, Opcode::PshC4, &[42]);
        encode(&mut code, Opcode::PopPtr, &[]);

        let offsets: Vec<_> = BytecodeIter::new(&code).map(|i| (i.opcode, i.offset)).collect();
        assert_eq!(
            offsets,
            vec![(Opcode::JitEntry, 0), (Opcode::PshC4, 3), (Opcode::PopPtr, 5)]
        );
    }

    #[test]
    fn dword_operand_roundtrips() {
        let mut code = Vec::new();
        encode(&mut code, Opcode::PshC4, &[0xDEAD_BEEF]);
        let ins = BytecodeIter::new(&code).next().unwrap();
        assert_eq!(ins.dword0(), 0xDEAD_BEEF);
    }

    #[test]
    fn qword_operand_spans_two_words() {
        let mut code = Vec::new();
        let value: u64 = 0x1122_3344_5566_7788;
        encode(&mut code, Opcode::PshC8, &[value as u32, (value >> 32) as u32]);
        let ins = BytecodeIter::new(&code).next().unwrap();
        assert_eq!(ins.qword0(), value);
    }

    #[test]
    fn set_pword0_overwrites_operand_words() {
        let mut code = Vec::new();
        encode(&mut code, Opcode::JitEntry, &[0, 0]);

        set_pword0(&mut code, 0, 0xABCD_EF01_2345);
        let ins = BytecodeInstruction {
            code: &code,
            offset: 0,
            opcode: Opcode::JitEntry,
        };
        assert_eq!(ins.pword0(), 0xABCD_EF01_2345);
    }

    #[test]
    fn is_always_fallback_covers_call_family_and_not_arithmetic() {
        assert!(is_always_fallback(Opcode::CallSys));
        assert!(is_always_fallback(Opcode::Powi));
        assert!(!is_always_fallback(Opcode::Addi));
        assert!(!is_always_fallback(Opcode::JitEntry));
    }

    #[test]
    fn every_opcode_has_a_stable_name() {
        for &op in Opcode::ALL {
            assert!(!op.name().is_empty());
        }
    }
}
