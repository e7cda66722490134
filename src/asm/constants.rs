use std::collections::BTreeMap;

use super::*;
use super::caseless::Caseless;

macro_rules! insert {
    ($m:ident : $key:expr => $val:expr) => {
        assert!($m.insert($key, $val).is_none())
    };
}
macro_rules! alias {
    ($m:ident : $from:expr => $to:expr) => {{
        let v = *$m.get(&$to).unwrap();
        insert!($m: $from => v);
    }}
}

pub(super) const COMMENT_CHARS: &[char] = &[';', '#'];
pub(super) const LABEL_DEF_CHAR: char = ':';

lazy_static! {
    pub(super) static ref SIZE_KEYWORDS: BTreeMap<Caseless<'static>, Size> = {
        let mut m = BTreeMap::new();

        insert!(m: Caseless("BYTE") => Size::Byte);
        insert!(m: Caseless("WORD") => Size::Word);
        insert!(m: Caseless("DWORD") => Size::Dword);
        insert!(m: Caseless("QWORD") => Size::Qword);
        insert!(m: Caseless("XMMWORD") => Size::Xword);
        alias!(m: Caseless("OWORD") => Caseless("XMMWORD"));

        m
    };
}
pub(super) const PTR_KEYWORD: Caseless<'static> = Caseless("PTR");
pub(super) const ENTRY_DIRECTIVE: Caseless<'static> = Caseless("ENTRY");

lazy_static! {
    pub(super) static ref PREFIXES: BTreeMap<Caseless<'static>, Prefix> = {
        let mut m = BTreeMap::new();

        insert!(m: Caseless("REP") => Prefix::Rep);
        insert!(m: Caseless("REPE") => Prefix::Repe);
        insert!(m: Caseless("REPNE") => Prefix::Repne);
        alias!(m: Caseless("REPZ") => Caseless("REPE"));
        alias!(m: Caseless("REPNZ") => Caseless("REPNE"));

        m
    };
}

lazy_static! {
    pub(super) static ref GP_REGISTERS: BTreeMap<Caseless<'static>, GpReg> = {
        let mut m = BTreeMap::new();

        let names: [[&'static str; 4]; 16] = [
            ["RAX", "EAX", "AX", "AL"],
            ["RBX", "EBX", "BX", "BL"],
            ["RCX", "ECX", "CX", "CL"],
            ["RDX", "EDX", "DX", "DL"],
            ["RSI", "ESI", "SI", "SIL"],
            ["RDI", "EDI", "DI", "DIL"],
            ["RBP", "EBP", "BP", "BPL"],
            ["RSP", "ESP", "SP", "SPL"],
            ["R8", "R8D", "R8W", "R8B"],
            ["R9", "R9D", "R9W", "R9B"],
            ["R10", "R10D", "R10W", "R10B"],
            ["R11", "R11D", "R11W", "R11B"],
            ["R12", "R12D", "R12W", "R12B"],
            ["R13", "R13D", "R13W", "R13B"],
            ["R14", "R14D", "R14W", "R14B"],
            ["R15", "R15D", "R15W", "R15B"],
        ];
        let sizes = [Size::Qword, Size::Dword, Size::Word, Size::Byte];
        for (id, views) in names.iter().enumerate() {
            for (name, &size) in views.iter().zip(sizes.iter()) {
                insert!(m: Caseless(*name) => GpReg { id: id as u8, size, high: false });
            }
        }

        insert!(m: Caseless("AH") => GpReg { id: 0, size: Size::Byte, high: true });
        insert!(m: Caseless("BH") => GpReg { id: 1, size: Size::Byte, high: true });
        insert!(m: Caseless("CH") => GpReg { id: 2, size: Size::Byte, high: true });
        insert!(m: Caseless("DH") => GpReg { id: 3, size: Size::Byte, high: true });

        m
    };
}

lazy_static! {
    pub(super) static ref XMM_REGISTERS: BTreeMap<Caseless<'static>, u8> = {
        let mut m = BTreeMap::new();

        let names = [
            "XMM0", "XMM1", "XMM2", "XMM3", "XMM4", "XMM5", "XMM6", "XMM7",
            "XMM8", "XMM9", "XMM10", "XMM11", "XMM12", "XMM13", "XMM14", "XMM15",
        ];
        for (id, name) in names.iter().enumerate() {
            insert!(m: Caseless(*name) => id as u8);
        }

        m
    };
}

lazy_static! {
    /// Condition suffixes shared by `J`, `CMOV` and `SET`, including all the usual aliases.
    pub(super) static ref CONDITION_SUFFIXES: BTreeMap<Caseless<'static>, Condition> = {
        let mut m = BTreeMap::new();

        insert!(m: Caseless("Z") => Condition::Z);
        insert!(m: Caseless("NZ") => Condition::NZ);
        insert!(m: Caseless("S") => Condition::S);
        insert!(m: Caseless("NS") => Condition::NS);
        insert!(m: Caseless("P") => Condition::P);
        insert!(m: Caseless("NP") => Condition::NP);
        insert!(m: Caseless("O") => Condition::O);
        insert!(m: Caseless("NO") => Condition::NO);

        insert!(m: Caseless("B") => Condition::B);
        insert!(m: Caseless("BE") => Condition::BE);
        insert!(m: Caseless("A") => Condition::A);
        insert!(m: Caseless("AE") => Condition::AE);

        insert!(m: Caseless("L") => Condition::L);
        insert!(m: Caseless("LE") => Condition::LE);
        insert!(m: Caseless("G") => Condition::G);
        insert!(m: Caseless("GE") => Condition::GE);

        alias!(m: Caseless("E") => Caseless("Z"));
        alias!(m: Caseless("NE") => Caseless("NZ"));
        alias!(m: Caseless("PE") => Caseless("P"));
        alias!(m: Caseless("PO") => Caseless("NP"));

        alias!(m: Caseless("C") => Caseless("B"));
        alias!(m: Caseless("NAE") => Caseless("B"));
        alias!(m: Caseless("NA") => Caseless("BE"));
        alias!(m: Caseless("NBE") => Caseless("A"));
        alias!(m: Caseless("NC") => Caseless("AE"));
        alias!(m: Caseless("NB") => Caseless("AE"));

        alias!(m: Caseless("NGE") => Caseless("L"));
        alias!(m: Caseless("NG") => Caseless("LE"));
        alias!(m: Caseless("NLE") => Caseless("G"));
        alias!(m: Caseless("NL") => Caseless("GE"));

        m
    };
}

/// The mnemonic prefixes which take a condition suffix, paired with the op builder for each.
pub(super) const CONDITIONAL_MNEMONICS: &[(&str, fn(Condition) -> Op)] = &[
    ("CMOV", Op::Cmovcc),
    ("SET", Op::Setcc),
    ("J", Op::Jcc),
];

macro_rules! insert_sse_arith {
    ($m:ident : $name:literal => $kind:ident) => {
        insert!($m: Caseless(concat!($name, "SS")) => Op::Sse(SseOp::Arith(SseArith::$kind, Precision::Single, Lanes::Scalar)));
        insert!($m: Caseless(concat!($name, "PS")) => Op::Sse(SseOp::Arith(SseArith::$kind, Precision::Single, Lanes::Packed)));
        insert!($m: Caseless(concat!($name, "SD")) => Op::Sse(SseOp::Arith(SseArith::$kind, Precision::Double, Lanes::Scalar)));
        insert!($m: Caseless(concat!($name, "PD")) => Op::Sse(SseOp::Arith(SseArith::$kind, Precision::Double, Lanes::Packed)));
    };
}
macro_rules! insert_string_op {
    ($m:ident : $name:literal => $kind:ident) => {
        insert!($m: Caseless(concat!($name, "B")) => Op::String(StringOp::$kind, Size::Byte, None));
        insert!($m: Caseless(concat!($name, "W")) => Op::String(StringOp::$kind, Size::Word, None));
        insert!($m: Caseless(concat!($name, "D")) => Op::String(StringOp::$kind, Size::Dword, None));
        insert!($m: Caseless(concat!($name, "Q")) => Op::String(StringOp::$kind, Size::Qword, None));
    };
}

lazy_static! {
    /// All mnemonics with a fixed meaning.
    /// Conditional forms (`jcc`, `cmovcc`, `setcc`) are resolved through `CONDITIONAL_MNEMONICS` instead.
    pub(super) static ref MNEMONICS: BTreeMap<Caseless<'static>, Op> = {
        let mut m = BTreeMap::new();

        insert!(m: Caseless("NOP") => Op::Nop);
        insert!(m: Caseless("HLT") => Op::Hlt);
        alias!(m: Caseless("HALT") => Caseless("HLT"));

        insert!(m: Caseless("MOV") => Op::Mov);
        insert!(m: Caseless("MOVZX") => Op::Movzx);
        insert!(m: Caseless("MOVSX") => Op::Movsx);
        insert!(m: Caseless("MOVSXD") => Op::Movsxd);
        insert!(m: Caseless("LEA") => Op::Lea);
        insert!(m: Caseless("XCHG") => Op::Xchg);
        insert!(m: Caseless("PUSH") => Op::Push);
        insert!(m: Caseless("POP") => Op::Pop);

        insert!(m: Caseless("CBW") => Op::SignExtendAcc(Size::Word));
        insert!(m: Caseless("CWDE") => Op::SignExtendAcc(Size::Dword));
        insert!(m: Caseless("CDQE") => Op::SignExtendAcc(Size::Qword));
        insert!(m: Caseless("CWD") => Op::SignExtendIntoDx(Size::Word));
        insert!(m: Caseless("CDQ") => Op::SignExtendIntoDx(Size::Dword));
        insert!(m: Caseless("CQO") => Op::SignExtendIntoDx(Size::Qword));

        insert!(m: Caseless("ADD") => Op::Binary(BinaryOp::Add));
        insert!(m: Caseless("ADC") => Op::Binary(BinaryOp::Adc));
        insert!(m: Caseless("SUB") => Op::Binary(BinaryOp::Sub));
        insert!(m: Caseless("SBB") => Op::Binary(BinaryOp::Sbb));
        insert!(m: Caseless("CMP") => Op::Binary(BinaryOp::Cmp));
        insert!(m: Caseless("AND") => Op::Binary(BinaryOp::And));
        insert!(m: Caseless("OR") => Op::Binary(BinaryOp::Or));
        insert!(m: Caseless("XOR") => Op::Binary(BinaryOp::Xor));
        insert!(m: Caseless("TEST") => Op::Binary(BinaryOp::Test));

        insert!(m: Caseless("INC") => Op::Unary(UnaryOp::Inc));
        insert!(m: Caseless("DEC") => Op::Unary(UnaryOp::Dec));
        insert!(m: Caseless("NEG") => Op::Unary(UnaryOp::Neg));
        insert!(m: Caseless("NOT") => Op::Unary(UnaryOp::Not));

        insert!(m: Caseless("MUL") => Op::Mul);
        insert!(m: Caseless("IMUL") => Op::Imul);
        insert!(m: Caseless("DIV") => Op::Div);
        insert!(m: Caseless("IDIV") => Op::Idiv);

        insert!(m: Caseless("SHL") => Op::Shift(ShiftOp::Shl));
        alias!(m: Caseless("SAL") => Caseless("SHL"));
        insert!(m: Caseless("SHR") => Op::Shift(ShiftOp::Shr));
        insert!(m: Caseless("SAR") => Op::Shift(ShiftOp::Sar));
        insert!(m: Caseless("ROL") => Op::Shift(ShiftOp::Rol));
        insert!(m: Caseless("ROR") => Op::Shift(ShiftOp::Ror));

        insert!(m: Caseless("BT") => Op::BitTest(BitTestOp::Bt));
        insert!(m: Caseless("BTS") => Op::BitTest(BitTestOp::Bts));
        insert!(m: Caseless("BTR") => Op::BitTest(BitTestOp::Btr));
        insert!(m: Caseless("BTC") => Op::BitTest(BitTestOp::Btc));
        insert!(m: Caseless("POPCNT") => Op::Popcnt);
        insert!(m: Caseless("BLSR") => Op::Blsr);
        insert!(m: Caseless("BEXTR") => Op::Bextr);

        insert!(m: Caseless("CLC") => Op::Flag(FlagOp::Clc));
        insert!(m: Caseless("STC") => Op::Flag(FlagOp::Stc));
        insert!(m: Caseless("CMC") => Op::Flag(FlagOp::Cmc));
        insert!(m: Caseless("CLD") => Op::Flag(FlagOp::Cld));
        insert!(m: Caseless("STD") => Op::Flag(FlagOp::Std));

        insert!(m: Caseless("JMP") => Op::Jmp);
        insert!(m: Caseless("JRCXZ") => Op::Jrcxz(Size::Qword));
        insert!(m: Caseless("JECXZ") => Op::Jrcxz(Size::Dword));
        insert!(m: Caseless("LOOP") => Op::Loop(LoopOp::Loop));
        insert!(m: Caseless("LOOPE") => Op::Loop(LoopOp::Loope));
        insert!(m: Caseless("LOOPNE") => Op::Loop(LoopOp::Loopne));
        alias!(m: Caseless("LOOPZ") => Caseless("LOOPE"));
        alias!(m: Caseless("LOOPNZ") => Caseless("LOOPNE"));
        insert!(m: Caseless("CALL") => Op::Call);
        insert!(m: Caseless("RET") => Op::Ret);

        // MOVSD is taken by the SSE scalar move
        insert!(m: Caseless("MOVSB") => Op::String(StringOp::Movs, Size::Byte, None));
        insert!(m: Caseless("MOVSW") => Op::String(StringOp::Movs, Size::Word, None));
        insert!(m: Caseless("MOVSQ") => Op::String(StringOp::Movs, Size::Qword, None));
        insert_string_op!(m: "CMPS" => Cmps);
        insert_string_op!(m: "SCAS" => Scas);
        insert_string_op!(m: "LODS" => Lods);
        insert_string_op!(m: "STOS" => Stos);

        insert!(m: Caseless("MOVSS") => Op::Sse(SseOp::MovScalar(Precision::Single)));
        insert!(m: Caseless("MOVSD") => Op::Sse(SseOp::MovScalar(Precision::Double)));
        insert!(m: Caseless("MOVAPS") => Op::Sse(SseOp::MovPacked { aligned: true }));
        insert!(m: Caseless("MOVUPS") => Op::Sse(SseOp::MovPacked { aligned: false }));
        alias!(m: Caseless("MOVAPD") => Caseless("MOVAPS"));
        alias!(m: Caseless("MOVUPD") => Caseless("MOVUPS"));
        insert!(m: Caseless("MOVD") => Op::Sse(SseOp::MovD));
        insert!(m: Caseless("MOVQ") => Op::Sse(SseOp::MovQ));

        insert_sse_arith!(m: "ADD" => Add);
        insert_sse_arith!(m: "SUB" => Sub);
        insert_sse_arith!(m: "MUL" => Mul);
        insert_sse_arith!(m: "DIV" => Div);
        insert_sse_arith!(m: "MIN" => Min);
        insert_sse_arith!(m: "MAX" => Max);
        insert_sse_arith!(m: "SQRT" => Sqrt);
        insert!(m: Caseless("RSQRTSS") => Op::Sse(SseOp::Arith(SseArith::Rsqrt, Precision::Single, Lanes::Scalar)));
        insert!(m: Caseless("RSQRTPS") => Op::Sse(SseOp::Arith(SseArith::Rsqrt, Precision::Single, Lanes::Packed)));
        insert!(m: Caseless("RCPSS") => Op::Sse(SseOp::Arith(SseArith::Rcp, Precision::Single, Lanes::Scalar)));
        insert!(m: Caseless("RCPPS") => Op::Sse(SseOp::Arith(SseArith::Rcp, Precision::Single, Lanes::Packed)));

        insert!(m: Caseless("ANDPS") => Op::Sse(SseOp::Logic(SseLogic::And)));
        insert!(m: Caseless("ORPS") => Op::Sse(SseOp::Logic(SseLogic::Or)));
        insert!(m: Caseless("XORPS") => Op::Sse(SseOp::Logic(SseLogic::Xor)));
        insert!(m: Caseless("ANDNPS") => Op::Sse(SseOp::Logic(SseLogic::Andn)));
        insert!(m: Caseless("SHUFPS") => Op::Sse(SseOp::Shufps));

        insert!(m: Caseless("COMISS") => Op::Sse(SseOp::Comi(Precision::Single)));
        insert!(m: Caseless("COMISD") => Op::Sse(SseOp::Comi(Precision::Double)));
        alias!(m: Caseless("UCOMISS") => Caseless("COMISS"));
        alias!(m: Caseless("UCOMISD") => Caseless("COMISD"));

        insert!(m: Caseless("CVTSI2SS") => Op::Sse(SseOp::Cvt(Conversion::IntToSingle)));
        insert!(m: Caseless("CVTSI2SD") => Op::Sse(SseOp::Cvt(Conversion::IntToDouble)));
        insert!(m: Caseless("CVTTSS2SI") => Op::Sse(SseOp::Cvt(Conversion::SingleToInt)));
        insert!(m: Caseless("CVTTSD2SI") => Op::Sse(SseOp::Cvt(Conversion::DoubleToInt)));
        insert!(m: Caseless("CVTSS2SD") => Op::Sse(SseOp::Cvt(Conversion::SingleToDouble)));
        insert!(m: Caseless("CVTSD2SS") => Op::Sse(SseOp::Cvt(Conversion::DoubleToSingle)));

        m
    };
}

/// Looks up a mnemonic, including the conditional families (e.g. `cmovge`, `setnz`, `jb`).
pub(super) fn lookup_mnemonic(name: &str) -> Option<Op> {
    if let Some(op) = MNEMONICS.get(&Caseless(name)) {
        return Some(*op);
    }
    for (prefix, builder) in CONDITIONAL_MNEMONICS {
        if name.len() > prefix.len() && name.is_char_boundary(prefix.len()) && name[..prefix.len()].eq_ignore_ascii_case(prefix) {
            if let Some(cc) = CONDITION_SUFFIXES.get(&Caseless(&name[prefix.len()..])) {
                return Some(builder(*cc));
            }
        }
    }
    None
}
#[test]
fn test_lookup_mnemonic() {
    assert_eq!(lookup_mnemonic("mov"), Some(Op::Mov));
    assert_eq!(lookup_mnemonic("MoVsD"), Some(Op::Sse(SseOp::MovScalar(Precision::Double))));
    assert_eq!(lookup_mnemonic("repne"), None);
    assert_eq!(lookup_mnemonic("jmp"), Some(Op::Jmp));
    assert_eq!(lookup_mnemonic("jnz"), Some(Op::Jcc(Condition::NZ)));
    assert_eq!(lookup_mnemonic("JE"), Some(Op::Jcc(Condition::Z)));
    assert_eq!(lookup_mnemonic("cmovg"), Some(Op::Cmovcc(Condition::G)));
    assert_eq!(lookup_mnemonic("cmovnle"), Some(Op::Cmovcc(Condition::G)));
    assert_eq!(lookup_mnemonic("setz"), Some(Op::Setcc(Condition::Z)));
    assert_eq!(lookup_mnemonic("setc"), Some(Op::Setcc(Condition::B)));
    assert_eq!(lookup_mnemonic("scasb"), Some(Op::String(StringOp::Scas, Size::Byte, None)));
    assert_eq!(lookup_mnemonic("sqrtps"), Some(Op::Sse(SseOp::Arith(SseArith::Sqrt, Precision::Single, Lanes::Packed))));
    assert_eq!(lookup_mnemonic("j"), None);
    assert_eq!(lookup_mnemonic("jx"), None);
    assert_eq!(lookup_mnemonic("cmov"), None);
    assert_eq!(lookup_mnemonic("sete1"), None);
}
