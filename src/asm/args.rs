use std::num::IntErrorKind;

use super::*;
use crate::common::util::{sign_extend, truncate};

/// A label reference as written in the source.
#[derive(Clone, PartialEq, Eq, Debug)]
pub(super) enum LabelRef {
    Named(String),
    /// `Nb`: the closest definition of `N` at or before the referencing line.
    Backward(u64),
    /// `Nf`: the closest definition of `N` after the referencing line.
    Forward(u64),
}
impl fmt::Display for LabelRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LabelRef::Named(name) => f.write_str(name),
            LabelRef::Backward(n) => write!(f, "{}b", n),
            LabelRef::Forward(n) => write!(f, "{}f", n),
        }
    }
}

/// A parsed operand before it is checked against its instruction.
#[derive(Clone, PartialEq, Eq, Debug)]
pub(super) enum Arg {
    Reg(GpReg),
    Xmm(u8),
    Imm(u64),
    Mem(Address),
    Label(LabelRef),
}
impl Arg {
    fn size(&self) -> Option<Size> {
        match self {
            Arg::Reg(r) => Some(r.size),
            Arg::Mem(a) => a.size,
            Arg::Xmm(_) => Some(Size::Xword),
            Arg::Imm(_) | Arg::Label(_) => None,
        }
    }
}

struct PendingRef {
    instruction: usize,
    operand: usize,
    label: LabelRef,
    line_num: usize,
    pos: usize,
}

struct NumericLabel {
    num: u64,
    line_num: usize,
    target: usize,
}

/// A checked instruction body: operands, operation width, and any label references still to be resolved.
struct Built {
    operands: Vec<Operand>,
    size: Size,
    labels: Vec<(usize, LabelRef, usize)>,
}
impl Built {
    fn new(operands: Vec<Operand>, size: Size) -> Self {
        Built { operands, size, labels: vec![] }
    }
}

/// An error kind paired with its position in the line, before the line number is attached.
type LineResult<T> = Result<T, (AsmErrorKind, Option<usize>)>;

macro_rules! err {
    ($kind:ident) => { Err((AsmErrorKind::$kind, None)) };
    ($kind:ident, $pos:expr) => { Err((AsmErrorKind::$kind, Some($pos))) };
}

#[derive(Default)]
pub(super) struct AssembleArgs {
    pub(super) line_num: usize,

    instructions: Vec<Instruction>,
    labels: BTreeMap<String, usize>,
    numeric_labels: Vec<NumericLabel>,
    pending: Vec<PendingRef>,
    entry: Option<(String, usize, usize)>,
}
impl AssembleArgs {
    pub(super) fn process_line(&mut self, raw_line: &str) -> Result<(), AsmError> {
        let line_num = self.line_num;
        self.process_line_inner(raw_line).map_err(|(kind, pos)| AsmError { kind, line_num, pos })
    }

    fn process_line_inner(&mut self, raw_line: &str) -> LineResult<()> {
        let raw_stop = comment_start(raw_line);

        // consume any number of label definitions
        let mut pos = 0;
        loop {
            let (rest, start) = trim_start_with_pos(raw_line, pos, raw_stop);
            let colon = match rest.find(LABEL_DEF_CHAR) {
                Some(c) => c,
                None => break,
            };
            let name = &rest[..colon];
            if name.is_empty() || name.contains(|c: char| c.is_whitespace() || matches!(c, ',' | '\'' | '[')) {
                break;
            }

            let target = self.instructions.len();
            if name.bytes().all(|b| b.is_ascii_digit()) {
                let num = match name.parse::<u64>() {
                    Ok(n) => n,
                    Err(_) => return err!(ImmOutOfRange, start),
                };
                self.numeric_labels.push(NumericLabel { num, line_num: self.line_num, target });
            } else {
                if !is_valid_symbol_name(name) { return err!(InvalidSymbolName, start); }
                if is_reserved_symbol_name(name) { return err!(ReservedSymbolName, start); }
                if self.labels.contains_key(name) { return err!(DuplicateLabel, start); }
                self.labels.insert(name.to_owned(), target);
            }
            pos = start + colon + 1;
        }

        let (mut token, mut token_stop) = grab_whitespace_sep_token(raw_line, pos, raw_stop);
        if token.is_empty() { return Ok(()); }
        let instr_start = token_stop - token.len();

        let mut prefix = None;
        if let Some(p) = PREFIXES.get(&Caseless(token)) {
            prefix = Some((*p, instr_start));
            let (t, s) = grab_whitespace_sep_token(raw_line, token_stop, raw_stop);
            if t.is_empty() { return err!(PrefixWithoutInstruction, instr_start); }
            token = t;
            token_stop = s;
        }
        let token_start = token_stop - token.len();

        if prefix.is_none() && Caseless(token) == ENTRY_DIRECTIVE {
            return self.process_entry(raw_line, token_start, token_stop, raw_stop);
        }

        let op = match lookup_mnemonic(token) {
            Some(op) => op,
            None => return err!(UnrecognizedInstruction, token_start),
        };
        let op = match (op, prefix) {
            (op, None) => op,
            (Op::String(kind, size, None), Some((p, p_pos))) => {
                let p = match (kind, p) {
                    (StringOp::Movs | StringOp::Lods | StringOp::Stos, Prefix::Rep) => Prefix::Rep,
                    (StringOp::Cmps | StringOp::Scas, Prefix::Rep | Prefix::Repe) => Prefix::Repe,
                    (StringOp::Cmps | StringOp::Scas, Prefix::Repne) => Prefix::Repne,
                    _ => return err!(InvalidPrefixForThisInstruction, p_pos),
                };
                Op::String(kind, size, Some(p))
            }
            (_, Some((_, p_pos))) => return err!(InvalidPrefixForThisInstruction, p_pos),
        };

        let mut args = vec![];
        let (operand_text, operand_start) = trim_start_with_pos(raw_line, token_stop, raw_stop);
        if !operand_text.trim_end().is_empty() {
            for (piece, piece_start) in split_operands(raw_line, operand_start, raw_stop) {
                let (piece, piece_start) = trim_start_with_pos(raw_line, piece_start, piece_start + piece.len());
                let piece = piece.trim_end();
                if piece.is_empty() { return err!(ExpectedOperand, piece_start); }
                match parse_arg(piece) {
                    Ok(arg) => args.push((arg, piece_start)),
                    Err(kind) => return Err((kind, Some(piece_start))),
                }
            }
        }

        let built = build(op, args)?;
        let index = self.instructions.len();
        for (operand, label, pos) in built.labels {
            self.pending.push(PendingRef { instruction: index, operand, label, line_num: self.line_num, pos });
        }
        self.instructions.push(Instruction {
            op,
            operands: built.operands,
            size: built.size,
            line_num: self.line_num,
            text: raw_line[instr_start..raw_stop].trim().to_owned(),
        });
        Ok(())
    }

    fn process_entry(&mut self, raw_line: &str, directive_start: usize, directive_stop: usize, raw_stop: usize) -> LineResult<()> {
        let (name, name_stop) = grab_whitespace_sep_token(raw_line, directive_stop, raw_stop);
        let name_start = name_stop - name.len();
        if name.is_empty() { return err!(ExpectedLabel, directive_stop); }
        if !raw_line[name_stop..raw_stop].trim().is_empty() {
            return Err((AsmErrorKind::ArgsExpectedCount(&[1]), Some(directive_start)));
        }
        if !is_valid_symbol_name(name) { return err!(InvalidSymbolName, name_start); }
        if self.entry.is_some() { return err!(EntryAlreadyDefined, directive_start); }
        self.entry = Some((name.to_owned(), self.line_num, name_start));
        Ok(())
    }

    /// Resolves every label reference and produces the finished program.
    pub(super) fn finish(mut self) -> Result<Program, AsmError> {
        for r in self.pending.iter() {
            let target = match &r.label {
                LabelRef::Named(name) => self.labels.get(name).copied(),
                LabelRef::Backward(n) => self.numeric_labels.iter().rev().find(|l| l.num == *n && l.line_num <= r.line_num).map(|l| l.target),
                LabelRef::Forward(n) => self.numeric_labels.iter().find(|l| l.num == *n && l.line_num > r.line_num).map(|l| l.target),
            };
            match target {
                Some(t) => self.instructions[r.instruction].operands[r.operand] = Operand::Target(t),
                None => return Err(AsmError { kind: AsmErrorKind::UnresolvedLabel(r.label.to_string()), line_num: r.line_num, pos: Some(r.pos) }),
            }
        }

        let entry = match self.entry.take() {
            None => 0,
            Some((name, line_num, pos)) => match self.labels.get(&name) {
                Some(&e) => e,
                None => return Err(AsmError { kind: AsmErrorKind::UnresolvedLabel(name), line_num, pos: Some(pos) }),
            }
        };

        Ok(Program { instructions: self.instructions, labels: self.labels, entry })
    }
}

/// Finds where the comment starts (if any), ignoring comment characters inside character literals.
fn comment_start(raw_line: &str) -> usize {
    let mut in_quote = false;
    for (i, c) in raw_line.char_indices() {
        match c {
            '\'' => in_quote = !in_quote,
            c if !in_quote && COMMENT_CHARS.contains(&c) => return i,
            _ => (),
        }
    }
    raw_line.len()
}
#[test]
fn test_comment_start() {
    assert_eq!(comment_start("ret ; done"), 4);
    assert_eq!(comment_start("# whole line"), 0);
    assert_eq!(comment_start("cmp al, ';' ; semicolon"), 12);
    assert_eq!(comment_start("mov al, '#'"), 11);
}

/// Splits the operand list on top-level commas (commas inside character literals don't count).
/// Returns each piece along with its starting position in the line.
fn split_operands(raw_line: &str, raw_start: usize, raw_stop: usize) -> Vec<(&str, usize)> {
    let mut res = vec![];
    let mut piece_start = raw_start;
    let mut in_quote = false;
    for (i, c) in raw_line[raw_start..raw_stop].char_indices() {
        match c {
            '\'' => in_quote = !in_quote,
            ',' if !in_quote => {
                res.push((&raw_line[piece_start..raw_start + i], piece_start));
                piece_start = raw_start + i + 1;
            }
            _ => (),
        }
    }
    res.push((&raw_line[piece_start..raw_stop], piece_start));
    res
}
#[test]
fn test_split_operands() {
    assert_eq!(split_operands("mov rax, rbx", 3, 12), vec![(" rax", 3), (" rbx", 8)]);
    assert_eq!(split_operands("cmp al, ','", 3, 11), vec![(" al", 3), (" ','", 7)]);
    assert_eq!(split_operands("ret", 3, 3), vec![("", 3)]);
}

/// Parses an integer literal: decimal, `0x`, `0o` or `0b` with `_` separators, or a quoted ascii character.
/// A leading `$` and a sign are accepted. The result is sign extended to 64 bits.
pub(super) fn parse_imm(token: &str) -> Result<u64, AsmErrorKind> {
    let token = token.strip_prefix('$').unwrap_or(token);
    let (neg, body) = match token.as_bytes().first() {
        Some(b'-') => (true, &token[1..]),
        Some(b'+') => (false, &token[1..]),
        _ => (false, token),
    };

    if body.starts_with('\'') {
        let mut chars = body.chars();
        return match (chars.next(), chars.next(), chars.next(), chars.next()) {
            (Some('\''), Some(c), Some('\''), None) if c.is_ascii() && c != '\'' => {
                let v = c as u64;
                Ok(if neg { v.wrapping_neg() } else { v })
            }
            _ => Err(AsmErrorKind::IllFormedCharacterLiteral),
        };
    }

    let lower = body.get(..2).map(|p| p.to_ascii_lowercase());
    let (radix, digits) = match lower.as_deref() {
        Some("0x") => (16, &body[2..]),
        Some("0o") => (8, &body[2..]),
        Some("0b") => (2, &body[2..]),
        _ => (10, body),
    };
    let cleaned: String = digits.chars().filter(|&c| c != '_').collect();
    if cleaned.is_empty() || digits.starts_with('_') || !cleaned.chars().all(|c| c.is_digit(radix)) {
        return Err(AsmErrorKind::IllFormedNumericLiteral);
    }
    let v = match u64::from_str_radix(&cleaned, radix) {
        Ok(v) => v,
        Err(e) => return Err(match e.kind() {
            IntErrorKind::PosOverflow => AsmErrorKind::ImmOutOfRange,
            _ => AsmErrorKind::IllFormedNumericLiteral,
        }),
    };

    if neg {
        if v > 1 << 63 { return Err(AsmErrorKind::ImmOutOfRange); }
        Ok(v.wrapping_neg())
    } else {
        Ok(v)
    }
}
#[test]
fn test_parse_imm() {
    assert_eq!(parse_imm("0").unwrap(), 0);
    assert_eq!(parse_imm("1_000").unwrap(), 1000);
    assert_eq!(parse_imm("-1").unwrap(), u64::MAX);
    assert_eq!(parse_imm("$42").unwrap(), 42);
    assert_eq!(parse_imm("$-42").unwrap(), (-42i64) as u64);
    assert_eq!(parse_imm("0xDEAD_beef").unwrap(), 0xdeadbeef);
    assert_eq!(parse_imm("0O17").unwrap(), 15);
    assert_eq!(parse_imm("0b1010").unwrap(), 10);
    assert_eq!(parse_imm("0xffffffffffffffff").unwrap(), u64::MAX);
    assert_eq!(parse_imm("-9223372036854775808").unwrap(), 1 << 63);
    assert_eq!(parse_imm("'a'").unwrap(), 97);
    assert_eq!(parse_imm("','").unwrap(), 44);

    assert!(matches!(parse_imm("0x1_0000_0000_0000_0000"), Err(AsmErrorKind::ImmOutOfRange)));
    assert!(matches!(parse_imm("-9223372036854775809"), Err(AsmErrorKind::ImmOutOfRange)));
    assert!(matches!(parse_imm("0x"), Err(AsmErrorKind::IllFormedNumericLiteral)));
    assert!(matches!(parse_imm("0b102"), Err(AsmErrorKind::IllFormedNumericLiteral)));
    assert!(matches!(parse_imm("_12"), Err(AsmErrorKind::IllFormedNumericLiteral)));
    assert!(matches!(parse_imm("0x+5"), Err(AsmErrorKind::IllFormedNumericLiteral)));
    assert!(matches!(parse_imm("12abc"), Err(AsmErrorKind::IllFormedNumericLiteral)));
    assert!(matches!(parse_imm("'ab'"), Err(AsmErrorKind::IllFormedCharacterLiteral)));
}

/// Gets the leading word of an operand, which stops at whitespace or an opening bracket.
fn leading_word(s: &str) -> &str {
    s.split(|c: char| c.is_whitespace() || c == '[').next().unwrap_or("")
}

/// Parses `[base + index*scale + disp]` with an optional leading size keyword and optional `ptr`.
fn parse_address(token: &str) -> Result<Address, AsmErrorKind> {
    let mut rest = token;
    let mut size = None;
    let word = leading_word(rest);
    if let Some(s) = SIZE_KEYWORDS.get(&Caseless(word)) {
        size = Some(*s);
        rest = rest[word.len()..].trim_start();
        let word = leading_word(rest);
        if Caseless(word) == PTR_KEYWORD {
            rest = rest[word.len()..].trim_start();
        }
    }
    if !rest.starts_with('[') { return Err(BadAddress::ExpectedBrackets.into()); }
    if rest.len() < 2 || !rest.ends_with(']') { return Err(BadAddress::Unterminated.into()); }
    let interior = &rest[1..rest.len() - 1];
    if interior.contains(|c| c == '[' || c == ']') { return Err(BadAddress::Unterminated.into()); }

    let mut terms = vec![];
    let mut term_start = 0;
    let mut negative = false;
    for (i, c) in interior.char_indices() {
        if c == '+' || c == '-' {
            terms.push((negative, interior[term_start..i].trim()));
            negative = c == '-';
            term_start = i + 1;
        }
    }
    terms.push((negative, interior[term_start..].trim()));
    // a leading sign leaves an empty first term
    if terms.len() > 1 && terms[0].1.is_empty() { terms.remove(0); }

    let address_reg = |name: &str| -> Result<Option<u8>, AsmErrorKind> {
        match GP_REGISTERS.get(&Caseless(name)) {
            None => Ok(None),
            Some(r) if r.size == Size::Qword && !r.high => Ok(Some(r.id)),
            Some(_) => Err(BadAddress::RegisterNotQword.into()),
        }
    };

    let mut base = None;
    let mut index = None;
    let mut disp: i64 = 0;
    for (negative, term) in terms {
        if term.is_empty() { return Err(BadAddress::EmptyTerm.into()); }

        if let Some(star) = term.find('*') {
            let (a, b) = (term[..star].trim(), term[star + 1..].trim());
            let (reg, scale) = match (address_reg(a)?, address_reg(b)?) {
                (Some(r), None) => (r, b),
                (None, Some(r)) => (r, a),
                _ => return Err(BadAddress::UnrecognizedTerm.into()),
            };
            let scale = match parse_imm(scale) {
                Ok(s) if matches!(s, 1 | 2 | 4 | 8) => s as u8,
                _ => return Err(BadAddress::InvalidScale.into()),
            };
            if negative { return Err(BadAddress::RegIllegalOp.into()); }
            if index.is_some() { return Err(BadAddress::TooManyRegisters.into()); }
            index = Some((reg, scale));
        } else if let Some(reg) = address_reg(term)? {
            if negative { return Err(BadAddress::RegIllegalOp.into()); }
            if base.is_none() { base = Some(reg); }
            else if index.is_none() { index = Some((reg, 1)); }
            else { return Err(BadAddress::TooManyRegisters.into()); }
        } else {
            let v = match parse_imm(term) {
                Ok(v) => v as i64,
                Err(AsmErrorKind::ImmOutOfRange) => return Err(BadAddress::DispOutOfRange.into()),
                Err(_) => return Err(BadAddress::UnrecognizedTerm.into()),
            };
            let v = if negative { v.checked_neg() } else { Some(v) };
            disp = match v.and_then(|v| disp.checked_add(v)) {
                Some(d) => d,
                None => return Err(BadAddress::DispOutOfRange.into()),
            };
        }
    }
    if disp < i32::MIN as i64 || disp > i32::MAX as i64 { return Err(BadAddress::DispOutOfRange.into()); }

    Ok(Address { base, index, disp, size })
}
#[test]
fn test_parse_address() {
    let addr = |base, index, disp, size| Address { base, index, disp, size };
    assert_eq!(parse_address("[rax]").unwrap(), addr(Some(0), None, 0, None));
    assert_eq!(parse_address("[ rdi + 8 ]").unwrap(), addr(Some(5), None, 8, None));
    assert_eq!(parse_address("dword [rbp-4]").unwrap(), addr(Some(6), None, -4, Some(Size::Dword)));
    assert_eq!(parse_address("QWORD PTR [8*r9 + r8 + 0x10]").unwrap(), addr(Some(8), Some((9, 8)), 16, Some(Size::Qword)));
    assert_eq!(parse_address("[rsi + rcx]").unwrap(), addr(Some(4), Some((2, 1)), 0, None));
    assert_eq!(parse_address("[-8 + rsp]").unwrap(), addr(Some(7), None, -8, None));
    assert_eq!(parse_address("[4096]").unwrap(), addr(None, None, 4096, None));

    assert_eq!(parse_address("rax").unwrap_err().to_string(), AsmErrorKind::BadAddress(BadAddress::ExpectedBrackets).to_string());
    assert!(matches!(parse_address("[rax"), Err(AsmErrorKind::BadAddress(BadAddress::Unterminated))));
    assert!(matches!(parse_address("[rax + ]"), Err(AsmErrorKind::BadAddress(BadAddress::EmptyTerm))));
    assert!(matches!(parse_address("[eax]"), Err(AsmErrorKind::BadAddress(BadAddress::RegisterNotQword))));
    assert!(matches!(parse_address("[rax*3]"), Err(AsmErrorKind::BadAddress(BadAddress::InvalidScale))));
    assert!(matches!(parse_address("[8 - rax]"), Err(AsmErrorKind::BadAddress(BadAddress::RegIllegalOp))));
    assert!(matches!(parse_address("[rax + rbx + rcx]"), Err(AsmErrorKind::BadAddress(BadAddress::TooManyRegisters))));
    assert!(matches!(parse_address("[rax + 0x80000000]"), Err(AsmErrorKind::BadAddress(BadAddress::DispOutOfRange))));
    assert!(matches!(parse_address("[rax + foo]"), Err(AsmErrorKind::BadAddress(BadAddress::UnrecognizedTerm))));
}

/// Parses a single (trimmed, non-empty) operand.
fn parse_arg(token: &str) -> Result<Arg, AsmErrorKind> {
    if token.starts_with('[') || SIZE_KEYWORDS.contains_key(&Caseless(leading_word(token))) {
        return Ok(Arg::Mem(parse_address(token)?));
    }
    if let Some(r) = GP_REGISTERS.get(&Caseless(token)) {
        return Ok(Arg::Reg(*r));
    }
    if let Some(r) = XMM_REGISTERS.get(&Caseless(token)) {
        return Ok(Arg::Xmm(*r));
    }

    // numeric label references: digits followed by `b` or `f`
    if token.len() >= 2 && token.is_char_boundary(token.len() - 1) {
        let (num, dir) = token.split_at(token.len() - 1);
        if num.bytes().all(|b| b.is_ascii_digit()) {
            let direction = match dir {
                "b" | "B" => Some(LabelRef::Backward as fn(u64) -> LabelRef),
                "f" | "F" => Some(LabelRef::Forward as fn(u64) -> LabelRef),
                _ => None,
            };
            if let Some(direction) = direction {
                return match num.parse::<u64>() {
                    Ok(n) => Ok(Arg::Label(direction(n))),
                    Err(_) => Err(AsmErrorKind::ImmOutOfRange),
                };
            }
        }
    }

    match token.chars().next() {
        Some(c) if c.is_ascii_digit() || matches!(c, '-' | '+' | '$' | '\'') => Ok(Arg::Imm(parse_imm(token)?)),
        _ if is_valid_symbol_name(token) => Ok(Arg::Label(LabelRef::Named(token.to_owned()))),
        _ => Err(AsmErrorKind::UnrecognizedOperand),
    }
}
#[test]
fn test_parse_arg() {
    assert_eq!(parse_arg("r10d").unwrap(), Arg::Reg(GpReg { id: 10, size: Size::Dword, high: false }));
    assert_eq!(parse_arg("XMM3").unwrap(), Arg::Xmm(3));
    assert_eq!(parse_arg("-0x10").unwrap(), Arg::Imm((-16i64) as u64));
    assert_eq!(parse_arg("'z'").unwrap(), Arg::Imm(122));
    assert_eq!(parse_arg("12b").unwrap(), Arg::Label(LabelRef::Backward(12)));
    assert_eq!(parse_arg("3f").unwrap(), Arg::Label(LabelRef::Forward(3)));
    assert_eq!(parse_arg("0b11").unwrap(), Arg::Imm(3));
    assert_eq!(parse_arg(".loop_top").unwrap(), Arg::Label(LabelRef::Named(".loop_top".into())));
    assert!(matches!(parse_arg("byte [rax]").unwrap(), Arg::Mem(Address { size: Some(Size::Byte), .. })));
    assert!(matches!(parse_arg("@home"), Err(AsmErrorKind::UnrecognizedOperand)));
    assert!(matches!(parse_arg("9x"), Err(AsmErrorKind::IllFormedNumericLiteral)));
}

fn expect_count(args: &[(Arg, usize)], counts: &'static [u8]) -> LineResult<()> {
    if counts.iter().any(|&c| c as usize == args.len()) { Ok(()) }
    else { Err((AsmErrorKind::ArgsExpectedCount(counts), None)) }
}

/// Merges the known sizes of a set of operands, which must all agree.
fn unify_sizes(args: &[&(Arg, usize)]) -> LineResult<Size> {
    let mut res: Option<Size> = None;
    for (arg, pos) in args {
        if let Some(s) = arg.size() {
            match res {
                None => res = Some(s),
                Some(r) if r != s => return err!(OperandsHadDifferentSizes, *pos),
                _ => (),
            }
        }
    }
    match res {
        None => err!(CouldNotDeduceOperandSize),
        Some(Size::Xword) => err!(UnsupportedOperandSize),
        Some(s) => Ok(s),
    }
}

/// Checks that an immediate is representable at the given width, either as unsigned or signed.
/// At qword width, immediates must fit in a sign extended dword unless `full_qword` is set (as for `mov reg, imm`).
fn check_imm(v: u64, size: Size, full_qword: bool, pos: usize) -> LineResult<()> {
    let ok = match size {
        Size::Qword | Size::Xword => full_qword || sign_extend(v, Size::Dword) == v,
        _ => truncate(v, size) == v || sign_extend(v, size) == v,
    };
    if ok { Ok(()) } else { err!(ImmOutOfRange, pos) }
}
fn check_imm8(v: u64, pos: usize) -> LineResult<()> {
    if v <= 0xff { Ok(()) } else { err!(ImmOutOfRange, pos) }
}

/// Converts a register or memory operand, filling in the access size of memory.
fn rm(arg: &(Arg, usize), size: Size) -> LineResult<Operand> {
    match &arg.0 {
        Arg::Reg(r) => Ok(Operand::Reg(*r)),
        Arg::Mem(a) => Ok(Operand::Mem(Address { size: Some(size), ..*a })),
        _ => err!(UnsupportedOperandTypes, arg.1),
    }
}
fn reg(arg: &(Arg, usize)) -> LineResult<GpReg> {
    match &arg.0 {
        Arg::Reg(r) => Ok(*r),
        _ => err!(UnsupportedOperandTypes, arg.1),
    }
}
/// An integer operand with a known size (a register, or memory with an explicit size).
fn sized_rm(arg: &(Arg, usize)) -> LineResult<(Operand, Size)> {
    match &arg.0 {
        Arg::Reg(_) | Arg::Mem(_) => match arg.0.size() {
            Some(Size::Xword) => err!(UnsupportedOperandSize, arg.1),
            Some(s) => Ok((rm(arg, s)?, s)),
            None => err!(CouldNotDeduceOperandSize, arg.1),
        }
        _ => err!(UnsupportedOperandTypes, arg.1),
    }
}
/// Fills in (or checks) the size of an SSE memory operand, which is implied by the instruction.
fn sse_mem(addr: &Address, size: Size, pos: usize) -> LineResult<Operand> {
    match addr.size {
        Some(s) if s != size => err!(ForcedSizeViolation, pos),
        _ => Ok(Operand::Mem(Address { size: Some(size), ..*addr })),
    }
}
/// The source of most SSE ops: an xmm register or memory of the given width.
fn xmm_or_mem(arg: &(Arg, usize), size: Size) -> LineResult<Operand> {
    match &arg.0 {
        Arg::Xmm(x) => Ok(Operand::Xmm(*x)),
        Arg::Mem(a) => sse_mem(a, size, arg.1),
        _ => err!(UnsupportedOperandTypes, arg.1),
    }
}
fn xmm(arg: &(Arg, usize)) -> LineResult<Operand> {
    match &arg.0 {
        Arg::Xmm(x) => Ok(Operand::Xmm(*x)),
        _ => err!(UnsupportedOperandTypes, arg.1),
    }
}

/// Checks the operands against the instruction's allowed forms and converts them to their final representation.
fn build(op: Op, args: Vec<(Arg, usize)>) -> LineResult<Built> {
    match op {
        Op::Nop | Op::Hlt | Op::Ret | Op::Flag(_) => {
            expect_count(&args, &[0])?;
            Ok(Built::new(vec![], Size::Qword))
        }
        Op::SignExtendAcc(size) | Op::SignExtendIntoDx(size) | Op::String(_, size, _) => {
            expect_count(&args, &[0])?;
            Ok(Built::new(vec![], size))
        }

        Op::Mov | Op::Binary(_) | Op::Xchg => {
            expect_count(&args, &[2])?;
            let (dst, src) = (&args[0], &args[1]);
            match (&dst.0, &src.0) {
                (Arg::Reg(_), Arg::Reg(_)) | (Arg::Reg(_), Arg::Mem(_)) | (Arg::Mem(_), Arg::Reg(_)) => (),
                (Arg::Reg(_), Arg::Imm(_)) | (Arg::Mem(_), Arg::Imm(_)) if op != Op::Xchg => (),
                _ => return err!(UnsupportedOperandTypes, src.1),
            }
            let size = unify_sizes(&[dst, src])?;
            let src = match src.0 {
                Arg::Imm(v) => {
                    check_imm(v, size, op == Op::Mov && matches!(dst.0, Arg::Reg(_)), src.1)?;
                    Operand::Imm(v)
                }
                _ => rm(src, size)?,
            };
            Ok(Built::new(vec![rm(dst, size)?, src], size))
        }
        Op::Movzx | Op::Movsx => {
            expect_count(&args, &[2])?;
            let dst = reg(&args[0])?;
            let (src, src_size) = sized_rm(&args[1])?;
            if dst.size == Size::Byte || !matches!(src_size, Size::Byte | Size::Word) || src_size >= dst.size {
                return err!(UnsupportedOperandSize, args[1].1);
            }
            Ok(Built::new(vec![Operand::Reg(dst), src], dst.size))
        }
        Op::Movsxd => {
            expect_count(&args, &[2])?;
            let dst = reg(&args[0])?;
            if dst.size != Size::Qword { return err!(UnsupportedOperandSize, args[0].1); }
            let src = match &args[1].0 {
                Arg::Reg(r) if r.size == Size::Dword => Operand::Reg(*r),
                Arg::Mem(a) if a.size.unwrap_or(Size::Dword) == Size::Dword => rm(&args[1], Size::Dword)?,
                Arg::Reg(_) | Arg::Mem(_) => return err!(UnsupportedOperandSize, args[1].1),
                _ => return err!(UnsupportedOperandTypes, args[1].1),
            };
            Ok(Built::new(vec![Operand::Reg(dst), src], Size::Qword))
        }
        Op::Lea => {
            expect_count(&args, &[2])?;
            let dst = reg(&args[0])?;
            if dst.size == Size::Byte { return err!(UnsupportedOperandSize, args[0].1); }
            if !matches!(args[1].0, Arg::Mem(_)) { return err!(UnsupportedOperandTypes, args[1].1); }
            Ok(Built::new(vec![Operand::Reg(dst), rm(&args[1], dst.size)?], dst.size))
        }
        Op::Push | Op::Pop => {
            expect_count(&args, &[1])?;
            let arg = &args[0];
            let operand = match &arg.0 {
                Arg::Imm(v) if op == Op::Push => {
                    check_imm(*v, Size::Qword, false, arg.1)?;
                    Operand::Imm(*v)
                }
                Arg::Reg(_) | Arg::Mem(_) => match arg.0.size() {
                    None | Some(Size::Qword) => rm(arg, Size::Qword)?,
                    Some(_) => return err!(UnsupportedOperandSize, arg.1),
                }
                _ => return err!(UnsupportedOperandTypes, arg.1),
            };
            Ok(Built::new(vec![operand], Size::Qword))
        }

        Op::Unary(_) | Op::Mul | Op::Div | Op::Idiv => {
            expect_count(&args, &[1])?;
            let (operand, size) = sized_rm(&args[0])?;
            Ok(Built::new(vec![operand], size))
        }
        Op::Imul => {
            expect_count(&args, &[1, 2, 3])?;
            if args.len() == 1 {
                let (operand, size) = sized_rm(&args[0])?;
                return Ok(Built::new(vec![operand], size));
            }
            let dst = reg(&args[0])?;
            if dst.size == Size::Byte { return err!(UnsupportedOperandSize, args[0].1); }
            let size = dst.size;
            let mut operands = vec![Operand::Reg(dst)];
            for (i, arg) in args.iter().enumerate().skip(1) {
                let last = i == args.len() - 1;
                match &arg.0 {
                    Arg::Imm(v) if last => {
                        check_imm(*v, size, false, arg.1)?;
                        operands.push(Operand::Imm(*v));
                    }
                    Arg::Reg(_) | Arg::Mem(_) if i == 1 => {
                        if arg.0.size().map_or(false, |s| s != size) { return err!(OperandsHadDifferentSizes, arg.1); }
                        operands.push(rm(arg, size)?);
                    }
                    _ => return err!(UnsupportedOperandTypes, arg.1),
                }
            }
            Ok(Built::new(operands, size))
        }
        Op::Shift(_) => {
            expect_count(&args, &[1, 2])?;
            let (dst, size) = sized_rm(&args[0])?;
            let count = match args.get(1) {
                None => Operand::Imm(1),
                Some((Arg::Imm(v), pos)) => {
                    check_imm8(*v, *pos)?;
                    Operand::Imm(*v)
                }
                Some((Arg::Reg(r), _)) if *r == GpReg { id: 2, size: Size::Byte, high: false } => Operand::Reg(*r),
                Some((_, pos)) => return err!(UnsupportedOperandTypes, *pos),
            };
            Ok(Built::new(vec![dst, count], size))
        }
        Op::BitTest(_) => {
            expect_count(&args, &[2])?;
            let (dst, src) = (&args[0], &args[1]);
            if !matches!(dst.0, Arg::Reg(_) | Arg::Mem(_)) { return err!(UnsupportedOperandTypes, dst.1); }
            let size = unify_sizes(&[dst, src])?;
            if size == Size::Byte { return err!(UnsupportedOperandSize, dst.1); }
            let src = match &src.0 {
                Arg::Reg(r) => Operand::Reg(*r),
                Arg::Imm(v) => {
                    check_imm8(*v, src.1)?;
                    Operand::Imm(*v)
                }
                _ => return err!(UnsupportedOperandTypes, src.1),
            };
            Ok(Built::new(vec![rm(dst, size)?, src], size))
        }
        Op::Popcnt | Op::Blsr | Op::Cmovcc(_) => {
            expect_count(&args, &[2])?;
            let dst = reg(&args[0])?;
            if !matches!(args[1].0, Arg::Reg(_) | Arg::Mem(_)) { return err!(UnsupportedOperandTypes, args[1].1); }
            let size = unify_sizes(&[&args[0], &args[1]])?;
            let ok = match op {
                Op::Blsr => matches!(size, Size::Dword | Size::Qword),
                _ => size != Size::Byte,
            };
            if !ok { return err!(UnsupportedOperandSize, args[0].1); }
            Ok(Built::new(vec![Operand::Reg(dst), rm(&args[1], size)?], size))
        }
        Op::Bextr => {
            expect_count(&args, &[3])?;
            let dst = reg(&args[0])?;
            let ctrl = reg(&args[2])?;
            if !matches!(args[1].0, Arg::Reg(_) | Arg::Mem(_)) { return err!(UnsupportedOperandTypes, args[1].1); }
            let size = unify_sizes(&[&args[0], &args[1], &args[2]])?;
            if !matches!(size, Size::Dword | Size::Qword) { return err!(UnsupportedOperandSize, args[0].1); }
            Ok(Built::new(vec![Operand::Reg(dst), rm(&args[1], size)?, Operand::Reg(ctrl)], size))
        }
        Op::Setcc(_) => {
            expect_count(&args, &[1])?;
            match args[0].0.size() {
                None | Some(Size::Byte) => (),
                Some(_) => return err!(UnsupportedOperandSize, args[0].1),
            }
            Ok(Built::new(vec![rm(&args[0], Size::Byte)?], Size::Byte))
        }

        Op::Jmp | Op::Jcc(_) | Op::Jrcxz(_) | Op::Loop(_) | Op::Call => {
            expect_count(&args, &[1])?;
            match &args[0] {
                (Arg::Label(label), pos) => Ok(Built {
                    operands: vec![Operand::Target(0)],
                    size: match op { Op::Jrcxz(s) => s, _ => Size::Qword },
                    labels: vec![(0, label.clone(), *pos)],
                }),
                (_, pos) => err!(ExpectedLabel, *pos),
            }
        }

        Op::Sse(sse) => build_sse(sse, args),
    }
}

fn build_sse(op: SseOp, args: Vec<(Arg, usize)>) -> LineResult<Built> {
    match op {
        SseOp::MovScalar(p) => {
            expect_count(&args, &[2])?;
            let size = p.size();
            let operands = match (&args[0].0, &args[1].0) {
                (Arg::Xmm(_), _) => vec![xmm(&args[0])?, xmm_or_mem(&args[1], size)?],
                (Arg::Mem(a), Arg::Xmm(_)) => vec![sse_mem(a, size, args[0].1)?, xmm(&args[1])?],
                _ => return err!(UnsupportedOperandTypes, args[0].1),
            };
            Ok(Built::new(operands, size))
        }
        SseOp::MovPacked { .. } => {
            expect_count(&args, &[2])?;
            let operands = match (&args[0].0, &args[1].0) {
                (Arg::Xmm(_), _) => vec![xmm(&args[0])?, xmm_or_mem(&args[1], Size::Xword)?],
                (Arg::Mem(a), Arg::Xmm(_)) => vec![sse_mem(a, Size::Xword, args[0].1)?, xmm(&args[1])?],
                _ => return err!(UnsupportedOperandTypes, args[0].1),
            };
            Ok(Built::new(operands, Size::Xword))
        }
        SseOp::MovD | SseOp::MovQ => {
            expect_count(&args, &[2])?;
            let size = if op == SseOp::MovD { Size::Dword } else { Size::Qword };
            let int_side = |arg: &(Arg, usize)| -> LineResult<Operand> {
                match &arg.0 {
                    Arg::Reg(r) if r.size == size && !r.high => Ok(Operand::Reg(*r)),
                    Arg::Reg(_) => err!(UnsupportedOperandSize, arg.1),
                    Arg::Mem(a) => sse_mem(a, size, arg.1),
                    _ => err!(UnsupportedOperandTypes, arg.1),
                }
            };
            let operands = match (&args[0].0, &args[1].0) {
                (Arg::Xmm(a), Arg::Xmm(b)) if op == SseOp::MovQ => vec![Operand::Xmm(*a), Operand::Xmm(*b)],
                (Arg::Xmm(a), _) => vec![Operand::Xmm(*a), int_side(&args[1])?],
                (_, Arg::Xmm(b)) => vec![int_side(&args[0])?, Operand::Xmm(*b)],
                _ => return err!(UnsupportedOperandTypes, args[0].1),
            };
            Ok(Built::new(operands, size))
        }
        SseOp::Arith(_, p, lanes) => {
            expect_count(&args, &[2])?;
            let src_size = if lanes == Lanes::Scalar { p.size() } else { Size::Xword };
            Ok(Built::new(vec![xmm(&args[0])?, xmm_or_mem(&args[1], src_size)?], p.size()))
        }
        SseOp::Logic(_) => {
            expect_count(&args, &[2])?;
            Ok(Built::new(vec![xmm(&args[0])?, xmm_or_mem(&args[1], Size::Xword)?], Size::Xword))
        }
        SseOp::Shufps => {
            expect_count(&args, &[3])?;
            let imm = match args[2] {
                (Arg::Imm(v), pos) => {
                    check_imm8(v, pos)?;
                    Operand::Imm(v)
                }
                (_, pos) => return err!(UnsupportedOperandTypes, pos),
            };
            Ok(Built::new(vec![xmm(&args[0])?, xmm_or_mem(&args[1], Size::Xword)?, imm], Size::Dword))
        }
        SseOp::Comi(p) => {
            expect_count(&args, &[2])?;
            Ok(Built::new(vec![xmm(&args[0])?, xmm_or_mem(&args[1], p.size())?], p.size()))
        }
        SseOp::Cvt(conv) => {
            expect_count(&args, &[2])?;
            match conv {
                // size is the width of the integer source
                Conversion::IntToSingle | Conversion::IntToDouble => {
                    let dst = xmm(&args[0])?;
                    let (src, size) = sized_rm(&args[1])?;
                    if !matches!(size, Size::Dword | Size::Qword) { return err!(UnsupportedOperandSize, args[1].1); }
                    Ok(Built::new(vec![dst, src], size))
                }
                // size is the width of the integer destination
                Conversion::SingleToInt | Conversion::DoubleToInt => {
                    let dst = reg(&args[0])?;
                    if !matches!(dst.size, Size::Dword | Size::Qword) { return err!(UnsupportedOperandSize, args[0].1); }
                    let lane = if conv == Conversion::SingleToInt { Size::Dword } else { Size::Qword };
                    Ok(Built::new(vec![Operand::Reg(dst), xmm_or_mem(&args[1], lane)?], dst.size))
                }
                // size is the width of the destination lane
                Conversion::SingleToDouble => Ok(Built::new(vec![xmm(&args[0])?, xmm_or_mem(&args[1], Size::Dword)?], Size::Qword)),
                Conversion::DoubleToSingle => Ok(Built::new(vec![xmm(&args[0])?, xmm_or_mem(&args[1], Size::Qword)?], Size::Dword)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(src: &str) -> LineResult<Instruction> {
        let mut args = AssembleArgs::default();
        args.line_num = 1;
        args.process_line_inner(src)?;
        Ok(args.instructions.pop().expect("no instruction produced"))
    }
    fn line_err(src: &str) -> AsmErrorKind {
        match line(src) {
            Ok(i) => panic!("`{}` should have failed but gave {:?}", src, i),
            Err((kind, _)) => kind,
        }
    }

    #[test]
    fn prefixes() {
        assert_eq!(line("rep stosb").unwrap().op, Op::String(StringOp::Stos, Size::Byte, Some(Prefix::Rep)));
        assert_eq!(line("repne scasb").unwrap().op, Op::String(StringOp::Scas, Size::Byte, Some(Prefix::Repne)));
        assert_eq!(line("REPZ cmpsq").unwrap().op, Op::String(StringOp::Cmps, Size::Qword, Some(Prefix::Repe)));
        assert_eq!(line("rep cmpsb").unwrap().op, Op::String(StringOp::Cmps, Size::Byte, Some(Prefix::Repe)));
        assert!(matches!(line_err("rep add rax, rbx"), AsmErrorKind::InvalidPrefixForThisInstruction));
        assert!(matches!(line_err("repne movsb"), AsmErrorKind::InvalidPrefixForThisInstruction));
        assert!(matches!(line_err("rep"), AsmErrorKind::PrefixWithoutInstruction));
    }

    #[test]
    fn operand_counts_and_types() {
        assert!(matches!(line_err("ret 4"), AsmErrorKind::ArgsExpectedCount(&[0])));
        assert!(matches!(line_err("mov rax"), AsmErrorKind::ArgsExpectedCount(&[2])));
        assert!(matches!(line_err("mov rax,"), AsmErrorKind::ExpectedOperand));
        assert!(matches!(line_err("mov [rax], [rbx]"), AsmErrorKind::UnsupportedOperandTypes));
        assert!(matches!(line_err("mov 5, rax"), AsmErrorKind::UnsupportedOperandTypes));
        assert!(matches!(line_err("xchg rax, 5"), AsmErrorKind::UnsupportedOperandTypes));
        assert!(matches!(line_err("jmp rax"), AsmErrorKind::ExpectedLabel));
        assert!(matches!(line_err("frobnicate rax"), AsmErrorKind::UnrecognizedInstruction));
        assert!(matches!(line_err("shl rax, rbx"), AsmErrorKind::UnsupportedOperandTypes));
        assert!(matches!(line_err("addps xmm0, rax"), AsmErrorKind::UnsupportedOperandTypes));
    }

    #[test]
    fn operand_sizes() {
        assert!(matches!(line_err("mov eax, rbx"), AsmErrorKind::OperandsHadDifferentSizes));
        assert!(matches!(line_err("inc [rax]"), AsmErrorKind::CouldNotDeduceOperandSize));
        assert!(matches!(line_err("mov [rax], 1"), AsmErrorKind::CouldNotDeduceOperandSize));
        assert!(matches!(line_err("movzx eax, [rdi]"), AsmErrorKind::CouldNotDeduceOperandSize));
        assert!(matches!(line_err("movzx ax, word [rdi]"), AsmErrorKind::UnsupportedOperandSize));
        assert!(matches!(line_err("sete eax"), AsmErrorKind::UnsupportedOperandSize));
        assert!(matches!(line_err("push eax"), AsmErrorKind::UnsupportedOperandSize));
        assert!(matches!(line_err("movss xmm0, qword [rax]"), AsmErrorKind::ForcedSizeViolation));

        let i = line("add dword [rbp - 4], 7").unwrap();
        assert_eq!(i.size, Size::Dword);
        let i = line("sete [rdi]").unwrap();
        assert_eq!(i.operands[0], Operand::Mem(Address { base: Some(5), index: None, disp: 0, size: Some(Size::Byte) }));
        let i = line("movss xmm1, [rsi + 4]").unwrap();
        assert_eq!(i.size, Size::Dword);
        assert_eq!(i.operands[1], Operand::Mem(Address { base: Some(4), index: None, disp: 4, size: Some(Size::Dword) }));
        let i = line("cvtsi2sd xmm0, qword [rdi]").unwrap();
        assert_eq!(i.size, Size::Qword);
    }

    #[test]
    fn immediate_ranges() {
        assert_eq!(line("mov rax, 0x123456789abcdef0").unwrap().operands[1], Operand::Imm(0x123456789abcdef0));
        assert_eq!(line("mov al, 255").unwrap().operands[1], Operand::Imm(255));
        assert_eq!(line("mov al, -128").unwrap().operands[1], Operand::Imm((-128i64) as u64));
        assert!(matches!(line_err("mov al, 256"), AsmErrorKind::ImmOutOfRange));
        assert!(matches!(line_err("add rax, 0x80000000"), AsmErrorKind::ImmOutOfRange));
        assert!(matches!(line_err("mov qword [rax], 0x100000000"), AsmErrorKind::ImmOutOfRange));
        assert!(matches!(line_err("shl rax, 256"), AsmErrorKind::ImmOutOfRange));
        assert_eq!(line("add rax, -1").unwrap().operands[1], Operand::Imm(!0));
    }

    #[test]
    fn shifts_take_an_implicit_count() {
        let i = line("sar rdx").unwrap();
        assert_eq!(i.operands[1], Operand::Imm(1));
        let i = line("rol word [rax], cl").unwrap();
        assert_eq!(i.size, Size::Word);
        assert_eq!(i.operands[1], Operand::Reg(GpReg { id: 2, size: Size::Byte, high: false }));
    }

    #[test]
    fn label_definitions() {
        let mut args = AssembleArgs::default();
        args.line_num = 1;
        assert!(args.process_line("a: b: nop").is_ok());
        assert_eq!(args.labels.get("a"), Some(&0));
        assert_eq!(args.labels.get("b"), Some(&0));
        assert!(matches!(args.process_line("a: ret").unwrap_err().kind, AsmErrorKind::DuplicateLabel));
        assert!(matches!(args.process_line("rax: ret").unwrap_err().kind, AsmErrorKind::ReservedSymbolName));
        assert!(matches!(args.process_line("9lives: ret").unwrap_err().kind, AsmErrorKind::InvalidSymbolName));
        assert!(args.process_line("cmp al, ':'").is_ok());
        assert!(args.process_line("entry b").is_ok());
        assert!(matches!(args.process_line("entry a").unwrap_err().kind, AsmErrorKind::EntryAlreadyDefined));

        args.line_num = 2;
        assert!(args.process_line("jmp nowhere").is_ok());
        let e = args.finish().unwrap_err();
        assert!(matches!(&e.kind, AsmErrorKind::UnresolvedLabel(name) if name == "nowhere"));
        assert_eq!(e.line_num, 2);
        assert_eq!(e.pos, Some(4));
    }
}
