use std::cmp::Ordering;
use std::fmt;

/// An ASCII-case-insensitive wrapper for strings, used as the key type of the assembler's lookup tables.
#[derive(Clone, Copy, Debug)]
pub struct Caseless<'a>(pub &'a str);

impl Caseless<'_> {
    fn folded(&self) -> impl Iterator<Item = u8> + '_ {
        self.0.bytes().map(|b| b.to_ascii_uppercase())
    }
}

impl PartialEq for Caseless<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(other.0)
    }
}
impl Eq for Caseless<'_> {}

impl Ord for Caseless<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.folded().cmp(other.folded())
    }
}
impl PartialOrd for Caseless<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Caseless<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.0)
    }
}

#[test]
fn test_caseless() {
    use std::collections::BTreeMap;

    assert_eq!(Caseless("rax"), Caseless("RAX"));
    assert_eq!(Caseless("CmovG"), Caseless("cmovg"));
    assert_ne!(Caseless("mov"), Caseless("movs"));

    assert!(Caseless("add") < Caseless("ADDPS"));
    assert!(Caseless("JMP") > Caseless("jb"));
    assert!(Caseless("r8") < Caseless("R8D"));
    assert_eq!(Caseless("xmm0").cmp(&Caseless("XMM0")), Ordering::Equal);

    let mut m = BTreeMap::new();
    m.insert(Caseless("SCASB"), 1);
    assert_eq!(m.get(&Caseless("scasb")), Some(&1));
    assert_eq!(m.get(&Caseless("scasw")), None);
    assert!(m.insert(Caseless("ScAsB"), 2).is_some());
}
