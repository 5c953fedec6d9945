//! Pyrope keyword table
//!
//! A fixed string -> token-id mapping consumed by the Pyrope scanner to
//! classify identifiers. Built once, immutable afterwards. Token ids start
//! at 128, past the single-character token space.

use std::collections::HashMap;

/// Scanner token id
pub type TokenId = u16;

// control
pub const KW_IF: TokenId = 128;
pub const KW_ELSE: TokenId = 129;
pub const KW_FOR: TokenId = 130;
pub const KW_WHILE: TokenId = 131;
pub const KW_ELIF: TokenId = 132;
pub const KW_RETURN: TokenId = 133;
pub const KW_UNIQUE: TokenId = 134;
pub const KW_WHEN: TokenId = 135;
// type
pub const KW_AS: TokenId = 136;
pub const KW_IS: TokenId = 137;
// debug
pub const KW_I: TokenId = 138;
pub const KW_N: TokenId = 139;
pub const KW_YIELD: TokenId = 140;
pub const KW_WAITFOR: TokenId = 141;
// logic
pub const KW_AND: TokenId = 142;
pub const KW_OR: TokenId = 143;
pub const KW_NOT: TokenId = 144;
// range; intersect and union are source-level synonyms sharing one id
pub const KW_INTERSECT: TokenId = 145;
pub const KW_UNION: TokenId = 145;
pub const KW_UNTIL: TokenId = 146;
pub const KW_IN: TokenId = 147;
pub const KW_BY: TokenId = 148;

/// Read-only keyword classification table
#[derive(Debug, Clone)]
pub struct KeywordTable {
    map: HashMap<&'static str, TokenId>,
}

impl KeywordTable {
    pub fn new() -> Self {
        let mut map = HashMap::new();

        map.insert("if", KW_IF);
        map.insert("else", KW_ELSE);
        map.insert("for", KW_FOR);
        map.insert("while", KW_WHILE);
        map.insert("elif", KW_ELIF);
        map.insert("return", KW_RETURN);
        map.insert("unique", KW_UNIQUE);
        map.insert("when", KW_WHEN);

        map.insert("as", KW_AS);
        map.insert("is", KW_IS);

        map.insert("and", KW_AND);
        map.insert("or", KW_OR);
        map.insert("not", KW_NOT);

        map.insert("I", KW_I);
        map.insert("N", KW_N);
        map.insert("yield", KW_YIELD);
        map.insert("waitfor", KW_WAITFOR);

        map.insert("intersect", KW_INTERSECT);
        map.insert("union", KW_UNION);
        map.insert("until", KW_UNTIL);
        map.insert("in", KW_IN);
        map.insert("by", KW_BY);

        Self { map }
    }

    /// Token id for `ident`, if it is a reserved word
    pub fn token_id(&self, ident: &str) -> Option<TokenId> {
        self.map.get(ident).copied()
    }

    pub fn is_keyword(&self, ident: &str) -> bool {
        self.map.contains_key(ident)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// All (keyword, id) pairs, unordered
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, TokenId)> + '_ {
        self.map.iter().map(|(&k, &v)| (k, v))
    }
}

impl Default for KeywordTable {
    fn default() -> Self {
        Self::new()
    }
}
