//! Interned ids of the special-form keywords.
//!
//! Built once per table at startup and read-only afterwards. The analyzer
//! compares head symbols against these ids instead of comparing strings.

use crate::strings::{IntStr, SharedStringTable, StringTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    Quote,
    Lambda,
    If,
    Set,
    CallCc,
    Define,
    Begin,
    DefineSyntax,
    Ellipsis,
    Underscore,
    PInvoke,
}

impl Keyword {
    pub const ALL: [Keyword; 11] = [
        Keyword::Quote,
        Keyword::Lambda,
        Keyword::If,
        Keyword::Set,
        Keyword::CallCc,
        Keyword::Define,
        Keyword::Begin,
        Keyword::DefineSyntax,
        Keyword::Ellipsis,
        Keyword::Underscore,
        Keyword::PInvoke,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Keyword::Quote => "quote",
            Keyword::Lambda => "lambda",
            Keyword::If => "if",
            Keyword::Set => "set!",
            Keyword::CallCc => "call/cc",
            Keyword::Define => "define",
            Keyword::Begin => "begin",
            Keyword::DefineSyntax => "define-syntax",
            Keyword::Ellipsis => "...",
            Keyword::Underscore => "_",
            Keyword::PInvoke => "p/invoke",
        }
    }

    /// Keywords that head a special form. `...` and `_` only appear inside
    /// syntax patterns.
    pub fn is_special_form(self) -> bool {
        !matches!(self, Keyword::Ellipsis | Keyword::Underscore)
    }
}

/// Keyword ids for one string table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keywords {
    ids: [IntStr; 11],
}

impl Keywords {
    pub fn new(table: &mut StringTable) -> Self {
        Self {
            ids: Keyword::ALL.map(|kw| table.intern(kw.as_str())),
        }
    }

    pub fn from_shared(table: &SharedStringTable) -> Self {
        table.with(Self::new)
    }

    pub fn id(&self, kw: Keyword) -> IntStr {
        self.ids[kw as usize]
    }

    /// Map an id back to its keyword, if it is one.
    pub fn classify(&self, id: IntStr) -> Option<Keyword> {
        self.ids
            .iter()
            .position(|&k| k == id)
            .map(|i| Keyword::ALL[i])
    }

    pub fn is_keyword(&self, id: IntStr) -> bool {
        self.classify(id).is_some()
    }
}
