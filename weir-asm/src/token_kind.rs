use core::fmt;

/// Kind of a JSON token as seen by the VM's `TT` register.
///
/// The discriminants index the per-token-kind slots of a compiled type
/// switch, so their values are fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum TokenKind {
    /// `{`
    ObjectBegin = 0,
    /// `}`
    ObjectEnd = 1,
    /// `[`
    ArrayBegin = 2,
    /// `]`
    ArrayEnd = 3,
    /// A string value or object key.
    String = 4,
    /// A number.
    Number = 5,
    /// `true`
    True = 6,
    /// `false`
    False = 7,
    /// `null`
    Null = 8,
    /// No token; the stream is exhausted.
    None = 9,
}

/// Number of token kinds that can begin or end a value. `TokenKind::None`
/// never appears in a compiled switch.
pub(crate) const SWITCH_KINDS: usize = 9;

impl TokenKind {
    /// All kinds dispatchable by a compiled type switch, in slot order.
    pub const SWITCH: [TokenKind; SWITCH_KINDS] = [
        TokenKind::ObjectBegin,
        TokenKind::ObjectEnd,
        TokenKind::ArrayBegin,
        TokenKind::ArrayEnd,
        TokenKind::String,
        TokenKind::Number,
        TokenKind::True,
        TokenKind::False,
        TokenKind::Null,
    ];

    /// Whether the token is a complete scalar value.
    pub const fn is_scalar(&self) -> bool {
        matches!(
            self,
            TokenKind::String
                | TokenKind::Number
                | TokenKind::True
                | TokenKind::False
                | TokenKind::Null
        )
    }

    /// Whether the token opens a container.
    pub const fn is_open(&self) -> bool {
        matches!(self, TokenKind::ObjectBegin | TokenKind::ArrayBegin)
    }

    /// Whether the token closes a container.
    pub const fn is_close(&self) -> bool {
        matches!(self, TokenKind::ObjectEnd | TokenKind::ArrayEnd)
    }
}

impl From<TokenKind> for u8 {
    fn from(kind: TokenKind) -> u8 {
        kind as u8
    }
}

impl TryFrom<u8> for TokenKind {
    type Error = ();

    fn try_from(b: u8) -> Result<Self, Self::Error> {
        use TokenKind::*;
        match b {
            0 => Ok(ObjectBegin),
            1 => Ok(ObjectEnd),
            2 => Ok(ArrayBegin),
            3 => Ok(ArrayEnd),
            4 => Ok(String),
            5 => Ok(Number),
            6 => Ok(True),
            7 => Ok(False),
            8 => Ok(Null),
            9 => Ok(None),
            _ => Err(()),
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}
