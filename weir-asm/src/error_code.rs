use core::fmt;

/// Validation error code representation for the VM.
///
/// The numeric values are part of the wire contract: a non-zero `RETURN`
/// operand is one of these codes, and hosts may persist or compare them
/// across versions. Code `0` is the valid return and is never wrapped in
/// an `ErrorCode` by a well-formed program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
#[non_exhaustive]
pub enum ErrorCode {
    /// The byte can't be mapped to any known `ErrorCode`.
    Unknown = 0x00,
    /// A token of an unexpected kind was encountered.
    UnexpectedToken = 0x01,
    /// The number is not integer-valued.
    NotInteger = 0x02,
    /// The number violates a range or divisibility constraint.
    Number = 0x03,
    /// The object has fewer properties than the schema requires.
    TooFewProps = 0x04,
    /// The object has more properties than the schema allows.
    TooManyProps = 0x05,
    /// A required or dependency-required property is missing.
    MissingRequired = 0x06,
    /// The condition over a split's accepting sub-validators failed.
    SplitCondition = 0x07,
    /// A property name is not allowed by the schema.
    BadPropertyName = 0x08,
    /// The DFA reported a case index with no compiled handler.
    MatchCase = 0x09,
    /// A string or array is shorter than the schema requires.
    LengthTooShort = 0x0a,
    /// A string or array is longer than the schema allows.
    LengthTooLong = 0x0b,
    /// A pattern could not be compiled to a DFA.
    BadRegexp = 0x0c,
    /// A string token is malformed or fails a pattern constraint.
    InvalidString = 0x0d,
    /// The input ended before validation finished.
    Closed = 0x0e,
    /// An object key exceeds the tokenizer's key buffer capacity.
    KeyTooLong = 0x0f,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ErrorCode {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

impl From<u8> for ErrorCode {
    /// Converts the `u8` into an `ErrorCode`.
    fn from(b: u8) -> Self {
        use ErrorCode::*;
        match b {
            0x01 => UnexpectedToken,
            0x02 => NotInteger,
            0x03 => Number,
            0x04 => TooFewProps,
            0x05 => TooManyProps,
            0x06 => MissingRequired,
            0x07 => SplitCondition,
            0x08 => BadPropertyName,
            0x09 => MatchCase,
            0x0a => LengthTooShort,
            0x0b => LengthTooLong,
            0x0c => BadRegexp,
            0x0d => InvalidString,
            0x0e => Closed,
            0x0f => KeyTooLong,
            _ => Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn u8_error_code_round_trip() {
        let last_known_code: u8 = ErrorCode::iter().last().unwrap() as u8 + 1;
        let code = ErrorCode::from(0);
        assert_eq!(code, ErrorCode::Unknown);

        for i in 1..last_known_code {
            let code = ErrorCode::from(i);
            let i2 = code as u8;
            assert_eq!(i, i2);
        }

        for i in last_known_code..=255 {
            let code = ErrorCode::from(i);
            let i2 = code as u8;
            assert_eq!(ErrorCode::Unknown as u8, i2);
        }
    }
}
