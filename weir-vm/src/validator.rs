//! Top-level validator state machine.
//!
//! A [`Validator`] couples one VM with one token stream and exposes the
//! streaming contract: feed bytes with [`Validator::more`] until it
//! reports something other than [`Outcome::More`], then (or at end of
//! input) call [`Validator::close`]. Once finished, the verdict is
//! stable: further calls return it unchanged.

use weir_asm::{ErrorCode, Program};

use crate::token::{Next, StreamError, TokenStream};
use crate::vm::{Advance, Vm};

/// Result of feeding input to a validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The document satisfies the schema.
    Valid,
    /// The document violates the schema (or is not well-formed JSON).
    Invalid(ErrorCode),
    /// More input is needed.
    More,
}

/// Observable state of a validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// No input has been fed yet.
    AwaitInput,
    /// The VM is executing.
    Running,
    /// The VM is parked on a `TOKEN` instruction awaiting input.
    SuspendedForMoreInput,
    /// Validation finished; the outcome is final (never `More`).
    Finished(Outcome),
}

/// A streaming validator for one document.
#[derive(Debug, Clone)]
pub struct Validator<'p> {
    vm: Vm<'p>,
    stream: TokenStream,
    state: State,
}

impl<'p> Validator<'p> {
    /// A fresh validator over a compiled program.
    pub fn new(prog: &'p Program) -> Self {
        Validator {
            vm: Vm::new(prog),
            stream: TokenStream::new(),
            state: State::AwaitInput,
        }
    }

    /// Current state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Feed a chunk of the document.
    pub fn more(&mut self, bytes: &[u8]) -> Outcome {
        if let State::Finished(outcome) = self.state {
            return outcome;
        }

        self.stream.feed(bytes);
        self.state = State::Running;
        self.pump()
    }

    /// Signal the end of input.
    ///
    /// Closing appends one whitespace byte to the stream so a number
    /// ending exactly at the input boundary tokenizes, then drives the
    /// VM to its verdict. A validator still waiting on input after that
    /// is `Invalid(Closed)`.
    pub fn close(&mut self) -> Outcome {
        if let State::Finished(outcome) = self.state {
            return outcome;
        }

        self.stream.close();
        self.state = State::Running;
        match self.pump() {
            Outcome::More => self.finish(Outcome::Invalid(ErrorCode::Closed)),
            outcome => outcome,
        }
    }

    fn pump(&mut self) -> Outcome {
        loop {
            match self.vm.advance() {
                Advance::Done(0) => return self.finish(Outcome::Valid),
                Advance::Done(code) => {
                    return self.finish(Outcome::Invalid(ErrorCode::from(code)))
                }

                Advance::NeedToken => match self.stream.next() {
                    Next::Token(token) => self.vm.give(token),
                    Next::More => {
                        self.state = State::SuspendedForMoreInput;
                        return Outcome::More;
                    }
                    Next::End => return self.finish(Outcome::Invalid(ErrorCode::Closed)),
                    Next::Error(e) => {
                        let code = match e {
                            StreamError::Syntax => ErrorCode::UnexpectedToken,
                            StreamError::InvalidString => ErrorCode::InvalidString,
                            StreamError::KeyTooLong => ErrorCode::KeyTooLong,
                        };
                        return self.finish(Outcome::Invalid(code));
                    }
                },
            }
        }
    }

    fn finish(&mut self, outcome: Outcome) -> Outcome {
        tracing::debug!(?outcome, "validation finished");
        self.state = State::Finished(outcome);
        outcome
    }
}

/// Validate a complete document in one call.
pub fn validate(prog: &Program, input: &[u8]) -> Result<(), ErrorCode> {
    let mut v = Validator::new(prog);

    let outcome = match v.more(input) {
        Outcome::More => v.close(),
        outcome => outcome,
    };

    match outcome {
        Outcome::Valid => Ok(()),
        Outcome::Invalid(code) => Err(code),
        Outcome::More => Err(ErrorCode::Closed),
    }
}
