//! Error kinds shared by the encoders and the segmented buffer.

use crate::label::Label;

/// Everything that can go wrong while encoding or linking.
///
/// Encoder methods fail synchronously at the call site; linkage failures
/// surface from [`SegmentedBuffer::link`](crate::buffer::SegmentedBuffer::link),
/// either directly or through the optional error handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Wrong number, size, or addressing mode of operands.
    #[error("{mnemonic}: {reason}")]
    OperandShape {
        mnemonic: &'static str,
        reason: &'static str,
    },

    /// REX/high-byte or zero/stack register misuse.
    #[error("{mnemonic}: {reason}")]
    RegisterIncompatibility {
        mnemonic: &'static str,
        reason: &'static str,
    },

    /// A signed/unsigned fit or alignment check failed: unencodable bitmask
    /// immediate, PC-relative overflow, unaligned branch target, bad shift.
    #[error("{context}: value {value:#x} is not encodable")]
    ImmediateOutOfRange { context: &'static str, value: i64 },

    /// The label was already bound in this buffer.
    #[error("label '{0}' is already defined")]
    LabelRedefinition(Label),

    /// A linkage referenced a label that was never bound.
    #[error("undefined label '{0}' used")]
    LabelUndefined(Label),

    /// An emit was attempted after `align()` sealed the buffer.
    #[error("buffer is sealed, no writes are allowed after align()")]
    SealViolation,
}

impl Error {
    pub(crate) fn shape(mnemonic: &'static str, reason: &'static str) -> Self {
        Error::OperandShape { mnemonic, reason }
    }

    pub(crate) fn register(mnemonic: &'static str, reason: &'static str) -> Self {
        Error::RegisterIncompatibility { mnemonic, reason }
    }

    pub(crate) fn range(context: &'static str, value: i64) -> Self {
        Error::ImmediateOutOfRange { context, value }
    }
}
