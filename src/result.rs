use thiserror::Error;

pub type Result<A, E = Error> = std::result::Result<A, E>;

/// Codec failure: the kind of error, the dotted field path inside the
/// descriptor tree, and the bit offset at which the operation stopped.
#[derive(Debug, Error)]
#[error("{kind} at `{path}` (bit {bit_offset})")]
pub struct Error {
    kind: ErrorKind,
    path: String,
    bit_offset: usize,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind, bit_offset: usize) -> Self {
        Error {
            kind,
            path: String::new(),
            bit_offset,
        }
    }

    /// Prefix a path segment; the innermost segment is attached first.
    pub(crate) fn in_field(mut self, segment: &str) -> Self {
        if self.path.is_empty() {
            self.path = segment.to_owned();
        } else {
            self.path = format!("{segment}.{}", self.path);
        }
        self
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn bit_offset(&self) -> usize {
        self.bit_offset
    }
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("not enough bits left for alignment padding")]
    AlignmentFailed,
    #[error("value outside root and extension constraints")]
    ConstraintViolation,
    #[error("undeclared enumerated value: {0}")]
    EnumValueUnknown(i32),
    #[error("unknown enumeration extension index {0} and no default configured")]
    EnumValueUnknownNoDefault(usize),
    #[error("length determinant exceeds the supported limit")]
    LengthLimitExceeded,
    #[error("malformed fragment header: {0}")]
    FragmentationInvalid(&'static str),
    #[error("choice index {0} does not select a known alternative")]
    InvalidChoiceIndex(usize),
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
    #[error("allocator failed to provide {0} bytes")]
    AllocatorFailure(usize),
    #[error("value does not match the field type: expected {0}")]
    TypeMismatch(&'static str),
}
