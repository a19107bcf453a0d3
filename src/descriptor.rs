use std::sync::Arc;

use derive_getters::Getters;

use crate::bitbuf::BitBuffer;
use crate::bitstream::BitStream;
use crate::mem::Arena;
use crate::number::{bit_len64, octet_len_u64};
use crate::result::Result;
use crate::value::Value;

/// Count-constraint upper bound meaning "no upper bound".
pub const SIZE_UNBOUNDED: usize = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    Enum,
    Null,
    OptNull,
    OctetString,
    BitString,
    Sequence,
    Choice,
    UntaggedChoice,
    Opaque,
    Skip,
    OpenType,
    ExtValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldMode {
    Mandatory,
    Optional,
    SeqOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    Sequence,
    Choice,
    Set,
}

/// Root and extension ranges of an INTEGER field. Bounds are stored as raw
/// 64-bit patterns; the owning field's type decides whether they read as
/// signed or unsigned.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntConstraint {
    pub(crate) min: Option<i64>,
    pub(crate) max: Option<i64>,
    pub(crate) span: u64,
    pub(crate) span_bit_len: usize,
    pub(crate) span_octet_bit_len: usize,
    pub(crate) ext_min: Option<i64>,
    pub(crate) ext_max: Option<i64>,
    pub(crate) extended: bool,
}

impl IntConstraint {
    /// No constraint at all: two's-complement encoding.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn signed(min: i64, max: i64) -> Self {
        assert!(min <= max, "constraint bounds out of order");
        Self::bounded(min, max)
    }

    pub fn unsigned(min: u64, max: u64) -> Self {
        assert!(min <= max, "constraint bounds out of order");
        Self::bounded(min as i64, max as i64)
    }

    /// Semi-constrained: lower bound only.
    pub fn signed_min(min: i64) -> Self {
        IntConstraint {
            min: Some(min),
            ..Self::default()
        }
    }

    pub fn unsigned_min(min: u64) -> Self {
        IntConstraint {
            min: Some(min as i64),
            ..Self::default()
        }
    }

    /// Extension marker with an explicit extension range.
    pub fn extend_signed(mut self, ext_min: i64, ext_max: i64) -> Self {
        assert!(ext_min <= ext_max, "extension bounds out of order");
        assert!(
            self.min.map_or(true, |min| ext_min <= min) && self.max.map_or(true, |max| ext_max >= max),
            "extension range must cover the root range"
        );
        self.ext_min = Some(ext_min);
        self.ext_max = Some(ext_max);
        self.extended = true;
        self
    }

    pub fn extend_unsigned(mut self, ext_min: u64, ext_max: u64) -> Self {
        assert!(ext_min <= ext_max, "extension bounds out of order");
        assert!(
            self.min.map_or(true, |min| ext_min <= min as u64)
                && self.max.map_or(true, |max| ext_max >= max as u64),
            "extension range must cover the root range"
        );
        self.ext_min = Some(ext_min as i64);
        self.ext_max = Some(ext_max as i64);
        self.extended = true;
        self
    }

    /// Extension marker with an unbounded extension range.
    pub fn extensible(mut self) -> Self {
        self.extended = true;
        self
    }

    fn bounded(min: i64, max: i64) -> Self {
        // valid for both signed and unsigned readings of the raw bounds
        let span = (max as u64).wrapping_sub(min as u64);
        let span_bit_len = bit_len64(span);
        let span_octet_bit_len = if span_bit_len > 16 {
            bit_len64(octet_len_u64(span) as u64 - 1)
        } else {
            0
        };
        IntConstraint {
            min: Some(min),
            max: Some(max),
            span,
            span_bit_len,
            span_octet_bit_len,
            ext_min: None,
            ext_max: None,
            extended: false,
        }
    }

    pub(crate) fn is_fully_constrained(&self) -> bool {
        self.min.is_some() && self.max.is_some()
    }
}

/// Size bounds for octet strings, bit strings and SEQUENCE-OF counts.
#[derive(Debug, Clone, Copy)]
pub struct CountConstraint {
    pub(crate) min: usize,
    pub(crate) max: usize,
    pub(crate) ext_min: usize,
    pub(crate) ext_max: usize,
    pub(crate) extended: bool,
}

impl Default for CountConstraint {
    fn default() -> Self {
        CountConstraint {
            min: 0,
            max: SIZE_UNBOUNDED,
            ext_min: 0,
            ext_max: SIZE_UNBOUNDED,
            extended: false,
        }
    }
}

impl CountConstraint {
    pub fn fixed(len: usize) -> Self {
        Self::range(len, len)
    }

    pub fn range(min: usize, max: usize) -> Self {
        assert!(min <= max, "size bounds out of order");
        CountConstraint {
            min,
            max,
            ..Self::default()
        }
    }

    pub fn at_least(min: usize) -> Self {
        Self::range(min, SIZE_UNBOUNDED)
    }

    pub fn extend(mut self, ext_min: usize, ext_max: usize) -> Self {
        assert!(ext_min <= self.min && ext_max >= self.max, "extension range must cover the root range");
        self.ext_min = ext_min;
        self.ext_max = ext_max;
        self.extended = true;
        self
    }

    pub fn extensible(mut self) -> Self {
        self.extended = true;
        self
    }
}

/// Registered values of an enumerated type: the root list, the extension
/// list, and an optional substitute for unknown extension values met on
/// decode. `constraints` is the root index range.
#[derive(Debug, Clone, Getters)]
pub struct EnumInfo {
    pub(crate) root_values: Vec<i32>,
    pub(crate) ext_values: Vec<i32>,
    pub(crate) ext_default: Option<i32>,
    pub(crate) extended: bool,
    #[getter(skip)]
    pub(crate) constraints: IntConstraint,
}

impl EnumInfo {
    /// Position of `val`; the flag is set when it lives in the extension.
    pub(crate) fn find(&self, val: i32) -> Option<(usize, bool)> {
        if let Some(pos) = self.root_values.iter().position(|&v| v == val) {
            return Some((pos, false));
        }
        self.ext_values.iter().position(|&v| v == val).map(|pos| (pos, true))
    }
}

/// User-supplied callbacks for OPAQUE fields. `pack_size` returns an upper
/// bound in bits.
#[derive(Debug, Clone, Copy)]
pub struct OpaqueCodec {
    pub pack_size: fn(&Value) -> usize,
    pub pack: fn(&Value, &mut BitBuffer) -> Result<()>,
    pub unpack: fn(&mut BitStream<'_>, &mut dyn Arena) -> Result<Value>,
}

/// One element of a constructed type descriptor.
#[derive(Debug, Getters)]
pub struct Field {
    pub(crate) name: String,
    pub(crate) ftype: FieldType,
    pub(crate) mode: FieldMode,
    #[getter(skip)]
    pub(crate) int_info: IntConstraint,
    #[getter(skip)]
    pub(crate) str_info: Option<CountConstraint>,
    #[getter(skip)]
    pub(crate) seq_of_info: Option<CountConstraint>,
    #[getter(skip)]
    pub(crate) enum_info: Option<Arc<EnumInfo>>,
    #[getter(skip)]
    pub(crate) sub: Option<Arc<Descriptor>>,
    pub(crate) is_open_type: bool,
    pub(crate) is_extension: bool,
    pub(crate) open_type_buf_len: usize,
    #[getter(skip)]
    pub(crate) opaque: Option<OpaqueCodec>,
}

impl Field {
    pub fn sub_descriptor(&self) -> Option<&Arc<Descriptor>> {
        self.sub.as_ref()
    }
}

/// A named constructed type. `ext_pos` is the index of the first
/// post-extension-marker field (`fields.len()` when there is none); for a
/// CHOICE, `fields[0]` is the synthetic discriminant and `choice_info`
/// constrains the root alternative index.
#[derive(Debug, Getters)]
pub struct Descriptor {
    pub(crate) name: String,
    pub(crate) kind: DescriptorKind,
    #[getter(skip)]
    pub(crate) fields: Vec<Field>,
    #[getter(skip)]
    pub(crate) opt_fields: Vec<usize>,
    pub(crate) ext_pos: usize,
    pub(crate) is_extended: bool,
    pub(crate) is_seq_of: bool,
    #[getter(skip)]
    pub(crate) choice_info: IntConstraint,
}

impl Descriptor {
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Positions of root OPTIONAL fields, in descriptor order.
    pub fn opt_fields(&self) -> &[usize] {
        &self.opt_fields
    }
}
