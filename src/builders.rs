//! Fluent construction of descriptors. This is the in-crate stand-in for
//! the descriptor compiler: every derived field (constraint spans, optional
//! positions, extension pivot, choice index range) is computed here and the
//! structural invariants are checked, so the codec itself never re-checks
//! them. Misuse is a programming error and panics.

use std::sync::Arc;

use crate::descriptor::{
    CountConstraint, Descriptor, DescriptorKind, EnumInfo, Field, FieldMode, FieldType, IntConstraint, OpaqueCodec,
};

#[derive(Debug, Default)]
pub struct EnumBuilder {
    root: Vec<i32>,
    ext: Vec<i32>,
    ext_default: Option<i32>,
    past_marker: bool,
}

impl EnumBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a value; after `extension()` values land in the extension
    /// list.
    pub fn value(mut self, v: i32) -> Self {
        if self.past_marker {
            self.ext.push(v);
        } else {
            self.root.push(v);
        }
        self
    }

    pub fn values<I: IntoIterator<Item = i32>>(mut self, vals: I) -> Self {
        for v in vals {
            self = self.value(v);
        }
        self
    }

    pub fn extension(mut self) -> Self {
        self.past_marker = true;
        self
    }

    /// Substitute for unknown extension values met on decode.
    pub fn default_on_unknown(mut self, v: i32) -> Self {
        self.ext_default = Some(v);
        self
    }

    pub fn build(self) -> Arc<EnumInfo> {
        assert!(!self.root.is_empty(), "an enumeration needs at least one root value");
        let mut seen = self.root.clone();
        seen.extend(&self.ext);
        seen.sort_unstable();
        seen.dedup();
        assert!(
            seen.len() == self.root.len() + self.ext.len(),
            "enumeration values must be distinct"
        );
        let constraints = IntConstraint::signed(0, self.root.len() as i64 - 1);
        Arc::new(EnumInfo {
            root_values: self.root,
            ext_values: self.ext,
            ext_default: self.ext_default,
            extended: self.past_marker,
            constraints,
        })
    }
}

#[derive(Debug)]
pub struct FieldBuilder {
    field: Field,
}

impl FieldBuilder {
    fn typed(name: &str, ftype: FieldType) -> Self {
        FieldBuilder {
            field: Field {
                name: name.to_owned(),
                ftype,
                mode: FieldMode::Mandatory,
                int_info: IntConstraint::none(),
                str_info: None,
                seq_of_info: None,
                enum_info: None,
                sub: None,
                is_open_type: false,
                is_extension: false,
                open_type_buf_len: 0,
                opaque: None,
            },
        }
    }

    pub fn boolean(name: &str) -> Self {
        Self::typed(name, FieldType::Bool)
    }

    pub fn int8(name: &str) -> Self {
        Self::typed(name, FieldType::I8)
    }

    pub fn uint8(name: &str) -> Self {
        Self::typed(name, FieldType::U8)
    }

    pub fn int16(name: &str) -> Self {
        Self::typed(name, FieldType::I16)
    }

    pub fn uint16(name: &str) -> Self {
        Self::typed(name, FieldType::U16)
    }

    pub fn int32(name: &str) -> Self {
        Self::typed(name, FieldType::I32)
    }

    pub fn uint32(name: &str) -> Self {
        Self::typed(name, FieldType::U32)
    }

    pub fn int64(name: &str) -> Self {
        Self::typed(name, FieldType::I64)
    }

    pub fn uint64(name: &str) -> Self {
        Self::typed(name, FieldType::U64)
    }

    pub fn enumeration(name: &str, info: Arc<EnumInfo>) -> Self {
        let mut fb = Self::typed(name, FieldType::Enum);
        fb.field.enum_info = Some(info);
        fb
    }

    pub fn null(name: &str) -> Self {
        Self::typed(name, FieldType::Null)
    }

    /// Null whose presence alone carries the information; meant for
    /// optional slots.
    pub fn opt_null(name: &str) -> Self {
        Self::typed(name, FieldType::OptNull)
    }

    pub fn octet_string(name: &str) -> Self {
        Self::typed(name, FieldType::OctetString)
    }

    pub fn bit_string(name: &str) -> Self {
        Self::typed(name, FieldType::BitString)
    }

    pub fn sequence(name: &str, desc: Arc<Descriptor>) -> Self {
        let mut fb = Self::typed(name, FieldType::Sequence);
        fb.field.sub = Some(desc);
        fb
    }

    pub fn choice(name: &str, desc: Arc<Descriptor>) -> Self {
        assert!(desc.kind == DescriptorKind::Choice, "descriptor is not a choice");
        let mut fb = Self::typed(name, FieldType::Choice);
        fb.field.sub = Some(desc);
        fb
    }

    pub fn untagged_choice(name: &str, desc: Arc<Descriptor>) -> Self {
        assert!(desc.kind == DescriptorKind::Choice, "descriptor is not a choice");
        let mut fb = Self::typed(name, FieldType::UntaggedChoice);
        fb.field.sub = Some(desc);
        fb
    }

    pub fn opaque(name: &str, codec: OpaqueCodec) -> Self {
        let mut fb = Self::typed(name, FieldType::Opaque);
        fb.field.opaque = Some(codec);
        fb
    }

    /// Repeated field: wraps `element` into a single-field SEQUENCE-OF
    /// descriptor. Use `size` to constrain the element count.
    pub fn seq_of(name: &str, element: FieldBuilder) -> Self {
        let mut elem = element.field;
        elem.mode = FieldMode::SeqOf;
        let wrapper = Arc::new(Descriptor {
            name: format!("{name}-items"),
            kind: DescriptorKind::Sequence,
            fields: vec![elem],
            opt_fields: Vec::new(),
            ext_pos: 1,
            is_extended: false,
            is_seq_of: true,
            choice_info: IntConstraint::none(),
        });
        let mut fb = Self::typed(name, FieldType::Sequence);
        fb.field.sub = Some(wrapper);
        fb
    }

    /// Value range of an integer field.
    pub fn constraint(mut self, info: IntConstraint) -> Self {
        self.field.int_info = info;
        self
    }

    /// Size constraint: element count for a repeated field, octet or bit
    /// count for a string.
    pub fn size(mut self, info: CountConstraint) -> Self {
        if self.field.sub.as_deref().is_some_and(|d| d.is_seq_of) {
            self.field.seq_of_info = Some(info);
        } else {
            self.field.str_info = Some(info);
        }
        self
    }

    /// Wrap this field's encoding into a skippable octet envelope.
    pub fn open_type(mut self) -> Self {
        self.field.is_open_type = true;
        self
    }

    /// Scratch-buffer hint for open-type encoding.
    pub fn open_type_buf_len(mut self, octets: usize) -> Self {
        self.field.open_type_buf_len = octets;
        self
    }
}

#[derive(Debug)]
pub struct SequenceBuilder {
    name: String,
    fields: Vec<Field>,
    ext_pos: Option<usize>,
}

impl SequenceBuilder {
    pub fn new(name: &str) -> Self {
        SequenceBuilder {
            name: name.to_owned(),
            fields: Vec::new(),
            ext_pos: None,
        }
    }

    pub fn field(mut self, fb: FieldBuilder) -> Self {
        assert!(
            self.ext_pos.is_none(),
            "extension additions must be optional"
        );
        self.fields.push(fb.field);
        self
    }

    pub fn optional(mut self, fb: FieldBuilder) -> Self {
        let mut field = fb.field;
        field.mode = FieldMode::Optional;
        field.is_extension = self.ext_pos.is_some();
        self.fields.push(field);
        self
    }

    /// Everything added from here on sits past the extension marker.
    pub fn extension(mut self) -> Self {
        assert!(self.ext_pos.is_none(), "only one extension marker");
        self.ext_pos = Some(self.fields.len());
        self
    }

    pub fn build(self) -> Arc<Descriptor> {
        let ext_pos = self.ext_pos.unwrap_or(self.fields.len());
        let opt_fields = self
            .fields
            .iter()
            .take(ext_pos)
            .enumerate()
            .filter(|(_, f)| f.mode == FieldMode::Optional)
            .map(|(i, _)| i)
            .collect();
        Arc::new(Descriptor {
            name: self.name,
            kind: DescriptorKind::Sequence,
            fields: self.fields,
            opt_fields,
            ext_pos,
            is_extended: self.ext_pos.is_some(),
            is_seq_of: false,
            choice_info: IntConstraint::none(),
        })
    }
}

#[derive(Debug)]
pub struct ChoiceBuilder {
    name: String,
    fields: Vec<Field>,
    ext_pos: Option<usize>,
}

impl ChoiceBuilder {
    pub fn new(name: &str) -> Self {
        // slot 0 is the synthetic discriminant; alternatives are 1-based
        let discriminant = FieldBuilder::typed("index", FieldType::Enum).field;
        ChoiceBuilder {
            name: name.to_owned(),
            fields: vec![discriminant],
            ext_pos: None,
        }
    }

    pub fn alternative(mut self, fb: FieldBuilder) -> Self {
        let mut field = fb.field;
        field.is_extension = self.ext_pos.is_some();
        self.fields.push(field);
        self
    }

    pub fn extension(mut self) -> Self {
        assert!(self.ext_pos.is_none(), "only one extension marker");
        self.ext_pos = Some(self.fields.len());
        self
    }

    pub fn build(self) -> Arc<Descriptor> {
        let ext_pos = self.ext_pos.unwrap_or(self.fields.len());
        assert!(ext_pos >= 2, "a choice needs at least one root alternative");
        assert!(self.fields.len() >= 2, "a choice needs at least one alternative");
        let choice_info = IntConstraint::signed(0, ext_pos as i64 - 2);
        Arc::new(Descriptor {
            name: self.name,
            kind: DescriptorKind::Choice,
            fields: self.fields,
            opt_fields: Vec::new(),
            ext_pos,
            is_extended: self.ext_pos.is_some(),
            is_seq_of: false,
            choice_info,
        })
    }
}

/// SET types can be described for registration attempts but are refused by
/// both the registry and the codec.
#[derive(Debug)]
pub struct SetBuilder {
    name: String,
    fields: Vec<Field>,
}

impl SetBuilder {
    pub fn new(name: &str) -> Self {
        SetBuilder {
            name: name.to_owned(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, fb: FieldBuilder) -> Self {
        self.fields.push(fb.field);
        self
    }

    pub fn build(self) -> Arc<Descriptor> {
        let ext_pos = self.fields.len();
        Arc::new(Descriptor {
            name: self.name,
            kind: DescriptorKind::Set,
            fields: self.fields,
            opt_fields: Vec::new(),
            ext_pos,
            is_extended: false,
            is_seq_of: false,
            choice_info: IntConstraint::none(),
        })
    }
}
