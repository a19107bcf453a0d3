use std::sync::Arc;

use asn1_aper::builders::{ChoiceBuilder, EnumBuilder, FieldBuilder, SequenceBuilder, SetBuilder};
use asn1_aper::descriptor::{CountConstraint, Descriptor, IntConstraint, OpaqueCodec};
use asn1_aper::mem::{Arena, BoundedArena, HeapArena};
use asn1_aper::result::ErrorKind;
use asn1_aper::value::{BitString, Value};
use asn1_aper::{get_descriptor, pack, pack_size, register_descriptor, unpack};
use assert_matches::assert_matches;

fn seq(values: Vec<Value>) -> Value {
    Value::Sequence(values.into_iter().map(Some).collect())
}

fn roundtrip(desc: &Descriptor, value: &Value) -> Vec<u8> {
    let out = pack(desc, value).unwrap();
    assert!(!out.is_empty());
    let bound = pack_size(desc, value).unwrap();
    assert!(bound.div_ceil(8) >= out.len(), "size bound below the actual encoding");
    let mut arena = HeapArena;
    let back = unpack(desc, &out, &mut arena).unwrap();
    assert_eq!(&back, value);
    // byte-identical re-encode
    assert_eq!(pack(desc, &back).unwrap(), out);
    out
}

fn kitchen_sink() -> Arc<Descriptor> {
    let color = EnumBuilder::new()
        .values([1, 2, 3])
        .extension()
        .value(10)
        .build();
    let inner = SequenceBuilder::new("inner")
        .field(FieldBuilder::uint16("id").constraint(IntConstraint::unsigned(0, 4095)))
        .optional(FieldBuilder::octet_string("tag").size(CountConstraint::range(0, 8)))
        .build();
    let pick = ChoiceBuilder::new("pick")
        .alternative(FieldBuilder::int32("small").constraint(IntConstraint::signed(-5, 5)))
        .alternative(FieldBuilder::octet_string("raw"))
        .extension()
        .alternative(FieldBuilder::boolean("flag"))
        .build();

    SequenceBuilder::new("sink")
        .field(FieldBuilder::boolean("ok"))
        .field(FieldBuilder::int8("tiny").constraint(IntConstraint::signed(-10, 10)))
        .field(FieldBuilder::int64("wide"))
        .field(FieldBuilder::uint64("huge"))
        .field(FieldBuilder::int32("offset").constraint(IntConstraint::signed_min(-1000)))
        .field(FieldBuilder::enumeration("color", color))
        .field(FieldBuilder::bit_string("flags").size(CountConstraint::range(0, 64)))
        .optional(FieldBuilder::sequence("nested", inner))
        .field(FieldBuilder::choice("pick", pick))
        .field(FieldBuilder::seq_of("counts", FieldBuilder::uint8("n").constraint(IntConstraint::unsigned(0, 255))).size(CountConstraint::range(0, 100)))
        .optional(FieldBuilder::opt_null("marker"))
        .build()
}

fn kitchen_sink_value(nested_present: bool) -> Value {
    let nested = nested_present.then(|| {
        Value::Sequence(vec![
            Some(Value::Unsigned(77)),
            Some(Value::OctetString(b"hey".to_vec())),
        ])
    });
    Value::Sequence(vec![
        Some(Value::Bool(true)),
        Some(Value::Signed(-3)),
        Some(Value::Signed(1 << 40)),
        Some(Value::Unsigned(u64::MAX - 1)),
        Some(Value::Signed(-999)),
        Some(Value::Enum(10)),
        Some(Value::BitString(BitString::from_bits(&[true, false, true]))),
        nested,
        Some(Value::Choice(1, Box::new(Value::Signed(-5)))),
        Some(Value::SeqOf(vec![
            Value::Unsigned(0),
            Value::Unsigned(127),
            Value::Unsigned(255),
        ])),
        Some(Value::Null),
    ])
}

#[test_log::test]
fn kitchen_sink_roundtrip() {
    let desc = kitchen_sink();
    roundtrip(&desc, &kitchen_sink_value(true));
    roundtrip(&desc, &kitchen_sink_value(false));
}

#[test_log::test]
fn determinism() {
    let desc = kitchen_sink();
    let a = pack(&desc, &kitchen_sink_value(true)).unwrap();
    let b = pack(&desc, &kitchen_sink_value(true)).unwrap();
    assert_eq!(a, b);
    let c = pack(&desc, &kitchen_sink_value(false)).unwrap();
    assert_ne!(a, c);
}

#[test_log::test]
fn octet_string_fragment_boundaries() {
    let desc = SequenceBuilder::new("blob")
        .field(FieldBuilder::octet_string("os"))
        .build();
    for len in [0usize, 1, 127, 128, 16383, 16384, 16385, 32768, 65535, 65536, 98304] {
        let payload: Vec<u8> = (0..len).map(|i| (i * 7) as u8).collect();
        let value = seq(vec![Value::OctetString(payload)]);
        roundtrip(&desc, &value);
    }
}

#[test_log::test]
fn bit_string_fragment_boundaries() {
    let desc = SequenceBuilder::new("bits")
        .field(FieldBuilder::bit_string("bs"))
        .build();
    for bit_len in [0usize, 1, 9, 16, 16383, 16384, 20000] {
        let bits: Vec<bool> = (0..bit_len).map(|i| i % 3 == 0).collect();
        let value = seq(vec![Value::BitString(BitString::from_bits(&bits))]);
        roundtrip(&desc, &value);
    }
}

#[test_log::test]
fn seq_of_count_fragmentation() {
    let desc = SequenceBuilder::new("list")
        .field(FieldBuilder::seq_of("items", FieldBuilder::boolean("b")))
        .build();
    let items: Vec<Value> = (0..16385).map(|i| Value::Bool(i % 2 == 0)).collect();
    roundtrip(&desc, &seq(vec![Value::SeqOf(items)]));
}

#[test_log::test]
fn integer_extension_ranges() {
    let desc = SequenceBuilder::new("num")
        .field(FieldBuilder::int32("n").constraint(IntConstraint::signed(0, 7).extend_signed(-100, 1000)))
        .build();
    for n in [0i64, 7, -100, 8, 1000] {
        roundtrip(&desc, &seq(vec![Value::Signed(n)]));
    }
    let err = pack(&desc, &seq(vec![Value::Signed(2000)])).unwrap_err();
    assert_matches!(err.kind(), ErrorKind::ConstraintViolation);
}

#[test_log::test]
fn extended_size_constraint() {
    let desc = SequenceBuilder::new("str")
        .field(FieldBuilder::octet_string("os").size(CountConstraint::range(1, 2).extend(0, 10)))
        .build();
    for len in [1usize, 2, 0, 5, 10] {
        let value = seq(vec![Value::OctetString(vec![0x55; len])]);
        roundtrip(&desc, &value);
    }
    let err = pack(&desc, &seq(vec![Value::OctetString(vec![0; 11])])).unwrap_err();
    assert_matches!(err.kind(), ErrorKind::ConstraintViolation);
}

#[test_log::test]
fn unknown_sequence_extensions_are_skipped() {
    let v2 = SequenceBuilder::new("msg")
        .field(FieldBuilder::uint8("kept").constraint(IntConstraint::unsigned(0, 255)))
        .extension()
        .optional(FieldBuilder::octet_string("added"))
        .optional(FieldBuilder::boolean("also-added"))
        .build();
    // same wire type, one addition short
    let v1 = SequenceBuilder::new("msg")
        .field(FieldBuilder::uint8("kept").constraint(IntConstraint::unsigned(0, 255)))
        .extension()
        .optional(FieldBuilder::octet_string("added"))
        .build();
    // no known additions at all
    let v0 = SequenceBuilder::new("msg")
        .field(FieldBuilder::uint8("kept").constraint(IntConstraint::unsigned(0, 255)))
        .extension()
        .build();

    let value = Value::Sequence(vec![
        Some(Value::Unsigned(9)),
        Some(Value::OctetString(b"new".to_vec())),
        Some(Value::Bool(true)),
    ]);
    let out = pack(&v2, &value).unwrap();

    let mut arena = HeapArena;
    let narrow = unpack(&v1, &out, &mut arena).unwrap();
    assert_eq!(
        narrow,
        Value::Sequence(vec![Some(Value::Unsigned(9)), Some(Value::OctetString(b"new".to_vec()))])
    );
    let none = unpack(&v0, &out, &mut arena).unwrap();
    assert_eq!(none, Value::Sequence(vec![Some(Value::Unsigned(9))]));

    // the other way around: absent additions decode as absent
    let short = pack(&v0, &Value::Sequence(vec![Some(Value::Unsigned(9))])).unwrap();
    let widened = unpack(&v2, &short, &mut arena).unwrap();
    assert_eq!(widened, Value::Sequence(vec![Some(Value::Unsigned(9)), None, None]));
}

#[test_log::test]
fn zero_bit_extension_payload_takes_one_octet() {
    let desc = SequenceBuilder::new("msg")
        .field(FieldBuilder::boolean("b"))
        .extension()
        .optional(FieldBuilder::opt_null("flagged"))
        .build();
    let value = Value::Sequence(vec![Some(Value::Bool(false)), Some(Value::Null)]);
    let out = pack(&desc, &value).unwrap();
    // extension bit, value bit, NSNNWN(0), bitmap `1`, then a one-octet
    // envelope around the empty null encoding
    assert_eq!(out, vec![0x80, 0x40, 0x01, 0x00]);

    let mut arena = HeapArena;
    assert_eq!(unpack(&desc, &out, &mut arena).unwrap(), value);
}

#[test_log::test]
fn enum_extension_default_substitution() {
    let sender = EnumBuilder::new()
        .value(1)
        .extension()
        .values([10, 20])
        .build();
    let with_default = EnumBuilder::new()
        .value(1)
        .extension()
        .value(10)
        .default_on_unknown(1)
        .build();
    let without_default = EnumBuilder::new().value(1).extension().value(10).build();

    let send = SequenceBuilder::new("msg")
        .field(FieldBuilder::enumeration("e", sender))
        .build();
    let lenient = SequenceBuilder::new("msg")
        .field(FieldBuilder::enumeration("e", with_default))
        .build();
    let strict = SequenceBuilder::new("msg")
        .field(FieldBuilder::enumeration("e", without_default))
        .build();

    let out = pack(&send, &seq(vec![Value::Enum(20)])).unwrap();
    let mut arena = HeapArena;
    assert_eq!(unpack(&lenient, &out, &mut arena).unwrap(), seq(vec![Value::Enum(1)]));
    let err = unpack(&strict, &out, &mut arena).unwrap_err();
    assert_matches!(err.kind(), ErrorKind::EnumValueUnknownNoDefault(1));
}

#[test_log::test]
fn enum_unknown_value_fails_encode() {
    let info = EnumBuilder::new().values([1, 2]).build();
    let desc = SequenceBuilder::new("msg")
        .field(FieldBuilder::enumeration("e", info))
        .build();
    let err = pack(&desc, &seq(vec![Value::Enum(3)])).unwrap_err();
    assert_matches!(err.kind(), ErrorKind::EnumValueUnknown(3));
}

#[test_log::test]
fn open_type_fields_roundtrip() {
    let desc = SequenceBuilder::new("msg")
        .field(FieldBuilder::uint32("inner").constraint(IntConstraint::unsigned(0, 7)).open_type().open_type_buf_len(8))
        .field(FieldBuilder::boolean("after"))
        .build();
    let value = seq(vec![Value::Unsigned(5), Value::Bool(true)]);
    let out = roundtrip(&desc, &value);
    // envelope of one octet holding `101` padded
    assert_eq!(out[0], 0x01);
    assert_eq!(out[1], 0xa0);
}

#[test_log::test]
fn opaque_callbacks_drive_the_payload() {
    fn opaque_size(_: &Value) -> usize {
        16
    }
    fn opaque_pack(v: &Value, bb: &mut asn1_aper::bitbuf::BitBuffer) -> asn1_aper::result::Result<()> {
        bb.align();
        bb.put(v.as_u64().unwrap_or(0), 16);
        Ok(())
    }
    fn opaque_unpack(
        bs: &mut asn1_aper::bitstream::BitStream<'_>,
        _arena: &mut dyn Arena,
    ) -> asn1_aper::result::Result<Value> {
        bs.align()?;
        Ok(Value::Unsigned(bs.get(16)?))
    }

    let codec = OpaqueCodec {
        pack_size: opaque_size,
        pack: opaque_pack,
        unpack: opaque_unpack,
    };
    let desc = SequenceBuilder::new("msg")
        .field(FieldBuilder::opaque("blob", codec))
        .build();
    roundtrip(&desc, &seq(vec![Value::Unsigned(0xbeef)]));
}

#[test_log::test]
fn set_descriptors_are_refused() {
    let desc = SetBuilder::new("legacy")
        .field(FieldBuilder::boolean("b"))
        .build();
    let err = pack(&desc, &seq(vec![Value::Bool(true)])).unwrap_err();
    assert_matches!(err.kind(), ErrorKind::NotImplemented(_));
    let err = register_descriptor(Arc::clone(&desc)).unwrap_err();
    assert_matches!(err.kind(), ErrorKind::NotImplemented(_));
}

#[test_log::test]
fn registry_publishes_descriptors() {
    let desc = SequenceBuilder::new("registered-msg")
        .field(FieldBuilder::boolean("b"))
        .build();
    register_descriptor(Arc::clone(&desc)).unwrap();
    let found = get_descriptor("registered-msg").unwrap();
    assert_eq!(found.name(), "registered-msg");
    assert!(get_descriptor("never-registered").is_none());

    let value = seq(vec![Value::Bool(false)]);
    let out = pack(&found, &value).unwrap();
    let mut arena = HeapArena;
    assert_eq!(unpack(&found, &out, &mut arena).unwrap(), value);
}

#[test_log::test]
fn bounded_arena_surfaces_allocator_failure() {
    let desc = SequenceBuilder::new("blob")
        .field(FieldBuilder::octet_string("os"))
        .build();
    let value = seq(vec![Value::OctetString(vec![0xaa; 64])]);
    let out = pack(&desc, &value).unwrap();

    let mut tight = BoundedArena::with_budget(8);
    let err = unpack(&desc, &out, &mut tight).unwrap_err();
    assert_matches!(err.kind(), ErrorKind::AllocatorFailure(64));

    let mut enough = BoundedArena::with_budget(64);
    assert_eq!(unpack(&desc, &out, &mut enough).unwrap(), value);
}

#[test_log::test]
fn truncated_input_fails_cleanly() {
    let desc = SequenceBuilder::new("msg")
        .field(FieldBuilder::uint16("u").constraint(IntConstraint::unsigned(0, 65535)))
        .build();
    let err = unpack(&desc, &[0x12], &mut HeapArena).unwrap_err();
    assert_matches!(err.kind(), ErrorKind::UnexpectedEof);
    assert_eq!(err.path(), "msg.u");
}

#[test_log::test]
fn malformed_fragment_headers_fail() {
    let desc = SequenceBuilder::new("blob")
        .field(FieldBuilder::octet_string("os"))
        .build();
    for bytes in [&[0xc0u8][..], &[0xc5][..]] {
        let err = unpack(&desc, bytes, &mut HeapArena).unwrap_err();
        assert_matches!(err.kind(), ErrorKind::FragmentationInvalid(_));
    }
}

#[test_log::test]
fn invalid_choice_index_fails() {
    let desc = ChoiceBuilder::new("pick")
        .alternative(FieldBuilder::boolean("a"))
        .extension()
        .alternative(FieldBuilder::boolean("b"))
        .build();
    // encode side: slot 0 is the discriminant, never a payload
    let err = pack(&desc, &Value::Choice(0, Box::new(Value::Bool(true)))).unwrap_err();
    assert_matches!(err.kind(), ErrorKind::InvalidChoiceIndex(0));
    let err = pack(&desc, &Value::Choice(9, Box::new(Value::Bool(true)))).unwrap_err();
    assert_matches!(err.kind(), ErrorKind::InvalidChoiceIndex(9));

    // decode side: extension index far beyond the known alternatives
    let err = unpack(&desc, &[0b1100_0000, 0x01, 0x63], &mut HeapArena).unwrap_err();
    assert_matches!(err.kind(), ErrorKind::InvalidChoiceIndex(_));
}

#[test_log::test]
fn mandatory_fields_must_be_present() {
    let desc = SequenceBuilder::new("msg")
        .field(FieldBuilder::boolean("b"))
        .build();
    let err = pack(&desc, &Value::Sequence(vec![None])).unwrap_err();
    assert_matches!(err.kind(), ErrorKind::TypeMismatch(_));
    assert_eq!(err.path(), "msg.b");
}

#[test_log::test]
fn error_paths_name_the_failing_field() {
    let inner = SequenceBuilder::new("inner")
        .field(FieldBuilder::int32("n").constraint(IntConstraint::signed(0, 7)))
        .build();
    let desc = SequenceBuilder::new("outer")
        .field(FieldBuilder::sequence("child", inner))
        .build();
    let value = seq(vec![seq(vec![Value::Signed(12)])]);
    let err = pack(&desc, &value).unwrap_err();
    assert_matches!(err.kind(), ErrorKind::ConstraintViolation);
    assert_eq!(err.path(), "outer.child.n");
}
