use asn1_aper::builders::{ChoiceBuilder, EnumBuilder, FieldBuilder, SequenceBuilder};
use asn1_aper::descriptor::{CountConstraint, IntConstraint};
use asn1_aper::mem::HeapArena;
use asn1_aper::value::Value;
use asn1_aper::{pack, unpack};

fn main() -> anyhow::Result<()> {
    let status = EnumBuilder::new()
        .values([0, 1, 2])
        .extension()
        .value(10)
        .default_on_unknown(0)
        .build();
    let payload = ChoiceBuilder::new("payload")
        .alternative(FieldBuilder::octet_string("raw").size(CountConstraint::range(0, 32)))
        .alternative(FieldBuilder::uint32("counter").constraint(IntConstraint::unsigned(0, 1_000_000)))
        .build();
    let message = SequenceBuilder::new("message")
        .field(FieldBuilder::uint16("id").constraint(IntConstraint::unsigned(0, 4095)))
        .field(FieldBuilder::enumeration("status", status))
        .optional(FieldBuilder::octet_string("note"))
        .field(FieldBuilder::choice("payload", payload))
        .build();

    let value = Value::Sequence(vec![
        Some(Value::Unsigned(321)),
        Some(Value::Enum(1)),
        Some(Value::OctetString(b"hello".to_vec())),
        Some(Value::Choice(2, Box::new(Value::Unsigned(42_000)))),
    ]);

    let octets = pack(&message, &value)?;
    println!("encoded {} octets:", octets.len());
    for chunk in octets.chunks(16) {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
        println!("  {}", hex.join(" "));
    }

    let mut arena = HeapArena;
    let decoded = unpack(&message, &octets, &mut arena)?;
    println!("decoded: {decoded:#?}");
    assert_eq!(decoded, value);
    Ok(())
}
