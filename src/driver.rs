use tracing::{debug, trace};

use crate::bitbuf::BitBuffer;
use crate::bitstream::BitStream;
use crate::descriptor::{Descriptor, DescriptorKind, Field, FieldMode, FieldType};
use crate::length::{LenDecoder, LenEncoder, FRAG_64K};
use crate::mem::Arena;
use crate::number::{decode_number, encode_number, read_nsnnwn, read_number, write_nsnnwn, write_number};
use crate::result::{Error, ErrorKind, Result};
use crate::scalar;
use crate::value::Value;

fn mismatch(expected: &'static str, at: usize) -> Error {
    Error::new(ErrorKind::TypeMismatch(expected), at)
}

fn signed_fits(n: i64, ftype: FieldType) -> bool {
    match ftype {
        FieldType::I8 => i8::try_from(n).is_ok(),
        FieldType::I16 => i16::try_from(n).is_ok(),
        FieldType::I32 => i32::try_from(n).is_ok(),
        _ => true,
    }
}

fn unsigned_fits(n: u64, ftype: FieldType) -> bool {
    match ftype {
        FieldType::U8 => u8::try_from(n).is_ok(),
        FieldType::U16 => u16::try_from(n).is_ok(),
        FieldType::U32 => u32::try_from(n).is_ok(),
        _ => true,
    }
}

/* Encode */

pub(crate) fn encode_constructed(
    bb: &mut BitBuffer,
    value: &Value,
    desc: &Descriptor,
    field: Option<&Field>,
) -> Result<()> {
    if desc.is_seq_of {
        let field = field
            .ok_or_else(|| Error::new(ErrorKind::NotImplemented("top-level SEQUENCE OF"), bb.len_bits()))?;
        return encode_seq_of(bb, value, desc, field);
    }
    match desc.kind {
        DescriptorKind::Sequence => encode_sequence(bb, value, desc),
        DescriptorKind::Choice => encode_choice(bb, value, desc),
        DescriptorKind::Set => Err(Error::new(ErrorKind::NotImplemented("ASN.1 SET"), bb.len_bits())),
    }
}

fn encode_sequence(bb: &mut BitBuffer, value: &Value, desc: &Descriptor) -> Result<()> {
    let slots = value
        .as_sequence()
        .ok_or_else(|| mismatch("sequence", bb.len_bits()))?;
    if slots.len() != desc.fields.len() {
        return Err(mismatch("sequence with one slot per field", bb.len_bits()));
    }

    let mut ext_bitmap = BitBuffer::new();
    if desc.is_extended {
        let mut any_extension = false;
        for slot in &slots[desc.ext_pos..] {
            let present = slot.is_some();
            ext_bitmap.put_bit(present);
            any_extension |= present;
        }
        trace!("sequence is extended (extension bit = {})", u8::from(any_extension));
        bb.put_bit(any_extension);
    }

    bb.push_mark();
    for &pos in &desc.opt_fields {
        bb.put_bit(slots[pos].is_some());
    }
    bb.trace_tail("SEQUENCE OPTIONAL fields bitmap");
    bb.pop_mark();

    let mut ext_written = false;
    for (i, field) in desc.fields.iter().enumerate() {
        let v = match &slots[i] {
            Some(v) => v,
            None if field.mode == FieldMode::Optional => continue,
            None => return Err(mismatch("value for mandatory field", bb.len_bits()).in_field(&field.name)),
        };
        if field.is_extension && !ext_written {
            // First present addition: announce the bitmap for everything
            // past the extension marker.
            ext_written = true;
            bb.push_mark();
            write_nsnnwn(bb, ext_bitmap.len_bits() - 1);
            bb.put_bit_stream(ext_bitmap.as_stream());
            bb.trace_tail("extension bitmap");
            bb.pop_mark();
        }
        encode_field(bb, v, field).map_err(|e| e.in_field(&field.name))?;
    }
    Ok(())
}

fn encode_choice(bb: &mut BitBuffer, value: &Value, desc: &Descriptor) -> Result<()> {
    let (index, payload) = value
        .as_choice()
        .ok_or_else(|| mismatch("choice", bb.len_bits()))?;
    if index == 0 || index >= desc.fields.len() {
        return Err(Error::new(ErrorKind::InvalidChoiceIndex(index), bb.len_bits()));
    }
    let field = &desc.fields[index];
    trace!("choice index = {index}");

    let extension_present = desc.is_extended && index >= desc.ext_pos;
    if desc.is_extended {
        bb.put_bit(extension_present);
    }

    bb.push_mark();
    if extension_present {
        write_nsnnwn(bb, index - desc.ext_pos);
    } else {
        // indexes start from 0 on the wire
        write_number(bb, (index - 1) as u64, Some(&desc.choice_info));
    }
    bb.trace_tail("CHOICE index");
    bb.pop_mark();

    encode_field(bb, payload, field).map_err(|e| e.in_field(&field.name))
}

fn encode_seq_of(bb: &mut BitBuffer, value: &Value, desc: &Descriptor, field: &Field) -> Result<()> {
    let repeated = &desc.fields[0];
    debug_assert!(repeated.mode == FieldMode::SeqOf);
    let items = value
        .as_seq_of()
        .ok_or_else(|| mismatch("sequence of", bb.len_bits()))?;

    let mut enc = LenEncoder::begin(bb, items.len(), field.seq_of_info.as_ref())?;
    let mut offset = 0;
    loop {
        let n = enc.next(bb);
        for (k, item) in items[offset..offset + n].iter().enumerate() {
            encode_field(bb, item, repeated)
                .map_err(|e| e.in_field(&format!("{}[{}]", repeated.name, offset + k)))?;
        }
        offset += n;
        if enc.done() {
            break;
        }
    }
    Ok(())
}

fn encode_field(bb: &mut BitBuffer, value: &Value, field: &Field) -> Result<()> {
    trace!("encoding value {}", field.name);
    bb.push_mark();
    let res = if field.is_open_type || field.is_extension {
        encode_open_type(bb, value, field)
    } else {
        encode_value(bb, value, field)
    };
    bb.trace_tail("field encoding");
    bb.pop_mark();
    res
}

/// Serialize into a scratch buffer, then wrap the octets into an
/// unconstrained octet string so unknowing decoders can skip the value.
fn encode_open_type(bb: &mut BitBuffer, value: &Value, field: &Field) -> Result<()> {
    let mut open = BitBuffer::with_capacity(field.open_type_buf_len);
    encode_value(&mut open, value, field)?;
    if open.is_empty() {
        // a zero-bit encoding still occupies one octet, X.691 §10.1.3
        open.put(0, 8);
    }
    let bytes = open.into_bytes();
    scalar::encode_octet_string(bb, &bytes, None)
}

fn encode_value(bb: &mut BitBuffer, value: &Value, field: &Field) -> Result<()> {
    match field.ftype {
        FieldType::Bool => {
            let b = value.as_bool().ok_or_else(|| mismatch("bool", bb.len_bits()))?;
            scalar::encode_bool(bb, b);
            Ok(())
        }
        FieldType::I8 | FieldType::I16 | FieldType::I32 | FieldType::I64 => {
            let n = value
                .as_i64()
                .ok_or_else(|| mismatch("signed integer", bb.len_bits()))?;
            if !signed_fits(n, field.ftype) {
                return Err(mismatch("integer within the field width", bb.len_bits()));
            }
            encode_number(bb, n, &field.int_info, true)
        }
        FieldType::U8 | FieldType::U16 | FieldType::U32 | FieldType::U64 => {
            let n = value
                .as_u64()
                .ok_or_else(|| mismatch("unsigned integer", bb.len_bits()))?;
            if !unsigned_fits(n, field.ftype) {
                return Err(mismatch("integer within the field width", bb.len_bits()));
            }
            encode_number(bb, n as i64, &field.int_info, false)
        }
        FieldType::Enum => {
            let v = value.as_enum().ok_or_else(|| mismatch("enum", bb.len_bits()))?;
            let info = field
                .enum_info
                .as_deref()
                .ok_or_else(|| Error::new(ErrorKind::NotImplemented("enum field without values"), bb.len_bits()))?;
            scalar::encode_enum(bb, v, info)
        }
        FieldType::Null | FieldType::OptNull => match value {
            Value::Null => Ok(()),
            _ => Err(mismatch("null", bb.len_bits())),
        },
        FieldType::OctetString => {
            let bytes = value
                .as_bytes()
                .ok_or_else(|| mismatch("octet string", bb.len_bits()))?;
            scalar::encode_octet_string(bb, bytes, field.str_info.as_ref())
        }
        FieldType::BitString => {
            let bits = value
                .as_bit_string()
                .ok_or_else(|| mismatch("bit string", bb.len_bits()))?;
            scalar::encode_bit_string(bb, bits, field.str_info.as_ref())
        }
        FieldType::Sequence | FieldType::Choice | FieldType::UntaggedChoice => {
            let sub = field
                .sub
                .as_deref()
                .ok_or_else(|| Error::new(ErrorKind::NotImplemented("constructed field without descriptor"), bb.len_bits()))?;
            encode_constructed(bb, value, sub, Some(field))
        }
        FieldType::Opaque => match &field.opaque {
            Some(cb) => (cb.pack)(value, bb),
            None => Err(Error::new(ErrorKind::NotImplemented("opaque field without callbacks"), bb.len_bits())),
        },
        FieldType::Skip => Err(Error::new(ErrorKind::NotImplemented("skip field"), bb.len_bits())),
        FieldType::OpenType => Err(Error::new(ErrorKind::NotImplemented("standalone open type"), bb.len_bits())),
        FieldType::ExtValue => Err(Error::new(ErrorKind::NotImplemented("ext value field"), bb.len_bits())),
    }
}

/* Decode */

pub(crate) fn decode_constructed(
    bs: &mut BitStream<'_>,
    desc: &Descriptor,
    field: Option<&Field>,
    arena: &mut dyn Arena,
) -> Result<Value> {
    if desc.is_seq_of {
        let field = field
            .ok_or_else(|| Error::new(ErrorKind::NotImplemented("top-level SEQUENCE OF"), bs.pos()))?;
        return decode_seq_of(bs, desc, field, arena);
    }
    match desc.kind {
        DescriptorKind::Sequence => decode_sequence(bs, desc, arena),
        DescriptorKind::Choice => decode_choice(bs, desc, arena),
        DescriptorKind::Set => Err(Error::new(ErrorKind::NotImplemented("ASN.1 SET"), bs.pos())),
    }
}

fn read_ext_bitmap<'a>(bs: &mut BitStream<'a>) -> Result<BitStream<'a>> {
    // a zero-length bitmap is impossible, so "n - 1" is on the wire
    let len = read_nsnnwn(bs)?.saturating_add(1);
    let bitmap = bs.take_bits(len)?;
    trace!("extension bitmap ({len} bits)");
    Ok(bitmap)
}

fn decode_sequence(bs: &mut BitStream<'_>, desc: &Descriptor, arena: &mut dyn Arena) -> Result<Value> {
    let extension_present = desc.is_extended && bs.get_bit()?;
    if extension_present {
        trace!("the sequence is extended, extension present");
    }

    let mut opt_bitmap = bs.take_bits(desc.opt_fields.len())?;
    let mut ext_bitmap: Option<BitStream<'_>> = None;
    let mut ext_reached = false;
    let mut slots: Vec<Option<Value>> = Vec::with_capacity(desc.fields.len());

    for field in &desc.fields {
        if field.is_extension && !ext_reached {
            ext_reached = true;
            if extension_present {
                ext_bitmap = Some(read_ext_bitmap(bs)?);
            }
        }

        if field.mode == FieldMode::Optional {
            let present = if field.is_extension {
                // absent when the extension itself is absent or the received
                // bitmap stops before this addition
                match ext_bitmap.as_mut() {
                    Some(bitmap) if !bitmap.is_empty() => bitmap.take(1) != 0,
                    _ => false,
                }
            } else {
                opt_bitmap.take(1) != 0
            };
            if !present {
                trace!("field `{}` not present", field.name);
                slots.push(None);
                continue;
            }
        }

        trace!("decoding SEQUENCE value {}", field.name);
        let v = decode_field(bs, field, arena).map_err(|e| e.in_field(&field.name))?;
        slots.push(Some(v));
    }

    if extension_present {
        let mut bitmap = match ext_bitmap {
            Some(bitmap) => bitmap,
            // extended type without any known addition: the bitmap is still
            // on the wire
            None => read_ext_bitmap(bs)?,
        };
        while !bitmap.is_empty() {
            if bitmap.take(1) == 0 {
                trace!("skipping unknown extension (absent)");
                continue;
            }
            let skipped = scalar::decode_octet_string(bs, None, arena)?;
            trace!("skipped unknown extension ({} octets)", skipped.len());
        }
    }

    Ok(Value::Sequence(slots))
}

fn decode_choice(bs: &mut BitStream<'_>, desc: &Descriptor, arena: &mut dyn Arena) -> Result<Value> {
    let extension_present = desc.is_extended && bs.get_bit()?;

    let index = if extension_present {
        let n = read_nsnnwn(bs)?;
        match n.checked_add(desc.ext_pos) {
            Some(index) if index < desc.fields.len() => index,
            _ => return Err(Error::new(ErrorKind::InvalidChoiceIndex(n), bs.pos())),
        }
    } else {
        let d = read_number(bs, Some(&desc.choice_info))?;
        let index = d as usize + 1;
        if index >= desc.fields.len() || index >= desc.ext_pos {
            return Err(Error::new(ErrorKind::InvalidChoiceIndex(index), bs.pos()));
        }
        index
    };
    trace!("decoded choice index (index = {index})");

    let field = &desc.fields[index];
    let v = decode_field(bs, field, arena).map_err(|e| e.in_field(&field.name))?;
    Ok(Value::Choice(index, Box::new(v)))
}

fn decode_seq_of(
    bs: &mut BitStream<'_>,
    desc: &Descriptor,
    field: &Field,
    arena: &mut dyn Arena,
) -> Result<Value> {
    let repeated = &desc.fields[0];
    debug_assert!(repeated.mode == FieldMode::SeqOf);

    let mut dec = LenDecoder::begin(bs, field.seq_of_info.as_ref())?;
    let mut items = Vec::new();
    loop {
        let n = dec.next(bs)?;
        trace!("decoded element count of SEQUENCE OF {} (n = {n}, total = {})", repeated.name, dec.cumulated());
        items.reserve(n.min(FRAG_64K));
        for _ in 0..n {
            let v = decode_field(bs, repeated, arena)
                .map_err(|e| e.in_field(&format!("{}[{}]", repeated.name, items.len())))?;
            items.push(v);
        }
        if !dec.more() {
            break;
        }
    }
    Ok(Value::SeqOf(items))
}

fn decode_field(bs: &mut BitStream<'_>, field: &Field, arena: &mut dyn Arena) -> Result<Value> {
    if field.is_open_type || field.is_extension {
        let envelope = scalar::decode_octet_string(bs, None, arena)?;
        debug!("open type envelope for {} ({} octets)", field.name, envelope.len());
        let mut open = BitStream::new(&envelope);
        return decode_value(&mut open, field, arena);
    }
    decode_value(bs, field, arena)
}

fn decode_value(bs: &mut BitStream<'_>, field: &Field, arena: &mut dyn Arena) -> Result<Value> {
    match field.ftype {
        FieldType::Bool => scalar::decode_bool(bs).map(Value::Bool),
        FieldType::I8 | FieldType::I16 | FieldType::I32 | FieldType::I64 => {
            let n = decode_number(bs, &field.int_info, true)?;
            if !signed_fits(n, field.ftype) {
                return Err(Error::new(ErrorKind::ConstraintViolation, bs.pos()));
            }
            trace!("decoded number value (n = {n})");
            Ok(Value::Signed(n))
        }
        FieldType::U8 | FieldType::U16 | FieldType::U32 | FieldType::U64 => {
            let n = decode_number(bs, &field.int_info, false)? as u64;
            if !unsigned_fits(n, field.ftype) {
                return Err(Error::new(ErrorKind::ConstraintViolation, bs.pos()));
            }
            trace!("decoded number value (n = {n})");
            Ok(Value::Unsigned(n))
        }
        FieldType::Enum => {
            let info = field
                .enum_info
                .as_deref()
                .ok_or_else(|| Error::new(ErrorKind::NotImplemented("enum field without values"), bs.pos()))?;
            scalar::decode_enum(bs, info).map(Value::Enum)
        }
        FieldType::Null | FieldType::OptNull => Ok(Value::Null),
        FieldType::OctetString => {
            scalar::decode_octet_string(bs, field.str_info.as_ref(), arena).map(Value::OctetString)
        }
        FieldType::BitString => {
            scalar::decode_bit_string(bs, field.str_info.as_ref(), arena).map(Value::BitString)
        }
        FieldType::Sequence | FieldType::Choice | FieldType::UntaggedChoice => {
            let sub = field
                .sub
                .as_deref()
                .ok_or_else(|| Error::new(ErrorKind::NotImplemented("constructed field without descriptor"), bs.pos()))?;
            decode_constructed(bs, sub, Some(field), arena)
        }
        FieldType::Opaque => match &field.opaque {
            Some(cb) => (cb.unpack)(bs, arena),
            None => Err(Error::new(ErrorKind::NotImplemented("opaque field without callbacks"), bs.pos())),
        },
        FieldType::Skip => Err(Error::new(ErrorKind::NotImplemented("skip field"), bs.pos())),
        FieldType::OpenType => Err(Error::new(ErrorKind::NotImplemented("standalone open type"), bs.pos())),
        FieldType::ExtValue => Err(Error::new(ErrorKind::NotImplemented("ext value field"), bs.pos())),
    }
}

/* Size estimation */

const ALIGN_SLACK: usize = 7;
const DETERMINANT_SLACK: usize = ALIGN_SLACK + 16;
const NUMBER_BOUND: usize = 1 + DETERMINANT_SLACK + ALIGN_SLACK + 9 * 8;

fn string_overhead(units: usize) -> usize {
    // extension bit, one determinant per fragment plus the remainder, each
    // with its alignment slack
    1 + (units / FRAG_64K + 2) * DETERMINANT_SLACK
}

pub(crate) fn size_constructed(value: &Value, desc: &Descriptor, field: Option<&Field>) -> Result<usize> {
    if desc.is_seq_of {
        let field = field.ok_or_else(|| Error::new(ErrorKind::NotImplemented("top-level SEQUENCE OF"), 0))?;
        let items = value.as_seq_of().ok_or_else(|| mismatch("sequence of", 0))?;
        let mut bits = string_overhead(items.len());
        for item in items {
            bits += size_field(item, &desc.fields[0])?;
        }
        return Ok(bits);
    }
    match desc.kind {
        DescriptorKind::Sequence => {
            let slots = value.as_sequence().ok_or_else(|| mismatch("sequence", 0))?;
            if slots.len() != desc.fields.len() {
                return Err(mismatch("sequence with one slot per field", 0));
            }
            let mut bits = 1 + desc.opt_fields.len();
            if desc.is_extended {
                bits += NUMBER_BOUND + (desc.fields.len() - desc.ext_pos);
            }
            for (slot, field) in slots.iter().zip(&desc.fields) {
                if let Some(v) = slot {
                    bits += size_field(v, field)?;
                }
            }
            Ok(bits)
        }
        DescriptorKind::Choice => {
            let (index, payload) = value.as_choice().ok_or_else(|| mismatch("choice", 0))?;
            if index == 0 || index >= desc.fields.len() {
                return Err(Error::new(ErrorKind::InvalidChoiceIndex(index), 0));
            }
            Ok(1 + NUMBER_BOUND + size_field(payload, &desc.fields[index])?)
        }
        DescriptorKind::Set => Err(Error::new(ErrorKind::NotImplemented("ASN.1 SET"), 0)),
    }
}

fn size_field(value: &Value, field: &Field) -> Result<usize> {
    let inner = size_value(value, field)?;
    if field.is_open_type || field.is_extension {
        let octets = inner.div_ceil(8).max(1);
        return Ok(string_overhead(octets) + octets * 8);
    }
    Ok(inner)
}

fn size_value(value: &Value, field: &Field) -> Result<usize> {
    match field.ftype {
        FieldType::Bool => Ok(1),
        FieldType::I8
        | FieldType::I16
        | FieldType::I32
        | FieldType::I64
        | FieldType::U8
        | FieldType::U16
        | FieldType::U32
        | FieldType::U64
        | FieldType::Enum => Ok(NUMBER_BOUND),
        FieldType::Null | FieldType::OptNull => Ok(0),
        FieldType::OctetString => {
            let bytes = value.as_bytes().ok_or_else(|| mismatch("octet string", 0))?;
            Ok(string_overhead(bytes.len()) + bytes.len() * 8)
        }
        FieldType::BitString => {
            let bits = value.as_bit_string().ok_or_else(|| mismatch("bit string", 0))?;
            Ok(string_overhead(bits.bit_len()) + bits.bit_len())
        }
        FieldType::Sequence | FieldType::Choice | FieldType::UntaggedChoice => {
            let sub = field
                .sub
                .as_deref()
                .ok_or_else(|| Error::new(ErrorKind::NotImplemented("constructed field without descriptor"), 0))?;
            size_constructed(value, sub, Some(field))
        }
        FieldType::Opaque => match &field.opaque {
            Some(cb) => Ok((cb.pack_size)(value)),
            None => Err(Error::new(ErrorKind::NotImplemented("opaque field without callbacks"), 0)),
        },
        FieldType::Skip => Err(Error::new(ErrorKind::NotImplemented("skip field"), 0)),
        FieldType::OpenType => Err(Error::new(ErrorKind::NotImplemented("standalone open type"), 0)),
        FieldType::ExtValue => Err(Error::new(ErrorKind::NotImplemented("ext value field"), 0)),
    }
}
