//! Record codec: typed model <-> obfuscated, tag-delimited bytes.
//!
//! Wire form: for every field whose getter yields a value,
//! `<db.FieldName>value`, fields joined by a single tab. Literal tabs in
//! text values are escaped to `<db.break/>` before joining; byte arrays are
//! base64; enum values are stored by variant name. The UTF-8 bytes are then
//! XOR-scrambled with a repeating 4-byte key: reversible obfuscation, not
//! encryption.
//!
//! Field enumeration is descriptor-driven: each model registers a static
//! list of `FieldDef`s (name, kind, accessors) once, and the codec matches
//! on the closed `FieldKind` set instead of inspecting runtime types.
//! Unknown field names in stored data are skipped on decode, which is what
//! lets old data survive schema growth.

use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::consts::{FIELD_SEP, TAB_BREAK, TAG_CLOSE, TAG_OPEN, XOR_KEY};

/// The closed set of storable field kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// 64-bit signed integer.
    Int,
    /// UTF-8 text; may contain tabs (escaped on the wire).
    Text,
    /// Raw bytes, base64 on the wire.
    Bytes,
    /// Closed variant set, stored by name.
    Enum(&'static [&'static str]),
}

/// A field's value in transit between a model and the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
    Variant(&'static str),
}

/// One registered field of a model: its wire name, kind, and accessors.
/// A getter returning `None` means "unset" and the field is skipped on
/// encode (its `Default` survives a decode round-trip).
#[derive(Debug)]
pub struct FieldDef<M> {
    pub name: &'static str,
    pub kind: FieldKind,
    pub primary_key: bool,
    pub get: fn(&M) -> Option<Value>,
    pub set: fn(&mut M, Value) -> Result<()>,
}

/// A storable record type. `NAME` names the index file
/// (`<base>-<lowercase NAME>`); `fields()` is built once per type, not per
/// call.
pub trait Model: Default + 'static {
    const NAME: &'static str;
    fn fields() -> &'static [FieldDef<Self>]
    where
        Self: Sized;
}

/// XOR every byte with the repeating 4-byte key. Self-inverse.
pub fn xor_in_place(data: &mut [u8]) {
    for (i, b) in data.iter_mut().enumerate() {
        *b ^= XOR_KEY[i % XOR_KEY.len()];
    }
}

/// Serialize a model to its obfuscated wire bytes.
pub fn encode<M: Model>(model: &M) -> Result<Vec<u8>> {
    let mut out = String::new();
    for field in M::fields() {
        let Some(value) = (field.get)(model) else {
            continue;
        };
        let text = render(field.name, field.kind, value)?;
        if !out.is_empty() {
            out.push(FIELD_SEP);
        }
        out.push_str(TAG_OPEN);
        out.push_str(field.name);
        out.push(TAG_CLOSE);
        out.push_str(&text);
    }

    let mut bytes = out.into_bytes();
    xor_in_place(&mut bytes);
    Ok(bytes)
}

/// Deserialize wire bytes back into a model. Fields absent from the data
/// keep their defaults; field names the model does not know are skipped.
pub fn decode<M: Model>(data: &[u8]) -> Result<M> {
    let mut bytes = data.to_vec();
    xor_in_place(&mut bytes);
    let text = String::from_utf8(bytes).context("record payload is not valid UTF-8")?;

    let mut model = M::default();
    for piece in text.split(FIELD_SEP) {
        let Some(rest) = piece.strip_prefix(TAG_OPEN) else {
            continue;
        };
        let Some(gt) = rest.find(TAG_CLOSE) else {
            continue;
        };
        let (name, raw) = (&rest[..gt], &rest[gt + 1..]);
        let Some(field) = M::fields().iter().find(|f| f.name == name) else {
            continue;
        };
        let value = parse(name, field.kind, raw)?;
        (field.set)(&mut model, value)?;
    }
    Ok(model)
}

/// The single primary-key descriptor of a model. Exactly one field must be
/// flagged, and it must be a 64-bit integer; validated once at record-set
/// construction.
pub fn primary_key_field<M: Model>() -> Result<&'static FieldDef<M>> {
    let mut flagged = M::fields().iter().filter(|f| f.primary_key);

    let pk = flagged
        .next()
        .ok_or_else(|| anyhow!("model {} has no primary key field", M::NAME))?;
    if flagged.next().is_some() {
        bail!("model {} declares more than one primary key", M::NAME);
    }
    if pk.kind != FieldKind::Int {
        bail!(
            "primary key {} of model {} must be a 64-bit integer",
            pk.name,
            M::NAME
        );
    }
    Ok(pk)
}

fn render(name: &str, kind: FieldKind, value: Value) -> Result<String> {
    Ok(match (kind, value) {
        (FieldKind::Int, Value::Int(v)) => v.to_string(),
        (FieldKind::Text, Value::Text(s)) => s.replace('\t', TAB_BREAK),
        (FieldKind::Bytes, Value::Bytes(b)) => BASE64.encode(b),
        (FieldKind::Enum(_), Value::Variant(v)) => v.to_string(),
        (kind, value) => bail!(
            "field {} is declared {:?} but its getter produced {:?}",
            name,
            kind,
            value
        ),
    })
}

fn parse(name: &str, kind: FieldKind, raw: &str) -> Result<Value> {
    Ok(match kind {
        FieldKind::Int => Value::Int(
            raw.parse()
                .with_context(|| format!("field {} is not an integer: {:?}", name, raw))?,
        ),
        FieldKind::Text => Value::Text(raw.replace(TAB_BREAK, "\t")),
        FieldKind::Bytes => Value::Bytes(
            BASE64
                .decode(raw)
                .with_context(|| format!("field {} is not valid base64", name))?,
        ),
        FieldKind::Enum(variants) => {
            let v = variants
                .iter()
                .find(|v| **v == raw)
                .ok_or_else(|| anyhow!("unknown variant {:?} for field {}", raw, name))?;
            Value::Variant(v)
        }
    })
}
