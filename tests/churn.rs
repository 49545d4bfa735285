//! Deterministic churn: random add/remove/update traffic checked against an
//! in-memory reference model, with the space-conservation invariant
//! (live bytes + free bytes == data file length) verified along the way.

use anyhow::{bail, Result};
use oorandom::Rand64;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use weftdb::store::Storage;
use weftdb::{codec, Config, Database, FieldDef, FieldKind, Model, Value};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Note {
    id: i64,
    body: String,
    payload: Vec<u8>,
}

static NOTE_FIELDS: [FieldDef<Note>; 3] = [
    FieldDef {
        name: "Id",
        kind: FieldKind::Int,
        primary_key: true,
        get: |m| Some(Value::Int(m.id)),
        set: |m, v| match v {
            Value::Int(k) => {
                m.id = k;
                Ok(())
            }
            other => bail!("Id expects an integer, got {:?}", other),
        },
    },
    FieldDef {
        name: "Body",
        kind: FieldKind::Text,
        primary_key: false,
        get: |m| Some(Value::Text(m.body.clone())),
        set: |m, v| match v {
            Value::Text(s) => {
                m.body = s;
                Ok(())
            }
            other => bail!("Body expects text, got {:?}", other),
        },
    },
    FieldDef {
        name: "Payload",
        kind: FieldKind::Bytes,
        primary_key: false,
        get: |m| Some(Value::Bytes(m.payload.clone())),
        set: |m, v| match v {
            Value::Bytes(b) => {
                m.payload = b;
                Ok(())
            }
            other => bail!("Payload expects bytes, got {:?}", other),
        },
    },
];

impl Model for Note {
    const NAME: &'static str = "note";
    fn fields() -> &'static [FieldDef<Self>] {
        &NOTE_FIELDS
    }
}

fn unique_base(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("weft-churn-{prefix}-{pid}-{t}"));
    fs::create_dir_all(&dir).unwrap();
    dir.join("store")
}

fn note(rng: &mut Rand64) -> Note {
    let body_len = (rng.rand_u64() % 60) as usize;
    let payload_len = (rng.rand_u64() % 40) as usize;
    let mut body = String::new();
    for _ in 0..body_len {
        // mix in tabs to exercise the escape path
        let c = match rng.rand_u64() % 12 {
            0 => '\t',
            n => (b'a' + n as u8) as char,
        };
        body.push(c);
    }
    let mut payload = Vec::with_capacity(payload_len);
    for _ in 0..payload_len {
        payload.push((rng.rand_u64() & 0xFF) as u8);
    }
    Note {
        id: 0,
        body,
        payload,
    }
}

fn assert_conserved(storage: &Storage, reference: &HashMap<i64, Note>) -> Result<()> {
    let free: i64 = storage.free_blocks()?.iter().map(|p| p.length as i64).sum();
    let mut live = 0i64;
    for m in reference.values() {
        live += codec::encode(m)?.len() as i64;
    }
    assert_eq!(
        storage.data_len()?,
        free + live,
        "conservation violated: every byte is live or free"
    );

    let mut blocks = storage.free_blocks()?;
    blocks.sort_by_key(|p| p.position);
    for w in blocks.windows(2) {
        assert_ne!(w[0].end(), w[1].position, "free blocks left adjacent");
    }
    Ok(())
}

#[test]
fn churn_against_reference_model() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let base = unique_base("mixed");
    let db = Database::open(&base)?;
    let notes = db.record_set::<Note>()?;
    let storage = Storage::open(&base, &Config::default())?;

    let mut rng = Rand64::new(0x5EED_CAFE_0042_1337);
    let mut reference: HashMap<i64, Note> = HashMap::new();

    for step in 0..400 {
        match rng.rand_u64() % 10 {
            // add
            0..=5 => {
                let mut m = note(&mut rng);
                let key = notes.add(&mut m)?;
                assert!(
                    reference.insert(key, m).is_none(),
                    "allocator handed out a live key"
                );
            }
            // remove a random live record
            6..=7 => {
                if let Some(&key) = reference.keys().next() {
                    assert!(notes.remove(key)?);
                    reference.remove(&key);
                }
            }
            // update a random live record with new content
            _ => {
                if let Some(&key) = reference.keys().next() {
                    let mut m = note(&mut rng);
                    m.id = key;
                    assert!(notes.update(&m)?);
                    reference.insert(key, m);
                }
            }
        }

        if step % 25 == 0 {
            assert_conserved(&storage, &reference)?;
        }
    }

    assert_conserved(&storage, &reference)?;

    // Final sweep: the store and the reference agree record by record.
    let mut all = notes.all()?;
    all.sort_by_key(|m| m.id);
    let mut expect: Vec<Note> = reference.values().cloned().collect();
    expect.sort_by_key(|m| m.id);
    assert_eq!(all, expect);

    for (key, m) in &reference {
        assert_eq!(notes.find(*key)?.as_ref(), Some(m));
    }

    // Drain everything: the data file and the side file both reset.
    let keys: Vec<i64> = reference.keys().copied().collect();
    for key in keys {
        assert!(notes.remove(key)?);
    }
    assert_eq!(storage.data_len()?, 0);
    assert!(storage.free_blocks()?.is_empty());
    assert_eq!(notes.all()?.len(), 0);

    Ok(())
}
