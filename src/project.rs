//! Human-readable frame projection.
//!
//! Resolves the numeric identifiers a frame uses internally (class
//! indices, field positions, trait keys, pointer targets) into names, and
//! folds per-item data into the store layout, producing one structure fit
//! for debugging dumps.
//!
//! The projector exists for diagnosing malformed streams, so it never fails
//! on a dangling index: a store whose class is missing gets a
//! `??MissingType=<n>` placeholder, an item key with no field definition a
//! `??MissingField=<n>` one, and so on.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::constants::{IS_COLLECTION, IS_SELF_POINTER, IS_SLICE, NAME, POINTER_TO};
use crate::error::Result;
use crate::frame::{FieldDef, RawFrame, StoreDef, Value};

/// Options controlling a projection.
#[derive(Debug, Clone, Default)]
pub struct ProjectOptions {
    /// Annotate every item (and the frame itself, when `ordinal` is given)
    /// with a `#` ordinal field.
    pub numbered: bool,
    /// Omit all per-item data, leaving only class/store/field metadata.
    pub headers_only: bool,
    /// The frame's position within its stream, shown when `numbered`.
    pub ordinal: Option<u64>,
}

/// One projected item: field names mapped to their values.
pub type ItemView = BTreeMap<String, Value>;

/// The human-readable view of one frame.
#[derive(Debug, Serialize)]
pub struct DocView {
    /// Wire format revision of the source frame.
    pub version: u32,
    /// Frame ordinal, present in numbered mode when the caller supplied one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ordinal: Option<u64>,
    /// The document-level record, resolved against class 0. Absent in
    /// headers-only mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ItemView>,
    /// One entry per store, in store order.
    pub stores: Vec<StoreView>,
}

/// The projected view of one store.
#[derive(Debug, Serialize)]
pub struct StoreView {
    /// Store name.
    pub name: String,
    /// Resolved class name, or a `??MissingType=<n>` placeholder.
    pub klass: String,
    /// Declared item count.
    pub count: u64,
    /// The class's fields with readable trait names.
    pub fields: Vec<FieldView>,
    /// Per-item data; absent in headers-only mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<ItemView>>,
}

/// One field definition with its traits resolved to readable names.
#[derive(Debug, Serialize)]
pub struct FieldView {
    /// Field name, or a placeholder when the definition carries none.
    pub name: String,
    /// Readable trait map; unknown trait keys keep their numeric form.
    pub traits: BTreeMap<String, Value>,
}

/// Builds a human-readable view of `frame`. Non-destructive: sections are
/// decoded (and cached) but never mutated.
pub fn project(frame: &mut RawFrame, opts: &ProjectOptions) -> Result<DocView> {
    let meta = if opts.headers_only {
        None
    } else {
        let fields: &[FieldDef] = frame
            .klasses
            .first()
            .map(|k| k.fields.as_slice())
            .unwrap_or(&[]);
        let mut item = item_view(frame.doc.decoded()?, fields);
        if opts.numbered {
            if let Some(n) = opts.ordinal {
                item.insert("#".into(), Value::from(n));
            }
        }
        Some(item)
    };

    let mut stores = Vec::with_capacity(frame.stores.len());
    for i in 0..frame.stores.len() {
        let store = frame.stores[i].clone();
        let (klass, fields) = match frame.klasses.get(store.klass) {
            Some(k) => (k.name.clone(), k.fields.clone()),
            // Robustness to broken data.
            None => (format!("??MissingType={}", store.klass), Vec::new()),
        };
        let field_views = fields.iter().map(|f| field_view(f, &frame.stores)).collect();

        let items = if opts.headers_only {
            None
        } else {
            let mut list = match frame.store_payloads.get_mut(i) {
                None => Vec::new(),
                Some(section) => match section.decoded()? {
                    single @ Value::Map(_) => vec![item_view(single, &fields)],
                    Value::Array(elems) => {
                        elems.iter().map(|e| item_view(e, &fields)).collect()
                    }
                    _ => Vec::new(),
                },
            };
            if opts.numbered {
                for (j, item) in list.iter_mut().enumerate() {
                    item.insert("#".into(), Value::from(j as u64));
                }
            }
            Some(list)
        };

        stores.push(StoreView {
            name: store.name,
            klass,
            count: store.count,
            fields: field_views,
            items,
        });
    }

    Ok(DocView {
        version: frame.version,
        ordinal: if opts.numbered { opts.ordinal } else { None },
        meta,
        stores,
    })
}

/// Maps an item's numeric field keys to field names.
fn item_view(item: &Value, fields: &[FieldDef]) -> ItemView {
    let mut view = ItemView::new();
    let entries = match item {
        Value::Map(entries) => entries,
        _ => return view,
    };
    for (key, value) in entries {
        let name = match key.as_u64() {
            Some(fnum) => fields
                .get(fnum as usize)
                .and_then(FieldDef::name)
                .map(str::to_owned)
                .unwrap_or_else(|| format!("??MissingField={fnum}")),
            None => format!("??BadKey={key}"),
        };
        view.insert(name, value.clone());
    }
    view
}

/// Resolves one field definition's traits to readable names, including the
/// pointed-to store's name for `POINTER_TO`.
fn field_view(field: &FieldDef, stores: &[StoreDef]) -> FieldView {
    let mut traits = BTreeMap::new();
    for (key, value) in field.entries() {
        match *key {
            NAME => {}
            POINTER_TO => {
                let target = value
                    .as_u64()
                    .and_then(|i| stores.get(i as usize))
                    .map(|s| Value::from(s.name.as_str()))
                    .unwrap_or_else(|| Value::from(format!("??MissingStore={value}")));
                traits.insert("points to".into(), target);
            }
            IS_SLICE => {
                traits.insert("is slice".into(), value.clone());
            }
            IS_SELF_POINTER => {
                traits.insert("is self-pointer".into(), value.clone());
            }
            IS_COLLECTION => {
                traits.insert("is collection".into(), value.clone());
            }
            other => {
                traits.insert(other.to_string(), value.clone());
            }
        }
    }
    FieldView {
        name: field
            .name()
            .map(str::to_owned)
            .unwrap_or_else(|| "??MissingName".into()),
        traits,
    }
}

impl fmt::Display for DocView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "=== FRAME v{}", self.version)?;
        if let Some(n) = self.ordinal {
            write!(f, " #{n}")?;
        }
        writeln!(f, " ===")?;
        if let Some(meta) = &self.meta {
            writeln!(f, "__meta__:")?;
            for (name, value) in meta {
                writeln!(f, "    {name}: {value}")?;
            }
        }
        for (i, store) in self.stores.iter().enumerate() {
            let last = i == self.stores.len() - 1;
            let connector = if last { "└── " } else { "├── " };
            let prefix = if last { "    " } else { "│   " };
            writeln!(
                f,
                "{}{} [{}] count={}",
                connector, store.name, store.klass, store.count
            )?;
            for field in &store.fields {
                write!(f, "{}field {}", prefix, field.name)?;
                for (trait_name, value) in &field.traits {
                    write!(f, " | {trait_name}: {value}")?;
                }
                writeln!(f)?;
            }
            if let Some(items) = &store.items {
                for (j, item) in items.iter().enumerate() {
                    let rendered: Vec<String> =
                        item.iter().map(|(k, v)| format!("{k}: {v}")).collect();
                    writeln!(f, "{}[{}] {{{}}}", prefix, j, rendered.join(", "))?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::constants::IS_SLICE;
    use crate::frame::{ClassDef, Section};

    fn annotated_frame() -> RawFrame {
        let mut meta = ClassDef::new("__meta__");
        meta.fields.push(FieldDef::named("name"));

        let mut token = ClassDef::new("Token");
        let mut span = FieldDef::named("span");
        span.set(IS_SLICE, Value::Nil);
        token.fields.push(span);

        let mut sentence = ClassDef::new("Sentence");
        let mut field = FieldDef::named("tokens");
        field.set(POINTER_TO, Value::from(0u64));
        sentence.fields.push(field);

        RawFrame {
            version: 3,
            klasses: vec![meta, token, sentence],
            stores: vec![
                StoreDef {
                    name: "tokens".into(),
                    klass: 1,
                    count: 2,
                },
                StoreDef {
                    name: "sentences".into(),
                    klass: 2,
                    count: 1,
                },
            ],
            doc: Section::from_value(Value::Map(vec![(
                Value::from(0u64),
                Value::from("doc-1"),
            )])),
            store_payloads: vec![
                Section::from_value(Value::Array(vec![
                    Value::Map(vec![(
                        Value::from(0u64),
                        Value::Array(vec![Value::from(0u64), Value::from(4u64)]),
                    )]),
                    Value::Map(vec![(
                        Value::from(0u64),
                        Value::Array(vec![Value::from(5u64), Value::from(4u64)]),
                    )]),
                ])),
                Section::from_value(Value::Map(vec![(
                    Value::from(0u64),
                    Value::Array(vec![Value::from(0u64), Value::from(2u64)]),
                )])),
            ],
        }
    }

    #[test]
    fn resolves_names_and_pointer_targets() {
        let mut frame = annotated_frame();
        let view = project(&mut frame, &ProjectOptions::default()).unwrap();

        assert_eq!(view.version, 3);
        assert_eq!(view.meta.as_ref().unwrap()["name"], Value::from("doc-1"));

        let tokens = &view.stores[0];
        assert_eq!(tokens.klass, "Token");
        assert_eq!(tokens.fields[0].name, "span");
        assert_eq!(tokens.fields[0].traits["is slice"], Value::Nil);
        assert_eq!(tokens.items.as_ref().unwrap().len(), 2);

        let sentences = &view.stores[1];
        assert_eq!(
            sentences.fields[0].traits["points to"],
            Value::from("tokens")
        );
        // The single unwrapped item still projects.
        assert_eq!(sentences.items.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn missing_class_gets_a_placeholder() {
        let mut frame = annotated_frame();
        frame.stores[0].klass = 9;
        let view = project(&mut frame, &ProjectOptions::default()).unwrap();
        assert_eq!(view.stores[0].klass, "??MissingType=9");
        // Items survive with placeholder field names.
        let items = view.stores[0].items.as_ref().unwrap();
        assert!(items[0].contains_key("??MissingField=0"));
    }

    #[test]
    fn missing_pointer_store_gets_a_placeholder() {
        let mut frame = annotated_frame();
        frame.klasses[2].fields[0].set(POINTER_TO, Value::from(7u64));
        let view = project(&mut frame, &ProjectOptions::default()).unwrap();
        assert_eq!(
            view.stores[1].fields[0].traits["points to"],
            Value::from("??MissingStore=7")
        );
    }

    #[test]
    fn numbered_mode_adds_ordinals() {
        let mut frame = annotated_frame();
        let opts = ProjectOptions {
            numbered: true,
            ordinal: Some(4),
            ..Default::default()
        };
        let view = project(&mut frame, &opts).unwrap();
        assert_eq!(view.ordinal, Some(4));
        assert_eq!(view.meta.as_ref().unwrap()["#"], Value::from(4u64));
        let items = view.stores[0].items.as_ref().unwrap();
        assert_eq!(items[0]["#"], Value::from(0u64));
        assert_eq!(items[1]["#"], Value::from(1u64));
    }

    #[test]
    fn headers_only_omits_item_data() {
        let mut frame = annotated_frame();
        let opts = ProjectOptions {
            headers_only: true,
            ..Default::default()
        };
        let view = project(&mut frame, &opts).unwrap();
        assert!(view.meta.is_none());
        assert!(view.stores.iter().all(|s| s.items.is_none()));
        // Metadata is still fully resolved.
        assert_eq!(
            view.stores[1].fields[0].traits["points to"],
            Value::from("tokens")
        );
    }

    #[test]
    fn view_serializes_to_json() {
        let mut frame = annotated_frame();
        let view = project(&mut frame, &ProjectOptions::default()).unwrap();
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["stores"][0]["name"], "tokens");
        assert_eq!(json["stores"][0]["klass"], "Token");
    }

    #[test]
    fn display_renders_a_tree() {
        let mut frame = annotated_frame();
        let view = project(&mut frame, &ProjectOptions::default()).unwrap();
        let text = view.to_string();
        assert!(text.contains("=== FRAME v3 ==="));
        assert!(text.contains("├── tokens [Token] count=2"));
        assert!(text.contains("└── sentences [Sentence] count=1"));
    }
}
