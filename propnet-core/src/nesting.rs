//! Conversion between flat and nested section maps
//!
//! Endpoints speak flat maps keyed by full name (`s/onof/v`). Over the wire a
//! section is represented nested by trait (`{"onof": {"v": true}}`).

use serde_json::{Map, Value};

use crate::endpoint::PropertyMap;
use crate::error::{PropertyError, Result};
use crate::key::Section;

/// Re-nest a flat section map into `trait → {prop → value}` form
///
/// Names without a trait component are kept as top-level scalars. Names that
/// belong to another section are skipped.
pub fn uncollapse_section(flat: &PropertyMap, section: Section) -> Map<String, Value> {
    let mut nested = Map::new();

    for (name, value) in flat {
        if !section.contains(name) {
            continue;
        }
        let rest = &name[section.tag().len() + 1..];

        match rest.split_once('/') {
            Some((trait_id, prop_id)) => {
                let entry = nested
                    .entry(trait_id.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(props) = entry {
                    props.insert(prop_id.to_string(), value.clone());
                }
            }
            None => {
                nested.insert(rest.to_string(), value.clone());
            }
        }
    }

    nested
}

/// Flatten a nested section map into full-name form
///
/// Object values are treated as traits. Scalar values are accepted only when
/// their key is already a `trait/prop` path.
pub fn collapse_section(nested: &Map<String, Value>, section: Section) -> Result<PropertyMap> {
    let mut flat = PropertyMap::new();

    for (key, value) in nested {
        match value {
            Value::Object(props) => {
                for (prop_id, prop_value) in props {
                    flat.insert(
                        format!("{}/{}/{}", section.tag(), key, prop_id),
                        prop_value.clone(),
                    );
                }
            }
            _ if key.contains('/') => {
                flat.insert(format!("{}/{}", section.tag(), key), value.clone());
            }
            _ => {
                return Err(PropertyError::InvalidValue(format!(
                    "Expected a map of properties for trait \"{key}\""
                )));
            }
        }
    }

    Ok(flat)
}
