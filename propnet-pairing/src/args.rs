//! Pairing creation arguments

use std::collections::BTreeMap;
use std::fmt;

use propnet_core::{PropertyKey, PropertyMap};
use serde_json::Value;

use crate::error::{PairingError, Result};
use crate::pairing::schema;

/// A creation parameter
///
/// The declaration order is the order in which parameters are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Param {
    Push,
    Pull,
    Source,
    Destination,
    ForwardTransform,
    ReverseTransform,
    Enabled,
}

impl Param {
    pub const ALL: [Param; 7] = [
        Param::Push,
        Param::Pull,
        Param::Source,
        Param::Destination,
        Param::ForwardTransform,
        Param::ReverseTransform,
        Param::Enabled,
    ];

    /// Name used in argument maps
    pub fn name(&self) -> &'static str {
        match self {
            Param::Push => "push",
            Param::Pull => "pull",
            Param::Source => "src",
            Param::Destination => "dst",
            Param::ForwardTransform => "xfwd",
            Param::ReverseTransform => "xrev",
            Param::Enabled => "en",
        }
    }

    pub fn from_name(name: &str) -> Option<Param> {
        Param::ALL.into_iter().find(|p| p.name() == name)
    }

    /// Pairing property the parameter is applied to
    pub fn key(&self) -> PropertyKey {
        match self {
            Param::Push => schema::push(),
            Param::Pull => schema::pull(),
            Param::Source => schema::source(),
            Param::Destination => schema::destination(),
            Param::ForwardTransform => schema::forward_transform(),
            Param::ReverseTransform => schema::reverse_transform(),
            Param::Enabled => schema::enabled(),
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Optional configuration for a new pairing
///
/// Values are not validated here; validation happens when each one is set on
/// the new pairing, so a bad value rolls the whole creation back.
///
/// # Example
///
/// ```rust
/// use propnet_pairing::{CreateArgs, Param};
///
/// let args = CreateArgs::new()
///     .source("/1/s/onof/v")
///     .destination("/2/s/onof/v")
///     .push(true)
///     .enabled(true);
///
/// let order: Vec<Param> = args.iter().map(|(p, _)| p).collect();
/// assert_eq!(order, vec![Param::Push, Param::Source, Param::Destination, Param::Enabled]);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateArgs {
    params: BTreeMap<Param, Value>,
}

impl CreateArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an argument map keyed by parameter name
    pub fn from_map(map: &PropertyMap) -> Result<Self> {
        let mut args = Self::new();
        for (name, value) in map {
            let param = Param::from_name(name).ok_or_else(|| PairingError::InvalidArguments {
                param: name.clone(),
                message: "unknown parameter".to_string(),
            })?;
            args.params.insert(param, value.clone());
        }
        Ok(args)
    }

    /// Set a raw parameter value
    pub fn with(mut self, param: Param, value: Value) -> Self {
        self.params.insert(param, value);
        self
    }

    pub fn push(self, push: bool) -> Self {
        self.with(Param::Push, Value::Bool(push))
    }

    pub fn pull(self, pull: bool) -> Self {
        self.with(Param::Pull, Value::Bool(pull))
    }

    pub fn source(self, locator: impl Into<String>) -> Self {
        self.with(Param::Source, Value::String(locator.into()))
    }

    pub fn destination(self, locator: impl Into<String>) -> Self {
        self.with(Param::Destination, Value::String(locator.into()))
    }

    pub fn forward_transform(self, expr: impl Into<String>) -> Self {
        self.with(Param::ForwardTransform, Value::String(expr.into()))
    }

    pub fn reverse_transform(self, expr: impl Into<String>) -> Self {
        self.with(Param::ReverseTransform, Value::String(expr.into()))
    }

    pub fn enabled(self, enabled: bool) -> Self {
        self.with(Param::Enabled, Value::Bool(enabled))
    }

    /// Present parameters in application order
    pub fn iter(&self) -> impl Iterator<Item = (Param, &Value)> {
        self.params.iter().map(|(param, value)| (*param, value))
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_map_uses_parameter_names() {
        let mut map = PropertyMap::new();
        map.insert("en".into(), json!(true));
        map.insert("src".into(), json!("/1"));
        map.insert("xfwd".into(), json!("v"));

        let args = CreateArgs::from_map(&map).unwrap();
        let order: Vec<Param> = args.iter().map(|(p, _)| p).collect();
        assert_eq!(order, vec![Param::Source, Param::ForwardTransform, Param::Enabled]);
    }

    #[test]
    fn test_from_map_rejects_unknown() {
        let mut map = PropertyMap::new();
        map.insert("sauce".into(), json!("/1"));

        assert_eq!(
            CreateArgs::from_map(&map),
            Err(PairingError::InvalidArguments {
                param: "sauce".into(),
                message: "unknown parameter".into(),
            })
        );
    }

    #[test]
    fn test_param_keys() {
        assert_eq!(Param::Enabled.key().name(), "s/enab/v");
        assert_eq!(Param::Source.key().name(), "c/pair/src");
        assert_eq!(Param::from_name("xrev"), Some(Param::ReverseTransform));
    }
}
