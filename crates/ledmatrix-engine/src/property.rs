//! Typed, named, validated configuration values.
//!
//! A `Property<T>` is a cheap shared handle: the owning scene/provider keeps one as a field to
//! read the value while rendering, and a clone lives in the owner's `PropertySet` so the set can
//! load, dump and describe every property without knowing its concrete type.
//!
//! Supported kinds form a closed set (`PropertyKind`); each carries its own JSON codec via
//! `PropertyValue` and, for ordered kinds, min/max clamping applied at load time.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::canvas::Color;
use crate::error::PropertyError;

pub type JsonObject = Map<String, Value>;

/// Runtime type tag exposed to UI metadata endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    Int,
    Float,
    Bool,
    String,
    StringList,
    Color,
    Millis,
    Enum,
    Json,
}

impl PropertyKind {
    pub fn tag(self) -> &'static str {
        match self {
            PropertyKind::Int => "int",
            PropertyKind::Float => "float",
            PropertyKind::Bool => "bool",
            PropertyKind::String => "string",
            PropertyKind::StringList => "string[]",
            PropertyKind::Color => "color",
            PropertyKind::Millis => "millis",
            PropertyKind::Enum => "enum",
            PropertyKind::Json => "json",
        }
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// One selectable value of an enum property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnumOption {
    pub value: &'static str,
    pub display_name: String,
}

/// Per-kind JSON codec and optional clamping.
pub trait PropertyValue: Clone + Send + Sync + fmt::Debug + 'static {
    const KIND: PropertyKind;

    fn from_json(value: &Value) -> Result<Self, String>;
    fn to_json(&self) -> Value;

    /// Only ordered kinds clamp; everything else passes through.
    fn clamp_to(self, _min: Option<&Self>, _max: Option<&Self>) -> Self {
        self
    }

    /// Enum name and selectable values, for enum kinds only.
    fn enum_info() -> Option<(&'static str, Vec<EnumOption>)> {
        None
    }
}

fn decode<T: DeserializeOwned>(value: &Value) -> Result<T, String> {
    T::deserialize(value).map_err(|e| e.to_string())
}

fn clamp_ordered<T: PartialOrd + Clone>(value: T, min: Option<&T>, max: Option<&T>) -> T {
    let mut v = value;
    if let Some(lo) = min {
        if v < *lo {
            v = lo.clone();
        }
    }
    if let Some(hi) = max {
        if v > *hi {
            v = hi.clone();
        }
    }
    v
}

macro_rules! ordered_property {
    ($($ty:ty => $kind:ident),* $(,)?) => {$(
        impl PropertyValue for $ty {
            const KIND: PropertyKind = PropertyKind::$kind;

            fn from_json(value: &Value) -> Result<Self, String> {
                decode(value)
            }

            fn to_json(&self) -> Value {
                Value::from(*self)
            }

            fn clamp_to(self, min: Option<&Self>, max: Option<&Self>) -> Self {
                clamp_ordered(self, min, max)
            }
        }
    )*};
}

// u64 is the millisecond kind (durations, intervals).
ordered_property!(i32 => Int, i64 => Int, u8 => Int, u64 => Millis, f32 => Float, f64 => Float);

impl PropertyValue for String {
    const KIND: PropertyKind = PropertyKind::String;

    fn from_json(value: &Value) -> Result<Self, String> {
        decode(value)
    }

    fn to_json(&self) -> Value {
        Value::String(self.clone())
    }

    fn clamp_to(self, min: Option<&Self>, max: Option<&Self>) -> Self {
        clamp_ordered(self, min, max)
    }
}

impl PropertyValue for bool {
    const KIND: PropertyKind = PropertyKind::Bool;

    fn from_json(value: &Value) -> Result<Self, String> {
        decode(value)
    }

    fn to_json(&self) -> Value {
        Value::Bool(*self)
    }
}

impl PropertyValue for Vec<String> {
    const KIND: PropertyKind = PropertyKind::StringList;

    fn from_json(value: &Value) -> Result<Self, String> {
        decode(value)
    }

    fn to_json(&self) -> Value {
        Value::from(self.clone())
    }
}

impl PropertyValue for Color {
    const KIND: PropertyKind = PropertyKind::Color;

    fn from_json(value: &Value) -> Result<Self, String> {
        match value.as_u64() {
            Some(rgb) if rgb <= 0xff_ff_ff => Ok(Color::from_packed(rgb as u32)),
            Some(rgb) => Err(format!("color {rgb:#x} does not fit in 0xRRGGBB")),
            None => Err(format!("expected a 0xRRGGBB integer, got {value}")),
        }
    }

    fn to_json(&self) -> Value {
        Value::from(self.packed())
    }
}

impl PropertyValue for Value {
    const KIND: PropertyKind = PropertyKind::Json;

    fn from_json(value: &Value) -> Result<Self, String> {
        Ok(value.clone())
    }

    fn to_json(&self) -> Value {
        self.clone()
    }
}

/// A closed set of named values usable as an enum property via `Choice<E>`.
pub trait PropertyEnum: Copy + PartialEq + Send + Sync + fmt::Debug + 'static {
    const TYPE_NAME: &'static str;

    fn variants() -> &'static [Self];
    fn as_str(&self) -> &'static str;

    fn display_name(&self) -> String {
        let mut out = String::new();
        for (i, word) in self.as_str().split('_').enumerate() {
            if i > 0 {
                out.push(' ');
            }
            let mut chars = word.chars();
            if let Some(first) = chars.next() {
                out.extend(first.to_uppercase());
                out.push_str(chars.as_str());
            }
        }
        out
    }
}

/// Enum property value, stored in JSON as the variant's string form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Choice<E>(pub E);

impl<E: PropertyEnum> PropertyValue for Choice<E> {
    const KIND: PropertyKind = PropertyKind::Enum;

    fn from_json(value: &Value) -> Result<Self, String> {
        let s = value
            .as_str()
            .ok_or_else(|| format!("expected a string for {}, got {value}", E::TYPE_NAME))?;
        E::variants()
            .iter()
            .find(|v| v.as_str() == s)
            .map(|v| Choice(*v))
            .ok_or_else(|| format!("'{s}' is not a valid {}", E::TYPE_NAME))
    }

    fn to_json(&self) -> Value {
        Value::String(self.0.as_str().to_string())
    }

    fn enum_info() -> Option<(&'static str, Vec<EnumOption>)> {
        let values = E::variants()
            .iter()
            .map(|v| EnumOption {
                value: v.as_str(),
                display_name: v.display_name(),
            })
            .collect();
        Some((E::TYPE_NAME, values))
    }
}

/// UI metadata for one property.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyInfo {
    pub name: String,
    pub type_id: &'static str,
    pub default_value: Value,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_name: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<EnumOption>>,
}

/// A decoded value waiting to be stored.
pub type Commit<'a> = Box<dyn FnOnce() + 'a>;

/// Type-erased view used by `PropertySet`.
pub trait PropertyBase: Send + Sync {
    fn name(&self) -> &str;
    fn kind(&self) -> PropertyKind;
    fn is_required(&self) -> bool;

    /// Decode and clamp this property's key out of `args` without changing anything. The
    /// returned commit stores the value and marks the property registered.
    fn stage_from_json(&self, args: &JsonObject) -> Result<Commit<'_>, PropertyError>;

    fn load_from_json(&self, args: &JsonObject) -> Result<(), PropertyError> {
        self.stage_from_json(args).map(|commit| commit())
    }

    fn dump_to_json(&self, out: &mut JsonObject);

    fn describe(&self) -> PropertyInfo;

    fn type_tag(&self) -> &'static str {
        self.kind().tag()
    }
}

struct PropertyState<T> {
    value: T,
    registered: bool,
}

pub struct Property<T: PropertyValue> {
    name: Arc<str>,
    required: bool,
    min: Option<T>,
    max: Option<T>,
    state: Arc<RwLock<PropertyState<T>>>,
}

impl<T: PropertyValue> Clone for Property<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            required: self.required,
            min: self.min.clone(),
            max: self.max.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: PropertyValue> fmt::Debug for Property<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("Property")
            .field("name", &self.name)
            .field("kind", &T::KIND)
            .field("value", &state.value)
            .field("registered", &state.registered)
            .finish()
    }
}

impl<T: PropertyValue> Property<T> {
    pub fn new(name: impl Into<String>, default: T) -> Self {
        let name: String = name.into();
        Self {
            name: Arc::from(name),
            required: false,
            min: None,
            max: None,
            state: Arc::new(RwLock::new(PropertyState {
                value: default,
                registered: false,
            })),
        }
    }

    /// Loading fails when the key is absent instead of keeping the default.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_min(mut self, min: T) -> Self {
        self.min = Some(min);
        self
    }

    pub fn with_max(mut self, max: T) -> Self {
        self.max = Some(max);
        self
    }

    pub fn with_range(self, min: T, max: T) -> Self {
        self.with_min(min).with_max(max)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn min(&self) -> Option<&T> {
        self.min.as_ref()
    }

    pub fn max(&self) -> Option<&T> {
        self.max.as_ref()
    }

    pub fn is_registered(&self) -> bool {
        self.state.read().registered
    }

    /// Loaded value. Fails if no document was loaded yet.
    pub fn get(&self) -> Result<T, PropertyError> {
        self.with(T::clone)
    }

    /// Borrow the loaded value without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, PropertyError> {
        let state = self.state.read();
        if !state.registered {
            return Err(PropertyError::NotRegistered {
                name: self.name.to_string(),
            });
        }
        Ok(f(&state.value))
    }

    /// Current value regardless of registration (defaults included).
    pub fn value(&self) -> T {
        self.state.read().value.clone()
    }

    /// Replace the current value. Used to install defaults before a load.
    pub fn set_value(&self, value: T) {
        self.state.write().value = value;
    }
}

impl<T: PropertyValue> PropertyBase for Property<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> PropertyKind {
        T::KIND
    }

    fn is_required(&self) -> bool {
        self.required
    }

    fn stage_from_json(&self, args: &JsonObject) -> Result<Commit<'_>, PropertyError> {
        let value = match args.get(self.name()).filter(|v| !v.is_null()) {
            Some(raw) => T::from_json(raw).map_err(|reason| PropertyError::InvalidValue {
                name: self.name.to_string(),
                reason,
            })?,
            None if self.required => {
                return Err(PropertyError::MissingRequired {
                    name: self.name.to_string(),
                });
            }
            None => self.state.read().value.clone(),
        };
        let value = value.clamp_to(self.min.as_ref(), self.max.as_ref());
        Ok(Box::new(move || {
            let mut state = self.state.write();
            state.value = value;
            state.registered = true;
        }))
    }

    fn dump_to_json(&self, out: &mut JsonObject) {
        out.insert(self.name.to_string(), self.state.read().value.to_json());
    }

    fn describe(&self) -> PropertyInfo {
        let enum_info = T::enum_info();
        PropertyInfo {
            name: self.name.to_string(),
            type_id: T::KIND.tag(),
            default_value: self.state.read().value.to_json(),
            required: self.required,
            min: self.min.as_ref().map(PropertyValue::to_json),
            max: self.max.as_ref().map(PropertyValue::to_json),
            enum_name: enum_info.as_ref().map(|(name, _)| *name),
            enum_values: enum_info.map(|(_, values)| values),
        }
    }
}

/// All properties of one scene or provider, in registration order.
#[derive(Default)]
pub struct PropertySet {
    entries: Vec<Box<dyn PropertyBase>>,
}

impl fmt::Debug for PropertySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.iter().map(|p| p.name())).finish()
    }
}

impl PropertySet {
    /// Register a property. Names are unique within a set.
    pub fn add(&mut self, property: &(impl PropertyBase + Clone + 'static)) -> Result<(), PropertyError> {
        if self.contains(property.name()) {
            return Err(PropertyError::Duplicate {
                name: property.name().to_string(),
            });
        }
        self.entries.push(Box::new(property.clone()));
        Ok(())
    }

    /// Register without the duplicate check, for sets whose names are fixed at compile time.
    pub(crate) fn push_unchecked(&mut self, property: &(impl PropertyBase + Clone + 'static)) {
        self.entries.push(Box::new(property.clone()));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|p| p.name() == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn PropertyBase> {
        self.entries.iter().map(|p| p.as_ref())
    }

    /// Apply an argument bag. Unknown keys are ignored; `null` counts as `{}`. Either every
    /// property takes its new value or, on error, none of them changes.
    pub fn load_from_json(&self, args: &Value) -> Result<(), PropertyError> {
        let empty = JsonObject::new();
        let obj = match args {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => {
                return Err(PropertyError::NotAnObject {
                    found: json_type_name(other).to_string(),
                })
            }
        };
        let commits = self
            .entries
            .iter()
            .map(|p| p.stage_from_json(obj))
            .collect::<Result<Vec<_>, _>>()?;
        for commit in commits {
            commit();
        }
        Ok(())
    }

    pub fn to_json(&self) -> Value {
        let mut out = JsonObject::new();
        for p in &self.entries {
            p.dump_to_json(&mut out);
        }
        Value::Object(out)
    }

    pub fn describe(&self) -> Vec<PropertyInfo> {
        self.entries.iter().map(|p| p.describe()).collect()
    }
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Direction {
        Left,
        RightToLeft,
    }

    impl PropertyEnum for Direction {
        const TYPE_NAME: &'static str = "Direction";

        fn variants() -> &'static [Self] {
            &[Direction::Left, Direction::RightToLeft]
        }

        fn as_str(&self) -> &'static str {
            match self {
                Direction::Left => "left",
                Direction::RightToLeft => "right_to_left",
            }
        }
    }

    #[test]
    fn test_out_of_range_values_are_clamped() {
        let speed = Property::new("speed", 5i32).with_range(1, 10);
        let mut set = PropertySet::default();
        set.add(&speed).unwrap();

        set.load_from_json(&json!({"speed": 99})).unwrap();
        assert_eq!(speed.get().unwrap(), 10);

        set.load_from_json(&json!({"speed": -3})).unwrap();
        assert_eq!(speed.get().unwrap(), 1);

        let ratio = Property::new("ratio", 0.5f64).with_range(0.0, 1.0);
        let mut set = PropertySet::default();
        set.add(&ratio).unwrap();
        set.load_from_json(&json!({"ratio": 7.25})).unwrap();
        assert_eq!(ratio.get().unwrap(), 1.0);
    }

    #[test]
    fn test_missing_optional_keeps_default() {
        let label = Property::new("label", String::from("hello"));
        let mut set = PropertySet::default();
        set.add(&label).unwrap();
        set.load_from_json(&json!({"other": 1})).unwrap();
        assert_eq!(label.get().unwrap(), "hello");
    }

    #[test]
    fn test_missing_required_fails() {
        let url = Property::new("url", String::new()).required();
        let mut set = PropertySet::default();
        set.add(&url).unwrap();
        let err = set.load_from_json(&json!({})).unwrap_err();
        assert_eq!(err, PropertyError::MissingRequired { name: "url".into() });
        assert!(!url.is_registered());
    }

    #[test]
    fn test_get_before_load_fails() {
        let p = Property::new("weight", 1i64);
        assert!(matches!(p.get(), Err(PropertyError::NotRegistered { .. })));
        assert_eq!(p.value(), 1);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut set = PropertySet::default();
        set.add(&Property::new("speed", 1i32)).unwrap();
        let err = set.add(&Property::new("speed", 2.0f32)).unwrap_err();
        assert_eq!(err, PropertyError::Duplicate { name: "speed".into() });
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_wrong_type_is_invalid_value() {
        let p = Property::new("count", 3i32);
        let mut set = PropertySet::default();
        set.add(&p).unwrap();
        let err = set.load_from_json(&json!({"count": "three"})).unwrap_err();
        assert!(matches!(err, PropertyError::InvalidValue { ref name, .. } if name == "count"));
    }

    #[test]
    fn test_failed_load_changes_nothing() {
        let speed = Property::new("speed", 1i32);
        let count = Property::new("count", 3i32);
        let mut set = PropertySet::default();
        set.add(&speed).unwrap();
        set.add(&count).unwrap();
        set.load_from_json(&json!({"speed": 4, "count": 5})).unwrap();

        let err = set.load_from_json(&json!({"speed": 9, "count": "many"})).unwrap_err();
        assert!(matches!(err, PropertyError::InvalidValue { ref name, .. } if name == "count"));
        assert_eq!(speed.get().unwrap(), 4);
        assert_eq!(count.get().unwrap(), 5);

        let url = Property::new("url", String::new()).required();
        let fresh = Property::new("speed", 1i32);
        let mut set = PropertySet::default();
        set.add(&fresh).unwrap();
        set.add(&url).unwrap();
        assert!(set.load_from_json(&json!({"speed": 7})).is_err());
        assert!(!fresh.is_registered());
        assert_eq!(fresh.value(), 1);
    }

    #[test]
    fn test_non_object_arguments_rejected() {
        let set = PropertySet::default();
        assert!(set.load_from_json(&Value::Null).is_ok());
        assert_eq!(
            set.load_from_json(&json!([1, 2])),
            Err(PropertyError::NotAnObject { found: "array".into() })
        );
    }

    #[test]
    fn test_color_and_enum_codecs() {
        let color = Property::new("color", Color::WHITE);
        let dir = Property::new("direction", Choice(Direction::Left));
        let mut set = PropertySet::default();
        set.add(&color).unwrap();
        set.add(&dir).unwrap();

        set.load_from_json(&json!({"color": 0xff0000, "direction": "right_to_left"}))
            .unwrap();
        assert_eq!(color.get().unwrap(), Color::new(255, 0, 0));
        assert_eq!(dir.get().unwrap(), Choice(Direction::RightToLeft));
        assert_eq!(
            set.to_json(),
            json!({"color": 0xff0000, "direction": "right_to_left"})
        );

        assert!(set.load_from_json(&json!({"direction": "up"})).is_err());
        assert!(set.load_from_json(&json!({"color": 0x1_000_000u64})).is_err());
    }

    #[test]
    fn test_describe_reports_tags_and_bounds() {
        let mut set = PropertySet::default();
        set.add(&Property::new("speed", 2i32).with_range(1, 8)).unwrap();
        set.add(&Property::new("images", Vec::<String>::new())).unwrap();
        set.add(&Property::new("direction", Choice(Direction::Left))).unwrap();

        let info = set.describe();
        assert_eq!(info[0].type_id, "int");
        assert_eq!(info[0].min, Some(json!(1)));
        assert_eq!(info[0].max, Some(json!(8)));
        assert_eq!(info[1].type_id, "string[]");
        assert_eq!(info[1].default_value, json!([]));
        assert_eq!(info[2].enum_name, Some("Direction"));
        let values = info[2].enum_values.as_ref().unwrap();
        assert_eq!(values[1].display_name, "Right To Left");
    }

    #[test]
    fn test_clones_share_state() {
        let p = Property::new("duration", 5000u64);
        let mut set = PropertySet::default();
        set.add(&p).unwrap();
        set.load_from_json(&json!({"duration": 15000})).unwrap();
        assert_eq!(p.get().unwrap(), 15000);
        assert_eq!(p.type_tag(), "millis");
    }
}
