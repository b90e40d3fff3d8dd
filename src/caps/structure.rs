//! Named field sets: one entry of a caps list.

use super::value::{CapsValue, FieldValue, Fraction};
use std::fmt;

/// A media type name plus constrained fields, e.g.
/// `video/x-raw, width=(int)[1, 4096], format=(string){I420, NV12}`.
///
/// Field order is kept as inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Structure {
    name: String,
    fields: Vec<(String, FieldValue)>,
}

impl Structure {
    /// Create a structure without fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Builder-style [`set`](Self::set).
    pub fn field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Media type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True if the structure has this name.
    pub fn has_name(&self, name: &str) -> bool {
        self.name == name
    }

    /// Set or replace a field.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == name) {
            Some((_, v)) => *v = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Remove a field, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        let idx = self.fields.iter().position(|(k, _)| k == name)?;
        Some(self.fields.remove(idx).1)
    }

    /// Field constraint by name.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// True if the field exists.
    pub fn has_field(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Fixed integer field value.
    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            FieldValue::Int(CapsValue::Fixed(v)) => Some(*v),
            _ => None,
        }
    }

    /// Fixed string field value.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            FieldValue::Str(CapsValue::Fixed(v)) => Some(v),
            _ => None,
        }
    }

    /// Fixed fraction field value.
    pub fn get_fraction(&self, name: &str) -> Option<Fraction> {
        match self.get(name)? {
            FieldValue::Fraction(CapsValue::Fixed(v)) => Some(*v),
            _ => None,
        }
    }

    /// Fixed boolean field value.
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.get(name)? {
            FieldValue::Bool(CapsValue::Fixed(v)) => Some(*v),
            _ => None,
        }
    }

    /// Iterate over `(name, value)` pairs in order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of fields.
    pub fn n_fields(&self) -> usize {
        self.fields.len()
    }

    /// True if every field is fixed.
    pub fn is_fixed(&self) -> bool {
        self.fields.iter().all(|(_, v)| v.is_fixed())
    }

    /// Common subset of two structures.
    ///
    /// Names must match. Fields present on both sides are narrowed to their
    /// overlap; a field present on one side only is kept as is. Any field
    /// without overlap makes the whole intersection empty.
    pub fn intersect(&self, other: &Structure) -> Option<Structure> {
        if self.name != other.name {
            return None;
        }
        let mut fields = Vec::with_capacity(self.fields.len() + other.fields.len());
        for (key, value) in &self.fields {
            let narrowed = match other.get(key) {
                Some(theirs) => value.intersect(theirs)?,
                None => value.clone(),
            };
            fields.push((key.clone(), narrowed));
        }
        for (key, value) in &other.fields {
            if !self.has_field(key) {
                fields.push((key.clone(), value.clone()));
            }
        }
        Some(Structure {
            name: self.name.clone(),
            fields,
        })
    }

    /// True if every format described by `self` is also described by `other`.
    pub fn is_subset(&self, other: &Structure) -> bool {
        self.name == other.name
            && other.fields.iter().all(|(key, theirs)| match self.get(key) {
                Some(mine) => mine.is_subset(theirs),
                None => theirs.is_any(),
            })
    }

    /// Fixed copy: every field takes its preferred value and unconstrained
    /// fields are dropped.
    pub fn fixate(&self) -> Structure {
        Structure {
            name: self.name.clone(),
            fields: self
                .fields
                .iter()
                .filter_map(|(k, v)| v.fixate().map(|fixed| (k.clone(), fixed)))
                .collect(),
        }
    }

    /// Fix an integer field to the accepted value closest to `target`.
    ///
    /// Returns false if the field is missing or not an integer.
    pub fn fixate_field_nearest_int(&mut self, name: &str, target: i64) -> bool {
        let Some((_, FieldValue::Int(value))) = self.fields.iter_mut().find(|(k, _)| k == name)
        else {
            return false;
        };
        match value.nearest(target) {
            Some(v) => {
                *value = CapsValue::Fixed(v);
                true
            }
            None => false,
        }
    }
}

impl fmt::Display for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for (key, value) in &self.fields {
            write!(f, ", {key}={value}")?;
        }
        Ok(())
    }
}
