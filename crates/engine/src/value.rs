// SPDX-FileCopyrightText: 2025 AerynOS Developers
// SPDX-License-Identifier: MPL-2.0

//! Typed values.
//!
//! A tagged union carrying an optional type descriptor, with typed
//! append/prepend and a `null -> typed null` normalization: an untyped value
//! takes on a type the first time it is either explicitly typed or combined
//! with a typed one.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// The type descriptor a [`Value`] may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Bool,
    Int,
    String,
    Path,
    Dir,
    Project,
    NameList,
    TypedList,
    Map,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::String => "string",
            ValueType::Path => "path",
            ValueType::Dir => "dir",
            ValueType::Project => "project",
            ValueType::NameList => "names",
            ValueType::TypedList => "list",
            ValueType::Map => "map",
        };
        f.write_str(name)
    }
}

/// The untyped payload. `Null` is the only representable value with no
/// data; every other variant carries its data directly.
#[derive(Debug, Clone, PartialEq)]
pub enum Kind {
    Null,
    Bool(bool),
    Int(i64),
    String(String),
    Path(PathBuf),
    Dir(PathBuf),
    Project(String),
    NameList(Vec<String>),
    TypedList(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

/// A tagged value: payload plus an optional type descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub kind: Kind,
    pub ty: Option<ValueType>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("value of type {existing} cannot be re-typed to {requested}")]
    Retype { existing: ValueType, requested: ValueType },
    #[error("value does not match declared type {declared}")]
    KindMismatch { declared: ValueType },
    #[error("{kind} values are not appendable")]
    NotAppendable { kind: &'static str },
    #[error("{kind} values are not prependable")]
    NotPrependable { kind: &'static str },
    #[error("cannot convert {from} to {to}")]
    Inconvertible { from: ValueType, to: ValueType },
}

impl Value {
    pub fn null() -> Self {
        Self { kind: Kind::Null, ty: None }
    }

    pub fn is_null(&self) -> bool {
        matches!(self.kind, Kind::Null)
    }

    pub fn bool(value: bool) -> Self {
        Self {
            kind: Kind::Bool(value),
            ty: Some(ValueType::Bool),
        }
    }

    pub fn int(value: i64) -> Self {
        Self {
            kind: Kind::Int(value),
            ty: Some(ValueType::Int),
        }
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self {
            kind: Kind::String(value.into()),
            ty: Some(ValueType::String),
        }
    }

    pub fn path(value: impl Into<PathBuf>) -> Self {
        Self {
            kind: Kind::Path(value.into()),
            ty: Some(ValueType::Path),
        }
    }

    pub fn dir(value: impl Into<PathBuf>) -> Self {
        Self {
            kind: Kind::Dir(value.into()),
            ty: Some(ValueType::Dir),
        }
    }

    pub fn project(name: impl Into<String>) -> Self {
        Self {
            kind: Kind::Project(name.into()),
            ty: Some(ValueType::Project),
        }
    }

    pub fn names(values: impl IntoIterator<Item = String>) -> Self {
        Self {
            kind: Kind::NameList(values.into_iter().collect()),
            ty: Some(ValueType::NameList),
        }
    }

    pub fn list(values: impl IntoIterator<Item = Value>) -> Self {
        Self {
            kind: Kind::TypedList(values.into_iter().collect()),
            ty: Some(ValueType::TypedList),
        }
    }

    fn kind_matches(kind: &Kind, ty: ValueType) -> bool {
        matches!(
            (kind, ty),
            (Kind::Bool(_), ValueType::Bool)
                | (Kind::Int(_), ValueType::Int)
                | (Kind::String(_), ValueType::String)
                | (Kind::Path(_), ValueType::Path)
                | (Kind::Dir(_), ValueType::Dir)
                | (Kind::Project(_), ValueType::Project)
                | (Kind::NameList(_), ValueType::NameList)
                | (Kind::TypedList(_), ValueType::TypedList)
                | (Kind::Map(_), ValueType::Map)
        )
    }

    fn kind_name(&self) -> &'static str {
        match self.kind {
            Kind::Null => "null",
            Kind::Bool(_) => "bool",
            Kind::Int(_) => "int",
            Kind::String(_) => "string",
            Kind::Path(_) => "path",
            Kind::Dir(_) => "dir",
            Kind::Project(_) => "project",
            Kind::NameList(_) => "names",
            Kind::TypedList(_) => "list",
            Kind::Map(_) => "map",
        }
    }

    /// Type an untyped (`null`) value in place. Permitted exactly once;
    /// typing an already-typed value to a *different* type fails. Typing it
    /// to the same type again is a no-op.
    pub fn assign_type(&mut self, ty: ValueType) -> Result<(), Error> {
        if let Some(existing) = self.ty {
            if existing == ty {
                return Ok(());
            }
            return Err(Error::Retype { existing, requested: ty });
        }

        if !matches!(self.kind, Kind::Null) && !Self::kind_matches(&self.kind, ty) {
            return Err(Error::KindMismatch { declared: ty });
        }

        self.ty = Some(ty);
        Ok(())
    }

    /// Append `other` onto `self` with type-specific semantics. An untyped
    /// `null` receiver is normalized to `other` (the `null -> typed null`
    /// rule extended to append/prepend: appending onto nothing yields the
    /// appended value).
    pub fn append(&mut self, other: Value) -> Result<(), Error> {
        if self.is_null() {
            *self = other;
            return Ok(());
        }

        match (&mut self.kind, other.kind) {
            (Kind::String(s), Kind::String(o)) => s.push_str(&o),
            (Kind::Path(p), Kind::Path(o)) | (Kind::Dir(p), Kind::Path(o)) => *p = p.join(o),
            (Kind::Int(i), Kind::Int(o)) => *i += o,
            (Kind::NameList(list), Kind::NameList(o)) => list.extend(o),
            (Kind::TypedList(list), Kind::TypedList(o)) => list.extend(o),
            (Kind::TypedList(list), other_kind) => list.push(Value {
                kind: other_kind,
                ty: other.ty,
            }),
            (Kind::Map(map), Kind::Map(o)) => map.extend(o),
            _ => return Err(Error::NotAppendable { kind: self.kind_name() }),
        }

        Ok(())
    }

    /// Prepend `other` before `self`, mirroring [`Value::append`].
    pub fn prepend(&mut self, other: Value) -> Result<(), Error> {
        if self.is_null() {
            *self = other;
            return Ok(());
        }

        match (&mut self.kind, other.kind) {
            (Kind::String(s), Kind::String(o)) => *s = o + s,
            (Kind::Path(p), Kind::Path(o)) | (Kind::Dir(p), Kind::Path(o)) => *p = o.join(&p),
            (Kind::Int(i), Kind::Int(o)) => *i += o,
            (Kind::NameList(list), Kind::NameList(mut o)) => {
                o.extend(std::mem::take(list));
                *list = o;
            }
            (Kind::TypedList(list), Kind::TypedList(mut o)) => {
                o.extend(std::mem::take(list));
                *list = o;
            }
            (Kind::TypedList(list), other_kind) => list.insert(
                0,
                Value {
                    kind: other_kind,
                    ty: other.ty,
                },
            ),
            (Kind::Map(map), Kind::Map(o)) => {
                let mut merged = o;
                merged.extend(std::mem::take(map));
                *map = merged;
            }
            _ => return Err(Error::NotPrependable { kind: self.kind_name() }),
        }

        Ok(())
    }

    /// Convert to a value of the target type, per a documented conversion
    /// matrix. Fails if the conversion is not defined.
    pub fn convert(&self, to: ValueType) -> Result<Value, Error> {
        if self.ty == Some(to) {
            return Ok(self.clone());
        }

        let from = self.ty.unwrap_or(ValueType::String);

        let converted = match (&self.kind, to) {
            (Kind::Null, _) => return Ok(Value { kind: Kind::Null, ty: Some(to) }),
            (Kind::String(s), ValueType::Path) => Kind::Path(PathBuf::from(s)),
            (Kind::String(s), ValueType::Dir) => Kind::Dir(PathBuf::from(s)),
            (Kind::String(s), ValueType::NameList) => {
                Kind::NameList(s.split_whitespace().map(str::to_owned).collect())
            }
            (Kind::Path(p), ValueType::String) | (Kind::Dir(p), ValueType::String) => {
                Kind::String(p.display().to_string())
            }
            (Kind::Int(i), ValueType::String) => Kind::String(i.to_string()),
            (Kind::Bool(b), ValueType::String) => Kind::String(b.to_string()),
            (Kind::NameList(names), ValueType::TypedList) => {
                Kind::TypedList(names.iter().cloned().map(Value::string).collect())
            }
            _ => return Err(Error::Inconvertible { from, to }),
        };

        Ok(Value { kind: converted, ty: Some(to) })
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::null()
    }
}
