//! Type model and subtyping oracle
//!
//! The analyzer itself never decides subtyping ad hoc; every judgement goes
//! through [`TypeContext`], and every narrowing result is normalized by
//! [`TypeIntersector`]. `Any` is the top of the non-nullable types, `Nothing`
//! the bottom, and `Nullable(T)` extends `T` with the null value.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A type as the front end sees it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ty {
    /// Top of the non-nullable lattice.
    Any,
    /// Bottom. `Nullable(Nothing)` is the type of the `null` literal.
    Nothing,
    /// The nullable extension of the inner type.
    Nullable(Box<Ty>),
    /// A registered nominal class.
    Class(String),
    /// A sequence of elements, covariant in the element type.
    Iterable(Box<Ty>),
    /// A list, subtype of `Iterable` with the same element.
    List(Box<Ty>),
    /// A function type, contravariant in parameters, covariant in return.
    Function { params: Vec<Ty>, ret: Box<Ty> },
    /// A normalized intersection of non-nullable members.
    Intersection(Vec<Ty>),
}

impl Ty {
    pub fn class(name: &str) -> Ty {
        Ty::Class(name.to_string())
    }

    pub fn nullable(inner: Ty) -> Ty {
        match inner {
            Ty::Nullable(_) => inner,
            other => Ty::Nullable(Box::new(other)),
        }
    }

    /// The type of the `null` literal.
    pub fn null() -> Ty {
        Ty::Nullable(Box::new(Ty::Nothing))
    }

    pub fn boolean() -> Ty {
        Ty::class("Boolean")
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self, Ty::Nullable(_))
    }

    pub fn is_nothing(&self) -> bool {
        matches!(self, Ty::Nothing)
    }

    /// Strips the nullable wrapper, if any.
    pub fn not_nullable(&self) -> Ty {
        match self {
            Ty::Nullable(inner) => (**inner).clone(),
            other => other.clone(),
        }
    }

    /// The element type of an `Iterable`/`List`, if this is one.
    pub fn element_type(&self) -> Option<&Ty> {
        match self {
            Ty::Iterable(elem) | Ty::List(elem) => Some(elem),
            _ => None,
        }
    }

    /// Rebuilds an `Iterable`/`List` with a new element type, keeping the
    /// container shape.
    pub fn with_element_type(&self, elem: Ty) -> Option<Ty> {
        match self {
            Ty::Iterable(_) => Some(Ty::Iterable(Box::new(elem))),
            Ty::List(_) => Some(Ty::List(Box::new(elem))),
            _ => None,
        }
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Any => write!(f, "Any"),
            Ty::Nothing => write!(f, "Nothing"),
            Ty::Nullable(inner) => write!(f, "{inner}?"),
            Ty::Class(name) => write!(f, "{name}"),
            Ty::Iterable(elem) => write!(f, "Iterable<{elem}>"),
            Ty::List(elem) => write!(f, "List<{elem}>"),
            Ty::Function { params, ret } => {
                write!(f, "(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, ") -> {ret}")
            }
            Ty::Intersection(members) => {
                for (i, m) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, " & ")?;
                    }
                    write!(f, "{m}")?;
                }
                Ok(())
            }
        }
    }
}

/// Subtyping oracle over a registered class hierarchy.
///
/// Classes not registered are still valid types; they simply have no
/// supertypes besides `Any`.
#[derive(Debug, Default)]
pub struct TypeContext {
    supertypes: FxHashMap<String, Vec<String>>,
}

impl TypeContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a class with its direct supertypes.
    pub fn register_class(&mut self, name: &str, supers: &[&str]) {
        self.supertypes
            .insert(name.to_string(), supers.iter().map(|s| s.to_string()).collect());
    }

    fn class_extends(&self, sub: &str, sup: &str) -> bool {
        if sub == sup {
            return true;
        }
        let Some(direct) = self.supertypes.get(sub) else {
            return false;
        };
        direct.iter().any(|d| self.class_extends(d, sup))
    }

    pub fn is_subtype_of(&self, a: &Ty, b: &Ty) -> bool {
        if a == b {
            return true;
        }
        match (a, b) {
            (Ty::Nothing, _) => true,
            (Ty::Intersection(members), _) => members.iter().any(|m| self.is_subtype_of(m, b)),
            (_, Ty::Intersection(members)) => members.iter().all(|m| self.is_subtype_of(a, m)),
            (Ty::Nullable(ai), Ty::Nullable(bi)) => self.is_subtype_of(ai, bi),
            // A nullable type never fits a non-nullable one.
            (Ty::Nullable(_), _) => false,
            (_, Ty::Nullable(bi)) => self.is_subtype_of(a, bi),
            (_, Ty::Any) => true,
            (Ty::Class(x), Ty::Class(y)) => self.class_extends(x, y),
            (Ty::List(e1), Ty::List(e2)) => self.is_subtype_of(e1, e2),
            (Ty::List(e1), Ty::Iterable(e2)) => self.is_subtype_of(e1, e2),
            (Ty::Iterable(e1), Ty::Iterable(e2)) => self.is_subtype_of(e1, e2),
            (Ty::Function { params: p1, ret: r1 }, Ty::Function { params: p2, ret: r2 }) => {
                p1.len() == p2.len()
                    && p2.iter().zip(p1).all(|(b, a)| self.is_subtype_of(b, a))
                    && self.is_subtype_of(r1, r2)
            }
            _ => false,
        }
    }
}

/// Normalizing intersection over a set of types.
pub struct TypeIntersector;

impl TypeIntersector {
    /// Intersects the given types into a single normalized type.
    ///
    /// The result is nullable only when every input is nullable. Members that
    /// are supertypes of another member are dropped; a single survivor is
    /// returned bare, several as `Ty::Intersection`.
    pub fn intersect(ctx: &TypeContext, types: &[Ty]) -> Ty {
        if types.is_empty() {
            return Ty::Any;
        }
        let result_nullable = types.iter().all(Ty::is_nullable);
        let mut members: Vec<Ty> = Vec::new();
        for ty in types {
            let core = ty.not_nullable();
            match core {
                Ty::Intersection(inner) => {
                    for m in inner {
                        if !members.contains(&m) {
                            members.push(m);
                        }
                    }
                }
                other => {
                    if !members.contains(&other) {
                        members.push(other);
                    }
                }
            }
        }
        // Drop members that another member already refines past.
        let mut kept: Vec<Ty> = Vec::new();
        for (i, m) in members.iter().enumerate() {
            let redundant = members.iter().enumerate().any(|(j, other)| {
                i != j && ctx.is_subtype_of(other, m) && !ctx.is_subtype_of(m, other)
            });
            if !redundant {
                kept.push(m.clone());
            }
        }
        let core = match kept.len() {
            0 => Ty::Any,
            1 => kept.pop().unwrap_or(Ty::Any),
            _ => Ty::Intersection(kept),
        };
        if result_nullable {
            Ty::nullable(core)
        } else {
            core
        }
    }
}
