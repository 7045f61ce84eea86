//! Structural equality engine.
//!
//! Decides whether a freshly observed resource differs from the stored one.
//! Watch transports redeliver unchanged objects all the time, so this is the
//! guard that keeps the controller from reacting to noise.
//!
//! Comparison rules:
//! - both absent are equal, exactly one absent is unequal, the same reference is equal
//! - maps compare by size and per-key value, ignoring iteration order
//! - sequences compare element-wise in order
//! - scalars (numbers, strings, booleans, enums, timestamps) compare by value
//! - composites compare field by field, stopping at the first mismatch
//!
//! Composite types list their fields once through [`structural!`]. The
//! resulting [`FieldPlan`] is validated and cached per type by
//! [`EqualityEngine`], so a comparison never re-derives what to walk.
//! [`reference::equal`] is an independent, serde-based implementation of the
//! same contract used to cross-check the engine in tests.

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::warn;

use crate::error::CoreError;

/// Comparisons slower than this are logged.
pub const SLOW_COMPARISON_THRESHOLD: Duration = Duration::from_millis(40);

/// Value-level structural equality.
pub trait Structural {
    /// Returns true when `self` and `other` are structurally equal
    fn structural_eq(&self, other: &Self) -> bool;
}

/// Compares one field of `T`.
pub type FieldComparator<T> = fn(&T, &T) -> bool;

/// A structural type whose fields are compared one by one.
///
/// Implemented through the [`structural!`] macro.
pub trait Composite: Structural + Sized + 'static {
    /// Named field comparators in declaration order
    fn field_plan() -> Vec<(&'static str, FieldComparator<Self>)>;
}

/// Validated list of field comparators for one composite type.
pub struct FieldPlan<T> {
    type_name: &'static str,
    fields: Vec<(&'static str, FieldComparator<T>)>,
}

impl<T> std::fmt::Debug for FieldPlan<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldPlan")
            .field("type_name", &self.type_name)
            .field("fields", &self.fields.iter().map(|(name, _)| *name).collect::<Vec<_>>())
            .finish()
    }
}

impl<T: Composite> FieldPlan<T> {
    /// Builds and validates the plan for `T`.
    ///
    /// An empty or repeated field name means the type's field list is wrong,
    /// which is reported with the offending type's name.
    pub fn build() -> Result<Self, CoreError> {
        let type_name = std::any::type_name::<T>();
        let fields = T::field_plan();

        let mut seen = HashSet::with_capacity(fields.len());
        for (name, _) in &fields {
            if name.is_empty() {
                return Err(CoreError::InvalidEqualityPlan {
                    type_name,
                    reason: "field with an empty name".to_string(),
                });
            }
            if !seen.insert(*name) {
                return Err(CoreError::InvalidEqualityPlan {
                    type_name,
                    reason: format!("field '{}' listed more than once", name),
                });
            }
        }

        Ok(Self { type_name, fields })
    }

    /// Name of the type this plan compares
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Field names in comparison order
    pub fn field_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|(name, _)| *name)
    }

    /// Compares every field, short-circuiting on the first mismatch
    pub fn compare(&self, a: &T, b: &T) -> bool {
        self.fields.iter().all(|(_, compare)| compare(a, b))
    }
}

/// Caches one [`FieldPlan`] per composite type.
#[derive(Default)]
pub struct EqualityEngine {
    plans: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl std::fmt::Debug for EqualityEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EqualityEngine")
            .field("cached_plans", &self.plans.len())
            .finish()
    }
}

impl EqualityEngine {
    /// Creates an engine with an empty plan cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached plan for `T`, building it on first use.
    pub fn plan<T: Composite>(&self) -> Result<Arc<FieldPlan<T>>, CoreError> {
        let id = TypeId::of::<T>();
        if let Some(cached) = self.plans.get(&id)
            && let Ok(plan) = Arc::clone(cached.value()).downcast::<FieldPlan<T>>()
        {
            return Ok(plan);
        }

        let plan = Arc::new(FieldPlan::<T>::build()?);
        self.plans.insert(id, plan.clone());
        Ok(plan)
    }

    /// Number of plans built so far
    pub fn cached_plans(&self) -> usize {
        self.plans.len()
    }

    /// Compares two optional values of the same composite type.
    pub fn equal<T: Composite>(&self, a: Option<&T>, b: Option<&T>) -> Result<bool, CoreError> {
        let (a, b) = match (a, b) {
            (None, None) => return Ok(true),
            (Some(a), Some(b)) => (a, b),
            _ => return Ok(false),
        };
        if std::ptr::eq(a, b) {
            return Ok(true);
        }

        let plan = self.plan::<T>()?;
        let started = Instant::now();
        let equal = plan.compare(a, b);
        let elapsed = started.elapsed();
        if elapsed > SLOW_COMPARISON_THRESHOLD {
            warn!("Structural comparison of {} took {:?}", plan.type_name(), elapsed);
        }

        Ok(equal)
    }
}

/// Implements [`Structural`] and [`Composite`] for a struct from its field list.
///
/// ```ignore
/// structural!(NamespaceResource { name, labels });
/// ```
#[macro_export]
macro_rules! structural {
    ($ty:ty { $($field:ident),+ $(,)? }) => {
        impl $crate::equality::Structural for $ty {
            fn structural_eq(&self, other: &Self) -> bool {
                $( $crate::equality::Structural::structural_eq(&self.$field, &other.$field) )&&+
            }
        }

        impl $crate::equality::Composite for $ty {
            fn field_plan() -> Vec<(&'static str, $crate::equality::FieldComparator<Self>)> {
                vec![
                    $(
                        (
                            stringify!($field),
                            (|a: &Self, b: &Self| {
                                $crate::equality::Structural::structural_eq(&a.$field, &b.$field)
                            }) as $crate::equality::FieldComparator<Self>,
                        )
                    ),+
                ]
            }
        }
    };
}

macro_rules! scalar {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl Structural for $ty {
                fn structural_eq(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )+
    };
}

scalar!(
    bool, char, i8, i16, i32, i64, u8, u16, u32, u64, usize, f32, f64, String, str,
    chrono::DateTime<chrono::Utc>,
    crds::AgentType,
    crds::LabelOperator,
);

impl<T: Structural> Structural for Option<T> {
    fn structural_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (None, None) => true,
            (Some(a), Some(b)) => a.structural_eq(b),
            _ => false,
        }
    }
}

impl<T: Structural> Structural for [T] {
    fn structural_eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other).all(|(a, b)| a.structural_eq(b))
    }
}

impl<T: Structural> Structural for Vec<T> {
    fn structural_eq(&self, other: &Self) -> bool {
        self.as_slice().structural_eq(other.as_slice())
    }
}

impl<K: Ord, V: Structural> Structural for BTreeMap<K, V> {
    fn structural_eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self.iter().all(|(key, value)| {
                other
                    .get(key)
                    .is_some_and(|theirs| value.structural_eq(theirs))
            })
    }
}

impl<K: Eq + Hash, V: Structural, S: BuildHasher> Structural for HashMap<K, V, S> {
    fn structural_eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self.iter().all(|(key, value)| {
                other
                    .get(key)
                    .is_some_and(|theirs| value.structural_eq(theirs))
            })
    }
}

impl<T: Structural + ?Sized> Structural for Arc<T> {
    fn structural_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other) || (**self).structural_eq(&**other)
    }
}

impl<T: Structural + ?Sized> Structural for Box<T> {
    fn structural_eq(&self, other: &Self) -> bool {
        (**self).structural_eq(&**other)
    }
}

/// Serde-based reference implementation of the equality contract.
///
/// Slow: both values are converted to JSON trees first. Used to cross-check
/// [`EqualityEngine`].
pub mod reference {
    use serde::Serialize;

    use crate::error::CoreError;

    /// Compares two optional values through their JSON representation.
    pub fn equal<T: Serialize>(a: Option<&T>, b: Option<&T>) -> Result<bool, CoreError> {
        match (a, b) {
            (None, None) => Ok(true),
            (Some(a), Some(b)) => Ok(serde_json::to_value(a)? == serde_json::to_value(b)?),
            _ => Ok(false),
        }
    }
}
