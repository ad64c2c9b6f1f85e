//! SQL value and type system.
//!
//! `SqlType` enumerates the column types the engine supports; `Value` is the
//! runtime representation tuples are built from.

use std::cmp::Ordering;

/// A column type declaration. `Char`/`Varchar` carry their declared length.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum SqlType {
    Integer,
    BigInt,
    Float,
    Double,
    Char(u16),
    Varchar(u16),
    Boolean,
}

impl SqlType {
    /// Fixed on-disk width in bytes, or `None` for variable-length types.
    pub fn fixed_width(&self) -> Option<u16> {
        match self {
            SqlType::Integer => Some(4),
            SqlType::BigInt => Some(8),
            SqlType::Float => Some(4),
            SqlType::Double => Some(8),
            SqlType::Boolean => Some(1),
            SqlType::Char(n) => Some(*n),
            SqlType::Varchar(_) => None,
        }
    }

    /// Numeric type id stored in the heap schema header.
    pub fn type_id(&self) -> u8 {
        match self {
            SqlType::Integer => 1,
            SqlType::BigInt => 2,
            SqlType::Float => 3,
            SqlType::Double => 4,
            SqlType::Char(_) => 5,
            SqlType::Varchar(_) => 6,
            SqlType::Boolean => 7,
        }
    }

    /// Inverse of [`type_id`](Self::type_id); `len` is the declared length
    /// carried alongside the id for `Char`/`Varchar` columns.
    pub fn from_type_id(id: u8, len: u16) -> Option<SqlType> {
        Some(match id {
            1 => SqlType::Integer,
            2 => SqlType::BigInt,
            3 => SqlType::Float,
            4 => SqlType::Double,
            5 => SqlType::Char(len),
            6 => SqlType::Varchar(len),
            7 => SqlType::Boolean,
            _ => return None,
        })
    }
}

/// A runtime value. `Null` is a distinct variant carrying no type information;
/// type-checking against a declared `SqlType` happens in `catalog`/`expr`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Value {
    Integer(i32),
    BigInt(i64),
    Float(f32),
    Double(f64),
    Char(String),
    Varchar(String),
    Boolean(bool),
    Null,
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric coercion used by arithmetic expressions; integers widen to
    /// `f64`, `Null` has no numeric value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::BigInt(i) => Some(*i as f64),
            Value::Float(f) => Some(*f as f64),
            Value::Double(f) => Some(*f),
            _ => None,
        }
    }

    /// Ordering between two values. Same-kind values compare directly;
    /// otherwise falls back to numeric widening. Cross-kind non-numeric and
    /// NULL comparisons return `None`; callers needing SQL NULL-last
    /// ordering (e.g. `Sort`) special-case `Null` before calling this.
    pub fn cmp_same_type(&self, other: &Value) -> Option<Ordering> {
        use Value::*;
        match (self, other) {
            (Integer(a), Integer(b)) => Some(a.cmp(b)),
            (BigInt(a), BigInt(b)) => Some(a.cmp(b)),
            (Float(a), Float(b)) => a.partial_cmp(b),
            (Double(a), Double(b)) => a.partial_cmp(b),
            (Char(a), Char(b)) => Some(a.cmp(b)),
            (Varchar(a), Varchar(b)) => Some(a.cmp(b)),
            (Boolean(a), Boolean(b)) => Some(a.cmp(b)),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
        }
    }

    pub fn eq_same_type(&self, other: &Value) -> Option<bool> {
        self.cmp_same_type(other).map(|o| o == Ordering::Equal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::cmp::Ordering::{Equal, Greater, Less};

    #[test]
    fn cmp_same_type_works() {
        assert_eq!(Value::Integer(1).cmp_same_type(&Value::Integer(2)), Some(Less));
        assert_eq!(Value::Integer(1).cmp_same_type(&Value::Varchar("1".into())), None);
    }

    #[test]
    fn truthiness_is_strict() {
        assert_eq!(Value::Boolean(true).as_bool(), Some(true));
        assert_eq!(Value::Boolean(false).as_bool(), Some(false));
        assert_eq!(Value::Integer(1).as_bool(), None);
        assert_eq!(Value::Varchar("true".into()).as_bool(), None);
        assert_eq!(Value::Null.as_bool(), None);
    }

    #[test]
    fn mixed_numeric_widening_compares() {
        assert_eq!(Value::Integer(2).cmp_same_type(&Value::Double(2.5)), Some(Less));
        assert_eq!(Value::BigInt(3).cmp_same_type(&Value::Integer(3)), Some(Equal));
    }

    #[test]
    fn comparisons_require_compatible_type() {
        assert_eq!(Value::Integer(1).cmp_same_type(&Value::Varchar("1".into())), None);
        assert_eq!(Value::Null.cmp_same_type(&Value::Integer(1)), None);
        assert_eq!(
            Value::Boolean(true).cmp_same_type(&Value::Boolean(false)),
            Some(Greater)
        );
    }

    #[test]
    fn equality_requires_compatible_type() {
        assert_eq!(Value::Integer(1).eq_same_type(&Value::Integer(1)), Some(true));
        assert_eq!(Value::Varchar("1".into()).eq_same_type(&Value::Integer(1)), None);
    }

    #[test]
    fn serde_round_trip_stability() {
        let vals = vec![
            Value::Integer(-42),
            Value::Varchar("Ada".into()),
            Value::Boolean(true),
            Value::Null,
        ];

        let json = serde_json::to_string(&vals).unwrap();
        let back: Vec<Value> = serde_json::from_str(&json).unwrap();

        assert_eq!(vals, back);
    }

    #[test]
    fn ordering_is_consistent() {
        let a = Value::BigInt(5);
        let b = Value::BigInt(7);
        let c = Value::BigInt(5);

        assert_eq!(a.cmp_same_type(&b), Some(Less));
        assert_eq!(b.cmp_same_type(&a), Some(Greater));
        assert_eq!(a.cmp_same_type(&c), Some(Equal));
    }

    proptest! {
        #[test]
        fn order_is_antisymmetric(i in any::<i64>(), j in any::<i64>()) {
            let a = Value::BigInt(i);
            let b = Value::BigInt(j);
            let ord1 = a.cmp_same_type(&b);
            let ord2 = b.cmp_same_type(&a);
            match (ord1, ord2) {
                (Some(o1), Some(o2)) => assert_eq!(o1, o2.reverse()),
                _ => prop_assert!(true),
            }
        }

        #[test]
        fn eq_reflexive(val in any::<i64>()) {
            let v = Value::BigInt(val);
            assert_eq!(v.eq_same_type(&v), Some(true));
        }

        #[test]
        fn text_cmp_matches_std(a in ".*", b in ".*") {
            let va = Value::Varchar(a.clone());
            let vb = Value::Varchar(b.clone());
            assert_eq!(va.cmp_same_type(&vb), Some(a.cmp(&b)));
        }
    }
}
