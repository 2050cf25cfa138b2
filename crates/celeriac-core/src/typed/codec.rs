//! Positional JSON arguments → typed method parameters.
//!
//! Arguments are converted by index. Missing trailing arguments convert from
//! `null` (so `Option<T>` parameters become `None`); extra arguments are
//! ignored.

use serde::de::DeserializeOwned;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
#[error("argument {index}: {source}")]
pub struct ArgumentError {
    pub index: usize,
    #[source]
    pub source: serde_json::Error,
}

/// Parameter list of a typed task method.
pub trait FromArgs: Sized + Send + 'static {
    /// Number of positional parameters.
    const ARITY: usize;

    fn from_args(args: Vec<Value>) -> Result<Self, ArgumentError>;
}

fn convert<T: DeserializeOwned>(arg: Option<Value>, index: usize) -> Result<T, ArgumentError> {
    serde_json::from_value(arg.unwrap_or(Value::Null))
        .map_err(|source| ArgumentError { index, source })
}

impl FromArgs for () {
    const ARITY: usize = 0;

    fn from_args(_args: Vec<Value>) -> Result<Self, ArgumentError> {
        Ok(())
    }
}

macro_rules! impl_from_args {
    ($arity:expr; $($ty:ident => $idx:tt),+) => {
        impl<$($ty: DeserializeOwned + Send + 'static),+> FromArgs for ($($ty,)+) {
            const ARITY: usize = $arity;

            fn from_args(args: Vec<Value>) -> Result<Self, ArgumentError> {
                let mut args = args.into_iter();
                Ok(($(convert::<$ty>(args.next(), $idx)?,)+))
            }
        }
    };
}

impl_from_args!(1; A => 0);
impl_from_args!(2; A => 0, B => 1);
impl_from_args!(3; A => 0, B => 1, C => 2);
impl_from_args!(4; A => 0, B => 1, C => 2, D => 3);
impl_from_args!(5; A => 0, B => 1, C => 2, D => 3, E => 4);
impl_from_args!(6; A => 0, B => 1, C => 2, D => 3, E => 4, F => 5);

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Point {
        x: i32,
        y: i32,
    }

    #[test]
    fn converts_by_index_into_declared_types() {
        let (a, b, p) = <(i64, String, Point)>::from_args(vec![
            json!(2),
            json!("two"),
            json!({"x": 1, "y": -1}),
        ])
        .unwrap();
        assert_eq!(a, 2);
        assert_eq!(b, "two");
        assert_eq!(p, Point { x: 1, y: -1 });
    }

    #[test]
    fn missing_trailing_args_convert_from_null() {
        let (a, b) = <(i64, Option<String>)>::from_args(vec![json!(1)]).unwrap();
        assert_eq!((a, b), (1, None));

        let err = <(i64, i64)>::from_args(vec![json!(1)]).unwrap_err();
        assert_eq!(err.index, 1);
    }

    #[test]
    fn type_mismatch_names_the_argument() {
        let err = <(i64,)>::from_args(vec![json!("nope")]).unwrap_err();
        assert_eq!(err.index, 0);
        assert!(err.to_string().starts_with("argument 0:"));
    }

    #[test]
    fn extra_args_are_ignored() {
        let (a,) = <(bool,)>::from_args(vec![json!(true), json!(1), json!(2)]).unwrap();
        assert!(a);
        assert_eq!(<(bool, u8, u8)>::ARITY, 3);
    }
}
