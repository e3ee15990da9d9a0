use std::{fmt, ops::Deref, str::FromStr};

use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{ArrayType, ColumnType, Nullable, Value, ValueType, ValueTypeErr},
    ColIdx, DbErr, QueryResult, TryGetError, TryGetable,
};
use serde::{Deserialize, Serialize};

/// Decimal persisted as its canonical text form.
///
/// The SQLite driver moves `Decimal` through `f64`; a text column keeps
/// prices and totals exact on every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoredDecimal(pub Decimal);

impl StoredDecimal {
    pub fn get(self) -> Decimal {
        self.0
    }
}

impl Deref for StoredDecimal {
    type Target = Decimal;

    fn deref(&self) -> &Decimal {
        &self.0
    }
}

impl From<Decimal> for StoredDecimal {
    fn from(value: Decimal) -> Self {
        Self(value)
    }
}

impl From<StoredDecimal> for Decimal {
    fn from(value: StoredDecimal) -> Self {
        value.0
    }
}

impl PartialEq<Decimal> for StoredDecimal {
    fn eq(&self, other: &Decimal) -> bool {
        self.0 == *other
    }
}

impl fmt::Display for StoredDecimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<StoredDecimal> for Value {
    fn from(value: StoredDecimal) -> Self {
        Value::String(Some(Box::new(value.0.to_string())))
    }
}

impl TryGetable for StoredDecimal {
    fn try_get_by<I: ColIdx>(res: &QueryResult, index: I) -> Result<Self, TryGetError> {
        let text = <String as TryGetable>::try_get_by(res, index)?;
        Decimal::from_str(&text)
            .map(StoredDecimal)
            .map_err(|e| TryGetError::DbErr(DbErr::Type(format!("invalid decimal {:?}: {}", text, e))))
    }
}

impl ValueType for StoredDecimal {
    fn try_from(v: Value) -> Result<Self, ValueTypeErr> {
        match v {
            Value::String(Some(text)) => Decimal::from_str(&text)
                .map(StoredDecimal)
                .map_err(|_| ValueTypeErr),
            _ => Err(ValueTypeErr),
        }
    }

    fn type_name() -> String {
        "StoredDecimal".to_owned()
    }

    fn array_type() -> ArrayType {
        ArrayType::String
    }

    fn column_type() -> ColumnType {
        ColumnType::Text
    }
}

impl Nullable for StoredDecimal {
    fn null() -> Value {
        Value::String(None)
    }
}
