//! 寬鬆的反序列化輔助函式。
//!
//! 經過變數替換後，`port: "${API_PORT:-8001}"` 之類的欄位會變成字串，
//! 這裡讓數值、布林欄位同時接受原生型別與可解析的字串。

use serde::de::{self, Deserializer};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

#[derive(Deserialize)]
#[serde(untagged)]
enum TypedOrText<T> {
    Typed(T),
    Text(String),
}

impl<T> TypedOrText<T>
where
    T: FromStr,
    T::Err: Display,
{
    fn into_value<E: de::Error>(self) -> Result<T, E> {
        match self {
            Self::Typed(value) => Ok(value),
            Self::Text(text) => text
                .trim()
                .parse::<T>()
                .map_err(|e| E::custom(format!("invalid value '{}': {}", text, e))),
        }
    }
}

pub fn value<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr,
    T::Err: Display,
{
    TypedOrText::<T>::deserialize(deserializer)?.into_value()
}

pub fn option<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr,
    T::Err: Display,
{
    match Option::<TypedOrText<T>>::deserialize(deserializer)? {
        Some(raw) => raw.into_value().map(Some),
        None => Ok(None),
    }
}

fn scalar_to_string<E: de::Error>(value: serde_json::Value) -> Result<Option<String>, E> {
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::String(s) => Ok(Some(s)),
        serde_json::Value::Bool(b) => Ok(Some(b.to_string())),
        serde_json::Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(E::custom(format!("expected a scalar value, found {}", other))),
    }
}

/// 接受字串、數字或布林並轉為字串
pub fn option_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    scalar_to_string(serde_json::Value::deserialize(deserializer)?)
}

/// 環境變數對應表：值一律為字串，`null` 視為空字串
pub fn string_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, serde_json::Value>>::deserialize(deserializer)?;
    raw.unwrap_or_default()
        .into_iter()
        .map(|(key, value)| Ok((key, scalar_to_string(value)?.unwrap_or_default())))
        .collect()
}

pub fn flag_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, TypedOrText<bool>>>::deserialize(deserializer)?;
    raw.unwrap_or_default()
        .into_iter()
        .map(|(key, value)| Ok((key, value.into_value()?)))
        .collect()
}
