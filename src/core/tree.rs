//! 標記樹：scalar / list / map 三種節點與遞迴合併規則。
//!
//! 合併規則：
//! - map 與 map：逐鍵合併，覆寫層的鍵優先，基底獨有的鍵保留
//! - 其他情況（scalar、list、型別不同）：覆寫層整個取代基底

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Scalar(Scalar),
    List(Vec<Node>),
    Map(BTreeMap<String, Node>),
}

impl Default for Node {
    fn default() -> Self {
        Node::Map(BTreeMap::new())
    }
}

/// 將路徑片段組成 `a.b[0].c` 形式
pub fn join_path(segments: &[String]) -> String {
    let mut path = String::new();
    for segment in segments {
        if !path.is_empty() && !segment.starts_with('[') {
            path.push('.');
        }
        path.push_str(segment);
    }
    path
}

impl Node {
    pub fn str(value: impl Into<String>) -> Self {
        Node::Scalar(Scalar::Str(value.into()))
    }

    /// 由 YAML 值建立節點；非字串鍵會轉為字串，tag 會被忽略
    pub fn from_yaml(value: serde_yaml::Value) -> Result<Self, String> {
        let mut path = Vec::new();
        Self::from_yaml_at(value, &mut path)
    }

    fn from_yaml_at(value: serde_yaml::Value, path: &mut Vec<String>) -> Result<Self, String> {
        use serde_yaml::Value;

        Ok(match value {
            Value::Null => Node::Scalar(Scalar::Null),
            Value::Bool(b) => Node::Scalar(Scalar::Bool(b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Node::Scalar(Scalar::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Node::Scalar(Scalar::Float(f))
                } else {
                    return Err(format!("unsupported number {} at {}", n, join_path(path)));
                }
            }
            Value::String(s) => Node::Scalar(Scalar::Str(s)),
            Value::Sequence(items) => {
                let mut nodes = Vec::with_capacity(items.len());
                for (index, item) in items.into_iter().enumerate() {
                    path.push(format!("[{}]", index));
                    nodes.push(Self::from_yaml_at(item, path)?);
                    path.pop();
                }
                Node::List(nodes)
            }
            Value::Mapping(mapping) => {
                let mut map = BTreeMap::new();
                for (key, item) in mapping {
                    let key = match key {
                        Value::String(s) => s,
                        Value::Number(n) => n.to_string(),
                        Value::Bool(b) => b.to_string(),
                        other => {
                            return Err(format!(
                                "unsupported mapping key {:?} at {}",
                                other,
                                join_path(path)
                            ))
                        }
                    };
                    path.push(key.clone());
                    let node = Self::from_yaml_at(item, path)?;
                    path.pop();
                    if map.insert(key.clone(), node).is_some() {
                        return Err(format!("duplicate key '{}' at {}", key, join_path(path)));
                    }
                }
                Node::Map(map)
            }
            Value::Tagged(tagged) => Self::from_yaml_at(tagged.value, path)?,
        })
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Node>> {
        match self {
            Node::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::Scalar(Scalar::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Node> {
        self.as_map().and_then(|map| map.get(key))
    }

    pub fn get_path(&self, path: &[&str]) -> Option<&Node> {
        path.iter().try_fold(self, |node, key| node.get(key))
    }

    /// 遞迴合併，覆寫層優先
    pub fn merge(self, overlay: Node) -> Node {
        match (self, overlay) {
            (Node::Map(mut base), Node::Map(overlay)) => {
                for (key, value) in overlay {
                    let merged = match base.remove(&key) {
                        Some(existing) => existing.merge(value),
                        None => value,
                    };
                    base.insert(key, merged);
                }
                Node::Map(base)
            }
            (_, overlay) => overlay,
        }
    }

    /// 依序走訪每個字串 scalar，回呼取得其路徑並可修改其值
    pub fn try_for_each_str_mut<E>(
        &mut self,
        f: &mut dyn FnMut(&[String], &mut String) -> Result<(), E>,
    ) -> Result<(), E> {
        let mut path = Vec::new();
        self.walk_str_mut(&mut path, f)
    }

    fn walk_str_mut<E>(
        &mut self,
        path: &mut Vec<String>,
        f: &mut dyn FnMut(&[String], &mut String) -> Result<(), E>,
    ) -> Result<(), E> {
        match self {
            Node::Scalar(Scalar::Str(s)) => f(path, s),
            Node::Scalar(_) => Ok(()),
            Node::List(items) => {
                for (index, item) in items.iter_mut().enumerate() {
                    path.push(format!("[{}]", index));
                    item.walk_str_mut(path, f)?;
                    path.pop();
                }
                Ok(())
            }
            Node::Map(map) => {
                for (key, item) in map.iter_mut() {
                    path.push(key.clone());
                    item.walk_str_mut(path, f)?;
                    path.pop();
                }
                Ok(())
            }
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Node::Scalar(Scalar::Null) => serde_json::Value::Null,
            Node::Scalar(Scalar::Bool(b)) => serde_json::Value::Bool(*b),
            Node::Scalar(Scalar::Int(i)) => serde_json::Value::from(*i),
            Node::Scalar(Scalar::Float(f)) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Node::Scalar(Scalar::Str(s)) => serde_json::Value::String(s.clone()),
            Node::List(items) => serde_json::Value::Array(items.iter().map(Node::to_json).collect()),
            Node::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }
}
