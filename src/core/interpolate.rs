use crate::core::tree::{join_path, Node};
use crate::utils::error::{CompileError, Result};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};

const EXPRESSION_PATTERN: &str = r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}";

/// `${NAME:-default}` / `${NAME}` 變數替換。
///
/// 優先順序：查表值 → 預設字面值 → `MissingVariable`。
/// 查表值存在但為空字串且有預設值時，使用預設值。
/// 機密鍵從不查表，原樣保留為 `${NAME}`。
pub struct Interpolator<'a> {
    pattern: Regex,
    variables: &'a BTreeMap<String, String>,
    secret_keys: &'a BTreeSet<String>,
}

impl<'a> Interpolator<'a> {
    pub fn new(
        variables: &'a BTreeMap<String, String>,
        secret_keys: &'a BTreeSet<String>,
    ) -> Result<Self> {
        Ok(Self {
            pattern: Regex::new(EXPRESSION_PATTERN)?,
            variables,
            secret_keys,
        })
    }

    /// 替換單一字串；`path` 用於錯誤訊息
    pub fn resolve(&self, text: &str, path: &str) -> Result<String> {
        let mut output = String::with_capacity(text.len());
        let mut last = 0;

        for caps in self.pattern.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            let name = &caps[1];
            let default = caps.get(2).map(|m| m.as_str());
            output.push_str(&text[last..whole.start()]);

            if self.secret_keys.contains(name) {
                output.push_str(&format!("${{{}}}", name));
            } else {
                let value = match (self.variables.get(name), default) {
                    (Some(value), Some(default)) if value.is_empty() => default,
                    (Some(value), _) => value.as_str(),
                    (None, Some(default)) => default,
                    (None, None) => {
                        return Err(CompileError::MissingVariable {
                            key: name.to_string(),
                            path: path.to_string(),
                        })
                    }
                };
                output.push_str(value);
            }
            last = whole.end();
        }

        output.push_str(&text[last..]);
        Ok(output)
    }

    /// 替換整棵樹中的所有字串，遇到第一個缺少的變數即失敗
    pub fn resolve_tree(&self, node: &mut Node) -> Result<()> {
        node.try_for_each_str_mut(&mut |path, value| {
            if value.contains("${") {
                *value = self.resolve(value, &join_path(path))?;
            }
            Ok(())
        })
    }
}

/// 找出字串中殘留的 `${NAME}` 引用（替換後只剩機密引用）
pub struct ReferenceScanner {
    pattern: Regex,
}

impl ReferenceScanner {
    pub fn new() -> Result<Self> {
        Ok(Self {
            pattern: Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")?,
        })
    }

    pub fn references<'t>(&self, text: &'t str) -> Vec<&'t str> {
        self.pattern
            .captures_iter(text)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
            .collect()
    }

    /// 整個值是否恰好是一個變數引用
    pub fn is_pure_reference(&self, text: &str) -> bool {
        self.pattern
            .find(text)
            .map(|m| m.start() == 0 && m.end() == text.len())
            .unwrap_or(false)
    }

    /// 改寫為容器執行期展開的 `$(NAME)` 形式
    pub fn to_dependent_form(&self, text: &str) -> String {
        self.pattern.replace_all(text, "$$($1)").into_owned()
    }
}
