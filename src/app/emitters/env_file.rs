use crate::core::interpolate::ReferenceScanner;
use crate::domain::artifact::Artifact;
use crate::domain::ports::Emitter;
use crate::domain::resolved::{ResolvedModel, ResolvedService};
use crate::utils::error::Result;

pub const ENV_DIR: &str = "env";

fn needs_quotes(value: &str) -> bool {
    value
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '#' | '"' | '\'' | '\\' | '$' | '`'))
}

/// dotenv 格式的值；必要時加上雙引號並跳脫
fn quote(value: &str) -> String {
    if !needs_quotes(value) {
        return value.to_string();
    }
    let escaped = value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('$', "\\$")
        .replace('\r', "\\r")
        .replace('\n', "\\n");
    format!("\"{}\"", escaped)
}

/// 註解內容不可換行，否則後半段會成為生效的設定
fn comment_text(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('\r', "\\r")
        .replace('\n', "\\n")
}

fn render(model: &ResolvedModel, service: &ResolvedService, scanner: &ReferenceScanner) -> String {
    let mut lines = vec![
        format!(
            "# {} environment for {} ({})",
            model.system.name, service.name, model.environment.name
        ),
        "# Generated by fleet-compiler. Do not edit by hand.".to_string(),
    ];

    for (key, value) in &service.environment {
        if let Some(secret) = model.secrets.get(key) {
            lines.push(format!(
                "# {} is injected at runtime from {}",
                key,
                comment_text(&secret.locator)
            ));
            lines.push(format!("{}=", key));
        } else if value.secret {
            let referenced = scanner.references(&value.value).join(", ");
            lines.push(format!(
                "# {} is assembled at runtime from {}: {}",
                key,
                referenced,
                comment_text(&value.value)
            ));
            lines.push(format!("{}=", key));
        } else {
            lines.push(format!("{}={}", key, quote(&value.value)));
        }
    }

    lines.join("\n") + "\n"
}

/// 每個服務一份 env 檔；機密只留下空值與定位說明
pub struct EnvFileEmitter;

impl Emitter for EnvFileEmitter {
    fn name(&self) -> &'static str {
        "env"
    }

    fn emit(&self, model: &ResolvedModel) -> Result<Vec<Artifact>> {
        let scanner = ReferenceScanner::new()?;
        Ok(model
            .services
            .values()
            .map(|service| {
                Artifact::new(
                    format!("{}/{}.env", ENV_DIR, service.name),
                    render(model, service, &scanner),
                )
            })
            .collect())
    }
}
