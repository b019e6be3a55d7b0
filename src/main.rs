use clap::Parser;
use fleet_compiler::app::runner;
use fleet_compiler::app::server;
use fleet_compiler::config::Command;
use fleet_compiler::core::compiler::{CheckReport, PublishedOutput};
use fleet_compiler::utils::{logger, validation::Validate};
use fleet_compiler::{CancellationToken, CliConfig, CompileError};

#[tokio::main]
async fn main() {
    let config = CliConfig::parse();

    // 初始化日誌
    match &config.command {
        Command::Serve(_) => logger::init_server_logger(),
        _ => logger::init_cli_logger(config.verbose),
    }

    tracing::info!("Starting fleet-compiler CLI");
    if config.verbose {
        tracing::debug!("CLI config: {:?}", config);
    }

    // 驗證配置
    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }

    // Ctrl-C 在下一個階段邊界中止編譯，不發佈任何東西
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("🛑 Interrupt received, cancelling");
            signal_token.cancel();
        }
    });

    let outcome = match &config.command {
        Command::Compile(args) => runner::run_compile(args, cancel)
            .await
            .map(|outputs| report_published(&outputs)),
        Command::Legacy(args) => runner::run_legacy(args, cancel)
            .await
            .map(|outputs| report_published(&outputs)),
        Command::K8s(args) => runner::run_k8s(args, cancel)
            .await
            .map(|output| report_published(std::slice::from_ref(&output))),
        Command::Check(args) => runner::run_check(args).await.map(|reports| report_checks(&reports)),
        Command::Schema(args) => runner::run_schema(args).await.map(|schema| {
            match (schema, &args.output) {
                (Some(schema), _) => print!("{}", schema),
                (None, Some(path)) => println!("📄 Schema written to: {}", path),
                (None, None) => {}
            }
            0
        }),
        Command::Serve(args) => serve(&args.host, args.port).await.map(|_| 0),
    };

    match outcome {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            // 記錄詳細錯誤信息
            tracing::error!(
                "❌ Compilation failed: {} (Category: {:?}, Severity: {:?})",
                e,
                e.category(),
                e.severity()
            );
            tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 建議: {}", e.recovery_suggestion());

            // 根據錯誤嚴重程度決定退出碼
            let exit_code = e.exit_code();
            if exit_code > 0 {
                std::process::exit(exit_code);
            }
        }
    }
}

fn report_published(outputs: &[PublishedOutput]) -> i32 {
    for output in outputs {
        tracing::info!(
            "✅ {} compiled in {}ms",
            output.environment,
            output.duration_ms
        );
        println!(
            "✅ {}: {} service(s), {} artifact(s)",
            output.environment,
            output.services.len(),
            output.artifacts.len()
        );
        println!("📁 Output saved to: {}", output.location.display());
    }
    0
}

/// 有任何發現時以退出碼 1 結束
fn report_checks(reports: &[CheckReport]) -> i32 {
    let mut dirty = false;
    for report in reports {
        if report.is_clean() {
            println!(
                "✅ {}: {} service(s), registry consistent",
                report.environment,
                report.services.len()
            );
        } else {
            dirty = true;
            eprintln!(
                "❌ {}: {} finding(s)",
                report.environment,
                report.findings.len()
            );
            for finding in &report.findings {
                eprintln!("  - {}", finding);
            }
        }
    }
    if dirty {
        1
    } else {
        0
    }
}

async fn serve(host: &str, port: u16) -> Result<(), CompileError> {
    let address = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    server::serve(listener).await?;
    Ok(())
}
