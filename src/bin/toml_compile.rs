use clap::Parser;
use fleet_compiler::app::runner::publish_environments;
use fleet_compiler::app::server;
use fleet_compiler::utils::{logger, validation::Validate};
use fleet_compiler::{CancellationToken, CompilerConfig, LocalStorage};
use std::path::Path;

#[derive(Parser)]
#[command(name = "toml-compile")]
#[command(about = "Fleet compiler driven by a TOML run configuration")]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "compile.toml")]
    config: String,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Override the archive setting from config
    #[arg(long)]
    archive: Option<bool>,

    /// Dry run - show what would be compiled without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Serve the HTTP API on the [server] address instead of compiling
    #[arg(long)]
    serve: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // 初始化日誌
    logger::init_cli_logger(args.verbose);

    tracing::info!("🚀 Starting TOML-based fleet compiler");
    tracing::info!("📁 Loading configuration from: {}", args.config);

    // 載入 TOML 配置
    let mut config = match CompilerConfig::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load config file '{}': {}", args.config, e);
            eprintln!("💡 Make sure the file exists and is valid TOML format");
            std::process::exit(1);
        }
    };

    // 應用命令列覆蓋設定
    if let Some(archive) = args.archive {
        config.compiler.archive = Some(archive);
        tracing::info!("🔧 Archive overridden to: {}", archive);
    }

    // 驗證配置
    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }

    tracing::info!("✅ Configuration loaded and validated successfully");

    // 顯示配置摘要
    display_config_summary(&config, &args);

    if args.dry_run {
        tracing::info!("🔍 DRY RUN MODE - No files will be written");
        perform_dry_run(&config).await;
        return Ok(());
    }

    if args.serve {
        let address = config.server_address();
        tracing::info!("🌐 Serving compile API from run file on {}", address);
        let listener = tokio::net::TcpListener::bind(&address).await?;
        server::serve(listener).await?;
        return Ok(());
    }

    let storage = LocalStorage::new(".");
    let result = match config.request(&storage).await {
        Ok(request) => {
            publish_environments(
                request,
                &config.compiler.environments,
                Path::new(&config.compiler.output_dir),
                config.archive(),
                CancellationToken::new(),
            )
            .await
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(outputs) => {
            for output in outputs {
                tracing::info!("✅ {} compiled in {}ms", output.environment, output.duration_ms);
                println!(
                    "✅ {}: {} artifact(s)",
                    output.environment,
                    output.artifacts.len()
                );
                println!("📁 Output saved to: {}", output.location.display());
            }
        }
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

            let exit_code = e.exit_code();
            if exit_code > 0 {
                std::process::exit(exit_code);
            }
        }
    }

    Ok(())
}

fn display_config_summary(config: &CompilerConfig, args: &Args) {
    println!("📋 Configuration Summary:");
    println!("  Master: {}", config.compiler.master);
    println!("  Registry: {}", config.compiler.registry);
    println!("  Environments: {}", config.compiler.environments.join(", "));
    println!("  Output: {}", config.compiler.output_dir);
    println!("  Archive: {}", config.archive());
    if args.serve {
        println!("  Server: {}", config.server_address());
    }

    if !config.overlays().is_empty() {
        println!("  Overlays: {}", config.overlays().join(", "));
    }

    if args.dry_run {
        println!("  🔍 DRY RUN MODE ENABLED");
    }

    println!();
}

async fn perform_dry_run(config: &CompilerConfig) {
    println!("🔍 Dry Run Analysis:");
    println!();

    println!("📄 Inputs:");
    for path in [&config.compiler.master, &config.compiler.registry]
        .into_iter()
        .chain(config.overlays())
    {
        let marker = if Path::new(path).is_file() { "✅" } else { "❌ missing" };
        println!("  {} {}", marker, path);
    }

    println!();
    println!("💾 Output Configuration:");
    let environments = &config.compiler.environments;
    for environment in environments {
        let target = if environments.len() == 1 {
            config.compiler.output_dir.clone()
        } else {
            format!("{}/{}", config.compiler.output_dir, environment)
        };
        println!("  {} -> {}", environment, target);
    }
    if let Ok(formats) = config.formats() {
        let names: Vec<&str> = formats.iter().map(|f| f.as_str()).collect();
        println!("  Formats: {}", names.join(", "));
    }

    if let Some(provenance) = config.provenance() {
        println!();
        println!("🏷️ Provenance: {}@{} ({})", provenance.repository, provenance.reference, provenance.revision);
    }

    if !config.variables().is_empty() {
        println!();
        println!("🔄 Variables:");
        for key in config.variables().keys() {
            println!("  {}", key);
        }
    }

    println!();
    println!("✅ Dry run analysis complete. Use --verbose for more details during actual run.");
}
