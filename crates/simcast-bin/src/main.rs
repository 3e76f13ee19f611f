use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use simcast_core::server;
use simcast_core::{Engine, EngineConfig};
use simcast_platform::{Device, OpResult, Platform};

#[derive(Parser, Debug)]
#[command(name = "simcast")]
#[command(about = "Boot, control and stream iOS Simulators and Android Emulators")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(long, env = "SIMCAST_CONFIG_PATH", global = true)]
    config_path: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "SIMCAST_LOG_LEVEL", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List simulators and emulators
    Devices {
        /// Only this platform (ios, android)
        #[arg(long)]
        platform: Option<Platform>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Boot a device and wait until it is ready
    Boot {
        id: String,
        #[arg(long)]
        platform: Platform,
        /// Boot timeout in seconds (Android)
        #[arg(long)]
        timeout: Option<u64>,
    },
    Shutdown {
        id: String,
        #[arg(long)]
        platform: Platform,
    },
    /// Install an .app bundle or .apk
    Install {
        id: String,
        #[arg(long)]
        platform: Platform,
        app: PathBuf,
    },
    /// Launch an app by bundle id or package name
    Launch {
        id: String,
        #[arg(long)]
        platform: Platform,
        app_id: String,
        /// Android activity, e.g. .MainActivity
        #[arg(long)]
        activity: Option<String>,
    },
    /// Tap at device coordinates (Android)
    Tap {
        id: String,
        #[arg(long)]
        platform: Platform,
        x: u32,
        y: u32,
    },
    /// Type text (Android)
    Text {
        id: String,
        #[arg(long)]
        platform: Platform,
        text: String,
    },
    /// Send a key event code (Android)
    Key {
        id: String,
        #[arg(long)]
        platform: Platform,
        code: u32,
    },
    /// Save a full-device screenshot
    Screenshot {
        id: String,
        #[arg(long)]
        platform: Platform,
        output: PathBuf,
    },
    /// List Simulator.app windows with their bounds
    Windows,
    /// Capture devices and serve frames over HTTP until Ctrl+C
    Serve {
        /// Server port (overrides config)
        #[arg(long)]
        port: Option<u16>,
        /// iOS simulator UDID to capture (repeatable)
        #[arg(long)]
        ios: Vec<String>,
        /// Android AVD name or serial to capture (repeatable)
        #[arg(long)]
        android: Vec<String>,
        /// Capture rate for every session
        #[arg(long)]
        fps: Option<u32>,
        /// Boot listed devices first
        #[arg(long)]
        boot: bool,
    },
    /// Show the effective configuration
    Config {
        /// Write it to the config path
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let config_path = cli.config_path.unwrap_or_else(EngineConfig::default_path);
    let mut config = EngineConfig::load_or_default(&config_path)?;

    match cli.command {
        Commands::Config { write } => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            if write {
                config.save(&config_path)?;
                info!("config saved to {}", config_path.display());
            }
            Ok(())
        }
        Commands::Serve {
            port,
            ios,
            android,
            fps,
            boot,
        } => {
            if let Some(port) = port {
                config.port = port;
            }
            run_server(config, ios, android, fps, boot).await
        }
        command => {
            if let Commands::Boot { timeout: Some(timeout), .. } = &command {
                config.boot_timeout_secs = *timeout;
            }
            run_command(&Engine::new(config), command).await
        }
    }
}

async fn run_command(engine: &Engine, command: Commands) -> Result<()> {
    let registry = engine.registry();
    let result = match command {
        Commands::Devices { platform, json } => {
            let devices = match platform {
                Some(platform) => registry.list_devices(platform).await,
                None => registry.list_all().await,
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&devices)?);
            } else {
                print_devices(&devices);
            }
            return Ok(());
        }
        Commands::Windows => {
            let windows = engine.list_windows().await?;
            println!("{}", serde_json::to_string_pretty(&windows)?);
            return Ok(());
        }
        Commands::Boot { id, platform, .. } => {
            let outcome = engine.boot(&id, platform).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            return Ok(());
        }
        Commands::Shutdown { id, platform } => registry.shutdown(&id, platform).await,
        Commands::Install { id, platform, app } => registry.install_app(&id, platform, &app).await,
        Commands::Launch {
            id,
            platform,
            app_id,
            activity,
        } => {
            registry
                .launch_app(&id, platform, &app_id, activity.as_deref())
                .await
        }
        Commands::Tap { id, platform, x, y } => registry.send_touch(&id, platform, x, y).await,
        Commands::Text { id, platform, text } => registry.send_text(&id, platform, &text).await,
        Commands::Key { id, platform, code } => registry.send_key(&id, platform, code).await,
        Commands::Screenshot { id, platform, output } => {
            registry.screenshot(&id, platform, &output).await
        }
        Commands::Serve { .. } | Commands::Config { .. } => {
            anyhow::bail!("not a device command")
        }
    };
    report(result)
}

fn report(result: OpResult) -> Result<()> {
    println!("{}", serde_json::to_string(&result)?);
    match result.error {
        Some(e) if !result.success => anyhow::bail!(e),
        _ => Ok(()),
    }
}

fn print_devices(devices: &[Device]) {
    if devices.is_empty() {
        println!("no devices found");
        return;
    }
    println!("{:<38} {:<8} {:<28} {:<12} {:<9} SERIAL", "ID", "PLATFORM", "NAME", "RUNTIME", "STATE");
    for d in devices {
        println!(
            "{:<38} {:<8} {:<28} {:<12} {:<9} {}",
            d.id,
            d.platform,
            d.name,
            d.runtime_label,
            format!("{:?}", d.state),
            d.serial.as_deref().unwrap_or("-"),
        );
    }
}

async fn run_server(
    config: EngineConfig,
    ios: Vec<String>,
    android: Vec<String>,
    fps: Option<u32>,
    boot: bool,
) -> Result<()> {
    let addr = config.listen_addr();
    let engine = Arc::new(Engine::new(config));

    let targets = ios
        .into_iter()
        .map(|id| (id, Platform::Ios))
        .chain(android.into_iter().map(|id| (id, Platform::Android)));
    for (id, platform) in targets {
        if boot {
            if let Err(e) = engine.boot(&id, platform).await {
                error!("failed to boot {} {}: {}", platform, id, e);
                continue;
            }
        }
        match engine.start_capture(&id, platform, fps).await {
            Ok(started) => info!("capturing {} at /stream/{}", id, started.session_id),
            Err(e) => warn!("not capturing {}: {}", id, e),
        }
    }

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    let result = tokio::select! {
        res = server::serve(listener, engine.capture().clone()) => res,
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl+C, shutting down");
            Ok(())
        }
    };

    engine.close().await;
    result
}
