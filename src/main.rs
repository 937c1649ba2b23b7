use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use camrig::bridge::{AdbBridge, Bridge, V4lBridge};
use camrig::client::{AttachContext, CallbackTable, DeviceClient, DeviceEvent, EventKind, Lifecycle};
use camrig::device::{AndroidDevice, CameraMode, CaptureState, DeviceHandle};
use camrig::settings::XmlSettingsStore;
use camrig::HarnessConfig;

#[derive(Parser)]
#[command(name = "camrig")]
#[command(version)]
#[command(about = "Drive Android phones and USB cameras through recorded camera sequences", long_about = None)]
struct Cli {
    /// Device transport
    #[arg(long, value_enum, default_value = "android", global = true)]
    transport: Transport,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Transport {
    Android,
    UsbCam,
}

#[derive(Subcommand)]
enum Commands {
    /// List reachable devices
    Devices,

    /// Watch devices come and go until Ctrl+C
    Watch {
        /// Print events as JSON lines
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Take a photo
    Photo {
        #[arg(short, long)]
        device: String,
    },

    /// Start a video recording
    VideoStart {
        #[arg(short, long)]
        device: String,
    },

    /// Stop the video recording started by video-start
    VideoStop {
        #[arg(short, long)]
        device: String,
    },

    /// Replay a stored sequence by role name
    Sequence {
        #[arg(short, long)]
        device: String,

        /// Role name (goto_photo, photo, goto_video, video_start, video_stop or custom)
        role: String,
    },

    /// List clickable elements on the current screen (Android)
    DumpUi {
        #[arg(short, long)]
        device: String,
    },

    /// Pull the camera's images (Android)
    PullImages {
        #[arg(short, long)]
        device: String,

        /// Destination directory
        #[arg(short, long, default_value = "./images")]
        output: PathBuf,

        /// Delete the images from the device afterwards
        #[arg(long, default_value = "false")]
        clear: bool,
    },

    /// Reboot a device and wait for it to come back (Android)
    Reboot {
        #[arg(short, long)]
        device: String,

        /// Seconds to wait for the device
        #[arg(long, default_value = "120")]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let config = HarnessConfig::from_env();

    match cli.command {
        Commands::Devices => {
            let client = open_client(cli.transport, &config, CallbackTable::logging()).await?;
            println!(
                "{} Listing {} devices...",
                "🔍".to_string().blue(),
                client.transport().cyan()
            );
            let devices = client.get_devices().await?;
            if devices.is_empty() {
                println!("  {}", "No devices found".yellow());
            }
            for serial in devices {
                println!("  {} {}", "•".green(), serial);
            }
        }

        Commands::Watch { json } => watch(cli.transport, &config, json).await?,

        Commands::Photo { device } => {
            let (_client, handle) = attach(cli.transport, &config, &device).await?;
            handle.take_photo().await?;
            println!("{} Photo taken on {}", "✓".green(), device.cyan());
        }

        Commands::VideoStart { device } => {
            let (_client, handle) = attach(cli.transport, &config, &device).await?;
            handle.start_video().await?;
            println!("{} Recording on {}", "🔴".to_string().red(), device.cyan());
        }

        Commands::VideoStop { device } => {
            let (_client, handle) = attach(cli.transport, &config, &device).await?;
            // the recording was started by an earlier invocation
            handle.core().set_capture(CaptureState {
                mode: CameraMode::Video,
                recording: true,
            });
            handle.stop_video().await?;
            println!("{} Recording stopped on {}", "⏹".yellow(), device.cyan());
        }

        Commands::Sequence { device, role } => {
            let (_client, handle) = attach(cli.transport, &config, &device).await?;
            let settings = handle.settings();
            let Some(sequence) = settings.sequences.get(&role) else {
                anyhow::bail!("No '{}' sequence stored for {}", role, device);
            };
            println!(
                "{} Replaying {} ({} actions)",
                "▶".green().bold(),
                role.cyan(),
                sequence.len()
            );
            handle.do_sequence(sequence).await?;
        }

        Commands::DumpUi { device } => {
            let android = android_device(&config, &device).await?;
            let elements = android.clickable_elements().await?;
            println!("{} {} clickable elements", "📱".to_string().blue(), elements.len());
            for element in elements {
                let (x, y) = element.tap_point();
                println!("  {:<32} ({}, {})", element.key().cyan(), x, y);
            }
        }

        Commands::PullImages {
            device,
            output,
            clear,
        } => {
            let android = android_device(&config, &device).await?;
            let pulled = android.pull_images(&output, clear).await?;
            println!(
                "{} Pulled {} files into {}",
                "✓".green(),
                pulled.len(),
                output.display()
            );
        }

        Commands::Reboot { device, timeout } => {
            let client = open_client(Transport::Android, &config, CallbackTable::logging()).await?;
            let spinner = ProgressBar::new_spinner();
            spinner.set_style(
                ProgressStyle::default_spinner()
                    .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
                    .template("  {spinner} {msg}")?,
            );
            spinner.set_message(format!("Rebooting {}...", device));
            spinner.enable_steady_tick(Duration::from_millis(100));

            let result = client
                .reboot_and_wait(&device, Duration::from_secs(timeout))
                .await;
            spinner.finish_and_clear();
            result?;
            println!("{} {} is back", "✓".green(), device.cyan());
        }
    }

    Ok(())
}

async fn open_bridge(transport: Transport, config: &HarnessConfig) -> anyhow::Result<Arc<dyn Bridge>> {
    let bridge: Arc<dyn Bridge> = match transport {
        Transport::Android => Arc::new(AdbBridge::start(config).await?),
        Transport::UsbCam => Arc::new(V4lBridge::new()),
    };
    Ok(bridge)
}

async fn open_client(
    transport: Transport,
    config: &HarnessConfig,
    callbacks: CallbackTable,
) -> anyhow::Result<DeviceClient> {
    let bridge = open_bridge(transport, config).await?;
    Ok(match transport {
        Transport::Android => DeviceClient::android(bridge, callbacks, config.clone()),
        Transport::UsbCam => DeviceClient::usb_cam(bridge, callbacks, config.clone()),
    })
}

async fn attach(
    transport: Transport,
    config: &HarnessConfig,
    serial: &str,
) -> anyhow::Result<(DeviceClient, Arc<dyn DeviceHandle>)> {
    let client = open_client(transport, config, CallbackTable::logging()).await?;
    if !client.get_devices().await?.contains(serial) {
        anyhow::bail!("Device {} is not connected", serial);
    }
    let handle = client.attach_device(serial).await?;
    Ok((client, handle))
}

async fn android_device(config: &HarnessConfig, serial: &str) -> anyhow::Result<AndroidDevice> {
    let bridge = open_bridge(Transport::Android, config).await?;
    if !bridge.list_reachable_devices().await?.contains(serial) {
        anyhow::bail!("Device {} is not connected", serial);
    }
    let ctx = AttachContext {
        serial: serial.to_string(),
        bridge,
        lifecycle: Lifecycle::standalone(serial),
    };
    let store = Arc::new(XmlSettingsStore::new(&config.settings_dir));
    Ok(AndroidDevice::attach(ctx, store, config).await?)
}

async fn watch(transport: Transport, config: &HarnessConfig, json: bool) -> anyhow::Result<()> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Option<DeviceEvent>>();

    let events = tx.clone();
    let callbacks = CallbackTable::builder()
        .on_all(move |event| {
            let _ = events.send(Some(event.clone()));
        })
        .build();
    let client = open_client(transport, config, callbacks).await?;

    ctrlc::set_handler(move || {
        let _ = tx.send(None);
    })?;

    println!(
        "{} Watching {} devices. Press Ctrl+C to stop.",
        "👀".to_string().blue(),
        client.transport().cyan()
    );
    client.watchdog();

    while let Some(Some(event)) = rx.recv().await {
        print_event(&event, json)?;
        match (event.action, event.serial.as_deref()) {
            (EventKind::Connected, Some(serial)) => {
                if let Err(e) = client.attach_device(serial).await {
                    log::error!("Failed to attach {}: {}", serial, e);
                }
            }
            (EventKind::Disconnected, Some(serial)) => {
                if client.handle(serial).is_some() {
                    client.detach_device(serial).await;
                }
            }
            _ => {}
        }
    }

    println!("\n{} Stopping watchdog...", "⏹".yellow());
    client.kill_watchdog();
    client.join_watchdog().await;
    client.detach_all().await;
    Ok(())
}

fn print_event(event: &DeviceEvent, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }

    let serial = event.serial.as_deref().unwrap_or("");
    match event.action {
        EventKind::Connected => println!("  {} {} {}", "+".green().bold(), serial, event.device_type.dimmed()),
        EventKind::Disconnected => println!("  {} {} {}", "-".red().bold(), serial, event.device_type.dimmed()),
        EventKind::Error => println!(
            "  {} {}",
            "!".red().bold(),
            event.details.as_deref().unwrap_or_default().red()
        ),
        EventKind::WatchdogStarting | EventKind::WatchdogStarted => {
            println!("  {} {}", "•".blue(), event.action.to_string().dimmed())
        }
    }
    Ok(())
}
