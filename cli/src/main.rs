mod config;

use crate::config::Config;
use anyhow::{Context, Result, anyhow, bail};
use busytag::{
    device::{Color, Device, FileEntry, LedConfig, LedPins, WifiConfig},
    serial::{self, Port},
};
use clap::{CommandFactory, Parser, Subcommand};
use log::debug;
use std::{fs, path::PathBuf};
use tokio::time::{self, Duration};

// Timeout for establishing the device connection
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

// Timeout for commands without file transfers
const DEVICE_TIMEOUT: Duration = Duration::from_secs(5);

// Timeout for file uploads and downloads
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Config file path [default: ~/.busytag.toml]
    #[arg(short, long)]
    config_file: Option<PathBuf>,

    /// Serial port path (e.g. /dev/ttyACM0), remembered in the config file
    #[arg(short, long)]
    device: Option<String>,

    /// Serial port baud rate, remembered in the config file
    #[arg(short, long)]
    baud_rate: Option<u32>,

    /// Commands to run in order over one connection (see `busytag help`)
    #[arg(
        value_name = "COMMAND",
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    commands: Vec<String>,
}

/// A single command of the command sequence.
#[derive(Parser, Debug)]
#[command(name = "busytag", no_binary_name = true)]
struct Step {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show device information
    Info,
    /// List pictures that can be shown on the display
    ListPictures,
    /// List all files stored on the device
    ListFiles,
    /// Show a stored picture on the display
    SetPicture { name: String },
    /// Show the name of the displayed picture
    GetPicture,
    /// Upload a local file
    Put { path: PathBuf },
    /// Download a file
    Get {
        name: String,

        /// Output path [default: file name]
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Delete a file
    Rm { name: String },
    /// Light the LEDs in a solid color
    SetLed {
        /// Color as hex digits (RRGGBB)
        color: Color,

        /// LEDs to light (e.g. "Led1 | Led2")
        #[arg(short, long, default_value = "All")]
        pins: String,
    },
    /// Show the current LED color
    GetLed,
    /// Show the display brightness
    GetBrightness,
    /// Set the display brightness (1-100)
    SetBrightness { brightness: u8 },
    /// Show the stored Wi-Fi credentials
    GetWifi,
    /// Store Wi-Fi credentials
    SetWifi { ssid: String, password: String },
    /// Reset the Wi-Fi credentials to factory defaults
    ResetWifi,
    /// Show the free storage space
    FreeSpace,
}

impl Command {
    fn timeout(&self) -> Duration {
        match self {
            Self::Put { .. } | Self::Get { .. } => TRANSFER_TIMEOUT,
            _ => DEVICE_TIMEOUT,
        }
    }
}

/// Splits the command line into consecutive commands.
///
/// A command ends at the shortest prefix that parses and is followed either
/// by another command name or by the end of the line, so arguments that happen
/// to equal a command name still work (e.g. `set-picture info`).
fn parse_commands(args: &[String]) -> Result<Vec<Command>, clap::Error> {
    let names: Vec<String> = Step::command()
        .get_subcommands()
        .map(|cmd| cmd.get_name().to_string())
        .collect();
    let mut commands = Vec::new();
    let mut rest = args;

    while !rest.is_empty() {
        let end = (1..rest.len())
            .filter(|&end| names.contains(&rest[end]))
            .find(|&end| Step::try_parse_from(&rest[..end]).is_ok())
            .unwrap_or(rest.len());

        commands.push(Step::try_parse_from(&rest[..end])?.command);
        rest = &rest[end..];
    }

    Ok(commands)
}

fn format_size(size: u64) -> String {
    #[allow(clippy::cast_precision_loss)]
    let val = size as f64;

    match size {
        0..1_000 => format!("{size} B"),
        1_000..500_000 => format!("{:.2} kB", val / 1_000.0),
        _ => format!("{:.2} MB", val / 1_000_000.0),
    }
}

fn print_entries(entries: &[FileEntry], with_kind: bool) {
    for entry in entries {
        if with_kind {
            println!(
                "  {} ({} - {})",
                entry.name,
                entry.kind,
                format_size(entry.size)
            );
        } else {
            println!("  {} ({})", entry.name, format_size(entry.size));
        }
    }
}

async fn print_free_space(dev: &mut Device<Port>) -> Result<()> {
    let free = dev
        .free_storage()
        .await
        .context("Failed to query free storage")?;

    println!("Available space: {}", format_size(free));

    Ok(())
}

async fn run(dev: &mut Device<Port>, cmd: Command) -> Result<()> {
    debug!("Running command: {cmd:?}");

    match cmd {
        Command::Info => {
            let id = dev.identity();

            println!("Name: {}", id.name);
            println!("Device ID: {}", id.device_id);
            println!("Firmware version: {}", id.firmware_version);
            println!("Manufacturer: {}", id.manufacturer);
            println!("Capacity: {}", format_size(id.capacity));
            print_free_space(dev).await?;
        }
        Command::ListPictures => {
            let pictures = dev
                .list_pictures()
                .await
                .context("Failed to list pictures")?;

            println!("Pictures in device:");
            print_entries(&pictures, false);
            print_free_space(dev).await?;
        }
        Command::ListFiles => {
            let files = dev.list_files().await.context("Failed to list files")?;

            println!("Files in device:");
            print_entries(&files, true);
            print_free_space(dev).await?;
        }
        Command::SetPicture { name } => dev
            .set_active_picture(&name)
            .await
            .with_context(|| format!("Failed to show picture {name}"))?,
        Command::GetPicture => println!(
            "Active picture: {}",
            dev.active_picture()
                .await
                .context("Failed to query active picture")?
        ),
        Command::Put { path } => {
            let name = path
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| anyhow!("Invalid file name: {}", path.display()))?;
            let data = fs::read(&path)
                .with_context(|| format!("Failed to read local file {}", path.display()))?;

            dev.write_file(name, &data)
                .await
                .with_context(|| format!("Failed to upload {name}"))?;
            println!("Uploaded {name} ({})", format_size(data.len() as u64));
        }
        Command::Get { name, output } => {
            let data = dev
                .read_file(&name)
                .await
                .with_context(|| format!("Failed to download {name}"))?;
            let path = output.unwrap_or_else(|| PathBuf::from(&name));

            fs::write(&path, &data)
                .with_context(|| format!("Failed to write local file {}", path.display()))?;
            println!("Downloaded {name} ({})", format_size(data.len() as u64));
        }
        Command::Rm { name } => dev
            .delete_file(&name)
            .await
            .with_context(|| format!("Failed to delete {name}"))?,
        Command::SetLed { color, pins } => {
            let pins: LedPins = pins
                .parse()
                .map_err(|err| anyhow!("Invalid LED selection {pins:?}: {err}"))?;

            dev.set_led_solid_color(&LedConfig { pins, color })
                .await
                .context("Failed to set LED color")?;
        }
        Command::GetLed => {
            let led = dev
                .led_solid_color()
                .await
                .context("Failed to query LED color")?;

            println!("LED color: {} ({})", led.color, led.pins);
        }
        Command::GetBrightness => println!(
            "Brightness: {}",
            dev.display_brightness()
                .await
                .context("Failed to query brightness")?
        ),
        Command::SetBrightness { brightness } => dev
            .set_display_brightness(brightness)
            .await
            .context("Failed to set brightness")?,
        Command::GetWifi => {
            let wifi = dev
                .wifi_config()
                .await
                .context("Failed to query Wi-Fi config")?;

            println!("SSID: {}", wifi.ssid);
            println!("Password: {}", wifi.password);
        }
        Command::SetWifi { ssid, password } => dev
            .set_wifi_config(&WifiConfig { ssid, password })
            .await
            .context("Failed to set Wi-Fi config")?,
        Command::ResetWifi => dev
            .reset_wifi_config()
            .await
            .context("Failed to reset Wi-Fi config")?,
        Command::FreeSpace => print_free_space(dev).await?,
    }

    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let commands = parse_commands(&args.commands).unwrap_or_else(|err| err.exit());
    let config_path = args.config_file.unwrap_or_else(config::default_path);
    let mut config = Config::load(&config_path)?;

    // Command line arguments take precedence over the config file
    if let Some(device) = args.device {
        config.device = Some(device);
    }

    if let Some(rate) = args.baud_rate {
        config.baud_rate = rate;
    }

    let Some(path) = config.device.as_deref() else {
        bail!("Device must be specified, either with --device or in the config file");
    };
    let port = serial::open(path, config.baud_rate).context("Failed to open serial port")?;
    let mut dev = time::timeout(CONNECT_TIMEOUT, Device::connect(port))
        .await
        .context("Device connection timed out")?
        .context("Failed to connect to device")?;

    println!("Connected to {}", dev.name());

    for cmd in commands {
        let timeout = cmd.timeout();

        // An abandoned exchange leaves the session unusable, so stop here
        time::timeout(timeout, run(&mut dev, cmd))
            .await
            .with_context(|| format!("Device did not respond within {timeout:?}"))??;
    }

    config.save(&config_path)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_formatting() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(999), "999 B");
        assert_eq!(format_size(1_000), "1.00 kB");
        assert_eq!(format_size(123_456), "123.46 kB");
        assert_eq!(format_size(500_000), "0.50 MB");
        assert_eq!(format_size(15_000_000), "15.00 MB");
    }

    fn parse(args: &[&str]) -> Result<(Args, Vec<Command>), clap::Error> {
        let args = Args::try_parse_from(args)?;
        let commands = parse_commands(&args.commands)?;

        Ok((args, commands))
    }

    #[test]
    fn parse_arguments() {
        let (args, commands) = parse(&[
            "busytag",
            "--device",
            "/dev/ttyACM0",
            "set-led",
            "ff0000",
            "--pins",
            "Led1 | Led2",
        ])
        .expect("arguments should parse");

        assert_eq!(args.device.as_deref(), Some("/dev/ttyACM0"));
        assert!(
            matches!(
                commands.as_slice(),
                [Command::SetLed { color, pins }]
                    if *color == Color::new(0xff, 0x00, 0x00) && pins == "Led1 | Led2"
            ),
            "command should be parsed"
        );
    }

    #[test]
    fn parse_command_sequence() {
        let (_, commands) = parse(&[
            "busytag",
            "-d",
            "/dev/ttyACM0",
            "put",
            "a.gif",
            "set-picture",
            "a.gif",
            "get",
            "b.gif",
            "--output",
            "out.gif",
            "list-files",
        ])
        .expect("arguments should parse");

        assert!(
            matches!(
                commands.as_slice(),
                [
                    Command::Put { path },
                    Command::SetPicture { name },
                    Command::Get { name: get, output: Some(output) },
                    Command::ListFiles,
                ] if path == &PathBuf::from("a.gif")
                    && name == "a.gif"
                    && get == "b.gif"
                    && output == &PathBuf::from("out.gif")
            ),
            "commands should be parsed in order, got {commands:?}"
        );
    }

    #[test]
    fn parse_argument_named_like_command() {
        let (_, commands) =
            parse(&["busytag", "rm", "info", "info"]).expect("arguments should parse");

        assert!(
            matches!(
                commands.as_slice(),
                [Command::Rm { name }, Command::Info] if name == "info"
            ),
            "argument should not start a new command, got {commands:?}"
        );
    }

    #[test]
    fn command_timeouts() {
        assert_eq!(
            Command::Put { path: "a.gif".into() }.timeout(),
            TRANSFER_TIMEOUT,
            "uploads should use the transfer timeout"
        );
        assert_eq!(
            Command::Info.timeout(),
            DEVICE_TIMEOUT,
            "other commands should use the device timeout"
        );
    }

    #[test]
    fn reject_invalid_color() {
        assert!(
            parse(&["busytag", "set-led", "red"]).is_err(),
            "invalid color should be rejected"
        );
    }

    #[test]
    fn reject_missing_command() {
        assert!(parse(&["busytag"]).is_err(), "a command should be required");
        assert!(
            parse(&["busytag", "info", "bogus"]).is_err(),
            "unknown commands should be rejected"
        );
    }
}
