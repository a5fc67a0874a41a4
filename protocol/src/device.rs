//! High-level device abstraction.
//!
//! Provides [`Device`], which identifies the connected Busy Tag once and
//! exposes typed operations for its storage, display, LEDs and Wi-Fi settings.
//!
//! Each operation maps to a fixed command and an expected reply on the
//! underlying [`Interface`].

use crate::{Error, Interface, Result, check_argument, parse_value};
use alloc::{
    format,
    string::{String, ToString},
    vec::Vec,
};
use bitflags_derive::{FlagsDebug, FlagsDisplay, FlagsFromStr};
use core::{
    fmt::{self, Display, Formatter},
    ops::RangeInclusive,
    str::FromStr,
};
use embedded_io_async::{Read, Write};
use log::debug;
use strum::{Display as StrumDisplay, EnumString};

/// Valid display brightness values, in percent.
pub const BRIGHTNESS_RANGE: RangeInclusive<u8> = 1..=100;

/// Kind of a stored file entry.
#[derive(StrumDisplay, EnumString, PartialEq, Eq, Copy, Clone, Debug)]
pub enum FileKind {
    /// Regular file.
    #[strum(serialize = "file")]
    File,
    /// Directory.
    #[strum(serialize = "dir")]
    Directory,
}

/// A file stored on the device.
///
/// Entries are snapshots returned by [`Device::list_files`] and
/// [`Device::list_pictures`], not live handles.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct FileEntry {
    /// File name.
    pub name: String,
    /// File size in bytes.
    pub size: u64,
    /// Entry kind.
    pub kind: FileKind,
}

impl FileEntry {
    /// Parses a `<name>,<size>` picture list entry.
    fn from_picture(val: &str) -> Option<Self> {
        let (name, size) = val.rsplit_once(',')?;

        Some(Self {
            name: name.to_string(),
            size: size.parse().ok()?,
            kind: FileKind::File,
        })
    }

    /// Parses a `<name>,<kind>,<size>` file list entry.
    fn from_file(val: &str) -> Option<Self> {
        let (rest, size) = val.rsplit_once(',')?;
        let (name, kind) = rest.rsplit_once(',')?;

        Some(Self {
            name: name.to_string(),
            size: size.parse().ok()?,
            kind: kind.parse().ok()?,
        })
    }
}

/// Wi-Fi credentials stored on the device.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct WifiConfig {
    /// Network name.
    pub ssid: String,
    /// Network password.
    pub password: String,
}

bitflags::bitflags! {
    /// LED selection.
    ///
    /// Each flag represents one of the device's LEDs.
    #[derive(FlagsDisplay, FlagsFromStr, FlagsDebug, PartialEq, Eq, Copy, Clone)]
    pub struct LedPins: u8 {
        /// All LEDs.
        const All = 0x7f;
        /// First LED.
        const Led1 = 0x01;
        /// Second LED.
        const Led2 = 0x02;
        /// Third LED.
        const Led3 = 0x04;
        /// Fourth LED.
        const Led4 = 0x08;
        /// Fifth LED.
        const Led5 = 0x10;
        /// Sixth LED.
        const Led6 = 0x20;
        /// Seventh LED.
        const Led7 = 0x40;
    }
}

/// Error returned when parsing a [`Color`] fails.
#[derive(PartialEq, Eq, Debug)]
pub struct ParseColorError;

impl Display for ParseColorError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "color must be given as six hex digits (RRGGBB)")
    }
}

impl core::error::Error for ParseColorError {}

/// A 24-bit RGB color.
///
/// Parsed from and displayed as `RRGGBB` hex digits, as used on the wire.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct Color {
    /// Red component.
    pub r: u8,
    /// Green component.
    pub g: u8,
    /// Blue component.
    pub b: u8,
}

impl Color {
    /// Constructs a new color.
    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl FromStr for Color {
    type Err = ParseColorError;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        let hex = s.strip_prefix('#').unwrap_or(s);

        if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ParseColorError);
        }

        let val = u32::from_str_radix(hex, 16).map_err(|_| ParseColorError)?;
        let [_, r, g, b] = val.to_be_bytes();

        Ok(Self { r, g, b })
    }
}

impl Display for Color {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

/// Solid LED color setting.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct LedConfig {
    /// LEDs the color applies to.
    pub pins: LedPins,
    /// Color to display.
    pub color: Color,
}

/// Device metadata read once while connecting.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Identity {
    /// Device name, e.g. `busytag-A1B2C3`.
    pub name: String,
    /// Unique device ID.
    pub device_id: String,
    /// Firmware version.
    pub firmware_version: String,
    /// Manufacturer name.
    pub manufacturer: String,
    /// Total storage capacity in bytes.
    pub capacity: u64,
}

/// A connected Busy Tag.
///
/// Owns the [`Interface`] (and thereby the port) exclusively.
/// The device identity is read in [`Device::connect`] and never refreshed;
/// reconnect to observe changes, e.g. after a firmware update.
///
/// # Errors
///
/// - Device errors (e.g. [`Error::FileNotFound`]) fail the current operation only.
/// - Transport errors close the device. Afterwards, every operation fails with
///   [`Error::Closed`] and the device has to be reconnected.
///
/// # Examples
///
/// ```no_run
/// # use busytag::embedded_io_async::{Read, Write};
/// # async fn example<P: Read + Write>(port: P) -> busytag::Result<(), P::Error> {
/// use busytag::device::{Color, Device, LedConfig, LedPins};
///
/// let mut dev = Device::connect(port).await?;
///
/// dev.write_file("status.png", &[0x89, 0x50, 0x4e, 0x47]).await?;
/// dev.set_active_picture("status.png").await?;
/// dev.set_led_solid_color(&LedConfig {
///     pins: LedPins::All,
///     color: Color::new(0xff, 0x00, 0x00),
/// })
/// .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Device<P> {
    intf: Interface<P>,
    identity: Identity,
}

impl<P: Read + Write> Device<P> {
    /// Connects to the device via the specified port.
    ///
    /// Reads the device identity, which is cached for the lifetime of the instance.
    pub async fn connect(port: P) -> Result<Self, P::Error> {
        let mut intf = Interface::new(port);
        let identity = Identity {
            name: intf.gquery("DN").await?,
            device_id: intf.gquery("ID").await?,
            firmware_version: intf.gquery("FV").await?,
            manufacturer: intf.gquery("MN").await?,
            capacity: parse_value(&intf.gquery("TSS").await?)?,
        };

        debug!("Connected to device: {identity:?}");

        Ok(Self { intf, identity })
    }

    /// Returns the cached device identity.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Returns the device name.
    pub fn name(&self) -> &str {
        &self.identity.name
    }

    /// Returns the unique device ID.
    pub fn device_id(&self) -> &str {
        &self.identity.device_id
    }

    /// Returns the firmware version.
    pub fn firmware_version(&self) -> &str {
        &self.identity.firmware_version
    }

    /// Returns the manufacturer name.
    pub fn manufacturer(&self) -> &str {
        &self.identity.manufacturer
    }

    /// Returns the total storage capacity in bytes.
    pub fn capacity(&self) -> u64 {
        self.identity.capacity
    }

    /// Returns `true` if the device was closed after an unrecoverable failure.
    pub fn is_closed(&self) -> bool {
        self.intf.is_closed()
    }

    /// Lists the pictures that can be shown on the display.
    pub async fn list_pictures(&mut self) -> Result<Vec<FileEntry>, P::Error> {
        self.list("AT+GPL", "+PL:", FileEntry::from_picture).await
    }

    /// Lists all files stored on the device.
    pub async fn list_files(&mut self) -> Result<Vec<FileEntry>, P::Error> {
        self.list("AT+GFL", "+FL:", FileEntry::from_file).await
    }

    /// Downloads a file.
    ///
    /// Files announced as larger than the device's storage capacity are
    /// rejected with [`Error::InvalidSize`] before anything is allocated.
    /// See [`Interface::read_file_limited`].
    pub async fn read_file(&mut self, name: &str) -> Result<Vec<u8>, P::Error> {
        let max_size = usize::try_from(self.identity.capacity).unwrap_or(usize::MAX);

        self.intf.read_file_limited(name, max_size).await
    }

    /// Uploads a file.
    ///
    /// See [`Interface::write_file`].
    pub async fn write_file(&mut self, name: &str, data: &[u8]) -> Result<(), P::Error> {
        self.intf.write_file(name, data).await
    }

    /// Deletes a file.
    pub async fn delete_file(&mut self, name: &str) -> Result<(), P::Error> {
        check_argument("file name", name, &[','])?;

        self.intf.send_command(&format!("AT+DF={name}")).await?;
        self.intf.await_response("+DF:").await?;
        self.intf.await_ok().await
    }

    /// Shows a stored picture on the display.
    pub async fn set_active_picture(&mut self, name: &str) -> Result<(), P::Error> {
        check_argument("picture name", name, &[','])?;

        self.intf.send_command(&format!("AT+SP={name}")).await?;
        self.intf.await_ok().await
    }

    /// Queries the name of the picture currently shown on the display.
    pub async fn active_picture(&mut self) -> Result<String, P::Error> {
        self.intf.query("SP").await
    }

    /// Queries the free storage space in bytes.
    pub async fn free_storage(&mut self) -> Result<u64, P::Error> {
        parse_value(&self.intf.gquery("FSS").await?)
    }

    /// Queries the display brightness in percent.
    pub async fn display_brightness(&mut self) -> Result<u8, P::Error> {
        parse_value(&self.intf.query("DB").await?)
    }

    /// Sets the display brightness in percent.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `brightness` is outside [`BRIGHTNESS_RANGE`].
    ///   Nothing is sent to the device in that case.
    pub async fn set_display_brightness(&mut self, brightness: u8) -> Result<(), P::Error> {
        if !BRIGHTNESS_RANGE.contains(&brightness) {
            return Err(Error::InvalidArgument(format!(
                "brightness must be between 1 and 100, got {brightness}"
            )));
        }

        self.intf
            .send_command(&format!("AT+DB={brightness}"))
            .await?;
        self.intf.await_ok().await
    }

    /// Queries the stored Wi-Fi credentials.
    pub async fn wifi_config(&mut self) -> Result<WifiConfig, P::Error> {
        let val = self.intf.query("WC").await?;
        let (ssid, password) = val
            .split_once(',')
            .ok_or_else(|| Error::MalformedResponse(val.clone()))?;

        Ok(WifiConfig {
            ssid: ssid.to_string(),
            password: password.to_string(),
        })
    }

    /// Replaces the stored Wi-Fi credentials.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if the SSID contains a comma or either value
    ///   contains a line break. Nothing is sent to the device in that case.
    pub async fn set_wifi_config(&mut self, config: &WifiConfig) -> Result<(), P::Error> {
        check_argument("SSID", &config.ssid, &[','])?;
        check_argument("password", &config.password, &[])?;

        self.intf
            .send_command(&format!("AT+WC={},{}", config.ssid, config.password))
            .await?;
        self.intf.await_ok().await
    }

    /// Resets the Wi-Fi credentials to factory defaults.
    pub async fn reset_wifi_config(&mut self) -> Result<(), P::Error> {
        self.intf.send_command("AT+FRWCF").await?;
        self.intf.await_ok().await
    }

    /// Queries the current solid LED color.
    pub async fn led_solid_color(&mut self) -> Result<LedConfig, P::Error> {
        let val = self.intf.query("SC").await?;

        val.split_once(',')
            .and_then(|(pins, color)| {
                Some(LedConfig {
                    pins: LedPins::from_bits_truncate(pins.parse().ok()?),
                    color: color.parse().ok()?,
                })
            })
            .ok_or(Error::MalformedResponse(val))
    }

    /// Lights the selected LEDs in a solid color.
    pub async fn set_led_solid_color(&mut self, config: &LedConfig) -> Result<(), P::Error> {
        self.intf
            .send_command(&format!("AT+SC={},{}", config.pins.bits(), config.color))
            .await?;
        self.intf.await_ok().await
    }

    /// Returns a mutable reference to the underlying command interface.
    pub fn interface(&mut self) -> &mut Interface<P> {
        &mut self.intf
    }

    /// Collects list entries until the terminating `OK`.
    ///
    /// Malformed entries do not abort the listing early, so the reply is
    /// always consumed completely.
    async fn list(
        &mut self,
        cmd: &str,
        prefix: &str,
        parse: fn(&str) -> Option<FileEntry>,
    ) -> Result<Vec<FileEntry>, P::Error> {
        let mut entries = Vec::new();
        let mut malformed = None;

        self.intf.send_command(cmd).await?;

        loop {
            let line = self.intf.next_response().await?;

            if line.starts_with("OK") {
                break;
            }

            match line.strip_prefix(prefix).and_then(parse) {
                Some(entry) => entries.push(entry),
                None => {
                    debug!("Malformed list entry: {line:?}");
                    malformed.get_or_insert(line);
                }
            }
        }

        match malformed {
            Some(line) => Err(Error::MalformedResponse(line)),
            None => Ok(entries),
        }
    }
}
