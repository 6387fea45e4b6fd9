//! A serial port endpoint.

use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use super::{DeviceStream, Endpoint, EndpointId};
use crate::{
    config::{DeviceSpec, OptionValue},
    error::Error,
};

/// Used when the device string does not give a baudrate.
pub const DEFAULT_BAUDRATE: u32 = 9600;

/// The settings a serial port is opened with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PortSettings {
    pub(crate) baud: u32,
    pub(crate) data_bits: serialport::DataBits,
    pub(crate) parity: serialport::Parity,
    pub(crate) stop_bits: serialport::StopBits,
    pub(crate) flow_control: serialport::FlowControl,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            baud: DEFAULT_BAUDRATE,
            data_bits: serialport::DataBits::Eight,
            parity: serialport::Parity::None,
            stop_bits: serialport::StopBits::One,
            flow_control: serialport::FlowControl::None,
        }
    }
}

fn is_enabled(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl PortSettings {
    /// Apply the options we know how to apply.
    /// Returns the keys which were not understood, so they can be reported.
    pub(crate) fn from_spec(spec: &DeviceSpec) -> (Self, Vec<String>) {
        let mut settings = Self::default();
        let mut ignored = vec![];

        for (key, value) in spec.options.iter() {
            let applied = match (key.as_str(), value) {
                ("baudrate", OptionValue::Integer(baud)) => u32::try_from(*baud)
                    .map(|baud| settings.baud = baud)
                    .is_ok(),
                ("stopbits", OptionValue::Integer(1)) => {
                    settings.stop_bits = serialport::StopBits::One;
                    true
                }
                ("stopbits", OptionValue::Integer(2)) => {
                    settings.stop_bits = serialport::StopBits::Two;
                    true
                }
                ("bytesize", OptionValue::Text(bits)) => match bits.trim() {
                    "5" => Some(serialport::DataBits::Five),
                    "6" => Some(serialport::DataBits::Six),
                    "7" => Some(serialport::DataBits::Seven),
                    "8" => Some(serialport::DataBits::Eight),
                    _ => None,
                }
                .map(|bits| settings.data_bits = bits)
                .is_some(),
                ("parity", OptionValue::Text(parity)) => {
                    match parity.trim().to_ascii_uppercase().as_str() {
                        "N" | "NONE" => Some(serialport::Parity::None),
                        "E" | "EVEN" => Some(serialport::Parity::Even),
                        "O" | "ODD" => Some(serialport::Parity::Odd),
                        _ => None,
                    }
                    .map(|parity| settings.parity = parity)
                    .is_some()
                }
                ("rtscts", OptionValue::Text(flag)) => is_enabled(flag)
                    .map(|on| {
                        if on {
                            settings.flow_control = serialport::FlowControl::Hardware;
                        }
                    })
                    .is_some(),
                ("xonxoff", OptionValue::Text(flag)) => is_enabled(flag)
                    .map(|on| {
                        if on {
                            settings.flow_control = serialport::FlowControl::Software;
                        }
                    })
                    .is_some(),
                _ => false,
            };

            if !applied {
                ignored.push(format!("{key}={value}"));
            }
        }

        (settings, ignored)
    }
}

/// A tty/COM port, opened through `tokio-serial`.
#[derive(Debug)]
pub struct SerialEndpoint {
    id: EndpointId,
    settings: PortSettings,
}

impl SerialEndpoint {
    /// Set up the endpoint from a device string's path and options.
    ///
    /// Options which cannot be applied to a serial port are logged and otherwise ignored.
    pub fn new(spec: DeviceSpec) -> Self {
        let (settings, ignored) = PortSettings::from_spec(&spec);

        if !ignored.is_empty() {
            warn!(device = %spec.id, ?ignored, "Ignoring options the serial driver does not support");
        }

        Self {
            id: spec.id,
            settings,
        }
    }

    fn path(&self) -> String {
        match &self.id {
            EndpointId::Tty(tty) => tty.clone(),
            other => other.to_string(),
        }
    }
}

impl Endpoint for SerialEndpoint {
    fn id(&self) -> &EndpointId {
        &self.id
    }

    fn open(&self) -> Result<DeviceStream, Error> {
        let path = self.path();
        let PortSettings {
            baud,
            data_bits,
            parity,
            stop_bits,
            flow_control,
        } = self.settings;

        debug!(%path, %baud, ?data_bits, ?parity, ?stop_bits, ?flow_control, "Opening serial port");

        let serial_stream = tokio_serial::new(&path, baud)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .flow_control(flow_control)
            .open_native_async()
            .map_err(|e| Error::DeviceUnavailable {
                device: path.clone(),
                problem: e.to_string(),
            })?;

        info!(%path, "Serial port open");

        Ok(Box::new(serial_stream))
    }
}
