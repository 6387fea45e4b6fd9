use std::{
    collections::BTreeMap,
    fmt::Display,
    net::{IpAddr, Ipv4Addr},
    path::Path,
    str::FromStr,
    time::Duration,
};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{endpoint::EndpointId, error::Error};

/// How long a device may stay quiet before its reply is considered complete,
/// unless configured otherwise.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Options which are parsed as integers.
/// Anything else is kept as text.
const INTEGER_OPTIONS: [&str; 2] = ["baudrate", "stopbits"];

/// The value of a single device option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    /// A recognized numeric option, such as `baudrate`.
    Integer(i64),

    /// Any option we do not interpret ourselves.
    /// Passed on as-is.
    Text(String),
}

impl Display for OptionValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptionValue::Integer(i) => write!(f, "{i}"),
            OptionValue::Text(t) => write!(f, "{t}"),
        }
    }
}

/// Serial parameters given alongside a device path,
/// e.g. the `baudrate=9600,stopbits=1` part of `/dev/ttyUSB0,baudrate=9600,stopbits=1`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SerialOptions(BTreeMap<String, OptionValue>);

impl SerialOptions {
    /// Look up an option by key.
    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.0.get(key)
    }

    /// Set an option, replacing any previous value.
    pub fn insert<S: Into<String>>(&mut self, key: S, value: OptionValue) {
        self.0.insert(key.into(), value);
    }

    /// The baud rate, if given.
    pub fn baudrate(&self) -> Option<i64> {
        self.integer("baudrate")
    }

    /// The number of stop bits, if given.
    pub fn stopbits(&self) -> Option<i64> {
        self.integer("stopbits")
    }

    fn integer(&self, key: &str) -> Option<i64> {
        match self.get(key) {
            Some(OptionValue::Integer(i)) => Some(*i),
            _ => None,
        }
    }

    /// Iterate over all options, sorted by key.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &OptionValue)> {
        self.0.iter()
    }

    /// No options given.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A device and its options, as given by a device string such as
/// `/dev/ttyUSB0,baudrate=9600,stopbits=1`.
///
/// A path of the form `mock:NAME` gives an in-memory echo device instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceSpec {
    /// Which device.
    pub id: EndpointId,

    /// Serial parameters for the device.
    pub options: SerialOptions,
}

impl DeviceSpec {
    /// A device without any options.
    pub fn new(id: EndpointId) -> Self {
        Self {
            id,
            options: SerialOptions::default(),
        }
    }
}

impl FromStr for DeviceSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(',');

        let path = parts.next().unwrap_or_default().trim();
        if path.is_empty() {
            return Err(Error::bad_config(format!(
                "The device string `{s}` does not start with a device path"
            )));
        }

        let mut options = SerialOptions::default();

        for part in parts {
            let (key, value) = part.split_once('=').ok_or_else(|| {
                Error::bad_config(format!(
                    "The option `{part}` in device string `{s}` is not of the form `key=value`"
                ))
            })?;

            let key = key.trim();
            if key.is_empty() {
                return Err(Error::bad_config(format!(
                    "The option `{part}` in device string `{s}` has no key"
                )));
            }

            let value = if INTEGER_OPTIONS.contains(&key) {
                let number = value.trim().parse().map_err(|e| {
                    Error::bad_config(format!(
                        "The option `{key}` in device string `{s}` must be an integer, got `{value}`: {e}"
                    ))
                })?;
                OptionValue::Integer(number)
            } else {
                OptionValue::Text(value.to_owned())
            };

            options.insert(key, value);
        }

        let id = match path.strip_prefix(EndpointId::MOCK_PREFIX) {
            Some(name) => EndpointId::mock(name),
            None => EndpointId::tty(path),
        };

        Ok(Self { id, options })
    }
}

impl TryFrom<String> for DeviceSpec {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DeviceSpec> for String {
    fn from(spec: DeviceSpec) -> Self {
        spec.to_string()
    }
}

impl Display for DeviceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)?;
        for (key, value) in self.options.iter() {
            write!(f, ",{key}={value}")?;
        }
        Ok(())
    }
}

/// A literal byte sequence which ends a device reply.
///
/// Written as a string where `\r`, `\n`, `\t`, `\0`, `\\` and `\xHH` are escapes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Delimiter(Vec<u8>);

impl Delimiter {
    /// A delimiter from raw bytes.
    pub fn new<B: Into<Vec<u8>>>(bytes: B) -> Self {
        Self(bytes.into())
    }

    /// Borrow the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// An empty delimiter means "no delimiter".
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse a delimiter where the empty string means none.
    pub fn parse_optional(s: &str) -> Result<Option<Self>, Error> {
        let delimiter: Self = s.parse()?;
        Ok((!delimiter.is_empty()).then_some(delimiter))
    }
}

impl FromStr for Delimiter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = vec![];
        let mut chars = s.chars();

        while let Some(c) = chars.next() {
            if c != '\\' {
                let mut encoded = [0; 4];
                bytes.extend_from_slice(c.encode_utf8(&mut encoded).as_bytes());
                continue;
            }

            let byte = match chars.next() {
                Some('r') => b'\r',
                Some('n') => b'\n',
                Some('t') => b'\t',
                Some('0') => b'\0',
                Some('\\') => b'\\',
                Some('x') => {
                    let hex = chars.by_ref().take(2).collect::<String>();
                    u8::from_str_radix(&hex, 16)
                        .ok()
                        .filter(|_| {
                            hex.len() == 2 && hex.chars().all(|c| c.is_ascii_hexdigit())
                        })
                        .ok_or_else(|| {
                            Error::bad_config(format!(
                                "The delimiter `{s}` has a bad hex escape `\\x{hex}`"
                            ))
                        })?
                }
                Some(other) => {
                    return Err(Error::bad_config(format!(
                        "The delimiter `{s}` has an unknown escape `\\{other}`"
                    )))
                }
                None => {
                    return Err(Error::bad_config(format!(
                        "The delimiter `{s}` ends with a lone backslash"
                    )))
                }
            };

            bytes.push(byte);
        }

        Ok(Self(bytes))
    }
}

impl Display for Delimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            match byte {
                b'\r' => write!(f, "\\r")?,
                b'\n' => write!(f, "\\n")?,
                b'\t' => write!(f, "\\t")?,
                b'\0' => write!(f, "\\0")?,
                b'\\' => write!(f, "\\\\")?,
                0x20..=0x7e => write!(f, "{}", *byte as char)?,
                other => write!(f, "\\x{other:02x}")?,
            }
        }
        Ok(())
    }
}

impl TryFrom<String> for Delimiter {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Delimiter> for String {
    fn from(delimiter: Delimiter) -> Self {
        delimiter.to_string()
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(duration: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

fn default_response_timeout() -> Duration {
    DEFAULT_RESPONSE_TIMEOUT
}

/// One device exposed on one TCP port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// The device, and how to open it.
    pub device: DeviceSpec,

    /// The TCP port clients connect to.
    /// Zero means any free port.
    pub port: u16,

    /// How long the device may be quiet before its reply is considered complete.
    #[serde(
        rename = "timeout_ms",
        with = "millis",
        default = "default_response_timeout"
    )]
    pub response_timeout: Duration,

    /// If set, replies end with this delimiter instead of at the first quiet period.
    #[serde(default)]
    pub delimiter: Option<Delimiter>,
}

impl BridgeConfig {
    /// A bridge with the default response timeout and no delimiter.
    pub fn new(device: DeviceSpec, port: u16) -> Self {
        Self {
            device,
            port,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            delimiter: None,
        }
    }

    /// Parse the device string and pair it with a port.
    pub fn parse(device: &str, port: u16) -> Result<Self, Error> {
        Ok(Self::new(device.parse()?, port))
    }

    /// Use the given response timeout.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Use delimiter mode.
    pub fn with_delimiter(mut self, delimiter: Delimiter) -> Self {
        self.delimiter = Some(delimiter);
        self
    }

    /// The delimiter, unless none (or an empty one) is configured.
    pub fn delimiter(&self) -> Option<&Delimiter> {
        self.delimiter.as_ref().filter(|d| !d.is_empty())
    }
}

fn default_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

/// The configuration used for running the bridges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// The address all bridges listen on.
    #[serde(default = "default_bind")]
    pub bind: IpAddr,

    /// One entry per device.
    pub bridges: Vec<BridgeConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            bridges: vec![],
        }
    }
}

impl Config {
    fn ron() -> ron::Options {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .with_default_extension(ron::extensions::Extensions::UNWRAP_NEWTYPES)
    }

    /// Deserialize a .ron file's contents.
    pub fn deserialize(input: &str) -> Result<Self, Error> {
        Self::ron()
            .from_str::<Config>(input)
            .map_err(|e| Error::bad_config(format!("Could not parse configuration: {e}")))
    }

    /// Setup a new configuration from a RON file.
    pub fn new_from_path<P: AsRef<Path>>(p: P) -> Result<Self, Error> {
        let p = p.as_ref();
        let s = std::fs::read_to_string(p)
            .map_err(|e| Error::bad_config(format!("Could not read {p:?}: {e}")))?;

        Self::deserialize(&s)
    }

    /// Pair up devices and ports, in the order given.
    /// All bridges share the same timeout and delimiter.
    pub fn from_pairs<S: AsRef<str>>(
        devices: &[S],
        ports: &[u16],
        response_timeout: Duration,
        delimiter: Option<Delimiter>,
        bind: IpAddr,
    ) -> Result<Self, Error> {
        if devices.is_empty() || ports.is_empty() {
            return Err(Error::bad_config("Both devices and ports are required"));
        }

        if devices.len() != ports.len() {
            return Err(Error::bad_config(format!(
                "The number of devices ({}) must match the number of ports ({})",
                devices.len(),
                ports.len()
            )));
        }

        let bridges = devices
            .iter()
            .zip(ports)
            .map(|(device, &port)| -> Result<BridgeConfig, Error> {
                let mut bridge = BridgeConfig::parse(device.as_ref(), port)?
                    .with_response_timeout(response_timeout);
                bridge.delimiter = delimiter.clone();
                Ok(bridge)
            })
            .collect::<Result<Vec<_>, Error>>()?;

        Ok(Self { bind, bridges })
    }

    /// An example configuration with some fields filled in.
    pub fn example() -> Self {
        let mut usb = DeviceSpec::new(EndpointId::tty("/dev/ttyUSB0"));
        usb.options.insert("baudrate", OptionValue::Integer(9600));
        usb.options.insert("stopbits", OptionValue::Integer(1));
        usb.options.insert("parity", OptionValue::Text("N".into()));

        Self {
            bind: default_bind(),
            bridges: vec![
                BridgeConfig::new(usb, 9001),
                BridgeConfig::new(DeviceSpec::new(EndpointId::tty("/dev/ttyS0")), 9002)
                    .with_response_timeout(Duration::from_millis(250))
                    .with_delimiter(Delimiter::new(*b"\r\n")),
                BridgeConfig::new(DeviceSpec::new(EndpointId::mock("echo")), 9003),
            ],
        }
    }

    /// Serialize the configuration in a "pretty" (i.e. non-compact) fashion.
    pub fn serialize_pretty(&self) -> Result<String, Error> {
        Self::ron()
            .to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| Error::bad_config(format!("Could not serialize configuration: {e}")))
    }

    fn check_not_empty(&self) -> Result<(), Error> {
        if self.bridges.is_empty() {
            Err(Error::bad_config("No bridges configured"))
        } else {
            Ok(())
        }
    }

    fn check_duplicate_ports(&self) -> Result<(), Error> {
        // Port zero asks the OS for any free port, so several of those never clash.
        let duplicates = self
            .bridges
            .iter()
            .map(|bridge| bridge.port)
            .filter(|&port| port != 0)
            .duplicates()
            .collect::<Vec<_>>();

        if duplicates.is_empty() {
            Ok(())
        } else {
            Err(Error::bad_config(format!(
                "Each bridge needs its own port. Duplicates: {duplicates:?}"
            )))
        }
    }

    fn check_timeouts(&self) -> Result<(), Error> {
        for bridge in &self.bridges {
            if bridge.response_timeout.is_zero() {
                return Err(Error::bad_config(format!(
                    "The bridge on port {} has a zero response timeout",
                    bridge.port
                )));
            }
        }

        Ok(())
    }

    fn check_serial_options(&self) -> Result<(), Error> {
        for bridge in &self.bridges {
            let device = &bridge.device;

            if let Some(stopbits) = device.options.stopbits() {
                if !matches!(stopbits, 1 | 2) {
                    return Err(Error::bad_config(format!(
                        "`{device}`: stopbits must be 1 or 2, got {stopbits}"
                    )));
                }
            }

            if let Some(baudrate) = device.options.baudrate() {
                if baudrate <= 0 || u32::try_from(baudrate).is_err() {
                    return Err(Error::bad_config(format!(
                        "`{device}`: {baudrate} is not a usable baudrate"
                    )));
                }
            }
        }

        Ok(())
    }

    /// Check the configuration before any bridge is started.
    pub fn validate(&self) -> Result<(), Error> {
        self.check_not_empty()?;
        self.check_duplicate_ports()?;
        self.check_timeouts()?;
        self.check_serial_options()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parse_device_with_integer_options() {
        let spec: DeviceSpec = "/dev/ttyUSB0,baudrate=9600,stopbits=1".parse().unwrap();

        assert_eq!(spec.id, EndpointId::tty("/dev/ttyUSB0"));
        assert_eq!(spec.options.get("baudrate"), Some(&OptionValue::Integer(9600)));
        assert_eq!(spec.options.get("stopbits"), Some(&OptionValue::Integer(1)));
        assert_eq!(spec.options.iter().count(), 2);
    }

    #[test]
    fn parse_device_without_options() {
        let spec: DeviceSpec = "COM3".parse().unwrap();

        assert_eq!(spec.id, EndpointId::tty("COM3"));
        assert!(spec.options.is_empty());
    }

    #[test]
    fn unknown_options_are_kept_as_text() {
        let spec: DeviceSpec = "/dev/ttyS0,parity=N,baudrate=115200,rtscts=1".parse().unwrap();

        assert_eq!(spec.options.get("parity"), Some(&OptionValue::Text("N".into())));
        assert_eq!(spec.options.get("rtscts"), Some(&OptionValue::Text("1".into())));
        assert_eq!(spec.options.baudrate(), Some(115_200));
    }

    #[test]
    fn mock_device() {
        let spec: DeviceSpec = "mock:echo".parse().unwrap();

        assert_eq!(spec.id, EndpointId::mock("echo"));
    }

    #[test]
    fn option_without_equals_is_bad() {
        let err = "/dev/ttyUSB0,baudrate"
            .parse::<DeviceSpec>()
            .unwrap_err()
            .try_into_bad_config()
            .unwrap();

        assert!(err.contains("baudrate"));
    }

    #[test]
    fn non_integer_baudrate_is_bad() {
        let err = "/dev/ttyUSB0,baudrate=fast"
            .parse::<DeviceSpec>()
            .unwrap_err()
            .try_into_bad_config()
            .unwrap();

        assert!(err.contains("fast"));
    }

    #[test]
    fn empty_path_is_bad() {
        assert!(",baudrate=9600".parse::<DeviceSpec>().is_err());
        assert!("".parse::<DeviceSpec>().is_err());
    }

    #[test]
    fn device_string_display_round_trips() {
        let input = "/dev/ttyUSB0,baudrate=9600,parity=E";
        let spec: DeviceSpec = input.parse().unwrap();

        assert_eq!(spec.to_string().parse::<DeviceSpec>().unwrap(), spec);
    }

    #[test]
    fn delimiter_escapes() {
        assert_eq!(Delimiter::from_str("\\r\\n").unwrap().as_bytes(), b"\r\n");
        assert_eq!(Delimiter::from_str("END").unwrap().as_bytes(), b"END");
        assert_eq!(Delimiter::from_str("\\x03").unwrap().as_bytes(), &[0x03]);
        assert_eq!(Delimiter::from_str("a\\\\b").unwrap().as_bytes(), b"a\\b");

        assert!(Delimiter::from_str("\\q").is_err());
        assert!(Delimiter::from_str("\\x4").is_err());
        assert!(Delimiter::from_str("\\x+1").is_err());
        assert!(Delimiter::from_str("\\x-1").is_err());
        assert!(Delimiter::from_str("oops\\").is_err());
    }

    #[test]
    fn empty_delimiter_means_none() {
        assert_eq!(Delimiter::parse_optional("").unwrap(), None);
        assert_eq!(
            Delimiter::parse_optional(">").unwrap(),
            Some(Delimiter::new(*b">"))
        );
    }

    #[test]
    fn from_pairs_mismatch_is_bad() {
        let err = Config::from_pairs(
            &["/dev/ttyUSB0", "/dev/ttyUSB1"],
            &[9000],
            DEFAULT_RESPONSE_TIMEOUT,
            None,
            default_bind(),
        )
        .unwrap_err()
        .try_into_bad_config()
        .unwrap();

        assert!(err.contains("(2)"));
        assert!(err.contains("(1)"));
    }

    #[test]
    fn from_pairs_keeps_order() {
        let config = Config::from_pairs(
            &["/dev/ttyUSB0", "mock:other"],
            &[9000, 9001],
            Duration::from_millis(300),
            Some(Delimiter::new(*b"\n")),
            default_bind(),
        )
        .unwrap();

        assert_eq!(config.bridges[0].port, 9000);
        assert_eq!(config.bridges[1].device.id, EndpointId::mock("other"));
        assert_eq!(config.bridges[1].response_timeout, Duration::from_millis(300));
        assert_eq!(config.bridges[1].delimiter(), Some(&Delimiter::new(*b"\n")));
    }

    #[test]
    fn bad_config_duplicate_ports() {
        let config = Config::from_pairs(
            &["/dev/ttyUSB0", "/dev/ttyUSB1", "/dev/ttyUSB2"],
            &[9000, 9001, 9000],
            DEFAULT_RESPONSE_TIMEOUT,
            None,
            default_bind(),
        )
        .unwrap();

        let err = config.validate().unwrap_err().try_into_bad_config().unwrap();

        assert!(err.contains("9000"));
        assert!(!err.contains("9001"));
    }

    #[test]
    fn any_port_may_repeat() {
        let config = Config::from_pairs(
            &["mock:a", "mock:b"],
            &[0, 0],
            DEFAULT_RESPONSE_TIMEOUT,
            None,
            default_bind(),
        )
        .unwrap();

        config.validate().unwrap();
    }

    #[test]
    fn bad_config_stopbits() {
        let config = Config {
            bridges: vec![BridgeConfig::parse("/dev/ttyUSB0,stopbits=3", 9000).unwrap()],
            ..Default::default()
        };

        let err = config.validate().unwrap_err().try_into_bad_config().unwrap();

        assert!(err.contains("stopbits"));
    }

    #[test]
    fn bad_config_empty() {
        assert!(Config::default().validate().is_err());
    }

    #[test]
    fn example_round_trips() {
        let example = Config::example();
        let serialized = example.serialize_pretty().unwrap();

        assert_eq!(Config::deserialize(&serialized).unwrap(), example);
    }

    #[test]
    fn deserialize() {
        let input = r#"
(
    bridges: [
        (
            device: "/dev/ttyUSB0,baudrate=9600",
            port: 9001,
        ),
        (
            device: "mock:echo",
            port: 9002,
            timeout_ms: 250,
            delimiter: "\\r\\n",
        ),
    ],
)
"#;
        let config = Config::deserialize(input).unwrap();

        assert_eq!(config.bind, default_bind());
        assert_eq!(config.bridges[0].response_timeout, DEFAULT_RESPONSE_TIMEOUT);
        assert_eq!(config.bridges[0].device.options.baudrate(), Some(9600));
        assert_eq!(config.bridges[1].response_timeout, Duration::from_millis(250));
        assert_eq!(
            config.bridges[1].delimiter().map(Delimiter::as_bytes),
            Some(&b"\r\n"[..])
        );
    }

    #[test]
    fn deserialize_bad_device_string() {
        let input = r#"(bridges: [(device: "/dev/ttyUSB0,oops", port: 9001)])"#;

        assert!(Config::deserialize(input).is_err());
    }
}
