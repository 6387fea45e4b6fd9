use std::{fmt::Display, sync::Arc};

use tokio::io::{AsyncRead, AsyncWrite};

use crate::{config::DeviceSpec, error::Error, mock::MockBuilder};

pub(crate) mod mock;
pub(crate) mod serial;

pub use self::serial::SerialEndpoint;

/// A device which may be bridged.
#[derive(Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord)]
pub enum EndpointId {
    /// A tty/COM endpoint.
    Tty(String),

    /// An in-memory device, see [`crate::mock`].
    Mock(String),
}

impl EndpointId {
    /// Device strings starting with this are mocks.
    pub const MOCK_PREFIX: &'static str = "mock:";

    /// A new TTY endpoint identifier.
    pub fn tty(tty: &str) -> Self {
        Self::Tty(tty.into())
    }

    /// A id for a mock endpoint.
    pub fn mock(name: &str) -> Self {
        Self::Mock(name.into())
    }
}

impl Display for EndpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointId::Tty(tty) => write!(f, "{tty}"),
            EndpointId::Mock(mock) => write!(f, "{}{mock}", Self::MOCK_PREFIX),
        }
    }
}

/// Anything a device can be read from and written to.
pub trait DeviceIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> DeviceIo for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// An open device.
pub type DeviceStream = Box<dyn DeviceIo>;

/// An endpoint is something which can be opened to get a byte stream to a device.
///
/// Each call to [`Endpoint::open`] hands out a new stream.
/// Dropping the stream closes the device again.
pub trait Endpoint: Send + Sync {
    /// Which device this is.
    fn id(&self) -> &EndpointId;

    /// Open the device.
    /// Fails with [`Error::DeviceUnavailable`].
    fn open(&self) -> Result<DeviceStream, Error>;
}

/// Set up the endpoint a device string asks for.
///
/// Mock devices made this way echo whatever is written to them.
pub fn from_spec(spec: &DeviceSpec) -> Arc<dyn Endpoint> {
    match &spec.id {
        EndpointId::Tty(_) => Arc::new(SerialEndpoint::new(spec.clone())),
        EndpointId::Mock(name) => Arc::new(MockBuilder::new(name).build()),
    }
}
