//! A mock endpoint.
//! Opening it gives an in-memory stream to a task playing the device.

use super::{DeviceStream, Endpoint, EndpointId};
use crate::{error::Error, mock::MockHandle};

impl Endpoint for MockHandle {
    fn id(&self) -> &EndpointId {
        &self.id
    }

    fn open(&self) -> Result<DeviceStream, Error> {
        if self.take_failing_open() {
            return Err(Error::DeviceUnavailable {
                device: self.id.to_string(),
                problem: "Mock told to fail".into(),
            });
        }

        Ok(Box::new(self.open_stream()))
    }
}
