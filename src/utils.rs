use arrayvec::ArrayVec;

use crate::error::{Error, Result};

/// Parses a value out of a received payload.
pub trait FromPayload: Sized {
    fn from_payload(payload: &[u8]) -> Result<Self>;
}

/// Sink for outgoing frame bytes.
pub trait CommandWriter {
    fn write_cmd_bytes(&mut self, bytes: &[u8]) -> Result<()>;
}

/// Serialises a value into an outgoing payload.
pub trait ToPayload {
    fn to_payload(&self, writer: &mut dyn CommandWriter) -> Result<()>;
}

impl<const N: usize> CommandWriter for ArrayVec<u8, N> {
    fn write_cmd_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.try_extend_from_slice(bytes)
            .map_err(|_| Error::protocol(format!("frame exceeds {} bytes", N)))
    }
}

impl CommandWriter for Vec<u8> {
    fn write_cmd_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.extend_from_slice(bytes);
        Ok(())
    }
}
