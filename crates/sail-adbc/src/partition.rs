use std::fmt;

use crate::error::{DriverError, DriverResult};

const MAGIC: &[u8; 4] = b"SAPD";
const VERSION: u8 = 1;

/// An opaque descriptor for a part of a potentially distributed or partitioned result set.
///
/// The descriptor is produced by one connection and may be consumed by any other
/// connection to the same logical backend, possibly in another process.
/// Equality and hashing are structural over both the name and the payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionDescriptor {
    friendly_name: Option<String>,
    descriptor: Vec<u8>,
}

impl PartitionDescriptor {
    pub fn new(friendly_name: Option<String>, descriptor: Vec<u8>) -> Self {
        Self {
            friendly_name,
            descriptor,
        }
    }

    pub fn friendly_name(&self) -> Option<&str> {
        self.friendly_name.as_deref()
    }

    pub fn descriptor(&self) -> &[u8] {
        &self.descriptor
    }

    /// Encodes the descriptor for transfer to another process.
    ///
    /// The layout is the magic `SAPD`, a version byte, a presence byte for the name,
    /// then the name and the payload, each prefixed with a little-endian `u32` length.
    /// Fails if the name or the payload does not fit that length.
    pub fn to_bytes(&self) -> DriverResult<Vec<u8>> {
        let name = self.friendly_name.as_deref().map(str::as_bytes);
        let mut out = Vec::with_capacity(
            MAGIC.len() + 2 + 8 + name.map_or(0, <[u8]>::len) + self.descriptor.len(),
        );
        out.extend_from_slice(MAGIC);
        out.push(VERSION);
        match name {
            Some(name) => {
                out.push(1);
                write_chunk(&mut out, name)?;
            }
            None => out.push(0),
        }
        write_chunk(&mut out, &self.descriptor)?;
        Ok(out)
    }

    pub fn from_bytes(data: &[u8]) -> DriverResult<Self> {
        let mut reader = ChunkReader { data, offset: 0 };
        if reader.take(MAGIC.len())? != MAGIC {
            return Err(DriverError::invalid_state(
                "partition descriptor has an invalid header",
            ));
        }
        let version = reader.take(1)?[0];
        if version != VERSION {
            return Err(DriverError::invalid_state(format!(
                "unsupported partition descriptor version: {version}"
            )));
        }
        let friendly_name = match reader.take(1)?[0] {
            0 => None,
            1 => {
                let name = reader.chunk()?;
                let name = String::from_utf8(name.to_vec()).map_err(|e| {
                    DriverError::invalid_state(format!("invalid partition name: {e}"))
                })?;
                Some(name)
            }
            other => {
                return Err(DriverError::invalid_state(format!(
                    "invalid partition name marker: {other}"
                )))
            }
        };
        let descriptor = reader.chunk()?.to_vec();
        if reader.offset != data.len() {
            return Err(DriverError::invalid_state(
                "trailing bytes after partition descriptor",
            ));
        }
        Ok(Self {
            friendly_name,
            descriptor,
        })
    }
}

impl fmt::Display for PartitionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PartitionDescriptor(name={}, {} bytes)",
            self.friendly_name.as_deref().unwrap_or("<unnamed>"),
            self.descriptor.len()
        )
    }
}

fn chunk_length(length: usize) -> DriverResult<[u8; 4]> {
    u32::try_from(length)
        .map(u32::to_le_bytes)
        .map_err(|_| {
            DriverError::invalid_state(format!(
                "partition descriptor chunk of {length} bytes exceeds the 4 GiB limit"
            ))
        })
}

fn write_chunk(out: &mut Vec<u8>, chunk: &[u8]) -> DriverResult<()> {
    out.extend_from_slice(&chunk_length(chunk.len())?);
    out.extend_from_slice(chunk);
    Ok(())
}

struct ChunkReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> ChunkReader<'a> {
    fn take(&mut self, n: usize) -> DriverResult<&'a [u8]> {
        let end = self
            .offset
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| DriverError::invalid_state("truncated partition descriptor"))?;
        let out = &self.data[self.offset..end];
        self.offset = end;
        Ok(out)
    }

    fn chunk(&mut self) -> DriverResult<&'a [u8]> {
        let mut length = [0u8; 4];
        length.copy_from_slice(self.take(4)?);
        self.take(u32::from_le_bytes(length) as usize)
    }
}
