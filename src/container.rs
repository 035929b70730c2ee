use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use flate2::bufread::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{self, Read, Write};
use thiserror::Error;

/// Magic bytes stripped from stored bzip2 streams. The trailing `1` fixes
/// the block size at 100k, the only size the legacy client ever wrote.
const BZIP2_MAGIC: &[u8; 4] = b"BZh1";

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("unsupported compression type {0}")]
    UnsupportedCompression(u8),
    #[error("decompressed to {actual} bytes, expected {expected}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("container data truncated")]
    Truncated,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Compression applied to a container payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Bzip2,
    Gzip,
}

impl From<Compression> for u8 {
    fn from(compression: Compression) -> Self {
        match compression {
            Compression::None => 0,
            Compression::Bzip2 => 1,
            Compression::Gzip => 2,
        }
    }
}

impl TryFrom<u8> for Compression {
    type Error = ContainerError;

    fn try_from(compression: u8) -> Result<Self, Self::Error> {
        match compression {
            0 => Ok(Self::None),
            1 => Ok(Self::Bzip2),
            2 => Ok(Self::Gzip),
            _ => Err(ContainerError::UnsupportedCompression(compression)),
        }
    }
}

/// A framed, optionally compressed, optionally versioned payload.
///
/// `data` is always the logical (decompressed) payload; compression only
/// exists on the wire. The trailing 2-byte version is independent of the
/// payload and absent on unversioned containers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    compression: Compression,
    data: Vec<u8>,
    version: Option<i32>,
}

impl Container {
    pub fn new(compression: Compression, data: Vec<u8>) -> Container {
        Container {
            compression,
            data,
            version: None,
        }
    }

    pub fn versioned(compression: Compression, data: Vec<u8>, version: i32) -> Container {
        Container {
            compression,
            data,
            version: Some(version),
        }
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn version(&self) -> Option<i32> {
        self.version
    }

    pub fn set_version(&mut self, version: i32) {
        self.version = Some(version);
    }

    pub fn is_versioned(&self) -> bool {
        self.version.is_some()
    }

    pub fn decode(buf: &[u8]) -> Result<Container, ContainerError> {
        let mut r = buf;
        let compression = Compression::try_from(r.read_u8().map_err(|_| ContainerError::Truncated)?)?;
        let length = r
            .read_u32::<BigEndian>()
            .map_err(|_| ContainerError::Truncated)? as usize;

        let data = match compression {
            Compression::None => {
                if r.len() < length {
                    return Err(ContainerError::Truncated);
                }
                let data = r[..length].to_vec();
                r = &r[length..];
                data
            }
            Compression::Bzip2 | Compression::Gzip => {
                let uncompressed_length = r
                    .read_u32::<BigEndian>()
                    .map_err(|_| ContainerError::Truncated)?
                    as usize;
                if r.len() < length {
                    return Err(ContainerError::Truncated);
                }

                let compressed = &r[..length];
                r = &r[length..];

                let data = match compression {
                    Compression::Bzip2 => decompress_bzip2(compressed)?,
                    _ => decompress_gzip(compressed)?,
                };
                if data.len() != uncompressed_length {
                    return Err(ContainerError::LengthMismatch {
                        expected: uncompressed_length,
                        actual: data.len(),
                    });
                }
                data
            }
        };

        let version = if r.len() >= 2 {
            Some(r.read_i16::<BigEndian>().map_err(|_| ContainerError::Truncated)? as i32)
        } else {
            None
        };

        Ok(Container {
            compression,
            data,
            version,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, ContainerError> {
        let compressed = match self.compression {
            Compression::None => self.data.clone(),
            Compression::Bzip2 => compress_bzip2(&self.data)?,
            Compression::Gzip => compress_gzip(&self.data)?,
        };

        let mut buf = Vec::with_capacity(compressed.len() + 11);
        buf.write_u8(self.compression.into())?;
        buf.write_u32::<BigEndian>(compressed.len() as u32)?;
        if self.compression != Compression::None {
            buf.write_u32::<BigEndian>(self.data.len() as u32)?;
        }
        buf.extend_from_slice(&compressed);

        if let Some(version) = self.version {
            buf.write_i16::<BigEndian>(version as i16)?;
        }

        Ok(buf)
    }
}

fn compress_gzip(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::best());
    encoder.write_all(data)?;
    encoder.finish()
}

fn decompress_gzip(compressed: &[u8]) -> Result<Vec<u8>, ContainerError> {
    let mut data = Vec::new();
    GzDecoder::new(compressed).read_to_end(&mut data)?;
    Ok(data)
}

fn compress_bzip2(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = BzEncoder::new(Vec::new(), bzip2::Compression::new(1));
    encoder.write_all(data)?;
    let mut compressed = encoder.finish()?;
    compressed.drain(..BZIP2_MAGIC.len());
    Ok(compressed)
}

fn decompress_bzip2(compressed: &[u8]) -> Result<Vec<u8>, ContainerError> {
    let mut stream = Vec::with_capacity(compressed.len() + BZIP2_MAGIC.len());
    stream.extend_from_slice(BZIP2_MAGIC);
    stream.extend_from_slice(compressed);

    let mut data = Vec::new();
    BzDecoder::new(stream.as_slice()).read_to_end(&mut data)?;
    Ok(data)
}
