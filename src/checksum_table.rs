use crate::digest::{whirlpool_digest, WHIRLPOOL_SIZE};
use crate::rsa::rsa_crypt;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use num_bigint::BigInt;
use std::io::{self, Read, Write};
use thiserror::Error;

/// Size of the plain whirlpool trailer: a zero byte, the digest, a zero byte.
const TRAILER_SIZE: usize = WHIRLPOOL_SIZE + 2;

/// The trailer digest skips this many bytes at the front of the table body.
const DIGEST_OFFSET: usize = 5;

#[derive(Error, Debug)]
pub enum ChecksumTableError {
    #[error("whirlpool digest must be {WHIRLPOOL_SIZE} bytes, got {0}")]
    InvalidDigestSize(usize),
    #[error("trailer digest does not match the table body")]
    DigestMismatch,
    #[error("trailer is {0} bytes, expected {TRAILER_SIZE}")]
    MalformedTrailer(usize),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Validation data for one type: the CRC and version of its reference
/// table plus the whirlpool digest of the raw table bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub crc: i32,
    pub version: i32,
    pub whirlpool: [u8; WHIRLPOOL_SIZE],
}

impl Default for Entry {
    fn default() -> Entry {
        Entry {
            crc: 0,
            version: 0,
            whirlpool: [0; WHIRLPOOL_SIZE],
        }
    }
}

impl Entry {
    pub fn new(crc: i32, version: i32, whirlpool: &[u8]) -> Result<Entry, ChecksumTableError> {
        if whirlpool.len() != WHIRLPOOL_SIZE {
            return Err(ChecksumTableError::InvalidDigestSize(whirlpool.len()));
        }

        let mut digest = [0; WHIRLPOOL_SIZE];
        digest.copy_from_slice(whirlpool);
        Ok(Entry {
            crc,
            version,
            whirlpool: digest,
        })
    }
}

/// The digest-of-digests across all reference tables, served to clients as
/// "update keys".
///
/// Two wire layouts exist: the legacy one carrying `{crc, version}`
/// records, and the whirlpool one that adds per-type digests and a signed
/// whirlpool-of-whirlpools trailer. The caller picks the mode; the trailer
/// may be RSA-enciphered with the caller's key pair.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChecksumTable {
    entries: Vec<Entry>,
}

impl ChecksumTable {
    /// Creates a table of `size` zeroed entries, one per type.
    pub fn new(size: usize) -> ChecksumTable {
        ChecksumTable {
            entries: vec![Entry::default(); size],
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, typ: usize) -> Option<&Entry> {
        self.entries.get(typ)
    }

    /// Replaces the entry for `typ`.
    ///
    /// # Panics
    ///
    /// Panics if `typ` is outside the table.
    pub fn set_entry(&mut self, typ: usize, entry: Entry) {
        self.entries[typ] = entry;
    }

    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    /// Encodes the table, appending the signed digest trailer in whirlpool
    /// mode. `keys` is the `(modulus, private key)` pair; pass `None` to
    /// leave the trailer in the clear.
    pub fn encode(
        &self,
        whirlpool: bool,
        keys: Option<(&BigInt, &BigInt)>,
    ) -> Result<Vec<u8>, ChecksumTableError> {
        let mut buf = Vec::new();
        buf.write_u8(self.entries.len() as u8)?;

        for entry in &self.entries {
            buf.write_i32::<BigEndian>(entry.crc)?;
            buf.write_i32::<BigEndian>(entry.version)?;
            if whirlpool {
                buf.write_all(&entry.whirlpool)?;
            }
        }

        if whirlpool {
            let mut trailer = Vec::with_capacity(TRAILER_SIZE);
            trailer.push(0);
            trailer.extend_from_slice(&whirlpool_digest(body_digest_input(&buf)));
            trailer.push(0);

            if let Some((modulus, key)) = keys {
                trailer = rsa_crypt(&trailer, modulus, key);
            }
            buf.extend_from_slice(&trailer);
        }

        Ok(buf)
    }

    /// Decodes a table, verifying the digest trailer in whirlpool mode.
    /// `keys` is the `(modulus, public key)` pair matching the one used on
    /// encode.
    pub fn decode(
        buf: &[u8],
        whirlpool: bool,
        keys: Option<(&BigInt, &BigInt)>,
    ) -> Result<ChecksumTable, ChecksumTableError> {
        let mut r = buf;
        let count = r.read_u8()? as usize;

        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let crc = r.read_i32::<BigEndian>()?;
            let version = r.read_i32::<BigEndian>()?;
            let mut digest = [0; WHIRLPOOL_SIZE];
            if whirlpool {
                r.read_exact(&mut digest)?;
            }
            entries.push(Entry {
                crc,
                version,
                whirlpool: digest,
            });
        }

        if whirlpool {
            // The minimal signed re-encoding drops the leading zero bytes
            // of the decrypted block; restore them before validating.
            let trailer = match keys {
                Some((modulus, key)) => left_pad(rsa_crypt(r, modulus, key), TRAILER_SIZE),
                None => r.to_vec(),
            };
            if trailer.len() != TRAILER_SIZE {
                return Err(ChecksumTableError::MalformedTrailer(trailer.len()));
            }
            let digest = &trailer[1..1 + WHIRLPOOL_SIZE];

            let body = &buf[..buf.len() - r.len()];
            let expected = whirlpool_digest(body_digest_input(body));
            if digest != expected.as_slice() {
                return Err(ChecksumTableError::DigestMismatch);
            }
        }

        Ok(ChecksumTable { entries })
    }
}

/// The trailer digest covers the table body from offset 5 onwards.
fn body_digest_input(body: &[u8]) -> &[u8] {
    &body[DIGEST_OFFSET.min(body.len())..]
}

fn left_pad(bytes: Vec<u8>, len: usize) -> Vec<u8> {
    if bytes.len() >= len {
        return bytes;
    }

    let mut padded = vec![0; len - bytes.len()];
    padded.extend_from_slice(&bytes);
    padded
}
