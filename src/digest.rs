use whirlpool::{Digest, Whirlpool};

/// Size of a whirlpool digest in bytes.
pub const WHIRLPOOL_SIZE: usize = 64;

/// Computes the 512-bit whirlpool digest of `data`.
pub fn whirlpool_digest<T: AsRef<[u8]>>(data: T) -> [u8; WHIRLPOOL_SIZE] {
    let mut hasher = Whirlpool::new();
    hasher.update(data.as_ref());

    let mut digest = [0; WHIRLPOOL_SIZE];
    digest.copy_from_slice(&hasher.finalize());
    digest
}
