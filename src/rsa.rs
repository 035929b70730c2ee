use num_bigint::BigInt;

/// Raw RSA over a byte buffer: interprets `data` as a signed big-endian
/// integer, raises it to `exponent` modulo `modulus`, and re-encodes the
/// result with the same signed convention.
///
/// The signed encoding matches `java.math.BigInteger` (`toByteArray` emits
/// a leading zero byte whenever the top bit of the magnitude is set), which
/// the update-key trailer depends on for bit-exact round trips.
pub fn rsa_crypt(data: &[u8], modulus: &BigInt, exponent: &BigInt) -> Vec<u8> {
    BigInt::from_signed_bytes_be(data)
        .modpow(exponent, modulus)
        .to_signed_bytes_be()
}
