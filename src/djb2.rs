/// Hashes a name into the identifier stored in reference tables.
///
/// This is the djb2 variant the client uses (`hash = hash * 31 + byte`,
/// starting from zero), so hashes match the identifiers found in real
/// caches byte for byte.
pub fn djb2_hash<T: AsRef<str>>(string: T) -> i32 {
    string.as_ref().bytes().fold(0i32, |hash, c| {
        (hash.wrapping_shl(5).wrapping_sub(hash)).wrapping_add(c as i32)
    })
}
