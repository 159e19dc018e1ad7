pub const SHA256_LENGTH: usize = 32;

/// Computes the SHA2-256 digest over the provided byte slice.
pub fn sha256(input: &[u8]) -> [u8; SHA256_LENGTH] {
    let digest = aws_lc_rs::digest::digest(&aws_lc_rs::digest::SHA256, input);
    let mut output = [0; SHA256_LENGTH];
    output.copy_from_slice(digest.as_ref());
    output
}
