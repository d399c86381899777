use rand::RngCore;

/// Random cluster secret: 32 bytes, hex encoded.
pub fn generate_token() -> String {
    let mut raw = [0u8; 32];
    rand::rng().fill_bytes(&mut raw);
    hex::encode(raw)
}
