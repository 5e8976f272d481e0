//! Host identity: short hostname and deterministic client identifier

/// CRC-16 polynomial used for client identifiers (CCITT)
pub const CRC16_POLY: u16 = 0x1021;

/// CRC-16 initial value used for client identifiers
pub const CRC16_INIT: u16 = 0xffff;

/// Bitwise MSB-first CRC-16 without final xor
pub fn crc16(data: &[u8], polynomial: u16, init: u16) -> u16 {
    let mut remainder = init;
    for &byte in data {
        remainder ^= (byte as u16) << 8;
        for _ in 0..8 {
            remainder = if remainder & 0x8000 != 0 {
                (remainder << 1) ^ polynomial
            } else {
                remainder << 1
            };
        }
    }
    remainder
}

/// Client identifier stable across restarts of the same host and input
///
/// `rtl_433-` followed by the checksums of the hostname and the device
/// hint as two 4-digit hex numbers.
pub fn client_id(hostname: &str, device_hint: Option<&str>) -> String {
    let host_crc = crc16(hostname.as_bytes(), CRC16_POLY, CRC16_INIT);
    let hint_crc = crc16(
        device_hint.unwrap_or_default().as_bytes(),
        CRC16_POLY,
        CRC16_INIT,
    );
    format!("rtl_433-{:04x}{:04x}", host_crc, hint_crc)
}

/// Local hostname without the domain part
pub fn short_hostname() -> String {
    let name = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_default();
    let short = name.split('.').next().unwrap_or_default();
    if short.is_empty() {
        "localhost".to_string()
    } else {
        short.to_string()
    }
}
