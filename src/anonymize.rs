//! IP address masking for privacy-preserving storage

/// Mask the host part of an IP address.
///
/// IPv4 keeps the first two octets (`192.168.1.1` → `192.168.0.0`); IPv6
/// keeps the first three groups as written and zeroes the other five.
/// Absent or unrecognized input yields `None`.
#[must_use]
pub fn anonymize_ip(ip_address: Option<&str>) -> Option<String> {
    let ip = ip_address.map(str::trim).filter(|ip| !ip.is_empty())?;

    if ip.contains('.') {
        let mut parts = ip.split('.');
        let (a, b) = (parts.next()?, parts.next()?);
        if a.is_empty() || b.is_empty() {
            return None;
        }
        return Some(format!("{a}.{b}.0.0"));
    }

    if ip.contains(':') {
        let parts: Vec<&str> = ip.split(':').collect();
        if parts.len() < 3 || parts[0].is_empty() {
            return None;
        }
        return Some(format!(
            "{}:{}:{}:0000:0000:0000:0000:0000",
            parts[0], parts[1], parts[2]
        ));
    }

    None
}
