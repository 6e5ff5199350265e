//! Hub address normalization

/// Canonical form of a configured hub address
///
/// Hubs advertise themselves by IP, so a `localhost:N` bootstrap entry is
/// rewritten to `127.0.0.1:N` before it is compared with advertised lists.
pub fn normalize_hub_address(address: &str) -> String {
    let address = address.trim();
    match address.strip_prefix("localhost:") {
        Some(port) => format!("127.0.0.1:{}", port),
        None => address.to_string(),
    }
}

/// Normalize every entry of a bootstrap list, dropping blanks and duplicates
pub fn normalize_bootstraps<I, S>(addresses: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for address in addresses {
        let address = normalize_hub_address(address.as_ref());
        if !address.is_empty() && !out.contains(&address) {
            out.push(address);
        }
    }
    out
}
