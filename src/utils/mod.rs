use rand::Rng;

/// Random lowercase hex string of `len` characters.
pub fn random_hex(len: usize) -> String {
    const HEX: &[u8] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    (0..len).map(|_| HEX[rng.gen_range(0..HEX.len())] as char).collect()
}

/// Confirmation code handed to a (possibly guest) customer so an order can
/// be looked up without authentication.
pub fn confirmation_code() -> String {
    random_hex(16).to_uppercase()
}

/// One-time token mailed to new accounts for email verification.
pub fn verification_token() -> String {
    random_hex(64)
}

/// Strips everything but digits from a phone number.
pub fn normalize_phone(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// A normalized phone number: 1-16 digits, not starting with zero.
pub fn is_valid_phone(digits: &str) -> bool {
    !digits.is_empty()
        && digits.len() <= 16
        && !digits.starts_with('0')
        && digits.chars().all(|c| c.is_ascii_digit())
}

pub fn is_valid_email(address: &str) -> bool {
    if address.contains(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = address.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

/// Lowercased file extension, if the name has one.
pub fn file_extension(name: &str) -> Option<String> {
    std::path::Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Rejects names that could escape the upload directory.
pub fn is_safe_filename(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '\\']) && !name.contains("..")
}

pub fn content_type_for(ext: &str) -> &'static str {
    match ext {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_hex_has_requested_length_and_charset() {
        let token = random_hex(64);
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn confirmation_codes_are_uppercase_hex() {
        let code = confirmation_code();
        assert_eq!(code.len(), 16);
        assert!(code.chars().all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
    }

    #[test]
    fn confirmation_codes_differ() {
        assert_ne!(confirmation_code(), confirmation_code());
    }

    #[test]
    fn phone_normalization() {
        assert_eq!(normalize_phone("+1 (555) 010-9999"), "15550109999");
        assert!(is_valid_phone("15550109999"));
        assert!(!is_valid_phone(""));
        assert!(!is_valid_phone("0123456"));
        assert!(!is_valid_phone("12345678901234567"));
    }

    #[test]
    fn email_validation() {
        assert!(is_valid_email("customer@example.com"));
        assert!(!is_valid_email("customer@localhost"));
        assert!(!is_valid_email("no-at-sign.example.com"));
        assert!(!is_valid_email("two words@example.com"));
        assert!(!is_valid_email("@example.com"));
    }

    #[test]
    fn filename_safety() {
        assert!(is_safe_filename("med-42.png"));
        assert!(!is_safe_filename("../etc/passwd"));
        assert!(!is_safe_filename("a/b.png"));
        assert!(!is_safe_filename(""));
    }

    #[test]
    fn extensions_and_content_types() {
        assert_eq!(file_extension("scan.PDF").as_deref(), Some("pdf"));
        assert_eq!(file_extension("noext"), None);
        assert_eq!(content_type_for("jpeg"), "image/jpeg");
        assert_eq!(content_type_for("bin"), "application/octet-stream");
    }
}
