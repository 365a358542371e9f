//! Validation utilities for the LIMS platform

// ============================================================================
// General Validations
// ============================================================================

/// Validate email format (basic check)
pub fn validate_email(email: &str) -> Result<(), &'static str> {
    let Some((local, domain)) = email.split_once('@') else {
        return Err("Invalid email format");
    };
    if local.is_empty() || !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.')
    {
        return Err("Invalid email format");
    }
    Ok(())
}

/// Validate password strength
pub fn validate_password(password: &str) -> Result<(), &'static str> {
    if password.len() < 8 {
        return Err("Password must be at least 8 characters");
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err("Password must contain at least one digit");
    }
    Ok(())
}

/// Validate lab code format (2-10 uppercase alphanumeric)
pub fn validate_lab_code(code: &str) -> Result<(), &'static str> {
    if code.len() < 2 {
        return Err("Lab code must be at least 2 characters");
    }
    if code.len() > 10 {
        return Err("Lab code must be at most 10 characters");
    }
    if !code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()) {
        return Err("Lab code must be uppercase alphanumeric only");
    }
    Ok(())
}

/// Validate a master-data code (customer / sample type): 1-20 characters of
/// uppercase letters, digits, `-` or `_`
pub fn validate_master_code(code: &str) -> Result<(), &'static str> {
    if code.is_empty() || code.len() > 20 {
        return Err("Code must be between 1 and 20 characters");
    }
    if !code
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return Err("Code may contain only uppercase letters, digits, '-' and '_'");
    }
    Ok(())
}

/// Validate phone number: 7-15 digits, optional leading `+`, separators
/// (space, dash, parentheses) ignored
pub fn validate_phone(phone: &str) -> Result<(), &'static str> {
    let trimmed = phone.trim();
    let body = trimmed.strip_prefix('+').unwrap_or(trimmed);
    if !body
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '-' | '(' | ')'))
    {
        return Err("Phone number contains invalid characters");
    }
    let digits = body.chars().filter(|c| c.is_ascii_digit()).count();
    if !(7..=15).contains(&digits) {
        return Err("Phone number must have 7 to 15 digits");
    }
    Ok(())
}

// ============================================================================
// Tax Registration
// ============================================================================

/// Validate a GST identification number (15 characters):
/// 2-digit state code, 10-character PAN, entity digit, `Z`, check character
pub fn validate_gstin(gstin: &str) -> Result<(), &'static str> {
    let chars: Vec<char> = gstin.chars().collect();
    if chars.len() != 15 {
        return Err("GSTIN must be 15 characters");
    }
    if !chars[0..2].iter().all(|c| c.is_ascii_digit()) {
        return Err("GSTIN must start with a 2-digit state code");
    }
    let pan = &chars[2..12];
    let pan_ok = pan[0..5].iter().all(|c| c.is_ascii_uppercase())
        && pan[5..9].iter().all(|c| c.is_ascii_digit())
        && pan[9].is_ascii_uppercase();
    if !pan_ok {
        return Err("GSTIN contains an invalid PAN segment");
    }
    if !chars[12].is_ascii_alphanumeric() || chars[13] != 'Z' || !chars[14].is_ascii_alphanumeric()
    {
        return Err("GSTIN has an invalid suffix");
    }
    Ok(())
}

// ============================================================================
// Uploads
// ============================================================================

/// Image content types accepted for logos and signatures
pub const ALLOWED_IMAGE_TYPES: &[&str] = &["image/png", "image/jpeg", "image/svg+xml"];

/// Validate an uploaded image against type and size limits
pub fn validate_image_upload(
    content_type: &str,
    size_bytes: usize,
    max_bytes: usize,
) -> Result<(), &'static str> {
    if !ALLOWED_IMAGE_TYPES.contains(&content_type) {
        return Err("Only PNG, JPEG or SVG images are accepted");
    }
    if size_bytes == 0 {
        return Err("Uploaded file is empty");
    }
    if size_bytes > max_bytes {
        return Err("Uploaded file exceeds the size limit");
    }
    Ok(())
}

/// File extension for an accepted image content type
pub fn image_extension(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        "image/svg+xml" => Some("svg"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_email() {
        assert!(validate_email("qa@fuel-lab.com").is_ok());
        assert!(validate_email("first.last@lab.co.in").is_ok());
        assert!(validate_email("invalid").is_err());
        assert!(validate_email("no@domain").is_err());
        assert!(validate_email("@lab.com").is_err());
        assert!(validate_email("user@.com").is_err());
    }

    #[test]
    fn test_validate_password() {
        assert!(validate_password("password123").is_ok());
        assert!(validate_password("short1").is_err());
        assert!(validate_password("nodigitshere").is_err());
    }

    #[test]
    fn test_validate_lab_code() {
        assert!(validate_lab_code("OTL").is_ok());
        assert!(validate_lab_code("LAB01").is_ok());
        assert!(validate_lab_code("A").is_err());
        assert!(validate_lab_code("ABCDEFGHIJK").is_err());
        assert!(validate_lab_code("lab").is_err());
    }

    #[test]
    fn test_validate_master_code() {
        assert!(validate_master_code("CUST-001").is_ok());
        assert!(validate_master_code("HSD_DIESEL").is_ok());
        assert!(validate_master_code("").is_err());
        assert!(validate_master_code("bad code").is_err());
    }

    #[test]
    fn test_validate_phone() {
        assert!(validate_phone("+91 98765 43210").is_ok());
        assert!(validate_phone("(022) 2345-6789").is_ok());
        assert!(validate_phone("12345").is_err());
        assert!(validate_phone("98765abc10").is_err());
    }

    #[test]
    fn test_validate_gstin() {
        assert!(validate_gstin("27AAPFU0939F1ZV").is_ok());
        assert!(validate_gstin("27AAPFU0939F1Z").is_err());
        assert!(validate_gstin("XXAAPFU0939F1ZV").is_err());
        assert!(validate_gstin("27AAPF10939F1ZV").is_err());
        assert!(validate_gstin("27AAPFU0939F1YV").is_err());
    }

    #[test]
    fn test_validate_image_upload() {
        assert!(validate_image_upload("image/png", 1024, 2048).is_ok());
        assert!(validate_image_upload("application/pdf", 1024, 2048).is_err());
        assert!(validate_image_upload("image/png", 0, 2048).is_err());
        assert!(validate_image_upload("image/jpeg", 4096, 2048).is_err());
        assert_eq!(image_extension("image/jpeg"), Some("jpg"));
    }
}
