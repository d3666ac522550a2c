use rand::Rng;

pub const CODE_PREFIX: &str = "BEAR";
pub const CODE_SUFFIX_LEN: usize = 4;

/// 32 symbols; visually ambiguous characters (I, O, 0, 1) are excluded.
pub const CODE_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Generate a fresh referral code. Uniqueness is not checked here; the
/// persistence layer rejects duplicates and the caller surfaces that as a
/// retryable conflict.
pub fn generate() -> String {
    let mut rng = rand::thread_rng();
    let mut code = String::with_capacity(CODE_PREFIX.len() + CODE_SUFFIX_LEN);
    code.push_str(CODE_PREFIX);
    for _ in 0..CODE_SUFFIX_LEN {
        let idx = rng.gen_range(0..CODE_ALPHABET.len());
        code.push(CODE_ALPHABET[idx] as char);
    }
    code
}

/// Trim and uppercase a submitted code before any lookup.
pub fn normalize(code: &str) -> String {
    code.trim().to_uppercase()
}

pub fn is_well_formed(code: &str) -> bool {
    code.len() == CODE_PREFIX.len() + CODE_SUFFIX_LEN
        && code.starts_with(CODE_PREFIX)
        && code[CODE_PREFIX.len()..]
            .bytes()
            .all(|b| CODE_ALPHABET.contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_code_shape() {
        for _ in 0..100 {
            let code = generate();
            assert_eq!(code.len(), 8);
            assert!(code.starts_with("BEAR"));
            assert!(is_well_formed(&code), "malformed code: {}", code);
        }
    }

    #[test]
    fn test_alphabet_excludes_ambiguous_symbols() {
        for banned in [b'I', b'O', b'0', b'1'] {
            assert!(!CODE_ALPHABET.contains(&banned));
        }
        assert_eq!(CODE_ALPHABET.len(), 32);
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  bearab23 "), "BEARAB23");
    }

    #[test]
    fn test_well_formed_rejects_bad_codes() {
        assert!(is_well_formed("BEARAB23"));
        assert!(!is_well_formed("BEARAB2")); // too short
        assert!(!is_well_formed("BEARAB234")); // too long
        assert!(!is_well_formed("DEERAB23")); // wrong prefix
        assert!(!is_well_formed("BEARAB0I")); // ambiguous symbols
        assert!(!is_well_formed("bearab23")); // lowercase not in alphabet
    }
}
