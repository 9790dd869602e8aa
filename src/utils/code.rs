use rand::{thread_rng, Rng};

/// Alphabet without ambiguous characters (0, O, I, 1, l).
const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

pub const CODE_LEN: usize = 6;

pub fn generate_access_code() -> String {
    let mut rng = thread_rng();
    (0..CODE_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Format as XXX-XXX for display.
pub fn format_code(code: &str) -> String {
    if code.len() <= 3 {
        return code.to_string();
    }
    format!("{}-{}", &code[..3], &code[3..])
}

/// Strip separators and whitespace, uppercase.
pub fn normalize_code(code: &str) -> String {
    code.chars()
        .filter(|c| *c != '-' && !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}
