use chrono::NaiveDate;
use rand::Rng;

/// Letters and digits that cannot be misread for one another (no I/1, O/0).
const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const SUFFIX_LEN: usize = 6;

/// `APT-YYYYMMDD-XXXXXX`, dated on the booking day.
pub fn generate_confirmation_number<R: Rng + ?Sized>(booked_on: NaiveDate, rng: &mut R) -> String {
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("APT-{}-{}", booked_on.format("%Y%m%d"), suffix)
}

pub fn is_valid_confirmation_number(value: &str) -> bool {
    let mut parts = value.split('-');
    let (Some("APT"), Some(date), Some(suffix), None) = (parts.next(), parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    date.len() == 8
        && NaiveDate::parse_from_str(date, "%Y%m%d").is_ok()
        && suffix.len() == SUFFIX_LEN
        && suffix.bytes().all(|b| ALPHABET.contains(&b))
}
