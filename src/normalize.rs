//! Text cleanup shared by every stage: taxpayer names, owner identifiers,
//! addresses, parcel numbers and sale dates.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

static NON_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9 ]+").unwrap());
static SPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static ADDR_SUFFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r" (DR|DRIVE|AVE|AVENUE|ST|STREET|BLVD|BOULEVARD|FWY|FREEWAY)\.?$").unwrap()
});

/// Strips everything outside `[A-Za-z0-9 ]`, collapses runs of spaces and trims.
/// Missing values become the empty string.
pub fn clean_owner(owner: Option<&str>) -> String {
    match owner {
        Some(owner) => {
            let stripped = NON_NAME_RE.replace_all(owner, "");
            SPACE_RE.replace_all(&stripped, " ").trim().to_owned()
        }
        None => String::new(),
    }
}

/// Case-insensitive comparison key for a taxpayer name.
pub fn name_key(owner: Option<&str>) -> String {
    clean_owner(owner).to_ascii_uppercase()
}

pub fn clean_own_id(own_id: &str) -> String {
    SPACE_RE
        .replace_all(&own_id.to_uppercase(), " ")
        .trim()
        .to_owned()
}

/// Comparison key for a street address: the name key with one trailing
/// street-type token removed, so "123 MAIN ST." and "123 Main" agree.
pub fn address_key(address: Option<&str>) -> String {
    let key = name_key(address);
    ADDR_SUFFIX_RE.replace(&key, "").into_owned()
}

/// Normalizes parcel numbers that different sources format inconsistently.
///
/// A bare number gets a trailing period and is otherwise left alone. A number
/// already carrying a separator whose ward part (before the first period) is
/// seven characters long is left-padded with one zero.
pub fn fix_parcel_num(parcel_num: &str) -> String {
    let parcel_num = parcel_num.trim();
    if !(parcel_num.contains('.') || parcel_num.contains('-')) {
        return format!("{}.", parcel_num);
    }
    match parcel_num.split_once('.') {
        Some((ward, _)) if ward.len() == 7 => format!("0{}", parcel_num),
        _ => parcel_num.to_owned(),
    }
}

/// Parses a sale date. Sentinel 1900 dates and anything unparseable are `None`.
pub fn clean_date(date_str: Option<&str>) -> Option<NaiveDate> {
    let date_str = date_str?.trim();
    if date_str.is_empty() || date_str.contains("1900") {
        return None;
    }
    let format = if date_str.contains('/') {
        "%m/%d/%Y"
    } else {
        "%Y-%m-%d"
    };
    NaiveDate::parse_from_str(date_str, format).ok()
}

/// Leading house number of a street string ("1234 W GRAND" -> 1234).
pub fn house_number(street: Option<&str>) -> Option<u32> {
    street?.split_whitespace().next()?.parse::<u32>().ok()
}

/// Five-digit zip from a ZIP+4 string.
pub fn zip5(zip: &str) -> String {
    zip.split('-').next().unwrap_or_default().trim().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_owner_strips_punctuation() {
        assert_eq!(clean_owner(Some("O'Brien, LLC.")), "OBrien LLC");
        assert_eq!(clean_owner(Some("  ACME   HOLDINGS\tLLC ")), "ACME HOLDINGSLLC");
        assert_eq!(clean_owner(Some("123 MAIN ST LLC")), "123 MAIN ST LLC");
        assert_eq!(clean_owner(None), "");
    }

    #[test]
    fn clean_owner_is_idempotent() {
        let samples = [
            "O'Brien, LLC.",
            "  lots   of   space  ",
            "#$%^&*",
            "Détroit Land-Holdings, Inc.",
            "",
            "A  -  B",
        ];
        for s in samples {
            let once = clean_owner(Some(s));
            assert_eq!(clean_owner(Some(&once)), once, "input {:?}", s);
        }
    }

    #[test]
    fn name_key_ignores_case_and_punctuation() {
        assert_eq!(name_key(Some("John Smith")), "JOHN SMITH");
        assert_eq!(name_key(Some("JOHN  SMITH.")), "JOHN SMITH");
    }

    #[test]
    fn own_id_is_uppercased_and_collapsed() {
        assert_eq!(clean_own_id("  smith_j   holdings "), "SMITH_J HOLDINGS");
    }

    #[test]
    fn address_key_strips_street_suffix() {
        assert_eq!(address_key(Some("123 Main St.")), "123 MAIN");
        assert_eq!(address_key(Some("123  MAIN STREET")), "123 MAIN");
        assert_eq!(address_key(Some("4 Grand Blvd")), "4 GRAND");
        assert_eq!(address_key(Some("9 Lodge Fwy.")), "9 LODGE");
        assert_eq!(address_key(Some("77 STANFORD")), "77 STANFORD");
        assert_eq!(address_key(None), "");
    }

    #[test]
    fn parcel_numbers_are_normalized() {
        assert_eq!(fix_parcel_num("1234567"), "1234567.");
        assert_eq!(fix_parcel_num("1234567.89"), "01234567.89");
        assert_eq!(fix_parcel_num("12-34"), "12-34");
        assert_eq!(fix_parcel_num("22001234."), "22001234.");
        assert_eq!(fix_parcel_num(" 123456 "), "123456.");
    }

    #[test]
    fn seven_digit_ward_with_trailing_period_is_padded() {
        assert_eq!(fix_parcel_num("1234567."), "01234567.");
        assert_eq!(fix_parcel_num("01234567."), "01234567.");
        assert_eq!(fix_parcel_num("22001234.003L"), "22001234.003L");
    }

    #[test]
    fn dates_parse_or_go_missing() {
        assert_eq!(clean_date(Some("1900-01-01")), None);
        assert_eq!(clean_date(Some("01/01/1900")), None);
        assert_eq!(
            clean_date(Some("01/15/2021")),
            NaiveDate::from_ymd_opt(2021, 1, 15)
        );
        assert_eq!(
            clean_date(Some("2021-01-15")),
            NaiveDate::from_ymd_opt(2021, 1, 15)
        );
        assert_eq!(clean_date(Some("not-a-date")), None);
        assert_eq!(clean_date(Some("")), None);
        assert_eq!(clean_date(None), None);
    }

    #[test]
    fn house_number_and_zip() {
        assert_eq!(house_number(Some("1234 W GRAND")), Some(1234));
        assert_eq!(house_number(Some("W GRAND")), None);
        assert_eq!(house_number(None), None);
        assert_eq!(zip5("48201-1234"), "48201");
        assert_eq!(zip5("48201"), "48201");
    }
}
