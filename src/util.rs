use std::iter::repeat;
use std::path::{Path, PathBuf};

use rand::Rng;
use serde::Deserialize;

pub fn find_first_subpath<P: AsRef<Path>, F: Fn(&Path) -> bool>(
    root: impl AsRef<Path>,
    subpaths: &[P],
    search: F,
) -> Option<PathBuf> {
    subpaths
        .iter()
        .zip(repeat(root.as_ref()))
        .map(|(b, a)| a.join(b))
        .find(|it: &PathBuf| search(&it))
}

const INVITE_CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const INVITE_CODE_LENGTH: usize = 8;

/// Random class invite code, e.g. `K7Q2M9XA`.
pub fn invite_code() -> String {
    let mut rng = rand::thread_rng();
    (0..INVITE_CODE_LENGTH)
        .map(|_| INVITE_CODE_CHARSET[rng.gen_range(0..INVITE_CODE_CHARSET.len())] as char)
        .collect()
}

/// Serde helper for partial-update fields that distinguish "absent" from
/// "explicitly null": absent stays `None`, `null` becomes `Some(None)` and a
/// value becomes `Some(Some(v))`. Use with `#[serde(default, deserialize_with
/// = "util::patch_field")]`.
pub fn patch_field<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: serde::Deserialize<'de>,
{
    Ok(Some(Option::<T>::deserialize(deserializer)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invite_codes_use_expected_alphabet() {
        for _ in 0..32 {
            let code = invite_code();
            assert_eq!(code.len(), INVITE_CODE_LENGTH);
            assert!(code
                .bytes()
                .all(|b| INVITE_CODE_CHARSET.contains(&b)));
        }
    }

    #[derive(Debug, Deserialize)]
    struct Patch {
        #[serde(default, deserialize_with = "super::patch_field")]
        description: Option<Option<String>>,
    }

    #[test]
    fn patch_field_distinguishes_absent_and_null() {
        let absent: Patch = serde_json::from_str("{}").unwrap();
        assert_eq!(absent.description, None);

        let null: Patch = serde_json::from_str(r#"{"description":null}"#).unwrap();
        assert_eq!(null.description, Some(None));

        let set: Patch = serde_json::from_str(r#"{"description":"x"}"#).unwrap();
        assert_eq!(set.description, Some(Some("x".to_string())));
    }
}
