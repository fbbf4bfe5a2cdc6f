//! In-memory passphrase handling.
//!
//! A [`Secret`] is either passphrase bytes or the distinguished *absent*
//! value, which means "no passphrase" (the store is unprotected). The bytes
//! live in a [`Zeroizing`] buffer, so every clone is wiped when dropped.

use zeroize::Zeroizing;

/// A passphrase, or the absence of one.
#[derive(Clone, Default)]
pub struct Secret {
    bytes: Option<Zeroizing<Vec<u8>>>,
}

impl Secret {
    /// The "no passphrase" value.
    pub fn absent() -> Self {
        Self { bytes: None }
    }

    /// Wrap passphrase bytes. Empty input is still a present secret;
    /// use [`Secret::from_entry`] for form-style input.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: Some(Zeroizing::new(bytes.into())),
        }
    }

    /// Interpret a text field: an empty entry means "remove protection".
    pub fn from_entry(entry: &str) -> Self {
        if entry.is_empty() {
            Self::absent()
        } else {
            Self::new(entry.as_bytes())
        }
    }

    pub fn is_absent(&self) -> bool {
        self.bytes.is_none()
    }

    pub fn is_present(&self) -> bool {
        self.bytes.is_some()
    }

    /// Borrow the raw passphrase bytes, `None` when absent.
    pub fn expose(&self) -> Option<&[u8]> {
        self.bytes.as_deref().map(Vec::as_slice)
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        match (self.expose(), other.expose()) {
            (None, None) => true,
            (Some(a), Some(b)) => constant_time_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for Secret {}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_absent() {
            f.write_str("Secret(absent)")
        } else {
            f.write_str("Secret([REDACTED])")
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_equals_absent() {
        assert_eq!(Secret::absent(), Secret::absent());
        assert_eq!(Secret::default(), Secret::absent());
    }

    #[test]
    fn absent_differs_from_empty_present() {
        assert_ne!(Secret::absent(), Secret::new(Vec::new()));
    }

    #[test]
    fn equal_bytes_compare_equal() {
        assert_eq!(Secret::new("hunter2"), Secret::new(b"hunter2".to_vec()));
        assert_ne!(Secret::new("hunter2"), Secret::new("hunter3"));
        assert_ne!(Secret::new("short"), Secret::new("shorter"));
    }

    #[test]
    fn empty_entry_means_absent() {
        assert!(Secret::from_entry("").is_absent());
        let s = Secret::from_entry("pw");
        assert!(s.is_present());
        assert_eq!(s.expose(), Some(&b"pw"[..]));
    }

    #[test]
    fn debug_redacts_bytes() {
        let dbg = format!("{:?}", Secret::new("correct horse"));
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains("horse"));
        assert_eq!(format!("{:?}", Secret::absent()), "Secret(absent)");
    }
}
