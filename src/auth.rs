//! Password handling.
//!
//! Grounded on the original's `libwc_relay_password_set`: the password is
//! copied into its own buffer so the OS can be asked not to swap it out;
//! failure to lock the buffer is a warning, never an error. The password
//! is only ever placed on the wire inside the `init` command.

/// An in-memory password, best-effort locked against paging to disk.
///
/// `guard` is declared before `bytes` so it drops (and unlocks the pages)
/// before the backing buffer is deallocated.
pub struct Password {
    guard: Option<region::LockGuard>,
    bytes: Box<[u8]>,
}

impl Password {
    pub fn new(password: &str) -> Self {
        let bytes: Box<[u8]> = password.as_bytes().to_vec().into_boxed_slice();

        let guard = if bytes.is_empty() {
            None
        } else {
            match region::lock(bytes.as_ptr(), bytes.len()) {
                Ok(guard) => Some(guard),
                Err(err) => {
                    log::warn!("failed to lock password buffer against paging: {err}");
                    None
                }
            }
        };

        Self { guard, bytes }
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes).expect("password bytes were constructed from a &str")
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Password")
            .field("locked", &self.guard.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_roundtrips_as_str() {
        let password = Password::new("s3cret");
        assert_eq!(password.as_str(), "s3cret");
    }

    #[test]
    fn test_password_debug_does_not_leak() {
        let password = Password::new("s3cret");
        let debug = format!("{password:?}");
        assert!(!debug.contains("s3cret"));
    }
}
