use std::sync::{Mutex, MutexGuard, PoisonError};

use url::Url;

use crate::error::RuleError;

/// Join base url with another (possibly relative) url
pub fn join_url(current_url: &str, url: &str) -> Result<String, RuleError> {
    let invalid = |source| RuleError::InvalidUrl {
        url: url.to_owned(),
        source,
    };
    let base = Url::parse(current_url).map_err(invalid)?;
    let mut joined = base.join(url).map_err(invalid)?;
    joined.set_fragment(None);
    Ok(joined.to_string())
}

// Workers recover from panics, so a poisoned lock only means some other
// iteration died mid-update; the guarded maps stay usable.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        assert_eq!(
            join_url("https://example.com/a/b", "c").unwrap(),
            "https://example.com/a/c"
        );
        assert_eq!(
            join_url("https://example.com/a/b", "/x#top").unwrap(),
            "https://example.com/x"
        );
        assert!(join_url("not a url", "/x").is_err());
    }
}
