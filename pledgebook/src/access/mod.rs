use crate::gateway::ConfigSource;

/// Check `code` against the shared access code stored under `key`.
///
/// Returns true only when a value is stored and equals the code. A missing
/// value and a failed lookup are both treated as a wrong code.
pub fn validate_access_code<S: ConfigSource + ?Sized>(source: &S, key: &str, code: &str) -> bool {
    match source.config_value(key) {
        Ok(Some(stored)) => stored == code,
        Ok(None) => {
            log::warn!("No access code configured under '{key}'");
            false
        }
        Err(e) => {
            log::warn!("Access code check failed: {e}");
            false
        }
    }
}
