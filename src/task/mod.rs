//! Download task model.
//!
//! A [`DownloadTask`] is one requested download of a specific content item at
//! a specific quality/format. Its lifecycle is a small state machine:
//!
//! ```text
//!   from          action     to
//!   Pending       admit      Downloading
//!   Downloading   pause      Paused
//!   Paused        resume     Downloading
//!   Downloading   100%       Completed
//!   Downloading   error      Failed
//!   Failed        retry      Downloading   (retry_count < max_retries)
//!   any but Completed/Cancelled
//!                 cancel     Cancelled
//! ```
//!
//! Transition methods validate the current status and return a
//! [`TransitionError`] with a specific reason when the move is not allowed.
//! They are crate-private: only the scheduler mutates tasks.

mod item;
mod request;

pub use item::{
    DEFAULT_PRIORITY, DownloadTask, MAX_PRIORITY, MIN_PRIORITY, TaskStatus, TransitionError,
};
pub use request::{CreateDownloadRequest, Priority};

/// Generates an opaque task id: `download_<unix millis>_<9 base36 chars>`.
#[must_use]
pub fn generate_task_id() -> String {
    use rand::Rng;

    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let suffix: String = {
        let mut rng = rand::thread_rng();
        (0..9)
            .map(|_| char::from(ALPHABET[rng.gen_range(0..ALPHABET.len())]))
            .collect()
    };
    format!("download_{}_{suffix}", chrono::Utc::now().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_task_id_format() {
        let id = generate_task_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "download");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 9);
        assert!(parts[2].chars().all(|c| c.is_ascii_alphanumeric() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_generate_task_id_is_unique() {
        let a = generate_task_id();
        let b = generate_task_id();
        assert_ne!(a, b);
    }
}
