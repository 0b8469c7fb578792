//! Foundational low-level utilities shared across ignis crates.
//!
//! Provides atomic file replacement for snapshots, durable line appends for
//! the execution journal, and a millisecond clock for temp-file names.

pub mod atomic_io;
pub mod durable_append;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use durable_append::{append_line_durable, read_nonblank_lines};
pub use time_utils::current_unix_timestamp_ms;

#[cfg(test)]
mod tests {
    use std::fs::read_to_string;

    use super::*;

    #[test]
    fn unit_timestamp_ms_is_monotonic_enough_for_temp_names() {
        let first = current_unix_timestamp_ms();
        let second = current_unix_timestamp_ms();
        assert!(first > 1_600_000_000_000);
        assert!(second >= first);
    }

    #[test]
    fn write_text_atomic_writes_content() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("deployed_addresses.json");
        write_text_atomic(&path, "{}").expect("write");
        let contents = read_to_string(&path).expect("read");
        assert_eq!(contents, "{}");
    }

    #[test]
    fn write_text_atomic_replaces_existing_content() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("state.json");
        write_text_atomic(&path, "first").expect("write first");
        write_text_atomic(&path, "second").expect("write second");
        assert_eq!(read_to_string(&path).expect("read"), "second");
    }

    #[test]
    fn write_text_atomic_rejects_directory_destination() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let error = write_text_atomic(tempdir.path(), "x").expect_err("directory rejected");
        assert!(error.to_string().contains("is a directory"));
    }
}
